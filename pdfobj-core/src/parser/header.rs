//! PDF Header Parser
//!
//! Parses the `%PDF-1.N` header line according to ISO 32000-1 Section 7.5.2

use super::{ParseError, ParseResult};
use std::io::{Read, Seek, SeekFrom};

const HEADER_PREFIX: &[u8] = b"%PDF-1.";

/// Longest header prefix inspected
const HEADER_PROBE_LEN: usize = 32;

/// Read the minor version from a `%PDF-1.N` header at the start of `source`.
///
/// Returns `None` when the source does not start with such a header.
pub fn read_version<R: Read + Seek>(source: &mut R) -> ParseResult<Option<u32>> {
    source.seek(SeekFrom::Start(0))?;
    let mut probe = Vec::with_capacity(HEADER_PROBE_LEN);
    source
        .by_ref()
        .take(HEADER_PROBE_LEN as u64)
        .read_to_end(&mut probe)?;
    Ok(parse_version(&probe))
}

fn parse_version(line: &[u8]) -> Option<u32> {
    let rest = line.strip_prefix(HEADER_PREFIX)?;
    let rest = &rest[rest.iter().take_while(|b| b.is_ascii_whitespace()).count()..];
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    std::str::from_utf8(&rest[..digits]).ok()?.parse().ok()
}

/// Check that `source` looks like a PDF file.
///
/// Any `%PDF-1.N` header is accepted; a version above `max_version` only
/// produces a warning.
pub fn check_for_pdf<R: Read + Seek>(source: &mut R, max_version: u8) -> ParseResult<bool> {
    match read_version(source)? {
        None => Ok(false),
        Some(version) => {
            if version > max_version as u32 {
                tracing::warn!(
                    version,
                    max_version,
                    "Version of PDF file (1.{version}) is newer than the supported maximum."
                );
            }
            Ok(true)
        }
    }
}

/// Validate the header for reading: the version must be in `1..=max_version`.
pub(crate) fn require_version<R: Read + Seek>(source: &mut R, max_version: u8) -> ParseResult<u32> {
    match read_version(source)? {
        Some(version) if version >= 1 && version <= max_version as u32 => Ok(version),
        Some(found) => Err(ParseError::UnsupportedVersion {
            found,
            max: max_version,
        }),
        None => Err(ParseError::InvalidHeader),
    }
}
