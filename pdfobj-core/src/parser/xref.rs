//! PDF Cross-Reference Table Parser
//!
//! Parses xref tables according to ISO 32000-1 Section 7.5.4 and holds the
//! per-object state of an opened document.

use super::object_stream::ObjStmHeader;
use super::{ParseError, ParseResult};
use crate::import::ImportState;
use crate::objects::Obj;

/// Smallest number of bytes a classic xref entry can occupy.
const MIN_ENTRY_LEN: usize = 18;

/// Cross-reference entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free or unused object number (type 0)
    Free,
    /// Object stored at a byte offset (type 1)
    InUse { offset: u64, generation: u16 },
    /// Object packed in an object stream (type 2)
    Compressed { stream: u32, index: u32 },
}

/// State kept per object number
#[derive(Debug)]
pub(crate) struct XRefSlot {
    pub(crate) entry: XRefEntry,
    /// Set once a section gave this number an entry with a nonzero offset
    /// field; older sections of a `/Prev` chain and hybrid `/XRefStm` data
    /// never overwrite it. Zero-offset entries stay open to them.
    populated: bool,
    /// Cached value
    pub(crate) direct: Option<Obj>,
    /// Offset table and decoded body when this object is an object stream
    pub(crate) objstm: Option<(ObjStmHeader, Obj)>,
    /// Local reference created when this object was imported
    pub(crate) import: Option<ImportState>,
}

impl Default for XRefSlot {
    fn default() -> Self {
        Self {
            entry: XRefEntry::Free,
            populated: false,
            direct: None,
            objstm: None,
            import: None,
        }
    }
}

/// Cross-reference table
#[derive(Debug, Default)]
pub struct XRefTable {
    slots: Vec<XRefSlot>,
}

impl XRefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of object numbers covered, including 0
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn entry(&self, num: u32) -> Option<XRefEntry> {
        self.slots.get(num as usize).map(|slot| slot.entry)
    }

    pub(crate) fn slot(&self, num: u32) -> Option<&XRefSlot> {
        self.slots.get(num as usize)
    }

    pub(crate) fn slot_mut(&mut self, num: u32) -> Option<&mut XRefSlot> {
        self.slots.get_mut(num as usize)
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = &mut XRefSlot> {
        self.slots.iter_mut()
    }

    pub(crate) fn ensure_len(&mut self, len: usize) {
        if self.slots.len() < len {
            self.slots.resize_with(len, XRefSlot::default);
        }
    }

    /// Records `entry` unless a newer section already filled `num`.
    ///
    /// `field` is the entry's second field: the byte offset, the object
    /// stream number or the next free object.
    pub(crate) fn set_if_empty(&mut self, num: u32, entry: XRefEntry, field: u64) -> bool {
        self.ensure_len(num as usize + 1);
        let slot = &mut self.slots[num as usize];
        if slot.populated {
            return false;
        }
        slot.entry = entry;
        slot.populated = field != 0;
        true
    }
}

/// Rejects a subsection whose object numbers the file cannot back.
pub(crate) fn check_subsection(first: u64, count: u64, file_size: u64) -> ParseResult<()> {
    match first.checked_add(count) {
        Some(end) if end <= u32::MAX as u64 && end <= file_size => Ok(()),
        _ => Err(ParseError::InvalidXRef(format!(
            "subsection {first} {count} does not fit in the file"
        ))),
    }
}

/// Returns the line starting at `*pos` (without its end-of-line) and moves
/// past the end-of-line.
pub(crate) fn next_line<'a>(data: &'a [u8], pos: &mut usize) -> &'a [u8] {
    let start = (*pos).min(data.len());
    let end = data[start..]
        .iter()
        .position(|&b| b == b'\n' || b == b'\r')
        .map_or(data.len(), |offset| start + offset);
    let mut next = end;
    if data.get(next) == Some(&b'\r') {
        next += 1;
    }
    if data.get(next) == Some(&b'\n') {
        next += 1;
    }
    *pos = next;
    &data[start..end]
}

fn skip_white(data: &[u8], pos: &mut usize) {
    while data
        .get(*pos)
        .is_some_and(|&b| super::lexer::is_whitespace(b))
    {
        *pos += 1;
    }
}

pub(crate) fn parse_unsigned(data: &[u8], pos: &mut usize) -> Option<u64> {
    let start = *pos;
    let mut value: u64 = 0;
    while let Some(&b) = data.get(*pos).filter(|b| b.is_ascii_digit()) {
        value = value.checked_mul(10)?.checked_add((b - b'0') as u64)?;
        *pos += 1;
    }
    (*pos > start).then_some(value)
}

/// Parse a classic xref section at the start of `data`.
///
/// Returns `Ok(None)` when `data` does not start with the `xref` keyword (the
/// section is probably an xref stream) and otherwise the position just after
/// the `trailer` keyword.
pub(crate) fn parse_xref_table(
    data: &[u8],
    file_size: u64,
    table: &mut XRefTable,
) -> ParseResult<Option<usize>> {
    let mut pos = 0;
    skip_white(data, &mut pos);
    if !data[pos..].starts_with(b"xref") {
        return Ok(None);
    }
    pos += b"xref".len();

    loop {
        skip_white(data, &mut pos);
        if data[pos..].starts_with(b"trailer") {
            return Ok(Some(pos + b"trailer".len()));
        }

        let line_start = pos;
        let line = next_line(data, &mut pos);
        let mut cursor = 0;
        let first = parse_unsigned(line, &mut cursor);
        skip_white(line, &mut cursor);
        let count = parse_unsigned(line, &mut cursor);
        skip_white(line, &mut cursor);
        let (first, count) = match (first, count) {
            (Some(first), Some(count)) if cursor == line.len() => (first, count),
            _ => {
                return Err(ParseError::InvalidXRef(format!(
                    "malformed subsection header at offset {line_start}"
                )))
            }
        };
        check_subsection(first, count, file_size)?;
        if count as usize > (data.len() - pos) / MIN_ENTRY_LEN + 1 {
            return Err(ParseError::InvalidXRef(format!(
                "subsection {first} {count} does not fit in the file"
            )));
        }
        table.ensure_len((first + count) as usize);

        for num in first..first + count {
            let (entry, field) = parse_entry(data, &mut pos, file_size).map_err(|e| {
                tracing::warn!(obj_num = num, "Invalid xref table entry. PDF file is corrupt");
                e
            })?;
            table.set_if_empty(num as u32, entry, field);
        }
    }
}

/// One `oooooooooo ggggg n` record, with its offset field.
fn parse_entry(data: &[u8], pos: &mut usize, file_size: u64) -> ParseResult<(XRefEntry, u64)> {
    skip_white(data, pos);
    let offset = parse_unsigned(data, pos);
    skip_white(data, pos);
    let generation = parse_unsigned(data, pos);
    skip_white(data, pos);
    let flag = data.get(*pos).copied();
    *pos += 1;

    let (offset, generation) = match (offset, generation) {
        (Some(offset), Some(generation)) if generation <= u16::MAX as u64 => {
            (offset, generation as u16)
        }
        _ => return Err(ParseError::InvalidXRef("unreadable entry".to_string())),
    };

    match flag {
        Some(b'n') => {
            if offset >= file_size || (1..4).contains(&offset) {
                return Err(ParseError::InvalidXRef(format!(
                    "in-use entry offset {offset} outside the file"
                )));
            }
            Ok((XRefEntry::InUse { offset, generation }, offset))
        }
        Some(b'f') => Ok((XRefEntry::Free, offset)),
        Some(other) => Err(ParseError::InvalidXRef(format!(
            "invalid entry flag '{}'",
            other as char
        ))),
        None => Err(ParseError::InvalidXRef("truncated entry".to_string())),
    }
}

/// Locate `startxref` near the end of the file and return the offset that
/// follows it.
///
/// `tail` holds the last bytes of the file; at most `max_tries` lines are
/// examined walking backwards.
pub(crate) fn find_startxref(tail: &[u8], max_tries: usize) -> ParseResult<u64> {
    let mut end = tail.len();
    for _ in 0..max_tries {
        // Step over the line break ending the previous line
        while end > 0 && matches!(tail[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        if end == 0 {
            break;
        }
        let start = tail[..end]
            .iter()
            .rposition(|&b| b == b'\n' || b == b'\r')
            .map_or(0, |p| p + 1);
        let line = &tail[start..end];
        if line.starts_with(b"startxref") {
            let mut pos = start + b"startxref".len();
            skip_white(tail, &mut pos);
            return parse_unsigned(tail, &mut pos)
                .ok_or_else(|| ParseError::InvalidXRef("no offset after startxref".to_string()));
        }
        end = start;
    }
    Err(ParseError::InvalidXRef("startxref not found".to_string()))
}
