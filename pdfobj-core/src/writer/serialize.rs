//! Serialization of store values into PDF syntax

use super::encryption::EncryptionHook;
use crate::compression::compress;
use crate::error::{PdfError, Result};
use crate::objects::{Indirect, Kind, Obj, ObjectStore, StreamData, StreamFlags, Value};
use std::borrow::Cow;
use std::fmt::Write as _;

/// Lines longer than this get a newline instead of a space separator.
const MAX_LINE_POSITION: usize = 80;

/// Digits kept after the decimal point when writing numbers.
const NUMBER_PRECISION: usize = 8;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Whether two adjacent tokens need a separator.
fn need_white(first: Kind, second: Kind) -> bool {
    !(matches!(first, Kind::String | Kind::Array | Kind::Dict)
        || matches!(second, Kind::String | Kind::Name | Kind::Array | Kind::Dict))
}

fn is_delimiter(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')' | b'/' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'%'
    )
}

/// Format a number with at most eight fractional digits, without trailing
/// zeros and never as `-0`.
pub(crate) fn format_number(value: f64) -> String {
    if !value.is_finite() {
        tracing::warn!(value, "Non-finite number written as 0");
        return "0".to_string();
    }
    let mut text = format!("{value:.NUMBER_PRECISION$}");
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

/// Entries of a filter array about to be written
enum FilterItem {
    FlateDecode,
    Existing(Obj),
}

/// Writes values of one indirect object into a byte buffer.
pub(crate) struct Serializer<'a> {
    objects: &'a ObjectStore,
    out: Vec<u8>,
    line_position: usize,
    /// Object stream contents never break lines
    track_lines: bool,
    compression_level: u8,
    encryption: Option<&'a mut Box<dyn EncryptionHook>>,
    compression_saved: i64,
}

impl<'a> Serializer<'a> {
    pub(crate) fn new(
        objects: &'a ObjectStore,
        compression_level: u8,
        encryption: Option<&'a mut Box<dyn EncryptionHook>>,
        track_lines: bool,
    ) -> Self {
        Self {
            objects,
            out: Vec::new(),
            line_position: 0,
            track_lines,
            compression_level,
            encryption,
            compression_saved: 0,
        }
    }

    /// Serialized bytes and the number of bytes saved by compression.
    pub(crate) fn finish(self) -> (Vec<u8>, i64) {
        (self.out, self.compression_saved)
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
        if self.track_lines {
            self.line_position += bytes.len();
            if bytes.last() == Some(&b'\n') {
                self.line_position = 0;
            }
        }
    }

    fn emit_white(&mut self) {
        if self.line_position >= MAX_LINE_POSITION {
            self.emit(b"\n");
        } else {
            self.emit(b" ");
        }
    }

    fn emit_hex(&mut self, byte: u8) {
        self.emit(&[
            HEX_DIGITS[(byte >> 4) as usize],
            HEX_DIGITS[(byte & 0x0F) as usize],
        ]);
    }

    pub(crate) fn write_value(&mut self, obj: Obj) -> Result<()> {
        let objects = self.objects;
        match objects.value(obj)? {
            Value::Null => self.emit(b"null"),
            Value::Boolean(true) => self.emit(b"true"),
            Value::Boolean(false) => self.emit(b"false"),
            Value::Number(n) => self.emit(format_number(*n).as_bytes()),
            Value::String(s) => self.write_string(s),
            Value::Name(n) => self.write_name(n)?,
            Value::Array(items) => {
                self.emit(b"[");
                self.write_items(items)?;
                self.emit(b"]");
            }
            Value::Dict(_) => self.write_dict(obj, None)?,
            Value::Stream(stream) => self.write_stream(stream)?,
            Value::Indirect(Indirect::Local {
                label, generation, ..
            }) => self.emit(format!("{label} {generation} R").as_bytes()),
            Value::Indirect(Indirect::Foreign {
                label, generation, ..
            }) => return Err(PdfError::ForeignReference(*label, *generation)),
            Value::Undefined => {
                return Err(PdfError::InvalidStructure(
                    "Trying to write an undefined object".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn write_items(&mut self, items: &[Obj]) -> Result<()> {
        let mut previous: Option<Kind> = None;
        for &item in items {
            let kind = self.objects.kind(item)?;
            if previous.is_some_and(|previous| need_white(previous, kind)) {
                self.emit_white();
            }
            previous = Some(kind);
            self.write_value(item)?;
        }
        Ok(())
    }

    fn write_name(&mut self, name: &[u8]) -> Result<()> {
        if name.contains(&0) {
            return Err(PdfError::InvalidStructure(
                "Name contains a NUL byte".to_string(),
            ));
        }
        self.emit(b"/");
        for &byte in name {
            if !(b'!'..=b'~').contains(&byte) || byte == b'#' || is_delimiter(byte) {
                self.emit(b"#");
                self.emit_hex(byte);
            } else {
                self.emit(&[byte]);
            }
        }
        Ok(())
    }

    fn write_string(&mut self, string: &[u8]) {
        let bytes: Cow<[u8]> = match self.encryption.as_mut() {
            Some(hook) => {
                let mut copy = string.to_vec();
                hook.encrypt(&mut copy);
                Cow::Owned(copy)
            }
            None => Cow::Borrowed(string),
        };

        let unprintable = bytes
            .iter()
            .filter(|&&b| !(b' '..=b'~').contains(&b))
            .count();
        if unprintable > bytes.len() / 3 {
            self.emit(b"<");
            for &byte in bytes.iter() {
                self.emit_hex(byte);
            }
            self.emit(b">");
            return;
        }

        let mut escaped = Vec::with_capacity(bytes.len() + 2);
        escaped.push(b'(');
        for &byte in bytes.iter() {
            match byte {
                b'(' | b')' | b'\\' => escaped.extend_from_slice(&[b'\\', byte]),
                b' '..=b'~' => escaped.push(byte),
                _ => {
                    let mut octal = String::with_capacity(4);
                    let _ = write!(octal, "\\{byte:03o}");
                    escaped.extend_from_slice(octal.as_bytes());
                }
            }
        }
        escaped.push(b')');
        self.emit(&escaped);
    }

    /// Writes a dictionary. When `stream` is given, `Filter` and `Length`
    /// are written for the final body instead of their stored values.
    fn write_dict(&mut self, dict: Obj, stream: Option<(bool, usize)>) -> Result<()> {
        let objects = self.objects;
        let dict = objects.dict(dict)?;
        let mut wrote_filter = false;
        let mut wrote_length = false;

        self.emit(b"<<");
        for (key, value) in dict.iter() {
            self.write_name(key)?;
            match (stream, key) {
                (Some((true, _)), b"Filter") => {
                    wrote_filter = true;
                    let mut items = vec![FilterItem::FlateDecode];
                    match objects.value(value)? {
                        Value::Array(existing) => {
                            items.extend(existing.iter().map(|&item| FilterItem::Existing(item)))
                        }
                        _ => items.push(FilterItem::Existing(value)),
                    }
                    self.write_filter_array(&items)?;
                }
                (Some((_, length)), b"Length") => {
                    wrote_length = true;
                    self.emit_white();
                    self.emit(length.to_string().as_bytes());
                }
                _ => {
                    if need_white(Kind::Name, objects.kind(value)?) {
                        self.emit_white();
                    }
                    self.write_value(value)?;
                }
            }
        }
        if let Some((flate, length)) = stream {
            if flate && !wrote_filter {
                self.emit(b"/Filter/FlateDecode");
            }
            if !wrote_length {
                self.emit(b"/Length");
                self.emit_white();
                self.emit(length.to_string().as_bytes());
            }
        }
        self.emit(b">>");
        Ok(())
    }

    fn write_filter_array(&mut self, items: &[FilterItem]) -> Result<()> {
        self.emit(b"[");
        let mut previous: Option<Kind> = None;
        for item in items {
            let kind = match item {
                FilterItem::FlateDecode => Kind::Name,
                FilterItem::Existing(obj) => self.objects.kind(*obj)?,
            };
            if previous.is_some_and(|previous| need_white(previous, kind)) {
                self.emit_white();
            }
            previous = Some(kind);
            match item {
                FilterItem::FlateDecode => self.emit(b"/FlateDecode"),
                FilterItem::Existing(obj) => self.write_value(*obj)?,
            }
        }
        self.emit(b"]");
        Ok(())
    }

    fn write_stream(&mut self, stream: &StreamData) -> Result<()> {
        let raw = stream.data();
        let mut body: Cow<[u8]> = Cow::Borrowed(raw);
        let mut flate = false;

        if stream.flags().contains(StreamFlags::COMPRESS)
            && !raw.is_empty()
            && self.compression_level > 0
        {
            let compressed = compress(raw, self.compression_level)?;
            if compressed.len() < raw.len() {
                let filter_overhead = if self.objects.lookup(stream.dict(), b"Filter")?.is_some() {
                    "/FlateDecode ".len()
                } else {
                    "/Filter/FlateDecode\n".len()
                };
                self.compression_saved +=
                    raw.len() as i64 - compressed.len() as i64 - filter_overhead as i64;
                body = Cow::Owned(compressed);
                flate = true;
            }
        }

        if let Some(hook) = self.encryption.as_mut() {
            let mut encrypted = body.into_owned();
            hook.encrypt(&mut encrypted);
            body = Cow::Owned(encrypted);
        }

        self.write_dict(stream.dict(), Some((flate, body.len())))?;
        self.emit(b"\nstream\n");
        self.emit(&body);
        self.emit(b"\nendstream");
        Ok(())
    }
}
