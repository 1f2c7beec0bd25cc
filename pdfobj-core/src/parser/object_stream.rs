//! PDF Object Stream Parser
//!
//! Handles the offset table of object streams (PDF 1.5+). The decoded
//! container is cached by the reader; this header tells where each packed
//! object lives inside it.

use super::xref::parse_unsigned;
use super::{ParseError, ParseResult};
use crate::objects::{Obj, ObjectStore};
use std::ops::Range;

/// Offset table of a decoded object stream
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObjStmHeader {
    /// Byte offset of the first object
    first: usize,
    /// (object number, offset relative to `first`)
    entries: Vec<(u32, usize)>,
}

impl ObjStmHeader {
    /// Parse the header of the decoded object stream `num`.
    pub(crate) fn parse(objects: &ObjectStore, stream: Obj, num: u32) -> ParseResult<Self> {
        let error = || ParseError::InvalidObjectStream(num);

        if objects.lookup_name(stream, b"Type").ok().flatten() != Some(b"ObjStm".as_slice()) {
            return Err(error());
        }
        let n = objects
            .lookup_number(stream, b"N")
            .ok()
            .flatten()
            .filter(|n| *n >= 0.0)
            .ok_or_else(error)? as usize;
        let first = objects
            .lookup_number(stream, b"First")
            .ok()
            .flatten()
            .filter(|first| *first >= 0.0)
            .ok_or_else(error)? as usize;

        let data = objects.stream(stream).map_err(|_| error())?.data();
        // Reject object streams without object data
        if first >= data.len() {
            return Err(error());
        }

        let table = &data[..first];
        if n > table.len() / 4 + 1 {
            return Err(error());
        }
        let mut pos = 0;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            skip_white(table, &mut pos);
            let obj_num = parse_unsigned(table, &mut pos).ok_or_else(error)?;
            skip_white(table, &mut pos);
            let offset = parse_unsigned(table, &mut pos).ok_or_else(error)?;
            entries.push((obj_num as u32, offset as usize));
        }

        // Any garbage after the last entry?
        skip_white(table, &mut pos);
        if pos != table.len() {
            return Err(error());
        }

        Ok(Self { first, entries })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Byte range of object `obj_num` stored at `index`, within data of
    /// `data_len` bytes.
    pub(crate) fn object_span(&self, index: usize, obj_num: u32, data_len: usize) -> Option<Range<usize>> {
        let &(num, offset) = self.entries.get(index)?;
        if num != obj_num {
            return None;
        }
        let start = self.first.checked_add(offset)?;
        let end = match self.entries.get(index + 1) {
            Some(&(_, next)) => self.first.checked_add(next)?,
            None => data_len,
        };
        (start <= end && end <= data_len).then_some(start..end)
    }
}

fn skip_white(data: &[u8], pos: &mut usize) {
    while data
        .get(*pos)
        .is_some_and(|&b| super::lexer::is_whitespace(b))
    {
        *pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{Dict, StreamData, StreamFlags, Value};

    fn objstm(store: &mut ObjectStore, n: u32, first: u32, body: &[u8]) -> Obj {
        let mut dict = Dict::new();
        dict.insert(b"Type".to_vec(), store.insert(Value::name("ObjStm")));
        dict.insert(b"N".to_vec(), store.insert(Value::from(n)));
        dict.insert(b"First".to_vec(), store.insert(Value::from(first)));
        let dict = store.insert(Value::Dict(dict));
        let mut stream = StreamData::new(dict, StreamFlags::empty());
        stream.extend(body);
        store.insert(Value::Stream(stream))
    }

    #[test]
    fn test_parse_header_and_spans() {
        let mut store = ObjectStore::new();
        let body = b"4 0 7 3 (a) <<>>";
        let stream = objstm(&mut store, 2, 8, body);
        let header = ObjStmHeader::parse(&store, stream, 9).unwrap();
        assert_eq!(header.len(), 2);
        assert_eq!(header.object_span(0, 4, body.len()), Some(8..11));
        assert_eq!(&body[8..11], b"(a)");
        assert_eq!(header.object_span(1, 7, body.len()), Some(11..body.len()));
        // Wrong object number at that index
        assert_eq!(header.object_span(1, 4, body.len()), None);
        assert_eq!(header.object_span(2, 4, body.len()), None);
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let mut store = ObjectStore::new();
        let stream = objstm(&mut store, 1, 4, b"1 0 null");
        let dict = store.stream(stream).unwrap().dict();
        let xref = store.insert(Value::name("XRef"));
        let old = store.dict_mut(dict).unwrap().insert(b"Type".to_vec(), xref);
        store.discard(old.unwrap());
        assert!(matches!(
            ObjStmHeader::parse(&store, stream, 3),
            Err(ParseError::InvalidObjectStream(3))
        ));
    }

    #[test]
    fn test_first_beyond_data_is_rejected() {
        let mut store = ObjectStore::new();
        let stream = objstm(&mut store, 1, 40, b"1 0 null");
        assert!(ObjStmHeader::parse(&store, stream, 3).is_err());
    }

    #[test]
    fn test_garbage_in_offset_table_is_rejected() {
        let mut store = ObjectStore::new();
        let stream = objstm(&mut store, 1, 8, b"1 0 xyz null");
        assert!(ObjStmHeader::parse(&store, stream, 3).is_err());

        let stream = objstm(&mut store, 2, 4, b"1 0 null");
        assert!(ObjStmHeader::parse(&store, stream, 3).is_err());
    }
}
