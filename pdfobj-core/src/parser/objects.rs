//! PDF Object Parser
//!
//! Parses PDF objects from tokens according to ISO 32000-1 Section 7.3 and
//! allocates them in an [`ObjectStore`]. Indirect references become foreign
//! references into the document being read.

use super::lexer::{Lexer, Token};
use super::{ParseError, ParseResult};
use crate::objects::{
    Dict, DocId, Indirect, Obj, ObjectStore, StreamData, StreamFlags, Value, MAX_NESTING_DEPTH,
};

/// Parser turning a byte buffer into store values
pub struct ObjectParser<'a, 's> {
    lexer: Lexer<'a>,
    objects: &'s mut ObjectStore,
    doc: DocId,
    depth: usize,
}

impl<'a, 's> ObjectParser<'a, 's> {
    pub fn new(data: &'a [u8], objects: &'s mut ObjectStore, doc: DocId) -> Self {
        Self {
            lexer: Lexer::new(data),
            objects,
            doc,
            depth: 0,
        }
    }

    pub fn lexer(&mut self) -> &mut Lexer<'a> {
        &mut self.lexer
    }

    pub fn objects(&mut self) -> &mut ObjectStore {
        self.objects
    }

    /// Parse the next object
    pub fn parse_object(&mut self) -> ParseResult<Obj> {
        let token = self.lexer.next_token()?;
        self.parse_from_token(token)
    }

    /// Read an unsigned integer token
    pub fn read_unsigned(&mut self) -> Option<u64> {
        match self.lexer.next_token() {
            Ok(Token::Integer(n)) if n >= 0 => Some(n as u64),
            _ => None,
        }
    }

    /// Parse an object starting from an already consumed token
    fn parse_from_token(&mut self, token: Token) -> ParseResult<Obj> {
        let value = match token {
            Token::Null => Value::Null,
            Token::Boolean(b) => Value::Boolean(b),
            Token::Integer(i) => return self.parse_integer_or_reference(i),
            Token::Real(r) => Value::Number(r),
            Token::String(s) => Value::String(s),
            Token::Name(n) => Value::Name(n),
            Token::ArrayStart => return self.nested(Self::parse_array),
            Token::DictStart => return self.nested(Self::parse_dictionary_or_stream),
            Token::Eof => {
                return Err(ParseError::SyntaxError {
                    position: self.lexer.position(),
                    message: "Unexpected end of input".to_string(),
                })
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    expected: "PDF object".to_string(),
                    found: format!("{other:?}"),
                })
            }
        };
        Ok(self.objects.insert(value))
    }

    fn nested(&mut self, parse: fn(&mut Self) -> ParseResult<Obj>) -> ParseResult<Obj> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// An integer may start an `n g R` reference
    fn parse_integer_or_reference(&mut self, first: i64) -> ParseResult<Obj> {
        let second = self.lexer.next_token()?;
        if let Token::Integer(generation) = second {
            let third = self.lexer.next_token()?;
            if third == Token::R {
                if first < 0 || first > u32::MAX as i64 || !(0..=u16::MAX as i64).contains(&generation)
                {
                    return Err(ParseError::SyntaxError {
                        position: self.lexer.position(),
                        message: format!("Invalid reference {first} {generation} R"),
                    });
                }
                let reference = Indirect::Foreign {
                    doc: self.doc,
                    label: first as u32,
                    generation: generation as u16,
                };
                return Ok(self.objects.insert(Value::Indirect(reference)));
            }
            // Token buffer is a stack: push in reverse order
            self.lexer.push_token(third);
            self.lexer.push_token(Token::Integer(generation));
        } else {
            self.lexer.push_token(second);
        }
        Ok(self.objects.insert(Value::Number(first as f64)))
    }

    fn parse_array(&mut self) -> ParseResult<Obj> {
        let mut items = Vec::new();
        loop {
            let token = match self.lexer.next_token() {
                Ok(token) => token,
                Err(e) => return Err(self.abandon(items, e)),
            };
            if token == Token::ArrayEnd {
                break;
            }
            match self.parse_from_token(token) {
                Ok(item) => items.push(item),
                Err(e) => return Err(self.abandon(items, e)),
            }
        }
        Ok(self.objects.insert(Value::Array(items)))
    }

    fn parse_dictionary_or_stream(&mut self) -> ParseResult<Obj> {
        let dict = self.parse_dictionary_inner()?;
        let dict = self.objects.insert(Value::Dict(dict));

        match self.lexer.next_token() {
            Ok(Token::Stream) => {}
            Ok(other) => {
                self.lexer.push_token(other);
                return Ok(dict);
            }
            Err(e) => return Err(self.abandon(vec![dict], e)),
        }

        let length = self
            .objects
            .lookup_number(dict, b"Length")
            .ok()
            .flatten()
            .filter(|length| *length >= 0.0)
            .map(|length| length as usize);
        let body = match self.lexer.read_stream_body(length) {
            Ok(body) => body,
            Err(e) => return Err(self.abandon(vec![dict], e)),
        };

        let mut stream = StreamData::new(dict, StreamFlags::empty());
        stream.extend(body);
        Ok(self.objects.insert(Value::Stream(stream)))
    }

    fn parse_dictionary_inner(&mut self) -> ParseResult<Dict> {
        let mut dict = Dict::new();
        loop {
            let key = match self.lexer.next_token() {
                Ok(Token::DictEnd) => break,
                Ok(Token::Name(name)) => name,
                Ok(other) => {
                    let error = ParseError::UnexpectedToken {
                        expected: "dictionary key".to_string(),
                        found: format!("{other:?}"),
                    };
                    return Err(self.abandon(dict.values().collect(), error));
                }
                Err(e) => return Err(self.abandon(dict.values().collect(), e)),
            };
            match self.parse_object() {
                Ok(value) => {
                    if let Some(old) = dict.insert(key, value) {
                        self.objects.discard(old);
                    }
                }
                Err(e) => return Err(self.abandon(dict.values().collect(), e)),
            }
        }
        Ok(dict)
    }

    /// Frees partially built children before reporting `error`.
    fn abandon(&mut self, parsed: Vec<Obj>, error: ParseError) -> ParseError {
        for obj in parsed {
            self.objects.discard(obj);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Kind;

    const DOC: DocId = DocId(7);

    fn parse(input: &[u8]) -> (ObjectStore, Obj) {
        let mut store = ObjectStore::new();
        let obj = ObjectParser::new(input, &mut store, DOC)
            .parse_object()
            .unwrap();
        (store, obj)
    }

    #[test]
    fn test_parse_scalars() {
        let (store, obj) = parse(b"3.25");
        assert_eq!(store.number(obj).unwrap(), 3.25);
        let (store, obj) = parse(b"(text)");
        assert_eq!(store.string(obj).unwrap(), b"text");
        let (store, obj) = parse(b"null");
        assert_eq!(store.kind(obj).unwrap(), Kind::Null);
    }

    #[test]
    fn test_parse_reference() {
        let (store, obj) = parse(b"12 0 R");
        let reference = *store.value(obj).unwrap().as_indirect().unwrap();
        assert_eq!(
            reference,
            Indirect::Foreign {
                doc: DOC,
                label: 12,
                generation: 0
            }
        );
    }

    #[test]
    fn test_parse_array_of_numbers_and_references() {
        let (store, obj) = parse(b"[1 2 3 0 R 4]");
        let items = store.array(obj).unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(store.number(items[0]).unwrap(), 1.0);
        assert_eq!(store.number(items[1]).unwrap(), 2.0);
        assert_eq!(store.kind(items[2]).unwrap(), Kind::Indirect);
        assert_eq!(store.number(items[3]).unwrap(), 4.0);
    }

    #[test]
    fn test_parse_dictionary_keeps_order() {
        let (store, obj) = parse(b"<< /Type /Page /Count 2 /Kids [] >>");
        let dict = store.dict(obj).unwrap();
        let keys: Vec<&[u8]> = dict.keys().collect();
        assert_eq!(keys, vec![&b"Type"[..], b"Count", b"Kids"]);
        assert_eq!(store.lookup_name(obj, b"Type").unwrap(), Some(&b"Page"[..]));
    }

    #[test]
    fn test_duplicate_key_keeps_last_value() {
        let (store, obj) = parse(b"<< /A 1 /A 2 >>");
        assert_eq!(store.dict(obj).unwrap().len(), 1);
        assert_eq!(store.lookup_number(obj, b"A").unwrap(), Some(2.0));
        assert_eq!(store.live_count(), 2);
    }

    #[test]
    fn test_parse_stream() {
        let (store, obj) = parse(b"<< /Length 5 >>\nstream\nhello\nendstream");
        let stream = store.stream(obj).unwrap();
        assert_eq!(stream.data(), b"hello");
        assert_eq!(store.lookup_number(obj, b"Length").unwrap(), Some(5.0));
    }

    #[test]
    fn test_stream_with_indirect_length_uses_endstream() {
        let (store, obj) = parse(b"<< /Length 9 0 R >>\nstream\nabc\r\nendstream");
        assert_eq!(store.stream(obj).unwrap().data(), b"abc");
    }

    #[test]
    fn test_failed_parse_frees_partial_values() {
        let mut store = ObjectStore::new();
        let result = ObjectParser::new(b"<< /A [1 2 /B", &mut store, DOC).parse_object();
        assert!(result.is_err());
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_nesting_limit() {
        std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(|| {
                let mut input = vec![b'['; MAX_NESTING_DEPTH + 1];
                input.extend(vec![b']'; MAX_NESTING_DEPTH + 1]);
                let mut store = ObjectStore::new();
                let result = ObjectParser::new(&input, &mut store, DOC).parse_object();
                assert!(matches!(result, Err(ParseError::TooDeep(_))));
                assert_eq!(store.live_count(), 0);
            })
            .unwrap()
            .join()
            .unwrap();
    }
}
