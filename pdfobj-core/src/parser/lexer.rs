//! PDF Lexer
//!
//! Tokenizes PDF syntax according to ISO 32000-1 Section 7.2. The lexer works
//! on an in-memory buffer holding one object (or one xref section).

use super::{ParseError, ParseResult};

/// PDF Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Boolean: true or false
    Boolean(bool),

    /// Integer number
    Integer(i64),

    /// Real number
    Real(f64),

    /// String (literal or hexadecimal)
    String(Vec<u8>),

    /// Name object without the slash, `#xx` escapes resolved
    Name(Vec<u8>),

    /// Left square bracket [
    ArrayStart,

    /// Right square bracket ]
    ArrayEnd,

    /// Dictionary start <<
    DictStart,

    /// Dictionary end >>
    DictEnd,

    /// Stream keyword
    Stream,

    /// Endstream keyword
    EndStream,

    /// Obj keyword
    Obj,

    /// Endobj keyword
    EndObj,

    /// R keyword closing an indirect reference
    R,

    /// Null object
    Null,

    /// Any other bare word (xref, trailer, startxref, ...)
    Keyword(Vec<u8>),

    /// End of input
    Eof,
}

pub(crate) fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

pub(crate) fn is_delimiter(ch: u8) -> bool {
    matches!(
        ch,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// PDF Lexer for tokenizing a byte buffer
pub struct Lexer<'a> {
    data: &'a [u8],
    position: usize,
    token_buffer: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            token_buffer: Vec::new(),
        }
    }

    /// Current byte offset in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position.min(self.data.len())..]
    }

    /// Push a token back to be returned by the next `next_token` call
    pub fn push_token(&mut self, token: Token) {
        self.token_buffer.push(token);
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::SyntaxError {
            position: self.position,
            message: message.into(),
        }
    }

    /// Get the next token
    pub fn next_token(&mut self) -> ParseResult<Token> {
        if let Some(token) = self.token_buffer.pop() {
            return Ok(token);
        }

        self.skip_whitespace();

        let ch = match self.peek_char() {
            Some(ch) => ch,
            None => return Ok(Token::Eof),
        };

        match ch {
            b'/' => self.read_name(),
            b'(' => self.read_literal_string(),
            b'<' => self.read_angle_bracket(),
            b'>' => {
                self.consume_char();
                if self.peek_char() == Some(b'>') {
                    self.consume_char();
                    Ok(Token::DictEnd)
                } else {
                    Err(self.error("Expected '>' after '>'"))
                }
            }
            b'[' => {
                self.consume_char();
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.consume_char();
                Ok(Token::ArrayEnd)
            }
            b'+' | b'-' | b'0'..=b'9' | b'.' => self.read_number(),
            _ if is_delimiter(ch) => Err(self.error(format!(
                "Unexpected character: {}",
                ch as char
            ))),
            _ => self.read_keyword(),
        }
    }

    fn peek_char(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    fn consume_char(&mut self) -> Option<u8> {
        let ch = self.peek_char();
        if ch.is_some() {
            self.position += 1;
        }
        ch
    }

    /// Skip whitespace and comments
    pub fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) {
                self.position += 1;
            } else if ch == b'%' {
                while let Some(ch) = self.peek_char() {
                    if ch == b'\n' || ch == b'\r' {
                        break;
                    }
                    self.position += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Read a name object (e.g., /Type)
    fn read_name(&mut self) -> ParseResult<Token> {
        self.consume_char(); // consume '/'
        let mut name = Vec::new();

        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) || is_delimiter(ch) {
                break;
            }
            self.consume_char();

            // Handle hex codes in names (e.g., /A#20B means /A B)
            if ch == b'#' {
                let hex = self
                    .data
                    .get(self.position..self.position + 2)
                    .and_then(|digits| std::str::from_utf8(digits).ok())
                    .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                    .ok_or_else(|| self.error("Invalid hex code in name"))?;
                if hex == 0 {
                    return Err(self.error("Null character in name"));
                }
                self.position += 2;
                name.push(hex);
            } else {
                name.push(ch);
            }
        }

        Ok(Token::Name(name))
    }

    /// Read a literal string (parentheses)
    fn read_literal_string(&mut self) -> ParseResult<Token> {
        self.consume_char(); // consume '('
        let mut string = Vec::new();
        let mut paren_depth = 1;

        while paren_depth > 0 {
            let ch = self
                .consume_char()
                .ok_or_else(|| self.error("Unterminated string"))?;

            match ch {
                b'\\' => {
                    let escaped = self
                        .consume_char()
                        .ok_or_else(|| self.error("Unterminated string"))?;
                    match escaped {
                        b'n' => string.push(b'\n'),
                        b'r' => string.push(b'\r'),
                        b't' => string.push(b'\t'),
                        b'b' => string.push(b'\x08'),
                        b'f' => string.push(b'\x0C'),
                        b'0'..=b'7' => {
                            // Octal escape sequence, up to three digits
                            let mut value = (escaped - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek_char() {
                                    Some(next @ b'0'..=b'7') => {
                                        self.consume_char();
                                        value = value * 8 + (next - b'0') as u32;
                                    }
                                    _ => break,
                                }
                            }
                            string.push(value as u8);
                        }
                        // Line continuation
                        b'\r' => {
                            if self.peek_char() == Some(b'\n') {
                                self.consume_char();
                            }
                        }
                        b'\n' => {}
                        other => string.push(other),
                    }
                }
                b'(' => {
                    string.push(ch);
                    paren_depth += 1;
                }
                b')' => {
                    paren_depth -= 1;
                    if paren_depth > 0 {
                        string.push(ch);
                    }
                }
                _ => string.push(ch),
            }
        }

        Ok(Token::String(string))
    }

    /// Read angle bracket tokens (hex strings or dict markers)
    fn read_angle_bracket(&mut self) -> ParseResult<Token> {
        self.consume_char(); // consume '<'

        if self.peek_char() == Some(b'<') {
            self.consume_char();
            return Ok(Token::DictStart);
        }

        let mut bytes = Vec::new();
        let mut high: Option<u8> = None;
        loop {
            let ch = self
                .consume_char()
                .ok_or_else(|| self.error("Unterminated hex string"))?;
            let digit = match ch {
                b'>' => break,
                b'0'..=b'9' => ch - b'0',
                b'a'..=b'f' => ch - b'a' + 10,
                b'A'..=b'F' => ch - b'A' + 10,
                _ if is_whitespace(ch) => continue,
                _ => return Err(self.error("Invalid character in hex string")),
            };
            match high.take() {
                Some(h) => bytes.push((h << 4) | digit),
                None => high = Some(digit),
            }
        }
        // Pad with 0 if odd number of digits
        if let Some(h) = high {
            bytes.push(h << 4);
        }

        Ok(Token::String(bytes))
    }

    /// Read a number (integer or real)
    fn read_number(&mut self) -> ParseResult<Token> {
        let start = self.position;
        let mut has_dot = false;

        if matches!(self.peek_char(), Some(b'+') | Some(b'-')) {
            self.consume_char();
        }
        while let Some(ch) = self.peek_char() {
            match ch {
                b'0'..=b'9' => {
                    self.consume_char();
                }
                b'.' if !has_dot => {
                    self.consume_char();
                    has_dot = true;
                }
                _ => break,
            }
        }

        let text = std::str::from_utf8(&self.data[start..self.position])
            .map_err(|_| self.error("Invalid number"))?;
        let text = text.strip_prefix('+').unwrap_or(text);
        if text.is_empty() || text == "-" || text == "." || text == "-." {
            return Err(self.error(format!("Invalid number: '{text}'")));
        }

        if has_dot {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error(format!("Invalid real number: '{text}'")))?;
            Ok(Token::Real(value))
        } else {
            match text.parse::<i64>() {
                Ok(value) => Ok(Token::Integer(value)),
                // Out of range integers degrade to reals
                Err(_) => text
                    .parse::<f64>()
                    .map(Token::Real)
                    .map_err(|_| self.error(format!("Invalid integer: '{text}'"))),
            }
        }
    }

    /// Read a bare word and classify it
    fn read_keyword(&mut self) -> ParseResult<Token> {
        let word = self.read_word();
        Ok(match word {
            b"true" => Token::Boolean(true),
            b"false" => Token::Boolean(false),
            b"null" => Token::Null,
            b"stream" => Token::Stream,
            b"endstream" => Token::EndStream,
            b"obj" => Token::Obj,
            b"endobj" => Token::EndObj,
            b"R" => Token::R,
            other => Token::Keyword(other.to_vec()),
        })
    }

    /// Read a word (sequence of non-delimiter characters)
    fn read_word(&mut self) -> &'a [u8] {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) || is_delimiter(ch) {
                break;
            }
            self.position += 1;
        }
        &self.data[start..self.position]
    }

    /// Consume the end-of-line that follows the `stream` keyword
    fn skip_stream_eol(&mut self) {
        match self.peek_char() {
            Some(b'\r') => {
                self.consume_char();
                if self.peek_char() == Some(b'\n') {
                    self.consume_char();
                }
            }
            Some(b'\n') => {
                self.consume_char();
            }
            _ => {}
        }
    }

    /// Read the stream body after the `stream` keyword, up to and including
    /// `endstream`.
    ///
    /// With a known length the body is taken verbatim when `endstream`
    /// follows it; otherwise the body ends at the next `endstream` keyword,
    /// minus the end-of-line that precedes it.
    pub fn read_stream_body(&mut self, length: Option<usize>) -> ParseResult<&'a [u8]> {
        self.skip_stream_eol();
        let start = self.position;

        if let Some(length) = length {
            if let Some(end) = start.checked_add(length).filter(|end| *end <= self.data.len()) {
                let mut probe = Lexer::new(&self.data[end..]);
                probe.skip_whitespace();
                if probe.remaining().starts_with(b"endstream") {
                    self.position = end + probe.position() + b"endstream".len();
                    return Ok(&self.data[start..end]);
                }
            }
        }

        let offset = find_keyword(&self.data[start..], b"endstream")
            .ok_or_else(|| self.error("Missing endstream"))?;
        let mut end = start + offset;
        if end > start && self.data[end - 1] == b'\n' {
            end -= 1;
        }
        if end > start && self.data[end - 1] == b'\r' {
            end -= 1;
        }
        self.position = start + offset + b"endstream".len();
        Ok(&self.data[start..end])
    }
}

/// Position of the first occurrence of `keyword` in `data`.
pub(crate) fn find_keyword(data: &[u8], keyword: &[u8]) -> Option<usize> {
    if keyword.is_empty() || data.len() < keyword.len() {
        return None;
    }
    data.windows(keyword.len()).position(|window| window == keyword)
}
