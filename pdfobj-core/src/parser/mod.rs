//! PDF Parser Module
//!
//! Reads existing PDF files: header check, cross-reference tables and
//! streams (including `/Prev` chains and hybrid files), and lazy object
//! loading, including objects packed in object streams. Parsed values are
//! allocated in the context's object store.

pub mod filters;
pub mod header;
pub mod lexer;
pub mod object_stream;
pub mod objects;
pub mod predictor;
pub mod reader;
pub mod registry;
pub mod xref;
pub mod xref_stream;

pub use self::header::check_for_pdf;
pub use self::predictor::DecodeParms;
pub use self::reader::PdfFile;

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Highest PDF 1.x minor version accepted by default.
pub const DEFAULT_MAX_VERSION: u8 = 7;

/// PDF Parser errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a PDF file")]
    InvalidHeader,

    #[error("Not a PDF 1.[1-{max}] file (found 1.{found})")]
    UnsupportedVersion { found: u32, max: u8 },

    #[error("Syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    #[error("Unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Missing required key: {0}")]
    MissingKey(String),

    #[error("Invalid xref: {0}")]
    InvalidXRef(String),

    #[error("Invalid trailer: {0}")]
    InvalidTrailer(String),

    #[error("Cannot parse object stream {0}")]
    InvalidObjectStream(u32),

    #[error("PDF document is encrypted")]
    EncryptedDocument,

    #[error("Nesting deeper than {0} levels")]
    TooDeep(usize),
}

/// Options for opening a document
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Highest accepted minor version in the `%PDF-1.N` header
    pub max_version: u8,
    /// How many lines to back up from the end looking for `startxref`
    pub max_startxref_tries: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_version: DEFAULT_MAX_VERSION,
            max_startxref_tries: 10,
        }
    }
}

impl ReaderOptions {
    /// Set the highest accepted minor version
    pub fn with_max_version(mut self, version: u8) -> Self {
        self.max_version = version;
        self
    }

    /// Set the number of lines searched for `startxref`
    pub fn with_max_startxref_tries(mut self, tries: usize) -> Self {
        self.max_startxref_tries = tries;
        self
    }
}
