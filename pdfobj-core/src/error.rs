use crate::objects::Kind;
use crate::parser::ParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object handle (already released or never allocated)")]
    InvalidHandle,

    #[error("Invalid object type: expected {expected}, found {found}")]
    TypeMismatch { expected: Kind, found: Kind },

    #[error("Invalid PDF structure: {0}")]
    InvalidStructure(String),

    #[error("{0} object already set")]
    AlreadySet(&'static str),

    #[error("Object is already labeled as {0}")]
    AlreadyLabeled(u32),

    #[error("No output session is open")]
    NoSession,

    #[error("An output session is already open")]
    SessionAlreadyOpen,

    #[error("Loop in object hierarchy detected")]
    ReferenceLoop,

    #[error("Undefined object reference")]
    UndefinedReference,

    #[error("Foreign reference {0} {1} R must be imported before writing")]
    ForeignReference(u32, u16),

    #[error("Invalid compression level: {0}")]
    InvalidCompressionLevel(u8),

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Stream decode error: {0}")]
    DecodeError(String),

    #[error("Unknown document handle")]
    UnknownDocument,

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, PdfError>;
