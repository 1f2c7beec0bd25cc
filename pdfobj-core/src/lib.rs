//! # pdfobj
//!
//! The object layer of a PDF producer: a reference-counted value graph that
//! is serialized lazily, a reader for existing files and an importer that
//! copies foreign object graphs into the output.
//!
//! ## Features
//!
//! - **Object model**: Null, Boolean, Number, String, Name, Array, Dict,
//!   Stream and Indirect values in one arena, addressed by [`Obj`] handles
//! - **Write on release**: a labeled value is written when its last owner
//!   releases it, either as a top-level object or packed into an object
//!   stream
//! - **Cross-references**: classic tables or PDF 1.5 cross-reference
//!   streams, chosen from the output version
//! - **Reading**: `/Prev` chains, hybrid files, cross-reference streams and
//!   object streams, with objects loaded on first access
//! - **Filters**: `FlateDecode` with TIFF and PNG predictors
//! - **Import**: foreign graphs, cycles included, copied once per object
//!
//! ## Quick Start
//!
//! ```rust
//! use pdfobj::{PdfContext, Result, Value, WriterConfig};
//!
//! # fn main() -> Result<()> {
//! let mut ctx: PdfContext = PdfContext::new();
//! ctx.open_session(Vec::new(), &WriterConfig::default())?;
//!
//! let pages = ctx.new_dict();
//! ctx.dict_set(pages, "Type", Value::name("Pages"))?;
//! ctx.dict_set(pages, "Count", Value::from(0))?;
//!
//! let catalog = ctx.new_dict();
//! ctx.dict_set(catalog, "Type", Value::name("Catalog"))?;
//! let pages_ref = ctx.make_reference(pages)?;
//! ctx.dict_set(catalog, "Pages", pages_ref)?;
//! ctx.set_root(catalog)?;
//!
//! // Releasing the last owners writes both objects
//! ctx.release(pages)?;
//! ctx.release(catalog)?;
//!
//! let pdf = ctx.close_session()?;
//! assert!(pdf.starts_with(b"%PDF-1.5\n"));
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod context;
pub mod error;
pub mod import;
pub mod objects;
pub mod parser;
pub mod writer;

pub use context::PdfContext;
pub use error::{PdfError, Result};
pub use objects::{
    Dict, DocId, Indirect, IntoObj, Kind, Obj, ObjectFlags, ObjectStore, StreamData, StreamFlags,
    Value, MAX_DEREF_DEPTH, MAX_NESTING_DEPTH,
};
pub use parser::{check_for_pdf, DecodeParms, ParseError, PdfFile, ReaderOptions};
pub use writer::{EncryptionHook, WriterConfig, OBJSTM_MAX_OBJECTS};

/// Current version of pdfobj
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
