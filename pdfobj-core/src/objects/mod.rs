//! PDF object model
//!
//! Values live in an [`ObjectStore`] arena and are addressed through copyable
//! [`Obj`] handles. Every handle handed out by a factory or by `link` is one
//! owner; owners give their share back with `release`. A value is destroyed
//! when its last owner releases it, and a labeled value is written to the open
//! output session at exactly that moment.

mod dictionary;
mod primitive;
mod store;
mod stream;

use std::fmt;

pub use dictionary::Dict;
pub use primitive::{Indirect, IntoObj, Value};
pub use store::ObjectStore;
pub use stream::{StreamData, StreamFlags};

/// Maximum number of hops followed by `dereference` before giving up.
pub const MAX_DEREF_DEPTH: usize = 30;

/// Bound on array/dictionary nesting accepted by the parser and importer.
pub const MAX_NESTING_DEPTH: usize = 1000;

/// Handle to a value in an [`ObjectStore`].
///
/// The stamp detects use of a handle after its slot has been recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Obj {
    pub(crate) index: u32,
    pub(crate) stamp: u32,
}

/// Identifies a document opened for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocId(pub(crate) u32);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

bitflags::bitflags! {
    /// Per-object output flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u8 {
        /// Never pack this object into an object stream.
        const NO_OBJSTM = 1 << 0;
        /// Never run this object through the encryption hook.
        ///
        /// Implies `NO_OBJSTM` when the document is encrypted.
        const NO_ENCRYPT = 1 << 1;
    }
}

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Boolean,
    Number,
    String,
    Name,
    Array,
    Dict,
    Stream,
    Indirect,
    Undefined,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Null => "null",
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Name => "name",
            Kind::Array => "array",
            Kind::Dict => "dictionary",
            Kind::Stream => "stream",
            Kind::Indirect => "indirect reference",
            Kind::Undefined => "undefined",
        };
        f.write_str(name)
    }
}
