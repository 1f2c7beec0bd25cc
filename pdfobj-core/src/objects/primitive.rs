use crate::objects::{Dict, DocId, Kind, Obj, ObjectStore, StreamData};
use std::fmt;

/// An indirect reference.
///
/// A local reference points at a value in the current store and does not own
/// it; the referenced value is written out under `label` once released. A
/// foreign reference names an object of a document opened for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indirect {
    Local {
        target: Obj,
        label: u32,
        generation: u16,
    },
    Foreign {
        doc: DocId,
        label: u32,
        generation: u16,
    },
}

impl Indirect {
    pub fn label(&self) -> u32 {
        match self {
            Indirect::Local { label, .. } | Indirect::Foreign { label, .. } => *label,
        }
    }

    pub fn generation(&self) -> u16 {
        match self {
            Indirect::Local { generation, .. } | Indirect::Foreign { generation, .. } => {
                *generation
            }
        }
    }

    pub fn document(&self) -> Option<DocId> {
        match self {
            Indirect::Foreign { doc, .. } => Some(*doc),
            Indirect::Local { .. } => None,
        }
    }

    /// Two references are the same when they address the same object number
    /// and generation in the same document (or both in the output).
    pub fn same_target(&self, other: &Indirect) -> bool {
        self.document() == other.document()
            && self.label() == other.label()
            && self.generation() == other.generation()
    }
}

impl fmt::Display for Indirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.label(), self.generation())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(Vec<u8>),
    /// Name without the leading slash.
    Name(Vec<u8>),
    Array(Vec<Obj>),
    Dict(Dict),
    Stream(StreamData),
    Indirect(Indirect),
    /// Placeholder for an object referenced before it is defined.
    Undefined,
}

impl Value {
    pub fn name(name: impl AsRef<[u8]>) -> Self {
        Value::Name(name.as_ref().to_vec())
    }

    pub fn string(bytes: impl AsRef<[u8]>) -> Self {
        Value::String(bytes.as_ref().to_vec())
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Boolean(_) => Kind::Boolean,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Name(_) => Kind::Name,
            Value::Array(_) => Kind::Array,
            Value::Dict(_) => Kind::Dict,
            Value::Stream(_) => Kind::Stream,
            Value::Indirect(_) => Kind::Indirect,
            Value::Undefined => Kind::Undefined,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&[u8]> {
        match self {
            Value::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Obj]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamData> {
        match self {
            Value::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn as_indirect(&self) -> Option<&Indirect> {
        match self {
            Value::Indirect(indirect) => Some(indirect),
            _ => None,
        }
    }

    /// Handles owned by this value, in output order.
    pub(crate) fn children(&self) -> Vec<Obj> {
        match self {
            Value::Array(items) => items.clone(),
            Value::Dict(dict) => dict.values().collect(),
            Value::Stream(stream) => vec![stream.dict()],
            _ => Vec::new(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Number(i as f64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(i as f64)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Number(i as f64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Number(i as f64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Number(f)
    }
}

impl From<Vec<Obj>> for Value {
    fn from(items: Vec<Obj>) -> Self {
        Value::Array(items)
    }
}

impl From<Dict> for Value {
    fn from(dict: Dict) -> Self {
        Value::Dict(dict)
    }
}

impl From<Indirect> for Value {
    fn from(indirect: Indirect) -> Self {
        Value::Indirect(indirect)
    }
}

/// Anything that can be stored as a child: an existing handle (ownership is
/// transferred) or a fresh value (allocated on the spot).
pub trait IntoObj {
    fn into_obj(self, store: &mut ObjectStore) -> Obj;
}

impl IntoObj for Obj {
    fn into_obj(self, _store: &mut ObjectStore) -> Obj {
        self
    }
}

impl IntoObj for Value {
    fn into_obj(self, store: &mut ObjectStore) -> Obj {
        store.insert(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kinds() {
        assert_eq!(Value::Null.kind(), Kind::Null);
        assert_eq!(Value::from(true).kind(), Kind::Boolean);
        assert_eq!(Value::from(42).kind(), Kind::Number);
        assert_eq!(Value::name("Type").kind(), Kind::Name);
        assert_eq!(Value::string("abc").kind(), Kind::String);
        assert_eq!(Value::Undefined.kind(), Kind::Undefined);
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from(2.5).as_number(), Some(2.5));
        assert_eq!(Value::name("Page").as_name(), Some(&b"Page"[..]));
        assert_eq!(Value::string("x").as_string(), Some(&b"x"[..]));
        assert!(Value::Null.as_number().is_none());
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_indirect_display_and_compare() {
        let a = Indirect::Foreign {
            doc: DocId(1),
            label: 12,
            generation: 0,
        };
        let b = Indirect::Foreign {
            doc: DocId(1),
            label: 12,
            generation: 0,
        };
        let c = Indirect::Foreign {
            doc: DocId(2),
            label: 12,
            generation: 0,
        };
        assert_eq!(a.to_string(), "12 0 R");
        assert!(a.same_target(&b));
        assert!(!a.same_target(&c));
        assert_eq!(a.document(), Some(DocId(1)));
    }
}
