use crate::error::{PdfError, Result};
use crate::objects::{Dict, Kind, Obj, ObjectFlags, StreamData, Value};

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) value: Value,
    pub(crate) label: u32,
    pub(crate) generation: u16,
    pub(crate) refcount: u32,
    pub(crate) flags: ObjectFlags,
}

#[derive(Debug)]
struct Slot {
    stamp: u32,
    node: Option<Node>,
}

/// Arena holding every live value of a context.
///
/// The store only tracks ownership counts; deciding what happens when a count
/// reaches zero (writing the value out, cascading into children) is the job of
/// [`PdfContext`](crate::PdfContext).
#[derive(Debug)]
pub struct ObjectStore {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    live: usize,
    next_label: u32,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            live: 0,
            next_label: 1,
        }
    }

    /// Allocates a value with one owner.
    pub fn insert(&mut self, value: Value) -> Obj {
        let flags = if matches!(value, Value::Stream(_)) {
            ObjectFlags::NO_OBJSTM
        } else {
            ObjectFlags::empty()
        };
        let node = Node {
            value,
            label: 0,
            generation: 0,
            refcount: 1,
            flags,
        };
        self.live += 1;

        match self.vacant.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                Obj {
                    index,
                    stamp: slot.stamp,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    stamp: 0,
                    node: Some(node),
                });
                Obj { index, stamp: 0 }
            }
        }
    }

    pub(crate) fn node(&self, obj: Obj) -> Result<&Node> {
        self.slots
            .get(obj.index as usize)
            .filter(|slot| slot.stamp == obj.stamp)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(PdfError::InvalidHandle)
    }

    pub(crate) fn node_mut(&mut self, obj: Obj) -> Result<&mut Node> {
        self.slots
            .get_mut(obj.index as usize)
            .filter(|slot| slot.stamp == obj.stamp)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(PdfError::InvalidHandle)
    }

    /// Frees the slot and hands back the node so the caller can release its
    /// children.
    pub(crate) fn remove(&mut self, obj: Obj) -> Result<Node> {
        let slot = self
            .slots
            .get_mut(obj.index as usize)
            .filter(|slot| slot.stamp == obj.stamp)
            .ok_or(PdfError::InvalidHandle)?;
        let node = slot.node.take().ok_or(PdfError::InvalidHandle)?;
        slot.stamp = slot.stamp.wrapping_add(1);
        self.vacant.push(obj.index);
        self.live -= 1;
        Ok(node)
    }

    pub fn is_alive(&self, obj: Obj) -> bool {
        self.node(obj).is_ok()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn value(&self, obj: Obj) -> Result<&Value> {
        Ok(&self.node(obj)?.value)
    }

    pub(crate) fn value_mut(&mut self, obj: Obj) -> Result<&mut Value> {
        Ok(&mut self.node_mut(obj)?.value)
    }

    pub fn kind(&self, obj: Obj) -> Result<Kind> {
        Ok(self.value(obj)?.kind())
    }

    pub fn label(&self, obj: Obj) -> Result<u32> {
        Ok(self.node(obj)?.label)
    }

    pub fn generation(&self, obj: Obj) -> Result<u16> {
        Ok(self.node(obj)?.generation)
    }

    pub fn flags(&self, obj: Obj) -> Result<ObjectFlags> {
        Ok(self.node(obj)?.flags)
    }

    pub fn refcount(&self, obj: Obj) -> Result<u32> {
        Ok(self.node(obj)?.refcount)
    }

    pub(crate) fn add_flags(&mut self, obj: Obj, flags: ObjectFlags) -> Result<()> {
        self.node_mut(obj)?.flags |= flags;
        Ok(())
    }

    /// Number that the next labeled object will receive.
    pub fn next_label(&self) -> u32 {
        self.next_label
    }

    pub(crate) fn reset_labels(&mut self) {
        self.next_label = 1;
    }

    /// Gives `obj` the next object number unless it already has one.
    pub(crate) fn assign_label(&mut self, obj: Obj) -> Result<u32> {
        let next = self.next_label;
        let node = self.node_mut(obj)?;
        if node.label == 0 {
            node.label = next;
            node.generation = 0;
            self.next_label += 1;
        }
        Ok(self.node(obj)?.label)
    }

    pub(crate) fn set_label(&mut self, obj: Obj, label: u32, generation: u16) -> Result<()> {
        let node = self.node_mut(obj)?;
        node.label = label;
        node.generation = generation;
        Ok(())
    }

    pub(crate) fn increment(&mut self, obj: Obj) -> Result<()> {
        let node = self.node_mut(obj)?;
        if node.refcount == 0 {
            return Err(PdfError::InvalidHandle);
        }
        node.refcount += 1;
        Ok(())
    }

    /// Drops one owner and returns the remaining count.
    pub(crate) fn decrement(&mut self, obj: Obj) -> Result<u32> {
        let node = self.node_mut(obj)?;
        if node.refcount == 0 {
            return Err(PdfError::InvalidHandle);
        }
        node.refcount -= 1;
        Ok(node.refcount)
    }

    /// Drops one owner without notifying an output session, cascading into
    /// children that reach zero.
    ///
    /// Only for values the reader built and never handed out; anything that
    /// might carry a label goes through `PdfContext::release`.
    pub(crate) fn discard(&mut self, obj: Obj) {
        let mut pending = vec![obj];
        while let Some(obj) = pending.pop() {
            match self.decrement(obj) {
                Ok(0) => {}
                Ok(_) => continue,
                Err(_) => {
                    tracing::debug!("discarding stale object handle");
                    continue;
                }
            }
            if let Ok(node) = self.remove(obj) {
                if node.label != 0 {
                    tracing::warn!(
                        obj_num = node.label,
                        "Labeled object discarded without being written"
                    );
                }
                pending.extend(node.value.children());
            }
        }
    }

    fn mismatch(expected: Kind, found: &Value) -> PdfError {
        PdfError::TypeMismatch {
            expected,
            found: found.kind(),
        }
    }

    pub fn boolean(&self, obj: Obj) -> Result<bool> {
        match self.value(obj)? {
            Value::Boolean(b) => Ok(*b),
            other => Err(Self::mismatch(Kind::Boolean, other)),
        }
    }

    pub fn number(&self, obj: Obj) -> Result<f64> {
        match self.value(obj)? {
            Value::Number(n) => Ok(*n),
            other => Err(Self::mismatch(Kind::Number, other)),
        }
    }

    pub fn string(&self, obj: Obj) -> Result<&[u8]> {
        match self.value(obj)? {
            Value::String(s) => Ok(s),
            other => Err(Self::mismatch(Kind::String, other)),
        }
    }

    pub fn name(&self, obj: Obj) -> Result<&[u8]> {
        match self.value(obj)? {
            Value::Name(n) => Ok(n),
            other => Err(Self::mismatch(Kind::Name, other)),
        }
    }

    pub fn array(&self, obj: Obj) -> Result<&[Obj]> {
        match self.value(obj)? {
            Value::Array(items) => Ok(items),
            other => Err(Self::mismatch(Kind::Array, other)),
        }
    }

    pub(crate) fn array_mut(&mut self, obj: Obj) -> Result<&mut Vec<Obj>> {
        match self.value_mut(obj)? {
            Value::Array(items) => Ok(items),
            other => Err(Self::mismatch(Kind::Array, other)),
        }
    }

    pub fn dict(&self, obj: Obj) -> Result<&Dict> {
        match self.value(obj)? {
            Value::Dict(dict) => Ok(dict),
            other => Err(Self::mismatch(Kind::Dict, other)),
        }
    }

    pub(crate) fn dict_mut(&mut self, obj: Obj) -> Result<&mut Dict> {
        match self.value_mut(obj)? {
            Value::Dict(dict) => Ok(dict),
            other => Err(Self::mismatch(Kind::Dict, other)),
        }
    }

    pub fn stream(&self, obj: Obj) -> Result<&StreamData> {
        match self.value(obj)? {
            Value::Stream(stream) => Ok(stream),
            other => Err(Self::mismatch(Kind::Stream, other)),
        }
    }

    pub(crate) fn stream_mut(&mut self, obj: Obj) -> Result<&mut StreamData> {
        match self.value_mut(obj)? {
            Value::Stream(stream) => Ok(stream),
            other => Err(Self::mismatch(Kind::Stream, other)),
        }
    }

    /// Looks `key` up in a dictionary, or in a stream's dictionary.
    pub fn lookup(&self, obj: Obj, key: &[u8]) -> Result<Option<Obj>> {
        match self.value(obj)? {
            Value::Dict(dict) => Ok(dict.get(key)),
            Value::Stream(stream) => Ok(self.dict(stream.dict)?.get(key)),
            other => Err(Self::mismatch(Kind::Dict, other)),
        }
    }

    /// Number stored directly under `key`, if any.
    pub(crate) fn lookup_number(&self, dict: Obj, key: &[u8]) -> Result<Option<f64>> {
        Ok(match self.lookup(dict, key)? {
            Some(value) => self.value(value)?.as_number(),
            None => None,
        })
    }

    /// Name stored directly under `key`, if any.
    pub(crate) fn lookup_name(&self, dict: Obj, key: &[u8]) -> Result<Option<&[u8]>> {
        Ok(match self.lookup(dict, key)? {
            Some(value) => self.value(value)?.as_name(),
            None => None,
        })
    }
}
