//! Copying object graphs from opened documents into the output
//!
//! Every foreign object is imported at most once per document. The first
//! time a reference to it is met, a labeled placeholder is reserved and the
//! copy of its body is queued; later references, including ones inside
//! that body, point at the placeholder. Bodies are copied from an explicit
//! queue, so only direct nesting adds to the depth.

use crate::context::PdfContext;
use crate::error::{PdfError, Result};
use crate::objects::{DocId, Indirect, Obj, StreamFlags, Value, MAX_NESTING_DEPTH};
use std::io::Write;
use tracing::{debug, warn};

/// Memo entry of an imported object: the local reference it was given
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImportState {
    /// Body queued or being copied
    InProgress(Obj),
    Done(Obj),
}

impl ImportState {
    pub(crate) fn reference(self) -> Obj {
        match self {
            ImportState::InProgress(reference) | ImportState::Done(reference) => reference,
        }
    }
}

/// A foreign object whose body still has to be copied
struct PendingImport {
    doc: DocId,
    num: u32,
    source: Obj,
    placeholder: Obj,
}

enum Shape {
    Foreign(DocId, u32, u16),
    Array(Vec<Obj>),
    Dict(Vec<(Vec<u8>, Obj)>),
    Stream(Obj, Vec<u8>),
    Shared,
}

impl<W: Write> PdfContext<W> {
    /// Copies `obj` into the output, remapping foreign references to local
    /// ones.
    ///
    /// Returns a new owner of the copy, or `None` when part of the graph
    /// could not be read. Objects reached through references are written
    /// as soon as their copy is complete, so a session must be open.
    pub fn import_object(&mut self, obj: Obj) -> Result<Option<Obj>> {
        self.writer()?;
        let mut pending = Vec::new();

        let copied = match self.copy_value(obj, 0, &mut pending) {
            Ok(copied) => copied,
            Err(e) => {
                self.abandon_pending(&mut pending)?;
                return Err(e);
            }
        };
        let complete = match self.finish_pending(&mut pending) {
            Ok(complete) => complete,
            Err(e) => {
                if let Some(copied) = copied {
                    self.release(copied)?;
                }
                self.abandon_pending(&mut pending)?;
                return Err(e);
            }
        };

        match copied {
            Some(copied) if complete => Ok(Some(copied)),
            Some(copied) => {
                self.release(copied)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn copy_value(
        &mut self,
        obj: Obj,
        depth: usize,
        pending: &mut Vec<PendingImport>,
    ) -> Result<Option<Obj>> {
        if depth > MAX_NESTING_DEPTH {
            return Err(PdfError::InvalidStructure(format!(
                "nesting deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }

        let shape = match self.objects.value(obj)? {
            Value::Indirect(Indirect::Foreign {
                doc,
                label,
                generation,
            }) => Shape::Foreign(*doc, *label, *generation),
            Value::Array(items) => Shape::Array(items.clone()),
            Value::Dict(dict) => Shape::Dict(dict.iter().map(|(k, v)| (k.to_vec(), v)).collect()),
            Value::Stream(stream) => Shape::Stream(stream.dict(), stream.data().to_vec()),
            _ => Shape::Shared,
        };

        match shape {
            Shape::Foreign(doc, num, generation) => self.import_reference(doc, num, generation, pending),
            Shape::Array(items) => {
                let array = self.new_array();
                for item in items {
                    match self.copy_value(item, depth + 1, pending) {
                        Ok(Some(copy)) => self.array_push(array, copy)?,
                        Ok(None) => {
                            self.release(array)?;
                            return Ok(None);
                        }
                        Err(e) => {
                            self.release(array)?;
                            return Err(e);
                        }
                    }
                }
                Ok(Some(array))
            }
            Shape::Dict(entries) => {
                let dict = self.new_dict();
                for (key, value) in entries {
                    match self.copy_value(value, depth + 1, pending) {
                        Ok(Some(copy)) => self.dict_set(dict, key, copy)?,
                        Ok(None) => {
                            self.release(dict)?;
                            return Ok(None);
                        }
                        Err(e) => {
                            self.release(dict)?;
                            return Err(e);
                        }
                    }
                }
                Ok(Some(dict))
            }
            Shape::Stream(source_dict, data) => {
                // The body is kept as stored, filters included
                let Some(dict) = self.copy_value(source_dict, depth + 1, pending)? else {
                    return Ok(None);
                };
                let stream = self.new_stream(StreamFlags::empty());
                let stream_dict = self.stream_dict(stream)?;
                let merged = self.dict_merge(stream_dict, dict);
                self.release(dict)?;
                if let Err(e) = merged {
                    self.release(stream)?;
                    return Err(e);
                }
                self.add_stream(stream, data)?;
                Ok(Some(stream))
            }
            Shape::Shared => self.link(obj).map(Some),
        }
    }

    /// Local reference standing for object `num` of `doc`.
    fn import_reference(
        &mut self,
        doc: DocId,
        num: u32,
        generation: u16,
        pending: &mut Vec<PendingImport>,
    ) -> Result<Option<Obj>> {
        let file = self.documents.get_mut(doc)?;
        if !file.check_label(num, generation) {
            warn!(document = %file.ident(), obj_num = num, generation, "Can't resolve object");
            return Ok(Some(self.new_null()));
        }
        if let Some(state) = file.import_state(num) {
            return self.link(state.reference()).map(Some);
        }

        let Some(source) = file.get_object(&mut self.objects, num, generation)? else {
            let file = self.documents.get(doc)?;
            warn!(document = %file.ident(), obj_num = num, generation, "Could not read object");
            return Ok(None);
        };

        let placeholder = self.new_undefined();
        let reference = self.make_reference(placeholder)?;
        debug!(obj_num = num, label = self.objects.label(placeholder)?, "Importing object");
        self.documents
            .get_mut(doc)?
            .set_import_state(num, Some(ImportState::InProgress(reference)));
        pending.push(PendingImport {
            doc,
            num,
            source,
            placeholder,
        });
        self.link(reference).map(Some)
    }

    /// Copies queued bodies until none are left. Returns whether every
    /// body could be read; unreadable ones are written as null.
    fn finish_pending(&mut self, pending: &mut Vec<PendingImport>) -> Result<bool> {
        let mut complete = true;
        while let Some(job) = pending.pop() {
            let body = match self.copy_value(job.source, 0, pending) {
                Ok(Some(body)) => body,
                Ok(None) => {
                    complete = false;
                    self.new_null()
                }
                Err(e) => {
                    let null = self.new_null();
                    self.settle(job, null)?;
                    return Err(e);
                }
            };
            self.settle(job, body)?;
        }
        Ok(complete)
    }

    /// Fills the remaining placeholders with null.
    fn abandon_pending(&mut self, pending: &mut Vec<PendingImport>) -> Result<()> {
        while let Some(job) = pending.pop() {
            let null = self.new_null();
            self.settle(job, null)?;
        }
        Ok(())
    }

    /// Moves `body` into the job's placeholder and lets go of it, which
    /// writes it out.
    fn settle(&mut self, job: PendingImport, body: Obj) -> Result<()> {
        self.replace_value(job.placeholder, body)?;
        let file = self.documents.get_mut(job.doc)?;
        if let Some(state) = file.import_state(job.num) {
            file.set_import_state(job.num, Some(ImportState::Done(state.reference())));
        }
        self.release(job.placeholder)?;
        self.release(job.source)
    }
}
