//! The session value every operation goes through
//!
//! A [`PdfContext`] owns the object store, the optional output session and
//! the documents opened for reading. Releasing the last owner of a labeled
//! value while a session is open writes that value out.

use crate::compression::decompress;
use crate::error::{PdfError, Result};
use crate::objects::{
    Dict, DocId, Indirect, IntoObj, Kind, Obj, ObjectFlags, ObjectStore, StreamData, StreamFlags,
    Value, MAX_DEREF_DEPTH,
};
use crate::parser::filters;
use crate::parser::registry::DocumentRegistry;
use crate::writer::{EncryptionHook, PdfWriter, WriterConfig};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, error};

/// Reads object `label`/`generation` of a document, handing out a new owner.
pub(crate) type Fetch<'f> = &'f mut dyn FnMut(&mut ObjectStore, DocId, u32, u16) -> Result<Option<Obj>>;

enum Step {
    Local(Obj),
    Foreign(DocId, u32, u16),
    Null,
    Done,
}

/// Follows a chain of indirect references from `obj`.
///
/// Returns a new owner of the first non-reference value, or `None` when the
/// chain ends in Null or an unreadable object. Gives up with
/// [`PdfError::ReferenceLoop`] after `MAX_DEREF_DEPTH - 1` hops.
pub(crate) fn follow_references(objects: &mut ObjectStore, obj: Obj, fetch: Fetch<'_>) -> Result<Option<Obj>> {
    objects.increment(obj)?;
    let mut current = obj;
    let mut hops = 0;

    loop {
        let step = match objects.value(current)? {
            Value::Indirect(Indirect::Local { target, .. }) => Step::Local(*target),
            Value::Indirect(Indirect::Foreign {
                doc,
                label,
                generation,
            }) => Step::Foreign(*doc, *label, *generation),
            Value::Null => Step::Null,
            _ => Step::Done,
        };

        let next = match step {
            Step::Done => return Ok(Some(current)),
            Step::Null => {
                objects.discard(current);
                return Ok(None);
            }
            _ if hops + 1 >= MAX_DEREF_DEPTH => {
                objects.discard(current);
                error!("Loop in object hierarchy detected. Broken PDF file?");
                return Err(PdfError::ReferenceLoop);
            }
            Step::Local(target) => {
                if objects.increment(target).is_err() {
                    objects.discard(current);
                    return Err(PdfError::UndefinedReference);
                }
                Some(target)
            }
            Step::Foreign(doc, label, generation) => match fetch(objects, doc, label, generation) {
                Ok(next) => next,
                Err(e) => {
                    objects.discard(current);
                    return Err(e);
                }
            },
        };

        objects.discard(current);
        match next {
            Some(next) => current = next,
            None => return Ok(None),
        }
        hops += 1;
    }
}

/// Resolver over the documents of a context, for the filter pipeline.
fn resolver(
    documents: &mut DocumentRegistry,
) -> impl FnMut(&mut ObjectStore, Obj) -> Result<Option<Obj>> + '_ {
    move |objects: &mut ObjectStore, obj: Obj| {
        follow_references(
            objects,
            obj,
            &mut |objects: &mut ObjectStore, doc: DocId, label: u32, generation: u16| {
                documents.get_mut(doc)?.get_object(objects, label, generation)
            },
        )
    }
}

/// Object store, output session and input documents.
///
/// Every handle returned by a factory, by [`link`](Self::link) or by a
/// reader operation is one owner and must be given back once with
/// [`release`](Self::release). Accessors like [`dict_get`](Self::dict_get)
/// return borrowed handles that must not be released.
pub struct PdfContext<W: Write = Vec<u8>> {
    pub(crate) objects: ObjectStore,
    pub(crate) writer: Option<PdfWriter<W>>,
    pub(crate) documents: DocumentRegistry,
}

impl<W: Write> Default for PdfContext<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> PdfContext<W> {
    pub fn new() -> Self {
        Self {
            objects: ObjectStore::new(),
            writer: None,
            documents: DocumentRegistry::new(),
        }
    }

    /// Read access to the arena
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Number of live values, for leak diagnostics
    pub fn live_objects(&self) -> usize {
        self.objects.live_count()
    }

    // Factories

    pub fn new_value(&mut self, value: impl Into<Value>) -> Obj {
        self.objects.insert(value.into())
    }

    pub fn new_null(&mut self) -> Obj {
        self.objects.insert(Value::Null)
    }

    pub fn new_boolean(&mut self, value: bool) -> Obj {
        self.objects.insert(Value::Boolean(value))
    }

    pub fn new_number(&mut self, value: f64) -> Obj {
        self.objects.insert(Value::Number(value))
    }

    pub fn new_string(&mut self, bytes: impl AsRef<[u8]>) -> Obj {
        self.objects.insert(Value::string(bytes))
    }

    pub fn new_name(&mut self, name: impl AsRef<[u8]>) -> Obj {
        self.objects.insert(Value::name(name))
    }

    pub fn new_array(&mut self) -> Obj {
        self.objects.insert(Value::Array(Vec::new()))
    }

    pub fn new_dict(&mut self) -> Obj {
        self.objects.insert(Value::Dict(Dict::new()))
    }

    /// Empty stream; `StreamFlags::COMPRESS` deflates it when written.
    pub fn new_stream(&mut self, flags: StreamFlags) -> Obj {
        let dict = self.new_dict();
        self.objects
            .insert(Value::Stream(StreamData::new(dict, flags)))
    }

    /// Placeholder to be filled with [`replace_value`](Self::replace_value).
    pub fn new_undefined(&mut self) -> Obj {
        self.objects.insert(Value::Undefined)
    }

    // Ownership

    /// Adds an owner to `obj`.
    pub fn link(&mut self, obj: Obj) -> Result<Obj> {
        self.objects.increment(obj)?;
        Ok(obj)
    }

    /// Gives back one owner of `obj`.
    ///
    /// At zero a labeled value is written to the open session, then its
    /// children are released in turn.
    pub fn release(&mut self, obj: Obj) -> Result<()> {
        let mut pending = vec![obj];
        while let Some(obj) = pending.pop() {
            if self.objects.decrement(obj)? > 0 {
                continue;
            }
            let mut container = None;
            if self.objects.label(obj)? != 0 {
                if let Some(writer) = self.writer.as_mut() {
                    container = writer.write_released(&mut self.objects, obj)?;
                }
            }
            let node = self.objects.remove(obj)?;
            pending.extend(node.value.children().into_iter().rev());
            pending.extend(container);
        }
        Ok(())
    }

    /// Reference to `obj`, labeling it on first use.
    ///
    /// Asking for a reference to a reference returns a new owner of that
    /// same reference.
    pub fn make_reference(&mut self, obj: Obj) -> Result<Obj> {
        if let Value::Indirect(_) = self.objects.value(obj)? {
            return self.link(obj);
        }
        self.objects.assign_label(obj)?;
        let node = self.objects.node(obj)?;
        let indirect = Indirect::Local {
            target: obj,
            label: node.label,
            generation: node.generation,
        };
        Ok(self.objects.insert(Value::Indirect(indirect)))
    }

    /// Moves the label of `src` to the unlabeled `dst`.
    pub fn transfer_label(&mut self, dst: Obj, src: Obj) -> Result<()> {
        let dst_label = self.objects.label(dst)?;
        if dst_label != 0 {
            return Err(PdfError::AlreadyLabeled(dst_label));
        }
        let label = self.objects.label(src)?;
        let generation = self.objects.generation(src)?;
        self.objects.set_label(dst, label, generation)?;
        self.objects.set_label(src, 0, 0)
    }

    /// Moves the payload of `src` into `dst`, consuming the `src` handle.
    ///
    /// `dst` keeps its label, owners and references; its old payload is
    /// released.
    pub fn replace_value(&mut self, dst: Obj, src: Obj) -> Result<()> {
        if dst == src {
            return Err(PdfError::InvalidStructure(
                "cannot replace a value with itself".to_string(),
            ));
        }
        self.objects.node(dst)?;
        let src_label = self.objects.label(src)?;
        if src_label != 0 {
            return Err(PdfError::AlreadyLabeled(src_label));
        }

        let value = if self.objects.refcount(src)? == 1 {
            self.objects.remove(src)?.value
        } else {
            let value = self.objects.value(src)?.clone();
            for child in value.children() {
                self.objects.increment(child)?;
            }
            self.objects.decrement(src)?;
            value
        };
        let is_stream = matches!(value, Value::Stream(_));
        let old = std::mem::replace(self.objects.value_mut(dst)?, value);
        if is_stream {
            self.objects.add_flags(dst, ObjectFlags::NO_OBJSTM)?;
        }
        for child in old.children() {
            self.release(child)?;
        }
        Ok(())
    }

    // Inspection

    pub fn kind(&self, obj: Obj) -> Result<Kind> {
        self.objects.kind(obj)
    }

    pub fn label(&self, obj: Obj) -> Result<u32> {
        self.objects.label(obj)
    }

    pub fn generation(&self, obj: Obj) -> Result<u16> {
        self.objects.generation(obj)
    }

    pub fn flags(&self, obj: Obj) -> Result<ObjectFlags> {
        self.objects.flags(obj)
    }

    pub fn add_flags(&mut self, obj: Obj, flags: ObjectFlags) -> Result<()> {
        self.objects.add_flags(obj, flags)
    }

    pub fn boolean_value(&self, obj: Obj) -> Result<bool> {
        self.objects.boolean(obj)
    }

    pub fn number_value(&self, obj: Obj) -> Result<f64> {
        self.objects.number(obj)
    }

    pub fn string_value(&self, obj: Obj) -> Result<&[u8]> {
        self.objects.string(obj)
    }

    pub fn name_value(&self, obj: Obj) -> Result<&[u8]> {
        self.objects.name(obj)
    }

    pub fn set_number(&mut self, obj: Obj, value: f64) -> Result<()> {
        match self.objects.value_mut(obj)? {
            Value::Number(n) => {
                *n = value;
                Ok(())
            }
            other => Err(PdfError::TypeMismatch {
                expected: Kind::Number,
                found: other.kind(),
            }),
        }
    }

    pub fn set_string(&mut self, obj: Obj, bytes: impl AsRef<[u8]>) -> Result<()> {
        match self.objects.value_mut(obj)? {
            Value::String(s) => {
                *s = bytes.as_ref().to_vec();
                Ok(())
            }
            other => Err(PdfError::TypeMismatch {
                expected: Kind::String,
                found: other.kind(),
            }),
        }
    }

    // Dictionaries

    /// Stores `value` under `key`, taking over the caller's owner.
    ///
    /// A replaced value keeps its position and is released.
    pub fn dict_set(&mut self, dict: Obj, key: impl AsRef<[u8]>, value: impl IntoObj) -> Result<()> {
        let value = value.into_obj(&mut self.objects);
        self.objects.node(value)?;
        let old = match self.objects.dict_mut(dict) {
            Ok(entries) => entries.insert(key.as_ref().to_vec(), value),
            Err(e) => {
                self.release(value)?;
                return Err(e);
            }
        };
        if let Some(old) = old {
            self.release(old)?;
        }
        Ok(())
    }

    /// Borrowed value stored under `key`
    pub fn dict_get(&self, dict: Obj, key: impl AsRef<[u8]>) -> Result<Option<Obj>> {
        Ok(self.objects.dict(dict)?.get(key.as_ref()))
    }

    /// Removes `key`, releasing its value.
    pub fn dict_remove(&mut self, dict: Obj, key: impl AsRef<[u8]>) -> Result<()> {
        if let Some(old) = self.objects.dict_mut(dict)?.remove(key.as_ref()) {
            self.release(old)?;
        }
        Ok(())
    }

    pub fn dict_contains(&self, dict: Obj, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.objects.dict(dict)?.contains_key(key.as_ref()))
    }

    /// New array holding the keys as names.
    pub fn dict_keys(&mut self, dict: Obj) -> Result<Obj> {
        let keys: Vec<Vec<u8>> = self.objects.dict(dict)?.keys().map(<[u8]>::to_vec).collect();
        let names = keys
            .into_iter()
            .map(|key| self.objects.insert(Value::Name(key)))
            .collect();
        Ok(self.objects.insert(Value::Array(names)))
    }

    /// Snapshot of the entries with borrowed values.
    pub fn dict_entries(&self, dict: Obj) -> Result<Vec<(Vec<u8>, Obj)>> {
        Ok(self
            .objects
            .dict(dict)?
            .iter()
            .map(|(key, value)| (key.to_vec(), value))
            .collect())
    }

    /// Links every entry of `src` into `dst`. `src` is not consumed.
    pub fn dict_merge(&mut self, dst: Obj, src: Obj) -> Result<()> {
        self.objects.dict(dst)?;
        for (key, value) in self.dict_entries(src)? {
            self.objects.increment(value)?;
            self.dict_set(dst, key, value)?;
        }
        Ok(())
    }

    // Arrays

    pub fn array_push(&mut self, array: Obj, value: impl IntoObj) -> Result<()> {
        let value = value.into_obj(&mut self.objects);
        self.objects.node(value)?;
        match self.objects.array_mut(array) {
            Ok(items) => {
                items.push(value);
                Ok(())
            }
            Err(e) => {
                self.release(value)?;
                Err(e)
            }
        }
    }

    pub fn array_unshift(&mut self, array: Obj, value: impl IntoObj) -> Result<()> {
        let value = value.into_obj(&mut self.objects);
        self.objects.node(value)?;
        match self.objects.array_mut(array) {
            Ok(items) => {
                items.insert(0, value);
                Ok(())
            }
            Err(e) => {
                self.release(value)?;
                Err(e)
            }
        }
    }

    /// Borrowed element at `index`; negative indices count from the end.
    pub fn array_get(&self, array: Obj, index: isize) -> Result<Option<Obj>> {
        let items = self.objects.array(array)?;
        let index = if index < 0 {
            items.len().checked_sub(index.unsigned_abs())
        } else {
            Some(index as usize)
        };
        Ok(index.and_then(|index| items.get(index).copied()))
    }

    pub fn array_length(&self, array: Obj) -> Result<usize> {
        Ok(self.objects.array(array)?.len())
    }

    // Streams

    /// Borrowed stream dictionary
    pub fn stream_dict(&self, stream: Obj) -> Result<Obj> {
        Ok(self.objects.stream(stream)?.dict())
    }

    pub fn stream_data(&self, stream: Obj) -> Result<&[u8]> {
        Ok(self.objects.stream(stream)?.data())
    }

    pub fn stream_length(&self, stream: Obj) -> Result<usize> {
        Ok(self.objects.stream(stream)?.len())
    }

    pub fn add_stream(&mut self, stream: Obj, bytes: impl AsRef<[u8]>) -> Result<()> {
        self.objects.stream_mut(stream)?.extend(bytes.as_ref());
        Ok(())
    }

    /// Inflates `compressed` and appends it to the body.
    pub fn add_stream_flate(&mut self, stream: Obj, compressed: &[u8]) -> Result<()> {
        self.objects.stream(stream)?;
        let inflated = decompress(compressed)?;
        self.objects.stream_mut(stream)?.extend(&inflated);
        Ok(())
    }

    /// Appends the decoded body of `src` to `dst`.
    pub fn concat_stream(&mut self, dst: Obj, src: Obj) -> Result<()> {
        self.objects.stream(dst)?;
        let decoded = {
            let mut resolve = resolver(&mut self.documents);
            filters::decode_body(&mut self.objects, src, &mut resolve)?
        };
        self.objects.stream_mut(dst)?.extend(&decoded);
        Ok(())
    }

    /// New stream holding the decoded body of `src`.
    pub fn stream_uncompress(&mut self, src: Obj) -> Result<Obj> {
        let mut resolve = resolver(&mut self.documents);
        filters::uncompressed_copy(&mut self.objects, src, &mut resolve)
    }

    // References

    /// Follows references from `obj` to a value, reading foreign objects
    /// as needed. Returns a new owner, or `None` for Null.
    pub fn dereference(&mut self, obj: Obj) -> Result<Option<Obj>> {
        let mut resolve = resolver(&mut self.documents);
        resolve(&mut self.objects, obj)
    }

    /// Whether two references address the same object.
    pub fn compare_reference(&self, a: Obj, b: Obj) -> Result<bool> {
        let reference = |obj: Obj| match self.objects.value(obj)? {
            Value::Indirect(indirect) => Ok(*indirect),
            other => Err(PdfError::TypeMismatch {
                expected: Kind::Indirect,
                found: other.kind(),
            }),
        };
        Ok(reference(a)?.same_target(&reference(b)?))
    }

    // Output session

    /// Starts writing a PDF to `output`.
    pub fn open_session(&mut self, output: W, config: &WriterConfig) -> Result<()> {
        self.start_session(output, config, None)
    }

    /// Starts writing an encrypted PDF; strings and stream bodies go
    /// through `hook`.
    pub fn open_encrypted_session(
        &mut self,
        output: W,
        config: &WriterConfig,
        hook: Box<dyn EncryptionHook>,
    ) -> Result<()> {
        self.start_session(output, config, Some(hook))
    }

    fn start_session(
        &mut self,
        output: W,
        config: &WriterConfig,
        hook: Option<Box<dyn EncryptionHook>>,
    ) -> Result<()> {
        if self.writer.is_some() {
            return Err(PdfError::SessionAlreadyOpen);
        }
        self.writer = Some(PdfWriter::open(output, config, hook, &mut self.objects)?);
        Ok(())
    }

    pub(crate) fn writer(&self) -> Result<&PdfWriter<W>> {
        self.writer.as_ref().ok_or(PdfError::NoSession)
    }

    /// Flushes the pending object stream, writes the cross-reference
    /// section and trailer, and hands the output back.
    pub fn close_session(&mut self) -> Result<W> {
        let writer = self.writer.as_mut().ok_or(PdfError::NoSession)?;
        if let Some(container) = writer.finish_object_stream(&mut self.objects)? {
            self.release(container)?;
        }
        let writer = self.writer.as_mut().ok_or(PdfError::NoSession)?;
        if let Some(xref_stream) = writer.write_cross_reference(&mut self.objects)? {
            self.release(xref_stream)?;
        }
        let writer = self.writer.take().ok_or(PdfError::NoSession)?;
        writer.finish(&mut self.objects)
    }

    /// Stores a trailer entry pointing at `obj`.
    fn set_trailer_reference(&mut self, key: &'static str, obj: Obj) -> Result<()> {
        if self.writer()?.has_trailer_entry(&self.objects, key)? {
            return Err(PdfError::AlreadySet(key));
        }
        let reference = self.make_reference(obj)?;
        let writer = self.writer.as_mut().ok_or(PdfError::NoSession)?;
        writer.set_trailer_entry(&mut self.objects, key, reference)
    }

    /// Sets the document catalog. The caller keeps its owner of `catalog`.
    pub fn set_root(&mut self, catalog: Obj) -> Result<()> {
        self.set_trailer_reference("Root", catalog)?;
        if self.writer()?.is_encrypting() {
            self.objects.add_flags(catalog, ObjectFlags::NO_OBJSTM)?;
        }
        Ok(())
    }

    /// Sets the document information dictionary.
    pub fn set_info(&mut self, info: Obj) -> Result<()> {
        self.set_trailer_reference("Info", info)
    }

    /// Sets the file identifier array, taking over the caller's owner.
    pub fn set_id(&mut self, id: Obj) -> Result<()> {
        if self.writer()?.has_trailer_entry(&self.objects, "ID")? {
            return Err(PdfError::AlreadySet("ID"));
        }
        let writer = self.writer.as_mut().ok_or(PdfError::NoSession)?;
        writer.set_trailer_entry(&mut self.objects, "ID", id)
    }

    /// Sets the encryption dictionary, which is itself never encrypted.
    pub fn set_encrypt(&mut self, encrypt: Obj) -> Result<()> {
        self.set_trailer_reference("Encrypt", encrypt)?;
        self.objects.add_flags(encrypt, ObjectFlags::NO_ENCRYPT)
    }

    /// PDF minor version of the open session
    pub fn version(&self) -> Result<u8> {
        Ok(self.writer()?.version())
    }

    pub fn compression_saved(&self) -> Result<i64> {
        Ok(self.writer()?.compression_saved())
    }

    pub fn bytes_written(&self) -> Result<u64> {
        Ok(self.writer()?.bytes_written())
    }
}

impl PdfContext<BufWriter<File>> {
    /// Starts a session writing to the file at `path`.
    pub fn create_file_session(&mut self, path: impl AsRef<Path>, config: &WriterConfig) -> Result<()> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Output file created");
        self.open_session(BufWriter::new(file), config)
    }
}

impl<W: Write> Drop for PdfContext<W> {
    fn drop(&mut self) {
        for mut file in self.documents.drain() {
            for obj in file.take_owned() {
                self.objects.discard(obj);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PdfContext {
        PdfContext::new()
    }

    #[test]
    fn test_link_and_release() {
        let mut ctx = context();
        let n = ctx.new_number(1.0);
        ctx.link(n).unwrap();
        ctx.release(n).unwrap();
        assert_eq!(ctx.live_objects(), 1);
        ctx.release(n).unwrap();
        assert_eq!(ctx.live_objects(), 0);
        assert!(matches!(ctx.release(n), Err(PdfError::InvalidHandle)));
    }

    #[test]
    fn test_release_cascades() {
        let mut ctx = context();
        let dict = ctx.new_dict();
        let array = ctx.new_array();
        ctx.array_push(array, Value::from(1)).unwrap();
        ctx.array_push(array, Value::name("X")).unwrap();
        ctx.dict_set(dict, "Kids", array).unwrap();
        ctx.dict_set(dict, "Type", Value::name("Pages")).unwrap();
        assert_eq!(ctx.live_objects(), 5);
        ctx.release(dict).unwrap();
        assert_eq!(ctx.live_objects(), 0);
    }

    #[test]
    fn test_dict_set_replaces_in_place() {
        let mut ctx = context();
        let dict = ctx.new_dict();
        ctx.dict_set(dict, "A", Value::from(1)).unwrap();
        ctx.dict_set(dict, "B", Value::from(2)).unwrap();
        ctx.dict_set(dict, "A", Value::from(3)).unwrap();

        let entries = ctx.dict_entries(dict).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, b"A");
        assert_eq!(ctx.number_value(entries[0].1).unwrap(), 3.0);
        // Old value was released
        assert_eq!(ctx.live_objects(), 3);
    }

    #[test]
    fn test_dict_set_on_non_dict_releases_value() {
        let mut ctx = context();
        let array = ctx.new_array();
        let value = ctx.new_number(1.0);
        assert!(ctx.dict_set(array, "A", value).is_err());
        assert!(!ctx.objects().is_alive(value));
    }

    #[test]
    fn test_dict_remove_keys_and_merge() {
        let mut ctx = context();
        let a = ctx.new_dict();
        ctx.dict_set(a, "X", Value::from(1)).unwrap();
        ctx.dict_set(a, "Y", Value::from(2)).unwrap();
        let b = ctx.new_dict();
        ctx.dict_set(b, "Z", Value::from(3)).unwrap();
        ctx.dict_merge(b, a).unwrap();

        let keys = ctx.dict_keys(b).unwrap();
        let names: Vec<Vec<u8>> = (0..ctx.array_length(keys).unwrap())
            .map(|i| {
                let name = ctx.array_get(keys, i as isize).unwrap().unwrap();
                ctx.name_value(name).unwrap().to_vec()
            })
            .collect();
        assert_eq!(names, vec![b"Z".to_vec(), b"X".to_vec(), b"Y".to_vec()]);

        // Shared value
        let x = ctx.dict_get(a, "X").unwrap().unwrap();
        assert_eq!(ctx.objects().refcount(x).unwrap(), 2);

        ctx.dict_remove(b, "X").unwrap();
        assert!(!ctx.dict_contains(b, "X").unwrap());
        assert_eq!(ctx.objects().refcount(x).unwrap(), 1);

        for obj in [keys, a, b] {
            ctx.release(obj).unwrap();
        }
        assert_eq!(ctx.live_objects(), 0);
    }

    #[test]
    fn test_array_negative_index_and_unshift() {
        let mut ctx = context();
        let array = ctx.new_array();
        ctx.array_push(array, Value::from(2)).unwrap();
        ctx.array_push(array, Value::from(3)).unwrap();
        ctx.array_unshift(array, Value::from(1)).unwrap();

        let last = ctx.array_get(array, -1).unwrap().unwrap();
        assert_eq!(ctx.number_value(last).unwrap(), 3.0);
        let first = ctx.array_get(array, 0).unwrap().unwrap();
        assert_eq!(ctx.number_value(first).unwrap(), 1.0);
        assert!(ctx.array_get(array, 3).unwrap().is_none());
        assert!(ctx.array_get(array, -4).unwrap().is_none());
    }

    #[test]
    fn test_make_reference_reuses_label() {
        let mut ctx = context();
        let page = ctx.new_dict();
        let r1 = ctx.make_reference(page).unwrap();
        let r2 = ctx.make_reference(page).unwrap();
        assert_eq!(ctx.label(page).unwrap(), 1);
        assert!(ctx.compare_reference(r1, r2).unwrap());
        assert_eq!(ctx.objects().next_label(), 2);

        // Reference to a reference links it
        let r3 = ctx.make_reference(r1).unwrap();
        assert_eq!(r3, r1);
        assert_eq!(ctx.objects().refcount(r1).unwrap(), 2);
    }

    #[test]
    fn test_dereference_local_and_null() {
        let mut ctx = context();
        let target = ctx.new_number(7.0);
        let reference = ctx.make_reference(target).unwrap();
        let value = ctx.dereference(reference).unwrap().unwrap();
        assert_eq!(value, target);
        assert_eq!(ctx.objects().refcount(target).unwrap(), 2);
        ctx.release(value).unwrap();

        let null = ctx.new_null();
        let null_ref = ctx.make_reference(null).unwrap();
        assert!(ctx.dereference(null_ref).unwrap().is_none());
        assert!(ctx.dereference(null).unwrap().is_none());
    }

    #[test]
    fn test_dereference_freed_target() {
        let mut ctx = context();
        let target = ctx.new_dict();
        let reference = ctx.make_reference(target).unwrap();
        ctx.release(target).unwrap();
        assert!(matches!(
            ctx.dereference(reference),
            Err(PdfError::UndefinedReference)
        ));
    }

    #[test]
    fn test_transfer_label() {
        let mut ctx = context();
        let a = ctx.new_null();
        let b = ctx.new_null();
        let r = ctx.make_reference(a).unwrap();
        ctx.transfer_label(b, a).unwrap();
        assert_eq!(ctx.label(b).unwrap(), 1);
        assert_eq!(ctx.label(a).unwrap(), 0);
        assert!(matches!(ctx.transfer_label(b, a), Err(PdfError::AlreadyLabeled(1))));
        ctx.release(r).unwrap();
    }

    #[test]
    fn test_replace_value_fills_placeholder() {
        let mut ctx = context();
        let placeholder = ctx.new_undefined();
        let reference = ctx.make_reference(placeholder).unwrap();
        let body = ctx.new_dict();
        ctx.dict_set(body, "K", Value::from(1)).unwrap();
        ctx.replace_value(placeholder, body).unwrap();

        assert!(!ctx.objects().is_alive(body));
        assert_eq!(ctx.kind(placeholder).unwrap(), Kind::Dict);
        assert_eq!(ctx.label(placeholder).unwrap(), 1);
        let resolved = ctx.dereference(reference).unwrap().unwrap();
        assert_eq!(resolved, placeholder);
    }

    #[test]
    fn test_replace_value_with_shared_source() {
        let mut ctx = context();
        let dst = ctx.new_number(1.0);
        let src = ctx.new_array();
        ctx.array_push(src, Value::from(5)).unwrap();
        ctx.link(src).unwrap();
        ctx.replace_value(dst, src).unwrap();

        // src survives with its remaining owner; the child is shared
        let child = ctx.array_get(src, 0).unwrap().unwrap();
        assert_eq!(ctx.objects().refcount(child).unwrap(), 2);
        assert_eq!(ctx.array_get(dst, 0).unwrap(), Some(child));
        ctx.release(src).unwrap();
        ctx.release(dst).unwrap();
        assert_eq!(ctx.live_objects(), 0);
    }

    #[test]
    fn test_replace_value_rejects_labeled_source() {
        let mut ctx = context();
        let dst = ctx.new_null();
        let src = ctx.new_null();
        ctx.make_reference(src).unwrap();
        assert!(matches!(ctx.replace_value(dst, src), Err(PdfError::AlreadyLabeled(1))));
        assert!(ctx.replace_value(dst, dst).is_err());
    }

    #[test]
    fn test_typed_accessors() {
        let mut ctx = context();
        let n = ctx.new_number(1.0);
        ctx.set_number(n, 2.5).unwrap();
        assert_eq!(ctx.number_value(n).unwrap(), 2.5);
        let s = ctx.new_string("abc");
        ctx.set_string(s, "xyz").unwrap();
        assert_eq!(ctx.string_value(s).unwrap(), b"xyz");
        assert!(ctx.set_number(s, 1.0).is_err());
        let b = ctx.new_boolean(true);
        assert!(ctx.boolean_value(b).unwrap());
        assert!(matches!(
            ctx.name_value(b),
            Err(PdfError::TypeMismatch {
                expected: Kind::Name,
                found: Kind::Boolean
            })
        ));
    }

    #[test]
    fn test_stream_operations() {
        let mut ctx = context();
        let stream = ctx.new_stream(StreamFlags::COMPRESS);
        ctx.add_stream(stream, b"hello ").unwrap();
        let compressed = crate::compression::compress(b"world", 6).unwrap();
        ctx.add_stream_flate(stream, &compressed).unwrap();
        assert_eq!(ctx.stream_data(stream).unwrap(), b"hello world");
        assert_eq!(ctx.stream_length(stream).unwrap(), 11);
        assert!(ctx.flags(stream).unwrap().contains(ObjectFlags::NO_OBJSTM));

        let packed = ctx.new_stream(StreamFlags::empty());
        let dict = ctx.stream_dict(packed).unwrap();
        ctx.dict_set(dict, "Filter", Value::name("FlateDecode")).unwrap();
        ctx.add_stream(packed, &compressed).unwrap();

        let copy = ctx.new_stream(StreamFlags::empty());
        ctx.concat_stream(copy, packed).unwrap();
        assert_eq!(ctx.stream_data(copy).unwrap(), b"world");

        let plain = ctx.stream_uncompress(packed).unwrap();
        assert_eq!(ctx.stream_data(plain).unwrap(), b"world");
        let plain_dict = ctx.stream_dict(plain).unwrap();
        assert!(!ctx.dict_contains(plain_dict, "Filter").unwrap());
    }

    #[test]
    fn test_unsupported_filter_is_a_decode_error() {
        let mut ctx = context();
        let stream = ctx.new_stream(StreamFlags::empty());
        let dict = ctx.stream_dict(stream).unwrap();
        ctx.dict_set(dict, "Filter", Value::name("LZWDecode")).unwrap();
        let dst = ctx.new_stream(StreamFlags::empty());
        assert!(matches!(
            ctx.concat_stream(dst, stream),
            Err(PdfError::DecodeError(_))
        ));
    }

    #[test]
    fn test_oversized_predictor_parms_fail_one_stream() {
        let mut ctx = context();
        let compressed = crate::compression::compress(&[0u8; 64], 6).unwrap();
        let dst = ctx.new_stream(StreamFlags::empty());

        for (colors, columns) in [(1e18, 1.0), (1.0, 1e12)] {
            let stream = ctx.new_stream(StreamFlags::empty());
            let dict = ctx.stream_dict(stream).unwrap();
            ctx.dict_set(dict, "Filter", Value::name("FlateDecode")).unwrap();
            let parms = ctx.new_dict();
            ctx.dict_set(parms, "Predictor", Value::from(2)).unwrap();
            ctx.dict_set(parms, "Colors", Value::from(colors)).unwrap();
            ctx.dict_set(parms, "BitsPerComponent", Value::from(16)).unwrap();
            ctx.dict_set(parms, "Columns", Value::from(columns)).unwrap();
            ctx.dict_set(dict, "DecodeParms", parms).unwrap();
            ctx.add_stream(stream, &compressed).unwrap();

            assert!(matches!(
                ctx.concat_stream(dst, stream),
                Err(PdfError::DecodeError(_))
            ));
            ctx.release(stream).unwrap();
        }
        assert_eq!(ctx.stream_length(dst).unwrap(), 0);
    }

    #[test]
    fn test_session_required() {
        let mut ctx = context();
        let catalog = ctx.new_dict();
        assert!(matches!(ctx.set_root(catalog), Err(PdfError::NoSession)));
        assert!(matches!(ctx.close_session(), Err(PdfError::NoSession)));
        assert!(ctx.version().is_err());
    }

    #[test]
    fn test_root_is_single_assignment() {
        let mut ctx = context();
        ctx.open_session(Vec::new(), &WriterConfig::default()).unwrap();
        assert!(matches!(
            ctx.open_session(Vec::new(), &WriterConfig::default()),
            Err(PdfError::SessionAlreadyOpen)
        ));
        let catalog = ctx.new_dict();
        ctx.set_root(catalog).unwrap();
        assert!(matches!(ctx.set_root(catalog), Err(PdfError::AlreadySet("Root"))));
        ctx.release(catalog).unwrap();
        ctx.close_session().unwrap();
    }

    #[test]
    fn test_minimal_classic_document() {
        let mut ctx = context();
        let config = WriterConfig::default().with_version(4).with_compression_level(0);
        ctx.open_session(Vec::new(), &config).unwrap();
        let catalog = ctx.new_dict();
        ctx.dict_set(catalog, "Type", Value::name("Catalog")).unwrap();
        ctx.set_root(catalog).unwrap();
        ctx.release(catalog).unwrap();
        let output = ctx.close_session().unwrap();

        let text = String::from_utf8_lossy(&output).into_owned();
        assert!(text.starts_with("%PDF-1.4\n"));
        assert!(text.contains("1 0 obj\n<</Type/Catalog>>\nendobj\n"));
        assert!(text.contains("trailer\n<</Root 1 0 R/Size 2>>\n"));
        assert!(text.ends_with("%%EOF\n"));
        assert_eq!(ctx.live_objects(), 0);
    }
}
