//! High-level PDF reader
//!
//! A [`PdfFile`] holds the cross-reference data of one opened document and
//! materializes its objects lazily. Every object read is cached in its xref
//! slot until the document is closed, so repeated lookups hand out the same
//! value.

use super::filters::uncompressed_copy;
use super::header::require_version;
use super::lexer::Token;
use super::object_stream::ObjStmHeader;
use super::objects::ObjectParser;
use super::registry::ReadSeek;
use super::xref::{self, XRefEntry, XRefTable};
use super::xref_stream::{parse_entries, XRefStreamLayout};
use super::{ParseError, ReaderOptions};
use crate::context::{follow_references, PdfContext};
use crate::error::{PdfError, Result};
use crate::import::ImportState;
use crate::objects::{DocId, Indirect, Obj, ObjectStore, Value};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Bytes at the end of the file searched for `startxref`
const TAIL_LEN: u64 = 1024;

/// An opened PDF document
pub struct PdfFile {
    id: DocId,
    ident: String,
    source: Box<dyn ReadSeek>,
    file_size: u64,
    version: u32,
    xref: XRefTable,
    /// Sorted offsets of in-use objects, used to bound object reads
    offsets: Vec<u64>,
    trailer: Option<Obj>,
    catalog: Option<Obj>,
    /// Object streams currently being decoded
    loading: Vec<u32>,
}

impl fmt::Debug for PdfFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfFile")
            .field("id", &self.id)
            .field("ident", &self.ident)
            .field("file_size", &self.file_size)
            .field("version", &self.version)
            .field("objects", &self.xref.len())
            .finish()
    }
}

fn parse_catalog_version(name: &[u8]) -> Option<u32> {
    let digits = name.strip_prefix(b"1.")?;
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

impl PdfFile {
    /// Reads the header, the cross-reference chain and the catalog.
    pub(crate) fn open(
        id: DocId,
        ident: &str,
        mut source: Box<dyn ReadSeek>,
        objects: &mut ObjectStore,
        options: &ReaderOptions,
    ) -> Result<Self> {
        let version = require_version(&mut source, options.max_version).map_err(|e| {
            warn!(document = ident, "Not a PDF 1.[1-{}] file.", options.max_version);
            e
        })?;
        let file_size = source.seek(SeekFrom::End(0))?;

        let mut file = PdfFile {
            id,
            ident: ident.to_string(),
            source,
            file_size,
            version,
            xref: XRefTable::new(),
            offsets: Vec::new(),
            trailer: None,
            catalog: None,
            loading: Vec::new(),
        };
        match file.load(objects, options) {
            Ok(()) => {
                debug!(
                    document = ident,
                    version = file.version,
                    objects = file.xref.len(),
                    "Document opened"
                );
                Ok(file)
            }
            Err(e) => {
                for obj in file.take_owned() {
                    objects.discard(obj);
                }
                Err(e)
            }
        }
    }

    fn load(&mut self, objects: &mut ObjectStore, options: &ReaderOptions) -> Result<()> {
        let trailer = self.read_xref(objects, options)?;
        self.trailer = Some(trailer);
        self.offsets = self.in_use_offsets();

        if objects.lookup(trailer, b"Encrypt")?.is_some() {
            warn!(document = %self.ident, "PDF document is encrypted.");
            return Err(ParseError::EncryptedDocument.into());
        }

        let catalog = match objects.lookup(trailer, b"Root")? {
            Some(root) => self.resolve(objects, root)?,
            None => None,
        };
        let catalog = match catalog {
            Some(catalog) if objects.dict(catalog).is_ok() => catalog,
            other => {
                if let Some(other) = other {
                    objects.discard(other);
                }
                warn!(document = %self.ident, "Cannot read PDF document catalog. Broken PDF file?");
                return Err(ParseError::InvalidTrailer("document catalog is not a dictionary".to_string()).into());
            }
        };
        self.catalog = Some(catalog);

        if let Some(version) = objects.lookup(catalog, b"Version")? {
            if let Some(resolved) = self.resolve(objects, version)? {
                let minor = objects.name(resolved).ok().and_then(parse_catalog_version);
                objects.discard(resolved);
                match minor {
                    Some(minor) => self.version = self.version.max(minor),
                    None => {
                        warn!(document = %self.ident, "Illegal Version entry in document catalog. Broken PDF file?");
                        return Err(PdfError::InvalidStructure(
                            "illegal Version entry in document catalog".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn id(&self) -> DocId {
        self.id
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// PDF minor version, raised by the catalog's `/Version`
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn xref(&self) -> &XRefTable {
        &self.xref
    }

    pub(crate) fn trailer(&self) -> Option<Obj> {
        self.trailer
    }

    pub(crate) fn catalog(&self) -> Option<Obj> {
        self.catalog
    }

    fn read_range(&mut self, start: u64, end: u64) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; end.saturating_sub(start) as usize];
        self.source.seek(SeekFrom::Start(start))?;
        self.source.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn in_use_offsets(&self) -> Vec<u64> {
        let mut offsets: Vec<u64> = (0..self.xref.len() as u32)
            .filter_map(|num| match self.xref.entry(num) {
                Some(XRefEntry::InUse { offset, .. }) => Some(offset),
                _ => None,
            })
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        offsets
    }

    /// Where the object starting at `offset` must end: the next object's
    /// offset, or the end of the file.
    fn object_limit(&self, offset: u64) -> u64 {
        if self.offsets.is_empty() {
            return self
                .in_use_offsets()
                .into_iter()
                .find(|&next| next > offset)
                .unwrap_or(self.file_size);
        }
        let index = self.offsets.partition_point(|&next| next <= offset);
        self.offsets.get(index).copied().unwrap_or(self.file_size)
    }

    fn read_xref(&mut self, objects: &mut ObjectStore, options: &ReaderOptions) -> Result<Obj> {
        let tail_start = self.file_size.saturating_sub(TAIL_LEN);
        let tail = self.read_range(tail_start, self.file_size)?;
        let start = xref::find_startxref(&tail, options.max_startxref_tries)?;

        let mut main_trailer = None;
        if let Err(e) = self.read_xref_chain(objects, start, &mut main_trailer) {
            if let Some(trailer) = main_trailer {
                objects.discard(trailer);
            }
            warn!(document = %self.ident, error = %e, "Error while parsing PDF file.");
            return Err(e);
        }
        main_trailer.ok_or_else(|| ParseError::InvalidTrailer("No trailer.".to_string()).into())
    }

    fn read_xref_chain(
        &mut self,
        objects: &mut ObjectStore,
        start: u64,
        main_trailer: &mut Option<Obj>,
    ) -> Result<()> {
        let mut visited = HashSet::new();
        let mut next = Some(start);
        while let Some(xref_pos) = next {
            if !visited.insert(xref_pos) {
                warn!(document = %self.ident, offset = xref_pos, "Loop in xref Prev chain.");
                break;
            }
            let trailer = self.read_xref_section(objects, xref_pos)?;
            if main_trailer.is_none() {
                objects.increment(trailer)?;
                *main_trailer = Some(trailer);
            }

            let prev = match objects.lookup(trailer, b"Prev") {
                Ok(None) => Ok(None),
                Ok(Some(prev)) => match objects.number(prev) {
                    Ok(prev) if prev >= 0.0 => Ok(Some(prev as u64)),
                    _ => Err(ParseError::InvalidTrailer("Prev is not a number".to_string()).into()),
                },
                Err(e) => Err(e),
            };
            objects.discard(trailer);
            next = prev?.filter(|&prev| prev != 0);
        }
        Ok(())
    }

    /// Reads one xref table or stream and returns its trailer dictionary.
    fn read_xref_section(&mut self, objects: &mut ObjectStore, xref_pos: u64) -> Result<Obj> {
        if xref_pos >= self.file_size {
            return Err(ParseError::InvalidXRef(format!("xref offset {xref_pos} beyond end of file")).into());
        }
        let data = self.read_range(xref_pos, self.file_size)?;
        let Some(trailer_pos) = xref::parse_xref_table(&data, self.file_size, &mut self.xref)? else {
            return self.read_xref_stream(objects, xref_pos);
        };

        let trailer = ObjectParser::new(&data[trailer_pos..], objects, self.id).parse_object()?;
        if objects.dict(trailer).is_err() {
            objects.discard(trailer);
            return Err(ParseError::InvalidTrailer("No trailer.".to_string()).into());
        }

        // Hybrid file: the table is supplemented by an xref stream
        if let Some(xref_stm) = objects.lookup(trailer, b"XRefStm")? {
            let offset = objects.number(xref_stm).ok().filter(|n| *n >= 0.0);
            let read = match offset {
                Some(offset) => self.read_xref_stream(objects, offset as u64).map(|stream_trailer| {
                    objects.discard(stream_trailer);
                }),
                None => Err(ParseError::InvalidXRef("XRefStm is not a number".to_string()).into()),
            };
            if read.is_err() {
                warn!(document = %self.ident, "Skipping hybrid reference section.");
            }
        }
        Ok(trailer)
    }

    fn read_xref_stream(&mut self, objects: &mut ObjectStore, xref_pos: u64) -> Result<Obj> {
        let result = self.read_xref_stream_entries(objects, xref_pos);
        if result.is_err() {
            warn!(document = %self.ident, offset = xref_pos, "Cannot parse cross-reference stream.");
        }
        result
    }

    fn read_xref_stream_entries(&mut self, objects: &mut ObjectStore, xref_pos: u64) -> Result<Obj> {
        let raw = self
            .read_object(objects, None, xref_pos, self.file_size)?
            .ok_or_else(|| ParseError::InvalidXRef("no object at xref stream offset".to_string()))?;
        if objects.stream(raw).is_err() {
            objects.discard(raw);
            return Err(ParseError::InvalidXRef("xref stream is not a stream".to_string()).into());
        }

        let decoded = {
            let mut resolve = |objects: &mut ObjectStore, obj: Obj| self.resolve(objects, obj);
            uncompressed_copy(objects, raw, &mut resolve)
        };
        objects.discard(raw);
        let decoded = decoded?;

        let dict = objects.stream(decoded)?.dict();
        let parsed = XRefStreamLayout::from_dict(objects, dict).and_then(|layout| {
            let data = objects
                .stream(decoded)
                .map_err(|_| ParseError::InvalidXRef("xref stream vanished".to_string()))?
                .data();
            parse_entries(data, &layout, &mut self.xref, self.file_size)
        });
        match parsed {
            Ok(()) => {
                objects.increment(dict)?;
                objects.discard(decoded);
                Ok(dict)
            }
            Err(e) => {
                objects.discard(decoded);
                Err(e.into())
            }
        }
    }

    /// Parses `n g obj ... endobj` from `[offset, limit)`.
    ///
    /// Returns `None` when the data there is not the expected object.
    fn read_object(
        &mut self,
        objects: &mut ObjectStore,
        expected: Option<(u32, u16)>,
        offset: u64,
        limit: u64,
    ) -> Result<Option<Obj>> {
        if limit <= offset || offset >= self.file_size {
            return Ok(None);
        }
        let data = self.read_range(offset, limit.min(self.file_size))?;
        let mut parser = ObjectParser::new(&data, objects, self.id);

        let (Some(num), Some(generation)) = (parser.read_unsigned(), parser.read_unsigned()) else {
            return Ok(None);
        };
        if let Some((expected_num, expected_gen)) = expected {
            if expected_num != 0 && (num != expected_num as u64 || generation != expected_gen as u64) {
                return Ok(None);
            }
        }
        if !matches!(parser.lexer().next_token(), Ok(Token::Obj)) {
            warn!(document = %self.ident, obj_num = num, "Didn't find \"obj\".");
            return Ok(None);
        }

        let obj = match parser.parse_object() {
            Ok(obj) => obj,
            Err(e) => {
                warn!(document = %self.ident, obj_num = num, error = %e, "Could not parse object.");
                return Ok(None);
            }
        };
        if !matches!(parser.lexer().next_token(), Ok(Token::EndObj)) {
            warn!(document = %self.ident, obj_num = num, "Didn't find \"endobj\".");
            parser.objects().discard(obj);
            return Ok(None);
        }
        Ok(Some(obj))
    }

    /// Whether `num`/`generation` names an object present in the file.
    pub(crate) fn check_label(&self, num: u32, generation: u16) -> bool {
        if num == 0 {
            return false;
        }
        match self.xref.entry(num) {
            Some(XRefEntry::InUse { generation: g, .. }) => g == generation,
            Some(XRefEntry::Compressed { .. }) => generation == 0,
            _ => false,
        }
    }

    /// Returns a new owner of object `num`, reading it on first access.
    ///
    /// Nonexistent objects come back as a fresh Null; `None` means the
    /// object exists but could not be read.
    pub(crate) fn get_object(
        &mut self,
        objects: &mut ObjectStore,
        num: u32,
        generation: u16,
    ) -> Result<Option<Obj>> {
        if !self.check_label(num, generation) {
            warn!(document = %self.ident, obj_num = num, generation, "Trying to read nonexistent or deleted object");
            return Ok(Some(objects.insert(Value::Null)));
        }

        if let Some(direct) = self.xref.slot(num).and_then(|slot| slot.direct) {
            objects.increment(direct)?;
            return Ok(Some(direct));
        }

        let result = match self.xref.entry(num) {
            Some(XRefEntry::InUse { offset, .. }) => {
                let limit = self.object_limit(offset);
                self.read_object(objects, Some((num, generation)), offset, limit)?
            }
            Some(XRefEntry::Compressed { stream, index }) => {
                match self.read_packed_object(objects, num, stream, index as usize)? {
                    Some(obj) => Some(obj),
                    None => {
                        warn!(document = %self.ident, obj_num = num, "Could not read object from object stream.");
                        return Ok(Some(objects.insert(Value::Null)));
                    }
                }
            }
            _ => None,
        };

        if let Some(obj) = result {
            objects.increment(obj)?;
            if let Some(slot) = self.xref.slot_mut(num) {
                slot.direct = Some(obj);
            }
        }
        Ok(result)
    }

    fn read_packed_object(
        &mut self,
        objects: &mut ObjectStore,
        num: u32,
        container: u32,
        index: usize,
    ) -> Result<Option<Obj>> {
        if !matches!(self.xref.entry(container), Some(XRefEntry::InUse { .. })) {
            return Ok(None);
        }
        let loaded = self.xref.slot(container).is_some_and(|slot| slot.objstm.is_some());
        if !loaded && !self.load_object_stream(objects, container)? {
            return Ok(None);
        }
        let Some((header, stream)) = self.xref.slot(container).and_then(|slot| slot.objstm.as_ref()) else {
            return Ok(None);
        };
        if index >= header.len() {
            return Ok(None);
        }
        let data = objects.stream(*stream)?.data();
        let Some(span) = header.object_span(index, num, data.len()) else {
            return Ok(None);
        };
        let body = data[span].to_vec();
        Ok(ObjectParser::new(&body, objects, self.id).parse_object().ok())
    }

    /// Decodes object stream `num` and caches its header and body.
    fn load_object_stream(&mut self, objects: &mut ObjectStore, num: u32) -> Result<bool> {
        let Some(XRefEntry::InUse { offset, generation }) = self.xref.entry(num) else {
            return Ok(false);
        };
        if self.loading.contains(&num) {
            warn!(document = %self.ident, obj_num = num, "Object stream refers to itself.");
            return Ok(false);
        }
        let limit = self.object_limit(offset);
        let Some(raw) = self.read_object(objects, Some((num, generation)), offset, limit)? else {
            return Ok(false);
        };
        if objects.stream(raw).is_err() {
            objects.discard(raw);
            return Ok(false);
        }

        self.loading.push(num);
        let decoded = {
            let mut resolve = |objects: &mut ObjectStore, obj: Obj| self.resolve(objects, obj);
            uncompressed_copy(objects, raw, &mut resolve)
        };
        self.loading.retain(|&loading| loading != num);
        objects.discard(raw);

        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(document = %self.ident, obj_num = num, error = %e, "Cannot decode object stream.");
                return Ok(false);
            }
        };
        match ObjStmHeader::parse(objects, decoded, num) {
            Ok(header) => {
                if let Some(slot) = self.xref.slot_mut(num) {
                    slot.objstm = Some((header, decoded));
                    return Ok(true);
                }
                objects.discard(decoded);
                Ok(false)
            }
            Err(e) => {
                warn!(document = %self.ident, obj_num = num, error = %e, "Cannot parse object stream.");
                objects.discard(decoded);
                Ok(false)
            }
        }
    }

    /// Follows `obj` through this document's references.
    pub(crate) fn resolve(&mut self, objects: &mut ObjectStore, obj: Obj) -> Result<Option<Obj>> {
        let id = self.id;
        follow_references(
            objects,
            obj,
            &mut |objects: &mut ObjectStore, doc: DocId, label: u32, generation: u16| {
                if doc != id {
                    return Err(PdfError::UnknownDocument);
                }
                self.get_object(objects, label, generation)
            },
        )
    }

    pub(crate) fn import_state(&self, num: u32) -> Option<ImportState> {
        self.xref.slot(num).and_then(|slot| slot.import)
    }

    /// Sets the import state of `num`, returning the previous one.
    pub(crate) fn set_import_state(&mut self, num: u32, state: Option<ImportState>) -> Option<ImportState> {
        match self.xref.slot_mut(num) {
            Some(slot) => std::mem::replace(&mut slot.import, state),
            None => state,
        }
    }

    /// Hands over every handle this document owns.
    pub(crate) fn take_owned(&mut self) -> Vec<Obj> {
        let mut owned: Vec<Obj> = self.trailer.take().into_iter().chain(self.catalog.take()).collect();
        for slot in self.xref.slots_mut() {
            owned.extend(slot.direct.take());
            owned.extend(slot.objstm.take().map(|(_, stream)| stream));
            owned.extend(slot.import.take().map(|state| state.reference()));
        }
        owned
    }
}

impl<W: Write> PdfContext<W> {
    /// Opens a document for reading.
    ///
    /// `ident` names the document in the registry: opening the same
    /// identifier again returns the existing handle.
    pub fn open_document<R: Read + Seek + 'static>(
        &mut self,
        ident: &str,
        source: R,
        options: &ReaderOptions,
    ) -> Result<DocId> {
        if let Some(doc) = self.documents.lookup(ident) {
            return Ok(doc);
        }
        let id = self.documents.next_id();
        let file = PdfFile::open(id, ident, Box::new(source), &mut self.objects, options)?;
        Ok(self.documents.insert(file))
    }

    /// Opens the file at `path` for reading.
    pub fn open_document_file(
        &mut self,
        ident: &str,
        path: impl AsRef<Path>,
        options: &ReaderOptions,
    ) -> Result<DocId> {
        if let Some(doc) = self.documents.lookup(ident) {
            return Ok(doc);
        }
        let file = File::open(path)?;
        self.open_document(ident, BufReader::new(file), options)
    }

    pub fn document_version(&self, doc: DocId) -> Result<u32> {
        Ok(self.documents.get(doc)?.version())
    }

    /// New owner of the document's main trailer dictionary
    pub fn document_trailer(&mut self, doc: DocId) -> Result<Obj> {
        let trailer = self
            .documents
            .get(doc)?
            .trailer()
            .ok_or(PdfError::UnknownDocument)?;
        self.objects.increment(trailer)?;
        Ok(trailer)
    }

    /// New owner of the document catalog
    pub fn document_catalog(&mut self, doc: DocId) -> Result<Obj> {
        let catalog = self
            .documents
            .get(doc)?
            .catalog()
            .ok_or(PdfError::UnknownDocument)?;
        self.objects.increment(catalog)?;
        Ok(catalog)
    }

    /// Reads object `num` of `doc`. See [`PdfFile`] for the caching rules.
    pub fn get_object(&mut self, doc: DocId, num: u32, generation: u16) -> Result<Option<Obj>> {
        self.documents
            .get_mut(doc)?
            .get_object(&mut self.objects, num, generation)
    }

    /// Reference to object `num` of `doc`, resolved lazily.
    pub fn new_indirect(&mut self, doc: DocId, num: u32, generation: u16) -> Result<Obj> {
        self.documents.get(doc)?;
        Ok(self.objects.insert(Value::Indirect(Indirect::Foreign {
            doc,
            label: num,
            generation,
        })))
    }

    /// Closes `doc` and releases everything cached for it.
    pub fn close_document(&mut self, doc: DocId) -> Result<()> {
        let mut file = self.documents.remove(doc)?;
        debug!(document = %file.ident(), "Closing document");
        for obj in file.take_owned() {
            self.release(obj)?;
        }
        Ok(())
    }
}
