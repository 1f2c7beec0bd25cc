//! PDF writing functionality
//!
//! A [`PdfWriter`] is one output session. Labeled objects are handed to it by
//! the context at the moment their last owner releases them; the writer
//! either emits them as top-level `obj ... endobj` records or packs them into
//! the current object stream, and keeps the cross-reference data needed to
//! finish the file.

mod encryption;
mod serialize;
mod xref_stream_writer;

pub use encryption::EncryptionHook;
pub use xref_stream_writer::{XRefRecord, XRefStreamWriter};

use crate::compression::MAX_COMPRESSION_LEVEL;
use crate::error::{PdfError, Result};
use crate::objects::{Dict, Obj, ObjectFlags, ObjectStore, StreamData, StreamFlags, Value};
use serialize::Serializer;
use std::fmt::Write as _;
use std::io::Write;
use tracing::{debug, info, trace, warn};

/// Objects packed into one object stream before it is flushed
pub const OBJSTM_MAX_OBJECTS: usize = 200;

/// PDF minor version written when none is configured
pub const DEFAULT_PDF_VERSION: u8 = 5;

pub const MIN_PDF_VERSION: u8 = 3;
pub const MAX_PDF_VERSION: u8 = 7;

/// First minor version with cross-reference and object streams
const XREF_STREAM_MIN_VERSION: u8 = 5;

/// Comment line marking the file as binary
const BINARY_MARKER: &[u8] = b"%\xe4\xf0\xed\xf8\n";

/// Configuration for an output session
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    /// PDF minor version (`%PDF-1.N`)
    pub version: u8,
    /// Deflate level for streams flagged for compression, 0 disables it
    pub compression_level: u8,
    /// Pack small objects into object streams (PDF 1.5+ only)
    pub object_streams: bool,
    /// Objects per object stream
    pub max_objects_per_stream: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_PDF_VERSION,
            compression_level: MAX_COMPRESSION_LEVEL,
            object_streams: true,
            max_objects_per_stream: OBJSTM_MAX_OBJECTS,
        }
    }
}

impl WriterConfig {
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_object_streams(mut self, enabled: bool) -> Self {
        self.object_streams = enabled;
        self
    }

    pub fn with_max_objects_per_stream(mut self, max: usize) -> Self {
        self.max_objects_per_stream = max;
        self
    }

    fn effective_version(&self) -> u8 {
        if (MIN_PDF_VERSION..=MAX_PDF_VERSION).contains(&self.version) {
            self.version
        } else {
            warn!(
                version = self.version,
                "Unsupported PDF version 1.{}, using 1.{DEFAULT_PDF_VERSION}", self.version
            );
            DEFAULT_PDF_VERSION
        }
    }
}

/// Object stream being filled
#[derive(Debug)]
struct ObjectStreamBatch {
    container: Obj,
    label: u32,
    /// (object number, offset of its body in the container data)
    entries: Vec<(u32, usize)>,
}

/// Stores `value` under `key`, dropping whatever was there.
fn put_entry(objects: &mut ObjectStore, dict: Obj, key: &str, value: Value) -> Result<()> {
    let value = objects.insert(value);
    match objects.dict_mut(dict) {
        Ok(entries) => {
            if let Some(old) = entries.insert(key.as_bytes().to_vec(), value) {
                objects.discard(old);
            }
            Ok(())
        }
        Err(e) => {
            objects.discard(value);
            Err(e)
        }
    }
}

pub struct PdfWriter<W: Write> {
    writer: W,
    current_position: u64,
    version: u8,
    compression_level: u8,
    max_objects_per_stream: usize,
    /// Indexed by object number
    xref: Vec<XRefRecord>,
    /// Trailer dictionary, or the dictionary of the xref stream
    trailer: Obj,
    xref_stream: Option<Obj>,
    object_stream: Option<ObjectStreamBatch>,
    encryption: Option<Box<dyn EncryptionHook>>,
    compression_saved: i64,
    startxref: Option<u64>,
}

impl<W: Write> PdfWriter<W> {
    /// Starts a session: resets object numbering and writes the header.
    pub(crate) fn open(
        writer: W,
        config: &WriterConfig,
        encryption: Option<Box<dyn EncryptionHook>>,
        objects: &mut ObjectStore,
    ) -> Result<Self> {
        if config.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(PdfError::InvalidCompressionLevel(config.compression_level));
        }
        let version = config.effective_version();
        objects.reset_labels();

        let trailer = objects.insert(Value::Dict(Dict::new()));
        let xref_stream = if version >= XREF_STREAM_MIN_VERSION && config.object_streams {
            let stream = objects.insert(Value::Stream(StreamData::new(
                trailer,
                StreamFlags::COMPRESS,
            )));
            objects.add_flags(stream, ObjectFlags::NO_ENCRYPT)?;
            put_entry(objects, trailer, "Type", Value::name("XRef"))?;
            Some(stream)
        } else {
            None
        };

        let mut pdf_writer = Self {
            writer,
            current_position: 0,
            version,
            compression_level: config.compression_level,
            max_objects_per_stream: config.max_objects_per_stream.max(1),
            xref: vec![XRefRecord::FREE_HEAD],
            trailer,
            xref_stream,
            object_stream: None,
            encryption,
            compression_saved: 0,
            startxref: None,
        };
        if let Err(e) = pdf_writer.write_header() {
            objects.discard(pdf_writer.xref_stream.unwrap_or(trailer));
            return Err(e);
        }
        debug!(
            version,
            compression_level = config.compression_level,
            xref_stream = pdf_writer.xref_stream.is_some(),
            "Output session opened"
        );
        Ok(pdf_writer)
    }

    fn write_header(&mut self) -> Result<()> {
        self.write_bytes(format!("%PDF-1.{}\n", self.version).as_bytes())?;
        // Binary comment to ensure file is treated as binary
        self.write_bytes(BINARY_MARKER)
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn bytes_written(&self) -> u64 {
        self.current_position
    }

    pub fn compression_saved(&self) -> i64 {
        self.compression_saved
    }

    pub fn is_encrypting(&self) -> bool {
        self.encryption.is_some()
    }

    pub(crate) fn has_trailer_entry(&self, objects: &ObjectStore, key: &str) -> Result<bool> {
        Ok(objects.dict(self.trailer)?.contains_key(key.as_bytes()))
    }

    /// Stores `value` in the trailer; the caller checked the key is unset.
    pub(crate) fn set_trailer_entry(
        &mut self,
        objects: &mut ObjectStore,
        key: &str,
        value: Obj,
    ) -> Result<()> {
        if let Some(old) = objects
            .dict_mut(self.trailer)?
            .insert(key.as_bytes().to_vec(), value)
        {
            objects.discard(old);
        }
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.current_position += data.len() as u64;
        Ok(())
    }

    fn record(&mut self, label: u32, record: XRefRecord) {
        let index = label as usize;
        if self.xref.len() <= index {
            self.xref.resize(index + 1, XRefRecord::UNUSED);
        }
        self.xref[index] = record;
    }

    /// Writes a labeled object whose last owner just released it.
    ///
    /// Returns the object stream container when this object filled it; the
    /// caller releases the container, which flushes it in turn.
    pub(crate) fn write_released(
        &mut self,
        objects: &mut ObjectStore,
        obj: Obj,
    ) -> Result<Option<Obj>> {
        let label = objects.label(obj)?;
        let generation = objects.generation(obj)?;
        let flags = objects.flags(obj)?;

        let packable = self.xref_stream.is_some()
            && !flags.contains(ObjectFlags::NO_OBJSTM)
            && !(self.is_encrypting() && flags.contains(ObjectFlags::NO_ENCRYPT))
            && generation == 0;

        if packable {
            self.add_to_object_stream(objects, obj, label)
        } else {
            self.flush_object(objects, obj, label, generation, flags)?;
            Ok(None)
        }
    }

    fn flush_object(
        &mut self,
        objects: &ObjectStore,
        obj: Obj,
        label: u32,
        generation: u16,
        flags: ObjectFlags,
    ) -> Result<()> {
        self.record(
            label,
            XRefRecord::InUse {
                offset: self.current_position,
                generation,
            },
        );
        self.write_bytes(format!("{label} {generation} obj\n").as_bytes())?;

        let hook = match self.encryption.as_mut() {
            Some(hook) => {
                hook.set_label(label, generation);
                (!flags.contains(ObjectFlags::NO_ENCRYPT)).then_some(hook)
            }
            None => None,
        };
        let mut serializer = Serializer::new(objects, self.compression_level, hook, true);
        serializer.write_value(obj)?;
        let (bytes, saved) = serializer.finish();
        self.compression_saved += saved;

        self.write_bytes(&bytes)?;
        self.write_bytes(b"\nendobj\n")?;
        trace!(obj_num = label, generation, "Object written");
        Ok(())
    }

    fn add_to_object_stream(
        &mut self,
        objects: &mut ObjectStore,
        obj: Obj,
        label: u32,
    ) -> Result<Option<Obj>> {
        let (container, container_label) = match &self.object_stream {
            Some(batch) => (batch.container, batch.label),
            None => {
                let dict = objects.insert(Value::Dict(Dict::new()));
                let container = objects.insert(Value::Stream(StreamData::new(
                    dict,
                    StreamFlags::COMPRESS,
                )));
                let container_label = objects.assign_label(container)?;
                self.object_stream = Some(ObjectStreamBatch {
                    container,
                    label: container_label,
                    entries: Vec::with_capacity(self.max_objects_per_stream),
                });
                (container, container_label)
            }
        };

        let mut serializer = Serializer::new(objects, self.compression_level, None, false);
        serializer.write_value(obj)?;
        let (mut bytes, saved) = serializer.finish();
        bytes.push(b'\n');
        self.compression_saved += saved;

        let stream = objects.stream_mut(container)?;
        let offset = stream.len();
        stream.extend(&bytes);

        let Some(batch) = self.object_stream.as_mut() else {
            return Ok(None);
        };
        let index = batch.entries.len();
        batch.entries.push((label, offset));
        let full = batch.entries.len() >= self.max_objects_per_stream;
        self.record(
            label,
            XRefRecord::Compressed {
                stream: container_label,
                index: index as u32,
            },
        );

        if full {
            self.finish_object_stream(objects)
        } else {
            Ok(None)
        }
    }

    /// Completes the current object stream: prefixes the offset table and
    /// sets `Type`, `N` and `First`. The container is handed back for release.
    pub(crate) fn finish_object_stream(&mut self, objects: &mut ObjectStore) -> Result<Option<Obj>> {
        let Some(batch) = self.object_stream.take() else {
            return Ok(None);
        };

        let mut header = String::new();
        for (num, offset) in &batch.entries {
            let _ = write!(header, "{num} {offset} ");
        }
        let first = header.len();

        let stream = objects.stream_mut(batch.container)?;
        let mut data = header.into_bytes();
        data.extend_from_slice(&stream.data);
        stream.data = data;
        let dict = stream.dict();

        put_entry(objects, dict, "Type", Value::name("ObjStm"))?;
        put_entry(objects, dict, "N", Value::from(batch.entries.len()))?;
        put_entry(objects, dict, "First", Value::from(first))?;
        debug!(
            obj_num = batch.label,
            count = batch.entries.len(),
            "Object stream completed"
        );
        Ok(Some(batch.container))
    }

    /// Writes the classic table and trailer, or fills the cross-reference
    /// stream. A returned stream must be released to get it written.
    pub(crate) fn write_cross_reference(&mut self, objects: &mut ObjectStore) -> Result<Option<Obj>> {
        if let Some(xref_stream) = self.xref_stream {
            objects.assign_label(xref_stream)?;
        }
        let startxref = self.current_position;
        self.startxref = Some(startxref);
        let size = objects.next_label();
        put_entry(objects, self.trailer, "Size", Value::from(size))?;
        if self.xref.len() < size as usize {
            self.xref.resize(size as usize, XRefRecord::UNUSED);
        }

        match self.xref_stream {
            Some(xref_stream) => {
                self.record(
                    size - 1,
                    XRefRecord::InUse {
                        offset: startxref,
                        generation: 0,
                    },
                );
                let encoder = XRefStreamWriter::new(&self.xref, startxref);
                let data = encoder.encode_entries(&self.xref);
                let widths = encoder
                    .widths()
                    .iter()
                    .map(|width| objects.insert(Value::from(*width)))
                    .collect::<Vec<_>>();
                put_entry(objects, self.trailer, "W", Value::Array(widths))?;
                objects.stream_mut(xref_stream)?.extend(&data);
                Ok(Some(xref_stream))
            }
            None => {
                let mut table = String::with_capacity(self.xref.len() * 20 + 16);
                let _ = write!(table, "xref\n0 {size}\n");
                for record in &self.xref {
                    table.push_str(&record.table_line());
                }
                table.push_str("trailer\n");
                self.write_bytes(table.as_bytes())?;

                let mut serializer = Serializer::new(objects, self.compression_level, None, true);
                serializer.write_value(self.trailer)?;
                let (bytes, _) = serializer.finish();
                self.write_bytes(&bytes)?;
                self.write_bytes(b"\n")?;
                Ok(None)
            }
        }
    }

    /// Writes `startxref` and `%%EOF` and hands the output back.
    pub(crate) fn finish(mut self, objects: &mut ObjectStore) -> Result<W> {
        let startxref = self.startxref.ok_or_else(|| {
            PdfError::InvalidStructure("cross-reference section was not written".to_string())
        })?;
        self.write_bytes(format!("startxref\n{startxref}\n%%EOF\n").as_bytes())?;
        if self.xref_stream.is_none() {
            objects.discard(self.trailer);
        }

        for (label, record) in self.xref.iter().enumerate().skip(1) {
            if *record == XRefRecord::UNUSED {
                warn!(obj_num = label, "Object labeled but never written");
            }
        }

        info!(bytes = self.current_position, "PDF output finished");
        if self.compression_level > 0 {
            if self.version < XREF_STREAM_MIN_VERSION {
                info!(
                    saved = self.compression_saved,
                    "Compression saved {} bytes. Try PDF 1.5 or later to save more",
                    self.compression_saved
                );
            } else {
                info!(
                    saved = self.compression_saved,
                    "Compression saved {} bytes", self.compression_saved
                );
            }
        }

        self.writer.flush()?;
        Ok(self.writer)
    }
}
