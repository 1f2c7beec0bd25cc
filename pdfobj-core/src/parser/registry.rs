//! Documents opened for reading, keyed by the identifier they were opened
//! under.

use super::reader::PdfFile;
use crate::error::{PdfError, Result};
use crate::objects::DocId;
use std::collections::HashMap;
use std::io::{Read, Seek};

/// Byte source of an opened document
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Debug, Default)]
pub struct DocumentRegistry {
    /// Indexed by `DocId`; closed documents leave an empty slot so ids are
    /// never reused.
    documents: Vec<Option<PdfFile>>,
    by_ident: HashMap<String, DocId>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Document already opened under `ident`
    pub fn lookup(&self, ident: &str) -> Option<DocId> {
        self.by_ident.get(ident).copied()
    }

    /// Number of open documents
    pub fn len(&self) -> usize {
        self.by_ident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ident.is_empty()
    }

    pub(crate) fn next_id(&self) -> DocId {
        DocId(self.documents.len() as u32)
    }

    pub(crate) fn insert(&mut self, file: PdfFile) -> DocId {
        let id = file.id();
        self.by_ident.insert(file.ident().to_string(), id);
        let index = id.0 as usize;
        if self.documents.len() <= index {
            self.documents.resize_with(index + 1, || None);
        }
        self.documents[index] = Some(file);
        id
    }

    pub fn get(&self, doc: DocId) -> Result<&PdfFile> {
        self.documents
            .get(doc.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(PdfError::UnknownDocument)
    }

    pub(crate) fn get_mut(&mut self, doc: DocId) -> Result<&mut PdfFile> {
        self.documents
            .get_mut(doc.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(PdfError::UnknownDocument)
    }

    pub(crate) fn remove(&mut self, doc: DocId) -> Result<PdfFile> {
        let file = self
            .documents
            .get_mut(doc.0 as usize)
            .and_then(Option::take)
            .ok_or(PdfError::UnknownDocument)?;
        self.by_ident.remove(file.ident());
        Ok(file)
    }

    /// Removes every open document.
    pub(crate) fn drain(&mut self) -> Vec<PdfFile> {
        self.by_ident.clear();
        self.documents.iter_mut().filter_map(Option::take).collect()
    }
}
