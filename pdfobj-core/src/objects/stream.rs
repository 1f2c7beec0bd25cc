use crate::objects::Obj;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StreamFlags: u8 {
        /// Deflate the body when the stream is written.
        const COMPRESS = 1 << 0;
    }
}

/// Stream payload: an owned dictionary handle plus the raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamData {
    pub(crate) dict: Obj,
    pub(crate) data: Vec<u8>,
    pub(crate) flags: StreamFlags,
}

impl StreamData {
    pub(crate) fn new(dict: Obj, flags: StreamFlags) -> Self {
        Self {
            dict,
            data: Vec::new(),
            flags,
        }
    }

    pub fn dict(&self) -> Obj {
        self.dict
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}
