//! Cross-reference output for PDF 1.5+ streams and classic tables
//!
//! Cross-reference streams follow ISO 32000-1:2008 Section 7.5.8. The same
//! records also produce the classic 20-byte table lines.

/// One row of the output cross-reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefRecord {
    /// Free object (type 0)
    Free { next: u32, generation: u16 },
    /// Object written at a byte offset (type 1)
    InUse { offset: u64, generation: u16 },
    /// Object packed in an object stream (type 2)
    Compressed { stream: u32, index: u32 },
}

impl XRefRecord {
    /// Unused object number
    pub(crate) const UNUSED: XRefRecord = XRefRecord::Free {
        next: 0,
        generation: 0,
    };

    /// Head of the free list in slot 0
    pub(crate) const FREE_HEAD: XRefRecord = XRefRecord::Free {
        next: 0,
        generation: 0xFFFF,
    };

    fn fields(&self) -> (u8, u64, u64) {
        match *self {
            XRefRecord::Free { next, generation } => (0, next as u64, generation as u64),
            XRefRecord::InUse { offset, generation } => (1, offset, generation as u64),
            XRefRecord::Compressed { stream, index } => (2, stream as u64, index as u64),
        }
    }

    /// Classic table line, always 20 bytes.
    pub fn table_line(&self) -> String {
        let (kind, field2, field3) = self.fields();
        let marker = if kind == 0 { 'f' } else { 'n' };
        format!("{field2:010} {field3:05} {marker} \n")
    }
}

/// Writer for XRef streams
#[derive(Debug, Clone, PartialEq)]
pub struct XRefStreamWriter {
    /// Field widths [type, field2, field3]
    widths: [usize; 3],
}

impl XRefStreamWriter {
    /// Size the fields for `records`. The second field is wide enough for
    /// `min_offset` as well, normally the `startxref` position.
    pub fn new(records: &[XRefRecord], min_offset: u64) -> Self {
        let widest = records
            .iter()
            .map(|record| record.fields().1)
            .fold(min_offset, u64::max);
        Self {
            widths: [1, bytes_needed(widest), 2],
        }
    }

    pub fn widths(&self) -> [usize; 3] {
        self.widths
    }

    /// Encode entries into binary data
    pub fn encode_entries(&self, records: &[XRefRecord]) -> Vec<u8> {
        let mut data = Vec::with_capacity(records.len() * self.widths.iter().sum::<usize>());
        for record in records {
            let (kind, field2, field3) = record.fields();
            write_field(&mut data, kind as u64, self.widths[0]);
            write_field(&mut data, field2, self.widths[1]);
            write_field(&mut data, field3, self.widths[2]);
        }
        data
    }
}

/// Calculate minimum bytes needed to represent a value
pub(crate) fn bytes_needed(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        ((value.ilog2() / 8) + 1) as usize
    }
}

/// Write a field with the specified width, big-endian
fn write_field(data: &mut Vec<u8>, value: u64, width: usize) {
    for i in (0..width).rev() {
        data.push(((value >> (i * 8)) & 0xFF) as u8);
    }
}
