//! Cross-reference stream support for PDF 1.5+
//!
//! Decodes cross-reference streams according to ISO 32000-1:2008 Section
//! 7.5.8 into the same [`XRefTable`] used for classic tables.

use super::xref::{check_subsection, XRefEntry, XRefTable};
use super::{ParseError, ParseResult};
use crate::objects::{Obj, ObjectStore};

/// Widest field accepted in `/W`
const MAX_FIELD_WIDTH: usize = 8;

/// Field widths and subsections of an xref stream
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XRefStreamLayout {
    pub(crate) widths: [usize; 3],
    /// Pairs of (first object number, count)
    pub(crate) sections: Vec<(u32, u32)>,
}

impl XRefStreamLayout {
    /// Read `/Size`, `/W` and `/Index` from an xref stream dictionary.
    pub(crate) fn from_dict(objects: &ObjectStore, dict: Obj) -> ParseResult<Self> {
        let size = objects
            .lookup_number(dict, b"Size")
            .ok()
            .flatten()
            .ok_or_else(|| ParseError::MissingKey("Size in xref stream".to_string()))?;

        let w = objects
            .lookup(dict, b"W")
            .ok()
            .flatten()
            .and_then(|w| objects.array(w).ok())
            .filter(|w| w.len() == 3)
            .ok_or_else(|| ParseError::MissingKey("W array in xref stream".to_string()))?;
        let mut widths = [0usize; 3];
        for (width, item) in widths.iter_mut().zip(w) {
            let value = objects.number(*item).map_err(|_| invalid("Invalid width in W array"))?;
            if !(0.0..=MAX_FIELD_WIDTH as f64).contains(&value) {
                return Err(invalid("Invalid width in W array"));
            }
            *width = value as usize;
        }

        let sections = match objects.lookup(dict, b"Index").ok().flatten() {
            Some(index) => {
                let items = objects
                    .array(index)
                    .map_err(|_| invalid("Index is not an array"))?;
                if items.len() % 2 != 0 {
                    return Err(invalid("Index array has an odd length"));
                }
                items
                    .chunks(2)
                    .map(|pair| {
                        let first = objects.number(pair[0]).ok();
                        let count = objects.number(pair[1]).ok();
                        match (first, count) {
                            (Some(first), Some(count)) if first >= 0.0 && count >= 0.0 => {
                                Ok((first as u32, count as u32))
                            }
                            _ => Err(invalid("Invalid Index entry")),
                        }
                    })
                    .collect::<ParseResult<Vec<_>>>()?
            }
            None => vec![(0, size.max(0.0) as u32)],
        };

        Ok(Self { widths, sections })
    }

    fn entry_len(&self) -> usize {
        self.widths.iter().sum()
    }
}

fn invalid(message: &str) -> ParseError {
    ParseError::InvalidXRef(message.to_string())
}

/// Read a field from bytes (big-endian); a zero-width field yields `default`.
fn read_field(bytes: &[u8], default: u64) -> u64 {
    if bytes.is_empty() {
        return default;
    }
    bytes
        .iter()
        .fold(0u64, |value, &byte| (value << 8) | byte as u64)
}

/// Decode the entries of an uncompressed xref stream into `table`.
///
/// Object numbers must stay below `file_size`.
pub(crate) fn parse_entries(
    data: &[u8],
    layout: &XRefStreamLayout,
    table: &mut XRefTable,
    file_size: u64,
) -> ParseResult<()> {
    let entry_len = layout.entry_len();
    let [w0, w1, w2] = layout.widths;
    let mut pos = 0usize;

    for &(first, count) in &layout.sections {
        if count == 0 {
            continue;
        }
        if entry_len == 0 {
            return Err(invalid("xref stream entries have no width"));
        }
        check_subsection(first as u64, count as u64, file_size)?;
        let needed = (count as usize)
            .checked_mul(entry_len)
            .filter(|needed| pos + needed <= data.len())
            .ok_or_else(|| invalid("xref stream data is too short for its Index"))?;
        table.ensure_len(first as usize + count as usize);

        for (num, chunk) in (first..first + count).zip(data[pos..pos + needed].chunks(entry_len)) {
            let kind = read_field(&chunk[..w0], 1);
            let field2 = read_field(&chunk[w0..w0 + w1], 0);
            let field3 = read_field(&chunk[w0 + w1..w0 + w1 + w2], 0);
            let entry = match kind {
                0 => XRefEntry::Free,
                1 => XRefEntry::InUse {
                    offset: field2,
                    generation: field3 as u16,
                },
                2 => XRefEntry::Compressed {
                    stream: field2 as u32,
                    index: field3 as u32,
                },
                _ => {
                    tracing::warn!(obj_num = num, kind, "Unknown cross-reference stream entry type.");
                    XRefEntry::Free
                }
            };
            let field = if kind > 2 { 0 } else { field2 };
            table.set_if_empty(num, entry, field);
        }
        pos += needed;
    }

    if pos != data.len() {
        tracing::warn!(extra = data.len() - pos, "Garbage in xref stream.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{Dict, Value};

    fn layout_dict(store: &mut ObjectStore, size: u32, w: [u32; 3], index: Option<Vec<u32>>) -> Obj {
        let mut dict = Dict::new();
        dict.insert(b"Size".to_vec(), store.insert(Value::from(size)));
        let w = w.iter().map(|n| store.insert(Value::from(*n))).collect();
        dict.insert(b"W".to_vec(), store.insert(Value::Array(w)));
        if let Some(index) = index {
            let items = index.iter().map(|n| store.insert(Value::from(*n))).collect();
            dict.insert(b"Index".to_vec(), store.insert(Value::Array(items)));
        }
        store.insert(Value::Dict(dict))
    }

    #[test]
    fn test_read_field() {
        assert_eq!(read_field(&[0x01, 0x02], 0), 0x0102);
        assert_eq!(read_field(&[], 1), 1);
        assert_eq!(read_field(&[0xFF, 0xFF, 0xFF, 0xFF], 0), 0xFFFF_FFFF);
    }

    #[test]
    fn test_layout_defaults_to_whole_size() {
        let mut store = ObjectStore::new();
        let dict = layout_dict(&mut store, 5, [1, 2, 1], None);
        let layout = XRefStreamLayout::from_dict(&store, dict).unwrap();
        assert_eq!(layout.widths, [1, 2, 1]);
        assert_eq!(layout.sections, vec![(0, 5)]);
    }

    #[test]
    fn test_layout_requires_three_widths() {
        let mut store = ObjectStore::new();
        let mut dict = Dict::new();
        dict.insert(b"Size".to_vec(), store.insert(Value::from(1)));
        let w = vec![store.insert(Value::from(1))];
        dict.insert(b"W".to_vec(), store.insert(Value::Array(w)));
        let dict = store.insert(Value::Dict(dict));
        assert!(XRefStreamLayout::from_dict(&store, dict).is_err());
    }

    #[test]
    fn test_entries_of_every_type() {
        let layout = XRefStreamLayout {
            widths: [1, 2, 1],
            sections: vec![(0, 3)],
        };
        let data = [0, 0, 0, 255, 1, 0, 15, 0, 2, 0, 5, 3];
        let mut table = XRefTable::new();
        parse_entries(&data, &layout, &mut table, 1000).unwrap();
        assert_eq!(table.entry(0), Some(XRefEntry::Free));
        assert_eq!(
            table.entry(1),
            Some(XRefEntry::InUse {
                offset: 15,
                generation: 0
            })
        );
        assert_eq!(
            table.entry(2),
            Some(XRefEntry::Compressed {
                stream: 5,
                index: 3
            })
        );
    }

    #[test]
    fn test_zero_width_type_defaults_to_in_use() {
        let layout = XRefStreamLayout {
            widths: [0, 2, 0],
            sections: vec![(3, 2)],
        };
        let mut table = XRefTable::new();
        parse_entries(&[0, 10, 0, 20], &layout, &mut table, 1000).unwrap();
        assert_eq!(
            table.entry(4),
            Some(XRefEntry::InUse {
                offset: 20,
                generation: 0
            })
        );
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_multiple_index_ranges() {
        let mut store = ObjectStore::new();
        let dict = layout_dict(&mut store, 20, [1, 1, 1], Some(vec![0, 1, 10, 2]));
        let layout = XRefStreamLayout::from_dict(&store, dict).unwrap();
        let data = [0, 0, 0, 1, 40, 0, 1, 60, 0];
        let mut table = XRefTable::new();
        parse_entries(&data, &layout, &mut table, 1000).unwrap();
        assert_eq!(
            table.entry(11),
            Some(XRefEntry::InUse {
                offset: 60,
                generation: 0
            })
        );
        assert_eq!(table.entry(5), Some(XRefEntry::Free));
    }

    #[test]
    fn test_short_data_is_an_error() {
        let layout = XRefStreamLayout {
            widths: [1, 2, 1],
            sections: vec![(0, 2)],
        };
        let mut table = XRefTable::new();
        assert!(parse_entries(&[1, 0, 9, 0], &layout, &mut table, 1000).is_err());
    }

    #[test]
    fn test_index_beyond_file_is_an_error() {
        let layout = XRefStreamLayout {
            widths: [1, 1, 1],
            sections: vec![(4_000_000_000, 1)],
        };
        let mut table = XRefTable::new();
        assert!(parse_entries(&[1, 9, 0], &layout, &mut table, 1000).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_zero_width_entries_are_an_error() {
        let mut store = ObjectStore::new();
        let dict = layout_dict(&mut store, 4_000_000_000, [0, 0, 0], None);
        let layout = XRefStreamLayout::from_dict(&store, dict).unwrap();
        let mut table = XRefTable::new();
        assert!(matches!(
            parse_entries(&[], &layout, &mut table, 1000),
            Err(ParseError::InvalidXRef(_))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_trailing_garbage_is_tolerated() {
        let layout = XRefStreamLayout {
            widths: [1, 1, 1],
            sections: vec![(0, 1)],
        };
        let mut table = XRefTable::new();
        parse_entries(&[1, 9, 0, 0xAA], &layout, &mut table, 1000).unwrap();
        assert_eq!(table.len(), 1);
    }
}
