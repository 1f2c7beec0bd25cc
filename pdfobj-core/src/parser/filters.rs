//! PDF Stream Filters
//!
//! Decodes stream bodies according to ISO 32000-1 Section 7.4. Only
//! `FlateDecode`, optionally followed by a TIFF or PNG predictor, is
//! understood; other filters are reported as unsupported for that stream.

use super::predictor::{decode_predictor, DecodeParms};
use crate::compression::decompress_into;
use crate::error::{PdfError, Result};
use crate::objects::{Dict, Obj, ObjectStore, StreamData, StreamFlags, Value};
use tracing::warn;

/// Follows an indirect value to its target, handing out a new owner.
pub(crate) type Resolve<'r> = &'r mut dyn FnMut(&mut ObjectStore, Obj) -> Result<Option<Obj>>;

/// Supported PDF filters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Filter {
    /// Body stored as is
    None,
    /// Flate decode (zlib/deflate compression) with optional predictor
    FlateDecode(Option<DecodeParms>),
}

fn decode_error(message: impl Into<String>) -> PdfError {
    PdfError::DecodeError(message.into())
}

/// Runs `f` on the resolved value of `obj` and gives the extra owner back.
fn with_resolved<T>(
    objects: &mut ObjectStore,
    obj: Obj,
    resolve: Resolve<'_>,
    f: impl FnOnce(&mut ObjectStore, Option<Obj>, Resolve<'_>) -> Result<T>,
) -> Result<T> {
    let resolved = resolve(objects, obj)?;
    let result = f(objects, resolved, resolve);
    if let Some(resolved) = resolved {
        objects.discard(resolved);
    }
    result
}

/// Number stored under `key`, or `default` when absent.
fn parm_value(
    objects: &mut ObjectStore,
    dict: Obj,
    key: &str,
    resolve: Resolve<'_>,
    default: i64,
) -> Result<i64> {
    let Some(value) = objects.lookup(dict, key.as_bytes())? else {
        return Ok(default);
    };
    let number = with_resolved(objects, value, resolve, |objects, resolved, _| {
        Ok(resolved.and_then(|n| objects.number(n).ok()))
    })?;
    number
        .map(|number| number as i64)
        .ok_or_else(|| decode_error(format!("/{key} in DecodeParms is not a number")))
}

/// Read `/Predictor`, `/Colors`, `/BitsPerComponent` and `/Columns`.
pub(crate) fn get_decode_parms(
    objects: &mut ObjectStore,
    dict: Obj,
    resolve: Resolve<'_>,
) -> Result<DecodeParms> {
    let defaults = DecodeParms::default();
    let parms = DecodeParms {
        predictor: parm_value(objects, dict, "Predictor", resolve, defaults.predictor)?,
        colors: parm_value(objects, dict, "Colors", resolve, defaults.colors)?,
        bits_per_component: parm_value(
            objects,
            dict,
            "BitsPerComponent",
            resolve,
            defaults.bits_per_component,
        )?,
        columns: parm_value(objects, dict, "Columns", resolve, defaults.columns)?,
    };
    parms.validate().map_err(|_| {
        warn!("Invalid value(s) in DecodeParms dictionary.");
        decode_error("Invalid value(s) in DecodeParms dictionary")
    })?;
    Ok(parms)
}

/// Work out how the body of `stream` is encoded.
pub(crate) fn stream_filter(
    objects: &mut ObjectStore,
    stream: Obj,
    resolve: Resolve<'_>,
) -> Result<Filter> {
    let Some(filter) = objects.lookup(stream, b"Filter")? else {
        return Ok(Filter::None);
    };

    let parms = match objects.lookup(stream, b"DecodeParms")? {
        Some(parms) => Some(with_resolved(objects, parms, resolve, decode_parms_dict)?),
        None => None,
    };

    let name = with_resolved(objects, filter, resolve, |objects, resolved, resolve| {
        let Some(resolved) = resolved else {
            return Err(decode_error("Filter is null"));
        };
        if let Ok(items) = objects.array(resolved) {
            if items.len() > 1 {
                warn!("Multiple DecodeFilter not supported.");
                return Err(decode_error("Multiple DecodeFilter not supported"));
            }
            let Some(&first) = items.first() else {
                return Ok(None);
            };
            return with_resolved(objects, first, resolve, |objects, item, _| {
                Ok(item.and_then(|item| objects.name(item).ok().map(<[u8]>::to_vec)))
            })
            .map(Some);
        }
        Ok(Some(objects.name(resolved).ok().map(<[u8]>::to_vec)))
    })?;

    match name {
        // An empty filter array means no filter
        None => Ok(Filter::None),
        Some(Some(name)) if name == b"FlateDecode" => Ok(Filter::FlateDecode(parms)),
        Some(Some(name)) => {
            let name = String::from_utf8_lossy(&name).into_owned();
            warn!(filter = %name, "DecodeFilter \"{name}\" not supported.");
            Err(decode_error(format!("DecodeFilter {name} not supported")))
        }
        Some(None) => Err(decode_error("Filter is not a name")),
    }
}

/// DecodeParms is a dictionary or an array holding at most one.
fn decode_parms_dict(
    objects: &mut ObjectStore,
    parms: Option<Obj>,
    resolve: Resolve<'_>,
) -> Result<DecodeParms> {
    let Some(parms) = parms else {
        return Err(decode_error("DecodeParms is null"));
    };
    if let Ok(items) = objects.array(parms) {
        if items.len() > 1 {
            warn!("Unexpected size for DecodeParms array.");
            return Err(decode_error("Unexpected size for DecodeParms array"));
        }
        let Some(&first) = items.first() else {
            return Ok(DecodeParms::default());
        };
        return with_resolved(objects, first, resolve, decode_parms_dict);
    }
    if objects.dict(parms).is_err() {
        warn!("PDF dict expected for DecodeParms.");
        return Err(decode_error("PDF dict expected for DecodeParms"));
    }
    get_decode_parms(objects, parms, resolve)
}

/// Decoded body of `stream`.
pub(crate) fn decode_body(objects: &mut ObjectStore, stream: Obj, resolve: Resolve<'_>) -> Result<Vec<u8>> {
    let filter = stream_filter(objects, stream, resolve)?;
    let raw = objects.stream(stream)?.data();
    match filter {
        Filter::None => Ok(raw.to_vec()),
        Filter::FlateDecode(parms) => {
            let mut inflated = Vec::with_capacity(raw.len() * 2);
            decompress_into(raw, &mut inflated)?;
            match parms {
                Some(parms) => decode_predictor(&inflated, &parms),
                None => Ok(inflated),
            }
        }
    }
}

/// New uncompressed stream holding the decoded body of `src`.
///
/// The dictionary is shared entry by entry, except `Length`, `Filter` and
/// `DecodeParms`.
pub(crate) fn uncompressed_copy(objects: &mut ObjectStore, src: Obj, resolve: Resolve<'_>) -> Result<Obj> {
    let body = decode_body(objects, src, resolve)?;

    let src_dict = objects.stream(src)?.dict();
    let entries: Vec<(Vec<u8>, Obj)> = objects
        .dict(src_dict)?
        .iter()
        .filter(|(key, _)| !matches!(*key, b"Length" | b"Filter" | b"DecodeParms"))
        .map(|(key, value)| (key.to_vec(), value))
        .collect();
    let mut dict = Dict::with_capacity(entries.len());
    for (key, value) in entries {
        objects.increment(value)?;
        dict.insert(key, value);
    }

    let dict = objects.insert(Value::Dict(dict));
    let mut stream = StreamData::new(dict, StreamFlags::empty());
    stream.extend(&body);
    Ok(objects.insert(Value::Stream(stream)))
}
