//! TIFF and PNG predictors used together with FlateDecode
//!
//! Decoding reverses the prediction row by row; encoding applies it and is
//! used by producers that want better compression on image-like data.

use crate::error::{PdfError, Result};
use tracing::warn;

/// Colors limit for TIFF predictor 2 with fewer than 8 bits per component.
pub const PREDICTOR_TIFF2_MAX_COLORS: usize = 32;

/// Parameters of a FlateDecode `DecodeParms` dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeParms {
    pub predictor: i64,
    pub colors: i64,
    pub bits_per_component: i64,
    pub columns: i64,
}

impl Default for DecodeParms {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl DecodeParms {
    pub fn new(predictor: i64, colors: i64, bits_per_component: i64, columns: i64) -> Self {
        Self {
            predictor,
            colors,
            bits_per_component,
            columns,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.bits_per_component, 1 | 2 | 4 | 8 | 16) {
            warn!(
                bits_per_component = self.bits_per_component,
                "Invalid BPC value in DecodeParms"
            );
            return Err(PdfError::DecodeError(format!(
                "invalid BitsPerComponent {}",
                self.bits_per_component
            )));
        }
        if self.predictor <= 0 || self.colors <= 0 || self.columns <= 0 {
            return Err(PdfError::DecodeError(
                "Predictor, Colors and Columns must be positive".to_string(),
            ));
        }
        if self.checked_row_length().is_none() {
            warn!(
                colors = self.colors,
                columns = self.columns,
                "Row length of DecodeParms overflows"
            );
            return Err(PdfError::DecodeError(
                "row length overflows".to_string(),
            ));
        }
        Ok(())
    }

    fn checked_row_length(&self) -> Option<usize> {
        let bits = self
            .colors
            .checked_mul(self.bits_per_component)?
            .checked_mul(self.columns)?
            .checked_add(7)?;
        usize::try_from(bits / 8).ok()
    }

    fn bits_per_pixel(&self) -> usize {
        usize::try_from(self.colors.saturating_mul(self.bits_per_component)).unwrap_or(0)
    }

    /// Bytes per complete pixel, at least one.
    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel().saturating_add(7) / 8
    }

    /// Bytes per row, excluding any PNG tag byte. Saturates for parameters
    /// that fail [`DecodeParms::validate`].
    pub fn row_length(&self) -> usize {
        self.checked_row_length().unwrap_or(usize::MAX)
    }
}

/// Rejects data that cannot hold a single row of `length` bytes.
fn check_row_fits(data: &[u8], length: usize) -> Result<()> {
    if length > data.len() {
        warn!(
            row_length = length,
            data_length = data.len(),
            "Predictor row is longer than the stream data"
        );
        return Err(PdfError::DecodeError(format!(
            "predictor row of {length} bytes exceeds {} bytes of data",
            data.len()
        )));
    }
    Ok(())
}

/// PNG filter types selected by the per-row tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngFilter {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

impl PngFilter {
    pub const ALL: [PngFilter; 5] = [
        PngFilter::None,
        PngFilter::Sub,
        PngFilter::Up,
        PngFilter::Average,
        PngFilter::Paeth,
    ];

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }
}

/// Paeth predictor; ties resolve to left, then above, then upper-left.
fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn average(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16) / 2) as u8
}

/// Reverses the predictor described by `parms`.
///
/// Only complete rows are decoded; a trailing partial row is dropped.
/// Non-empty data shorter than one row is a decode error.
pub fn decode_predictor(data: &[u8], parms: &DecodeParms) -> Result<Vec<u8>> {
    parms.validate()?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    match parms.predictor {
        1 => Ok(data.to_vec()),
        2 => {
            check_row_fits(data, parms.row_length())?;
            decode_tiff2(data, parms)
        }
        10..=15 => {
            check_row_fits(data, parms.row_length().saturating_add(1))?;
            decode_png(data, parms)
        }
        other => {
            warn!(predictor = other, "Unknown Predictor type value");
            Err(PdfError::DecodeError(format!("unknown predictor {other}")))
        }
    }
}

/// Applies the predictor described by `parms` to row-aligned data.
///
/// Predictor 15 picks, for each row, the PNG filter with the smallest sum of
/// absolute residuals.
pub fn encode_predictor(data: &[u8], parms: &DecodeParms) -> Result<Vec<u8>> {
    parms.validate()?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let length = parms.row_length();
    if parms.predictor != 1 && data.len() % length != 0 {
        return Err(PdfError::DecodeError(format!(
            "data length {} is not a multiple of the row length {length}",
            data.len()
        )));
    }
    match parms.predictor {
        1 => Ok(data.to_vec()),
        2 => encode_tiff2(data, parms),
        10..=15 => Ok(encode_png(data, parms)),
        other => Err(PdfError::DecodeError(format!("unknown predictor {other}"))),
    }
}

fn decode_tiff2(data: &[u8], parms: &DecodeParms) -> Result<Vec<u8>> {
    let length = parms.row_length();
    let bpp = parms.bytes_per_pixel();
    let mut out = Vec::with_capacity(data.len());

    if parms.bits_per_component < 8 && parms.colors as usize > PREDICTOR_TIFF2_MAX_COLORS {
        warn!(
            colors = parms.colors,
            "Colors value > {PREDICTOR_TIFF2_MAX_COLORS} not supported for TIFF 2 predictor"
        );
        return Err(PdfError::DecodeError("too many colors for TIFF 2".to_string()));
    }

    for row in data.chunks_exact(length) {
        let start = out.len();
        match parms.bits_per_component {
            8 => {
                for i in 0..length {
                    let left = if i >= bpp { out[start + i - bpp] } else { 0 };
                    out.push(row[i].wrapping_add(left));
                }
            }
            16 => {
                for i in (0..length).step_by(2) {
                    let left = if i >= bpp {
                        u16::from_be_bytes([out[start + i - bpp], out[start + i - bpp + 1]])
                    } else {
                        0
                    };
                    let delta = u16::from_be_bytes([row[i], row[i + 1]]);
                    out.extend_from_slice(&delta.wrapping_add(left).to_be_bytes());
                }
            }
            _ => out.extend_from_slice(&tiff2_low_depth_row(row, parms, false)),
        }
    }
    Ok(out)
}

fn encode_tiff2(data: &[u8], parms: &DecodeParms) -> Result<Vec<u8>> {
    let length = parms.row_length();
    let bpp = parms.bytes_per_pixel();
    let mut out = Vec::with_capacity(data.len());

    if parms.bits_per_component < 8 && parms.colors as usize > PREDICTOR_TIFF2_MAX_COLORS {
        return Err(PdfError::DecodeError("too many colors for TIFF 2".to_string()));
    }

    for row in data.chunks_exact(length) {
        match parms.bits_per_component {
            8 => {
                for i in 0..length {
                    let left = if i >= bpp { row[i - bpp] } else { 0 };
                    out.push(row[i].wrapping_sub(left));
                }
            }
            16 => {
                for i in (0..length).step_by(2) {
                    let left = if i >= bpp {
                        u16::from_be_bytes([row[i - bpp], row[i - bpp + 1]])
                    } else {
                        0
                    };
                    let value = u16::from_be_bytes([row[i], row[i + 1]]);
                    out.extend_from_slice(&value.wrapping_sub(left).to_be_bytes());
                }
            }
            _ => out.extend_from_slice(&tiff2_low_depth_row(row, parms, true)),
        }
    }
    Ok(out)
}

/// TIFF 2 on packed components of 1, 2 or 4 bits. Components never straddle
/// a byte boundary at these depths; padding bits of the last byte stay zero.
fn tiff2_low_depth_row(row: &[u8], parms: &DecodeParms, encode: bool) -> Vec<u8> {
    let bpc = parms.bits_per_component as usize;
    let colors = parms.colors as usize;
    let mask = ((1u16 << bpc) - 1) as u8;
    let mut previous = [0u8; PREDICTOR_TIFF2_MAX_COLORS];
    let mut out = vec![0u8; row.len()];

    for i in 0..parms.columns as usize * colors {
        let ci = i % colors;
        let bit = i * bpc;
        let shift = 8 - bpc - bit % 8;
        let value = (row[bit / 8] >> shift) & mask;
        let result = if encode {
            let delta = value.wrapping_sub(previous[ci]) & mask;
            previous[ci] = value;
            delta
        } else {
            previous[ci] = previous[ci].wrapping_add(value) & mask;
            previous[ci]
        };
        out[bit / 8] |= result << shift;
    }
    out
}

fn decode_png(data: &[u8], parms: &DecodeParms) -> Result<Vec<u8>> {
    let length = parms.row_length();
    let bpp = parms.bytes_per_pixel();
    let fixed = (parms.predictor != 15).then(|| (parms.predictor - 10) as u8);
    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; length];
    let mut cur = vec![0u8; length];

    for row in data.chunks_exact(length + 1) {
        let tag = row[0];
        if let Some(expected) = fixed {
            if tag != expected {
                warn!(expected, found = tag, "Mismatched Predictor type in data stream");
                return Err(PdfError::DecodeError(
                    "mismatched PNG predictor tag".to_string(),
                ));
            }
        }
        let filter = PngFilter::from_tag(tag).ok_or_else(|| {
            warn!(tag, "Unknown PNG predictor type");
            PdfError::DecodeError(format!("unknown PNG filter type {tag}"))
        })?;
        let src = &row[1..];

        for i in 0..length {
            let a = if i >= bpp { cur[i - bpp] } else { 0 };
            let b = prev[i];
            let c = if i >= bpp { prev[i - bpp] } else { 0 };
            let predicted = match filter {
                PngFilter::None => 0,
                PngFilter::Sub => a,
                PngFilter::Up => b,
                PngFilter::Average => average(a, b),
                PngFilter::Paeth => paeth(a, b, c),
            };
            cur[i] = src[i].wrapping_add(predicted);
        }
        out.extend_from_slice(&cur);
        std::mem::swap(&mut prev, &mut cur);
    }
    Ok(out)
}

fn png_filter_row(filter: PngFilter, row: &[u8], prev: &[u8], bpp: usize, out: &mut Vec<u8>) {
    out.push(filter as u8);
    for i in 0..row.len() {
        let a = if i >= bpp { row[i - bpp] } else { 0 };
        let b = prev[i];
        let c = if i >= bpp { prev[i - bpp] } else { 0 };
        let predicted = match filter {
            PngFilter::None => 0,
            PngFilter::Sub => a,
            PngFilter::Up => b,
            PngFilter::Average => average(a, b),
            PngFilter::Paeth => paeth(a, b, c),
        };
        out.push(row[i].wrapping_sub(predicted));
    }
}

fn encode_png(data: &[u8], parms: &DecodeParms) -> Vec<u8> {
    let length = parms.row_length();
    let bpp = parms.bytes_per_pixel();
    let rows = data.len() / length;
    let mut out = Vec::with_capacity(data.len() + rows);
    let zero = vec![0u8; length];
    let mut candidate = Vec::with_capacity(length + 1);

    for (index, row) in data.chunks_exact(length).enumerate() {
        let prev = if index == 0 {
            &zero[..]
        } else {
            &data[(index - 1) * length..index * length]
        };
        if parms.predictor != 15 {
            let filter = PngFilter::ALL[(parms.predictor - 10) as usize];
            png_filter_row(filter, row, prev, bpp, &mut out);
            continue;
        }

        let mut best: Option<(u64, Vec<u8>)> = None;
        for filter in PngFilter::ALL {
            candidate.clear();
            png_filter_row(filter, row, prev, bpp, &mut candidate);
            let score = candidate[1..]
                .iter()
                .map(|&byte| (byte as i8).unsigned_abs() as u64)
                .sum::<u64>();
            if best.as_ref().map_or(true, |(s, _)| score < *s) {
                best = Some((score, candidate.clone()));
            }
        }
        if let Some((_, encoded)) = best {
            out.extend_from_slice(&encoded);
        }
    }
    out
}
