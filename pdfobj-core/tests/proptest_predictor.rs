//! Property-based tests for the TIFF and PNG predictors
//!
//! Encoding then decoding must give back the original rows for every
//! predictor, geometry and bit depth the reader accepts.

use pdfobj::parser::predictor::{decode_predictor, encode_predictor};
use pdfobj::DecodeParms;
use proptest::prelude::*;

fn geometry_strategy() -> impl Strategy<Value = (i64, i64, i64)> {
    (
        prop_oneof![Just(1i64), Just(4i64)],
        prop_oneof![Just(1i64), Just(2), Just(4), Just(8), Just(16)],
        1i64..=64,
    )
}

/// Rows of random bytes with the padding bits of each row cleared.
fn rows_strategy(parms: DecodeParms) -> impl Strategy<Value = Vec<u8>> {
    let length = parms.row_length();
    let used_bits = (parms.columns * parms.colors * parms.bits_per_component) as usize;
    let padding = length * 8 - used_bits;
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), length), 1..6).prop_map(
        move |rows| {
            let mut data = Vec::with_capacity(rows.len() * length);
            for mut row in rows {
                if let Some(last) = row.last_mut() {
                    *last &= 0xFFu8 << padding;
                }
                data.extend_from_slice(&row);
            }
            data
        },
    )
}

fn parms_and_data(predictors: Vec<i64>) -> impl Strategy<Value = (DecodeParms, Vec<u8>)> {
    (proptest::sample::select(predictors), geometry_strategy()).prop_flat_map(
        |(predictor, (colors, bpc, columns))| {
            let parms = DecodeParms::new(predictor, colors, bpc, columns);
            (Just(parms), rows_strategy(parms))
        },
    )
}

proptest! {
    #[test]
    fn png_fixed_filters_round_trip((parms, data) in parms_and_data(vec![10, 11, 12, 13, 14])) {
        let encoded = encode_predictor(&data, &parms).unwrap();
        let rows = data.len() / parms.row_length();
        prop_assert_eq!(encoded.len(), data.len() + rows);
        let tag = (parms.predictor - 10) as u8;
        for row in encoded.chunks(parms.row_length() + 1) {
            prop_assert_eq!(row[0], tag);
        }
        prop_assert_eq!(decode_predictor(&encoded, &parms).unwrap(), data);
    }

    #[test]
    fn png_optimum_round_trip((parms, data) in parms_and_data(vec![15])) {
        let encoded = encode_predictor(&data, &parms).unwrap();
        prop_assert_eq!(decode_predictor(&encoded, &parms).unwrap(), data);
    }

    #[test]
    fn tiff_round_trip((parms, data) in parms_and_data(vec![2])) {
        let encoded = encode_predictor(&data, &parms).unwrap();
        prop_assert_eq!(encoded.len(), data.len());
        prop_assert_eq!(decode_predictor(&encoded, &parms).unwrap(), data);
    }

    #[test]
    fn identity_predictor_keeps_bytes(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let parms = DecodeParms::default();
        prop_assert_eq!(decode_predictor(&data, &parms).unwrap(), data.clone());
        prop_assert_eq!(encode_predictor(&data, &parms).unwrap(), data);
    }
}

#[test]
fn test_unsupported_depth_is_a_decode_error() {
    let parms = DecodeParms::new(12, 1, 3, 4);
    assert!(decode_predictor(&[2, 0, 0], &parms).is_err());
}
