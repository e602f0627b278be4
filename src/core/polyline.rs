//! Encoded polyline support
//!
//! Valhalla returns shapes as polyline6: the Google polyline algorithm with a
//! precision factor of 1e6. Pairs are `(lat, lon)` on the wire.

use geo::Coord;

use crate::core::error::{Error, Result};

/// Precision used by every Valhalla shape
pub const POLYLINE6_PRECISION: u32 = 6;

/// Shapes come from the server, so a broken one is a server error
fn malformed(message: String) -> Error {
    Error::GenericServerError {
        status: "200".to_string(),
        message: Some(format!("Malformed response: {message}")),
    }
}

fn decode_value(bytes: &[u8], index: &mut usize) -> Result<i64> {
    let mut shift = 0u32;
    let mut result = 0i64;

    loop {
        let Some(&byte) = bytes.get(*index) else {
            return Err(malformed("truncated polyline".to_string()));
        };
        if !(63..=126).contains(&byte) {
            return Err(malformed(format!(
                "invalid polyline character '{}' at {}",
                byte as char, index
            )));
        }
        if shift > 60 {
            return Err(malformed("polyline value overflow".to_string()));
        }

        let chunk = (byte - 63) as i64;
        *index += 1;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }

    Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}

/// Decode an encoded polyline into `(lat, lon)` pairs
pub fn decode_polyline(encoded: &str, precision: u32) -> Result<Vec<(f64, f64)>> {
    let factor = 10_f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut coordinates = Vec::new();
    let mut index = 0;
    let mut lat = 0i64;
    let mut lon = 0i64;

    while index < bytes.len() {
        lat = lat
            .checked_add(decode_value(bytes, &mut index)?)
            .ok_or_else(|| malformed("polyline latitude overflow".to_string()))?;
        lon = lon
            .checked_add(decode_value(bytes, &mut index)?)
            .ok_or_else(|| malformed("polyline longitude overflow".to_string()))?;
        coordinates.push((lat as f64 / factor, lon as f64 / factor));
    }

    Ok(coordinates)
}

/// Decode a polyline6 string into `(lat, lon)` pairs
pub fn decode_polyline6(encoded: &str) -> Result<Vec<(f64, f64)>> {
    decode_polyline(encoded, POLYLINE6_PRECISION)
}

/// Decode a polyline6 string straight into lon/lat coordinates
pub fn decode_coords(encoded: &str) -> Result<Vec<Coord<f64>>> {
    Ok(decode_polyline6(encoded)?
        .into_iter()
        .map(|(lat, lon)| Coord { x: lon, y: lat })
        .collect())
}

/// Deltas are widened so the zig-zag shift cannot overflow
fn encode_value(value: i128, out: &mut String) {
    let mut v = if value < 0 { !(value << 1) } else { value << 1 };
    while v >= 0x20 {
        out.push(((0x20 | (v & 0x1f)) + 63) as u8 as char);
        v >>= 5;
    }
    out.push((v + 63) as u8 as char);
}

/// Encode `(lat, lon)` pairs as a polyline
pub fn encode_polyline(coordinates: &[(f64, f64)], precision: u32) -> String {
    let factor = 10_f64.powi(precision as i32);
    let mut out = String::new();
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;

    for &(lat, lon) in coordinates {
        let lat = (lat * factor).round() as i64;
        let lon = (lon * factor).round() as i64;
        encode_value(i128::from(lat) - i128::from(prev_lat), &mut out);
        encode_value(i128::from(lon) - i128::from(prev_lon), &mut out);
        prev_lat = lat;
        prev_lon = lon;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[(f64, f64)], expected: &[(f64, f64)]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a.0 - e.0).abs() < 1e-6, "lat {} != {}", a.0, e.0);
            assert!((a.1 - e.1).abs() < 1e-6, "lon {} != {}", a.1, e.1);
        }
    }

    #[test]
    fn test_decode_reference_polyline5() {
        // Reference string from the polyline algorithm documentation
        let decoded = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@", 5).unwrap();
        assert_close(
            &decoded,
            &[(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)],
        );
    }

    #[test]
    fn test_encode_reference_polyline5() {
        let encoded = encode_polyline(&[(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)], 5);
        assert_eq!(encoded, "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
    }

    #[test]
    fn test_polyline6_round_trip() {
        let cases: Vec<Vec<(f64, f64)>> = vec![
            vec![],
            vec![(0.0, 0.0), (0.0, 0.0)],
            vec![(52.517037, 13.388860)],
            vec![
                (52.517037, 13.388860),
                (52.529407, 13.397634),
                (-33.868820, 151.209296),
                (-0.000001, -179.999999),
            ],
        ];

        for coords in cases {
            let encoded = encode_polyline(&coords, POLYLINE6_PRECISION);
            let decoded = decode_polyline6(&encoded).unwrap();
            assert_close(&decoded, &coords);
        }
    }

    #[test]
    fn test_decode_coords_reverses_to_lon_lat() {
        let encoded = encode_polyline(&[(52.5, 13.4), (48.1, 11.6)], POLYLINE6_PRECISION);
        let coords = decode_coords(&encoded).unwrap();
        assert!((coords[0].x - 13.4).abs() < 1e-9);
        assert!((coords[0].y - 52.5).abs() < 1e-9);
        assert!((coords[1].x - 11.6).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_polyline6("_p~iF~ps|U_").is_err()); // truncated pair
        assert!(decode_polyline6("abc def").is_err()); // space is below '?'
    }

    #[test]
    fn test_decode_overflowing_deltas_is_server_error() {
        // Each pair adds ~2^62 to both axes; the third pair leaves the i64 range
        let step = 1i64 << 62;
        let mut encoded = String::new();
        for _ in 0..3 {
            encode_value(i128::from(step), &mut encoded);
            encode_value(i128::from(step), &mut encoded);
        }

        let err = decode_polyline6(&encoded).unwrap_err();
        assert_eq!(err.kind(), "GenericServerError");
        assert!(err.to_string().starts_with("200"));
    }

    #[test]
    fn test_encode_extreme_deltas_does_not_overflow() {
        let encoded = encode_polyline(&[(f64::MAX, f64::MIN), (f64::MIN, f64::MAX)], 6);
        assert!(!encoded.is_empty());
    }
}
