//! # Polyline geometry codec
//!
//! Route geometries leave the engine either as a Google polyline (v5) string
//! or as a plain JSON array of `[lat, lon]` pairs. Coordinates are stored at
//! 10⁶ fixed-point precision internally but the wire format is 10⁵, so every
//! value is divided by ten on the way out and multiplied back on the way in.

use crate::coordinate::FixedCoordinate;
use serde_json::{Value, json};

/// Internal (10⁶) to wire (10⁵) precision divisor.
const PRECISION_DIVISOR: i32 = 10;

fn encode_number(mut value: u32, output: &mut String) {
    // Emit 5-bit groups LSB-first; the continuation bit marks all but the
    // last group. Adding 63 keeps every byte printable.
    while value >= 0x20 {
        let chunk = (0x20 | (value & 0x1f)) + 63;
        output.push(char::from(chunk as u8));
        value >>= 5;
    }
    output.push(char::from((value + 63) as u8));
}

fn encode_signed(delta: i32, output: &mut String) {
    let zigzag = ((delta << 1) ^ (delta >> 31)) as u32;
    encode_number(zigzag, output);
}

/// Encodes a coordinate sequence as a polyline string.
pub fn encode(coordinates: &[FixedCoordinate]) -> String {
    let mut output = String::with_capacity(coordinates.len() * 6);
    let mut previous_lat = 0i32;
    let mut previous_lon = 0i32;
    for c in coordinates {
        let lat = c.lat / PRECISION_DIVISOR;
        let lon = c.lon / PRECISION_DIVISOR;
        encode_signed(lat - previous_lat, &mut output);
        encode_signed(lon - previous_lon, &mut output);
        previous_lat = lat;
        previous_lon = lon;
    }
    output
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolylineDecodeError {
    #[error("character {0:?} is outside the polyline alphabet")]
    InvalidCharacter(char),
    #[error("the string ends in the middle of a varint group")]
    Truncated,
}

/// Decodes a polyline string back into fixed-point (10⁶) coordinates.
pub fn decode(encoded: &str) -> Result<Vec<FixedCoordinate>, PolylineDecodeError> {
    let mut coordinates = Vec::with_capacity(encoded.len() / 4);
    let mut bytes = encoded.chars();
    let mut lat = 0i32;
    let mut lon = 0i32;

    let mut next_value = |iter: &mut std::str::Chars| -> Result<Option<i32>, PolylineDecodeError> {
        let mut shift = 0u32;
        let mut accumulator = 0u32;
        loop {
            let Some(c) = iter.next() else {
                return if shift == 0 {
                    Ok(None)
                } else {
                    Err(PolylineDecodeError::Truncated)
                };
            };
            let value = (c as u32).wrapping_sub(63);
            if value > 0x3f {
                return Err(PolylineDecodeError::InvalidCharacter(c));
            }
            accumulator |= (value & 0x1f) << shift;
            shift += 5;
            if value & 0x20 == 0 {
                let unzigzag = ((accumulator >> 1) as i32) ^ -((accumulator & 1) as i32);
                return Ok(Some(unzigzag));
            }
        }
    };

    loop {
        let Some(dlat) = next_value(&mut bytes)? else {
            break;
        };
        let Some(dlon) = next_value(&mut bytes)? else {
            return Err(PolylineDecodeError::Truncated);
        };
        lat += dlat;
        lon += dlon;
        coordinates.push(FixedCoordinate {
            lat: lat * PRECISION_DIVISOR,
            lon: lon * PRECISION_DIVISOR,
        });
    }
    Ok(coordinates)
}

/// The unencoded form: a JSON array of `[lat, lon]` pairs in degrees.
pub fn to_json_array(coordinates: &[FixedCoordinate]) -> Value {
    Value::Array(
        coordinates
            .iter()
            .map(|c| {
                let d = c.to_degrees();
                json!([d.y, d.x])
            })
            .collect(),
    )
}
