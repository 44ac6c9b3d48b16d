//! Degree-minute-direction coordinate grammar from the atlas index.
//!
//! Accepted: `<deg>[-<min>]<N|S>/<deg>[-<min>]<E|W>`, e.g. `12-30N/92-50E`.
//! A bare `-` or blank means "no coordinates" and is not an error.

use placelink_common::{GeoPoint, PlacelinkError};

/// Decimal places used for coordinate bucketing in concept keys and URIs.
/// Two decimals is roughly one kilometre at the equator: survey jitter for
/// the same feature merges, neighbouring distinct places stay apart.
pub const COORDINATE_PRECISION: i32 = 2;

/// Round a coordinate to the bucketing precision.
pub fn round_bucket(value: f64) -> f64 {
    let factor = 10f64.powi(COORDINATE_PRECISION);
    let rounded = (value * factor).round() / factor;
    // Avoid the "-0.00" bucket splitting from "0.00".
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Parse a coordinate string to decimal degrees.
///
/// Returns `Ok(None)` for the blank/`-` sentinel, `MalformedInput` for
/// anything else that does not match the grammar.
pub fn parse_coordinates(coord_text: &str) -> Result<Option<GeoPoint>, PlacelinkError> {
    let trimmed = coord_text.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return Ok(None);
    }

    let malformed = || PlacelinkError::MalformedInput(format!("coordinates: {coord_text:?}"));

    let (lat_part, lon_part) = trimmed.split_once('/').ok_or_else(malformed)?;

    let latitude = parse_part(lat_part.trim(), 'N', 'S').ok_or_else(malformed)?;
    let longitude = parse_part(lon_part.trim(), 'E', 'W').ok_or_else(malformed)?;

    Ok(Some(GeoPoint { latitude, longitude }))
}

/// Parse one `<deg>[-<min>]<dir>` half. `positive`/`negative` are the two
/// direction letters valid for this axis.
fn parse_part(part: &str, positive: char, negative: char) -> Option<f64> {
    let direction = part.chars().last()?.to_ascii_uppercase();
    let number_part = &part[..part.len() - direction.len_utf8()];

    let sign = if direction == positive {
        1.0
    } else if direction == negative {
        -1.0
    } else {
        return None;
    };

    let (degrees, minutes) = match number_part.split_once('-') {
        Some((deg, min)) => (
            deg.trim().parse::<u32>().ok()?,
            min.trim().parse::<u32>().ok()?,
        ),
        None => (number_part.trim().parse::<u32>().ok()?, 0),
    };

    if minutes >= 60 {
        return None;
    }

    Some(sign * (degrees as f64 + minutes as f64 / 60.0))
}
