//! Geo points, geohashes and distances.

use serde_json::Value;

use crate::error::{DododError, Result};

/// Mean earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            Some(Self { lat, lon })
        } else {
            None
        }
    }

    /// Read a point from a geohash, a `"lat,lon"` string, a `{lat, lon|lng}`
    /// object or a `[lon, lat]` array.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => {
                if let Some((lat, lon)) = s.split_once(',') {
                    let lat = lat.trim().parse().ok()?;
                    let lon = lon.trim().parse().ok()?;
                    Self::new(lat, lon)
                } else {
                    decode_geohash(s.trim())
                }
            }
            Value::Object(map) => {
                let lat = map.get("lat")?.as_f64()?;
                let lon = map.get("lon").or_else(|| map.get("lng"))?.as_f64()?;
                Self::new(lat, lon)
            }
            Value::Array(items) if items.len() == 2 => {
                let lon = items[0].as_f64()?;
                let lat = items[1].as_f64()?;
                Self::new(lat, lon)
            }
            _ => None,
        }
    }
}

/// Centre of the cell named by `hash`.
pub fn decode_geohash(hash: &str) -> Option<GeoPoint> {
    if hash.is_empty() {
        return None;
    }

    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for c in hash.bytes() {
        let c = c.to_ascii_lowercase();
        let index = GEOHASH_ALPHABET.iter().position(|&a| a == c)?;
        for bit in (0..5).rev() {
            let on = (index >> bit) & 1 == 1;
            let (lo, hi) = if even {
                (&mut lon_lo, &mut lon_hi)
            } else {
                (&mut lat_lo, &mut lat_hi)
            };
            let mid = (*lo + *hi) / 2.0;
            if on {
                *lo = mid;
            } else {
                *hi = mid;
            }
            even = !even;
        }
    }

    GeoPoint::new((lat_lo + lat_hi) / 2.0, (lon_lo + lon_hi) / 2.0)
}

/// Great-circle distance in metres.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Parse a distance such as `"1km"`, `"500m"` or `"2mi"` into metres.
///
/// A bare number is metres.
pub fn parse_distance(input: &str) -> Result<f64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| DododError::InvalidSearchRequest(format!("invalid distance '{}'", input)))?;
    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "m" | "meters" | "metres" => 1.0,
        "mm" | "millimeters" => 0.001,
        "cm" | "centimeters" => 0.01,
        "km" | "kilometers" | "kilometres" => 1_000.0,
        "mi" | "miles" => 1_609.344,
        "yd" | "yards" => 0.9144,
        "ft" | "feet" => 0.3048,
        "in" | "inch" => 0.0254,
        "nm" | "nauticalmiles" => 1_852.0,
        other => {
            return Err(DododError::InvalidSearchRequest(format!(
                "unknown distance unit '{}'",
                other
            )))
        }
    };

    if number < 0.0 {
        return Err(DododError::InvalidSearchRequest(format!(
            "negative distance '{}'",
            input
        )));
    }
    Ok(number * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_geohash() {
        let point = decode_geohash("wecpjc2b27ev").unwrap();
        assert!((point.lat - 22.331).abs() < 0.001, "lat {}", point.lat);
        assert!((point.lon - 114.160).abs() < 0.001, "lon {}", point.lon);

        assert!(decode_geohash("").is_none());
        assert!(decode_geohash("abc!").is_none());
    }

    #[test]
    fn test_point_formats() {
        let expected = GeoPoint::new(22.5, 114.1).unwrap();
        assert_eq!(GeoPoint::from_value(&json!("22.5,114.1")), Some(expected));
        assert_eq!(
            GeoPoint::from_value(&json!({"lat": 22.5, "lng": 114.1})),
            Some(expected)
        );
        assert_eq!(GeoPoint::from_value(&json!([114.1, 22.5])), Some(expected));
        assert_eq!(GeoPoint::from_value(&json!({"lat": 95.0, "lon": 0.0})), None);
        assert_eq!(GeoPoint::from_value(&json!(true)), None);
    }

    #[test]
    fn test_haversine() {
        let hong_kong = GeoPoint::new(22.3193, 114.1694).unwrap();
        let macau = GeoPoint::new(22.1987, 113.5439).unwrap();
        let distance = haversine_distance(hong_kong, macau);
        assert!((distance - 65_500.0).abs() < 2_000.0, "distance {}", distance);
        assert_eq!(haversine_distance(hong_kong, hong_kong), 0.0);
    }

    #[test]
    fn test_parse_distance() {
        assert_eq!(parse_distance("1km").unwrap(), 1_000.0);
        assert_eq!(parse_distance("250").unwrap(), 250.0);
        assert_eq!(parse_distance("2mi").unwrap(), 3_218.688);
        assert!(parse_distance("far").is_err());
        assert!(parse_distance("3 parsecs").is_err());
    }
}
