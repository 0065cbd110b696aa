//! Recovers structured coordinates from loosely-formatted location text.
//!
//! Coordinates supplied at creation time are authoritative and are also
//! serialized into the display string, so the legacy retrieval path can
//! recover them from text alone. Resolution failure is not an error: a
//! report without coordinates is "unmapped" and simply stays off the map.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::LatLng;

// Service region (Central NY) plus margin.
const LAT_MIN: f64 = 41.0;
const LAT_MAX: f64 = 46.0;
const LNG_MIN: f64 = -78.0;
const LNG_MAX: f64 = -73.0;

// Pattern 1: "Road Name (43.1234, -76.5678)" or "... (near 43.1234, -76.5678)"
static PAREN_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((?:near\s*)?(-?\d+\.?\d*),\s*(-?\d+\.?\d*)\)").unwrap());

// Pattern 2: the whole string is a bare "43.1234, -76.5678" pair.
static BARE_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+\.?\d*),\s*(-?\d+\.?\d*)$").unwrap());

// Pattern 3: any comma-separated decimal pair embedded in the string. Both
// numbers must carry a fractional part, so "Route 81" never matches.
static EMBEDDED_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-?\d{2,3}\.\d+),\s*(-?\d{2,3}\.\d+)").unwrap());

pub fn in_service_region(lat: f64, lng: f64) -> bool {
    (LAT_MIN..=LAT_MAX).contains(&lat) && (LNG_MIN..=LNG_MAX).contains(&lng)
}

fn captures_to_pair(caps: &regex::Captures<'_>) -> Option<(f64, f64)> {
    let lat = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let lng = caps.get(2)?.as_str().parse::<f64>().ok()?;
    Some((lat, lng))
}

/// Resolve a free-text location string into validated coordinates.
///
/// Patterns are tried in order; the first candidate that passes the
/// service-region check wins. Returns `None` when nothing usable is found.
pub fn resolve(text: &str) -> Option<LatLng> {
    if let Some(caps) = PAREN_PAIR.captures(text) {
        if let Some((lat, lng)) = captures_to_pair(&caps) {
            if in_service_region(lat, lng) {
                return Some(LatLng { lat, lng });
            }
        }
    }

    if let Some(caps) = BARE_PAIR.captures(text) {
        if let Some((lat, lng)) = captures_to_pair(&caps) {
            if in_service_region(lat, lng) {
                return Some(LatLng { lat, lng });
            }
        }
    }

    if let Some(caps) = EMBEDDED_PAIR.captures(text) {
        if let Some((mut lat, mut lng)) = captures_to_pair(&caps) {
            // Historically reversed input: a first number far below any
            // latitude paired with a positive second number is a swapped
            // (lng, lat) pair.
            if lat < -70.0 && lng > 0.0 {
                std::mem::swap(&mut lat, &mut lng);
            }
            if in_service_region(lat, lng) {
                return Some(LatLng { lat, lng });
            }
        }
    }

    None
}

/// Compose the stored display string for a new report so coordinates can be
/// recovered from it later.
pub fn compose_location_name(
    road_name: Option<&str>,
    location_name: Option<&str>,
    lat: f64,
    lng: f64,
) -> String {
    if let Some(road) = road_name {
        return format!("{road} ({lat}, {lng})");
    }
    if let Some(name) = location_name {
        // A name that already embeds the latitude keeps its original form.
        if name.contains(&lat.to_string()) {
            return name.to_string();
        }
        return format!("{name} ({lat}, {lng})");
    }
    format!("{lat}, {lng}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parenthesized_pair_resolves() {
        let loc = resolve("Main St (43.05, -76.15)").unwrap();
        assert_eq!(loc.lat, 43.05);
        assert_eq!(loc.lng, -76.15);
    }

    #[test]
    fn near_prefix_is_accepted() {
        let loc = resolve("I-81 ramp (near 43.1, -76.2)").unwrap();
        assert_eq!(loc.lat, 43.1);
    }

    #[test]
    fn bare_pair_resolves() {
        let loc = resolve("43.0481, -76.1474").unwrap();
        assert_eq!(loc.lng, -76.1474);
    }

    #[test]
    fn reversed_pair_is_corrected() {
        // Longitude first, latitude second: historically reversed input.
        let loc = resolve("-76.2, 43.1").unwrap();
        assert_eq!(loc.lat, 43.1);
        assert_eq!(loc.lng, -76.2);
    }

    #[test]
    fn out_of_region_pair_is_rejected() {
        assert!(resolve("Somewhere (51.5, -0.1)").is_none());
    }

    #[test]
    fn route_number_is_not_a_coordinate() {
        assert!(resolve("Route 81").is_none());
        assert!(resolve("Exit 36 off I-481").is_none());
    }

    #[test]
    fn no_coordinates_yields_none() {
        assert!(resolve("").is_none());
        assert!(resolve("Tully, south of the village").is_none());
    }

    #[test]
    fn embedded_pair_inside_longer_text() {
        let loc = resolve("slippery by 43.21, -76.05 heading north").unwrap();
        assert_eq!(loc.lat, 43.21);
    }

    #[test]
    fn compose_with_road_name() {
        let s = compose_location_name(Some("Main St"), None, 43.05, -76.15);
        assert_eq!(s, "Main St (43.05, -76.15)");
        assert_eq!(resolve(&s).unwrap().lat, 43.05);
    }

    #[test]
    fn compose_bare_when_unnamed() {
        let s = compose_location_name(None, None, 43.05, -76.15);
        assert_eq!(s, "43.05, -76.15");
        assert_eq!(resolve(&s).unwrap().lng, -76.15);
    }

    #[test]
    fn compose_keeps_name_that_already_embeds_coordinates() {
        let s = compose_location_name(None, Some("Rt 20 (42.9, -75.8)"), 42.9, -75.8);
        assert_eq!(s, "Rt 20 (42.9, -75.8)");
    }
}
