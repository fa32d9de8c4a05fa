use geo::Rect;
use serde::{Deserialize, Serialize};

/// An axis-aligned lat/lon rectangle used by heat-map queries.
///
/// Wraps `geo::Rect` with the antimeridian check the heat-map query contract
/// requires: bounds that would wrap from +180 to -180 longitude are rejected
/// rather than silently misinterpreted (see the design notes' open-questions
/// resolution).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl MapBounds {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }

    /// Rejects bounds that cross the antimeridian (`min_lon > max_lon`) or
    /// are otherwise degenerate.
    pub fn validate(&self) -> Result<(), String> {
        if !(-180.0..=180.0).contains(&self.min_lon) || !(-180.0..=180.0).contains(&self.max_lon) {
            return Err("longitude out of range".to_string());
        }
        if !(-90.0..=90.0).contains(&self.min_lat) || !(-90.0..=90.0).contains(&self.max_lat) {
            return Err("latitude out of range".to_string());
        }
        if self.min_lon > self.max_lon {
            return Err("map bounds must not cross the antimeridian".to_string());
        }
        if self.min_lat > self.max_lat {
            return Err("min_lat must not exceed max_lat".to_string());
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn to_rect(self) -> Rect {
        Rect::new(
            geo::coord! { x: self.min_lon, y: self.min_lat },
            geo::coord! { x: self.max_lon, y: self.max_lat },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_antimeridian_crossing_bounds() {
        let bounds = MapBounds::new(170.0, -10.0, -170.0, 10.0);
        assert!(bounds.validate().is_err());
    }

    #[test]
    fn accepts_ordinary_bounds() {
        let bounds = MapBounds::new(-74.05, 40.68, -73.9, 40.88);
        assert!(bounds.validate().is_ok());
        assert!(bounds.contains(40.75, -74.0));
        assert!(!bounds.contains(41.0, -74.0));
    }
}
