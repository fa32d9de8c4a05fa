use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Positioning technology that produced a [`GeoFix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    #[default]
    Unknown,
    Gps,
    Cell,
    Wifi,
    Ip,
    Manual,
}

/// Network transport in effect when a [`GeoFix`] was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    #[default]
    Unknown,
    Wifi,
    Cdma,
    Gsm,
    Lte,
    Ethernet,
}

/// A single timestamped location observation.
///
/// `time_utc` is rewritten by [`crate::ids`] consumers (the fix cache, not
/// this type) when it is missing, in the future, or too old; this struct
/// itself performs no clamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub time_utc: SystemTime,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub course: Option<f64>,
    pub speed: Option<f64>,
    pub horizontal_accuracy: Option<f64>,
    pub vertical_accuracy: Option<f64>,
    pub technology: Technology,
    pub network_status: NetworkStatus,
}

impl GeoFix {
    pub fn new(time_utc: SystemTime, latitude: f64, longitude: f64) -> Self {
        Self {
            time_utc,
            latitude,
            longitude,
            altitude: None,
            course: None,
            speed: None,
            horizontal_accuracy: None,
            vertical_accuracy: None,
            technology: Technology::Unknown,
            network_status: NetworkStatus::Unknown,
        }
    }

    /// `-90..=90` for latitude, `-180..=180` for longitude.
    pub fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_coordinates() {
        let fix = GeoFix::new(SystemTime::now(), 95.0, 20.0);
        assert!(!fix.has_valid_coordinates());
        let fix = GeoFix::new(SystemTime::now(), 10.0, -200.0);
        assert!(!fix.has_valid_coordinates());
    }

    #[test]
    fn accepts_boundary_coordinates() {
        let fix = GeoFix::new(SystemTime::now(), 90.0, 180.0);
        assert!(fix.has_valid_coordinates());
        let fix = GeoFix::new(SystemTime::now(), -90.0, -180.0);
        assert!(fix.has_valid_coordinates());
    }

    #[test]
    fn technology_round_trips_through_json() {
        let json = serde_json::to_string(&Technology::Gps).unwrap();
        assert_eq!(json, "\"gps\"");
        let back: Technology = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Technology::Gps);
    }
}
