use serde::{Deserialize, Serialize};

/// A compact, file-backed IPv4 geocode record: a lat/lon pair plus optional
/// coarse textual location. The core exposes `country`/`region`/`city` but
/// never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpGeoRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// One row of the on-disk range table: `[range_start, range_end]` (inclusive,
/// as `u32` big-endian IPv4 addresses) maps to `record_index` into the
/// record table. Sorted by `range_start` for binary search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub range_start: u32,
    pub range_end: u32,
    pub record_index: u32,
}
