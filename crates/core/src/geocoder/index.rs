use geotracker_types::geocode::{IpGeoRecord, IpRange};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub const MAGIC: [u8; 4] = *b"GTGF";
pub const FORMAT_VERSION: u16 = 1;

/// On-disk header preceding the range table and record table: magic, format
/// version, record count, and the source's `Last-Modified` timestamp, which
/// becomes this file's mtime once installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoFileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub record_count: u32,
    pub last_modified_unix_secs: u64,
}

/// The parsed, in-memory form of a geocode data file: a binary-searchable
/// range table plus the record table it indexes into. Immutable once built;
/// `IpGeocoder` swaps the whole thing wholesale via `ArcSwap`.
#[derive(Debug, Clone, Default)]
pub struct GeoIndex {
    ranges: Vec<IpRange>,
    records: Vec<IpGeoRecord>,
    pub last_modified: Option<SystemTime>,
}

impl GeoIndex {
    pub fn from_sorted(ranges: Vec<IpRange>, records: Vec<IpGeoRecord>, last_modified: SystemTime) -> Self {
        debug_assert!(
            ranges.windows(2).all(|w| w[0].range_start <= w[1].range_start),
            "range table must be sorted by range_start"
        );
        Self { ranges, records, last_modified: Some(last_modified) }
    }

    /// Binary search on `range_start`, then a bounds check against
    /// `range_end` for the candidate range.
    pub fn lookup(&self, addr: u32) -> Option<&IpGeoRecord> {
        let idx = match self.ranges.binary_search_by(|r| r.range_start.cmp(&addr)) {
            Ok(exact) => exact,
            Err(0) => return None,
            Err(insert_at) => insert_at - 1,
        };
        let range = self.ranges.get(idx)?;
        if addr >= range.range_start && addr <= range.range_end {
            self.records.get(range.record_index as usize)
        } else {
            None
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let header = GeoFileHeader {
            magic: MAGIC,
            version: FORMAT_VERSION,
            record_count: self.records.len() as u32,
            last_modified_unix_secs: self
                .last_modified
                .unwrap_or(std::time::UNIX_EPOCH)
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };
        let mut out = bincode::serialize(&header).expect("header serialization cannot fail");
        out.extend(bincode::serialize(&self.ranges).expect("range table serialization cannot fail"));
        out.extend(bincode::serialize(&self.records).expect("record table serialization cannot fail"));
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let mut cursor = std::io::Cursor::new(bytes);
        let header: GeoFileHeader =
            bincode::deserialize_from(&mut cursor).map_err(|e| format!("corrupt header: {e}"))?;
        if header.magic != MAGIC {
            return Err("bad magic".to_string());
        }
        if header.version != FORMAT_VERSION {
            return Err(format!("unsupported format version {}", header.version));
        }
        let ranges: Vec<IpRange> =
            bincode::deserialize_from(&mut cursor).map_err(|e| format!("corrupt range table: {e}"))?;
        let records: Vec<IpGeoRecord> =
            bincode::deserialize_from(&mut cursor).map_err(|e| format!("corrupt record table: {e}"))?;
        if records.len() != header.record_count as usize {
            return Err("record count mismatch".to_string());
        }
        let last_modified =
            std::time::UNIX_EPOCH + std::time::Duration::from_secs(header.last_modified_unix_secs);
        Ok(Self { ranges, records, last_modified: Some(last_modified) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GeoIndex {
        let ranges = vec![
            IpRange { range_start: 100, range_end: 200, record_index: 0 },
            IpRange { range_start: 300, range_end: 400, record_index: 1 },
        ];
        let records = vec![
            IpGeoRecord { latitude: 37.4192, longitude: -122.0574, country: Some("US".into()), region: None, city: None },
            IpGeoRecord { latitude: 10.0, longitude: 20.0, country: None, region: None, city: None },
        ];
        GeoIndex::from_sorted(ranges, records, SystemTime::now())
    }

    #[test]
    fn finds_address_within_range() {
        let index = sample();
        let record = index.lookup(150).unwrap();
        assert_eq!(record.country.as_deref(), Some("US"));
    }

    #[test]
    fn misses_address_between_ranges() {
        let index = sample();
        assert!(index.lookup(250).is_none());
        assert!(index.lookup(50).is_none());
        assert!(index.lookup(10_000).is_none());
    }

    #[test]
    fn encode_decode_round_trip() {
        let index = sample();
        let bytes = index.encode();
        let decoded = GeoIndex::decode(&bytes).unwrap();
        assert_eq!(decoded.record_count(), 2);
        assert_eq!(decoded.lookup(350).unwrap().latitude, 10.0);
    }
}
