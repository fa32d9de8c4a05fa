//! # geotracker-types
//!
//! Data-model and wire types shared across the GeoTracker workspace:
//!
//! - [`fix::GeoFix`], [`fix::Technology`], [`fix::NetworkStatus`] — a single
//!   timestamped location observation.
//! - [`ids::EntityId`], [`ids::GroupId`] — identifiers with the comparison
//!   rules the fix cache relies on (entity IDs case-sensitive, group IDs
//!   canonicalised case-insensitively).
//! - [`bounds::MapBounds`] — an axis-aligned lat/lon rectangle used by
//!   heat-map queries.
//! - [`heatmap::HeatmapGrid`] — a 2-D integer grid of fix counts.
//! - [`archive::ArchivalRecord`] — a fix plus its entity/group, handed to an
//!   archiver.
//! - [`geocode::IpGeoRecord`] — a compact IPv4-keyed geocode record.
//!
//! No business logic lives here; it belongs in `geotracker-core`.

pub mod archive;
pub mod bounds;
pub mod fix;
pub mod geocode;
pub mod heatmap;
pub mod ids;

pub mod prelude {
    pub use crate::archive::ArchivalRecord;
    pub use crate::bounds::MapBounds;
    pub use crate::fix::{GeoFix, NetworkStatus, Technology};
    pub use crate::geocode::IpGeoRecord;
    pub use crate::heatmap::HeatmapGrid;
    pub use crate::ids::{EntityId, GroupId};
}
