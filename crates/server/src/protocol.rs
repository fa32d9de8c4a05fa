//! Client-facing RPC surface: a `#[tarpc::service]` trait with one
//! `async fn` per RPC, each returning `Result<T, String>` so the internal
//! error type is flattened at the RPC boundary.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::SystemTime;

/// Wire form of a [`geotracker_types::fix::GeoFix`] submission; identical to
/// the core type, just named here so the service trait's signature doesn't
/// need to reach into `geotracker-types` conditionally.
pub use geotracker_types::fix::GeoFix;

/// Field projection bitset for entity/group queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixFieldsDto {
    pub altitude: bool,
    pub course: bool,
    pub speed: bool,
    pub accuracy: bool,
    pub technology: bool,
    pub network_status: bool,
}

impl Default for FixFieldsDto {
    fn default() -> Self {
        Self {
            altitude: true,
            course: true,
            speed: true,
            accuracy: true,
            technology: true,
            network_status: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityQueryOptions {
    pub fix_count: usize,
    pub min_fix_time_utc: Option<SystemTime>,
    pub fields: FixFieldsDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupQueryOptions {
    pub min_fix_time_utc: Option<SystemTime>,
    pub per_entity_fix_count: Option<usize>,
    pub fields: FixFieldsDto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionUnit {
    Miles,
    Kilometres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapQueryOptions {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub resolution: f64,
    pub resolution_unit: ResolutionUnit,
    pub group_filter: Option<String>,
    pub min_fix_time_utc: Option<SystemTime>,
    pub max_fix_time_utc: Option<SystemTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapGridDto {
    pub rows: usize,
    pub cols: usize,
    pub cell_width: f64,
    pub cell_height: f64,
    pub counts: Vec<u64>,
    pub incomplete: bool,
}

/// The client-facing GeoTracker node service.
#[tarpc::service]
pub trait GeoTrackerService {
    /// `submitFix(entityID, groupID?, fixes[])`. Routes to the entity's
    /// owning node (possibly this one); fans out nothing.
    async fn submit_fix(
        entity_id: String,
        group_id: Option<String>,
        fixes: Vec<GeoFix>,
    ) -> Result<(), String>;

    /// `entityQuery(entityID, options)`. Fans out to every cluster member
    /// until one replies (the owner) or the deadline elapses.
    async fn entity_query(entity_id: String, options: EntityQueryOptions) -> Result<Vec<GeoFix>, String>;

    /// `groupQuery(groupID, options)`. Fans out to every member; merges
    /// per-entity results.
    async fn group_query(
        group_id: String,
        options: GroupQueryOptions,
    ) -> Result<Vec<(String, Vec<GeoFix>)>, String>;

    /// `heatmapQuery(options)`. Fans out to every member; sums grids
    /// cell-wise.
    async fn heatmap_query(options: HeatmapQueryOptions) -> Result<HeatmapGridDto, String>;

    /// `ipToGeoFix(ipv4)`. Purely local to whichever node receives it; no
    /// fan-out. `Ok(None)` for a private address or an unindexed public
    /// one; `Err("not-available")` when the geocoder is disabled.
    async fn ip_to_geo_fix(addr: Ipv4Addr) -> Result<Option<GeoFix>, String>;
}
