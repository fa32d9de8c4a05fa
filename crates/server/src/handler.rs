//! `GeoTrackerService` implementation: translates tarpc calls into
//! [`ClusterRouter`] operations and flattens [`GeoError`] to the wire
//! `String` the protocol trait uses.

use crate::cluster::ClusterRouter;
use crate::protocol::{
    EntityQueryOptions, FixFieldsDto, GeoFix, GeoTrackerService, GroupQueryOptions, HeatmapGridDto,
    HeatmapQueryOptions, ResolutionUnit,
};
use geotracker_core::query::{self, FixFields};
use geotracker_types::bounds::MapBounds;
use geotracker_types::ids::{EntityId, GroupId};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tarpc::context;

fn from_dto_fields(dto: FixFieldsDto) -> FixFields {
    FixFields {
        altitude: dto.altitude,
        course: dto.course,
        speed: dto.speed,
        accuracy: dto.accuracy,
        technology: dto.technology,
        network_status: dto.network_status,
    }
}

/// One clone per accepted client connection (tarpc requires `Clone`); all
/// clones share the same [`ClusterRouter`], so the cost is an `Arc` bump.
#[derive(Clone)]
pub struct Handler {
    router: Arc<ClusterRouter>,
}

impl Handler {
    pub fn new(router: Arc<ClusterRouter>) -> Self {
        Self { router }
    }
}

impl GeoTrackerService for Handler {
    async fn submit_fix(
        self,
        _: context::Context,
        entity_id: String,
        group_id: Option<String>,
        fixes: Vec<GeoFix>,
    ) -> Result<(), String> {
        let entity_id = EntityId::new(entity_id).ok_or("entityID must not be empty")?;
        let group_id = group_id.map(|g| GroupId::canon(&g).ok_or("groupID must not be empty")).transpose()?;
        self.router.submit(entity_id, group_id, fixes).await.map_err(|e| e.to_string())
    }

    async fn entity_query(
        self,
        _: context::Context,
        entity_id: String,
        options: EntityQueryOptions,
    ) -> Result<Vec<GeoFix>, String> {
        let entity_id = EntityId::new(entity_id).ok_or("entityID must not be empty")?;
        let query = query::EntityQuery {
            entity_id,
            fix_count: options.fix_count,
            min_fix_time_utc: options.min_fix_time_utc,
            fields: from_dto_fields(options.fields),
        };
        self.router.query_entity(query).await.map_err(|e| e.to_string())
    }

    async fn group_query(
        self,
        _: context::Context,
        group_id: String,
        options: GroupQueryOptions,
    ) -> Result<Vec<(String, Vec<GeoFix>)>, String> {
        let group_id = GroupId::canon(&group_id).ok_or("groupID must not be empty")?;
        let query = query::GroupQuery {
            group_id,
            min_fix_time_utc: options.min_fix_time_utc,
            per_entity_fix_count: options.per_entity_fix_count,
            fields: from_dto_fields(options.fields),
        };
        let result = self.router.query_group(query).await;
        Ok(result.into_iter().map(|(id, fixes)| (id.to_string(), fixes)).collect())
    }

    async fn heatmap_query(self, _: context::Context, options: HeatmapQueryOptions) -> Result<HeatmapGridDto, String> {
        let bounds = MapBounds::new(options.min_lon, options.min_lat, options.max_lon, options.max_lat);
        let resolution_km = match options.resolution_unit {
            ResolutionUnit::Kilometres => options.resolution,
            ResolutionUnit::Miles => query::miles_to_km(options.resolution),
        };
        let group_filter =
            options.group_filter.map(|g| GroupId::canon(&g).ok_or("groupID must not be empty")).transpose()?;
        let query = query::HeatmapQuery {
            bounds,
            resolution_km,
            group_filter,
            min_fix_time_utc: options.min_fix_time_utc,
            max_fix_time_utc: options.max_fix_time_utc,
        };
        let grid = self.router.query_heatmap(query).await.map_err(|e| e.to_string())?;
        Ok(HeatmapGridDto {
            rows: grid.rows,
            cols: grid.cols,
            cell_width: grid.cell_width,
            cell_height: grid.cell_height,
            counts: grid.counts,
            incomplete: grid.incomplete,
        })
    }

    async fn ip_to_geo_fix(self, _: context::Context, addr: Ipv4Addr) -> Result<Option<GeoFix>, String> {
        let geocoder = self.router.node().geocoder();
        if !geocoder.is_enabled() {
            return Err("not-available".to_string());
        }
        Ok(geocoder.lookup(addr))
    }
}
