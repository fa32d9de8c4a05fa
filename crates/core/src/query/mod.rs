//! Entity-history, heat-map and group queries over a single node's
//! [`FixCache`]. Fan-out across cluster members and cell-wise summation of
//! the resulting grids is `geotracker-server`'s job; this module only
//! computes the local contribution.

use crate::error::{GeoError, Result};
use crate::fixcache::FixCache;
use geotracker_types::bounds::MapBounds;
use geotracker_types::fix::GeoFix;
use geotracker_types::heatmap::HeatmapGrid;
use geotracker_types::ids::{EntityId, GroupId};
use std::time::SystemTime;

const MILES_TO_KM: f64 = 1.609344;

/// A field projection bitset for entity-history queries. Each flag controls
/// whether that field of a [`GeoFix`] survives projection; `timeUtc`,
/// `latitude` and `longitude` are always included since a fix without them
/// is meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixFields {
    pub altitude: bool,
    pub course: bool,
    pub speed: bool,
    pub accuracy: bool,
    pub technology: bool,
    pub network_status: bool,
}

impl FixFields {
    pub const ALL: Self = Self {
        altitude: true,
        course: true,
        speed: true,
        accuracy: true,
        technology: true,
        network_status: true,
    };

    pub const NONE: Self = Self {
        altitude: false,
        course: false,
        speed: false,
        accuracy: false,
        technology: false,
        network_status: false,
    };

    fn project(&self, mut fix: GeoFix) -> GeoFix {
        if !self.altitude {
            fix.altitude = None;
        }
        if !self.course {
            fix.course = None;
        }
        if !self.speed {
            fix.speed = None;
        }
        if !self.accuracy {
            fix.horizontal_accuracy = None;
            fix.vertical_accuracy = None;
        }
        if !self.technology {
            fix.technology = Default::default();
        }
        if !self.network_status {
            fix.network_status = Default::default();
        }
        fix
    }
}

/// Parameters for an entity-history query.
pub struct EntityQuery {
    pub entity_id: EntityId,
    pub fix_count: usize,
    pub min_fix_time_utc: Option<SystemTime>,
    pub fields: FixFields,
}

/// Newest-first, `timeUtc >= minFixTimeUtc`, truncated to `fixCount`, then
/// projected per `fields`. `not-found` if the entity is unknown on this node
/// — the caller (the cluster router) is responsible for retrying the owning
/// node before surfacing `not-found` to the client.
pub fn entity_query(cache: &FixCache, query: &EntityQuery) -> Result<Vec<GeoFix>> {
    if query.fix_count == 0 {
        return Err(GeoError::validation("fixCount must be at least 1"));
    }
    let fixes = cache
        .get_fixes(&query.entity_id)
        .ok_or_else(|| GeoError::NotFound(query.entity_id.to_string()))?;

    // `FixCache::get_fixes` already returns newest-first order (the ring's
    // iteration order), so no reversal is needed here.
    let mut newest_first: Vec<GeoFix> = fixes;
    if let Some(min_time) = query.min_fix_time_utc {
        newest_first.retain(|f| f.time_utc >= min_time);
    }
    newest_first.truncate(query.fix_count);
    Ok(newest_first.into_iter().map(|f| query.fields.project(f)).collect())
}

/// Parameters for a group query; `per_entity_fix_count` defaults to 1
/// (current fix only) when absent.
pub struct GroupQuery {
    pub group_id: GroupId,
    pub min_fix_time_utc: Option<SystemTime>,
    pub per_entity_fix_count: Option<usize>,
    pub fields: FixFields,
}

/// Per-entity history lists for every member of a group. An empty or
/// entirely-unknown group yields an empty map, never an error.
pub fn group_query(cache: &FixCache, query: &GroupQuery) -> Vec<(EntityId, Vec<GeoFix>)> {
    let fix_count = query.per_entity_fix_count.unwrap_or(1).max(1);
    let members = cache.get_group_entities(&query.group_id);
    members
        .into_iter()
        .filter_map(|entity_id| {
            let entity_query = EntityQuery {
                entity_id: entity_id.clone(),
                fix_count,
                min_fix_time_utc: query.min_fix_time_utc,
                fields: query.fields,
            };
            entity_query(cache, &entity_query).ok().map(|fixes| (entity_id, fixes))
        })
        .collect()
}

/// Parameters for a heat-map query. `resolution_km` is the caller-converted
/// cell size; callers that accept miles convert with `MILES_TO_KM` before
/// building this struct.
pub struct HeatmapQuery {
    pub bounds: MapBounds,
    pub resolution_km: f64,
    pub group_filter: Option<GroupId>,
    pub min_fix_time_utc: Option<SystemTime>,
    pub max_fix_time_utc: Option<SystemTime>,
}

/// Converts a resolution given in miles to kilometres (`1 mi ≈ 1.609344 km`).
pub fn miles_to_km(miles: f64) -> f64 {
    miles * MILES_TO_KM
}

/// Degrees of latitude per kilometre; a fixed approximation (not
/// geodesic-exact) adequate for heat-map cell sizing.
const KM_PER_DEGREE_LAT: f64 = 111.32;

/// This node's contribution to a fan-out heat-map query: every current fix
/// held locally that falls within `bounds` and passes the group/time
/// filters increments its cell by one. Grid dimensions are
/// `ceil(width/cellWidth) x ceil(height/cellHeight)`, in degrees converted
/// from `resolution_km` via a fixed km-per-degree-latitude approximation so
/// every node computes identically-shaped grids regardless of local
/// latitude (required for the coordinator's cell-wise sum to be valid).
pub fn heatmap_query(cache: &FixCache, query: &HeatmapQuery) -> Result<HeatmapGrid> {
    query.bounds.validate().map_err(GeoError::validation)?;

    let cell_degrees = (query.resolution_km / KM_PER_DEGREE_LAT).max(f64::EPSILON);
    let cols = (query.bounds.width() / cell_degrees).ceil().max(1.0) as usize;
    let rows = (query.bounds.height() / cell_degrees).ceil().max(1.0) as usize;
    let mut grid = HeatmapGrid::empty(query.bounds, rows, cols, cell_degrees, cell_degrees);

    let candidates: Vec<(EntityId, Vec<GeoFix>)> = match &query.group_filter {
        Some(group_id) => cache.group_fixes(group_id),
        None => cache.all_fixes(),
    };

    for (_entity_id, fix) in candidates.into_iter().flat_map(|(id, fixes)| fixes.into_iter().map(move |f| (id.clone(), f))) {
        if let Some(min_time) = query.min_fix_time_utc {
            if fix.time_utc < min_time {
                continue;
            }
        }
        if let Some(max_time) = query.max_fix_time_utc {
            if fix.time_utc > max_time {
                continue;
            }
        }
        if !query.bounds.contains(fix.latitude, fix.longitude) {
            continue;
        }
        let col = ((fix.longitude - query.bounds.min_lon) / cell_degrees) as usize;
        let row = ((fix.latitude - query.bounds.min_lat) / cell_degrees) as usize;
        let col = col.min(grid.cols - 1);
        let row = row.min(grid.rows - 1);
        let idx = grid.cell_index(row, col);
        grid.counts[idx] += 1;
    }

    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixcache::NullSink;
    use std::sync::Arc;
    use std::time::Duration;

    fn cache() -> Arc<FixCache> {
        let cache = FixCache::new(
            8,
            Duration::from_secs(3600),
            Duration::from_secs(60),
            Duration::from_secs(5),
            Arc::new(NullSink),
        );
        cache.start();
        cache
    }

    #[test]
    fn entity_query_is_newest_first_and_truncated() {
        let cache = cache();
        let jeff = EntityId::new("jeff").unwrap();
        for (lat, lon) in [(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)] {
            cache.add(jeff.clone(), None, GeoFix::new(SystemTime::now(), lat, lon)).unwrap();
        }
        let result = entity_query(
            &cache,
            &EntityQuery { entity_id: jeff, fix_count: 2, min_fix_time_utc: None, fields: FixFields::ALL },
        )
        .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].latitude, 3.0);
        assert_eq!(result[1].latitude, 2.0);
        cache.stop();
    }

    #[test]
    fn entity_query_rejects_unknown_entity() {
        let cache = cache();
        let ghost = EntityId::new("ghost").unwrap();
        let err = entity_query(
            &cache,
            &EntityQuery { entity_id: ghost, fix_count: 1, min_fix_time_utc: None, fields: FixFields::ALL },
        )
        .unwrap_err();
        assert!(matches!(err, GeoError::NotFound(_)));
        cache.stop();
    }

    #[test]
    fn entity_query_rejects_zero_fix_count() {
        let cache = cache();
        let jeff = EntityId::new("jeff").unwrap();
        cache.add(jeff.clone(), None, GeoFix::new(SystemTime::now(), 1.0, 1.0)).unwrap();
        let err = entity_query(
            &cache,
            &EntityQuery { entity_id: jeff, fix_count: 0, min_fix_time_utc: None, fields: FixFields::ALL },
        )
        .unwrap_err();
        assert!(matches!(err, GeoError::Validation(_)));
        cache.stop();
    }

    #[test]
    fn fix_fields_projection_drops_unrequested_fields() {
        let mut fix = GeoFix::new(SystemTime::now(), 1.0, 1.0);
        fix.altitude = Some(100.0);
        fix.speed = Some(5.0);
        let projected = FixFields::NONE.project(fix);
        assert!(projected.altitude.is_none());
        assert!(projected.speed.is_none());
    }

    #[test]
    fn group_query_on_empty_group_is_empty_not_error() {
        let cache = cache();
        let ghost_group = GroupId::canon("ghosts").unwrap();
        let result = group_query(
            &cache,
            &GroupQuery {
                group_id: ghost_group,
                min_fix_time_utc: None,
                per_entity_fix_count: None,
                fields: FixFields::ALL,
            },
        );
        assert!(result.is_empty());
        cache.stop();
    }

    #[test]
    fn heatmap_grid_counts_fixes_within_bounds() {
        let cache = cache();
        let jeff = EntityId::new("jeff").unwrap();
        let bob = EntityId::new("bob").unwrap();
        cache.add(jeff, None, GeoFix::new(SystemTime::now(), 40.7, -74.0)).unwrap();
        cache.add(bob, None, GeoFix::new(SystemTime::now(), 51.5, -0.1)).unwrap();

        let bounds = MapBounds::new(-75.0, 40.0, -73.0, 41.0);
        let grid = heatmap_query(
            &cache,
            &HeatmapQuery {
                bounds,
                resolution_km: 50.0,
                group_filter: None,
                min_fix_time_utc: None,
                max_fix_time_utc: None,
            },
        )
        .unwrap();
        assert_eq!(grid.total(), 1);
        cache.stop();
    }

    #[test]
    fn heatmap_rejects_antimeridian_crossing_bounds() {
        let cache = cache();
        let bounds = MapBounds::new(170.0, -10.0, -170.0, 10.0);
        let err = heatmap_query(
            &cache,
            &HeatmapQuery {
                bounds,
                resolution_km: 50.0,
                group_filter: None,
                min_fix_time_utc: None,
                max_fix_time_utc: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, GeoError::Validation(_)));
        cache.stop();
    }

    #[test]
    fn miles_to_km_conversion() {
        assert!((miles_to_km(1.0) - 1.609344).abs() < 1e-9);
    }
}
