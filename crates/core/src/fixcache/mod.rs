//! The sliding-window fix cache and group index.
//!
//! The top-level `entities`/`groups` maps are copy-on-change, swapped in
//! atomically via `arc_swap::ArcSwap`; each map value is an
//! `Arc<parking_lot::RwLock<_>>` so per-entity and per-group state has a
//! genuine reader/writer lock that callers can hold across a read without
//! touching the top-level map at all.

mod entity_state;
mod group_state;

pub use entity_state::EntityState;
pub use group_state::GroupState;

use crate::error::{GeoError, Result};
use arc_swap::ArcSwap;
use geotracker_types::archive::ArchivalRecord;
use geotracker_types::fix::GeoFix;
use geotracker_types::ids::{EntityId, GroupId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// FixCache's lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Injected capability that receives every accepted fix for archival.
/// The archiver pipeline's buffer is the only implementation, but tests
/// can substitute a recording stub.
pub trait ArchiveSink: Send + Sync {
    fn submit(&self, record: ArchivalRecord);
}

/// An `ArchiveSink` that drops everything. Used when no archiver is wired up
/// (tests, or a node configured with `archiver = null`, whose own null-ness
/// is otherwise handled by the archiver pipeline itself — this exists purely
/// so `FixCache::new` never needs an `Option`).
pub struct NullSink;
impl ArchiveSink for NullSink {
    fn submit(&self, _record: ArchivalRecord) {}
}

type EntityMap = HashMap<EntityId, Arc<RwLock<EntityState>>>;
type GroupMap = HashMap<GroupId, Arc<RwLock<GroupState>>>;

#[derive(Debug, Default)]
pub struct FixCacheStats {
    pub too_old_rejections: AtomicU64,
    pub entity_count: AtomicU64,
    pub group_count: AtomicU64,
}

pub struct FixCache {
    entities: ArcSwap<EntityMap>,
    groups: ArcSwap<GroupMap>,
    top_level_write_lock: parking_lot::Mutex<()>,
    max_entity_fixes: usize,
    retention_interval: Duration,
    purge_interval: Duration,
    clock_skew_tolerance: Duration,
    archive_sink: Arc<dyn ArchiveSink>,
    state: RwLock<CacheState>,
    purge_stop: Arc<AtomicBool>,
    purge_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    pub stats: FixCacheStats,
}

impl FixCache {
    pub fn new(
        max_entity_fixes: usize,
        retention_interval: Duration,
        purge_interval: Duration,
        clock_skew_tolerance: Duration,
        archive_sink: Arc<dyn ArchiveSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entities: ArcSwap::from_pointee(HashMap::new()),
            groups: ArcSwap::from_pointee(HashMap::new()),
            top_level_write_lock: parking_lot::Mutex::new(()),
            max_entity_fixes,
            retention_interval,
            purge_interval,
            clock_skew_tolerance,
            archive_sink,
            state: RwLock::new(CacheState::Created),
            purge_stop: Arc::new(AtomicBool::new(false)),
            purge_handle: parking_lot::Mutex::new(None),
            stats: FixCacheStats::default(),
        })
    }

    pub fn state(&self) -> CacheState {
        *self.state.read()
    }

    /// Spawns the purge timer task. Idempotent: calling `start` twice is a
    /// no-op on the second call.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.write();
        if *state != CacheState::Created {
            return;
        }
        *state = CacheState::Running;
        drop(state);

        let cache = Arc::clone(self);
        let stop = Arc::clone(&self.purge_stop);
        let interval = self.purge_interval;
        let handle = std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                cache.purge();
            }
        });
        *self.purge_handle.lock() = Some(handle);
    }

    /// Cancels the purge task and transitions to `Stopped`. All public
    /// operations fail fast once stopping begins.
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state == CacheState::Stopped || *state == CacheState::Stopping {
                return;
            }
            *state = CacheState::Stopping;
        }
        self.purge_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.purge_handle.lock().take() {
            let _ = handle.join();
        }
        *self.state.write() = CacheState::Stopped;
    }

    fn ensure_running(&self) -> Result<()> {
        match *self.state.read() {
            CacheState::Stopping | CacheState::Stopped => {
                Err(GeoError::Fatal("fix cache is not running".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Rewrites `fix.time_utc`, rejects too-old fixes, inserts into the
    /// entity ring, and updates group membership. Fires the fix to the
    /// archiver sink on success, regardless of group membership.
    pub fn add(&self, entity_id: EntityId, group_id: Option<GroupId>, mut fix: GeoFix) -> Result<()> {
        self.ensure_running()?;
        if !fix.has_valid_coordinates() {
            return Err(GeoError::validation(format!(
                "invalid coordinates: latitude={}, longitude={}",
                fix.latitude, fix.longitude
            )));
        }

        let now = SystemTime::now();
        // Any future-dated fix is clamped to `now` (§8: "the stored
        // f.timeUtc ≈ now, within 1s"). `clock_skew_tolerance` no longer
        // gates *whether* to clamp — it only distinguishes ordinary clock
        // drift from a fix so far ahead it's worth a log line.
        if fix.time_utc > now {
            if fix.time_utc > now + self.clock_skew_tolerance {
                tracing::debug!("fix time is beyond clock skew tolerance, clamping to now");
            }
            fix.time_utc = now;
        }
        let Some(cutoff) = now.checked_sub(self.retention_interval) else {
            fix.time_utc = now;
            return self.insert_accepted(entity_id, group_id, fix, now);
        };
        if fix.time_utc < cutoff {
            self.stats.too_old_rejections.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        self.insert_accepted(entity_id, group_id, fix, now)
    }

    fn insert_accepted(
        &self,
        entity_id: EntityId,
        group_id: Option<GroupId>,
        fix: GeoFix,
        fix_time: SystemTime,
    ) -> Result<()> {
        let entity_lock = self.entity_slot(&entity_id);
        {
            let mut entity = entity_lock.write();
            entity.insert_fix(fix.clone(), self.max_entity_fixes);
            if let Some(ref group) = group_id {
                entity.record_group_membership(group.clone(), fix.time_utc);
            }
        }

        if let Some(group) = group_id.clone() {
            let group_lock = self.group_slot(&group);
            group_lock.write().insert(entity_id.clone());
        }

        self.archive_sink.submit(ArchivalRecord {
            entity_id,
            group_id,
            fix,
        });
        let _ = fix_time;
        Ok(())
    }

    /// Returns the per-entity lock, inserting a fresh empty entity if absent.
    /// This is the only path that may trigger a top-level swap; once the
    /// entity exists, every subsequent `add` for it only takes the
    /// per-entity lock.
    fn entity_slot(&self, entity_id: &EntityId) -> Arc<RwLock<EntityState>> {
        if let Some(existing) = self.entities.load().get(entity_id) {
            return Arc::clone(existing);
        }
        let _guard = self.top_level_write_lock.lock();
        let current = self.entities.load();
        if let Some(existing) = current.get(entity_id) {
            return Arc::clone(existing);
        }
        let mut next: EntityMap = (**current).clone();
        let slot = Arc::new(RwLock::new(EntityState::new()));
        next.insert(entity_id.clone(), Arc::clone(&slot));
        self.stats.entity_count.store(next.len() as u64, Ordering::Relaxed);
        self.entities.store(Arc::new(next));
        slot
    }

    fn group_slot(&self, group_id: &GroupId) -> Arc<RwLock<GroupState>> {
        if let Some(existing) = self.groups.load().get(group_id) {
            return Arc::clone(existing);
        }
        let _guard = self.top_level_write_lock.lock();
        let current = self.groups.load();
        if let Some(existing) = current.get(group_id) {
            return Arc::clone(existing);
        }
        let mut next: GroupMap = (**current).clone();
        let slot = Arc::new(RwLock::new(GroupState::new()));
        next.insert(group_id.clone(), Arc::clone(&slot));
        self.stats.group_count.store(next.len() as u64, Ordering::Relaxed);
        self.groups.store(Arc::new(next));
        slot
    }

    pub fn get_current_fix(&self, entity_id: &EntityId) -> Option<GeoFix> {
        let entities = self.entities.load();
        let lock = entities.get(entity_id)?;
        lock.read().current_fix().cloned()
    }

    /// `None` if the entity is unknown on this node.
    pub fn get_fixes(&self, entity_id: &EntityId) -> Option<Vec<GeoFix>> {
        let entities = self.entities.load();
        let lock = entities.get(entity_id)?;
        Some(lock.read().fixes().cloned().collect())
    }

    pub fn get_group_entities(&self, group_id: &GroupId) -> Vec<EntityId> {
        let groups = self.groups.load();
        match groups.get(group_id) {
            Some(lock) => lock.read().members().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn get_group_current_fixes(&self, group_id: &GroupId) -> Vec<(EntityId, GeoFix)> {
        let members = self.get_group_entities(group_id);
        let entities = self.entities.load();
        members
            .into_iter()
            .filter_map(|id| {
                let fix = entities.get(&id)?.read().current_fix().cloned()?;
                Some((id, fix))
            })
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.load().len()
    }

    /// Every entity's current fix, for queries that have no narrower filter
    /// to start from (an unfiltered heat-map query). Entities with no stored
    /// fix are omitted.
    pub fn all_current_fixes(&self) -> Vec<(EntityId, GeoFix)> {
        self.entities
            .load()
            .iter()
            .filter_map(|(id, lock)| Some((id.clone(), lock.read().current_fix().cloned()?)))
            .collect()
    }

    /// Every entity's full retained history, for heat-map queries: every fix
    /// still held locally contributes a count, not just the current one.
    pub fn all_fixes(&self) -> Vec<(EntityId, Vec<GeoFix>)> {
        self.entities
            .load()
            .iter()
            .map(|(id, lock)| (id.clone(), lock.read().fixes().cloned().collect()))
            .collect()
    }

    /// Full retained history for every current member of `group_id`; empty
    /// if the group is unknown.
    pub fn group_fixes(&self, group_id: &GroupId) -> Vec<(EntityId, Vec<GeoFix>)> {
        let members = self.get_group_entities(group_id);
        let entities = self.entities.load();
        members
            .into_iter()
            .filter_map(|id| {
                let lock = entities.get(&id)?;
                Some((id, lock.read().fixes().cloned().collect()))
            })
            .collect()
    }

    /// Removes fixes older than `now - retention_interval`; drops empty
    /// entities; drops groups left with no members. Acquires the top-level
    /// write lock only briefly, to install the new maps once per call.
    pub fn purge(&self) {
        let Some(cutoff) = SystemTime::now().checked_sub(self.retention_interval) else {
            return;
        };

        let mut emptied_entities = Vec::new();
        let current_entities = self.entities.load();
        for (id, lock) in current_entities.iter() {
            let is_empty = lock.write().purge_older_than(cutoff);
            if is_empty {
                emptied_entities.push(id.clone());
            }
        }

        let mut stale_groups = Vec::new();
        let current_groups = self.groups.load();
        for (gid, lock) in current_groups.iter() {
            let mut group = lock.write();
            let members: Vec<_> = group.members().cloned().collect();
            for id in members {
                let still_member = current_entities
                    .get(&id)
                    .is_some_and(|entity_lock| entity_lock.read().is_member_of(gid));
                if !still_member {
                    group.remove(&id);
                }
            }
            if group.is_empty() {
                stale_groups.push(gid.clone());
            }
        }

        if emptied_entities.is_empty() && stale_groups.is_empty() {
            return;
        }

        let _guard = self.top_level_write_lock.lock();
        if !emptied_entities.is_empty() {
            let current = self.entities.load();
            let mut next: EntityMap = (**current).clone();
            for id in &emptied_entities {
                next.remove(id);
            }
            self.stats.entity_count.store(next.len() as u64, Ordering::Relaxed);
            self.entities.store(Arc::new(next));
        }
        if !stale_groups.is_empty() {
            let current = self.groups.load();
            let mut next: GroupMap = (**current).clone();
            for gid in &stale_groups {
                next.remove(gid);
            }
            self.stats.group_count.store(next.len() as u64, Ordering::Relaxed);
            self.groups.store(Arc::new(next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> Arc<FixCache> {
        FixCache::new(
            4,
            Duration::from_secs(3600),
            Duration::from_secs(60),
            Duration::from_secs(5),
            Arc::new(NullSink),
        )
    }

    fn fix(lat: f64, lon: f64) -> GeoFix {
        GeoFix::new(SystemTime::now(), lat, lon)
    }

    #[test]
    fn single_submit_single_query() {
        let cache = cache();
        cache.start();
        let jeff = EntityId::new("jeff").unwrap();
        cache.add(jeff.clone(), None, fix(10.0, 20.0)).unwrap();

        let current = cache.get_current_fix(&jeff).unwrap();
        assert_eq!(current.latitude, 10.0);
        assert_eq!(current.longitude, 20.0);

        let upper = EntityId::new("JEFF").unwrap();
        assert!(cache.get_current_fix(&upper).is_none());
        cache.stop();
    }

    #[test]
    fn group_membership_case_insensitive() {
        let cache = cache();
        cache.start();
        let jeff = EntityId::new("jeff").unwrap();
        let bob = EntityId::new("bob").unwrap();
        let family = GroupId::canon("Lill-Family").unwrap();
        cache.add(jeff.clone(), Some(family.clone()), fix(20.0, 30.0)).unwrap();
        cache.add(bob.clone(), Some(family), fix(40.0, 50.0)).unwrap();

        let lower = GroupId::canon("lill-family").unwrap();
        let mut members = cache.get_group_entities(&lower);
        members.sort();
        assert_eq!(members, vec![bob, jeff]);

        let other = GroupId::canon("other").unwrap();
        assert!(cache.get_group_entities(&other).is_empty());
        cache.stop();
    }

    #[test]
    fn retention_purge_removes_old_fixes() {
        // Mirrors scenario 3: retentionInterval = 1s, a fix submitted now and
        // another 1.2s later; after purge only the newer one survives.
        let cache = FixCache::new(
            10,
            Duration::from_secs(1),
            Duration::from_secs(3600),
            Duration::from_secs(5),
            Arc::new(NullSink),
        );
        let entity = EntityId::new("e1").unwrap();
        cache.start();
        cache.add(entity.clone(), None, fix(1.0, 1.0)).unwrap();
        std::thread::sleep(Duration::from_millis(1200));
        cache.add(entity.clone(), None, fix(2.0, 2.0)).unwrap();
        cache.purge();
        let fixes = cache.get_fixes(&entity).unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].latitude, 2.0);
        cache.stop();
    }

    #[test]
    fn invalid_coordinates_are_rejected_without_state_change() {
        let cache = cache();
        cache.start();
        let entity = EntityId::new("e1").unwrap();
        let err = cache.add(entity.clone(), None, fix(95.0, 20.0)).unwrap_err();
        assert!(matches!(err, GeoError::Validation(_)));
        assert!(cache.get_current_fix(&entity).is_none());
        cache.stop();
    }

    #[test]
    fn future_dated_fix_is_clamped_to_now_within_one_second() {
        let cache = cache();
        cache.start();
        let entity = EntityId::new("e1").unwrap();
        let mut future = fix(1.0, 1.0);
        future.time_utc = SystemTime::now() + Duration::from_secs(2);
        cache.add(entity.clone(), None, future).unwrap();

        let stored = cache.get_current_fix(&entity).unwrap();
        let diff = stored
            .time_utc
            .duration_since(SystemTime::now())
            .unwrap_or_else(|e| e.duration());
        assert!(diff < Duration::from_secs(1), "expected stored time within 1s of now, got diff {diff:?}");
        cache.stop();
    }

    #[test]
    fn stopped_cache_rejects_writes() {
        let cache = cache();
        cache.start();
        cache.stop();
        let entity = EntityId::new("e1").unwrap();
        assert!(cache.add(entity, None, fix(1.0, 1.0)).is_err());
    }

    #[test]
    fn max_entity_fixes_one_retains_latest() {
        let cache = FixCache::new(
            1,
            Duration::from_secs(3600),
            Duration::from_secs(60),
            Duration::from_secs(5),
            Arc::new(NullSink),
        );
        cache.start();
        let entity = EntityId::new("e1").unwrap();
        cache.add(entity.clone(), None, fix(1.0, 1.0)).unwrap();
        cache.add(entity.clone(), None, fix(2.0, 2.0)).unwrap();
        let fixes = cache.get_fixes(&entity).unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].latitude, 2.0);
        cache.stop();
    }
}
