use geotracker_types::fix::GeoFix;
use geotracker_types::ids::GroupId;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::SystemTime;

/// Per-entity state: a bounded, insertion-ordered ring of fixes kept sorted
/// newest-first, plus the set of groups this entity currently belongs to.
///
/// `fixes` is a plain `VecDeque` — `push_front`/`truncate` already gives a
/// bounded ring without any extra bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct EntityState {
    fixes: VecDeque<GeoFix>,
    /// canonical group id -> newest fix.time_utc observed while belonging to
    /// that group (the per-group watermark).
    group_memberships: HashMap<GroupId, SystemTime>,
}

impl EntityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `fix` in sorted-descending position and trims to
    /// `max_fixes`. Ties on `time_utc` are broken by arrival order: the
    /// later-arriving fix is stored first among equal timestamps.
    pub fn insert_fix(&mut self, fix: GeoFix, max_fixes: usize) {
        let pos = self
            .fixes
            .iter()
            .position(|existing| existing.time_utc <= fix.time_utc)
            .unwrap_or(self.fixes.len());
        self.fixes.insert(pos, fix);
        while self.fixes.len() > max_fixes {
            self.fixes.pop_back();
        }
    }

    pub fn current_fix(&self) -> Option<&GeoFix> {
        self.fixes.front()
    }

    pub fn fixes(&self) -> impl Iterator<Item = &GeoFix> {
        self.fixes.iter()
    }

    pub fn fix_count(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_sorted_newest_first(&self) -> bool {
        self.fixes.iter().is_sorted_by(|a, b| a.time_utc >= b.time_utc)
    }

    /// Updates the per-group watermark for `group` to
    /// `max(existing, fix_time)`.
    pub fn record_group_membership(&mut self, group: GroupId, fix_time: SystemTime) {
        self.group_memberships
            .entry(group)
            .and_modify(|watermark| *watermark = (*watermark).max(fix_time))
            .or_insert(fix_time);
    }

    pub fn group_memberships(&self) -> impl Iterator<Item = (&GroupId, &SystemTime)> {
        self.group_memberships.iter()
    }

    pub fn is_member_of(&self, group: &GroupId) -> bool {
        self.group_memberships.contains_key(group)
    }

    /// Drops fixes older than `cutoff`, then drops any group membership
    /// whose watermark now falls before `cutoff`. A membership only
    /// survives while its group's watermark is still backed by some
    /// surviving fix; since the watermark never exceeds the newest fix time
    /// recorded for that group, this reduces to comparing the watermark
    /// against `cutoff` directly.
    pub fn purge_older_than(&mut self, cutoff: SystemTime) -> bool {
        self.fixes.retain(|f| f.time_utc >= cutoff);
        self.group_memberships.retain(|_, watermark| *watermark >= cutoff);
        self.fixes.is_empty()
    }
}
