//! Cluster topology view, owner hashing, and membership merge logic.
//!
//! This module is transport-agnostic: it has no notion of sockets or wire
//! bytes. `geotracker-server` drives it by feeding received advertisements
//! in and reading `TopologyView::owner_of` / `members()` out, the same way
//! `FixCache` is driven without knowing how requests arrived.

use arc_swap::ArcSwap;
use geotracker_types::ids::EntityId;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// One cluster member as known to this node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Member {
    pub node_id: String,
    pub endpoint: String,
}

/// An immutable snapshot of cluster members plus a monotonically increasing
/// version, installed wholesale via `ArcSwap` on every membership change —
/// the same atomic-pointer-swap discipline `ferrous-dns` uses for
/// `BlockIndex`.
#[derive(Debug, Clone, Default)]
pub struct TopologyViewData {
    /// Sorted by `node_id` so every node agrees on indexing for a given
    /// version.
    members: Vec<Member>,
    version: u64,
}

impl TopologyViewData {
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// `H(entityID) mod len(members)` with a stable 64-bit hash. Returns
    /// `None` if the view has no members.
    pub fn owner_of(&self, entity_id: &EntityId) -> Option<&Member> {
        if self.members.is_empty() {
            return None;
        }
        let mut hasher = FxHasher::default();
        entity_id.as_str().hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.members.len();
        self.members.get(index)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.members.iter().any(|m| m.node_id == node_id)
    }
}

struct TrackedMember {
    member: Member,
    alive_until: SystemTime,
}

/// Each node's live view of the cluster. Advertisement merging happens under
/// an internal lock (advertisements are infrequent relative to routing
/// lookups), while routing reads go through the lock-free `ArcSwap` snapshot.
pub struct TopologyView {
    snapshot: ArcSwap<TopologyViewData>,
    tracked: parking_lot::Mutex<Vec<TrackedMember>>,
    grace: Duration,
}

impl TopologyView {
    pub fn new(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            snapshot: ArcSwap::from_pointee(TopologyViewData::default()),
            tracked: parking_lot::Mutex::new(Vec::new()),
            grace,
        })
    }

    pub fn current(&self) -> Arc<TopologyViewData> {
        self.snapshot.load_full()
    }

    /// Merges a received advertisement: adds an unseen node, refreshes its
    /// `alive_until`. If the resulting member set differs from the current
    /// view, installs a new snapshot with an incremented version.
    pub fn merge_advertisement(&self, node_id: String, endpoint: String, alive_until: SystemTime) {
        let mut tracked = self.tracked.lock();
        self.expire_locked(&mut tracked);

        let changed = match tracked.iter_mut().find(|t| t.member.node_id == node_id) {
            Some(existing) => {
                existing.alive_until = existing.alive_until.max(alive_until);
                existing.member.endpoint != endpoint && {
                    existing.member.endpoint = endpoint;
                    true
                }
            }
            None => {
                tracked.push(TrackedMember {
                    member: Member { node_id, endpoint },
                    alive_until,
                });
                true
            }
        };

        if changed {
            self.install_locked(&tracked);
        }
    }

    /// Drops members whose `alive_until + grace` has passed. Called both
    /// from `merge_advertisement` and on a periodic sweep, since a node can
    /// silently go missing without anyone's set changing until the grace
    /// period elapses.
    pub fn sweep_expired(&self) {
        let mut tracked = self.tracked.lock();
        let before = tracked.len();
        self.expire_locked(&mut tracked);
        if tracked.len() != before {
            self.install_locked(&tracked);
        }
    }

    fn expire_locked(&self, tracked: &mut Vec<TrackedMember>) {
        let now = SystemTime::now();
        tracked.retain(|t| now <= t.alive_until + self.grace);
    }

    fn install_locked(&self, tracked: &[TrackedMember]) {
        let mut members: Vec<Member> = tracked.iter().map(|t| t.member.clone()).collect();
        members.sort();
        let version = self.snapshot.load().version() + 1;
        self.snapshot.store(Arc::new(TopologyViewData { members, version }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_owner_for_same_entity_across_calls() {
        let view = TopologyView::new(Duration::from_secs(10));
        let now = SystemTime::now();
        for i in 0..4 {
            view.merge_advertisement(format!("node{i}"), format!("10.0.0.{i}:7701"), now + Duration::from_secs(60));
        }
        let snapshot = view.current();
        let entity = EntityId::new("jeff").unwrap();
        let owner1 = snapshot.owner_of(&entity).cloned();
        let owner2 = snapshot.owner_of(&entity).cloned();
        assert_eq!(owner1, owner2);
    }

    #[test]
    fn adding_a_node_increments_version() {
        let view = TopologyView::new(Duration::from_secs(10));
        let now = SystemTime::now();
        view.merge_advertisement("node0".into(), "10.0.0.0:7701".into(), now + Duration::from_secs(60));
        let v1 = view.current().version();
        view.merge_advertisement("node1".into(), "10.0.0.1:7701".into(), now + Duration::from_secs(60));
        let v2 = view.current().version();
        assert!(v2 > v1);
    }

    #[test]
    fn expired_members_are_dropped_after_grace() {
        let view = TopologyView::new(Duration::from_millis(50));
        let now = SystemTime::now();
        view.merge_advertisement("node0".into(), "x".into(), now);
        assert!(view.current().contains("node0"));
        std::thread::sleep(Duration::from_millis(80));
        view.sweep_expired();
        assert!(!view.current().contains("node0"));
    }

    #[test]
    fn ownership_distributes_across_four_nodes() {
        let view = TopologyView::new(Duration::from_secs(10));
        let now = SystemTime::now();
        for i in 0..4 {
            view.merge_advertisement(format!("node{i}"), format!("10.0.0.{i}:7701"), now + Duration::from_secs(60));
        }
        let snapshot = view.current();
        let mut counts = [0usize; 4];
        for n in 0..100 {
            let entity = EntityId::new(format!("entity-{n}")).unwrap();
            let owner = snapshot.owner_of(&entity).unwrap();
            let idx: usize = owner.node_id.trim_start_matches("node").parse().unwrap();
            counts[idx] += 1;
        }
        assert_eq!(counts.iter().sum::<usize>(), 100);
        for c in counts {
            assert!(c as f64 >= 100.0 / 4.0 * 0.5, "distribution too skewed: {counts:?}");
        }
    }
}
