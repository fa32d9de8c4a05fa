use crate::fix::GeoFix;
use crate::ids::{EntityId, GroupId};
use serde::{Deserialize, Serialize};

/// A [`GeoFix`] plus the entity/group it was submitted under, handed from
/// the ingest path to the archiver pipeline's bounded buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalRecord {
    pub entity_id: EntityId,
    pub group_id: Option<GroupId>,
    pub fix: GeoFix,
}
