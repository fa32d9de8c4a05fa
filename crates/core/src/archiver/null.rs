use super::{ArchiveOutcome, Archiver};
use geotracker_types::archive::ArchivalRecord;

/// Discards every batch. Used when `archiver = null`.
pub struct NullArchiver;

impl Archiver for NullArchiver {
    fn archive(&mut self, _batch: &[ArchivalRecord]) -> ArchiveOutcome {
        ArchiveOutcome::Ok
    }
}
