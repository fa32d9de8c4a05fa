use super::{ArchiveOutcome, Archiver};
use geotracker_types::archive::ArchivalRecord;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Appends each record to a local, size-capped journal: a pipe-delimited
/// text line per record. When the active segment exceeds `max_segment_size`,
/// it is rotated (renamed with a numeric suffix); rotated segments are then
/// pruned by cumulative total size and by age, oldest first.
pub struct AppLogArchiver {
    base_path: PathBuf,
    max_segment_size: u64,
    max_total_size: u64,
    max_segment_age: Duration,
    current: File,
    current_size: u64,
    next_segment: u64,
}

impl AppLogArchiver {
    pub fn open(
        base_path: PathBuf,
        max_segment_size: u64,
        max_total_size: u64,
        max_segment_age: Duration,
    ) -> std::io::Result<Self> {
        if let Some(parent) = base_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let current = OpenOptions::new().create(true).append(true).open(&base_path)?;
        let current_size = current.metadata()?.len();
        let next_segment = next_segment_number(&base_path)?;
        Ok(Self {
            base_path,
            max_segment_size,
            max_total_size,
            max_segment_age,
            current,
            current_size,
            next_segment,
        })
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        let rotated = self.base_path.with_extension(format!("{}.log", self.next_segment));
        fs::rename(&self.base_path, &rotated)?;
        self.next_segment += 1;
        self.current = OpenOptions::new().create(true).append(true).open(&self.base_path)?;
        self.current_size = 0;
        self.prune_rotated_segments()?;
        Ok(())
    }

    fn append_line(&mut self, line: &str) -> std::io::Result<()> {
        if self.current_size + line.len() as u64 > self.max_segment_size && self.current_size > 0 {
            self.rotate()?;
        }
        self.current.write_all(line.as_bytes())?;
        self.current.write_all(b"\n")?;
        self.current_size += line.len() as u64 + 1;
        Ok(())
    }

    /// Deletes rotated segments older than `max_segment_age` (if set), then
    /// deletes the oldest remaining rotated segments until their combined
    /// size is at or under `max_total_size` (if set). The active segment is
    /// never touched here.
    fn prune_rotated_segments(&self) -> std::io::Result<()> {
        let mut segments = rotated_segments(&self.base_path)?;
        segments.sort_by_key(|s| s.number);

        if !self.max_segment_age.is_zero() {
            let now = SystemTime::now();
            segments.retain(|segment| {
                let age = now.duration_since(segment.modified).unwrap_or(Duration::ZERO);
                if age > self.max_segment_age {
                    if let Err(err) = fs::remove_file(&segment.path) {
                        tracing::warn!("failed to prune aged-out journal segment {:?}: {err}", segment.path);
                    }
                    false
                } else {
                    true
                }
            });
        }

        if self.max_total_size > 0 {
            let mut total: u64 = segments.iter().map(|s| s.size).sum();
            let mut idx = 0;
            while total > self.max_total_size && idx < segments.len() {
                let segment = &segments[idx];
                match fs::remove_file(&segment.path) {
                    Ok(()) => total = total.saturating_sub(segment.size),
                    Err(err) => tracing::warn!(
                        "failed to prune over-size journal segment {:?}: {err}",
                        segment.path
                    ),
                }
                idx += 1;
            }
        }

        Ok(())
    }
}

struct RotatedSegment {
    path: PathBuf,
    number: u64,
    size: u64,
    modified: SystemTime,
}

/// Rotated segments for `base_path` live alongside it as `<stem>.<N>.log`;
/// this lists them all, oldest-numbered first once sorted by `number`.
fn rotated_segments(base_path: &Path) -> std::io::Result<Vec<RotatedSegment>> {
    let Some(parent) = base_path.parent() else { return Ok(Vec::new()) };
    let Some(stem) = base_path.file_stem().and_then(|s| s.to_str()) else { return Ok(Vec::new()) };
    let prefix = format!("{stem}.");

    let mut out = Vec::new();
    let dir = match fs::read_dir(parent) {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err),
    };
    for entry in dir {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(&prefix) else { continue };
        let Some(number_str) = rest.strip_suffix(".log") else { continue };
        let Ok(number) = number_str.parse::<u64>() else { continue };
        let metadata = entry.metadata()?;
        out.push(RotatedSegment {
            path: entry.path(),
            number,
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::now()),
        });
    }
    Ok(out)
}

/// Resumes the rotation counter past whatever rotated segments already
/// exist on disk, so reopening a journal after a restart doesn't overwrite
/// an earlier segment.
fn next_segment_number(base_path: &Path) -> std::io::Result<u64> {
    let highest = rotated_segments(base_path)?.into_iter().map(|s| s.number).max();
    Ok(highest.unwrap_or(0) + 1)
}

impl Archiver for AppLogArchiver {
    fn archive(&mut self, batch: &[ArchivalRecord]) -> ArchiveOutcome {
        for record in batch {
            let nanos = record
                .fix
                .time_utc
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            let line = format!(
                "{}|{}|{}|{}|{}",
                record.entity_id,
                record.group_id.as_ref().map(|g| g.as_str()).unwrap_or(""),
                nanos,
                record.fix.latitude,
                record.fix.longitude,
            );
            if let Err(err) = self.append_line(&line) {
                tracing::error!("app log archiver write failed: {err}");
                return ArchiveOutcome::Retryable;
            }
        }
        if let Err(err) = self.current.flush() {
            tracing::error!("app log archiver flush failed: {err}");
            return ArchiveOutcome::Retryable;
        }
        ArchiveOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geotracker_types::fix::GeoFix;
    use geotracker_types::ids::EntityId;
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn record(lat: f64) -> ArchivalRecord {
        ArchivalRecord {
            entity_id: EntityId::new("e1").unwrap(),
            group_id: None,
            fix: GeoFix::new(SystemTime::now(), lat, 2.0),
        }
    }

    #[test]
    fn appends_and_rotates_segments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.log");
        let mut archiver = AppLogArchiver::open(path.clone(), 32, 0, Duration::ZERO).unwrap();

        let record = record(1.0);
        for _ in 0..5 {
            assert_eq!(archiver.archive(std::slice::from_ref(&record)), ArchiveOutcome::Ok);
        }

        assert!(path.exists());
        let rotated = dir.path().join("archive.1.log");
        assert!(rotated.exists(), "expected a rotated segment after exceeding max_segment_size");
    }

    #[test]
    fn prunes_oldest_segments_once_total_size_cap_is_exceeded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.log");
        // Every record line is ~20 bytes; a 32-byte segment rotates after
        // one or two lines, and a 40-byte total cap leaves room for only
        // one rotated segment alongside the active one.
        let mut archiver = AppLogArchiver::open(path.clone(), 32, 40, Duration::ZERO).unwrap();

        for i in 0..20 {
            assert_eq!(archiver.archive(std::slice::from_ref(&record(i as f64))), ArchiveOutcome::Ok);
        }

        let rotated_total: u64 = rotated_segments(&path).unwrap().iter().map(|s| s.size).sum();
        assert!(rotated_total <= 40, "expected pruning to keep rotated segments under the total cap, got {rotated_total}");
        assert!(path.exists());
    }

    #[test]
    fn prunes_segments_older_than_max_age() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.log");
        let mut archiver = AppLogArchiver::open(path.clone(), 32, 0, Duration::ZERO).unwrap();
        for _ in 0..3 {
            assert_eq!(archiver.archive(std::slice::from_ref(&record(1.0))), ArchiveOutcome::Ok);
        }
        let rotated_before = rotated_segments(&path).unwrap();
        assert!(!rotated_before.is_empty());

        // Reopen with a max age of zero duration's complement: any age at
        // all exceeds a 1-nanosecond cap, so the next rotation prunes
        // everything rotated so far.
        let mut archiver = AppLogArchiver::open(path.clone(), 32, 0, Duration::from_nanos(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        for _ in 0..3 {
            assert_eq!(archiver.archive(std::slice::from_ref(&record(2.0))), ArchiveOutcome::Ok);
        }

        let rotated_after = rotated_segments(&path).unwrap();
        for segment in &rotated_before {
            assert!(!rotated_after.iter().any(|s| s.path == segment.path), "expected aged-out segment {:?} to be pruned", segment.path);
        }
        let _ = archiver;
    }
}
