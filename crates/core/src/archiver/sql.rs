use super::{ArchiveOutcome, Archiver};
use geotracker_types::archive::ArchivalRecord;

/// Outcome of executing one formatted statement against a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlExecOutcome {
    Ok,
    Retryable,
    Fatal,
}

/// The capability a concrete database driver provides. Kept deliberately
/// narrow (single statement execution) so any driver crate can back it
/// without `SqlArchiver` depending on one directly — the connection is
/// injected at construction.
pub trait SqlConnection: Send {
    fn execute(&mut self, statement: &str) -> SqlExecOutcome;
}

/// Formats each record via a configured insert template (placeholders
/// `{entity_id}`, `{group_id}`, `{time_utc_nanos}`, `{latitude}`,
/// `{longitude}`) and executes it against the injected connection.
pub struct SqlArchiver {
    connection: Box<dyn SqlConnection>,
    insert_template: String,
}

impl SqlArchiver {
    pub fn new(connection: Box<dyn SqlConnection>, insert_template: String) -> Self {
        Self { connection, insert_template }
    }

    fn render(&self, record: &ArchivalRecord) -> String {
        let nanos = record
            .fix
            .time_utc
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        self.insert_template
            .replace("{entity_id}", &record.entity_id.to_string())
            .replace(
                "{group_id}",
                record.group_id.as_ref().map(|g| g.as_str()).unwrap_or(""),
            )
            .replace("{time_utc_nanos}", &nanos.to_string())
            .replace("{latitude}", &record.fix.latitude.to_string())
            .replace("{longitude}", &record.fix.longitude.to_string())
    }
}

impl Archiver for SqlArchiver {
    fn archive(&mut self, batch: &[ArchivalRecord]) -> ArchiveOutcome {
        for record in batch {
            let statement = self.render(record);
            match self.connection.execute(&statement) {
                SqlExecOutcome::Ok => {}
                SqlExecOutcome::Retryable => return ArchiveOutcome::Retryable,
                SqlExecOutcome::Fatal => return ArchiveOutcome::Fatal,
            }
        }
        ArchiveOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geotracker_types::fix::GeoFix;
    use geotracker_types::ids::EntityId;
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    struct RecordingConnection {
        statements: Arc<Mutex<Vec<String>>>,
    }

    impl SqlConnection for RecordingConnection {
        fn execute(&mut self, statement: &str) -> SqlExecOutcome {
            self.statements.lock().unwrap().push(statement.to_string());
            SqlExecOutcome::Ok
        }
    }

    #[test]
    fn renders_template_placeholders() {
        let statements = Arc::new(Mutex::new(Vec::new()));
        let connection = RecordingConnection { statements: Arc::clone(&statements) };
        let mut archiver = SqlArchiver::new(
            Box::new(connection),
            "INSERT INTO fixes(entity, lat, lon) VALUES ('{entity_id}', {latitude}, {longitude})".to_string(),
        );

        let record = ArchivalRecord {
            entity_id: EntityId::new("jeff").unwrap(),
            group_id: None,
            fix: GeoFix::new(SystemTime::now(), 10.0, 20.0),
        };
        assert_eq!(archiver.archive(&[record]), ArchiveOutcome::Ok);

        let rendered = &statements.lock().unwrap()[0];
        assert_eq!(rendered, "INSERT INTO fixes(entity, lat, lon) VALUES ('jeff', 10, 20)");
    }
}
