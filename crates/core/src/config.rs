use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Selector for the archiver backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiverKind {
    #[default]
    Null,
    AppLog,
    Sql,
}

/// Selector for the cluster topology implementation. Only `DynamicHashed`
/// is covered by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TopologyKind {
    #[default]
    DynamicHashed,
}

/// Node-wide configuration: `deny_unknown_fields`, `const fn` defaults,
/// `with_*` builder setters, an explicit `validate()`, and JSON/TOML round
/// trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "camelCase")]
pub struct Config {
    pub server_endpoint: String,
    pub cluster_endpoint: String,
    pub cluster_topology: TopologyKind,

    pub geo_fix_retention_interval: Duration,
    pub geo_fix_purge_interval: Duration,
    pub max_entity_fixes: usize,

    pub archiver: ArchiverKind,
    pub archiver_app_log_path: Option<String>,
    pub archiver_app_log_max_segment_size: u64,
    /// Cumulative cap across every rotated segment, enforced by deleting the
    /// oldest segments first. `0` means no size-based cap.
    pub archiver_app_log_max_total_size: u64,
    /// Segments older than this are pruned regardless of total size. A zero
    /// duration means no age-based cap.
    pub archiver_app_log_max_age: Duration,
    pub archiver_sql_connection_string: Option<String>,
    pub archiver_sql_insert_template: Option<String>,

    pub buffer_size: usize,
    pub buffer_interval: Duration,
    pub archiver_retry_interval: Duration,
    pub archiver_max_retries: u32,
    pub shutdown_drain_deadline: Duration,
    pub spill_file_path: Option<String>,

    pub ip_geocode_enabled: bool,
    pub ip_geocode_source_uri: Option<String>,
    pub ip_geocode_source_key: Option<String>,
    pub ip_geocode_poll_interval: Duration,
    pub ip_geocode_source_timeout: Duration,
    pub ip_geocode_data_file_path: Option<String>,

    pub sweep_interval: Duration,
    pub bk_interval: Duration,

    pub cluster_advertise_interval: Duration,
    pub cluster_grace_period: Duration,

    pub query_deadline: Duration,
    pub clock_skew_tolerance: Duration,
}

impl Config {
    pub const fn default_max_entity_fixes() -> usize {
        64
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.server_endpoint = endpoint.into();
        self
    }

    pub fn with_cluster_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.cluster_endpoint = endpoint.into();
        self
    }

    pub fn with_max_entity_fixes(mut self, n: usize) -> Self {
        self.max_entity_fixes = n;
        self
    }

    pub fn with_retention_interval(mut self, d: Duration) -> Self {
        self.geo_fix_retention_interval = d;
        self
    }

    pub fn with_archiver(mut self, kind: ArchiverKind) -> Self {
        self.archiver = kind;
        self
    }

    pub fn with_buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    pub fn with_buffer_interval(mut self, d: Duration) -> Self {
        self.buffer_interval = d;
        self
    }

    pub fn with_ip_geocode(mut self, enabled: bool, source_uri: impl Into<String>) -> Self {
        self.ip_geocode_enabled = enabled;
        self.ip_geocode_source_uri = Some(source_uri.into());
        self
    }

    /// Rejects configuration combinations that would make a node unable to
    /// start or would violate an invariant assumed elsewhere (e.g.
    /// `max_entity_fixes == 0` would leave no room to store any fix).
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entity_fixes == 0 {
            return Err("max_entity_fixes must be at least 1".to_string());
        }
        if self.buffer_size == 0 {
            return Err("buffer_size must be at least 1".to_string());
        }
        if self.geo_fix_retention_interval.is_zero() {
            return Err("geo_fix_retention_interval must be positive".to_string());
        }
        if self.geo_fix_purge_interval.is_zero() {
            return Err("geo_fix_purge_interval must be positive".to_string());
        }
        if self.archiver == ArchiverKind::AppLog && self.archiver_app_log_path.is_none() {
            return Err("archiver_app_log_path is required when archiver = appLog".to_string());
        }
        if self.archiver == ArchiverKind::Sql
            && (self.archiver_sql_connection_string.is_none()
                || self.archiver_sql_insert_template.is_none())
        {
            return Err(
                "archiver_sql_connection_string and archiver_sql_insert_template are required when archiver = sql"
                    .to_string(),
            );
        }
        if self.ip_geocode_enabled && self.ip_geocode_source_uri.is_none() {
            return Err("ip_geocode_source_uri is required when ip_geocode_enabled".to_string());
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_endpoint: "0.0.0.0:7700".to_string(),
            cluster_endpoint: "0.0.0.0:7701".to_string(),
            cluster_topology: TopologyKind::DynamicHashed,

            geo_fix_retention_interval: Duration::from_secs(24 * 3600),
            geo_fix_purge_interval: Duration::from_secs(60),
            max_entity_fixes: Self::default_max_entity_fixes(),

            archiver: ArchiverKind::Null,
            archiver_app_log_path: None,
            archiver_app_log_max_segment_size: 64 * 1024 * 1024,
            archiver_app_log_max_total_size: 512 * 1024 * 1024,
            archiver_app_log_max_age: Duration::from_secs(7 * 24 * 3600),
            archiver_sql_connection_string: None,
            archiver_sql_insert_template: None,

            buffer_size: 1024,
            buffer_interval: Duration::from_secs(5),
            archiver_retry_interval: Duration::from_secs(2),
            archiver_max_retries: 5,
            shutdown_drain_deadline: Duration::from_secs(10),
            spill_file_path: None,

            ip_geocode_enabled: false,
            ip_geocode_source_uri: None,
            ip_geocode_source_key: None,
            ip_geocode_poll_interval: Duration::from_secs(3600),
            ip_geocode_source_timeout: Duration::from_secs(30),
            ip_geocode_data_file_path: None,

            sweep_interval: Duration::from_secs(300),
            bk_interval: Duration::from_secs(600),

            cluster_advertise_interval: Duration::from_secs(5),
            cluster_grace_period: Duration::from_secs(15),

            query_deadline: Duration::from_secs(2),
            clock_skew_tolerance: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_max_entity_fixes_is_rejected() {
        let cfg = Config::default().with_max_entity_fixes(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn app_log_archiver_requires_path() {
        let cfg = Config::default().with_archiver(ArchiverKind::AppLog);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_round_trip() {
        let cfg = Config::default().with_server_endpoint("127.0.0.1:9000");
        let json = cfg.to_json().unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(back.server_endpoint, "127.0.0.1:9000");
    }

    #[cfg(feature = "toml")]
    #[test]
    fn toml_round_trip() {
        let cfg = Config::default().with_buffer_size(256);
        let toml_str = cfg.to_toml().unwrap();
        let back = Config::from_toml(&toml_str).unwrap();
        assert_eq!(back.buffer_size, 256);
    }

    #[test]
    fn deny_unknown_fields_rejects_typos() {
        let err = Config::from_json(r#"{"serverEndpiont": "x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn camel_case_keys_round_trip() {
        let cfg = Config::default().with_server_endpoint("127.0.0.1:7700");
        let json = cfg.to_json().unwrap();
        assert!(json.contains("\"serverEndpoint\""));
    }
}
