use thiserror::Error;

/// Error taxonomy for a GeoTracker node. Callers at an RPC boundary flatten
/// this to a string.
#[derive(Debug, Error)]
pub enum GeoError {
    /// Bad latitude/longitude, missing entity ID, unknown group ID where one
    /// is required. Surfaced synchronously; no state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Archiver buffer full. Submission at the cache level still succeeds;
    /// this is recorded as a counter by the caller, not necessarily returned.
    #[error("archiver buffer at capacity")]
    Capacity,

    /// Forwarded submission to a remote owner failed after retries.
    #[error("node {node_id} unreachable after {attempts} attempts: {source}")]
    Transient {
        node_id: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The resolved owner is no longer in the current topology view.
    #[error("owner node {node_id} is stale for the current topology view")]
    TopologyStale { node_id: String },

    /// IP-geocode download or decrypt/verify failed.
    #[error("geocode data source error: {0}")]
    DataSource(String),

    /// Entity-history query against an entity unknown on this node.
    #[error("entity {0} not found")]
    NotFound(String),

    /// Corrupted on-disk data or an invariant violation. The affected
    /// subsystem degrades (e.g. IPGeocoder starts returning
    /// `not-available`) without taking the node down.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GeoError>;

impl GeoError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
