//! Native Rust RPC client for a GeoTracker cluster node.
//!
//! # Example
//!
//! ```ignore
//! use geotracker_client::GeoTrackerClient;
//!
//! let client = GeoTrackerClient::connect("127.0.0.1:7700".parse()?).await?;
//! client.submit_fix("jeff", Some("family"), vec![fix]).await?;
//! ```

mod transport;

pub use transport::rpc::{ClientError, GeoTrackerClient, Result};

pub use geotracker_server::protocol::{
    EntityQueryOptions, FixFieldsDto, GeoFix, GroupQueryOptions, HeatmapGridDto, HeatmapQueryOptions, ResolutionUnit,
};
