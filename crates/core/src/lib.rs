//! # geotracker-core
//!
//! The four in-process components of a GeoTracker node, plus the query
//! engine that sits on top of them:
//!
//! - [`fixcache`] — the sliding-window fix cache and group index.
//! - [`cluster`] — topology view, owner hashing, membership merge.
//! - [`archiver`] — the buffered archival pipeline.
//! - [`geocoder`] — the IPv4 geocode index and its hot-swap lifecycle.
//! - [`query`] — entity-history, heat-map and group queries over a
//!   [`fixcache::FixCache`].
//!
//! This crate has no networking of its own; `geotracker-server` wires these
//! components to tarpc RPCs and a cluster transport built on
//! `geotracker-wire`.

pub mod archiver;
pub mod cluster;
pub mod config;
pub mod error;
pub mod fixcache;
pub mod geocoder;
pub mod node;
pub mod query;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::GeoError;
    pub use crate::fixcache::FixCache;
    pub use crate::node::Node;
}
