//! GeoTracker node: client-facing RPC surface, intra-cluster transport, and
//! the `geotracker-core` registry they drive.
//!
//! # Transports
//!
//! - **Client-facing**: `tarpc` over TCP, serving [`protocol::GeoTrackerService`].
//! - **Intra-cluster**: length-prefixed bincode framing from `geotracker-wire`,
//!   serving advertisements, routed submissions and fanned-out queries.
//!
//! There is no HTTP surface; an operator drives a node through this RPC
//! protocol or through `geotracker-client`.

pub mod cluster;
pub mod handler;
pub mod protocol;

pub use cluster::ClusterRouter;
pub use handler::Handler;
pub use protocol::{GeoTrackerService, GeoTrackerServiceClient};
