//! Intra-cluster transport: the advertiser/listener pair and the
//! [`ClusterRouter`] that decides, for each operation, whether to apply it
//! locally or forward it to the owning node.
//!
//! `geotracker-core`'s [`geotracker_core::cluster::TopologyView`] is
//! transport-agnostic; this module is what actually puts bytes on a socket,
//! using `geotracker-wire`'s framing instead of tarpc since cluster traffic
//! is node-to-node, not client-to-node, and doesn't need tarpc's service
//! trait machinery.

pub mod advertiser;
pub mod listener;
pub mod router;

pub use router::ClusterRouter;
