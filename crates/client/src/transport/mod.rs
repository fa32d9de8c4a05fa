//! Transport layer for the GeoTracker client.
//!
//! `rpc` is the only transport: a `tarpc` connection to a node's
//! client-facing RPC listener. There is no HTTP transport — the node itself
//! does not expose one.

pub mod rpc;
