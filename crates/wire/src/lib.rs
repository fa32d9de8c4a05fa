//! Length-prefixed bincode framing for GeoTracker's intra-cluster messages:
//! `advertise`, `routedSubmit`, `queryFanOut`/`queryReply`.
//!
//! A big-endian `u32` length prefix followed by a bincode payload. This
//! crate only carries cluster-internal traffic; the client-facing RPC
//! surface (`submitFix`, `entityQuery`, ...) is a `tarpc` service defined in
//! `geotracker-server`, not here.

use bytes::{Buf, BufMut, BytesMut};
use geotracker_types::bounds::MapBounds;
use geotracker_types::fix::GeoFix;
use geotracker_types::heatmap::HeatmapGrid;
use geotracker_types::ids::{EntityId, GroupId};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio_util::codec::{Decoder, Encoder};

/// Frames larger than this are rejected outright rather than buffered
/// without bound.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Wire form of `crate::query::FixFields` in `geotracker-core` (kept
/// separate since the core type has no `Serialize` derive of its own —
/// projection is purely a local-query concern, this is just its wire
/// transcription for a fanned-out `entityQuery`/`groupQuery`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFixFields {
    pub altitude: bool,
    pub course: bool,
    pub speed: bool,
    pub accuracy: bool,
    pub technology: bool,
    pub network_status: bool,
}

impl WireFixFields {
    pub const ALL: Self = Self {
        altitude: true,
        course: true,
        speed: true,
        accuracy: true,
        technology: true,
        network_status: true,
    };
}

/// A query fanned out to every cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireQuery {
    Entity {
        entity_id: EntityId,
        fix_count: usize,
        min_fix_time_utc: Option<SystemTime>,
        fields: WireFixFields,
    },
    Group {
        group_id: GroupId,
        min_fix_time_utc: Option<SystemTime>,
        per_entity_fix_count: Option<usize>,
        fields: WireFixFields,
    },
    Heatmap {
        bounds: MapBounds,
        resolution_km: f64,
        group_filter: Option<GroupId>,
        min_fix_time_utc: Option<SystemTime>,
        max_fix_time_utc: Option<SystemTime>,
    },
}

/// One intra-cluster message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Periodic membership broadcast.
    Advertise {
        node_id: String,
        endpoint: String,
        view_version: u64,
        alive_until: SystemTime,
    },
    /// A submission forwarded to the entity's owning node. Carries the same
    /// semantics as the external `submitFix` RPC.
    RoutedSubmit {
        entity_id: EntityId,
        group_id: Option<GroupId>,
        fixes: Vec<GeoFix>,
    },
    /// A query fanned out to every member; `deadline` bounds how long the
    /// sender will wait for `QueryReply` before treating this member as
    /// missing (contributing to the aggregate's `incomplete` flag).
    QueryFanOut { query: WireQuery, deadline: SystemTime },
}

/// A fanned-out query's per-node contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireQueryReply {
    Entity(Vec<GeoFix>),
    Group(Vec<(EntityId, Vec<GeoFix>)>),
    Heatmap(HeatmapGrid),
}

/// Reply to any [`Command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Reply to `Advertise`: purely an acknowledgement, the advertisement
    /// itself carries no further payload to merge back.
    Ack,
    /// Reply to `RoutedSubmit`.
    Submitted,
    /// Reply to `QueryFanOut`.
    QueryReply(WireQueryReply),
    /// Validation/not-found/fatal errors surfaced from the receiving node.
    Error(String),
}

/// Server-side codec: decodes inbound [`Command`]s, encodes outbound
/// [`Response`]s.
#[derive(Debug, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = Command;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_framed(src)
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_framed(&item, dst)
    }
}

/// Client-side (peer-to-peer) codec: encodes outbound [`Command`]s, decodes
/// inbound [`Response`]s.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = Response;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_framed(src)
    }
}

impl Encoder<Command> for ClientCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_framed(&item, dst)
    }
}

fn decode_framed<T: serde::de::DeserializeOwned>(src: &mut BytesMut) -> Result<Option<T>, anyhow::Error> {
    if src.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(anyhow::anyhow!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}"));
    }
    if src.len() < 4 + len {
        src.reserve(4 + len - src.len());
        return Ok(None);
    }
    src.advance(4);
    let payload = src.split_to(len);
    let value: T = bincode::deserialize(&payload)?;
    Ok(Some(value))
}

fn encode_framed<T: serde::Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), anyhow::Error> {
    let payload = bincode::serialize(item)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(anyhow::anyhow!("frame size {} exceeds maximum {MAX_FRAME_SIZE}", payload.len()));
    }
    dst.reserve(4 + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(&payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_both_codecs() {
        let command = Command::RoutedSubmit {
            entity_id: EntityId::new("jeff").unwrap(),
            group_id: Some(GroupId::canon("family").unwrap()),
            fixes: vec![GeoFix::new(SystemTime::now(), 10.0, 20.0)],
        };

        let mut buf = BytesMut::new();
        ClientCodec.encode(clone_command(&command), &mut buf).unwrap();
        let decoded = ServerCodec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            Command::RoutedSubmit { entity_id, .. } => assert_eq!(entity_id.as_str(), "jeff"),
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn response_round_trips_through_both_codecs() {
        let response = Response::QueryReply(WireQueryReply::Entity(vec![GeoFix::new(
            SystemTime::now(),
            1.0,
            2.0,
        )]));
        let mut buf = BytesMut::new();
        ServerCodec.encode(clone_response(&response), &mut buf).unwrap();
        let decoded = ClientCodec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            Response::QueryReply(WireQueryReply::Entity(fixes)) => assert_eq!(fixes.len(), 1),
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn partial_frame_returns_none_until_complete() {
        let command = Command::Advertise {
            node_id: "node0".into(),
            endpoint: "127.0.0.1:7701".into(),
            view_version: 1,
            alive_until: SystemTime::now(),
        };
        let mut full = BytesMut::new();
        ClientCodec.encode(clone_command(&command), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(ServerCodec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.extend_from_slice(&[0u8; 8]);
        assert!(ServerCodec.decode(&mut buf).is_err());
    }

    fn clone_command(c: &Command) -> Command {
        bincode::deserialize(&bincode::serialize(c).unwrap()).unwrap()
    }

    fn clone_response(r: &Response) -> Response {
        bincode::deserialize(&bincode::serialize(r).unwrap()).unwrap()
    }
}
