//! tarpc transport for the GeoTracker client.
//!
//! This is the only transport: a `tarpc`/JSON connection to a node's
//! client-facing RPC listener.

use geotracker_server::protocol::{
    EntityQueryOptions, FixFieldsDto, GeoFix, GeoTrackerServiceClient, GroupQueryOptions, HeatmapGridDto,
    HeatmapQueryOptions, ResolutionUnit,
};
use std::net::SocketAddr;
use std::time::Duration;
use tarpc::client;
use tarpc::context;
use tarpc::tokio_serde::formats::Json;
use thiserror::Error;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    #[error("RPC error: {0}")]
    Rpc(#[from] tarpc::client::RpcError),
    #[error("server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// A connection to one GeoTracker node's client-facing RPC surface.
/// `entityQuery`/`groupQuery`/`heatmapQuery` are served by whichever node
/// this client happens to be connected to — that node fans the query out to
/// the rest of the cluster itself, so the client does not need to know the
/// entity's owner.
#[derive(Clone)]
pub struct GeoTrackerClient {
    client: GeoTrackerServiceClient,
    default_timeout: Duration,
}

impl GeoTrackerClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let socket = tokio::net::TcpStream::connect(addr).await?;
        let framed = Framed::new(socket, LengthDelimitedCodec::new());
        let transport = tarpc::serde_transport::new(framed, Json::default());
        let client = GeoTrackerServiceClient::new(client::Config::default(), transport).spawn();
        Ok(Self { client, default_timeout: Duration::from_secs(30) })
    }

    fn make_context(&self) -> context::Context {
        let mut ctx = context::current();
        ctx.deadline = std::time::SystemTime::now() + self.default_timeout;
        ctx
    }

    pub async fn submit_fix(&self, entity_id: &str, group_id: Option<&str>, fixes: Vec<GeoFix>) -> Result<()> {
        self.client
            .submit_fix(self.make_context(), entity_id.to_string(), group_id.map(str::to_string), fixes)
            .await?
            .map_err(ClientError::Server)
    }

    pub async fn entity_query(
        &self,
        entity_id: &str,
        fix_count: usize,
        min_fix_time_utc: Option<std::time::SystemTime>,
        fields: FixFieldsDto,
    ) -> Result<Vec<GeoFix>> {
        let options = EntityQueryOptions { fix_count, min_fix_time_utc, fields };
        self.client
            .entity_query(self.make_context(), entity_id.to_string(), options)
            .await?
            .map_err(ClientError::Server)
    }

    pub async fn group_query(
        &self,
        group_id: &str,
        min_fix_time_utc: Option<std::time::SystemTime>,
        per_entity_fix_count: Option<usize>,
        fields: FixFieldsDto,
    ) -> Result<Vec<(String, Vec<GeoFix>)>> {
        let options = GroupQueryOptions { min_fix_time_utc, per_entity_fix_count, fields };
        self.client
            .group_query(self.make_context(), group_id.to_string(), options)
            .await?
            .map_err(ClientError::Server)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn heatmap_query(
        &self,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        resolution: f64,
        resolution_unit: ResolutionUnit,
        group_filter: Option<String>,
        min_fix_time_utc: Option<std::time::SystemTime>,
        max_fix_time_utc: Option<std::time::SystemTime>,
    ) -> Result<HeatmapGridDto> {
        let options = HeatmapQueryOptions {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            resolution,
            resolution_unit,
            group_filter,
            min_fix_time_utc,
            max_fix_time_utc,
        };
        self.client.heatmap_query(self.make_context(), options).await?.map_err(ClientError::Server)
    }

    pub async fn ip_to_geo_fix(&self, addr: std::net::Ipv4Addr) -> Result<Option<GeoFix>> {
        self.client.ip_to_geo_fix(self.make_context(), addr).await?.map_err(ClientError::Server)
    }
}
