//! Deterministic owner routing, replication of submissions to the owning
//! node, and fan-out query aggregation.

use futures::{SinkExt, StreamExt};
use geotracker_core::config::Config;
use geotracker_core::error::{GeoError, Result};
use geotracker_core::node::Node;
use geotracker_core::query::{self, EntityQuery, FixFields, GroupQuery, HeatmapQuery};
use geotracker_types::fix::GeoFix;
use geotracker_types::heatmap::HeatmapGrid;
use geotracker_types::ids::{EntityId, GroupId};
use geotracker_wire::{ClientCodec, Command, Response, WireFixFields, WireQuery, WireQueryReply};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

fn to_wire_fields(fields: FixFields) -> WireFixFields {
    WireFixFields {
        altitude: fields.altitude,
        course: fields.course,
        speed: fields.speed,
        accuracy: fields.accuracy,
        technology: fields.technology,
        network_status: fields.network_status,
    }
}

fn from_wire_fields(fields: WireFixFields) -> FixFields {
    FixFields {
        altitude: fields.altitude,
        course: fields.course,
        speed: fields.speed,
        accuracy: fields.accuracy,
        technology: fields.technology,
        network_status: fields.network_status,
    }
}

/// Routes per-entity submissions to their owner, fans queries out to every
/// current member, and aggregates the replies. Holds the [`Node`] it routes
/// into locally, plus this node's own identity within the cluster.
pub struct ClusterRouter {
    node: Arc<Node>,
    node_id: String,
    self_endpoint: String,
    query_deadline: Duration,
    max_retries: u32,
    retry_base: Duration,
}

impl ClusterRouter {
    pub fn new(node: Arc<Node>, node_id: String, self_endpoint: String) -> Arc<Self> {
        let deadline = node.config().query_deadline;
        Arc::new(Self {
            node,
            node_id,
            self_endpoint,
            query_deadline: deadline,
            max_retries: 3,
            retry_base: Duration::from_millis(100),
        })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &Config {
        self.node.config()
    }

    fn is_local(&self, owner_node_id: &str) -> bool {
        owner_node_id == self.node_id
    }

    /// `submit(entityID, groupID?, fix)`: local apply if this node owns the
    /// entity, otherwise a one-way forward to the owner with an
    /// acknowledgement, retried with exponential backoff.
    pub async fn submit(&self, entity_id: EntityId, group_id: Option<GroupId>, fixes: Vec<GeoFix>) -> Result<()> {
        let view = self.node.topology().current();
        let owner = view
            .owner_of(&entity_id)
            .ok_or_else(|| GeoError::Fatal("no cluster members in the current topology view".to_string()))?;

        if self.is_local(&owner.node_id) {
            for fix in fixes {
                self.node.cache().add(entity_id.clone(), group_id.clone(), fix)?;
            }
            return Ok(());
        }

        let endpoint = owner.endpoint.clone();
        let owner_id = owner.node_id.clone();
        let command = Command::RoutedSubmit { entity_id, group_id, fixes };

        let mut attempt = 0;
        loop {
            match send_command(&endpoint, command.clone(), self.query_deadline).await {
                Ok(Response::Submitted) => return Ok(()),
                Ok(Response::Error(message)) => return Err(GeoError::validation(message)),
                Ok(other) => {
                    return Err(GeoError::Fatal(format!("unexpected reply to RoutedSubmit: {other:?}")))
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(GeoError::Transient {
                            node_id: owner_id,
                            attempts: attempt,
                            source: err,
                        });
                    }
                    tokio::time::sleep(self.retry_base * 2u32.pow(attempt - 1)).await;
                }
            }
        }
    }

    /// `entityQuery`: exactly one member (the owner) should hold the
    /// entity, so the first successful reply wins; `NotFound` only if every
    /// member that replied in time said so.
    pub async fn query_entity(&self, query: EntityQuery) -> Result<Vec<GeoFix>> {
        let entity_id = query.entity_id.clone();
        let wire_query = WireQuery::Entity {
            entity_id: entity_id.clone(),
            fix_count: query.fix_count,
            min_fix_time_utc: query.min_fix_time_utc,
            fields: to_wire_fields(query.fields),
        };
        let replies = self.fan_out(wire_query).await;

        let mut saw_not_found = false;
        for reply in replies {
            match reply {
                Ok(WireQueryReply::Entity(fixes)) => return Ok(fixes),
                Err(GeoError::NotFound(_)) => saw_not_found = true,
                _ => {}
            }
        }
        if saw_not_found {
            Err(GeoError::NotFound(entity_id.to_string()))
        } else {
            Err(GeoError::Fatal("no cluster member replied within the query deadline".to_string()))
        }
    }

    /// `groupQuery`: a group's members can be owned by different nodes, so
    /// every reply is concatenated (an entity is owned by exactly one node,
    /// so no de-duplication is needed).
    pub async fn query_group(&self, query: GroupQuery) -> Vec<(EntityId, Vec<GeoFix>)> {
        let wire_query = WireQuery::Group {
            group_id: query.group_id,
            min_fix_time_utc: query.min_fix_time_utc,
            per_entity_fix_count: query.per_entity_fix_count,
            fields: to_wire_fields(query.fields),
        };
        let replies = self.fan_out(wire_query).await;
        replies
            .into_iter()
            .filter_map(|r| r.ok())
            .filter_map(|r| match r {
                WireQueryReply::Group(entities) => Some(entities),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// `heatmapQuery`: every member's grid is summed cell-wise; a member
    /// that misses the deadline marks the aggregate `incomplete`.
    pub async fn query_heatmap(&self, query: HeatmapQuery) -> Result<HeatmapGrid> {
        query.bounds.validate().map_err(GeoError::validation)?;
        let wire_query = WireQuery::Heatmap {
            bounds: query.bounds,
            resolution_km: query.resolution_km,
            group_filter: query.group_filter.clone(),
            min_fix_time_utc: query.min_fix_time_utc,
            max_fix_time_utc: query.max_fix_time_utc,
        };
        let member_count = self.node.topology().current().members().len().max(1);
        let replies = self.fan_out(wire_query).await;

        let mut merged: Option<HeatmapGrid> = None;
        let mut missing = 0usize;
        for reply in &replies {
            match reply {
                Ok(WireQueryReply::Heatmap(grid)) => match &mut merged {
                    Some(acc) => acc.merge(grid),
                    None => merged = Some(grid.clone()),
                },
                _ => missing += 1,
            }
        }
        let mut grid = merged.ok_or_else(|| GeoError::Fatal("no cluster member replied to heatmap query".to_string()))?;
        grid.incomplete = missing > 0 || replies.len() < member_count;
        Ok(grid)
    }

    /// Sends `query` to every current member (local members are served
    /// in-process without a network round trip) and collects whatever
    /// replies arrive before `query_deadline`.
    async fn fan_out(&self, query: WireQuery) -> Vec<std::result::Result<WireQueryReply, GeoError>> {
        let view = self.node.topology().current();
        let deadline = SystemTime::now() + self.query_deadline;

        let futures = view.members().iter().map(|member| {
            let query = query.clone();
            let endpoint = member.endpoint.clone();
            let is_local = self.is_local(&member.node_id);
            async move {
                if is_local {
                    self.run_local(query)
                } else {
                    let command = Command::QueryFanOut { query, deadline };
                    match send_command(&endpoint, command, self.query_deadline).await {
                        Ok(Response::QueryReply(reply)) => Ok(reply),
                        Ok(Response::Error(message)) => Err(GeoError::validation(message)),
                        Ok(other) => Err(GeoError::Fatal(format!("unexpected reply to QueryFanOut: {other:?}"))),
                        Err(_) => Err(GeoError::Fatal("member did not reply within the query deadline".to_string())),
                    }
                }
            }
        });

        futures::stream::iter(futures).buffer_unordered(16).collect().await
    }

    /// Runs a [`WireQuery`] against this node's own [`FixCache`], used both
    /// for `fan_out`'s local member and by the intra-cluster listener when
    /// it receives a `QueryFanOut` from a peer.
    pub fn run_local(&self, query: WireQuery) -> std::result::Result<WireQueryReply, GeoError> {
        match query {
            WireQuery::Entity { entity_id, fix_count, min_fix_time_utc, fields } => {
                let fixes = query::entity_query(
                    self.node.cache(),
                    &EntityQuery { entity_id, fix_count, min_fix_time_utc, fields: from_wire_fields(fields) },
                )?;
                Ok(WireQueryReply::Entity(fixes))
            }
            WireQuery::Group { group_id, min_fix_time_utc, per_entity_fix_count, fields } => {
                let result = query::group_query(
                    self.node.cache(),
                    &GroupQuery { group_id, min_fix_time_utc, per_entity_fix_count, fields: from_wire_fields(fields) },
                );
                Ok(WireQueryReply::Group(result))
            }
            WireQuery::Heatmap { bounds, resolution_km, group_filter, min_fix_time_utc, max_fix_time_utc } => {
                let grid = query::heatmap_query(
                    self.node.cache(),
                    &HeatmapQuery { bounds, resolution_km, group_filter, min_fix_time_utc, max_fix_time_utc },
                )?;
                Ok(WireQueryReply::Heatmap(grid))
            }
        }
    }

    pub fn self_endpoint(&self) -> &str {
        &self.self_endpoint
    }
}

/// Opens a fresh connection to `endpoint`, sends one [`Command`], and waits
/// for its [`Response`] within `deadline`. Connections are not pooled:
/// intra-cluster traffic (advertisements, routed submissions, fanned-out
/// queries) is low-frequency enough that per-call connect cost is
/// acceptable.
async fn send_command(
    endpoint: &str,
    command: Command,
    deadline: Duration,
) -> std::result::Result<Response, std::io::Error> {
    let connect = TcpStream::connect(endpoint);
    let stream = timeout(deadline, connect)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    let mut framed = Framed::new(stream, ClientCodec);

    timeout(deadline, framed.send(command))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "send timed out"))?
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    let reply = timeout(deadline, framed.next())
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "reply timed out"))?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"))?
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(reply)
}
