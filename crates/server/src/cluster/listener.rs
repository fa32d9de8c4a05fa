//! Intra-cluster accept loop: one TCP listener serving [`Command`]s from
//! peer nodes, spawning a task per connection.

use super::ClusterRouter;
use geotracker_core::error::GeoError;
use geotracker_wire::{Command, Response, ServerCodec};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

/// Binds `bind_addr` and serves intra-cluster traffic until the process
/// exits. Each connection is handled on its own spawned task; a connection
/// carries a sequence of independent request/reply pairs (advertisements are
/// sent this way periodically, so the connection is not necessarily
/// one-shot).
pub async fn serve(router: Arc<ClusterRouter>, bind_addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(node_id = router.node_id(), %bind_addr, "cluster listener bound");
    loop {
        let (stream, peer) = listener.accept().await?;
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(router, stream).await {
                tracing::warn!(%peer, error = %err, "cluster connection ended with an error");
            }
        });
    }
}

async fn handle_connection(router: Arc<ClusterRouter>, stream: TcpStream) -> Result<(), anyhow::Error> {
    use futures::SinkExt;

    let mut framed = Framed::new(stream, ServerCodec);
    while let Some(command) = framed.next().await {
        let command = command?;
        let response = dispatch(&router, command);
        framed.send(response).await?;
    }
    Ok(())
}

fn dispatch(router: &ClusterRouter, command: Command) -> Response {
    match command {
        Command::Advertise { node_id, endpoint, alive_until, .. } => {
            router.node().topology().merge_advertisement(node_id, endpoint, alive_until);
            Response::Ack
        }
        Command::RoutedSubmit { entity_id, group_id, fixes } => {
            let cache = router.node().cache();
            for fix in fixes {
                if let Err(err) = cache.add(entity_id.clone(), group_id.clone(), fix) {
                    return error_response(err);
                }
            }
            Response::Submitted
        }
        Command::QueryFanOut { query, .. } => match router.run_local(query) {
            Ok(reply) => Response::QueryReply(reply),
            Err(err) => error_response(err),
        },
    }
}

fn error_response(err: GeoError) -> Response {
    Response::Error(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterRouter;
    use futures::SinkExt;
    use geotracker_core::config::Config;
    use geotracker_core::node::Node;
    use geotracker_types::ids::EntityId;
    use geotracker_wire::ClientCodec;
    use std::time::SystemTime;

    #[tokio::test]
    async fn dispatch_applies_routed_submit_locally() {
        let node = Arc::new(Node::build(Config::default()).unwrap());
        node.start();
        let router = ClusterRouter::new(Arc::clone(&node), "node0".to_string(), "127.0.0.1:0".to_string());

        let jeff = EntityId::new("jeff").unwrap();
        let command = Command::RoutedSubmit {
            entity_id: jeff.clone(),
            group_id: None,
            fixes: vec![geotracker_types::fix::GeoFix::new(SystemTime::now(), 1.0, 2.0)],
        };
        let response = dispatch(&router, command);
        assert!(matches!(response, Response::Submitted));
        assert_eq!(node.cache().get_fixes(&jeff).unwrap().len(), 1);
        node.stop();
    }

    #[tokio::test]
    async fn accept_loop_serves_a_submit_over_a_real_socket() {
        let node = Arc::new(Node::build(Config::default()).unwrap());
        node.start();
        let router = ClusterRouter::new(Arc::clone(&node), "node0".to_string(), "127.0.0.1:0".to_string());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving_router = Arc::clone(&router);
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let router = Arc::clone(&serving_router);
                tokio::spawn(async move {
                    let _ = handle_connection(router, stream).await;
                });
            }
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, ClientCodec);
        let jeff = EntityId::new("jeff").unwrap();
        framed
            .send(Command::RoutedSubmit {
                entity_id: jeff.clone(),
                group_id: None,
                fixes: vec![geotracker_types::fix::GeoFix::new(SystemTime::now(), 5.0, 6.0)],
            })
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert!(matches!(reply, Response::Submitted));
        node.stop();
    }
}
