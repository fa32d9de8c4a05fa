//! End-to-end: a single node serving the tarpc client surface, driven
//! through `geotracker-client`.

use futures::StreamExt;
use geotracker_client::GeoTrackerClient;
use geotracker_core::config::Config;
use geotracker_core::node::Node;
use geotracker_server::cluster::ClusterRouter;
use geotracker_server::handler::Handler;
use geotracker_server::protocol::{FixFieldsDto, GeoFix, GeoTrackerService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Json;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

async fn spawn_node() -> SocketAddr {
    let node = Arc::new(Node::build(Config::default()).unwrap());
    node.start();
    node.topology().merge_advertisement(
        "node0".to_string(),
        "127.0.0.1:0".to_string(),
        SystemTime::now() + std::time::Duration::from_secs(60),
    );
    let router = ClusterRouter::new(Arc::clone(&node), "node0".to_string(), "127.0.0.1:0".to_string());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handler = Handler::new(router);
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let server = handler.clone();
            tokio::spawn(async move {
                let framed = Framed::new(socket, LengthDelimitedCodec::new());
                let transport = tarpc::serde_transport::new(framed, Json::default());
                BaseChannel::with_defaults(transport)
                    .execute(server.serve())
                    .for_each(|response| async move {
                        tokio::spawn(response);
                    })
                    .await;
            });
        }
    });

    addr
}

#[tokio::test]
async fn submit_then_entity_query_round_trips() {
    let addr = spawn_node().await;
    let client = GeoTrackerClient::connect(addr).await.unwrap();

    let fix = GeoFix::new(SystemTime::now(), 37.77, -122.42);
    client.submit_fix("jeff", Some("family"), vec![fix]).await.unwrap();

    let history = client
        .entity_query("jeff", 5, None, FixFieldsDto::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].latitude, 37.77);
}

#[tokio::test]
async fn entity_query_on_unknown_entity_is_an_error() {
    let addr = spawn_node().await;
    let client = GeoTrackerClient::connect(addr).await.unwrap();
    let err = client.entity_query("ghost", 1, None, FixFieldsDto::default()).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn ip_to_geo_fix_is_not_available_when_geocoder_disabled() {
    let addr = spawn_node().await;
    let client = GeoTrackerClient::connect(addr).await.unwrap();
    let result = client.ip_to_geo_fix("8.8.8.8".parse().unwrap()).await;
    assert!(result.is_err());
}
