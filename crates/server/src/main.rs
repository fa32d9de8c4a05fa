use clap::Parser;
use futures::StreamExt;
use geotracker_core::config::{ArchiverKind, Config};
use geotracker_core::node::Node;
use geotracker_server::cluster::{advertiser, listener, ClusterRouter};
use geotracker_server::handler::Handler;
use geotracker_server::protocol::GeoTrackerService;
use std::path::PathBuf;
use std::sync::Arc;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Json;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{error, info};

/// A GeoTracker cluster node: serves `submitFix`/`entityQuery`/`groupQuery`/
/// `heatmapQuery`/`ipToGeoFix` to clients and participates in the cluster's
/// consistent-hash routing with its peers.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON or TOML config file (see `geotracker_core::config::Config`);
    /// CLI flags below override individual keys on top of it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address this node serves client-facing RPC on.
    #[arg(long)]
    server_endpoint: Option<String>,

    /// Address this node serves intra-cluster traffic on.
    #[arg(long)]
    cluster_endpoint: Option<String>,

    /// Known peer endpoints to advertise to at startup; repeatable. Omit for
    /// the first node in a fresh cluster.
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// This node's identity in the cluster's topology view. Defaults to the
    /// cluster endpoint, which is unique per node.
    #[arg(long)]
    node_id: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                Config::from_toml(&text)?
            } else {
                Config::from_json(&text)?
            }
        }
        None => Config::default(),
    };
    if let Some(endpoint) = &args.server_endpoint {
        config = config.with_server_endpoint(endpoint.clone());
    }
    if let Some(endpoint) = &args.cluster_endpoint {
        config = config.with_cluster_endpoint(endpoint.clone());
    }
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geotracker_server=info,geotracker_core=info,info".into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let node_id = args.node_id.clone().unwrap_or_else(|| config.cluster_endpoint.clone());

    info!(%node_id, server_endpoint = %config.server_endpoint, cluster_endpoint = %config.cluster_endpoint, "starting node");

    let node = match config.archiver {
        ArchiverKind::Sql => {
            anyhow::bail!("archiver = sql requires a driver-specific SqlConnection; no CLI wiring for it yet")
        }
        _ => Arc::new(Node::build(config.clone())?),
    };
    node.start();

    let router = ClusterRouter::new(Arc::clone(&node), node_id.clone(), config.cluster_endpoint.clone());
    // Register this node in its own topology view immediately, rather than
    // waiting for the advertiser's first tick, so routing/fan-out work from
    // the moment the RPC listeners come up.
    node.topology().merge_advertisement(
        node_id,
        config.cluster_endpoint.clone(),
        std::time::SystemTime::now() + config.cluster_grace_period,
    );
    for seed in &args.seeds {
        node.topology().merge_advertisement(
            seed.clone(),
            seed.clone(),
            std::time::SystemTime::now() + config.cluster_grace_period,
        );
    }

    let cluster_endpoint = config.cluster_endpoint.clone();
    let cluster_router = Arc::clone(&router);
    let listener_task = tokio::spawn(async move {
        if let Err(err) = listener::serve(cluster_router, &cluster_endpoint).await {
            tracing::error!(error = %err, "cluster listener exited");
        }
    });

    let advertiser_router = Arc::clone(&router);
    let seeds = args.seeds.clone();
    let advertise_interval = config.cluster_advertise_interval;
    let advertiser_task = tokio::spawn(advertiser::run(advertiser_router, seeds, advertise_interval));

    let sweeper_router = Arc::clone(&router);
    let sweep_interval = config.sweep_interval;
    let sweeper_task = tokio::spawn(advertiser::run_sweeper(sweeper_router, sweep_interval));

    let server_endpoint = config.server_endpoint.clone();
    let client_listener = tokio::net::TcpListener::bind(&server_endpoint).await?;
    info!(%server_endpoint, "client RPC listener bound");

    let handler = Handler::new(Arc::clone(&router));
    let mut shutdown = std::pin::pin!(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    loop {
        tokio::select! {
            accept_result = client_listener.accept() => {
                match accept_result {
                    Ok((socket, _)) => {
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
                    Err(err) => error!(error = %err, "client RPC accept error"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, draining");
                break;
            }
        }
    }

    listener_task.abort();
    advertiser_task.abort();
    sweeper_task.abort();
    node.stop();

    Ok(())
}
