//! Periodic membership broadcast to a fixed set of seed peers.
//!
//! There is no membership-discovery protocol: every node is started knowing
//! the endpoints of at least one other live node (or none, for the first
//! node in a fresh cluster).

use super::ClusterRouter;
use geotracker_wire::Command;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Runs forever, sending one `Advertise` to every entry in `seeds` each
/// `interval`. A seed that is unreachable is logged and skipped; the next
/// tick tries again, so a peer that starts late or restarts is picked up
/// without any special-casing.
pub async fn run(router: Arc<ClusterRouter>, seeds: Vec<String>, interval: std::time::Duration) {
    let grace = router.config().cluster_grace_period;
    loop {
        let alive_until = SystemTime::now() + grace;
        // A node is always a member of its own topology view; nothing else
        // would ever merge this node's own advertisement in, and without a
        // periodic self-refresh its self-entry would expire after one grace
        // period the same as any other member's would.
        router
            .node()
            .topology()
            .merge_advertisement(router.node_id().to_string(), router.self_endpoint().to_string(), alive_until);

        let advertise = Command::Advertise {
            node_id: router.node_id().to_string(),
            endpoint: router.self_endpoint().to_string(),
            view_version: router.node().topology().current().version(),
            alive_until,
        };
        for seed in &seeds {
            if seed == router.self_endpoint() {
                continue;
            }
            if let Err(err) = send_once(seed, advertise.clone()).await {
                tracing::debug!(%seed, error = %err, "advertisement to seed failed");
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// Periodic housekeeping sweep, run on its own cadence (`sweepInterval`)
/// independent of the advertise interval: drops members whose grace period
/// has lapsed even if no advertisement happens to arrive and trigger the
/// same check inline.
pub async fn run_sweeper(router: Arc<ClusterRouter>, interval: std::time::Duration) {
    loop {
        tokio::time::sleep(interval).await;
        router.node().topology().sweep_expired();
    }
}

async fn send_once(endpoint: &str, command: Command) -> std::io::Result<()> {
    use futures::{SinkExt, StreamExt};

    let stream = TcpStream::connect(endpoint).await?;
    let mut framed = Framed::new(stream, geotracker_wire::ClientCodec);
    framed.send(command).await.map_err(|e| std::io::Error::other(e.to_string()))?;
    framed
        .next()
        .await
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"))?
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(())
}
