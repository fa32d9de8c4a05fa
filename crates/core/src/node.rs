//! The node-owned registry: a process-wide set of components initialised
//! once at node start, owned by the node struct, with explicit teardown.
//!
//! `Node` is the single place that constructs and wires together the four
//! in-process components from a [`Config`]: [`FixCache`], [`ArchiverPipeline`],
//! [`IpGeocoder`], and [`TopologyView`]. It has no networking of its own —
//! `geotracker-server` owns the node id, the RPC surface, and the
//! intra-cluster transport, and drives this registry's `start`/`stop` and
//! the query engine functions in `crate::query` against `Node::cache()`.

use crate::archiver::{ArchiverPipeline, NullArchiver};
use crate::cluster::TopologyView;
use crate::config::{ArchiverKind, Config};
use crate::error::{GeoError, Result};
use crate::fixcache::{ArchiveSink, FixCache, NullSink};
use crate::geocoder::{HttpGeoDataSource, IpGeocoder};
use std::path::PathBuf;
use std::sync::Arc;

/// Owns every in-process component for one GeoTracker node and their shared
/// configuration. Constructed once at startup; `start()`/`stop()` bracket
/// its lifetime the same way `FixCache`'s own state machine brackets its
/// background purge task.
pub struct Node {
    config: Config,
    cache: Arc<FixCache>,
    topology: Arc<TopologyView>,
    archiver: Option<Arc<ArchiverPipeline>>,
    geocoder: Arc<IpGeocoder>,
}

impl Node {
    /// Builds every component from `config` but starts none of them; call
    /// [`Node::start`] to spawn background tasks. Archiver construction can
    /// fail (e.g. the `appLog` journal's directory cannot be created), so
    /// this is fallible while the other three components are not.
    pub fn build(config: Config) -> Result<Self> {
        config.validate().map_err(GeoError::validation)?;

        let archiver: Option<Arc<ArchiverPipeline>> = match config.archiver {
            ArchiverKind::Null => Some(ArchiverPipeline::start(
                Box::new(NullArchiver),
                config.buffer_size,
                config.buffer_interval,
                config.archiver_retry_interval,
                config.archiver_max_retries,
                config.shutdown_drain_deadline,
                config.spill_file_path.as_ref().map(PathBuf::from),
            )),
            ArchiverKind::AppLog => {
                let path = config
                    .archiver_app_log_path
                    .as_ref()
                    .ok_or_else(|| GeoError::validation("archiver_app_log_path is required"))?;
                let backend = crate::archiver::AppLogArchiver::open(
                    PathBuf::from(path),
                    config.archiver_app_log_max_segment_size,
                    config.archiver_app_log_max_total_size,
                    config.archiver_app_log_max_age,
                )
                .map_err(GeoError::Io)?;
                Some(ArchiverPipeline::start(
                    Box::new(backend),
                    config.buffer_size,
                    config.buffer_interval,
                    config.archiver_retry_interval,
                    config.archiver_max_retries,
                    config.shutdown_drain_deadline,
                    config.spill_file_path.as_ref().map(PathBuf::from),
                ))
            }
            // `sql` requires a driver-specific `SqlConnection` that only a
            // caller with access to the actual driver crate can supply;
            // `Node::build` has no opinion on which one, so a node
            // configured this way is wired up by `geotracker-server`
            // through `Node::build_with_archiver` instead of this path.
            ArchiverKind::Sql => None,
        };

        let sink: Arc<dyn ArchiveSink> = match &archiver {
            Some(pipeline) => Arc::clone(pipeline) as Arc<dyn ArchiveSink>,
            None => Arc::new(NullSink),
        };

        let cache = FixCache::new(
            config.max_entity_fixes,
            config.geo_fix_retention_interval,
            config.geo_fix_purge_interval,
            config.clock_skew_tolerance,
            sink,
        );

        let topology = TopologyView::new(config.cluster_grace_period);

        let geocoder = IpGeocoder::new(
            config.ip_geocode_enabled,
            config.ip_geocode_source_uri.clone(),
            config.ip_geocode_source_key.clone(),
            config.ip_geocode_poll_interval,
            config.ip_geocode_source_timeout,
            config.ip_geocode_data_file_path.as_ref().map(PathBuf::from),
            Arc::new(HttpGeoDataSource),
        );

        Ok(Self { config, cache, topology, archiver, geocoder })
    }

    /// Like [`Node::build`], but for `archiver = sql` nodes: takes the
    /// already-started `ArchiverPipeline` so `geotracker-server` can supply
    /// a concrete `SqlConnection` from whichever driver crate it links.
    pub fn build_with_archiver(config: Config, archiver: Arc<ArchiverPipeline>) -> Result<Self> {
        config.validate().map_err(GeoError::validation)?;
        let sink: Arc<dyn ArchiveSink> = Arc::clone(&archiver) as Arc<dyn ArchiveSink>;
        let cache = FixCache::new(
            config.max_entity_fixes,
            config.geo_fix_retention_interval,
            config.geo_fix_purge_interval,
            config.clock_skew_tolerance,
            sink,
        );
        let topology = TopologyView::new(config.cluster_grace_period);
        let geocoder = IpGeocoder::new(
            config.ip_geocode_enabled,
            config.ip_geocode_source_uri.clone(),
            config.ip_geocode_source_key.clone(),
            config.ip_geocode_poll_interval,
            config.ip_geocode_source_timeout,
            config.ip_geocode_data_file_path.as_ref().map(PathBuf::from),
            Arc::new(HttpGeoDataSource),
        );
        Ok(Self { config, cache, topology, archiver: Some(archiver), geocoder })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<FixCache> {
        &self.cache
    }

    pub fn topology(&self) -> &Arc<TopologyView> {
        &self.topology
    }

    pub fn geocoder(&self) -> &Arc<IpGeocoder> {
        &self.geocoder
    }

    /// Spawns every component's background task: the fix cache's purge
    /// timer, the archiver's flusher, and the IP-geocoder's poller. The
    /// cluster advertiser/listener is driven by `geotracker-server` (it
    /// needs a real socket), so `Node` only exposes `topology()` for it to
    /// feed advertisements into.
    pub fn start(&self) {
        self.cache.start();
        self.geocoder.start();
    }

    /// Stops every owned background task, in the reverse order they were
    /// started, forcing the archiver's final synchronous flush.
    pub fn stop(&self) {
        self.geocoder.stop();
        self.cache.stop();
        if let Some(archiver) = &self.archiver {
            archiver.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn builds_and_starts_with_default_config() {
        let node = Node::build(Config::default()).unwrap();
        node.start();
        assert_eq!(node.cache().entity_count(), 0);
        node.stop();
    }

    #[test]
    fn app_log_archiver_requires_path_to_build() {
        let config = Config::default().with_archiver(ArchiverKind::AppLog);
        assert!(Node::build(config).is_err());
    }

    #[test]
    fn node_with_app_log_archiver_writes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.log");
        let config = Config::default()
            .with_archiver(ArchiverKind::AppLog)
            .with_buffer_interval(Duration::from_secs(300));
        let mut config = config;
        config.archiver_app_log_path = Some(path.to_string_lossy().into_owned());

        let node = Node::build(config).unwrap();
        node.start();
        let jeff = geotracker_types::ids::EntityId::new("jeff").unwrap();
        node.cache()
            .add(jeff, None, geotracker_types::fix::GeoFix::new(std::time::SystemTime::now(), 1.0, 2.0))
            .unwrap();
        node.stop();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
