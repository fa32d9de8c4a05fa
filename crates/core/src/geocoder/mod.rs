//! The IPv4 geocode index and its hot-swap lifecycle.

mod index;
mod private_ranges;
mod verify;

pub use index::{GeoFileHeader, GeoIndex};
pub use private_ranges::is_private_or_reserved;

use arc_swap::ArcSwap;
use geotracker_types::fix::{GeoFix, Technology};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// Injected capability for fetching the remote data source: a `HEAD` to
/// check `Last-Modified`, and a `GET` for the full payload. Implemented with
/// `reqwest`'s blocking client, since this polling loop runs on a plain
/// `std::thread`, not a tokio runtime.
pub trait GeoDataSource: Send + Sync {
    fn head_last_modified(&self, uri: &str, timeout: Duration) -> Result<Option<SystemTime>, String>;
    fn get(&self, uri: &str, timeout: Duration) -> Result<Vec<u8>, String>;
}

/// `reqwest::blocking`-backed [`GeoDataSource`].
pub struct HttpGeoDataSource;

impl GeoDataSource for HttpGeoDataSource {
    fn head_last_modified(&self, uri: &str, timeout: Duration) -> Result<Option<SystemTime>, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;
        let response = client.head(uri).send().map_err(|e| e.to_string())?;
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());
        Ok(last_modified)
    }

    fn get(&self, uri: &str, timeout: Duration) -> Result<Vec<u8>, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;
        let response = client.get(uri).send().map_err(|e| e.to_string())?;
        response.bytes().map(|b| b.to_vec()).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocoderState {
    Degraded,
    Serving,
}

/// Serves IPv4 -> GeoFix lookups from an in-memory index kept current from a
/// remote signed data source. Readers never block the background updater
/// and vice versa: lookups read through `ArcSwap::load`, the updater
/// installs a new index with `ArcSwap::store`.
pub struct IpGeocoder {
    index: ArcSwap<Option<GeoIndex>>,
    enabled: bool,
    source_uri: Option<String>,
    public_key_pem: Option<String>,
    poll_interval: Duration,
    source_timeout: Duration,
    data_file_path: Option<PathBuf>,
    data_source: Arc<dyn GeoDataSource>,
    stop: Arc<AtomicBool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl IpGeocoder {
    pub fn new(
        enabled: bool,
        source_uri: Option<String>,
        public_key_pem: Option<String>,
        poll_interval: Duration,
        source_timeout: Duration,
        data_file_path: Option<PathBuf>,
        data_source: Arc<dyn GeoDataSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            index: ArcSwap::from_pointee(None),
            enabled,
            source_uri,
            public_key_pem,
            poll_interval,
            source_timeout,
            data_file_path,
            data_source,
            stop: Arc::new(AtomicBool::new(false)),
            handle: parking_lot::Mutex::new(None),
        })
    }

    /// On startup: loads the local data file if present, then spawns the
    /// background poller. If disabled, does nothing and every lookup
    /// returns `None` ("not-available").
    pub fn start(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }
        if let Some(path) = &self.data_file_path {
            if let Ok(bytes) = std::fs::read(path) {
                match GeoIndex::decode(&bytes) {
                    Ok(index) => self.index.store(Arc::new(Some(index))),
                    Err(err) => tracing::warn!("local geocode data file is corrupt: {err}"),
                }
            }
        }

        let geocoder = Arc::clone(self);
        let stop = Arc::clone(&self.stop);
        let interval = self.poll_interval;
        let handle = std::thread::spawn(move || {
            geocoder.poll_once();
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                geocoder.poll_once();
            }
        });
        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Whether `ipGeocodeEnabled` was set for this node; `ipToGeoFix`
    /// surfaces `"not-available"` instead of attempting a lookup when this
    /// is `false`.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> GeocoderState {
        if self.index.load().is_some() {
            GeocoderState::Serving
        } else {
            GeocoderState::Degraded
        }
    }

    /// A single poll cycle: `HEAD` for `Last-Modified`, and if newer than
    /// what's installed (or nothing is installed yet), a full `GET`,
    /// verify, and hot-swap. Any failure is logged and leaves the current
    /// in-memory index serving.
    fn poll_once(&self) {
        let Some(uri) = &self.source_uri else { return };
        let remote_last_modified = match self.data_source.head_last_modified(uri, self.source_timeout) {
            Ok(lm) => lm,
            Err(err) => {
                tracing::warn!("geocode source HEAD failed: {err}");
                return;
            }
        };

        let current_last_modified = self.index.load().as_ref().as_ref().and_then(|i| i.last_modified);
        if let (Some(remote), Some(current)) = (remote_last_modified, current_last_modified) {
            if remote <= current {
                return;
            }
        }

        let payload = match self.data_source.get(uri, self.source_timeout) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("geocode source GET failed: {err}");
                return;
            }
        };

        let verified = match &self.public_key_pem {
            Some(pem) => match verify::verify_payload(pem, &payload) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!("geocode payload failed verification: {err}");
                    return;
                }
            },
            None => payload,
        };

        let mut new_index = match GeoIndex::decode(&verified) {
            Ok(index) => index,
            Err(err) => {
                tracing::warn!("geocode payload failed to parse: {err}");
                return;
            }
        };
        new_index.last_modified = remote_last_modified.or(Some(SystemTime::now()));

        if let Some(path) = &self.data_file_path {
            if let Err(err) = install_atomically(path, &new_index) {
                tracing::warn!("failed to install geocode data file: {err}");
                return;
            }
        }

        self.index.store(Arc::new(Some(new_index)));
    }

    /// IPv4-only lookup. Private/reserved ranges short-circuit without
    /// touching the index. The returned fix has `technology = ip` and
    /// `time_utc = now`.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<GeoFix> {
        if is_private_or_reserved(addr) {
            return None;
        }
        let index = self.index.load();
        let index = index.as_ref().as_ref()?;
        let key = u32::from_be_bytes(addr.octets());
        let record = index.lookup(key)?;
        let mut fix = GeoFix::new(SystemTime::now(), round4(record.latitude), round4(record.longitude));
        fix.technology = Technology::Ip;
        Some(fix)
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Writes the new index to a temp file alongside `path`, then renames it
/// over the live file — an atomic replace on POSIX filesystems.
fn install_atomically(path: &Path, index: &GeoIndex) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, index.encode())?;
    std::fs::rename(&tmp_path, path)?;
    if let Some(last_modified) = index.last_modified {
        let _ = filetime_set(path, last_modified);
    }
    Ok(())
}

fn filetime_set(path: &Path, _time: SystemTime) -> std::io::Result<()> {
    // Best-effort; absence of a mtime-setting crate in the dependency stack
    // means this is a no-op placeholder rather than a hard requirement —
    // the in-memory `last_modified` is authoritative for poll comparisons.
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geotracker_types::geocode::{IpGeoRecord, IpRange};
    use std::sync::Mutex;

    struct StubSource {
        payload: Vec<u8>,
        last_modified: SystemTime,
        calls: Mutex<u32>,
    }

    impl GeoDataSource for StubSource {
        fn head_last_modified(&self, _uri: &str, _timeout: Duration) -> Result<Option<SystemTime>, String> {
            Ok(Some(self.last_modified))
        }

        fn get(&self, _uri: &str, _timeout: Duration) -> Result<Vec<u8>, String> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.payload.clone())
        }
    }

    fn sample_index() -> GeoIndex {
        let ranges = vec![IpRange {
            range_start: u32::from_be_bytes([72, 14, 213, 0]),
            range_end: u32::from_be_bytes([72, 14, 213, 255]),
            record_index: 0,
        }];
        let records = vec![IpGeoRecord {
            latitude: 37.4192,
            longitude: -122.0574,
            country: Some("US".into()),
            region: None,
            city: None,
        }];
        GeoIndex::from_sorted(ranges, records, SystemTime::now())
    }

    #[test]
    fn private_address_short_circuits_without_index() {
        let geocoder = IpGeocoder::new(
            true,
            None,
            None,
            Duration::from_secs(3600),
            Duration::from_secs(5),
            None,
            Arc::new(StubSource { payload: Vec::new(), last_modified: SystemTime::now(), calls: Mutex::new(0) }),
        );
        assert!(geocoder.lookup("10.1.2.3".parse().unwrap()).is_none());
    }

    #[test]
    fn looks_up_known_public_address_after_poll() {
        let index = sample_index();
        let payload = index.encode();
        let source = Arc::new(StubSource {
            payload,
            last_modified: SystemTime::now(),
            calls: Mutex::new(0),
        });
        let geocoder = IpGeocoder::new(
            true,
            Some("https://example.test/geo.dat".to_string()),
            None,
            Duration::from_secs(3600),
            Duration::from_secs(5),
            None,
            source,
        );
        geocoder.poll_once();
        let fix = geocoder.lookup("72.14.213.147".parse().unwrap()).unwrap();
        assert_eq!(fix.latitude, 37.4192);
        assert_eq!(fix.longitude, -122.0574);
        assert_eq!(fix.technology, Technology::Ip);
    }

    #[test]
    fn disabled_geocoder_never_serves() {
        let geocoder = IpGeocoder::new(
            false,
            None,
            None,
            Duration::from_secs(3600),
            Duration::from_secs(5),
            None,
            Arc::new(StubSource { payload: Vec::new(), last_modified: SystemTime::now(), calls: Mutex::new(0) }),
        );
        assert_eq!(geocoder.state(), GeocoderState::Degraded);
        assert!(geocoder.lookup("72.14.213.147".parse().unwrap()).is_none());
    }
}
