//! DNSSEC Key Synchronization
//!
//! Nodes share no datastore. Each one polls its peers' key endpoint and
//! merges what it receives with a newest-wins rule, so every node can
//! validate every other node's signatures. Imported keys are always stripped
//! of private material.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use super::dnssec_keys::{KeyPair, KeyRegistry};
use super::key_store::KeyStore;
use crate::lock_utils::{lock_or_recover, read_lock_or_recover, write_lock_or_recover};

/// Path of the key exchange endpoint on every node
pub const KEYS_PATH: &str = "/api/v1/dnssec/keys";

/// Longest peer error body kept in the status table
const MAX_ERROR_BODY: usize = 1024;

/// Sync metrics callback: (peer, success, keys imported)
pub type SyncMetricsHook = Arc<dyn Fn(&str, bool, usize) + Send + Sync>;

/// Key sync configuration
#[derive(Debug, Clone)]
pub struct KeySyncConfig {
    /// Base URLs of peer nodes, e.g. "http://gslb-2.internal:9090"
    pub peers: Vec<String>,
    /// Time between polls (default: 1 hour)
    pub poll_interval: Duration,
    /// Per-request timeout (default: 30 seconds)
    pub timeout: Duration,
}

impl Default for KeySyncConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            poll_interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result of the last sync attempt against one peer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerSyncStatus {
    pub peer: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub keys_imported: usize,
}

/// Aggregate syncer state for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub running: bool,
    pub poll_interval_secs: u64,
    pub peers: Vec<PeerSyncStatus>,
}

/// Body of the key exchange endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct KeySyncResponse {
    /// Entries are decoded one by one so a single bad key does not void the
    /// whole payload. Absent when the peer has DNSSEC disabled.
    #[serde(default)]
    pub keys: Vec<serde_json::Value>,
}

/// Polls peers and merges their keys into the local registry
pub struct KeySyncer {
    config: KeySyncConfig,
    client: reqwest::Client,
    registry: Arc<KeyRegistry>,
    key_store: Option<Arc<KeyStore>>,
    metrics: Option<SyncMetricsHook>,
    running: AtomicBool,
    /// Bumped by every `stop`; passes watch for a change from their start value
    shutdown: watch::Sender<u64>,
    task: Mutex<Option<JoinHandle<()>>>,
    status: RwLock<HashMap<String, PeerSyncStatus>>,
}

impl KeySyncer {
    pub fn new(
        config: KeySyncConfig,
        registry: Arc<KeyRegistry>,
        key_store: Option<Arc<KeyStore>>,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(format!("gslb-dnssec-keysync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let (shutdown, _) = watch::channel(0u64);

        Ok(Self {
            config,
            client,
            registry,
            key_store,
            metrics: None,
            running: AtomicBool::new(false),
            shutdown,
            task: Mutex::new(None),
            status: RwLock::new(HashMap::new()),
        })
    }

    /// Report (peer, success, keys imported) after every peer attempt
    pub fn with_metrics(mut self, hook: SyncMetricsHook) -> Self {
        self.metrics = Some(hook);
        self
    }

    pub fn peers(&self) -> &[String] {
        &self.config.peers
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one sync pass, then keep polling in the background until `stop`
    pub async fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }

        info!(
            "Starting DNSSEC key syncer ({} peers, poll interval {}s)",
            self.config.peers.len(),
            self.config.poll_interval.as_secs()
        );

        // Taken before the initial pass so a stop at any point is seen
        let stop = StopSignal::new(&self.shutdown);

        self.sync_all_peers(&stop).await;

        let mut task = lock_or_recover(&self.task, "key sync task");
        if !self.is_running() {
            // Stopped during the initial pass
            return Ok(());
        }

        let syncer = Arc::clone(self);
        let mut loop_stop = stop.clone();
        *task = Some(tokio::spawn(async move {
            let period = syncer.config.poll_interval;
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        syncer.sync_all_peers(&stop).await;
                    }
                    _ = loop_stop.stopped() => break,
                }
            }
            debug!("Key sync loop exited");
        }));

        Ok(())
    }

    /// Stop polling and wait for the current pass to wind down. Calling it on
    /// a stopped syncer does nothing.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shutdown.send_modify(|generation| *generation = generation.wrapping_add(1));
        let handle = lock_or_recover(&self.task, "key sync task").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Key sync task ended abnormally: {}", e);
            }
        }
        info!("Stopped DNSSEC key syncer");
    }

    /// Sync from every peer now. Returns the number of keys imported.
    pub async fn sync_now(&self) -> usize {
        self.sync_all_peers(&StopSignal::new(&self.shutdown)).await
    }

    async fn sync_all_peers(&self, stop: &StopSignal) -> usize {
        let mut total = 0;
        for peer in &self.config.peers {
            match self.sync_from_peer(peer, stop).await {
                Ok(imported) => {
                    self.record_result(peer, Ok(imported));
                    total += imported;
                }
                Err(e) => {
                    warn!("Failed to sync keys from peer {}: {}", peer, e);
                    self.record_result(peer, Err(e.to_string()));
                }
            }
        }
        total
    }

    async fn sync_from_peer(&self, peer: &str, stop: &StopSignal) -> Result<usize, SyncError> {
        debug!("Syncing keys from peer {}", peer);

        let keys = self.fetch_keys(peer, stop).await?;
        let received = keys.len();

        let mut imported = 0;
        for raw in keys {
            let remote: KeyPair = match serde_json::from_value(raw) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Ignoring undecodable key from peer {}: {}", peer, e);
                    continue;
                }
            };

            if let Some(local) = self.registry.get(remote.zone()) {
                if !remote.is_newer_than(&local) {
                    continue;
                }
            }

            let remote = remote.public_only();
            if let Err(e) = self.registry.set(remote.clone()) {
                warn!("Failed to import key for zone {} from peer {}: {}", remote.zone(), peer, e);
                continue;
            }

            if let Some(ref store) = self.key_store {
                if let Err(e) = store.save(&remote).await {
                    warn!("Failed to persist synced key for zone {}: {}", remote.zone(), e);
                }
            }

            imported += 1;
            info!(
                "Imported DNSSEC key for zone {} from peer {} (tag: {}, created: {})",
                remote.zone(),
                peer,
                remote.key_tag(),
                remote.created_at()
            );
        }

        debug!(
            "Completed sync from peer {} ({} received, {} imported)",
            peer, received, imported
        );
        Ok(imported)
    }

    /// Fetch a peer's key list, giving up early on shutdown
    async fn fetch_keys(
        &self,
        peer: &str,
        stop: &StopSignal,
    ) -> Result<Vec<serde_json::Value>, SyncError> {
        if stop.is_stopped() {
            return Err(SyncError::Cancelled);
        }

        let mut stop = stop.clone();
        tokio::select! {
            result = self.request_keys(peer) => result,
            _ = stop.stopped() => Err(SyncError::Cancelled),
        }
    }

    async fn request_keys(&self, peer: &str) -> Result<Vec<serde_json::Value>, SyncError> {
        let url = format!("{}{}", peer.trim_end_matches('/'), KEYS_PATH);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::Transport(format!("timeout fetching {}", url))
                } else {
                    SyncError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let payload: KeySyncResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Payload(e.to_string()))?;
        Ok(payload.keys)
    }

    fn record_result(&self, peer: &str, result: Result<usize, String>) {
        let (success, imported, error) = match result {
            Ok(imported) => (true, imported, None),
            Err(e) => (false, 0, Some(e)),
        };

        write_lock_or_recover(&self.status, "key sync status").insert(
            peer.to_string(),
            PeerSyncStatus {
                peer: peer.to_string(),
                last_sync: Some(Utc::now()),
                last_success: success,
                last_error: error,
                keys_imported: imported,
            },
        );

        if let Some(ref hook) = self.metrics {
            hook(peer, success, imported);
        }
    }

    /// Per-peer results in configured peer order
    pub fn peer_status(&self) -> Vec<PeerSyncStatus> {
        let status = read_lock_or_recover(&self.status, "key sync status");
        self.config
            .peers
            .iter()
            .map(|peer| {
                status.get(peer).cloned().unwrap_or_else(|| PeerSyncStatus {
                    peer: peer.clone(),
                    ..Default::default()
                })
            })
            .collect()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            running: self.is_running(),
            poll_interval_secs: self.config.poll_interval.as_secs(),
            peers: self.peer_status(),
        }
    }
}

/// Stop generation observed when a pass began
#[derive(Clone)]
struct StopSignal {
    rx: watch::Receiver<u64>,
    generation: u64,
}

impl StopSignal {
    fn new(sender: &watch::Sender<u64>) -> Self {
        let rx = sender.subscribe();
        let generation = *rx.borrow();
        Self { rx, generation }
    }

    fn is_stopped(&self) -> bool {
        *self.rx.borrow() != self.generation
    }

    async fn stopped(&mut self) {
        loop {
            if self.is_stopped() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone: nothing will ever signal
                std::future::pending::<()>().await;
            }
        }
    }
}

fn truncate_body(body: &str) -> String {
    let mut end = body.len().min(MAX_ERROR_BODY);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Key sync errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("key syncer already running")]
    AlreadyRunning,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("peer returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("sync cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::dnssec_keys::DnssecAlgorithm;
    use crate::dns::kv_store::MemoryKvStore;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Response, Server, StatusCode};
    use std::convert::Infallible;
    use std::net::SocketAddr;

    /// Serve a fixed response on an ephemeral port
    fn serve_fixed(status: StatusCode, body: String, delay: Duration) -> String {
        let make_svc = make_service_fn(move |_conn| {
            let body = body.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |_req| {
                    let body = body.clone();
                    async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(status)
                                .header("Content-Type", "application/json")
                                .body(Body::from(body))
                                .unwrap(),
                        )
                    }
                }))
            }
        });

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = Server::bind(&addr).serve(make_svc);
        let url = format!("http://{}", server.local_addr());
        tokio::spawn(server);
        url
    }

    fn serve_keys(keys: &[KeyPair]) -> String {
        let body = serde_json::json!({ "keys": keys }).to_string();
        serve_fixed(StatusCode::OK, body, Duration::ZERO)
    }

    fn syncer(peers: Vec<String>, registry: Arc<KeyRegistry>, store: Option<Arc<KeyStore>>) -> KeySyncer {
        let config = KeySyncConfig {
            peers,
            poll_interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(5),
        };
        KeySyncer::new(config, registry, store).unwrap()
    }

    #[tokio::test]
    async fn test_newer_remote_key_is_imported_without_private_key() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let local = registry.generate("z.", DnssecAlgorithm::default()).unwrap();

        let remote = KeyPair::generate("z.", DnssecAlgorithm::default(), "node-b")
            .unwrap()
            .with_created_at(local.created_at() + chrono::Duration::hours(1));
        let peer = serve_keys(&[remote.clone()]);

        let kv = Arc::new(MemoryKvStore::new());
        let store = Arc::new(KeyStore::new(kv, registry.clone()));
        let syncer = syncer(vec![peer.clone()], registry.clone(), Some(store.clone()));

        assert_eq!(syncer.sync_now().await, 1);

        let merged = registry.get("z.").unwrap();
        assert_eq!(merged.created_at(), remote.created_at());
        assert_eq!(merged.public_key(), remote.public_key());
        assert_eq!(merged.node_id(), "node-b");
        assert!(merged.private_key().is_empty());
        assert!(!merged.can_sign());

        let persisted = store.load("z.").await.unwrap().unwrap();
        assert!(persisted.private_key().is_empty());

        let status = syncer.peer_status();
        assert_eq!(status.len(), 1);
        assert!(status[0].last_success);
        assert_eq!(status[0].keys_imported, 1);
        assert!(status[0].last_sync.is_some());
    }

    #[tokio::test]
    async fn test_older_or_equal_remote_key_is_ignored() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let local = registry.generate("z.", DnssecAlgorithm::default()).unwrap();

        let older = KeyPair::generate("z.", DnssecAlgorithm::default(), "node-b")
            .unwrap()
            .with_created_at(local.created_at() - chrono::Duration::hours(1));
        let equal = KeyPair::generate("z.", DnssecAlgorithm::default(), "node-c")
            .unwrap()
            .with_created_at(local.created_at());
        let peer = serve_keys(&[older, equal]);

        let syncer = syncer(vec![peer], registry.clone(), None);
        assert_eq!(syncer.sync_now().await, 0);

        let current = registry.get("z.").unwrap();
        assert_eq!(current.public_key(), local.public_key());
        assert!(current.can_sign());
    }

    #[tokio::test]
    async fn test_unknown_zone_is_imported() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let remote = KeyPair::generate("new.example.", DnssecAlgorithm::EcdsaP384Sha384, "node-b").unwrap();
        let peer = serve_keys(&[remote.clone()]);

        let syncer = syncer(vec![peer], registry.clone(), None);
        assert_eq!(syncer.sync_now().await, 1);
        assert_eq!(registry.get("new.example.").unwrap().key_tag(), remote.key_tag());
    }

    #[tokio::test]
    async fn test_bad_entries_are_skipped() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let good = KeyPair::generate("good.example.", DnssecAlgorithm::default(), "node-b").unwrap();

        let mut bad_alg = serde_json::to_value(good.public_only()).unwrap();
        bad_alg["zone"] = serde_json::json!("rsa.example.");
        bad_alg["algorithm"] = serde_json::json!("RSASHA256");

        let body = serde_json::json!({ "keys": [bad_alg, good.public_only()] }).to_string();
        let peer = serve_fixed(StatusCode::OK, body, Duration::ZERO);

        let syncer = syncer(vec![peer], registry.clone(), None);
        assert_eq!(syncer.sync_now().await, 1);
        assert_eq!(registry.zones(), vec!["good.example.".to_string()]);
    }

    #[tokio::test]
    async fn test_peer_failures_are_recorded_and_isolated() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let remote = KeyPair::generate("z.", DnssecAlgorithm::default(), "node-b").unwrap();

        let long_body = "x".repeat(4096);
        let failing = serve_fixed(StatusCode::INTERNAL_SERVER_ERROR, long_body, Duration::ZERO);
        let malformed = serve_fixed(StatusCode::OK, "{not json".to_string(), Duration::ZERO);
        let unreachable = "http://127.0.0.1:1".to_string();
        let healthy = serve_keys(&[remote]);

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let syncer = syncer(
            vec![failing.clone(), malformed.clone(), unreachable.clone(), healthy.clone()],
            registry.clone(),
            None,
        )
        .with_metrics(Arc::new(move |peer: &str, success: bool, imported: usize| {
            sink.lock().unwrap().push((peer.to_string(), success, imported));
        }));

        assert_eq!(syncer.sync_now().await, 1);
        assert!(registry.get("z.").is_some());

        let status = syncer.peer_status();
        assert_eq!(status.len(), 4);

        assert!(!status[0].last_success);
        let error = status[0].last_error.as_deref().unwrap();
        assert!(error.contains("500"));
        assert!(error.len() < MAX_ERROR_BODY + 64);

        assert!(!status[1].last_success);
        assert!(status[1].last_error.as_deref().unwrap().contains("malformed"));

        assert!(!status[2].last_success);
        assert!(status[2].last_sync.is_some());

        assert!(status[3].last_success);
        assert_eq!(status[3].last_error, None);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[3], (healthy, true, 1));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let syncer = Arc::new(syncer(Vec::new(), registry, None));

        assert!(!syncer.is_running());
        syncer.start().await.unwrap();
        assert!(syncer.is_running());
        assert!(matches!(syncer.start().await, Err(SyncError::AlreadyRunning)));

        let status = syncer.status();
        assert!(status.running);
        assert_eq!(status.poll_interval_secs, 3600);

        syncer.stop().await;
        assert!(!syncer.is_running());
        syncer.stop().await;

        // Restartable after a stop
        syncer.start().await.unwrap();
        syncer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_fetch() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let slow = serve_fixed(StatusCode::OK, r#"{"keys":[]}"#.to_string(), Duration::from_secs(60));
        let syncer = Arc::new(syncer(vec![slow], registry, None));

        let starter = {
            let syncer = syncer.clone();
            tokio::spawn(async move { syncer.start().await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        tokio::time::timeout(Duration::from_secs(5), syncer.stop()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), starter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(!syncer.is_running());
        let status = syncer.peer_status();
        assert_eq!(status[0].last_error.as_deref(), Some("sync cancelled"));
    }

    #[tokio::test]
    async fn test_stop_during_initial_pass_returns_promptly_and_skips_remaining_peers() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let remote = KeyPair::generate("late.example.", DnssecAlgorithm::default(), "node-b").unwrap();
        let slow = serve_fixed(StatusCode::OK, r#"{"keys":[]}"#.to_string(), Duration::from_secs(60));
        let after = serve_keys(&[remote]);

        let config = KeySyncConfig {
            peers: vec![slow, after],
            poll_interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(20),
        };
        let syncer = Arc::new(KeySyncer::new(config, registry.clone(), None).unwrap());

        let started = Instant::now();
        let starter = {
            let syncer = syncer.clone();
            tokio::spawn(async move { syncer.start().await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        syncer.stop().await;
        starter.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        let status = syncer.peer_status();
        assert_eq!(status[0].last_error.as_deref(), Some("sync cancelled"));
        assert_eq!(status[1].last_error.as_deref(), Some("sync cancelled"));
        assert!(registry.get("late.example.").is_none());
    }

    #[tokio::test]
    async fn test_sync_now_works_after_stop() {
        let registry = Arc::new(KeyRegistry::new("node-a"));
        let remote = KeyPair::generate("z.", DnssecAlgorithm::default(), "node-b").unwrap();
        let syncer = Arc::new(syncer(vec![serve_keys(&[remote])], registry.clone(), None));

        syncer.start().await.unwrap();
        registry.remove("z.");
        syncer.stop().await;

        assert_eq!(syncer.sync_now().await, 1);
        assert!(registry.get("z.").is_some());
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(1000);
        let truncated = truncate_body(&body);
        assert!(truncated.len() <= MAX_ERROR_BODY);
        assert!(truncated.chars().all(|c| c == 'é'));
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn test_default_config() {
        let config = KeySyncConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3600));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.peers.is_empty());
    }
}
