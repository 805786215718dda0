//! GSLB DNSSEC Node Entry Point
//!
//! This binary runs the DNSSEC side of a GSLB authoritative node:
//! - Key bootstrap for configured zones (loaded, else generated)
//! - Key persistence in memory or SQLite
//! - Periodic public key sync from peer nodes
//! - HTTP API for peers and operators
//!
//! ## Usage
//!
//! ```bash
//! # Run with default configuration
//! gslb-dnssec --zone example.com
//!
//! # Run with a config file (TOML or YAML)
//! gslb-dnssec --config /etc/gslb/dnssec.toml
//!
//! # Two-node lab setup
//! gslb-dnssec --node-id gslb-1 --api-addr 127.0.0.1:9090 --peer http://127.0.0.1:9091 --zone example.com
//! gslb-dnssec --node-id gslb-2 --api-addr 127.0.0.1:9091 --peer http://127.0.0.1:9090
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use gslb_dnssec::dns::{
    spawn_dnssec_api, DnssecApi, DnssecSigner, KeyRegistry, KeyStore, KeySyncer, KvStore,
    MemoryKvStore, NodeConfig, Nsec3Engine, SqliteKvStore, StorageBackend,
};

/// GSLB DNSSEC Node
#[derive(Parser, Debug)]
#[command(name = "gslb-dnssec")]
#[command(author = "GSLB Team")]
#[command(version)]
#[command(about = "GSLB authoritative node DNSSEC service", long_about = None)]
struct Args {
    /// Path to configuration file (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node identifier recorded on generated keys
    #[arg(long)]
    node_id: Option<String>,

    /// API listen address (default: 0.0.0.0:9090)
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Peer node base URL (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Zone to bootstrap a key for (repeatable)
    #[arg(long = "zone")]
    zones: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting GSLB DNSSEC node v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, then apply command line overrides
    let mut config = match args.config {
        Some(ref path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };

    if let Some(node_id) = args.node_id {
        config.node_id = node_id;
    }
    if let Some(addr) = args.api_addr {
        config.api.addr = addr;
    }
    config.sync.peers.extend(args.peers);
    config.zones.extend(args.zones);

    config.validate()?;

    // Key persistence
    let kv: Arc<dyn KvStore> = match config.storage.backend {
        StorageBackend::Memory => {
            info!("Key storage: in-memory");
            Arc::new(MemoryKvStore::new())
        }
        StorageBackend::Sqlite => {
            let path = config.storage.path.clone().unwrap_or_default();
            info!("Key storage: SQLite at {}", path);
            Arc::new(SqliteKvStore::new(&path)?)
        }
    };

    let registry = Arc::new(KeyRegistry::new(config.node_id.clone()));
    let key_store = Arc::new(KeyStore::new(kv, registry.clone()));

    key_store.load_all().await?;

    if config.enabled {
        let generated = key_store
            .ensure_keys_for_zones(&config.zones, config.algorithm)
            .await?;
        info!(
            "DNSSEC keys ready for {} zones ({} newly generated)",
            config.zones.len(),
            generated
        );

        for key in registry.get_all() {
            match key.ds_record_string() {
                Ok(ds) => info!("DS for parent zone: {}", ds),
                Err(e) => warn!("Cannot compute DS for zone {}: {}", key.zone(), e),
            }
        }
    } else {
        info!("DNSSEC disabled; serving unsigned responses");
    }

    // Signer
    let nsec3 = Arc::new(Nsec3Engine::new(config.nsec3.clone())?);
    let signer = Arc::new(
        DnssecSigner::new(registry.clone(), nsec3, config.dnssec_config()).with_metrics(Arc::new(
            |zone: &str, elapsed: Duration, success: bool| {
                debug!("Signed response for zone {} in {:?} (success: {})", zone, elapsed, success);
            },
        )),
    );

    // Peer sync
    let syncer = Arc::new(
        KeySyncer::new(config.key_sync_config(), registry.clone(), Some(key_store.clone()))?
            .with_metrics(Arc::new(|peer: &str, success: bool, imported: usize| {
                debug!("Key sync from {}: success={} imported={}", peer, success, imported);
            })),
    );

    // API
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let api_task = if config.api.enabled {
        let api = Arc::new(
            DnssecApi::new(config.enabled, registry.clone())
                .with_signer(signer.clone())
                .with_syncer(syncer.clone()),
        );
        let (addr, handle) = spawn_dnssec_api(config.api.addr, api, async move {
            let _ = shutdown_rx.await;
        })?;
        info!("  API: http://{}", addr);
        Some(handle)
    } else {
        info!("  API: disabled");
        None
    };

    if config.enabled && !config.sync.peers.is_empty() {
        syncer.start().await?;
    } else {
        info!("Key sync: no peers configured");
    }

    info!("  Node: {}", config.node_id);
    info!("  Zones: {}", registry.zones().join(", "));
    info!("  Peers: {}", config.sync.peers.join(", "));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    syncer.stop().await;

    if let Err(e) = key_store.save_all().await {
        error!("Failed to persist keys on shutdown: {}", e);
    }

    let _ = shutdown_tx.send(());
    if let Some(handle) = api_task {
        if let Err(e) = handle.await {
            error!("API task ended abnormally: {}", e);
        }
    }

    info!("GSLB DNSSEC node stopped");
    Ok(())
}
