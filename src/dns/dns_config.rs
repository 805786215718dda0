//! Node Configuration
//!
//! Configuration structs for a GSLB DNSSEC node: key bootstrap, NSEC3 and
//! signing parameters, peer sync, key persistence and the HTTP API.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use super::dns_types::{canonical_name, DnsError};
use super::dnssec::DnssecConfig;
use super::dnssec_keys::DnssecAlgorithm;
use super::key_sync::KeySyncConfig;
use super::nsec3::Nsec3Config;

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identifier recorded on every key this node generates
    pub node_id: String,

    /// Enable DNSSEC signing and the DNSSEC API
    pub enabled: bool,

    /// Zones to bootstrap keys for at startup
    pub zones: Vec<String>,

    /// Algorithm for newly generated keys
    pub algorithm: DnssecAlgorithm,

    /// Synthetic NSEC3 parameters
    pub nsec3: Nsec3Config,

    /// RRSIG timing
    pub signing: SigningConfig,

    /// Peer key synchronization
    pub sync: SyncConfig,

    /// Key persistence
    pub storage: StorageConfig,

    /// HTTP API
    pub api: ApiConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "gslb-node".to_string(),
            enabled: true,
            zones: Vec::new(),
            algorithm: DnssecAlgorithm::default(),
            nsec3: Nsec3Config::default(),
            signing: SigningConfig::default(),
            sync: SyncConfig::default(),
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.node_id.trim().is_empty() {
            return Err(DnsError::ConfigError("node_id must not be empty".to_string()));
        }

        for zone in &self.zones {
            if canonical_name(zone) == "." {
                return Err(DnsError::ConfigError(format!("invalid zone name: {:?}", zone)));
            }
        }

        self.nsec3.validate()?;

        if self.signing.validity_secs == 0 {
            return Err(DnsError::ConfigError(
                "signing.validity_secs must be > 0".to_string(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(DnsError::ConfigError(
                "sync.poll_interval_secs must be > 0".to_string(),
            ));
        }

        if self.sync.timeout_secs == 0 {
            return Err(DnsError::ConfigError(
                "sync.timeout_secs must be > 0".to_string(),
            ));
        }

        for peer in &self.sync.peers {
            if !(peer.starts_with("http://") || peer.starts_with("https://")) {
                return Err(DnsError::ConfigError(format!(
                    "sync peer must be an http(s) URL: {}",
                    peer
                )));
            }
        }

        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.path.as_deref().map_or(true, str::is_empty)
        {
            return Err(DnsError::ConfigError(
                "sqlite storage requires path".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from TOML
    pub fn from_toml(content: &str) -> Result<Self, DnsError> {
        toml::from_str(content).map_err(|e| DnsError::ConfigError(format!("TOML parse error: {}", e)))
    }

    /// Load configuration from YAML
    pub fn from_yaml(content: &str) -> Result<Self, DnsError> {
        serde_yaml::from_str(content)
            .map_err(|e| DnsError::ConfigError(format!("YAML parse error: {}", e)))
    }

    /// Read a config file, picking the format from its extension
    pub fn from_file(path: &Path) -> Result<Self, DnsError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DnsError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_toml(&content),
        }
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, DnsError> {
        toml::to_string_pretty(self)
            .map_err(|e| DnsError::ConfigError(format!("TOML serialize error: {}", e)))
    }

    pub fn dnssec_config(&self) -> DnssecConfig {
        DnssecConfig {
            signature_validity: Duration::from_secs(self.signing.validity_secs),
            inception_offset: Duration::from_secs(self.signing.inception_offset_secs),
            signature_ttl: self.signing.signature_ttl,
        }
    }

    pub fn key_sync_config(&self) -> KeySyncConfig {
        KeySyncConfig {
            peers: self.sync.peers.clone(),
            poll_interval: Duration::from_secs(self.sync.poll_interval_secs),
            timeout: Duration::from_secs(self.sync.timeout_secs),
        }
    }
}

/// RRSIG timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Backdate inception by this much to absorb clock skew
    pub inception_offset_secs: u64,
    /// Signature lifetime from now
    pub validity_secs: u64,
    /// Upper bound for RRSIG TTLs
    pub signature_ttl: u32,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            inception_offset_secs: 3600,
            validity_secs: 7 * 86400,
            signature_ttl: 86400,
        }
    }
}

/// Peer key sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Peer base URLs
    pub peers: Vec<String>,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            poll_interval_secs: 3600,
            timeout_secs: 30,
        }
    }
}

/// Key-value backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Key persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file (sqlite only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// DNSSEC API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable API server
    pub enabled: bool,
    /// API server listen address
    pub addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}
