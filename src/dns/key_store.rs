//! DNSSEC Key Persistence
//!
//! Bridges the in-memory `KeyRegistry` and a `KvStore` backend. Keys are
//! stored as JSON under `dnssec/<zone without trailing dot>`. The registry
//! stays authoritative: persistence failures are logged, not propagated into
//! the signing path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::dns_types::canonical_name;
use super::dnssec_keys::{DnssecAlgorithm, KeyPair, KeyRegistry};
use super::kv_store::{KvStore, StoreError};

/// Key prefix for DNSSEC entries in the shared key-value store
pub const DNSSEC_PREFIX: &str = "dnssec/";

/// Public view of a key for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub zone: String,
    pub key_tag: u16,
    pub algorithm: DnssecAlgorithm,
    pub flags: u16,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub node_id: String,
    pub can_sign: bool,
    pub age_seconds: i64,
}

impl From<&KeyPair> for KeyInfo {
    fn from(key: &KeyPair) -> Self {
        Self {
            zone: key.zone().to_string(),
            key_tag: key.key_tag(),
            algorithm: key.algorithm(),
            flags: key.flags(),
            public_key: key.public_key().to_string(),
            created_at: key.created_at(),
            node_id: key.node_id().to_string(),
            can_sign: key.can_sign(),
            age_seconds: key.age().num_seconds(),
        }
    }
}

/// Persistence adapter for the key registry
pub struct KeyStore {
    store: Arc<dyn KvStore>,
    registry: Arc<KeyRegistry>,
}

impl KeyStore {
    pub fn new(store: Arc<dyn KvStore>, registry: Arc<KeyRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Storage key for a zone
    pub fn storage_key(zone: &str) -> String {
        format!("{}{}", DNSSEC_PREFIX, canonical_name(zone).trim_end_matches('.'))
    }

    /// Serialize and write a key
    pub async fn save(&self, key: &KeyPair) -> Result<(), StoreError> {
        let data = serde_json::to_vec(key).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(&Self::storage_key(key.zone()), &data).await?;

        info!(
            "Saved DNSSEC key for zone {} (tag: {}, algorithm: {})",
            key.zone(),
            key.key_tag(),
            key.algorithm()
        );
        Ok(())
    }

    /// Stored key for a zone; `Ok(None)` when nothing is stored
    pub async fn load(&self, zone: &str) -> Result<Option<KeyPair>, StoreError> {
        let Some(data) = self.store.get(&Self::storage_key(zone)).await? else {
            return Ok(None);
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("stored key for {}: {}", zone, e)))
    }

    pub async fn delete(&self, zone: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::storage_key(zone)).await?;
        info!("Deleted DNSSEC key for zone {}", canonical_name(zone));
        Ok(())
    }

    /// Load every stored key into the registry, skipping entries that do not
    /// deserialize or reconstruct. Returns the number loaded.
    pub async fn load_all(&self) -> Result<usize, StoreError> {
        let entries = self.store.list(DNSSEC_PREFIX).await?;

        let mut loaded = 0;
        for (storage_key, data) in entries {
            let key: KeyPair = match serde_json::from_slice(&data) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping unreadable stored key {}: {}", storage_key, e);
                    continue;
                }
            };

            let zone = key.zone().to_string();
            let key_tag = key.key_tag();
            if let Err(e) = self.registry.set(key) {
                warn!("Skipping stored key for zone {}: {}", zone, e);
                continue;
            }

            loaded += 1;
            debug!("Loaded DNSSEC key for zone {} (tag: {})", zone, key_tag);
        }

        info!("Loaded {} DNSSEC keys from storage", loaded);
        Ok(loaded)
    }

    /// Persist every registered key. Returns the number saved.
    pub async fn save_all(&self) -> Result<usize, StoreError> {
        let mut saved = 0;
        for key in self.registry.get_all() {
            if let Err(e) = self.save(&key).await {
                warn!("Failed to save key for zone {}: {}", key.zone(), e);
                continue;
            }
            saved += 1;
        }

        info!("Saved {} DNSSEC keys to storage", saved);
        Ok(saved)
    }

    /// Make sure every zone has a key: registered, else stored, else newly
    /// generated and persisted. A stored entry that cannot be read or
    /// registered is replaced. Returns the number of keys generated.
    pub async fn ensure_keys_for_zones(
        &self,
        zones: &[String],
        algorithm: DnssecAlgorithm,
    ) -> Result<usize, StoreError> {
        let mut generated = 0;

        for zone in zones {
            if self.registry.get(zone).is_some() {
                continue;
            }

            match self.load(zone).await {
                Ok(Some(key)) => {
                    let key_tag = key.key_tag();
                    match self.registry.set(key) {
                        Ok(()) => {
                            info!(
                                "Loaded existing DNSSEC key for zone {} (tag: {})",
                                canonical_name(zone),
                                key_tag
                            );
                            continue;
                        }
                        Err(e) => warn!("Ignoring stored key for zone {}: {}", canonical_name(zone), e),
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Cannot read stored key for zone {}: {}", canonical_name(zone), e),
            }

            let key = self.registry.generate(zone, algorithm)?;
            generated += 1;
            if let Err(e) = self.save(&key).await {
                warn!("Generated key for zone {} but failed to persist it: {}", key.zone(), e);
            }
        }

        Ok(generated)
    }

    pub fn key_info(&self, zone: &str) -> Option<KeyInfo> {
        self.registry.get(zone).as_ref().map(KeyInfo::from)
    }

    pub fn all_key_info(&self) -> Vec<KeyInfo> {
        self.registry.get_all().iter().map(KeyInfo::from).collect()
    }
}
