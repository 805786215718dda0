//! DNSSEC Key Management
//!
//! One active ECDSA key pair per zone, held by a `KeyRegistry` that the
//! signer, key store and key syncer all share. Keys generated here are
//! sign-capable; keys received from peers carry only public material and are
//! used for verification.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, EcdsaSigningAlgorithm, KeyPair as _, UnparsedPublicKey, VerificationAlgorithm,
    ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING, ECDSA_P384_SHA384_FIXED,
    ECDSA_P384_SHA384_FIXED_SIGNING,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use super::dns_types::{canonical_name, name_to_wire, DnsRecord, DnsRecordValue};
use crate::lock_utils::{read_lock_or_recover, write_lock_or_recover};

/// DNSKEY protocol field, always 3 (RFC 4034)
pub const DNSKEY_PROTOCOL: u8 = 3;

/// Flags for a zone signing key
pub const FLAGS_ZSK: u16 = 256;

/// Flags for a key signing key; every generated key uses this value
pub const FLAGS_KSK: u16 = 257;

/// TTL of published DNSKEY records
pub const DNSKEY_TTL: u32 = 3600;

/// DS digest type for SHA-256
pub const DIGEST_SHA256: u8 = 2;

/// DNSSEC signing algorithms (RFC 6605)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnssecAlgorithm {
    /// ECDSA P-256 with SHA-256 (Algorithm 13)
    #[serde(rename = "ECDSAP256SHA256")]
    EcdsaP256Sha256,
    /// ECDSA P-384 with SHA-384 (Algorithm 14)
    #[serde(rename = "ECDSAP384SHA384")]
    EcdsaP384Sha384,
}

impl DnssecAlgorithm {
    /// Get the algorithm number
    pub fn number(&self) -> u8 {
        match self {
            DnssecAlgorithm::EcdsaP256Sha256 => 13,
            DnssecAlgorithm::EcdsaP384Sha384 => 14,
        }
    }

    /// Get algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            DnssecAlgorithm::EcdsaP256Sha256 => "ECDSAP256SHA256",
            DnssecAlgorithm::EcdsaP384Sha384 => "ECDSAP384SHA384",
        }
    }

    /// Parse from algorithm number
    pub fn from_number(num: u8) -> Option<Self> {
        match num {
            13 => Some(DnssecAlgorithm::EcdsaP256Sha256),
            14 => Some(DnssecAlgorithm::EcdsaP384Sha384),
            _ => None,
        }
    }

    /// Length of the DNSKEY public key field (uncompressed point, no prefix)
    pub fn public_key_len(&self) -> usize {
        match self {
            DnssecAlgorithm::EcdsaP256Sha256 => 64,
            DnssecAlgorithm::EcdsaP384Sha384 => 96,
        }
    }

    fn signing_algorithm(&self) -> &'static EcdsaSigningAlgorithm {
        match self {
            DnssecAlgorithm::EcdsaP256Sha256 => &ECDSA_P256_SHA256_FIXED_SIGNING,
            DnssecAlgorithm::EcdsaP384Sha384 => &ECDSA_P384_SHA384_FIXED_SIGNING,
        }
    }

    fn verification_algorithm(&self) -> &'static dyn VerificationAlgorithm {
        match self {
            DnssecAlgorithm::EcdsaP256Sha256 => &ECDSA_P256_SHA256_FIXED,
            DnssecAlgorithm::EcdsaP384Sha384 => &ECDSA_P384_SHA384_FIXED,
        }
    }
}

impl Default for DnssecAlgorithm {
    fn default() -> Self {
        DnssecAlgorithm::EcdsaP256Sha256
    }
}

impl fmt::Display for DnssecAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DnssecAlgorithm {
    type Err = KeyError;

    /// Accepts the mnemonic (any case) or the algorithm number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(num) = trimmed.parse::<u8>() {
            return Self::from_number(num).ok_or_else(|| KeyError::UnsupportedAlgorithm(s.to_string()));
        }
        match trimmed.to_uppercase().as_str() {
            "ECDSAP256SHA256" => Ok(DnssecAlgorithm::EcdsaP256Sha256),
            "ECDSAP384SHA384" => Ok(DnssecAlgorithm::EcdsaP384Sha384),
            _ => Err(KeyError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// A zone's active DNSSEC key.
///
/// Only the canonical fields are serialized. The DNSKEY record and the signing
/// handle are derived on first use and memoized, so a freshly deserialized key
/// rebuilds them on demand.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyPair {
    zone: String,
    algorithm: DnssecAlgorithm,
    flags: u16,
    key_tag: u16,
    /// base64 DNSKEY public key field
    public_key: String,
    /// base64 PKCS#8 document, empty for verify-only keys
    #[serde(default, skip_serializing_if = "String::is_empty")]
    private_key: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    node_id: String,

    #[serde(skip)]
    dnskey: OnceCell<DnsRecord>,
    #[serde(skip)]
    signer: OnceCell<Arc<EcdsaKeyPair>>,
}

impl KeyPair {
    /// Generate a fresh key signing key for `zone`
    pub fn generate(zone: &str, algorithm: DnssecAlgorithm, node_id: &str) -> Result<Self, KeyError> {
        if zone.trim().is_empty() {
            return Err(KeyError::EmptyZone);
        }

        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(algorithm.signing_algorithm(), &rng)
            .map_err(|_| KeyError::KeyGenerationFailed(algorithm.name().to_string()))?;
        let signer = EcdsaKeyPair::from_pkcs8(algorithm.signing_algorithm(), pkcs8.as_ref(), &rng)
            .map_err(|e| KeyError::KeyGenerationFailed(e.to_string()))?;

        // ring exposes the SEC1 uncompressed point; DNSKEY drops the 0x04 prefix
        let public_key = signer.public_key().as_ref()[1..].to_vec();
        let key_tag = calculate_key_tag(FLAGS_KSK, algorithm.number(), &public_key);

        let key = Self {
            zone: canonical_name(zone),
            algorithm,
            flags: FLAGS_KSK,
            key_tag,
            public_key: STANDARD.encode(&public_key),
            private_key: STANDARD.encode(pkcs8.as_ref()),
            created_at: Utc::now(),
            node_id: node_id.to_string(),
            dnskey: OnceCell::new(),
            signer: OnceCell::new(),
        };
        let _ = key.signer.set(Arc::new(signer));
        Ok(key)
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn algorithm(&self) -> DnssecAlgorithm {
        self.algorithm
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn key_tag(&self) -> u16 {
        self.key_tag
    }

    /// base64 DNSKEY public key field
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// base64 PKCS#8 private key, empty for verify-only keys
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether this key carries private material and can produce signatures
    pub fn can_sign(&self) -> bool {
        !self.private_key.is_empty()
    }

    /// Decoded DNSKEY public key field, checked against the curve's point size
    pub fn public_key_bytes(&self) -> Result<Vec<u8>, KeyError> {
        let bytes = STANDARD
            .decode(self.public_key.trim())
            .map_err(|e| KeyError::Reconstruction(format!("public key is not base64: {}", e)))?;
        if bytes.len() != self.algorithm.public_key_len() {
            return Err(KeyError::Reconstruction(format!(
                "public key is {} bytes, {} expects {}",
                bytes.len(),
                self.algorithm,
                self.algorithm.public_key_len()
            )));
        }
        Ok(bytes)
    }

    /// The DNSKEY record published at the zone apex
    pub fn dnskey_record(&self) -> Result<DnsRecord, KeyError> {
        self.dnskey
            .get_or_try_init(|| {
                let public_key = self.public_key_bytes()?;
                Ok(DnsRecord::new(
                    &self.zone,
                    DNSKEY_TTL,
                    DnsRecordValue::DNSKEY {
                        flags: self.flags,
                        protocol: DNSKEY_PROTOCOL,
                        algorithm: self.algorithm.number(),
                        public_key,
                    },
                ))
            })
            .map(Clone::clone)
    }

    /// DNSKEY RDATA: flags | protocol | algorithm | public key
    pub fn dnskey_rdata(&self) -> Result<Vec<u8>, KeyError> {
        let public_key = self.public_key_bytes()?;
        let mut rdata = Vec::with_capacity(4 + public_key.len());
        rdata.extend_from_slice(&self.flags.to_be_bytes());
        rdata.push(DNSKEY_PROTOCOL);
        rdata.push(self.algorithm.number());
        rdata.extend_from_slice(&public_key);
        Ok(rdata)
    }

    /// DS record for the parent zone, SHA-256 digest
    pub fn ds_record(&self) -> Result<DsRecord, KeyError> {
        // DS digest = SHA-256(owner name wire format || DNSKEY RDATA)
        let mut hasher = Sha256::new();
        hasher.update(name_to_wire(&self.zone));
        hasher.update(self.dnskey_rdata()?);

        Ok(DsRecord {
            key_tag: self.key_tag,
            algorithm: self.algorithm.number(),
            digest_type: DIGEST_SHA256,
            digest: hasher.finalize().to_vec(),
        })
    }

    /// DS record in zone-file text form
    pub fn ds_record_string(&self) -> Result<String, KeyError> {
        Ok(self.ds_record()?.to_zone_format(&self.zone))
    }

    fn signing_key(&self) -> Result<&EcdsaKeyPair, KeyError> {
        if !self.can_sign() {
            return Err(KeyError::PrivateKeyNotAvailable);
        }

        let signer = self.signer.get_or_try_init(|| {
            let pkcs8 = Zeroizing::new(
                STANDARD
                    .decode(self.private_key.trim())
                    .map_err(|e| KeyError::Reconstruction(format!("private key is not base64: {}", e)))?,
            );
            let rng = SystemRandom::new();
            let signer = EcdsaKeyPair::from_pkcs8(self.algorithm.signing_algorithm(), &pkcs8, &rng)
                .map_err(|e| KeyError::Reconstruction(format!("private key rejected: {}", e)))?;

            if signer.public_key().as_ref()[1..] != self.public_key_bytes()?[..] {
                return Err(KeyError::Reconstruction(
                    "private key does not match public key".to_string(),
                ));
            }
            Ok(Arc::new(signer))
        })?;
        Ok(signer.as_ref())
    }

    /// Sign `data`, returning the fixed-width r || s signature (RFC 6605)
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        let signer = self.signing_key()?;
        let rng = SystemRandom::new();
        let signature = signer
            .sign(&rng, data)
            .map_err(|_| KeyError::SigningFailed(self.zone.clone()))?;
        Ok(signature.as_ref().to_vec())
    }

    /// Verify a signature produced by this key (or its peer-held original)
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), KeyError> {
        let mut point = Vec::with_capacity(1 + self.algorithm.public_key_len());
        point.push(0x04);
        point.extend_from_slice(&self.public_key_bytes()?);

        UnparsedPublicKey::new(self.algorithm.verification_algorithm(), &point)
            .verify(data, signature)
            .map_err(|_| KeyError::VerificationFailed(self.zone.clone()))
    }

    /// Check that every stored field reconstructs: the DNSKEY, the key tag
    /// and, when present, the private key.
    pub fn validate(&self) -> Result<(), KeyError> {
        if self.zone.trim().is_empty() {
            return Err(KeyError::EmptyZone);
        }
        let public_key = self.public_key_bytes()?;
        let expected = calculate_key_tag(self.flags, self.algorithm.number(), &public_key);
        if expected != self.key_tag {
            return Err(KeyError::Reconstruction(format!(
                "key tag {} does not match public key (expected {})",
                self.key_tag, expected
            )));
        }
        self.dnskey_record()?;
        if self.can_sign() {
            self.signing_key()?;
        }
        Ok(())
    }

    /// Strictly newer creation time
    pub fn is_newer_than(&self, other: &KeyPair) -> bool {
        self.created_at > other.created_at
    }

    /// Time since the key was created
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// Copy without private material
    pub fn public_only(&self) -> Self {
        Self {
            zone: self.zone.clone(),
            algorithm: self.algorithm,
            flags: self.flags,
            key_tag: self.key_tag,
            public_key: self.public_key.clone(),
            private_key: String::new(),
            created_at: self.created_at,
            node_id: self.node_id.clone(),
            dnskey: self.dnskey.clone(),
            signer: OnceCell::new(),
        }
    }

    /// Same key with a different creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    fn normalize_zone(&mut self) {
        let zone = canonical_name(&self.zone);
        if zone != self.zone {
            self.zone = zone;
            self.dnskey = OnceCell::new();
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("zone", &self.zone)
            .field("algorithm", &self.algorithm)
            .field("flags", &self.flags)
            .field("key_tag", &self.key_tag)
            .field("public_key", &self.public_key)
            .field("can_sign", &self.can_sign())
            .field("created_at", &self.created_at)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// DS (Delegation Signer) record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

impl DsRecord {
    /// Format as zone file record
    pub fn to_zone_format(&self, owner: &str) -> String {
        format!(
            "{} IN DS {} {} {} {}",
            owner,
            self.key_tag,
            self.algorithm,
            self.digest_type,
            hex::encode_upper(&self.digest)
        )
    }

    /// Digest as uppercase hex
    pub fn digest_hex(&self) -> String {
        hex::encode_upper(&self.digest)
    }

    pub fn to_record(&self, owner: &str, ttl: u32) -> DnsRecord {
        DnsRecord::new(
            owner,
            ttl,
            DnsRecordValue::DS {
                key_tag: self.key_tag,
                algorithm: self.algorithm,
                digest_type: self.digest_type,
                digest: self.digest.clone(),
            },
        )
    }
}

/// Zone -> active key map shared by the signer, key store and syncer
pub struct KeyRegistry {
    keys: RwLock<HashMap<String, KeyPair>>,
    node_id: String,
}

impl KeyRegistry {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            node_id: node_id.into(),
        }
    }

    /// Identifier stamped on keys generated by this node
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Generate a key for `zone`, replacing whatever was registered
    pub fn generate(&self, zone: &str, algorithm: DnssecAlgorithm) -> Result<KeyPair, KeyError> {
        let key = KeyPair::generate(zone, algorithm, &self.node_id)?;

        write_lock_or_recover(&self.keys, "dnssec key registry")
            .insert(key.zone.clone(), key.clone());

        info!(
            "Generated {} key for zone {} (tag: {})",
            key.algorithm, key.zone, key.key_tag
        );
        Ok(key)
    }

    /// Generate from an algorithm identifier such as "ECDSAP384SHA384"
    pub fn generate_named(&self, zone: &str, algorithm: &str) -> Result<KeyPair, KeyError> {
        let algorithm = DnssecAlgorithm::from_str(algorithm)?;
        self.generate(zone, algorithm)
    }

    pub fn get(&self, zone: &str) -> Option<KeyPair> {
        read_lock_or_recover(&self.keys, "dnssec key registry")
            .get(&canonical_name(zone))
            .cloned()
    }

    /// Install an externally obtained key. The key must reconstruct fully or
    /// the registry is left untouched.
    pub fn set(&self, mut key: KeyPair) -> Result<(), KeyError> {
        key.normalize_zone();
        key.validate()?;

        debug!("Installing key {} for zone {}", key.key_tag, key.zone);
        write_lock_or_recover(&self.keys, "dnssec key registry").insert(key.zone.clone(), key);
        Ok(())
    }

    /// Snapshot of every key, ordered by zone
    pub fn get_all(&self) -> Vec<KeyPair> {
        let mut keys: Vec<KeyPair> = read_lock_or_recover(&self.keys, "dnssec key registry")
            .values()
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.zone.cmp(&b.zone));
        keys
    }

    /// Zones with a registered key, sorted
    pub fn zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = read_lock_or_recover(&self.keys, "dnssec key registry")
            .keys()
            .cloned()
            .collect();
        zones.sort();
        zones
    }

    pub fn remove(&self, zone: &str) -> Option<KeyPair> {
        let removed = write_lock_or_recover(&self.keys, "dnssec key registry").remove(&canonical_name(zone));
        if let Some(ref key) = removed {
            info!("Removed key {} for zone {}", key.key_tag, key.zone);
        }
        removed
    }

    pub fn len(&self) -> usize {
        read_lock_or_recover(&self.keys, "dnssec key registry").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Calculate DNSKEY key tag per RFC 4034 Appendix B
pub fn calculate_key_tag(flags: u16, algorithm: u8, public_key: &[u8]) -> u16 {
    let mut ac: u32 = 0;

    let mut rdata = Vec::with_capacity(4 + public_key.len());
    rdata.extend_from_slice(&flags.to_be_bytes());
    rdata.push(DNSKEY_PROTOCOL);
    rdata.push(algorithm);
    rdata.extend_from_slice(public_key);

    for (i, byte) in rdata.iter().enumerate() {
        if i % 2 == 0 {
            ac += (*byte as u32) << 8;
        } else {
            ac += *byte as u32;
        }
    }

    ac += (ac >> 16) & 0xFFFF;
    (ac & 0xFFFF) as u16
}

/// DNSSEC key errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("zone name cannot be empty")]
    EmptyZone,

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("failed to rebuild DNSKEY: {0}")]
    Reconstruction(String),

    #[error("private key not available")]
    PrivateKeyNotAvailable,

    #[error("signing failed for zone {0}")]
    SigningFailed(String),

    #[error("signature verification failed for zone {0}")]
    VerificationFailed(String),
}
