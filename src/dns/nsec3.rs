//! NSEC3 Authenticated Denial
//!
//! GSLB answers are computed per query, so there is no static zone to walk
//! for NSEC3 chains. Instead each denial gets a synthetic NSEC3 record whose
//! hash interval is exactly one step wide around the queried name's hash
//! (RFC 5155 hashing, RFC 7129 style "white lies").

use std::collections::HashMap;
use std::sync::RwLock;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use super::dns_types::{canonical_name, name_to_wire, DnsError, DnsRecord, DnsRecordType, DnsRecordValue};
use crate::lock_utils::{read_lock_or_recover, write_lock_or_recover};

/// NSEC3 hash algorithm 1 (SHA-1)
pub const NSEC3_HASH_SHA1: u8 = 1;

/// Opt-out flag bit
pub const NSEC3_FLAG_OPT_OUT: u8 = 0x01;

/// TTL of synthetic NSEC3 records
pub const NSEC3_TTL: u32 = 300;

/// base32hex alphabet, ascending
const BASE32HEX_DIGITS: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

/// NSEC3 parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Nsec3Config {
    /// Additional hash iterations
    pub iterations: u16,
    /// Salt length in bytes
    pub salt_length: usize,
    /// Set the opt-out flag on generated records
    pub opt_out: bool,
}

impl Default for Nsec3Config {
    fn default() -> Self {
        Self {
            iterations: 10,
            salt_length: 8,
            opt_out: false,
        }
    }
}

impl Nsec3Config {
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.salt_length == 0 || self.salt_length > 255 {
            return Err(DnsError::ConfigError(format!(
                "NSEC3 salt length must be 1..=255 bytes, got {}",
                self.salt_length
            )));
        }
        Ok(())
    }
}

/// Synthetic NSEC3 proof generator with a per-zone salt cache
pub struct Nsec3Engine {
    config: Nsec3Config,
    /// zone -> uppercase hex salt
    salts: RwLock<HashMap<String, String>>,
}

impl Nsec3Engine {
    pub fn new(config: Nsec3Config) -> Result<Self, DnsError> {
        config.validate()?;
        Ok(Self {
            config,
            salts: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Nsec3Config {
        &self.config
    }

    /// The zone's salt, generated on first use and kept for the process lifetime
    pub fn salt(&self, zone: &str) -> String {
        let zone = canonical_name(zone);
        if let Some(salt) = read_lock_or_recover(&self.salts, "nsec3 salts").get(&zone) {
            return salt.clone();
        }

        let mut salts = write_lock_or_recover(&self.salts, "nsec3 salts");
        salts
            .entry(zone)
            .or_insert_with_key(|zone| {
                let salt = self.random_salt();
                debug!("Generated NSEC3 salt for zone {}", zone);
                salt
            })
            .clone()
    }

    /// Install a specific salt, e.g. one received alongside synced state
    pub fn set_salt(&self, zone: &str, salt: &str) -> Result<(), DnsError> {
        let decoded = hex::decode(salt)
            .map_err(|e| DnsError::InvalidRecordData(format!("NSEC3 salt is not hex: {}", e)))?;
        if decoded.len() > 255 {
            return Err(DnsError::InvalidRecordData("NSEC3 salt longer than 255 bytes".to_string()));
        }

        write_lock_or_recover(&self.salts, "nsec3 salts")
            .insert(canonical_name(zone), salt.to_uppercase());
        Ok(())
    }

    fn random_salt(&self) -> String {
        let mut salt = vec![0u8; self.config.salt_length];
        if let Err(e) = OsRng.try_fill_bytes(&mut salt) {
            // An empty salt is still a valid NSEC3 parameter
            warn!("Failed to generate NSEC3 salt, using empty salt: {}", e);
            return String::new();
        }
        hex::encode_upper(salt)
    }

    /// NSEC3 hash of `name` under `zone`'s salt
    pub fn hash(&self, name: &str, zone: &str) -> String {
        let salt = self.salt(zone);
        // Stored salts are always valid hex
        let salt = hex::decode(&salt).unwrap_or_default();
        nsec3_hash(name, &salt, self.config.iterations)
    }

    /// Two records proving NXDOMAIN: one covering the queried name's hash and
    /// one covering the wildcard at the zone apex
    pub fn generate_nxdomain(&self, zone: &str, qname: &str) -> Vec<DnsRecord> {
        let zone = canonical_name(zone);

        let qname_hash = self.hash(qname, &zone);
        let covering = self.synthesize(
            &zone,
            &decrement_hash(&qname_hash),
            &increment_hash(&qname_hash),
            &[],
        );

        // The apex is the only encloser known to exist in a synthesized zone
        let wildcard = format!("*.{}", zone);
        let wildcard_hash = self.hash(&wildcard, &zone);
        let wildcard_cover = self.synthesize(
            &zone,
            &decrement_hash(&wildcard_hash),
            &increment_hash(&wildcard_hash),
            &[],
        );

        vec![covering, wildcard_cover]
    }

    /// One record matching the queried name's hash and listing the types that
    /// do exist there
    pub fn generate_nodata(&self, zone: &str, qname: &str, existing_types: &[DnsRecordType]) -> Vec<DnsRecord> {
        let zone = canonical_name(zone);
        let qname_hash = self.hash(qname, &zone);
        vec![self.synthesize(&zone, &qname_hash, &increment_hash(&qname_hash), existing_types)]
    }

    /// NSEC3PARAM for the zone apex
    pub fn nsec3param(&self, zone: &str) -> DnsRecord {
        let zone = canonical_name(zone);
        let salt = self.salt(&zone);
        DnsRecord::new(
            &zone,
            0,
            DnsRecordValue::NSEC3PARAM {
                hash_algorithm: NSEC3_HASH_SHA1,
                flags: 0,
                iterations: self.config.iterations,
                salt,
            },
        )
    }

    fn synthesize(&self, zone: &str, owner_hash: &str, next_hash: &str, types: &[DnsRecordType]) -> DnsRecord {
        let mut types = if types.is_empty() {
            vec![DnsRecordType::RRSIG, DnsRecordType::NSEC3]
        } else {
            types.to_vec()
        };
        types.sort_by_key(|t| t.number());
        types.dedup();

        DnsRecord::new(
            format!("{}.{}", owner_hash, zone),
            NSEC3_TTL,
            DnsRecordValue::NSEC3 {
                hash_algorithm: NSEC3_HASH_SHA1,
                flags: if self.config.opt_out { NSEC3_FLAG_OPT_OUT } else { 0 },
                iterations: self.config.iterations,
                salt: self.salt(zone),
                next_hashed_owner: next_hash.to_string(),
                types,
            },
        )
    }
}

/// RFC 5155 Section 5: H(name || salt), then `iterations` rounds of
/// H(digest || salt), encoded as unpadded uppercase base32hex
pub fn nsec3_hash(name: &str, salt: &[u8], iterations: u16) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name_to_wire(name));
    hasher.update(salt);
    let mut digest = hasher.finalize();

    for _ in 0..iterations {
        let mut hasher = Sha1::new();
        hasher.update(digest);
        hasher.update(salt);
        digest = hasher.finalize();
    }

    data_encoding::BASE32HEX_NOPAD.encode(&digest)
}

fn digit_value(c: u8) -> Option<u8> {
    match c.to_ascii_uppercase() {
        c @ b'0'..=b'9' => Some(c - b'0'),
        c @ b'A'..=b'V' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Add one to a base32hex number. All 'V's wraps to all '0's.
pub fn increment_hash(hash: &str) -> String {
    step_hash(hash, true)
}

/// Subtract one from a base32hex number. All '0's wraps to all 'V's.
pub fn decrement_hash(hash: &str) -> String {
    step_hash(hash, false)
}

fn step_hash(hash: &str, up: bool) -> String {
    let Some(mut digits) = hash.bytes().map(digit_value).collect::<Option<Vec<u8>>>() else {
        return hash.to_string();
    };

    for digit in digits.iter_mut().rev() {
        if up {
            if *digit < 31 {
                *digit += 1;
                break;
            }
            *digit = 0;
        } else {
            if *digit > 0 {
                *digit -= 1;
                break;
            }
            *digit = 31;
        }
    }

    digits
        .into_iter()
        .map(|d| BASE32HEX_DIGITS[d as usize] as char)
        .collect()
}
