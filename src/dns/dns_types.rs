//! DNS Record Type Definitions
//!
//! Record model shared by the signer and the NSEC3 engine, together with the
//! canonical wire helpers (RFC 4034 Section 6) that signatures, key tags, DS
//! digests and NSEC3 hashes are computed over.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// DNS class IN
pub const CLASS_IN: u16 = 1;

/// DNS record types understood by the signing core
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u16)]
pub enum DnsRecordType {
    /// IPv4 address record
    A = 1,
    /// Name server
    NS = 2,
    /// Canonical name (alias)
    CNAME = 5,
    /// Start of authority
    SOA = 6,
    /// Pointer record (reverse DNS)
    PTR = 12,
    /// Mail exchange
    MX = 15,
    /// Text record
    TXT = 16,
    /// IPv6 address record
    AAAA = 28,
    /// Service location
    SRV = 33,
    /// Delegation signer
    DS = 43,
    /// DNSSEC signature
    RRSIG = 46,
    /// Next secure record
    NSEC = 47,
    /// DNSSEC public key
    DNSKEY = 48,
    /// Hashed next secure record
    NSEC3 = 50,
    /// NSEC3 zone parameters
    NSEC3PARAM = 51,
    /// Certification Authority Authorization
    CAA = 257,
}

impl DnsRecordType {
    /// Every supported type, in ascending type-code order
    pub const ALL: [DnsRecordType; 16] = [
        DnsRecordType::A,
        DnsRecordType::NS,
        DnsRecordType::CNAME,
        DnsRecordType::SOA,
        DnsRecordType::PTR,
        DnsRecordType::MX,
        DnsRecordType::TXT,
        DnsRecordType::AAAA,
        DnsRecordType::SRV,
        DnsRecordType::DS,
        DnsRecordType::RRSIG,
        DnsRecordType::NSEC,
        DnsRecordType::DNSKEY,
        DnsRecordType::NSEC3,
        DnsRecordType::NSEC3PARAM,
        DnsRecordType::CAA,
    ];

    /// Numeric type code as it appears on the wire
    pub fn number(&self) -> u16 {
        *self as u16
    }

    /// Look up a type by its wire code
    pub fn from_number(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.number() == code)
    }

    /// Presentation mnemonic
    pub fn mnemonic(&self) -> &'static str {
        match self {
            DnsRecordType::A => "A",
            DnsRecordType::NS => "NS",
            DnsRecordType::CNAME => "CNAME",
            DnsRecordType::SOA => "SOA",
            DnsRecordType::PTR => "PTR",
            DnsRecordType::MX => "MX",
            DnsRecordType::TXT => "TXT",
            DnsRecordType::AAAA => "AAAA",
            DnsRecordType::SRV => "SRV",
            DnsRecordType::DS => "DS",
            DnsRecordType::RRSIG => "RRSIG",
            DnsRecordType::NSEC => "NSEC",
            DnsRecordType::DNSKEY => "DNSKEY",
            DnsRecordType::NSEC3 => "NSEC3",
            DnsRecordType::NSEC3PARAM => "NSEC3PARAM",
            DnsRecordType::CAA => "CAA",
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for DnsRecordType {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.mnemonic() == upper)
            .ok_or_else(|| DnsError::InvalidRecordType(s.to_string()))
    }
}

/// Typed RDATA for each supported record type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DnsRecordValue {
    /// IPv4 address
    A(Ipv4Addr),
    /// IPv6 address
    AAAA(Ipv6Addr),
    /// Canonical name
    CNAME(String),
    /// Name server
    NS(String),
    /// Pointer record
    PTR(String),
    /// Mail exchange
    MX { preference: u16, exchange: String },
    /// Text record
    TXT(String),
    /// Start of authority
    SOA {
        /// Primary nameserver
        mname: String,
        /// Admin mailbox (with . instead of @)
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    /// Service location
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    /// Certification Authority Authorization
    CAA { flags: u8, tag: String, value: String },
    /// Delegation signer
    DS {
        key_tag: u16,
        algorithm: u8,
        digest_type: u8,
        digest: Vec<u8>,
    },
    /// DNSSEC public key
    DNSKEY {
        flags: u16,
        protocol: u8,
        algorithm: u8,
        public_key: Vec<u8>,
    },
    /// DNSSEC signature
    RRSIG {
        type_covered: DnsRecordType,
        algorithm: u8,
        labels: u8,
        original_ttl: u32,
        expiration: u32,
        inception: u32,
        key_tag: u16,
        signer_name: String,
        signature: Vec<u8>,
    },
    /// Next secure record
    NSEC {
        next_domain: String,
        types: Vec<DnsRecordType>,
    },
    /// Hashed next secure record (RFC 5155)
    NSEC3 {
        hash_algorithm: u8,
        flags: u8,
        iterations: u16,
        /// Hex-encoded salt, empty for no salt
        salt: String,
        /// base32hex next hashed owner name
        next_hashed_owner: String,
        types: Vec<DnsRecordType>,
    },
    /// NSEC3 zone parameters
    NSEC3PARAM {
        hash_algorithm: u8,
        flags: u8,
        iterations: u16,
        salt: String,
    },
}

impl DnsRecordValue {
    /// Get the record type for this value
    pub fn record_type(&self) -> DnsRecordType {
        match self {
            DnsRecordValue::A(_) => DnsRecordType::A,
            DnsRecordValue::AAAA(_) => DnsRecordType::AAAA,
            DnsRecordValue::CNAME(_) => DnsRecordType::CNAME,
            DnsRecordValue::NS(_) => DnsRecordType::NS,
            DnsRecordValue::PTR(_) => DnsRecordType::PTR,
            DnsRecordValue::MX { .. } => DnsRecordType::MX,
            DnsRecordValue::TXT(_) => DnsRecordType::TXT,
            DnsRecordValue::SOA { .. } => DnsRecordType::SOA,
            DnsRecordValue::SRV { .. } => DnsRecordType::SRV,
            DnsRecordValue::CAA { .. } => DnsRecordType::CAA,
            DnsRecordValue::DS { .. } => DnsRecordType::DS,
            DnsRecordValue::DNSKEY { .. } => DnsRecordType::DNSKEY,
            DnsRecordValue::RRSIG { .. } => DnsRecordType::RRSIG,
            DnsRecordValue::NSEC { .. } => DnsRecordType::NSEC,
            DnsRecordValue::NSEC3 { .. } => DnsRecordType::NSEC3,
            DnsRecordValue::NSEC3PARAM { .. } => DnsRecordType::NSEC3PARAM,
        }
    }

    /// Canonical RDATA (RFC 4034 Section 6.2): embedded names lowercased and
    /// uncompressed.
    pub fn to_rdata(&self) -> Result<Vec<u8>, DnsError> {
        let mut rdata = Vec::new();
        match self {
            DnsRecordValue::A(ip) => rdata.extend_from_slice(&ip.octets()),
            DnsRecordValue::AAAA(ip) => rdata.extend_from_slice(&ip.octets()),
            DnsRecordValue::CNAME(name) | DnsRecordValue::NS(name) | DnsRecordValue::PTR(name) => {
                rdata.extend_from_slice(&name_to_wire(name));
            }
            DnsRecordValue::MX { preference, exchange } => {
                rdata.extend_from_slice(&preference.to_be_bytes());
                rdata.extend_from_slice(&name_to_wire(exchange));
            }
            DnsRecordValue::TXT(text) => {
                // Character strings are limited to 255 bytes each
                let bytes = text.as_bytes();
                if bytes.is_empty() {
                    rdata.push(0);
                }
                for chunk in bytes.chunks(255) {
                    rdata.push(chunk.len() as u8);
                    rdata.extend_from_slice(chunk);
                }
            }
            DnsRecordValue::SOA { mname, rname, serial, refresh, retry, expire, minimum } => {
                rdata.extend_from_slice(&name_to_wire(mname));
                rdata.extend_from_slice(&name_to_wire(rname));
                for value in [serial, refresh, retry, expire, minimum] {
                    rdata.extend_from_slice(&value.to_be_bytes());
                }
            }
            DnsRecordValue::SRV { priority, weight, port, target } => {
                rdata.extend_from_slice(&priority.to_be_bytes());
                rdata.extend_from_slice(&weight.to_be_bytes());
                rdata.extend_from_slice(&port.to_be_bytes());
                rdata.extend_from_slice(&name_to_wire(target));
            }
            DnsRecordValue::CAA { flags, tag, value } => {
                if tag.is_empty() || tag.len() > 255 {
                    return Err(DnsError::InvalidRecordData(format!("CAA tag length {}", tag.len())));
                }
                rdata.push(*flags);
                rdata.push(tag.len() as u8);
                rdata.extend_from_slice(tag.as_bytes());
                rdata.extend_from_slice(value.as_bytes());
            }
            DnsRecordValue::DS { key_tag, algorithm, digest_type, digest } => {
                rdata.extend_from_slice(&key_tag.to_be_bytes());
                rdata.push(*algorithm);
                rdata.push(*digest_type);
                rdata.extend_from_slice(digest);
            }
            DnsRecordValue::DNSKEY { flags, protocol, algorithm, public_key } => {
                rdata.extend_from_slice(&flags.to_be_bytes());
                rdata.push(*protocol);
                rdata.push(*algorithm);
                rdata.extend_from_slice(public_key);
            }
            DnsRecordValue::RRSIG {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer_name,
                signature,
            } => {
                rdata.extend_from_slice(&type_covered.number().to_be_bytes());
                rdata.push(*algorithm);
                rdata.push(*labels);
                rdata.extend_from_slice(&original_ttl.to_be_bytes());
                rdata.extend_from_slice(&expiration.to_be_bytes());
                rdata.extend_from_slice(&inception.to_be_bytes());
                rdata.extend_from_slice(&key_tag.to_be_bytes());
                rdata.extend_from_slice(&name_to_wire(signer_name));
                rdata.extend_from_slice(signature);
            }
            DnsRecordValue::NSEC { next_domain, types } => {
                rdata.extend_from_slice(&name_to_wire(next_domain));
                rdata.extend_from_slice(&types_to_bitmap(types));
            }
            DnsRecordValue::NSEC3 {
                hash_algorithm,
                flags,
                iterations,
                salt,
                next_hashed_owner,
                types,
            } => {
                let salt = decode_salt(salt)?;
                let next = data_encoding::BASE32HEX_NOPAD
                    .decode(next_hashed_owner.to_uppercase().as_bytes())
                    .map_err(|e| {
                        DnsError::InvalidRecordData(format!("NSEC3 next hashed owner: {}", e))
                    })?;
                if next.len() > 255 {
                    return Err(DnsError::InvalidRecordData("NSEC3 hash too long".to_string()));
                }
                rdata.push(*hash_algorithm);
                rdata.push(*flags);
                rdata.extend_from_slice(&iterations.to_be_bytes());
                rdata.push(salt.len() as u8);
                rdata.extend_from_slice(&salt);
                rdata.push(next.len() as u8);
                rdata.extend_from_slice(&next);
                rdata.extend_from_slice(&types_to_bitmap(types));
            }
            DnsRecordValue::NSEC3PARAM { hash_algorithm, flags, iterations, salt } => {
                let salt = decode_salt(salt)?;
                rdata.push(*hash_algorithm);
                rdata.push(*flags);
                rdata.extend_from_slice(&iterations.to_be_bytes());
                rdata.push(salt.len() as u8);
                rdata.extend_from_slice(&salt);
            }
        }
        Ok(rdata)
    }

    /// Format the value in zone-file presentation form
    pub fn to_display_string(&self) -> String {
        match self {
            DnsRecordValue::A(ip) => ip.to_string(),
            DnsRecordValue::AAAA(ip) => ip.to_string(),
            DnsRecordValue::CNAME(name) | DnsRecordValue::NS(name) | DnsRecordValue::PTR(name) => {
                name.clone()
            }
            DnsRecordValue::MX { preference, exchange } => format!("{} {}", preference, exchange),
            DnsRecordValue::TXT(text) => format!("\"{}\"", text),
            DnsRecordValue::SOA { mname, rname, serial, refresh, retry, expire, minimum } => format!(
                "{} {} {} {} {} {} {}",
                mname, rname, serial, refresh, retry, expire, minimum
            ),
            DnsRecordValue::SRV { priority, weight, port, target } => {
                format!("{} {} {} {}", priority, weight, port, target)
            }
            DnsRecordValue::CAA { flags, tag, value } => format!("{} {} \"{}\"", flags, tag, value),
            DnsRecordValue::DS { key_tag, algorithm, digest_type, digest } => format!(
                "{} {} {} {}",
                key_tag,
                algorithm,
                digest_type,
                hex::encode_upper(digest)
            ),
            DnsRecordValue::DNSKEY { flags, protocol, algorithm, public_key } => format!(
                "{} {} {} {}",
                flags,
                protocol,
                algorithm,
                STANDARD.encode(public_key)
            ),
            DnsRecordValue::RRSIG {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer_name,
                signature,
            } => format!(
                "{} {} {} {} {} {} {} {} {}",
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer_name,
                STANDARD.encode(signature)
            ),
            DnsRecordValue::NSEC { next_domain, types } => {
                format!("{} {}", next_domain, join_types(types))
            }
            DnsRecordValue::NSEC3 {
                hash_algorithm,
                flags,
                iterations,
                salt,
                next_hashed_owner,
                types,
            } => format!(
                "{} {} {} {} {} {}",
                hash_algorithm,
                flags,
                iterations,
                display_salt(salt),
                next_hashed_owner,
                join_types(types)
            ),
            DnsRecordValue::NSEC3PARAM { hash_algorithm, flags, iterations, salt } => format!(
                "{} {} {} {}",
                hash_algorithm,
                flags,
                iterations,
                display_salt(salt)
            ),
        }
    }
}

/// A DNS resource record with an absolute owner name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    /// Fully qualified owner name (trailing dot)
    pub name: String,
    /// Record type
    pub record_type: DnsRecordType,
    /// Time to live in seconds
    pub ttl: u32,
    /// Record value
    pub value: DnsRecordValue,
}

impl DnsRecord {
    /// Create a record; the type is taken from the value
    pub fn new(name: impl AsRef<str>, ttl: u32, value: DnsRecordValue) -> Self {
        Self {
            name: fqdn(name.as_ref()),
            record_type: value.record_type(),
            ttl,
            value,
        }
    }

    /// Create an A record
    pub fn a(name: impl AsRef<str>, ip: Ipv4Addr, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::A(ip))
    }

    /// Create an AAAA record
    pub fn aaaa(name: impl AsRef<str>, ip: Ipv6Addr, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::AAAA(ip))
    }

    /// Create a CNAME record
    pub fn cname(name: impl AsRef<str>, target: impl AsRef<str>, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::CNAME(fqdn(target.as_ref())))
    }

    /// Create an NS record
    pub fn ns(name: impl AsRef<str>, nameserver: impl AsRef<str>, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::NS(fqdn(nameserver.as_ref())))
    }

    /// Create an MX record
    pub fn mx(name: impl AsRef<str>, exchange: impl AsRef<str>, preference: u16, ttl: u32) -> Self {
        Self::new(
            name,
            ttl,
            DnsRecordValue::MX {
                preference,
                exchange: fqdn(exchange.as_ref()),
            },
        )
    }

    /// Create a TXT record
    pub fn txt(name: impl AsRef<str>, text: impl Into<String>, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::TXT(text.into()))
    }

    /// Create an SOA record with conventional timer values
    pub fn soa(zone: impl AsRef<str>, mname: impl AsRef<str>, rname: impl AsRef<str>, serial: u32) -> Self {
        Self::new(
            zone,
            3600,
            DnsRecordValue::SOA {
                mname: fqdn(mname.as_ref()),
                rname: fqdn(rname.as_ref()),
                serial,
                refresh: 3600,
                retry: 600,
                expire: 604800,
                minimum: 300,
            },
        )
    }

    /// Canonical wire form used when signing: owner | type | class | ttl |
    /// rdlength | rdata, with the TTL replaced by `ttl`.
    pub fn canonical_wire(&self, ttl: u32) -> Result<Vec<u8>, DnsError> {
        let rdata = self.value.to_rdata()?;
        if rdata.len() > u16::MAX as usize {
            return Err(DnsError::InvalidRecordData(format!(
                "RDATA for {} {} exceeds 65535 bytes",
                self.name, self.record_type
            )));
        }

        let mut wire = name_to_wire(&self.name);
        wire.extend_from_slice(&self.record_type.number().to_be_bytes());
        wire.extend_from_slice(&CLASS_IN.to_be_bytes());
        wire.extend_from_slice(&ttl.to_be_bytes());
        wire.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        wire.extend_from_slice(&rdata);
        Ok(wire)
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} IN {} {}",
            self.name,
            self.ttl,
            self.record_type,
            self.value.to_display_string()
        )
    }
}

// =============================================================================
// NAME HELPERS
// =============================================================================

/// Ensure a name carries the trailing root dot
pub fn fqdn(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." {
        ".".to_string()
    } else if trimmed.ends_with('.') {
        trimmed.to_string()
    } else {
        format!("{}.", trimmed)
    }
}

/// Canonical zone key: lowercase, fully qualified
pub fn canonical_name(name: &str) -> String {
    fqdn(name).to_lowercase()
}

/// Non-empty labels of a name, left to right
pub fn labels(name: &str) -> Vec<&str> {
    name.split('.').filter(|l| !l.is_empty()).collect()
}

/// Lowercase, length-prefixed labels terminated by the root label.
///
/// Names are assumed to be wire-valid (labels of at most 63 octets).
pub fn name_to_wire(name: &str) -> Vec<u8> {
    let mut wire = Vec::with_capacity(name.len() + 2);
    for label in labels(name) {
        let lower = label.to_lowercase();
        wire.push(lower.len() as u8);
        wire.extend_from_slice(lower.as_bytes());
    }
    wire.push(0);
    wire
}

/// RRSIG label count: the root and a leading wildcard label are not counted
pub fn count_labels(name: &str) -> u8 {
    let labels = labels(name);
    let count = match labels.first() {
        Some(&"*") => labels.len() - 1,
        _ => labels.len(),
    };
    count as u8
}

/// Whether `child` equals or sits below `parent`, compared label-wise
/// without regard to case
pub fn is_subdomain(child: &str, parent: &str) -> bool {
    let child_labels = labels(child);
    let parent_labels = labels(parent);
    if parent_labels.len() > child_labels.len() {
        return false;
    }
    child_labels
        .iter()
        .rev()
        .zip(parent_labels.iter().rev())
        .all(|(c, p)| c.eq_ignore_ascii_case(p))
}

/// The name with its leftmost label removed; the root is its own parent
pub fn parent_domain(name: &str) -> String {
    let labels = labels(name);
    if labels.len() <= 1 {
        return ".".to_string();
    }
    fqdn(&labels[1..].join("."))
}

/// Type bitmap per RFC 4034 Section 4.1.2
pub fn types_to_bitmap(types: &[DnsRecordType]) -> Vec<u8> {
    let mut windows: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
    for rtype in types {
        let code = rtype.number();
        windows.entry((code >> 8) as u8).or_default().push((code & 0xFF) as u8);
    }

    let mut bitmap = Vec::new();
    for (window, offsets) in windows {
        let max_offset = offsets.iter().copied().max().unwrap_or(0);
        let len = (max_offset / 8) as usize + 1;
        let mut block = vec![0u8; len];
        for offset in offsets {
            block[(offset / 8) as usize] |= 0x80 >> (offset % 8);
        }
        bitmap.push(window);
        bitmap.push(len as u8);
        bitmap.extend(block);
    }
    bitmap
}

fn decode_salt(salt: &str) -> Result<Vec<u8>, DnsError> {
    if salt.is_empty() || salt == "-" {
        return Ok(Vec::new());
    }
    let bytes = hex::decode(salt).map_err(|e| DnsError::InvalidRecordData(format!("salt: {}", e)))?;
    if bytes.len() > 255 {
        return Err(DnsError::InvalidRecordData("salt longer than 255 bytes".to_string()));
    }
    Ok(bytes)
}

fn display_salt(salt: &str) -> &str {
    if salt.is_empty() {
        "-"
    } else {
        salt
    }
}

fn join_types(types: &[DnsRecordType]) -> String {
    types.iter().map(|t| t.mnemonic()).collect::<Vec<_>>().join(" ")
}

/// DNS-specific errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DnsError {
    #[error("Invalid record type: {0}")]
    InvalidRecordType(String),

    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("Invalid record data: {0}")]
    InvalidRecordData(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_parsing() {
        assert_eq!(DnsRecordType::from_str("A").unwrap(), DnsRecordType::A);
        assert_eq!(DnsRecordType::from_str("nsec3").unwrap(), DnsRecordType::NSEC3);
        assert_eq!(DnsRecordType::from_str("Nsec3Param").unwrap(), DnsRecordType::NSEC3PARAM);
        assert!(DnsRecordType::from_str("invalid").is_err());
    }

    #[test]
    fn test_record_type_numbers() {
        assert_eq!(DnsRecordType::A.number(), 1);
        assert_eq!(DnsRecordType::RRSIG.number(), 46);
        assert_eq!(DnsRecordType::DNSKEY.number(), 48);
        assert_eq!(DnsRecordType::NSEC3.number(), 50);
        assert_eq!(DnsRecordType::from_number(51), Some(DnsRecordType::NSEC3PARAM));
        assert_eq!(DnsRecordType::from_number(99), None);
    }

    #[test]
    fn test_fqdn_and_canonical_name() {
        assert_eq!(fqdn("example.com"), "example.com.");
        assert_eq!(fqdn("example.com."), "example.com.");
        assert_eq!(fqdn(""), ".");
        assert_eq!(canonical_name("Example.COM"), "example.com.");
    }

    #[test]
    fn test_name_to_wire() {
        let wire = name_to_wire("WWW.Example.com.");
        assert_eq!(wire[0], 3);
        assert_eq!(&wire[1..4], b"www");
        assert_eq!(wire[4], 7);
        assert_eq!(&wire[5..12], b"example");
        assert_eq!(wire[12], 3);
        assert_eq!(&wire[13..16], b"com");
        assert_eq!(wire[16], 0);

        assert_eq!(name_to_wire("."), vec![0]);
    }

    #[test]
    fn test_count_labels() {
        assert_eq!(count_labels("example.com."), 2);
        assert_eq!(count_labels("www.example.com"), 3);
        assert_eq!(count_labels("*.example.com."), 2);
        assert_eq!(count_labels("."), 0);
    }

    #[test]
    fn test_is_subdomain() {
        assert!(is_subdomain("www.example.com.", "example.com."));
        assert!(is_subdomain("example.com.", "example.com."));
        assert!(is_subdomain("WWW.EXAMPLE.COM.", "example.com."));
        assert!(!is_subdomain("badexample.com.", "example.com."));
        assert!(!is_subdomain("example.com.", "www.example.com."));
        assert!(is_subdomain("anything.org.", "."));
    }

    #[test]
    fn test_parent_domain() {
        assert_eq!(parent_domain("www.example.com."), "example.com.");
        assert_eq!(parent_domain("com."), ".");
    }

    #[test]
    fn test_types_to_bitmap() {
        // A(1), RRSIG(46) in window 0
        let bitmap = types_to_bitmap(&[DnsRecordType::A, DnsRecordType::RRSIG]);
        assert_eq!(bitmap[0], 0);
        assert_eq!(bitmap[1], 6);
        assert_eq!(bitmap[2], 0b0100_0000);
        assert_eq!(bitmap[7], 0b0000_0010);

        // CAA(257) lands in window 1
        let bitmap = types_to_bitmap(&[DnsRecordType::CAA]);
        assert_eq!(bitmap, vec![1, 1, 0b0100_0000]);
    }

    #[test]
    fn test_canonical_wire_layout() {
        let record = DnsRecord::a("WWW.example.com", Ipv4Addr::new(192, 0, 2, 1), 300);
        let wire = record.canonical_wire(60).unwrap();

        let owner = name_to_wire("www.example.com.");
        assert_eq!(&wire[..owner.len()], owner.as_slice());
        let rest = &wire[owner.len()..];
        assert_eq!(u16::from_be_bytes([rest[0], rest[1]]), 1); // type A
        assert_eq!(u16::from_be_bytes([rest[2], rest[3]]), CLASS_IN);
        assert_eq!(u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]), 60);
        assert_eq!(u16::from_be_bytes([rest[8], rest[9]]), 4);
        assert_eq!(&rest[10..], &[192, 0, 2, 1]);
    }

    #[test]
    fn test_nsec3_rdata_rejects_bad_hash() {
        let value = DnsRecordValue::NSEC3 {
            hash_algorithm: 1,
            flags: 0,
            iterations: 10,
            salt: "AABB".to_string(),
            next_hashed_owner: "not base32hex!".to_string(),
            types: vec![DnsRecordType::A],
        };
        assert!(value.to_rdata().is_err());
    }

    #[test]
    fn test_mx_rdata_lowercases_exchange() {
        let record = DnsRecord::mx("example.com", "MAIL.example.com", 10, 300);
        let rdata = record.value.to_rdata().unwrap();
        assert_eq!(&rdata[..2], &10u16.to_be_bytes());
        assert_eq!(&rdata[2..], name_to_wire("mail.example.com.").as_slice());
    }

    #[test]
    fn test_record_display() {
        let record = DnsRecord::a("www.example.com", Ipv4Addr::new(192, 0, 2, 1), 300);
        assert_eq!(record.to_string(), "www.example.com. 300 IN A 192.0.2.1");

        let param = DnsRecordValue::NSEC3PARAM {
            hash_algorithm: 1,
            flags: 0,
            iterations: 10,
            salt: String::new(),
        };
        assert_eq!(param.to_display_string(), "1 0 10 -");
    }
}
