//! DNSSEC Response Signing
//!
//! Signs synthesized responses inline on the query path:
//! - RRSIG over every RRset in the answer and authority sections
//! - DNSKEY appended for apex DNSKEY queries
//! - synthetic NSEC3 proofs for NXDOMAIN and NODATA answers
//!
//! A response is either fully signed with AD set, or handed back untouched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::dns::dns_message::{DnsMessage, Question, ResponseCode};
use crate::dns::dns_types::{
    canonical_name, count_labels, fqdn, is_subdomain, labels, name_to_wire, parent_domain,
    DnsError, DnsRecord, DnsRecordType, DnsRecordValue,
};
use crate::dns::dnssec_keys::{DsRecord, KeyError, KeyPair, KeyRegistry};
use crate::dns::nsec3::Nsec3Engine;

/// Signing metrics callback: (zone, elapsed, success)
pub type SigningMetricsHook = Arc<dyn Fn(&str, Duration, bool) + Send + Sync>;

/// Configuration for DNSSEC signing
#[derive(Debug, Clone)]
pub struct DnssecConfig {
    /// Signature validity duration (default: 7 days)
    pub signature_validity: Duration,
    /// Inception offset (start validity slightly in the past, default: 1 hour)
    pub inception_offset: Duration,
    /// Upper bound for RRSIG TTLs; the covered RRset's TTL wins when lower
    pub signature_ttl: u32,
}

impl Default for DnssecConfig {
    fn default() -> Self {
        Self {
            signature_validity: Duration::from_secs(7 * 86400),
            inception_offset: Duration::from_secs(3600),
            signature_ttl: 86400,
        }
    }
}

/// An RRset (Resource Record Set) - records with same name and type
#[derive(Debug, Clone)]
pub struct RRset {
    /// Owner name (FQDN)
    pub name: String,
    /// Record type
    pub record_type: DnsRecordType,
    /// Lowest TTL among the records
    pub ttl: u32,
    /// All records in this set
    pub records: Vec<DnsRecord>,
}

impl RRset {
    /// Get the number of labels in the name
    pub fn label_count(&self) -> u8 {
        count_labels(&self.name)
    }

    /// Group records by (owner, type), keeping first-seen order
    pub fn group(records: Vec<DnsRecord>) -> Vec<RRset> {
        let mut index: HashMap<(String, DnsRecordType), usize> = HashMap::new();
        let mut rrsets: Vec<RRset> = Vec::new();

        for record in records {
            let key = (canonical_name(&record.name), record.record_type);
            match index.get(&key) {
                Some(&i) => {
                    let rrset = &mut rrsets[i];
                    rrset.ttl = rrset.ttl.min(record.ttl);
                    rrset.records.push(record);
                }
                None => {
                    index.insert(key, rrsets.len());
                    rrsets.push(RRset {
                        name: record.name.clone(),
                        record_type: record.record_type,
                        ttl: record.ttl,
                        records: vec![record],
                    });
                }
            }
        }

        rrsets
    }
}

/// Bytes an RRSIG signature covers (RFC 4034 Section 3.1.8.1): the RRSIG
/// RDATA without its signature, then the RRset in canonical form and order.
pub fn rrsig_signing_input(rrsig: &DnsRecordValue, rrset: &RRset) -> Result<Vec<u8>, SignError> {
    let DnsRecordValue::RRSIG {
        type_covered,
        algorithm,
        labels,
        original_ttl,
        expiration,
        inception,
        key_tag,
        signer_name,
        ..
    } = rrsig
    else {
        return Err(SignError::Record(DnsError::InvalidRecordType(
            rrsig.record_type().to_string(),
        )));
    };

    let mut data = Vec::new();
    data.extend_from_slice(&type_covered.number().to_be_bytes());
    data.push(*algorithm);
    data.push(*labels);
    data.extend_from_slice(&original_ttl.to_be_bytes());
    data.extend_from_slice(&expiration.to_be_bytes());
    data.extend_from_slice(&inception.to_be_bytes());
    data.extend_from_slice(&key_tag.to_be_bytes());
    data.extend_from_slice(&name_to_wire(signer_name));
    data.extend_from_slice(&canonicalize_rrset(rrset, *original_ttl)?);
    Ok(data)
}

/// Canonical RRset (RFC 4034 Section 6.3): sorted by RDATA, duplicates removed
fn canonicalize_rrset(rrset: &RRset, ttl: u32) -> Result<Vec<u8>, SignError> {
    let mut wire_records = rrset
        .records
        .iter()
        .map(|r| Ok((r.value.to_rdata()?, r.canonical_wire(ttl)?)))
        .collect::<Result<Vec<(Vec<u8>, Vec<u8>)>, DnsError>>()?;

    wire_records.sort_by(|a, b| a.0.cmp(&b.0));
    wire_records.dedup_by(|a, b| a.0 == b.0);

    Ok(wire_records.into_iter().flat_map(|(_, wire)| wire).collect())
}

/// Response signer
pub struct DnssecSigner {
    registry: Arc<KeyRegistry>,
    nsec3: Arc<Nsec3Engine>,
    config: DnssecConfig,
    metrics: Option<SigningMetricsHook>,
}

impl DnssecSigner {
    /// Create a new DNSSEC signer
    pub fn new(registry: Arc<KeyRegistry>, nsec3: Arc<Nsec3Engine>, config: DnssecConfig) -> Self {
        Self {
            registry,
            nsec3,
            config,
            metrics: None,
        }
    }

    /// Report (zone, elapsed, success) after every signing attempt
    pub fn with_metrics(mut self, hook: SigningMetricsHook) -> Self {
        self.metrics = Some(hook);
        self
    }

    pub fn config(&self) -> &DnssecConfig {
        &self.config
    }

    pub fn nsec3(&self) -> &Nsec3Engine {
        &self.nsec3
    }

    /// Longest registered zone containing `name`. Without a match, the
    /// immediate parent is used as a best guess.
    pub fn find_zone(&self, name: &str) -> String {
        let name = fqdn(name);

        let best = self
            .registry
            .zones()
            .into_iter()
            .filter(|zone| is_subdomain(&name, zone))
            .max_by_key(|zone| labels(zone).len());
        if let Some(zone) = best {
            return zone;
        }

        if labels(&name).len() >= 2 {
            canonical_name(&parent_domain(&name))
        } else {
            canonical_name(&name)
        }
    }

    /// DNSKEY record for a zone
    pub fn dnskey(&self, zone: &str) -> Option<DnsRecord> {
        self.registry.get(zone)?.dnskey_record().ok()
    }

    /// DS record for a zone
    pub fn ds_record(&self, zone: &str) -> Option<DsRecord> {
        self.registry.get(zone)?.ds_record().ok()
    }

    /// Sign a response.
    ///
    /// A response for a zone without a sign-capable key comes back unchanged
    /// and without error. On failure the untouched original is returned in
    /// the error.
    pub fn sign<M: DnsMessage>(&self, msg: M) -> Result<M, SignFailure<M>> {
        let Some(question) = msg.question().cloned() else {
            return Ok(msg);
        };

        let start = Instant::now();
        let zone = self.find_zone(&question.name);

        let key = match self.registry.get(&zone) {
            Some(key) if key.can_sign() => key,
            _ => {
                debug!(
                    "No signing key available for zone {} (query {})",
                    zone, question.name
                );
                return Ok(msg);
            }
        };

        match self.sign_message(&msg, &question, &zone, &key) {
            Ok(signed) => {
                let elapsed = start.elapsed();
                self.record_metrics(&zone, elapsed, true);
                debug!(
                    "Signed response for {} {} in zone {} ({} answers, {:?})",
                    question.name,
                    question.record_type,
                    zone,
                    signed.answers().len(),
                    elapsed
                );
                Ok(signed)
            }
            Err(error) => {
                self.record_metrics(&zone, start.elapsed(), false);
                Err(SignFailure {
                    original: msg,
                    error,
                })
            }
        }
    }

    /// Sign, or log and serve the response unsigned
    pub fn sign_or_passthrough<M: DnsMessage>(&self, msg: M) -> M {
        match self.sign(msg) {
            Ok(signed) => signed,
            Err(failure) => {
                warn!("Serving unsigned response: {}", failure.error);
                failure.into_original()
            }
        }
    }

    fn sign_message<M: DnsMessage>(
        &self,
        msg: &M,
        question: &Question,
        zone: &str,
        key: &KeyPair,
    ) -> Result<M, SignError> {
        let mut signed = msg.clone();

        if question.record_type == DnsRecordType::DNSKEY
            && canonical_name(&question.name) == zone
        {
            let dnskey = key.dnskey_record()?;
            if !signed.answers().contains(&dnskey) {
                signed.answers_mut().push(dnskey);
            }
        }

        match msg.response_code() {
            ResponseCode::NxDomain => {
                let proof = self.nsec3.generate_nxdomain(zone, &question.name);
                signed.authority_mut().extend(proof);
            }
            // An apex DNSKEY question already holds the key here
            ResponseCode::NoError if signed.answers().is_empty() => {
                let proof = self.nsec3.generate_nodata(zone, &question.name, &[]);
                signed.authority_mut().extend(proof);
            }
            _ => {}
        }

        let now = Utc::now().timestamp();
        // RRSIG times are serial numbers (RFC 4034 Section 3.1.5)
        let inception = (now - self.config.inception_offset.as_secs() as i64) as u32;
        let expiration = (now + self.config.signature_validity.as_secs() as i64) as u32;

        let answers = std::mem::take(signed.answers_mut());
        *signed.answers_mut() = self.sign_section(answers, key, zone, inception, expiration)?;

        let authority = std::mem::take(signed.authority_mut());
        *signed.authority_mut() = self.sign_section(authority, key, zone, inception, expiration)?;

        signed.set_authenticated_data(true);
        Ok(signed)
    }

    fn sign_section(
        &self,
        records: Vec<DnsRecord>,
        key: &KeyPair,
        zone: &str,
        inception: u32,
        expiration: u32,
    ) -> Result<Vec<DnsRecord>, SignError> {
        let mut section = Vec::with_capacity(records.len() * 2);

        for rrset in RRset::group(records) {
            // Existing signatures pass through
            if rrset.record_type == DnsRecordType::RRSIG {
                section.extend(rrset.records);
                continue;
            }

            let rrsig = self.sign_rrset(&rrset, key, zone, inception, expiration)?;
            section.extend(rrset.records);
            section.push(rrsig);
        }

        Ok(section)
    }

    /// Sign a single RRset
    pub fn sign_rrset(
        &self,
        rrset: &RRset,
        key: &KeyPair,
        zone: &str,
        inception: u32,
        expiration: u32,
    ) -> Result<DnsRecord, SignError> {
        if rrset.records.is_empty() {
            return Err(SignError::EmptyRrset);
        }
        if !key.can_sign() {
            return Err(SignError::NoSigningKey(canonical_name(zone)));
        }

        let mut rrsig = DnsRecordValue::RRSIG {
            type_covered: rrset.record_type,
            algorithm: key.algorithm().number(),
            labels: rrset.label_count(),
            original_ttl: rrset.ttl,
            expiration,
            inception,
            key_tag: key.key_tag(),
            signer_name: canonical_name(zone),
            signature: Vec::new(),
        };

        let data = rrsig_signing_input(&rrsig, rrset)?;
        let signature = key.sign(&data)?;

        debug!(
            "Signed RRset {}/{} with key {} (sig: {} bytes)",
            rrset.name,
            rrset.record_type,
            key.key_tag(),
            signature.len()
        );

        if let DnsRecordValue::RRSIG { signature: slot, .. } = &mut rrsig {
            *slot = signature;
        }

        Ok(DnsRecord::new(
            &rrset.name,
            rrset.ttl.min(self.config.signature_ttl),
            rrsig,
        ))
    }

    fn record_metrics(&self, zone: &str, elapsed: Duration, success: bool) {
        if let Some(ref hook) = self.metrics {
            hook(zone, elapsed, success);
        }
    }
}

/// A failed signing attempt: the original message plus the reason
pub struct SignFailure<M> {
    pub original: M,
    pub error: SignError,
}

impl<M> SignFailure<M> {
    pub fn into_original(self) -> M {
        self.original
    }
}

impl<M> fmt::Debug for SignFailure<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignFailure").field("error", &self.error).finish()
    }
}

impl<M> fmt::Display for SignFailure<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "response left unsigned: {}", self.error)
    }
}

impl<M> std::error::Error for SignFailure<M> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// DNSSEC signing errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignError {
    #[error("no signing key for zone {0}")]
    NoSigningKey(String),

    #[error("cannot sign empty RRset")]
    EmptyRrset,

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("record encoding failed: {0}")]
    Record(#[from] DnsError),
}
