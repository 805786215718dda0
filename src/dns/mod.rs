//! GSLB DNSSEC
//!
//! Online DNSSEC for a fleet of authoritative GSLB nodes. Answers are built
//! dynamically, so every response is signed at query time and denials carry
//! synthetic NSEC3 proofs. Nodes exchange public keys over HTTP so any node
//! can validate any other node's signatures.
//!
//! ## Architecture
//!
//! ```text
//! DNS response → DnssecSigner → signed response
//!                     ↓
//!               KeyRegistry ← KeyStore (KV: memory / SQLite)
//!                     ↑
//!               KeySyncer ← peers' GET /api/v1/dnssec/keys
//! ```
//!
//! ## Components
//!
//! - `dns_types`: record model, canonical wire encoding, name helpers
//! - `dns_message`: the message trait the signer works against
//! - `dns_config`: node configuration (TOML / YAML)
//! - `dnssec_keys`: ECDSA key pairs, DS records, the zone key registry
//! - `nsec3`: synthetic NSEC3 denial-of-existence
//! - `dnssec`: response signer
//! - `kv_store`: key-value persistence backends
//! - `key_store`: key persistence and startup bootstrap
//! - `key_sync`: peer key synchronization
//! - `dnssec_api`: HTTP read surface

pub mod dns_types;
pub mod dns_message;
pub mod dns_config;
pub mod dnssec_keys;
pub mod nsec3;
pub mod dnssec;
pub mod kv_store;
pub mod key_store;
pub mod key_sync;
pub mod dnssec_api;

pub use dns_types::*;
pub use dns_message::*;
pub use dns_config::*;
pub use dnssec_keys::*;
pub use nsec3::*;
pub use dnssec::*;
pub use kv_store::*;
pub use key_store::*;
pub use key_sync::*;
pub use dnssec_api::*;
