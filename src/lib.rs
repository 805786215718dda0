// Library interface for GSLB DNSSEC node components
// Shared by the node binary and integration tests

pub mod dns;
pub mod lock_utils;
