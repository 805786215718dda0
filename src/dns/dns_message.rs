//! DNS Message Interface
//!
//! The signer only needs a handful of things from a response: the question,
//! the answer and authority sections, the response code and the AD flag.
//! `DnsMessage` exposes exactly that, so any wire library can sit underneath.
//! `DnsResponse` is the in-crate implementation used by the node and tests.

use super::dns_types::{fqdn, DnsRecord, DnsRecordType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response codes relevant to proof synthesis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
}

impl ResponseCode {
    /// RCODE value
    pub fn code(&self) -> u8 {
        match self {
            ResponseCode::NoError => 0,
            ResponseCode::FormErr => 1,
            ResponseCode::ServFail => 2,
            ResponseCode::NxDomain => 3,
            ResponseCode::NotImp => 4,
            ResponseCode::Refused => 5,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseCode::NoError => "NOERROR",
            ResponseCode::FormErr => "FORMERR",
            ResponseCode::ServFail => "SERVFAIL",
            ResponseCode::NxDomain => "NXDOMAIN",
            ResponseCode::NotImp => "NOTIMP",
            ResponseCode::Refused => "REFUSED",
        };
        f.write_str(name)
    }
}

/// A single question entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    /// Fully qualified query name
    pub name: String,
    /// Query type
    pub record_type: DnsRecordType,
}

impl Question {
    pub fn new(name: impl AsRef<str>, record_type: DnsRecordType) -> Self {
        Self {
            name: fqdn(name.as_ref()),
            record_type,
        }
    }
}

/// What the signing core reads from and writes to a response
pub trait DnsMessage: Clone {
    /// First question, if any
    fn question(&self) -> Option<&Question>;

    fn answers(&self) -> &[DnsRecord];

    fn answers_mut(&mut self) -> &mut Vec<DnsRecord>;

    fn authority(&self) -> &[DnsRecord];

    fn authority_mut(&mut self) -> &mut Vec<DnsRecord>;

    fn response_code(&self) -> ResponseCode;

    fn authenticated_data(&self) -> bool;

    fn set_authenticated_data(&mut self, value: bool);
}

/// In-memory DNS response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsResponse {
    pub id: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<DnsRecord>,
    pub authority: Vec<DnsRecord>,
    pub additional: Vec<DnsRecord>,
    pub rcode: ResponseCode,
    pub authoritative: bool,
    pub authenticated_data: bool,
}

impl DnsResponse {
    /// Empty NOERROR response for a single question
    pub fn new(id: u16, question: Question) -> Self {
        Self {
            id,
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            rcode: ResponseCode::NoError,
            authoritative: true,
            authenticated_data: false,
        }
    }

    /// Response without a question section
    pub fn empty(id: u16) -> Self {
        Self {
            id,
            questions: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            rcode: ResponseCode::NoError,
            authoritative: true,
            authenticated_data: false,
        }
    }

    pub fn with_rcode(mut self, rcode: ResponseCode) -> Self {
        self.rcode = rcode;
        self
    }

    pub fn with_answer(mut self, record: DnsRecord) -> Self {
        self.answers.push(record);
        self
    }

    pub fn with_authority(mut self, record: DnsRecord) -> Self {
        self.authority.push(record);
        self
    }
}

impl DnsMessage for DnsResponse {
    fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    fn answers(&self) -> &[DnsRecord] {
        &self.answers
    }

    fn answers_mut(&mut self) -> &mut Vec<DnsRecord> {
        &mut self.answers
    }

    fn authority(&self) -> &[DnsRecord] {
        &self.authority
    }

    fn authority_mut(&mut self) -> &mut Vec<DnsRecord> {
        &mut self.authority
    }

    fn response_code(&self) -> ResponseCode {
        self.rcode
    }

    fn authenticated_data(&self) -> bool {
        self.authenticated_data
    }

    fn set_authenticated_data(&mut self, value: bool) {
        self.authenticated_data = value;
    }
}
