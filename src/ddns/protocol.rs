//! Data model for records and operations
//!
//! These types travel over the wire between agent and server (JSON body of
//! `POST /v1/do`) and down into the provider registries. The `registry` and
//! `role` fields of an `Operation` never appear on the wire; authorization
//! and planning fill them in on the server side.

use std::net::IpAddr;

use serde_derive::{Deserialize, Serialize};

/// Record types the control plane manages. Anything else a zone holds is
/// out of scope and must never be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
}

impl RecordType {
    /// Classify an address the way the submission side does: anything that
    /// embeds an IPv4 address is an `A` record, everything else is `AAAA`.
    pub fn of_addr(addr: &IpAddr) -> RecordType {
        match addr {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single resource record as providers see it. `canonical_name` is the
/// fully-qualified owner name in ASCII (A-label) form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    #[serde(rename = "name", default)]
    pub canonical_name: String,
    pub value: String,
    pub ttl: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Update,
    Delete,
}

/// One requested change to a zone. `domain` is the delegated apex the role
/// claims authority over; `subdomain` is the label(s) below it, empty for
/// the apex itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(flatten)]
    pub record: Record,
    pub op: OpKind,
    pub domain: String,
    #[serde(default)]
    pub subdomain: String,

    #[serde(skip)]
    pub registry: String,
    #[serde(skip)]
    pub role: String,
}

/// Join an already-normalized `(domain, subdomain)` pair into the owner name
/// providers operate on.
pub fn canonical_name(domain: &str, subdomain: &str) -> String {
    if subdomain.is_empty() {
        domain.to_string()
    } else {
        format!("{}.{}", subdomain, domain)
    }
}

/// Request body of `POST /v1/do`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoRequest {
    pub role: String,
    pub token: String,
    pub operations: Vec<Operation>,
}
