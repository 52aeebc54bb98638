//! Reconciliation and submission
//!
//! One cycle: reload the configuration if its mtime changed, evaluate every
//! address set, compare the snapshot against the last pushed state, and when
//! anything differs push one update batch per zone. The per-set cache is
//! replaced wholesale so a partially-built cache is never observable, and
//! the comparison is symmetric set equality, so a lost address triggers a
//! push just like a new one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::thread;
use std::time::SystemTime;

use crate::agent::addrset;
use crate::agent::config::{self, AgentConfig, ConfigError, Zone};
use crate::agent::trigger::TriggerError;
use crate::ddns::protocol::{canonical_name, DoRequest, OpKind, Operation, Record, RecordType};

#[derive(Debug)]
pub enum AgentError {
    Io(std::io::Error),
    Config(ConfigError),
    Trigger(TriggerError),
    Http(reqwest::Error),
    /// The server answered with a non-success status.
    Rejected(u16, String),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Io(e) => write!(f, "IO error: {}", e),
            AgentError::Config(e) => write!(f, "{}", e),
            AgentError::Trigger(e) => write!(f, "{}", e),
            AgentError::Http(e) => write!(f, "HTTP error: {}", e),
            AgentError::Rejected(status, body) => {
                write!(f, "server rejected the batch ({}): {}", status, body)
            }
        }
    }
}

impl std::error::Error for AgentError {}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err)
    }
}

impl From<ConfigError> for AgentError {
    fn from(err: ConfigError) -> Self {
        AgentError::Config(err)
    }
}

impl From<TriggerError> for AgentError {
    fn from(err: TriggerError) -> Self {
        AgentError::Trigger(err)
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Http(err)
    }
}

type Result<T> = std::result::Result<T, AgentError>;

type AddrSnapshot = HashMap<String, Vec<IpAddr>>;
type AddrCache = HashMap<String, HashSet<String>>;

/// Whether the current snapshot differs from the pushed state. Symmetric:
/// an address present only in the cache counts as a change.
fn set_changed(current: &AddrCache, cache: &AddrCache) -> bool {
    current != cache
}

fn cache_of(snapshot: &AddrSnapshot) -> AddrCache {
    snapshot
        .iter()
        .map(|(name, addrs)| {
            (
                name.clone(),
                addrs.iter().map(|addr| addr.to_string()).collect(),
            )
        })
        .collect()
}

/// Materialize the update operations a zone implies for a snapshot: every
/// record binding crossed with the addresses of its sets, deduplicated by
/// textual form within the binding.
pub fn zone_operations(zone: &Zone, snapshot: &AddrSnapshot) -> Vec<Operation> {
    let mut operations = Vec::new();

    for binding in &zone.records {
        let mut merged: BTreeMap<String, IpAddr> = BTreeMap::new();
        for set_name in &binding.addr_sets {
            if let Some(addrs) = snapshot.get(set_name) {
                for addr in addrs {
                    merged.insert(addr.to_string(), *addr);
                }
            }
        }

        for (text, addr) in merged {
            operations.push(Operation {
                record: Record {
                    record_type: RecordType::of_addr(&addr),
                    canonical_name: canonical_name(&binding.domain, &binding.subdomain),
                    value: text,
                    ttl: binding.ttl,
                },
                op: OpKind::Update,
                domain: binding.domain.clone(),
                subdomain: binding.subdomain.clone(),
                registry: String::new(),
                role: String::new(),
            });
        }
    }

    operations
}

pub struct Reconciler {
    config_path: PathBuf,
    http: reqwest::blocking::Client,
    last_mtime: Option<SystemTime>,
    config: Option<AgentConfig>,
    caches: AddrCache,
}

impl Reconciler {
    pub fn new(config_path: PathBuf) -> Reconciler {
        Reconciler {
            config_path,
            http: reqwest::blocking::Client::new(),
            last_mtime: None,
            config: None,
            caches: HashMap::new(),
        }
    }

    /// One reconciliation cycle. Per-zone submission failures are logged
    /// and do not fail the cycle; config and evaluation failures do.
    pub fn run_cycle(&mut self) -> Result<()> {
        let mtime = fs::metadata(&self.config_path)?.modified()?;
        if self.last_mtime != Some(mtime) {
            log::info!("Load configuration");
            let config = config::load(&self.config_path)?;
            self.caches = config
                .addr_sets
                .iter()
                .map(|set| (set.name.clone(), HashSet::new()))
                .collect();
            self.config = Some(config);
            self.last_mtime = Some(mtime);
        }

        let config = match &self.config {
            Some(config) => config,
            None => return Ok(()),
        };

        let mut snapshot: AddrSnapshot = HashMap::new();
        for set in &config.addr_sets {
            snapshot.insert(set.name.clone(), addrset::evaluate(set)?);
        }

        let current = cache_of(&snapshot);
        if !set_changed(&current, &self.caches) {
            return Ok(());
        }
        self.caches = current;

        let http = &self.http;
        thread::scope(|s| {
            for zone in &config.zones {
                let operations = zone_operations(zone, &snapshot);
                if operations.is_empty() {
                    continue;
                }
                for op in &operations {
                    log::info!("Update {} => {}", op.record.canonical_name, op.record.value);
                }
                s.spawn(move || {
                    if let Err(e) = submit_zone(http, zone, operations) {
                        log::error!("Submitting to [{}] failed: {}", zone.server, e);
                    }
                });
            }
        });

        Ok(())
    }
}

fn submit_zone(http: &reqwest::blocking::Client, zone: &Zone, operations: Vec<Operation>) -> Result<()> {
    let url = format!("{}/v1/do", zone.server.trim_end_matches('/'));
    let request = DoRequest {
        role: zone.role.clone(),
        token: zone.key.clone(),
        operations,
    };

    let response = http.post(&url).json(&request).send()?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        return Err(AgentError::Rejected(status, body));
    }

    Ok(())
}
