//! Agent configuration
//!
//! One JSON document: named address sets (interfaces plus filter rules) and
//! the zones to keep converged. Rule globs are compiled once at load time;
//! the reconciler reloads the whole document when the file's mtime changes.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde_derive::Deserialize;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    BadRule {
        addr_set: String,
        glob: String,
        error: regex::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "reading config failed: {}", e),
            ConfigError::Parse(e) => write!(f, "loading config in JSON failed: {}", e),
            ConfigError::BadRule {
                addr_set,
                glob,
                error,
            } => write!(
                f,
                "rule glob `{}` in addr set [{}] does not compile: {}",
                glob, addr_set, error
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

type Result<T> = std::result::Result<T, ConfigError>;

/// One address filter rule, evaluated against the textual form of an
/// address. A `pass` rule admits what it matches; a non-`pass` rule admits
/// what it does not match.
#[derive(Debug, Deserialize)]
pub struct Rule {
    pub pass: bool,
    pub glob: String,
    #[serde(skip)]
    compiled: Option<Regex>,
}

impl Rule {
    pub fn new(pass: bool, glob: &str) -> std::result::Result<Rule, regex::Error> {
        Ok(Rule {
            pass,
            glob: glob.to_string(),
            compiled: Some(Regex::new(glob)?),
        })
    }

    pub fn admits(&self, addr: &str) -> bool {
        let matched = match &self.compiled {
            Some(re) => re.is_match(addr),
            None => false,
        };
        (self.pass && matched) || (!self.pass && !matched)
    }
}

/// A named, rule-filtered projection of the addresses bound to a group of
/// local interfaces.
#[derive(Debug, Deserialize)]
pub struct AddrSet {
    pub name: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One record owner name a zone keeps converged, fed by one or more address
/// sets.
#[derive(Debug, Deserialize)]
pub struct RecordBinding {
    pub domain: String,
    #[serde(default)]
    pub subdomain: String,
    pub ttl: u32,
    #[serde(default)]
    pub addr_sets: Vec<String>,
}

/// A server to push to, with the credentials to use and the records it owns.
#[derive(Debug, Deserialize)]
pub struct Zone {
    pub server: String,
    pub role: String,
    pub key: String,
    #[serde(default)]
    pub records: Vec<RecordBinding>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub addr_sets: Vec<AddrSet>,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

/// Read and parse the configuration, compiling every rule glob.
pub fn load(path: &Path) -> Result<AgentConfig> {
    let data = fs::read(path)?;
    let mut config: AgentConfig = serde_json::from_slice(&data)?;

    for set in &mut config.addr_sets {
        let set_name = set.name.clone();
        for rule in &mut set.rules {
            rule.compiled = Some(Regex::new(&rule.glob).map_err(|error| ConfigError::BadRule {
                addr_set: set_name.clone(),
                glob: rule.glob.clone(),
                error,
            })?);
        }
    }

    Ok(config)
}
