//! Provider registry abstraction
//!
//! A registry is a back-end DNS service reduced to the four operations the
//! planner needs. Concrete implementations live in `crate::providers`; the
//! planner only ever sees trait objects constructed through a `BuilderSet`.

use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

use crate::ddns::protocol::Record;

#[derive(Debug)]
pub enum RegistryError {
    /// A required builder parameter is absent from the registry definition.
    MissingParam(&'static str, String),
    /// The provider API rejected a call.
    Api(String),
    Http(reqwest::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::MissingParam(builder, param) => {
                write!(f, "{}: require parameter `{}`", builder, param)
            }
            RegistryError::Api(msg) => write!(f, "provider API error: {}", msg),
            RegistryError::Http(e) => write!(f, "HTTP error: {}", e),
            RegistryError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Http(err)
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err)
    }
}

type Result<T> = std::result::Result<T, RegistryError>;

/// A DNS zone provider.
///
/// Implementations must be callable from several threads at once; the
/// planner invokes independent operations concurrently within each phase.
pub trait Registry: Send + Sync {
    /// Add a record to the zone. Idempotence is not required; updates are
    /// always preceded by a purge of the owner name.
    fn append_record(&self, record: &Record) -> Result<()>;

    /// Remove the one record matching the canonical name and value. Removing
    /// a record that does not exist is a no-op.
    fn delete_record(&self, record: &Record) -> Result<()>;

    /// Remove every A/AAAA record under the owner name. Records of any other
    /// type must be left alone.
    fn delete_all_for_name(&self, canonical_name: &str) -> Result<()>;

    /// Release provider-side resources.
    fn close(&self) -> Result<()>;
}

/// On-disk definition of a registry: which builder constructs it and the
/// opaque parameters handed to that builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDef {
    pub builder: String,
    #[serde(default)]
    pub builder_params: HashMap<String, String>,
}

/// Factory from builder parameters to a constructed provider. Fails when
/// required parameters are missing or the remote rejects the credentials.
pub type RegistryBuilder =
    Box<dyn Fn(&HashMap<String, String>) -> Result<Box<dyn Registry>> + Send + Sync>;

/// The set of known registry builders, keyed by name.
///
/// Populated once at startup and threaded through the server context;
/// read-only afterwards.
#[derive(Default)]
pub struct BuilderSet {
    builders: HashMap<String, RegistryBuilder>,
}

impl BuilderSet {
    pub fn new() -> BuilderSet {
        BuilderSet {
            builders: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&HashMap<String, String>) -> Result<Box<dyn Registry>> + Send + Sync + 'static,
    {
        self.builders.insert(name.to_string(), Box::new(builder));
    }

    pub fn get(&self, name: &str) -> Option<&RegistryBuilder> {
        self.builders.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(|k| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddns::protocol::RecordType;

    struct NullRegistry;

    impl Registry for NullRegistry {
        fn append_record(&self, _record: &Record) -> Result<()> {
            Ok(())
        }
        fn delete_record(&self, _record: &Record) -> Result<()> {
            Ok(())
        }
        fn delete_all_for_name(&self, _canonical_name: &str) -> Result<()> {
            Ok(())
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builder_registration_and_lookup() {
        let mut builders = BuilderSet::new();
        builders.register("null", |_params| Ok(Box::new(NullRegistry) as Box<dyn Registry>));

        assert!(builders.get("null").is_some());
        assert!(builders.get("cloudflare").is_none());

        let registry = builders.get("null").unwrap()(&HashMap::new()).unwrap();
        registry
            .append_record(&Record {
                record_type: RecordType::A,
                canonical_name: "example.com".to_string(),
                value: "192.0.2.1".to_string(),
                ttl: 60,
            })
            .unwrap();
    }

    #[test]
    fn test_registry_def_parses_without_params() {
        let def: RegistryDef = serde_json::from_str(r#"{"builder":"powerdns"}"#).unwrap();
        assert_eq!(def.builder, "powerdns");
        assert!(def.builder_params.is_empty());
    }
}
