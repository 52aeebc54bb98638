//! The `ServerContext` holds the common state across the record server

use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::ddns::authorize::GlobCache;
use crate::ddns::registry::BuilderSet;
use crate::ddns::store::ConfigStore;

#[derive(Debug, Display, From, Error)]
pub enum ContextError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ContextError>;

/// Main server context containing configuration and shared state
///
/// Built once at startup and shared by the HTTP handlers and the background
/// execution threads they spawn.
pub struct ServerContext {
    pub store: ConfigStore,
    pub globs: GlobCache,
    pub builders: BuilderSet,
    pub http_listen: String,
    pub route_prefix: String,
}

impl ServerContext {
    pub fn new(
        base_dir: &str,
        cache_lifetime: Duration,
        http_listen: &str,
        route_prefix: &str,
    ) -> ServerContext {
        ServerContext {
            store: ConfigStore::new(base_dir, cache_lifetime),
            globs: GlobCache::new(),
            builders: BuilderSet::new(),
            http_listen: http_listen.to_string(),
            route_prefix: normalize_prefix(route_prefix),
        }
    }

    /// Verify the definition directory is usable before serving.
    pub fn initialize(&self) -> Result<()> {
        let meta = std::fs::metadata(self.store.base_dir())?;
        if !meta.is_dir() {
            return Err(ContextError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", self.store.base_dir().display()),
            )));
        }
        Ok(())
    }

    pub fn into_shared(self) -> Arc<ServerContext> {
        Arc::new(self)
    }
}

/// Route prefixes always start with `/` and never end with one, so joining
/// `prefix + "/v1/do"` yields a clean path. `"/"` collapses to the empty
/// prefix.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/api"), "/api");
        assert_eq!(normalize_prefix("api/"), "/api");
        assert_eq!(normalize_prefix("/api/v2/"), "/api/v2");
    }

    #[test]
    fn test_initialize_requires_existing_dir() {
        let context = ServerContext::new(
            "/nonexistent/vane-test-dir",
            Duration::from_secs(600),
            "127.0.0.1:8053",
            "/",
        );
        assert!(context.initialize().is_err());
    }
}
