//! Role resolution and operation validation
//!
//! A role definition carries the tokens that may act as the role and the
//! domains delegated to it. Validation rewrites each operation in place:
//! domain and subdomain are IDN-normalized to A-label form and the canonical
//! owner name is derived, so everything downstream of this module works on
//! ASCII names only.
//!
//! Delegation glob semantics are intentionally minimal: `""` grants the apex
//! only, `"*"` and `".*"` grant any subdomain, anything else is a regular
//! expression matched (unanchored) against the normalized subdomain.

use std::collections::HashMap;
use std::sync::RwLock;

use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use crate::ddns::protocol::{canonical_name, Operation};
use crate::ddns::store::{ConfigStore, StoreError};

#[derive(Debug)]
pub enum AuthError {
    /// Unknown role, unknown token, or expired token.
    Unauthenticated,
    /// The operation targets a domain outside the role's delegations or
    /// breaks the delegation glob.
    PermissionDenied(String),
    /// The request itself is malformed (bad IDN input).
    InvalidInput(String),
    /// A delegation glob in the role definition does not compile.
    InvalidGlob(String),
    Store(StoreError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Unauthenticated => write!(f, "authorization failed"),
            AuthError::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            AuthError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            AuthError::InvalidGlob(glob) => write!(f, "delegation glob does not compile: {}", glob),
            AuthError::Store(e) => write!(f, "definition store error: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

type Result<T> = std::result::Result<T, AuthError>;

/// One token under a role. `expire` is a Unix timestamp; zero means the
/// token never expires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyDef {
    #[serde(default)]
    pub expire: i64,
    #[serde(default)]
    pub desc: String,
}

/// A domain delegated to a role: the registry responsible for it and the
/// glob constraining which subdomains the role may touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub registry: String,
    #[serde(default)]
    pub glob: String,
}

/// Server-side definition of a role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleDef {
    #[serde(default)]
    pub keys: HashMap<String, KeyDef>,
    #[serde(default)]
    pub managed_domains: HashMap<String, Delegation>,
}

/// Compiled delegation globs, shared across requests.
#[derive(Default)]
pub struct GlobCache {
    globs: RwLock<HashMap<String, Regex>>,
}

impl GlobCache {
    pub fn new() -> GlobCache {
        GlobCache {
            globs: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, pattern: &str) -> Option<Regex> {
        self.globs.read().ok()?.get(pattern).cloned()
    }

    fn set(&self, pattern: &str, regex: Regex) {
        if let Ok(mut globs) = self.globs.write() {
            globs.insert(pattern.to_string(), regex);
        }
    }
}

/// Match a normalized subdomain against a delegation glob.
pub fn match_glob(subdomain: &str, glob: &str, cache: &GlobCache) -> Result<bool> {
    match glob {
        "" => return Ok(subdomain.is_empty()),
        "*" | ".*" => return Ok(true),
        _ => {}
    }

    let compiled = match cache.get(glob) {
        Some(re) => re,
        None => {
            let re = Regex::new(glob).map_err(|_| AuthError::InvalidGlob(glob.to_string()))?;
            cache.set(glob, re.clone());
            re
        }
    };

    Ok(compiled.is_match(subdomain))
}

fn token_valid(key: &KeyDef, now: i64) -> bool {
    key.expire == 0 || key.expire >= now
}

/// Resolve the role definition and check the token against it.
///
/// An unknown role is indistinguishable from a bad token in the result, so
/// the response does not leak which roles exist.
pub fn authenticate(store: &ConfigStore, role: &str, token: &str) -> Result<RoleDef> {
    let role_def: RoleDef = match store.query(&["role", role]) {
        Ok(def) => def,
        Err(StoreError::NotFound(_)) => return Err(AuthError::Unauthenticated),
        Err(e) => return Err(AuthError::Store(e)),
    };

    let key = match role_def.keys.get(token) {
        Some(key) => key,
        None => return Err(AuthError::Unauthenticated),
    };
    if !token_valid(key, chrono::Utc::now().timestamp()) {
        return Err(AuthError::Unauthenticated);
    }

    Ok(role_def)
}

fn to_ascii(name: &str) -> Result<String> {
    idna::domain_to_ascii(name).map_err(|_| AuthError::InvalidInput(format!("bad IDN: {}", name)))
}

/// Validate every operation against the role's delegations, in input order,
/// rewriting each with its normalized names and canonical owner name.
///
/// The delegation table may be keyed by either the form the client sent or
/// the A-label form; both are honored.
pub fn validate_all(
    globs: &GlobCache,
    role_def: &RoleDef,
    role: &str,
    operations: &mut [Operation],
) -> Result<()> {
    for op in operations.iter_mut() {
        let delegation = match role_def.managed_domains.get(&op.domain) {
            Some(delegation) => Some(delegation),
            None => to_ascii(&op.domain)
                .ok()
                .and_then(|ascii| role_def.managed_domains.get(&ascii)),
        };
        let delegation = delegation.ok_or_else(|| {
            AuthError::PermissionDenied(format!(
                "{} is not under control of the role {}",
                op.domain, role
            ))
        })?;

        op.domain = to_ascii(&op.domain)?;

        if op.subdomain.is_empty() {
            if !delegation.glob.is_empty() {
                return Err(AuthError::PermissionDenied(format!(
                    "the apex of {} is not delegated to role {}",
                    op.domain, role
                )));
            }
            op.record.canonical_name = op.domain.clone();
        } else {
            op.subdomain = to_ascii(&op.subdomain)?;

            if !match_glob(&op.subdomain, &delegation.glob, globs)? {
                return Err(AuthError::PermissionDenied(format!(
                    "{} breaks the glob pattern for role {}: `{}`",
                    op.subdomain, role, delegation.glob
                )));
            }
            op.record.canonical_name = canonical_name(&op.domain, &op.subdomain);
        }

        op.role = role.to_string();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddns::protocol::{OpKind, Record, RecordType};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn temp_store() -> (PathBuf, ConfigStore) {
        let dir = std::env::temp_dir().join(format!(
            "vane-auth-test-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        fs::create_dir_all(dir.join("role")).unwrap();
        let store = ConfigStore::new(&dir, Duration::from_secs(600));
        (dir, store)
    }

    fn write_role(dir: &PathBuf, role: &str, def: &RoleDef) {
        fs::write(
            dir.join("role").join(format!("{}.json", role)),
            serde_json::to_string(def).unwrap(),
        )
        .unwrap();
    }

    fn update_op(domain: &str, subdomain: &str) -> Operation {
        Operation {
            record: Record {
                record_type: RecordType::A,
                canonical_name: String::new(),
                value: "192.0.2.1".to_string(),
                ttl: 60,
            },
            op: OpKind::Update,
            domain: domain.to_string(),
            subdomain: subdomain.to_string(),
            registry: String::new(),
            role: String::new(),
        }
    }

    fn role_with(domain: &str, glob: &str) -> RoleDef {
        let mut def = RoleDef::default();
        def.keys.insert("t1".to_string(), KeyDef::default());
        def.managed_domains.insert(
            domain.to_string(),
            Delegation {
                registry: "r".to_string(),
                glob: glob.to_string(),
            },
        );
        def
    }

    #[test]
    fn test_glob_empty_is_apex_only() {
        let cache = GlobCache::new();
        assert!(match_glob("", "", &cache).unwrap());
        assert!(!match_glob("www", "", &cache).unwrap());
    }

    #[test]
    fn test_glob_wildcards_accept_anything() {
        let cache = GlobCache::new();
        assert!(match_glob("www", "*", &cache).unwrap());
        assert!(match_glob("a.b.c", "*", &cache).unwrap());
        assert!(match_glob("www", ".*", &cache).unwrap());
    }

    #[test]
    fn test_glob_regex_is_unanchored() {
        let cache = GlobCache::new();
        // "dev" matches "development": the pattern is a plain regex, not a
        // full-string match.
        assert!(match_glob("development", "dev", &cache).unwrap());
        assert!(!match_glob("prod", "dev", &cache).unwrap());
    }

    #[test]
    fn test_glob_cache_is_reused() {
        let cache = GlobCache::new();
        assert!(match_glob("www-1", "www-[0-9]+", &cache).unwrap());
        assert!(cache.get("www-[0-9]+").is_some());
        assert!(!match_glob("mail", "www-[0-9]+", &cache).unwrap());
    }

    #[test]
    fn test_bad_glob_is_rejected() {
        let cache = GlobCache::new();
        match match_glob("www", "(", &cache) {
            Err(AuthError::InvalidGlob(_)) => {}
            other => panic!("expected InvalidGlob, got {:?}", other),
        }
    }

    #[test]
    fn test_token_expiry() {
        let never = KeyDef {
            expire: 0,
            desc: String::new(),
        };
        assert!(token_valid(&never, 1_000_000));

        let expired = KeyDef {
            expire: 1,
            desc: String::new(),
        };
        assert!(!token_valid(&expired, 1000));

        let future = KeyDef {
            expire: 2000,
            desc: String::new(),
        };
        assert!(token_valid(&future, 1000));
    }

    #[test]
    fn test_authenticate_unknown_role() {
        let (_dir, store) = temp_store();
        match authenticate(&store, "nobody", "t1") {
            Err(AuthError::Unauthenticated) => {}
            other => panic!("expected Unauthenticated, got {:?}", other),
        }
    }

    #[test]
    fn test_authenticate_token_checks() {
        let (dir, store) = temp_store();
        let mut def = role_with("example.com", "");
        def.keys.insert(
            "old".to_string(),
            KeyDef {
                expire: 1,
                desc: String::new(),
            },
        );
        write_role(&dir, "alice", &def);

        assert!(authenticate(&store, "alice", "t1").is_ok());
        match authenticate(&store, "alice", "wrong") {
            Err(AuthError::Unauthenticated) => {}
            other => panic!("expected Unauthenticated, got {:?}", other),
        }
        match authenticate(&store, "alice", "old") {
            Err(AuthError::Unauthenticated) => {}
            other => panic!("expected Unauthenticated, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_apex_update() {
        let globs = GlobCache::new();
        let def = role_with("example.com", "");
        let mut ops = vec![update_op("example.com", "")];

        validate_all(&globs, &def, "alice", &mut ops).unwrap();
        assert_eq!(ops[0].record.canonical_name, "example.com");
        assert_eq!(ops[0].role, "alice");
    }

    #[test]
    fn test_validate_apex_denied_under_wildcard() {
        let globs = GlobCache::new();
        let def = role_with("example.com", "*");
        let mut ops = vec![update_op("example.com", "")];

        match validate_all(&globs, &def, "alice", &mut ops) {
            Err(AuthError::PermissionDenied(_)) => {}
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_subdomain_denied_on_apex_only_delegation() {
        let globs = GlobCache::new();
        let def = role_with("example.com", "");
        let mut ops = vec![update_op("example.com", "www")];

        match validate_all(&globs, &def, "alice", &mut ops) {
            Err(AuthError::PermissionDenied(_)) => {}
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_undelegated_domain_denied() {
        let globs = GlobCache::new();
        let def = role_with("example.com", "*");
        let mut ops = vec![update_op("other.test", "www")];

        match validate_all(&globs, &def, "alice", &mut ops) {
            Err(AuthError::PermissionDenied(_)) => {}
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_idn_canonicalization() {
        let globs = GlobCache::new();
        // Delegation keyed by the A-label form; request arrives in Unicode.
        let def = role_with("xn--bcher-kva.example", "*");
        let mut ops = vec![update_op("b\u{00fc}cher.example", "www")];

        validate_all(&globs, &def, "alice", &mut ops).unwrap();
        assert_eq!(ops[0].domain, "xn--bcher-kva.example");
        assert_eq!(ops[0].record.canonical_name, "www.xn--bcher-kva.example");
    }

    #[test]
    fn test_validate_bad_idn_is_invalid_input() {
        let globs = GlobCache::new();
        let def = role_with("example.com", "*");
        // An A-label prefix with non-ASCII content cannot be decoded.
        let mut ops = vec![update_op("example.com", "xn--b\u{00fc}cher")];

        match validate_all(&globs, &def, "alice", &mut ops) {
            Err(AuthError::InvalidInput(_)) => {}
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rewrites_in_input_order_until_failure() {
        let globs = GlobCache::new();
        let def = role_with("example.com", "*");
        let mut ops = vec![
            update_op("example.com", "www"),
            update_op("other.test", "www"),
        ];

        assert!(validate_all(&globs, &def, "alice", &mut ops).is_err());
        // The first operation was already rewritten before the failure.
        assert_eq!(ops[0].record.canonical_name, "www.example.com");
    }
}
