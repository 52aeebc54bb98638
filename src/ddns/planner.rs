//! Batch execution planning
//!
//! The planner turns a validated operation batch into provider calls in two
//! phases. Phase A purges every owner name an update touches
//! (`delete_all_for_name`), phase B appends the submitted records and applies
//! explicit deletes. The barrier between the phases is what makes updates
//! convergent: after the batch, a purged owner name holds exactly the records
//! the client submitted, so replaying the same batch is safe.
//!
//! The planner does not retry, roll back, or order anything across provider
//! boundaries. Within a phase every call is independent and runs on its own
//! thread.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use crate::ddns::authorize::RoleDef;
use crate::ddns::protocol::{OpKind, Operation};
use crate::ddns::registry::{BuilderSet, Registry, RegistryDef, RegistryError};
use crate::ddns::store::{ConfigStore, StoreError};

#[derive(Debug)]
pub enum PlanError {
    /// An operation's domain has no delegation entry naming a registry.
    UndelegatedDomain(String),
    /// The delegation names a registry with no definition on disk.
    MissingDef(String),
    /// The registry definition names a builder nobody registered.
    UnknownBuilder { registry: String, builder: String },
    Store(StoreError),
    Build(RegistryError),
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanError::UndelegatedDomain(domain) => {
                write!(f, "no corresponding registry for domain {}", domain)
            }
            PlanError::MissingDef(registry) => {
                write!(f, "missing definition for registry {}", registry)
            }
            PlanError::UnknownBuilder { registry, builder } => {
                write!(f, "no registry builder called {} found for {}", builder, registry)
            }
            PlanError::Store(e) => write!(f, "definition store error: {}", e),
            PlanError::Build(e) => write!(f, "building registry failed: {}", e),
        }
    }
}

impl std::error::Error for PlanError {}

type Result<T> = std::result::Result<T, PlanError>;

/// Instantiate every registry the batch needs, once per registry name, and
/// stamp each operation with the name of the registry responsible for it.
/// Any resolution or construction failure aborts the whole batch.
pub fn build_registries(
    store: &ConfigStore,
    builders: &BuilderSet,
    role_def: &RoleDef,
    operations: &mut [Operation],
) -> Result<HashMap<String, Arc<dyn Registry>>> {
    let mut registries: HashMap<String, Arc<dyn Registry>> = HashMap::new();

    for op in operations.iter_mut() {
        let delegation = role_def
            .managed_domains
            .get(&op.domain)
            .ok_or_else(|| PlanError::UndelegatedDomain(op.domain.clone()))?;
        let name = delegation.registry.clone();

        if !registries.contains_key(&name) {
            let def: RegistryDef = match store.query(&["registry", &name]) {
                Ok(def) => def,
                Err(StoreError::NotFound(_)) => return Err(PlanError::MissingDef(name)),
                Err(e) => return Err(PlanError::Store(e)),
            };

            let builder = builders.get(&def.builder).ok_or_else(|| PlanError::UnknownBuilder {
                registry: name.clone(),
                builder: def.builder.clone(),
            })?;
            let registry = builder(&def.builder_params).map_err(PlanError::Build)?;
            registries.insert(name.clone(), Arc::from(registry));
        }

        op.registry = name;
    }

    Ok(registries)
}

/// Execute a batch against its registries.
///
/// The callback fires exactly once per operation with the provider's error,
/// if any; invocation order is not guaranteed. An update whose purge failed
/// receives the purge error and its append is skipped.
pub fn execute_all<F>(
    operations: &[Operation],
    registries: &HashMap<String, Arc<dyn Registry>>,
    callback: F,
) where
    F: Fn(Option<&RegistryError>, &Operation) + Send + Sync,
{
    let mut updates: Vec<&Operation> = Vec::new();
    let mut deletes: Vec<&Operation> = Vec::new();
    for op in operations {
        match op.op {
            OpKind::Update => updates.push(op),
            OpKind::Delete => deletes.push(op),
        }
    }

    // Phase A: purge each owner name an update touches, once.
    let mut purge_targets: Vec<(String, String)> = Vec::new();
    let mut seen = HashSet::new();
    for op in &updates {
        let key = (op.registry.clone(), op.record.canonical_name.clone());
        if seen.insert(key.clone()) {
            purge_targets.push(key);
        }
    }

    let mut purge_errors: HashMap<(String, String), RegistryError> = HashMap::new();
    thread::scope(|s| {
        let mut handles = Vec::new();
        for (registry_name, owner) in &purge_targets {
            match registries.get(registry_name) {
                Some(registry) => {
                    let registry = Arc::clone(registry);
                    let owner = owner.as_str();
                    handles.push((
                        (registry_name.clone(), owner.to_string()),
                        s.spawn(move || registry.delete_all_for_name(owner)),
                    ));
                }
                None => {
                    purge_errors.insert(
                        (registry_name.clone(), owner.clone()),
                        RegistryError::Api(format!("no provider instance for registry {}", registry_name)),
                    );
                }
            }
        }
        for (key, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    purge_errors.insert(key, e);
                }
                Err(_) => {
                    purge_errors.insert(key, RegistryError::Api("purge thread panicked".to_string()));
                }
            }
        }
    });

    // Phase B: appends and explicit deletes, all independent.
    let callback = &callback;
    thread::scope(|s| {
        for &op in &updates {
            let key = (op.registry.clone(), op.record.canonical_name.clone());
            if let Some(err) = purge_errors.get(&key) {
                callback(Some(err), op);
                continue;
            }
            match registries.get(&op.registry) {
                Some(registry) => {
                    let registry = Arc::clone(registry);
                    s.spawn(move || {
                        let err = registry.append_record(&op.record).err();
                        callback(err.as_ref(), op);
                    });
                }
                None => {
                    let err = RegistryError::Api(format!(
                        "no provider instance for registry {}",
                        op.registry
                    ));
                    callback(Some(&err), op);
                }
            }
        }

        for &op in &deletes {
            match registries.get(&op.registry) {
                Some(registry) => {
                    let registry = Arc::clone(registry);
                    s.spawn(move || {
                        let err = registry.delete_record(&op.record).err();
                        callback(err.as_ref(), op);
                    });
                }
                None => {
                    let err = RegistryError::Api(format!(
                        "no provider instance for registry {}",
                        op.registry
                    ));
                    callback(Some(&err), op);
                }
            }
        }
    });
}

/// Release every provider constructed for a batch. Failures are logged and
/// otherwise ignored; the batch is already done.
pub fn close_all(registries: &HashMap<String, Arc<dyn Registry>>) {
    for (name, registry) in registries {
        if let Err(e) = registry.close() {
            log::warn!("Closing registry [{}] failed: {}", name, e);
        }
    }
}
