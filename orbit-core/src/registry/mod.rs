//! Hierarchical adapter registry: `type -> datasource -> name ->
//! Registration`.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use orbit_core::registry::{AdapterInstance, AdapterRegistry};
//! use orbit_core::types::{AdapterConfig, AdapterType};
//! use orbit_core::error::Result;
//! use async_trait::async_trait;
//!
//! struct Noop;
//! #[async_trait]
//! impl AdapterInstance for Noop {
//!     async fn initialize(&self) -> Result<()> { Ok(()) }
//!     fn name(&self) -> &str { "noop" }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = AdapterRegistry::new();
//! let config = AdapterConfig::new("noop", AdapterType::Passthrough, "none", "conversational");
//! registry
//!     .register(config.clone(), Arc::new(|_: &AdapterConfig| -> Result<Arc<dyn AdapterInstance>> {
//!         Ok(Arc::new(Noop))
//!     }))
//!     .await
//!     .unwrap();
//! let instance = registry.create(AdapterType::Passthrough, "none", "noop", None).await.unwrap();
//! assert_eq!(instance.name(), "noop");
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{AdapterConfig, AdapterType};

/// A constructed, initialized adapter. Concrete implementations (base
/// retriever, composite retriever, passthrough) implement this so the
/// registry can hold them behind one object-safe handle.
#[async_trait]
pub trait AdapterInstance: Send + Sync {
    /// Perform any async setup (client connections, template embedding)
    /// before the instance serves requests. Called once, immediately
    /// after construction, by [`AdapterRegistry::create`].
    async fn initialize(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Builds an [`AdapterInstance`] from a (possibly config-overridden)
/// [`AdapterConfig`]. Stands in for "resolve the `implementation` path
/// and construct it" — the registry does not know how to construct
/// adapters itself, only how to look up and cache the factory that does.
pub type AdapterFactory =
    Arc<dyn Fn(&AdapterConfig) -> Result<Arc<dyn AdapterInstance>> + Send + Sync>;

struct Registration {
    config: AdapterConfig,
    factory: AdapterFactory,
}

/// `datasource -> name -> Registration`, the bottom two levels of the
/// registry's index.
type DatasourceIndex = HashMap<String, HashMap<String, Registration>>;

/// Summary of a [`AdapterRegistry::reload`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Two-level index (`type -> datasource -> name`) of adapter
/// registrations, plus a by-name cache of constructed instances. Names
/// are unique across the whole registry (an `AdapterConfig`'s identity),
/// so the instance cache and `get` stay keyed by name alone even though
/// registration lookup walks the full `type -> datasource -> name` path.
///
/// Reload semantics: replacing or removing a registration evicts it from
/// the instance cache so the next `get`/`create` builds fresh, but never
/// reaches into an in-flight caller's existing `Arc<dyn AdapterInstance>`
/// — old instances are dropped only once their last holder releases
/// them.
#[derive(Clone)]
pub struct AdapterRegistry {
    registrations: Arc<RwLock<HashMap<AdapterType, DatasourceIndex>>>,
    instances: Arc<RwLock<HashMap<String, Arc<dyn AdapterInstance>>>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: Arc::new(RwLock::new(HashMap::new())),
            instances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `config` with the factory that builds it, under
    /// `config.adapter_type -> config.datasource -> config.name`.
    /// Idempotent when the same path is registered again with the same
    /// `implementation` string; fails with
    /// [`Error::DuplicateRegistration`] when the name collides with a
    /// different implementation.
    pub async fn register(&self, config: AdapterConfig, factory: AdapterFactory) -> Result<()> {
        let mut registrations = self.registrations.write().await;
        let names = registrations
            .entry(config.adapter_type)
            .or_default()
            .entry(config.datasource.clone())
            .or_default();
        if let Some(existing) = names.get(&config.name) {
            if existing.config.implementation != config.implementation {
                return Err(Error::DuplicateRegistration(config.name.clone()));
            }
            return Ok(());
        }
        names.insert(config.name.clone(), Registration { config, factory });
        Ok(())
    }

    /// Resolve the registration at `adapter_type -> datasource -> name`,
    /// merge `override_config` (override wins on shallow key collision)
    /// into its stored config, build the instance via the registered
    /// factory, run `initialize()`, and cache it under `name`. Returns
    /// the cached instance on repeat calls without reconstructing.
    pub async fn create(
        &self,
        adapter_type: AdapterType,
        datasource: &str,
        name: &str,
        override_config: Option<HashMap<String, Value>>,
    ) -> Result<Arc<dyn AdapterInstance>> {
        if let Some(instance) = self.instances.read().await.get(name) {
            return Ok(Arc::clone(instance));
        }

        let (mut config, factory) = {
            let registrations = self.registrations.read().await;
            let reg = registrations
                .get(&adapter_type)
                .and_then(|datasources| datasources.get(datasource))
                .and_then(|names| names.get(name))
                .ok_or_else(|| Error::UnknownAdapter(name.to_string()))?;
            (reg.config.clone(), Arc::clone(&reg.factory))
        };

        if let Some(overrides) = override_config {
            for (key, value) in overrides {
                config.config.insert(key, value);
            }
        }

        let instance = factory(&config)?;
        instance.initialize().await?;

        let mut instances = self.instances.write().await;
        instances.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    /// Return the cached instance for `name`, failing with
    /// [`Error::UnknownAdapter`] if it has not been [`Self::create`]d.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn AdapterInstance>> {
        self.instances
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAdapter(name.to_string()))
    }

    /// Diff `new_configs` against the current registrations by
    /// `type -> datasource -> name` path and implementation. Added/
    /// updated/removed names have their cached instance evicted so the
    /// next `create` rebuilds; unchanged names are left untouched. Does
    /// not cancel in-flight callers holding an already-cloned `Arc` to an
    /// evicted instance.
    pub async fn reload(
        &self,
        new_configs: Vec<(AdapterConfig, AdapterFactory)>,
    ) -> ReloadSummary {
        let mut summary = ReloadSummary::default();
        let mut registrations = self.registrations.write().await;
        let mut instances = self.instances.write().await;

        let new_paths: HashSet<(AdapterType, String, String)> = new_configs
            .iter()
            .map(|(c, _)| (c.adapter_type, c.datasource.clone(), c.name.clone()))
            .collect();

        for (adapter_type, datasources) in &mut registrations {
            for (datasource, names) in datasources.iter_mut() {
                let stale: Vec<String> = names
                    .keys()
                    .filter(|name| {
                        !new_paths.contains(&(*adapter_type, datasource.clone(), (*name).clone()))
                    })
                    .cloned()
                    .collect();
                for name in stale {
                    names.remove(&name);
                    instances.remove(&name);
                    summary.removed += 1;
                }
            }
        }

        for (config, factory) in new_configs {
            let names = registrations
                .entry(config.adapter_type)
                .or_default()
                .entry(config.datasource.clone())
                .or_default();
            match names.get(&config.name) {
                None => {
                    let name = config.name.clone();
                    names.insert(name, Registration { config, factory });
                    summary.added += 1;
                }
                Some(existing) if existing.config.implementation == config.implementation => {
                    summary.unchanged += 1;
                }
                Some(_) => {
                    instances.remove(&config.name);
                    let name = config.name.clone();
                    names.insert(name, Registration { config, factory });
                    summary.updated += 1;
                }
            }
        }

        summary
    }
}
