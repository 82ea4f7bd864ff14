//! Startup orchestration.
//!
//! # Responsibilities
//! - Collect supplied values, providers, modules and subsystems
//! - Validate the provider graph before anything runs
//! - Fix the provisioning order
//!
//! # Design Decisions
//! - Fail fast: graph errors surface from `build()`, not from `run()`
//! - Providers run sequentially, modules are constructed after every provider
//! - One subsystem per capability; a later one replaces an earlier one

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LifecycleConfig;
use crate::lifecycle::container::{Container, TypeKey};
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::graph::resolve_order;
use crate::lifecycle::orchestrator::Orchestrator;
use crate::lifecycle::provider::Provider;
use crate::registry::{Capability, Module};
use crate::serve::Subsystem;
use crate::BoxError;

type ModuleFn = Box<dyn FnOnce(&Container) -> Result<Arc<dyn Module>, BoxError> + Send>;

pub(crate) enum ModuleSource {
    Ready(Arc<dyn Module>),
    Deferred { name: String, build: ModuleFn },
}

/// Assembles an [`Orchestrator`].
pub struct OrchestratorBuilder {
    supplied: Container,
    providers: Vec<Provider>,
    modules: Vec<ModuleSource>,
    subsystems: BTreeMap<Capability, Box<dyn Subsystem>>,
    grace_period: Duration,
    handle_signals: bool,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        let defaults = LifecycleConfig::default();
        Self {
            supplied: Container::new(),
            providers: Vec::new(),
            modules: Vec::new(),
            subsystems: BTreeMap::new(),
            grace_period: Duration::from_secs(defaults.grace_period_secs),
            handle_signals: defaults.handle_signals,
        }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new()
            .grace_period(Duration::from_secs(config.grace_period_secs))
            .handle_signals(config.handle_signals)
    }

    /// Make an already built value available to providers and modules.
    pub fn supply<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.supplied.insert(value);
        self
    }

    pub fn provide(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(ModuleSource::Ready(module));
        self
    }

    /// Register a module built from the provisioned container.
    pub fn module_fn<F>(mut self, name: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&Container) -> Result<Arc<dyn Module>, BoxError> + Send + 'static,
    {
        self.modules.push(ModuleSource::Deferred {
            name: name.into(),
            build: Box::new(build),
        });
        self
    }

    /// Attach the subsystem that serves its capability.
    pub fn subsystem<S: Subsystem>(mut self, subsystem: S) -> Self {
        let capability = subsystem.capability();
        if self.subsystems.insert(capability, Box::new(subsystem)).is_some() {
            tracing::warn!(capability = %capability, "Replacing previously attached subsystem");
        }
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Whether SIGINT / SIGTERM end the running phase.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Validate the provider graph and fix the provisioning order.
    pub fn build(self) -> Result<Orchestrator, LifecycleError> {
        let supplied: Vec<TypeKey> = self.supplied.keys().copied().collect();
        let order = resolve_order(&self.providers, &supplied)?;

        // Reorder providers so provisioning can consume them front to back.
        let mut slots: Vec<Option<Provider>> = self.providers.into_iter().map(Some).collect();
        let providers: Vec<Provider> = order.into_iter().filter_map(|i| slots[i].take()).collect();

        tracing::debug!(
            providers = providers.len(),
            modules = self.modules.len(),
            subsystems = self.subsystems.len(),
            "Provider graph resolved"
        );

        Ok(Orchestrator::new(
            self.supplied,
            providers,
            self.modules,
            self.subsystems,
            self.grace_period,
            self.handle_signals,
        ))
    }
}
