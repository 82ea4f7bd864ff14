//! Dependency providers.
//!
//! A provider declares the types it needs and the types it produces, then
//! builds them from an [`Inputs`] view of the container. Anything that must
//! be released at shutdown comes back as a [`Closer`] alongside the values.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::lifecycle::container::{TypeKey, Value};
use crate::lifecycle::error::ProvisionError;
use crate::observability::metrics;
use crate::resource::Closer;
use crate::BoxError;

type BuildFn = Box<dyn FnOnce(Inputs) -> BoxFuture<'static, Result<Provided, BoxError>> + Send>;

/// Values a provider is allowed to read.
pub struct Inputs {
    provider: String,
    values: Vec<(TypeKey, Value)>,
}

impl Inputs {
    pub(crate) fn new(provider: &str, values: Vec<(TypeKey, Value)>) -> Self {
        Self {
            provider: provider.to_string(),
            values,
        }
    }

    fn find<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let key = TypeKey::of::<T>();
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.clone().downcast::<T>().ok())
    }

    /// A declared required input.
    pub fn required<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ProvisionError> {
        self.find::<T>().ok_or_else(|| ProvisionError::MissingDependency {
            provider: self.provider.clone(),
            dependency: std::any::type_name::<T>(),
        })
    }

    /// A declared optional input, `None` when nothing provides it.
    pub fn optional<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.find::<T>()
    }
}

/// What a provider hands back.
#[derive(Default)]
pub struct Provided {
    pub(crate) values: Vec<(TypeKey, Value)>,
    pub(crate) closer: Option<Closer>,
}

impl Provided {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.values.push((TypeKey::of::<T>(), Arc::new(value)));
        self
    }

    /// Register cleanup to run when the orchestrator drains.
    pub fn closer(mut self, closer: Closer) -> Self {
        self.closer = Some(closer);
        self
    }
}

/// A named provisioning step.
pub struct Provider {
    pub(crate) name: String,
    pub(crate) requires: Vec<TypeKey>,
    pub(crate) optional: Vec<TypeKey>,
    pub(crate) provides: Vec<TypeKey>,
    pub(crate) build: BuildFn,
}

impl Provider {
    pub fn new(name: impl Into<String>) -> ProviderBuilder {
        ProviderBuilder {
            name: name.into(),
            requires: Vec::new(),
            optional: Vec::new(),
            provides: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provides(&self) -> &[TypeKey] {
        &self.provides
    }

    pub(crate) async fn run(self, inputs: Inputs) -> Result<Provided, ProvisionError> {
        let Provider { name, provides, build, .. } = self;
        let provided = build(inputs)
            .await
            .map_err(|source| ProvisionError::StepFailed {
                provider: name.clone(),
                source,
            })?;

        if let Err(e) = check_outputs(&name, &provides, &provided) {
            // The step built something before its outputs were rejected.
            if let Some(closer) = provided.closer {
                if let Err(close) = closer.close().await {
                    tracing::warn!(provider = %name, error = %close, "Closer failed after rejected outputs");
                    metrics::record_closer_failure();
                }
            }
            return Err(e);
        }
        Ok(provided)
    }
}

/// Every output must be declared and every declared output produced.
fn check_outputs(name: &str, provides: &[TypeKey], provided: &Provided) -> Result<(), ProvisionError> {
    if let Some((key, _)) = provided.values.iter().find(|(k, _)| !provides.contains(k)) {
        return Err(ProvisionError::UndeclaredOutput {
            provider: name.to_string(),
            output: key.name(),
        });
    }
    if let Some(key) = provides
        .iter()
        .find(|k| !provided.values.iter().any(|(v, _)| v == *k))
    {
        return Err(ProvisionError::MissingOutput {
            provider: name.to_string(),
            output: key.name(),
        });
    }
    Ok(())
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("requires", &self.requires)
            .field("optional", &self.optional)
            .field("provides", &self.provides)
            .finish()
    }
}

/// Declares a provider's inputs and outputs.
pub struct ProviderBuilder {
    name: String,
    requires: Vec<TypeKey>,
    optional: Vec<TypeKey>,
    provides: Vec<TypeKey>,
}

impl ProviderBuilder {
    pub fn requires<T: 'static>(mut self) -> Self {
        self.requires.push(TypeKey::of::<T>());
        self
    }

    pub fn optional<T: 'static>(mut self) -> Self {
        self.optional.push(TypeKey::of::<T>());
        self
    }

    pub fn provides<T: 'static>(mut self) -> Self {
        self.provides.push(TypeKey::of::<T>());
        self
    }

    pub fn build<F, Fut>(self, f: F) -> Provider
    where
        F: FnOnce(Inputs) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Provided, BoxError>> + Send + 'static,
    {
        Provider {
            name: self.name,
            requires: self.requires,
            optional: self.optional,
            provides: self.provides,
            build: Box::new(move |inputs| Box::pin(f(inputs)) as BoxFuture<'static, _>),
        }
    }
}
