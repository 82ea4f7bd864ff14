//! Lifecycle error types.

use thiserror::Error;

use crate::lifecycle::state::LifecycleState;
use crate::registry::Capability;
use crate::resource::error::{summarize, CloseFailure};
use crate::serve::ServeError;
use crate::BoxError;

/// Errors raised while building or provisioning dependencies.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required input has no provider and was not supplied.
    #[error("provider {provider:?} requires {dependency}, which nothing provides")]
    MissingDependency {
        provider: String,
        dependency: &'static str,
    },

    /// Two providers declare the same output type.
    #[error("{dependency} is provided by both {first:?} and {second:?}")]
    DuplicateProvider {
        dependency: &'static str,
        first: String,
        second: String,
    },

    /// Providers depend on each other in a loop.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// A provider ran and failed.
    #[error("provider {provider:?} failed: {source}")]
    StepFailed {
        provider: String,
        #[source]
        source: BoxError,
    },

    /// A provider finished without producing a declared output.
    #[error("provider {provider:?} did not produce declared output {output}")]
    MissingOutput {
        provider: String,
        output: &'static str,
    },

    /// A provider produced an output it never declared.
    #[error("provider {provider:?} produced undeclared output {output}")]
    UndeclaredOutput {
        provider: String,
        output: &'static str,
    },

    /// A module constructor failed.
    #[error("module {module:?} could not be constructed: {source}")]
    Module {
        module: String,
        #[source]
        source: BoxError,
    },
}

/// Aggregate of every closer that failed while draining.
#[derive(Debug, Error)]
#[error("{} closer(s) failed during shutdown: {}", failures.len(), summarize(failures))]
pub struct ShutdownError {
    pub failures: Vec<CloseFailure>,
}

/// Errors reported by [`Orchestrator`](crate::lifecycle::Orchestrator).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Startup was aborted; everything provisioned so far has been closed.
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),

    /// A state transition that would move backwards or skip a state.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// A module panicked while binding to a subsystem; provisioned
    /// resources have been closed.
    #[error("{capability} dispatch failed: {reason}")]
    Dispatch { capability: Capability, reason: String },

    /// A serving subsystem failed while running.
    #[error("{capability} subsystem failed: {source}")]
    Serve {
        capability: Capability,
        #[source]
        source: ServeError,
    },

    /// One or more closers failed while draining.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}
