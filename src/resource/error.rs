//! Resource error types.

use thiserror::Error;

use crate::BoxError;

/// Errors returned by [`Factory::make`](crate::resource::Factory::make).
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The requested key has no entry in the per-key configuration.
    #[error("{family} configuration {key:?} not found")]
    Configuration { family: String, key: String },

    /// The constructor ran and failed.
    #[error("failed to construct {family} resource {key:?}: {source}")]
    Construction {
        family: String,
        key: String,
        #[source]
        source: BoxError,
    },

    /// The factory has already been closed.
    #[error("{family} factory is closed, refusing to make {key:?}")]
    Closed { family: String, key: String },
}

impl ResourceError {
    /// The key the failed `make` call asked for.
    pub fn key(&self) -> &str {
        match self {
            ResourceError::Configuration { key, .. }
            | ResourceError::Construction { key, .. }
            | ResourceError::Closed { key, .. } => key,
        }
    }

    /// Whether the key was simply missing from configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ResourceError::Configuration { .. })
    }
}

/// One closer that failed.
#[derive(Debug, Error)]
#[error("{name}: {source}")]
pub struct CloseFailure {
    /// Resource key or provider name the closer belonged to.
    pub name: String,
    #[source]
    pub source: BoxError,
}

/// Aggregate error from [`Factory::close`](crate::resource::Factory::close).
#[derive(Debug, Error)]
#[error("failed to close {} {family} resource(s): {}", failures.len(), summarize(failures))]
pub struct CloseError {
    pub family: String,
    pub failures: Vec<CloseFailure>,
}

impl CloseError {
    /// Keys whose closers failed, in the order they ran.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.name.as_str())
    }
}

pub(crate) fn summarize(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}]", f))
        .collect::<Vec<_>>()
        .join(", ")
}
