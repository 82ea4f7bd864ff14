//! Service container core: named resource factories, capability-based
//! module dispatch, and an ordered provision/serve/drain lifecycle.

pub mod app;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resource;
pub mod serve;

/// Type-erased error used at plug-in seams (constructors, closers, handlers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::schema::AppConfig;
pub use lifecycle::{LifecycleError, LifecycleState, Orchestrator, OrchestratorBuilder, Provided, Provider};
pub use registry::{Capability, Module, ModuleRegistry};
pub use resource::{Closer, Factory, Maker, Pair, ResourceError};
