//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Building (startup.rs):
//!     supply / provide / module / subsystem → graph.rs (order, cycles)
//!
//! Provisioning (orchestrator.rs):
//!     providers in order → container.rs (values by type)
//!                        → shutdown.rs (closers, newest last)
//!     module constructors → registry
//!
//! Dispatching:
//!     Http, Rpc, Cron, Cli → registry.dispatch → subsystem.bind
//!     a panic while binding → Running (no tasks) → Draining
//!
//! Running:
//!     one task per bound subsystem, shared cancellation token
//!     ends on: token, SIGINT/SIGTERM (signals.rs), fatal error, all done
//!
//! Draining → Stopped (shutdown.rs):
//!     cancel → grace period → abort and detach stragglers → closers in reverse
//! ```
//!
//! # Design Decisions
//! - State only moves forward (state.rs); a failed provision drains at once
//! - Shutdown has a timeout: tasks still running after the grace are abandoned
//! - SIGHUP is exposed to the caller, which decides how to reload

pub mod container;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod provider;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use container::{Container, TypeKey};
pub use error::{LifecycleError, ProvisionError, ShutdownError};
pub use orchestrator::Orchestrator;
pub use provider::{Inputs, Provided, Provider, ProviderBuilder};
pub use shutdown::ShutdownList;
pub use startup::OrchestratorBuilder;
pub use state::{LifecycleState, StateMachine};
