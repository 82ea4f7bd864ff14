//! Serving subsystems.
//!
//! # Data Flow
//! ```text
//! Dispatching:
//!     ModuleRegistry::dispatch(capability, subsystem, bind)
//!     → subsystem collects routes / services / jobs / commands
//!
//! Running:
//!     subsystem.serve(shutdown) on its own task
//!     → http.rs  (axum listener)
//!     → rpc.rs   (JSON services on their own listener)
//!     → cron.rs  (scheduler loop)
//!     → cli.rs   (runs one command, then finishes)
//! ```
//!
//! # Design Decisions
//! - Each subsystem owns its external handle; modules only ever see `&mut`
//! - A subsystem with no bindings is never started
//! - Every serve loop exits when the shared token is cancelled

pub mod cli;
pub mod cron;
pub mod http;
pub mod rpc;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::registry::{Capability, Module};
use crate::BoxError;

pub use cli::{CliSubsystem, CommandRegistry};
pub use cron::{CronSubsystem, Scheduler};
pub use http::{HttpRouter, HttpSubsystem};
pub use rpc::{RpcRegistry, RpcService, RpcSubsystem};

/// Errors that stop a serving subsystem.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Could not bind the configured address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cron job was registered with an unparseable expression.
    #[error("invalid schedule for job {job:?}: {reason}")]
    Schedule { job: String, reason: String },

    /// Command-line arguments did not match any command.
    #[error("invalid command line: {0}")]
    Usage(String),

    /// A command handler failed.
    #[error("command {command:?} failed: {source}")]
    Command {
        command: String,
        #[source]
        source: BoxError,
    },

    /// The serving task panicked.
    #[error("serving task panicked: {0}")]
    Panicked(String),
}

/// A serving subsystem bound to one capability.
pub trait Subsystem: Send + 'static {
    fn capability(&self) -> Capability;

    /// Let `module` contribute to this subsystem's external handle.
    fn bind(&mut self, module: &dyn Module);

    /// Number of modules bound so far.
    fn bindings(&self) -> usize;

    /// Serve until `shutdown` is cancelled or the work is done.
    fn serve(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, Result<(), ServeError>>;
}

/// Where a network subsystem listens.
#[derive(Debug)]
pub enum Listen {
    /// Bind this address when serving starts.
    Address(String),
    /// Use an already bound listener.
    Bound(TcpListener),
}

impl Listen {
    pub(crate) async fn into_listener(self) -> Result<TcpListener, ServeError> {
        match self {
            Listen::Address(address) => TcpListener::bind(&address)
                .await
                .map_err(|source| ServeError::Bind { address, source }),
            Listen::Bound(listener) => Ok(listener),
        }
    }
}

impl From<String> for Listen {
    fn from(address: String) -> Self {
        Listen::Address(address)
    }
}

impl From<&str> for Listen {
    fn from(address: &str) -> Self {
        Listen::Address(address.to_string())
    }
}

impl From<TcpListener> for Listen {
    fn from(listener: TcpListener) -> Self {
        Listen::Bound(listener)
    }
}
