//! Application assembly.
//!
//! Turns a validated [`AppConfig`] into an [`OrchestratorBuilder`] with the
//! bundled providers, the built-in modules, and the subsystems the chosen
//! [`Mode`] needs.

pub mod status;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::lifecycle::OrchestratorBuilder;
use crate::registry::Module;
use crate::resource::http_client::{self, HttpClientFactory};
use crate::serve::{CliSubsystem, CronSubsystem, HttpSubsystem, RpcSubsystem};

pub use status::{StatusModule, StatusSnapshot};

/// What the process is started to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Serve HTTP, RPC and cron until shut down.
    Serve,
    /// Run one module command and exit.
    Command(Vec<String>),
}

/// Assemble the standard application for `config`.
pub fn build(config: &AppConfig, mode: Mode) -> OrchestratorBuilder {
    let builder = OrchestratorBuilder::from_config(&config.lifecycle)
        .supply(config.clone())
        .provide(http_client::provider())
        .module_fn("status", |container| {
            let config = container.require::<AppConfig>()?;
            let mut module = StatusModule::new(&config);
            if let Some(clients) = container.get::<HttpClientFactory>() {
                module = module.with_clients((*clients).clone());
            }
            Ok(Arc::new(module) as Arc<dyn Module>)
        });

    match mode {
        Mode::Serve => {
            let builder = builder
                .subsystem(HttpSubsystem::from_config(&config.http))
                .subsystem(RpcSubsystem::from_config(&config.rpc));
            if config.cron.enabled {
                builder.subsystem(CronSubsystem::new())
            } else {
                builder
            }
        }
        Mode::Command(args) => builder.subsystem(CliSubsystem::new(config.app.name.clone(), args)),
    }
}
