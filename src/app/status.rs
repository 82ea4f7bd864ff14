//! Built-in status module.
//!
//! Serves on every capability:
//! - HTTP `GET /healthz` and `GET /status`
//! - RPC `status.get`
//! - cron job `heartbeat`
//! - CLI commands `status` and `probe <client> <path>`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{routing::get, Json};
use chrono::{DateTime, Utc};
use clap::{Arg, Command};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::AppConfig;
use crate::registry::{Module, ServesCli, ServesCron, ServesHttp, ServesRpc};
use crate::resource::http_client::HttpClientFactory;
use crate::serve::rpc::RpcError;
use crate::serve::{CommandRegistry, HttpRouter, RpcRegistry, RpcService, Scheduler};

const HEARTBEAT_SCHEDULE: &str = "*/30 * * * * *";

/// Point-in-time view served by every status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusSnapshot {
    pub name: String,
    pub env: String,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub heartbeats: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct StatusState {
    name: String,
    env: String,
    started_at: DateTime<Utc>,
    heartbeats: AtomicU64,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
}

impl StatusState {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            name: self.name.clone(),
            env: self.env.clone(),
            version: env!("CARGO_PKG_VERSION"),
            started_at: self.started_at,
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            last_heartbeat: *self.last_heartbeat.lock(),
        }
    }

    fn beat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        *self.last_heartbeat.lock() = Some(Utc::now());
    }
}

/// Reports process identity and liveness.
#[derive(Debug, Clone)]
pub struct StatusModule {
    state: Arc<StatusState>,
    clients: Option<HttpClientFactory>,
}

impl StatusModule {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            state: Arc::new(StatusState {
                name: config.app.name.clone(),
                env: config.app.env.clone(),
                started_at: Utc::now(),
                heartbeats: AtomicU64::new(0),
                last_heartbeat: Mutex::new(None),
            }),
            clients: None,
        }
    }

    /// Enable the `probe` command against clients made by `clients`.
    pub fn with_clients(mut self, clients: HttpClientFactory) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.snapshot()
    }
}

impl Module for StatusModule {
    fn name(&self) -> &str {
        "status"
    }

    fn as_http(&self) -> Option<&dyn ServesHttp> {
        Some(self)
    }

    fn as_rpc(&self) -> Option<&dyn ServesRpc> {
        Some(self)
    }

    fn as_cron(&self) -> Option<&dyn ServesCron> {
        Some(self)
    }

    fn as_cli(&self) -> Option<&dyn ServesCli> {
        Some(self)
    }
}

impl ServesHttp for StatusModule {
    fn serve_http(&self, router: &mut HttpRouter) {
        let state = self.state.clone();
        router.route("/healthz", get(|| async { "ok" }));
        router.route(
            "/status",
            get(move || {
                let state = state.clone();
                async move { Json(state.snapshot()) }
            }),
        );
    }
}

impl ServesRpc for StatusModule {
    fn serve_rpc(&self, registry: &mut RpcRegistry) {
        let state = self.state.clone();
        registry.register(RpcService::new("status").method("get", move |_params| {
            let state = state.clone();
            async move { serde_json::to_value(state.snapshot()).map_err(|e| RpcError::Internal(e.to_string())) }
        }));
    }
}

impl ServesCron for StatusModule {
    fn serve_cron(&self, scheduler: &mut Scheduler) {
        let state = self.state.clone();
        scheduler.add("heartbeat", HEARTBEAT_SCHEDULE, move || {
            let state = state.clone();
            async move {
                state.beat();
                tracing::debug!(heartbeats = state.heartbeats.load(Ordering::Relaxed), "Heartbeat");
                Ok(())
            }
        });
    }
}

impl ServesCli for StatusModule {
    fn serve_cli(&self, commands: &mut CommandRegistry) {
        let state = self.state.clone();
        commands.command(
            Command::new("status").about("Print the application status as JSON"),
            move |_| {
                let state = state.clone();
                async move {
                    println!("{}", serde_json::to_string_pretty(&state.snapshot())?);
                    Ok(())
                }
            },
        );

        let clients = self.clients.clone();
        commands.command(
            Command::new("probe")
                .about("GET a path through a configured HTTP client and print the status")
                .arg(Arg::new("client").required(true))
                .arg(Arg::new("path").required(true)),
            move |matches| {
                let clients = clients.clone();
                async move {
                    let clients = clients.ok_or("no HTTP client family is provisioned")?;
                    let name = matches.get_one::<String>("client").cloned().unwrap_or_default();
                    let path = matches.get_one::<String>("path").cloned().unwrap_or_default();

                    let client = clients.make(&name).await?;
                    let response = client.get(&path)?.send().await?;
                    println!("{} {}", response.status(), response.url());
                    Ok(())
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capability, CapabilitySet};
    use serde_json::Value;

    #[test]
    fn test_serves_every_capability() {
        let module = StatusModule::new(&AppConfig::default());
        let set = CapabilitySet::of(&module);
        for capability in Capability::ALL {
            assert!(set.contains(capability));
        }
    }

    #[tokio::test]
    async fn test_rpc_and_heartbeat_share_state() {
        let module = StatusModule::new(&AppConfig::default());
        module.state.beat();

        let mut registry = RpcRegistry::new();
        module.serve_rpc(&mut registry);
        let value = registry.call("status", "get", Value::Null).await.unwrap();

        assert_eq!(value["heartbeats"], 1);
        assert_eq!(value["name"], env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn test_probe_without_clients_fails() {
        let module = StatusModule::new(&AppConfig::default());
        let mut commands = CommandRegistry::new("app");
        module.serve_cli(&mut commands);

        assert_eq!(commands.len(), 2);
        assert!(commands.execute(["probe", "default", "/"]).await.is_err());
    }
}
