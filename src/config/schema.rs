//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every section has defaults so an empty file is a valid configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::resource::http_client::HttpClientOptions;

/// Root configuration for a servekit application.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,

    /// HTTP subsystem listener.
    pub http: HttpConfig,

    /// RPC subsystem listener.
    pub rpc: RpcConfig,

    pub cron: CronConfig,

    /// Grace period and signal handling.
    pub lifecycle: LifecycleConfig,

    /// Config file watching for reload.
    pub watch: WatchConfig,

    pub observability: ObservabilityConfig,

    /// Per-name options for the bundled HTTP client family.
    pub http_clients: HashMap<String, HttpClientOptions>,
}

impl AppConfig {
    /// The default configuration rendered as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&AppConfig::default())
    }
}

/// Application identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,

    /// Deployment environment (e.g., "dev", "prod").
    pub env: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            env: "dev".to_string(),
        }
    }
}

/// HTTP subsystem configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// RPC subsystem configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    pub bind_address: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8081".to_string(),
        }
    }
}

/// Cron subsystem configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CronConfig {
    pub enabled: bool,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long serving tasks get to stop before they are abandoned.
    pub grace_period_secs: u64,

    /// Whether SIGINT / SIGTERM trigger shutdown.
    pub handle_signals: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30,
            handle_signals: true,
        }
    }
}

/// Config file watching.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Restart with the new configuration when the file changes.
    pub enabled: bool,

    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_ms: 1000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.http.bind_address, "0.0.0.0:8080");
        assert_eq!(config.lifecycle.grace_period_secs, 30);
        assert!(config.http_clients.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [observability]
            log_format = "json"

            [http_clients.billing]
            base_url = "http://billing.internal"
            timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
        let billing = &config.http_clients["billing"];
        assert_eq!(billing.base_url.as_deref(), Some("http://billing.internal"));
        assert_eq!(billing.timeout_ms, 500);
    }

    #[test]
    fn test_default_toml_round_trips() {
        let rendered = AppConfig::default_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.rpc.bind_address, AppConfig::default().rpc.bind_address);
    }
}
