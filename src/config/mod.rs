//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → supplied to the orchestrator
//!
//! On change:
//!     watcher.rs detects a new fingerprint
//!     → callback cancels the running orchestrator
//!     → binary reloads and builds a fresh one
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a full restart pass
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    AppConfig, AppSection, CronConfig, HttpConfig, LifecycleConfig, LogFormat, ObservabilityConfig, RpcConfig,
    WatchConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{FileWatcher, WatchOutcome};
