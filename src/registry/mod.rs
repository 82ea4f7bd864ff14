//! Module registry subsystem.
//!
//! # Data Flow
//! ```text
//! register(module)
//!     → module.rs (as_http / as_rpc / as_cron / as_cli probed once)
//!     → capability.rs (CapabilitySet stored beside the module)
//!
//! dispatch(capability, handle, binder)
//!     → dispatch.rs (lookup in the stored set, registration order)
//!     → binder(handle, module) for every match
//! ```
//!
//! # Design Decisions
//! - Capability checks happen at registration, dispatch is a tag lookup
//! - Modules without capabilities are kept but never bound
//! - Within a capability, registration order is dispatch order

pub mod capability;
pub mod dispatch;
pub mod module;

pub use capability::{Capability, CapabilitySet, ServesCli, ServesCron, ServesHttp, ServesRpc};
pub use dispatch::ModuleRegistry;
pub use module::Module;
