//! The module contract.

use crate::registry::capability::{ServesCli, ServesCron, ServesHttp, ServesRpc};

/// An opaque unit of application logic.
///
/// A module opts into a capability by overriding the matching `as_*`
/// accessor to return itself:
///
/// ```rust,ignore
/// impl Module for Orders {
///     fn name(&self) -> &str { "orders" }
///     fn as_http(&self) -> Option<&dyn ServesHttp> { Some(self) }
/// }
/// ```
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn as_http(&self) -> Option<&dyn ServesHttp> {
        None
    }

    fn as_rpc(&self) -> Option<&dyn ServesRpc> {
        None
    }

    fn as_cron(&self) -> Option<&dyn ServesCron> {
        None
    }

    fn as_cli(&self) -> Option<&dyn ServesCli> {
        None
    }
}
