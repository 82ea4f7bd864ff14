//! Capability tags and the contracts behind them.

use std::fmt;

use crate::registry::module::Module;
use crate::serve::cli::CommandRegistry;
use crate::serve::cron::Scheduler;
use crate::serve::http::HttpRouter;
use crate::serve::rpc::RpcRegistry;

/// A serving subsystem a module can plug into.
///
/// Variant order is the dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Http,
    Rpc,
    Cron,
    Cli,
}

impl Capability {
    /// Every capability, in dispatch order.
    pub const ALL: [Capability; 4] = [
        Capability::Http,
        Capability::Rpc,
        Capability::Cron,
        Capability::Cli,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Http => "http",
            Capability::Rpc => "rpc",
            Capability::Cron => "cron",
            Capability::Cli => "cli",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities a registered module advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// Probe a module once for every contract it implements.
    pub fn of(module: &dyn Module) -> Self {
        let mut set = Self::default();
        if module.as_http().is_some() {
            set.insert(Capability::Http);
        }
        if module.as_rpc().is_some() {
            set.insert(Capability::Rpc);
        }
        if module.as_cron().is_some() {
            set.insert(Capability::Cron);
        }
        if module.as_cli().is_some() {
            set.insert(Capability::Cli);
        }
        set
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|c| c.as_str()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// Contributes routes to the HTTP server.
pub trait ServesHttp: Send + Sync {
    fn serve_http(&self, router: &mut HttpRouter);
}

/// Contributes services to the RPC server.
pub trait ServesRpc: Send + Sync {
    fn serve_rpc(&self, registry: &mut RpcRegistry);
}

/// Contributes jobs to the cron scheduler.
pub trait ServesCron: Send + Sync {
    fn serve_cron(&self, scheduler: &mut Scheduler);
}

/// Contributes subcommands to the command line.
pub trait ServesCli: Send + Sync {
    fn serve_cli(&self, commands: &mut CommandRegistry);
}
