//! Lifecycle state machine.

use std::fmt;

use tokio::sync::watch;

use crate::lifecycle::error::LifecycleError;
use crate::observability::metrics;

/// Where an orchestrator is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Building,
    Provisioning,
    Dispatching,
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    /// The state that normally follows this one.
    pub fn next(self) -> Option<Self> {
        match self {
            LifecycleState::Building => Some(LifecycleState::Provisioning),
            LifecycleState::Provisioning => Some(LifecycleState::Dispatching),
            LifecycleState::Dispatching => Some(LifecycleState::Running),
            LifecycleState::Running => Some(LifecycleState::Draining),
            LifecycleState::Draining => Some(LifecycleState::Stopped),
            LifecycleState::Stopped => None,
        }
    }

    /// Whether `self -> to` is allowed: one step forward, or the
    /// provisioning abort straight to draining.
    pub fn can_advance_to(self, to: Self) -> bool {
        self.next() == Some(to) || (self == LifecycleState::Provisioning && to == LifecycleState::Draining)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Building => "building",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Dispatching => "dispatching",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only state holder that observers can subscribe to.
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<LifecycleState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Building);
        Self { tx }
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Move to `to`, rejecting backward moves and skips.
    pub fn advance(&self, to: LifecycleState) -> Result<(), LifecycleError> {
        let from = self.current();
        if !from.can_advance_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        self.tx.send_replace(to);
        metrics::record_lifecycle_state(to);
        tracing::info!(from = %from, to = %to, "Lifecycle transition");
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
