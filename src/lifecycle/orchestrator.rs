//! The orchestrator drives one pass through the lifecycle.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use crate::lifecycle::container::Container;
use crate::lifecycle::error::{LifecycleError, ProvisionError};
use crate::lifecycle::provider::{Inputs, Provider};
use crate::lifecycle::shutdown::{drain_tasks, ShutdownList, TaskResult};
use crate::lifecycle::signals;
use crate::lifecycle::startup::ModuleSource;
use crate::lifecycle::state::{LifecycleState, StateMachine};
use crate::registry::{Capability, ModuleRegistry};
use crate::serve::{ServeError, Subsystem};

/// Everything that exists once provisioning succeeded.
struct Provisioned {
    container: Container,
    closers: ShutdownList,
    registry: ModuleRegistry,
}

/// Runs providers, binds modules to subsystems, serves, then drains.
///
/// Built by [`OrchestratorBuilder`](crate::lifecycle::OrchestratorBuilder).
/// Each orchestrator runs once; build a new one to start again.
pub struct Orchestrator {
    state: StateMachine,
    supplied: Container,
    providers: Vec<Provider>,
    modules: Vec<ModuleSource>,
    subsystems: BTreeMap<Capability, Box<dyn Subsystem>>,
    grace_period: Duration,
    handle_signals: bool,
}

impl Orchestrator {
    pub(crate) fn new(
        supplied: Container,
        providers: Vec<Provider>,
        modules: Vec<ModuleSource>,
        subsystems: BTreeMap<Capability, Box<dyn Subsystem>>,
        grace_period: Duration,
        handle_signals: bool,
    ) -> Self {
        Self {
            state: StateMachine::new(),
            supplied,
            providers,
            modules,
            subsystems,
            grace_period,
            handle_signals,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.current()
    }

    /// Observe every state transition.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Provision, dispatch and serve until `shutdown` is cancelled, a
    /// termination signal arrives, a subsystem fails, or every serving task
    /// has finished. Always drains before returning.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), LifecycleError> {
        let span = tracing::info_span!("lifecycle", run_id = %uuid::Uuid::new_v4());
        self.run_inner(shutdown).instrument(span).await
    }

    async fn run_inner(mut self, shutdown: CancellationToken) -> Result<(), LifecycleError> {
        let provisioned = self.provision().await?;

        self.state.advance(LifecycleState::Dispatching)?;
        let subsystems = std::mem::take(&mut self.subsystems);
        let bound = match dispatch(&provisioned.registry, subsystems) {
            Ok(bound) => bound,
            Err((capability, reason)) => {
                tracing::error!(capability = %capability, reason = %reason, "Dispatch failed, closing what was built");
                // Nothing was spawned; pass through Running to keep the walk strictly forward.
                self.state.advance(LifecycleState::Running)?;
                self.state.advance(LifecycleState::Draining)?;
                if let Err(close) = provisioned.closers.close_all().await {
                    tracing::error!(error = %close, "Cleanup after failed dispatch also failed");
                }
                self.state.advance(LifecycleState::Stopped)?;
                return Err(LifecycleError::Dispatch { capability, reason });
            }
        };

        self.state.advance(LifecycleState::Running)?;
        let token = shutdown.child_token();
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        for subsystem in bound {
            let capability = subsystem.capability();
            let serving = subsystem.serve(token.clone());
            tracing::info!(capability = %capability, "Starting subsystem");
            tasks.spawn(async move {
                let result = match AssertUnwindSafe(serving).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(ServeError::Panicked(panic_message(panic.as_ref()))),
                };
                (capability, result)
            });
        }

        let fatal = wait(&token, &mut tasks, self.handle_signals).await;

        self.state.advance(LifecycleState::Draining)?;
        token.cancel();
        let (finished, abandoned) = drain_tasks(&mut tasks, self.grace_period).await;
        for (capability, result) in finished {
            if let Err(e) = result {
                tracing::warn!(capability = %capability, error = %e, "Subsystem failed while draining");
            }
        }
        if abandoned > 0 {
            tracing::warn!(abandoned, "Some subsystems did not stop within the grace period");
        }

        let closed = provisioned.closers.close_all().await;
        drop(provisioned.container);
        self.state.advance(LifecycleState::Stopped)?;

        match (fatal, closed) {
            (Some((capability, source)), closed) => {
                if let Err(e) = closed {
                    tracing::error!(error = %e, "Shutdown also failed");
                }
                Err(LifecycleError::Serve { capability, source })
            }
            (None, Err(e)) => {
                tracing::error!(error = %e, "Shutdown finished with errors");
                Err(e.into())
            }
            (None, Ok(())) => {
                tracing::info!("Lifecycle stopped cleanly");
                Ok(())
            }
        }
    }

    /// Provision, run `f` against the container in place of serving, then drain.
    pub async fn invoke<F, Fut, R>(mut self, f: F) -> Result<R, LifecycleError>
    where
        F: FnOnce(Container) -> Fut,
        Fut: Future<Output = R>,
    {
        let provisioned = self.provision().await?;
        self.state.advance(LifecycleState::Dispatching)?;
        self.state.advance(LifecycleState::Running)?;

        let output = f(provisioned.container.clone()).await;

        self.state.advance(LifecycleState::Draining)?;
        let closed = provisioned.closers.close_all().await;
        self.state.advance(LifecycleState::Stopped)?;
        closed?;
        Ok(output)
    }

    async fn provision(&mut self) -> Result<Provisioned, LifecycleError> {
        self.state.advance(LifecycleState::Provisioning)?;

        let mut container = self.supplied.clone();
        let mut closers = ShutdownList::new();
        match self.provision_into(&mut container, &mut closers).await {
            Ok(registry) => Ok(Provisioned {
                container,
                closers,
                registry,
            }),
            Err(e) => {
                tracing::error!(error = %e, "Provisioning failed, closing what was built");
                self.state.advance(LifecycleState::Draining)?;
                if let Err(close) = closers.close_all().await {
                    tracing::error!(error = %close, "Cleanup after failed provisioning also failed");
                }
                self.state.advance(LifecycleState::Stopped)?;
                Err(e.into())
            }
        }
    }

    async fn provision_into(
        &mut self,
        container: &mut Container,
        closers: &mut ShutdownList,
    ) -> Result<ModuleRegistry, ProvisionError> {
        for provider in std::mem::take(&mut self.providers) {
            let values = provider
                .requires
                .iter()
                .chain(&provider.optional)
                .filter_map(|key| container.get_raw(key).map(|v| (*key, v)))
                .collect();
            let name = provider.name.clone();
            let inputs = Inputs::new(&name, values);

            tracing::debug!(provider = %name, "Provisioning");
            let provided = provider.run(inputs).await?;
            for (key, value) in provided.values {
                container.insert_raw(key, value);
            }
            if let Some(closer) = provided.closer {
                closers.push(name, closer);
            }
        }

        let mut registry = ModuleRegistry::new();
        for source in std::mem::take(&mut self.modules) {
            let module = match source {
                ModuleSource::Ready(module) => module,
                ModuleSource::Deferred { name, build } => {
                    build(container).map_err(|source| ProvisionError::Module { module: name, source })?
                }
            };
            registry.register(module);
        }
        tracing::info!(
            values = container.len(),
            closers = closers.len(),
            modules = registry.len(),
            "Provisioning complete"
        );
        Ok(registry)
    }
}

/// Serving phase: returns the first fatal subsystem error, if any.
async fn wait(
    token: &CancellationToken,
    tasks: &mut JoinSet<TaskResult>,
    handle_signals: bool,
) -> Option<(Capability, ServeError)> {
    let had_tasks = !tasks.is_empty();
    let terminate = signals::terminate();
    tokio::pin!(terminate);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("Shutdown requested");
                return None;
            }
            _ = &mut terminate, if handle_signals => return None,
            joined = tasks.join_next(), if !tasks.is_empty() => match joined {
                Some(Ok((capability, Ok(())))) => {
                    tracing::info!(capability = %capability, "Subsystem finished");
                }
                Some(Ok((capability, Err(e)))) => {
                    tracing::error!(capability = %capability, error = %e, "Subsystem failed");
                    return Some((capability, e));
                }
                Some(Err(e)) => tracing::error!(error = %e, "Serving task ended abnormally"),
                None => {}
            },
        }

        if had_tasks && tasks.is_empty() {
            tracing::info!("All subsystems finished");
            return None;
        }
    }
}

/// Bind each subsystem in capability order, keeping those with work to do.
///
/// A module that panics while binding fails the whole dispatch.
fn dispatch(
    registry: &ModuleRegistry,
    subsystems: BTreeMap<Capability, Box<dyn Subsystem>>,
) -> Result<Vec<Box<dyn Subsystem>>, (Capability, String)> {
    let mut bound = Vec::new();
    for (capability, mut subsystem) in subsystems {
        let binding = std::panic::catch_unwind(AssertUnwindSafe(|| {
            registry.dispatch(capability, subsystem.as_mut(), |s, module| s.bind(module))
        }));
        let count = binding.map_err(|panic| (capability, panic_message(panic.as_ref())))?;
        if count == 0 {
            tracing::debug!(capability = %capability, "No modules bound, subsystem not started");
            continue;
        }
        tracing::info!(capability = %capability, bindings = count, "Dispatched");
        bound.push(subsystem);
    }
    Ok(bound)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
