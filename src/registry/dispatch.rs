//! Ordered module registry and capability dispatch.

use std::sync::Arc;

use crate::registry::capability::{Capability, CapabilitySet};
use crate::registry::module::Module;

struct Registered {
    module: Arc<dyn Module>,
    capabilities: CapabilitySet,
}

/// Holds modules in registration order and hands them to subsystems.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Registered>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module. Its capabilities are probed once, here.
    pub fn register(&mut self, module: Arc<dyn Module>) -> CapabilitySet {
        let capabilities = CapabilitySet::of(module.as_ref());
        tracing::debug!(module = module.name(), capabilities = %capabilities, "Module registered");
        self.modules.push(Registered {
            module,
            capabilities,
        });
        capabilities
    }

    /// Call `binder(handle, module)` once for every module advertising
    /// `capability`, in registration order.
    ///
    /// Returns the number of bindings made.
    pub fn dispatch<H, F>(&self, capability: Capability, handle: &mut H, mut binder: F) -> usize
    where
        H: ?Sized,
        F: FnMut(&mut H, &dyn Module),
    {
        let mut bound = 0;
        for entry in &self.modules {
            if !entry.capabilities.contains(capability) {
                continue;
            }
            binder(handle, entry.module.as_ref());
            bound += 1;
        }
        bound
    }

    /// Capabilities advertised by at least one module.
    pub fn capabilities(&self) -> CapabilitySet {
        let mut all = CapabilitySet::default();
        for entry in &self.modules {
            for capability in entry.capabilities.iter() {
                all.insert(capability);
            }
        }
        all
    }

    /// Module names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|e| e.module.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::capability::{ServesCron, ServesHttp};
    use crate::serve::cron::Scheduler;
    use crate::serve::http::HttpRouter;

    struct Both(&'static str);

    impl Module for Both {
        fn name(&self) -> &str {
            self.0
        }
        fn as_http(&self) -> Option<&dyn ServesHttp> {
            Some(self)
        }
        fn as_cron(&self) -> Option<&dyn ServesCron> {
            Some(self)
        }
    }

    impl ServesHttp for Both {
        fn serve_http(&self, _router: &mut HttpRouter) {}
    }

    impl ServesCron for Both {
        fn serve_cron(&self, _scheduler: &mut Scheduler) {}
    }

    struct Inert;

    impl Module for Inert {
        fn name(&self) -> &str {
            "inert"
        }
    }

    #[test]
    fn test_dispatch_completeness() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(Inert));
        registry.register(Arc::new(Both("both")));

        let mut seen: Vec<(Capability, String)> = Vec::new();
        for capability in Capability::ALL {
            registry.dispatch(capability, &mut seen, |seen, module| {
                seen.push((capability, module.name().to_string()));
            });
        }

        assert_eq!(
            seen,
            vec![
                (Capability::Http, "both".to_string()),
                (Capability::Cron, "both".to_string()),
            ]
        );
        assert!(seen.iter().all(|(_, name)| name != "inert"));
    }

    #[test]
    fn test_dispatch_preserves_registration_order() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(Both("first")));
        registry.register(Arc::new(Both("second")));
        registry.register(Arc::new(Both("third")));

        let mut order = Vec::new();
        let bound = registry.dispatch(Capability::Http, &mut order, |order, module| {
            order.push(module.name().to_string());
        });

        assert_eq!(bound, 3);
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_dispatch_is_repeatable() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(Both("only")));

        let mut calls = 0usize;
        registry.dispatch(Capability::Cron, &mut calls, |calls, _| *calls += 1);
        registry.dispatch(Capability::Cron, &mut calls, |calls, _| *calls += 1);

        assert_eq!(calls, 2);
        assert_eq!(registry.dispatch(Capability::Rpc, &mut calls, |_, _| {}), 0);
    }

    #[test]
    fn test_capabilities_union() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.capabilities().is_empty());
        assert_eq!(registry.register(Arc::new(Inert)), CapabilitySet::default());
        registry.register(Arc::new(Both("both")));

        let caps = registry.capabilities();
        assert!(caps.contains(Capability::Http));
        assert!(caps.contains(Capability::Cron));
        assert!(!caps.contains(Capability::Cli));
        assert_eq!(registry.names(), vec!["inert", "both"]);
    }
}
