//! ---
//! sh_section: "03-module-orchestration"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Composition root turning requested targets into a supervised service set."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
//! The orchestrator goes through `register -> init -> run -> shutdown`.
//!
//! `init` validates the requested targets, resolves the execution plan, and calls the
//! initializer of every planned module in plan order on the calling thread. The first
//! initializer error aborts before anything has been started. `run` hands the resulting
//! service set to a [`ServiceManager`].

use std::sync::Arc;

use indexmap::IndexMap;
use stagehand_metrics::ServiceMetrics;
use stagehand_services::{Service, ServiceManager, SharedService, State};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ModuleError, Result};
use crate::registry::ModuleRegistry;
use crate::resolver::{resolve, ExecutionPlan};

/// Owns the module registry and, once initialized, the supervised service set.
#[derive(Debug)]
pub struct Orchestrator {
    targets: Vec<String>,
    registry: ModuleRegistry,
    metrics: Option<ServiceMetrics>,
    manager: Option<Arc<ServiceManager>>,
}

impl Orchestrator {
    /// Create an orchestrator for the requested target modules.
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            registry: ModuleRegistry::new(),
            metrics: None,
            manager: None,
        }
    }

    /// Report lifecycle metrics of the supervised services into `metrics`.
    pub fn with_metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Register a module that may be requested as a target.
    pub fn register_module<F>(&mut self, name: &str, initializer: F) -> Result<()>
    where
        F: Fn() -> anyhow::Result<Option<SharedService>> + Send + Sync + 'static,
    {
        self.registry
            .register(name, Some(Box::new(initializer)), true, Vec::<String>::new())
    }

    /// Register a module that only exists to satisfy other modules' dependencies.
    pub fn register_invisible_module<F>(&mut self, name: &str, initializer: F) -> Result<()>
    where
        F: Fn() -> anyhow::Result<Option<SharedService>> + Send + Sync + 'static,
    {
        self.registry
            .register(name, Some(Box::new(initializer)), false, Vec::<String>::new())
    }

    /// Register a visible module without a service of its own, such as `all`.
    pub fn register_grouping_module(&mut self, name: &str) -> Result<()> {
        self.registry
            .register(name, None, true, Vec::<String>::new())
    }

    pub fn add_dependency<I, S>(&mut self, name: &str, dependencies: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.add_dependency(name, dependencies)
    }

    /// Whether `name` was explicitly requested. Modules pulled in as dependencies, or
    /// through a grouping module, do not count.
    pub fn is_module_enabled(&self, name: &str) -> bool {
        self.targets.iter().any(|target| target == name)
    }

    /// Validate the targets and resolve their execution plan without initializing.
    pub fn plan(&self) -> Result<ExecutionPlan> {
        for target in &self.targets {
            match self.registry.lookup(target) {
                None => {
                    return Err(ModuleError::UnknownTarget {
                        target: target.clone(),
                    })
                }
                Some(module) if !module.is_visible() => {
                    return Err(ModuleError::NotSelectable {
                        target: target.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        resolve(&self.registry, self.targets.as_slice())
    }

    /// Build the service set. May only be called once.
    pub fn init(&mut self) -> Result<()> {
        if self.manager.is_some() {
            return Err(ModuleError::AlreadyInitialized);
        }

        let plan = self.plan()?;
        let mut services: IndexMap<String, SharedService> = IndexMap::with_capacity(plan.len());
        for name in &plan {
            let Some(module) = self.registry.lookup(name) else {
                continue;
            };
            if module.is_grouping() {
                debug!(module = %name, "grouping module has no service");
                continue;
            }
            let service = module
                .initialize()
                .map_err(|source| ModuleError::Initialization {
                    module: name.clone(),
                    source,
                })?;
            match service {
                Some(service) => {
                    debug!(module = %name, service = %service.name(), "module initialized");
                    services.insert(name.clone(), service);
                }
                None => debug!(module = %name, "module initialized without a service"),
            }
        }

        info!(
            targets = ?self.targets,
            plan = ?plan.modules(),
            services = services.len(),
            "modules initialized"
        );

        let mut manager = ServiceManager::new(services);
        if let Some(metrics) = &self.metrics {
            manager = manager.with_metrics(metrics.clone());
        }
        self.manager = Some(Arc::new(manager));
        Ok(())
    }

    /// The supervisor built by [`Orchestrator::init`].
    pub fn manager(&self) -> Option<&Arc<ServiceManager>> {
        self.manager.as_ref()
    }

    /// Services built by [`Orchestrator::init`], keyed by module name.
    pub fn services(&self) -> Option<&IndexMap<String, SharedService>> {
        self.manager.as_deref().map(ServiceManager::services)
    }

    /// Supervise the service set until `token` is cancelled or a service fails.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let manager = self.manager.as_ref().ok_or(ModuleError::NotInitialized)?;
        manager.run(token).await?;
        Ok(())
    }

    /// Stop every service and wait for all of them. A no-op before `init`.
    pub async fn shutdown(&self) {
        let Some(manager) = &self.manager else {
            debug!("no modules initialized, nothing to stop");
            return;
        };
        if manager.is_empty() {
            debug!("no services registered, nothing to stop");
            return;
        }
        info!("awaiting services to be stopped");
        manager.shutdown().await;
        let failed = manager
            .services_by_state()
            .swap_remove(&State::Failed)
            .unwrap_or_default();
        if !failed.is_empty() {
            warn!(services = ?failed, "some services ended in failure");
        }
    }
}
