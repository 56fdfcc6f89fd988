//! ---
//! sh_section: "03-module-orchestration"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Default module topology of a Stagehand deployment."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::sync::Arc;

use stagehand_services::{IdleService, SharedService};

use crate::error::Result;
use crate::orchestrator::Orchestrator;

pub const ALL: &str = "all";
pub const CERT_GENERATOR: &str = "cert-generator";
pub const HTTP_SERVER: &str = "http-server";
pub const KINE: &str = "kine";
pub const KUBERNETES_API_SERVER: &str = "kubernetes-apiserver";
pub const KUBERNETES_CLIENTSET: &str = "kubernetes-clientset";
pub const KUBERNETES_CRDS: &str = "kubernetes-crds";
pub const KUBERNETES_INFORMERS: &str = "kubernetes-informers";
pub const KUBERNETES: &str = "kubernetes";
pub const PUBLIC_DASHBOARD_WEBHOOKS: &str = "public-dashboard-webhooks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Visible,
    Invisible,
    Grouping,
}

struct Entry {
    name: &'static str,
    kind: Kind,
    dependencies: &'static [&'static str],
}

const TOPOLOGY: &[Entry] = &[
    Entry {
        name: HTTP_SERVER,
        kind: Kind::Invisible,
        dependencies: &[CERT_GENERATOR],
    },
    Entry {
        name: CERT_GENERATOR,
        kind: Kind::Visible,
        dependencies: &[],
    },
    Entry {
        name: KINE,
        kind: Kind::Visible,
        dependencies: &[],
    },
    Entry {
        name: KUBERNETES_API_SERVER,
        kind: Kind::Visible,
        dependencies: &[CERT_GENERATOR, KINE],
    },
    Entry {
        name: KUBERNETES_CLIENTSET,
        kind: Kind::Visible,
        dependencies: &[KUBERNETES_API_SERVER],
    },
    Entry {
        name: KUBERNETES_CRDS,
        kind: Kind::Visible,
        dependencies: &[KUBERNETES_CLIENTSET],
    },
    Entry {
        name: KUBERNETES_INFORMERS,
        kind: Kind::Visible,
        dependencies: &[KUBERNETES_CRDS],
    },
    Entry {
        name: PUBLIC_DASHBOARD_WEBHOOKS,
        kind: Kind::Visible,
        dependencies: &[KUBERNETES_CLIENTSET],
    },
    Entry {
        name: KUBERNETES,
        kind: Kind::Grouping,
        dependencies: &[KUBERNETES_INFORMERS],
    },
    Entry {
        name: ALL,
        kind: Kind::Grouping,
        dependencies: &[HTTP_SERVER, KUBERNETES, PUBLIC_DASHBOARD_WEBHOOKS],
    },
];

/// Supplies the service behind each service-bearing module of the default topology.
///
/// `build` is called at most once per module, in dependency order.
pub trait ServiceFactory: Send + Sync + 'static {
    fn build(&self, module: &str) -> anyhow::Result<Option<SharedService>>;
}

/// Factory producing an [`IdleService`] for every module.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleServices;

impl ServiceFactory for IdleServices {
    fn build(&self, module: &str) -> anyhow::Result<Option<SharedService>> {
        Ok(Some(Arc::new(IdleService::idle(module))))
    }
}

/// Register every module of the default topology, then its dependency edges.
pub fn register_default_topology(
    orchestrator: &mut Orchestrator,
    factory: Arc<dyn ServiceFactory>,
) -> Result<()> {
    for entry in TOPOLOGY {
        let name = entry.name;
        let factory = factory.clone();
        let initializer = move || factory.build(name);
        match entry.kind {
            Kind::Visible => orchestrator.register_module(name, initializer)?,
            Kind::Invisible => orchestrator.register_invisible_module(name, initializer)?,
            Kind::Grouping => orchestrator.register_grouping_module(name)?,
        }
    }
    for entry in TOPOLOGY {
        orchestrator.add_dependency(entry.name, entry.dependencies.iter().copied())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_orchestrator(targets: &[&str]) -> Orchestrator {
        let mut orchestrator = Orchestrator::new(targets.iter().copied());
        register_default_topology(&mut orchestrator, Arc::new(IdleServices)).unwrap();
        orchestrator
    }

    #[test]
    fn all_pulls_in_every_module() {
        let orchestrator = default_orchestrator(&[ALL]);
        let plan = orchestrator.plan().unwrap();
        assert_eq!(plan.len(), TOPOLOGY.len());
        assert_eq!(
            plan.modules(),
            [
                CERT_GENERATOR,
                HTTP_SERVER,
                KINE,
                KUBERNETES_API_SERVER,
                KUBERNETES_CLIENTSET,
                KUBERNETES_CRDS,
                KUBERNETES_INFORMERS,
                KUBERNETES,
                PUBLIC_DASHBOARD_WEBHOOKS,
                ALL,
            ]
        );
    }

    #[test]
    fn http_server_is_not_selectable() {
        let orchestrator = default_orchestrator(&[HTTP_SERVER]);
        assert!(orchestrator.plan().is_err());
        let visible: Vec<&str> = orchestrator
            .registry()
            .visible_modules()
            .map(|module| module.name())
            .collect();
        assert!(!visible.contains(&HTTP_SERVER));
        assert!(visible.contains(&ALL));
        assert!(visible.contains(&KUBERNETES));
    }

    #[test]
    fn kine_alone_has_no_dependencies() {
        let mut orchestrator = default_orchestrator(&[KINE]);
        orchestrator.init().unwrap();
        let services: Vec<&String> = orchestrator.services().unwrap().keys().collect();
        assert_eq!(services, [KINE]);
    }
}
