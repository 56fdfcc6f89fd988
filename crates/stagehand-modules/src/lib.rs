//! ---
//! sh_section: "03-module-orchestration"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Module registry, dependency resolution, and orchestration."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---

pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod topology;

pub use error::{ModuleError, Result};
pub use orchestrator::Orchestrator;
pub use registry::{Initializer, Module, ModuleRegistry};
pub use resolver::{resolve, ExecutionPlan};
pub use topology::{register_default_topology, IdleServices, ServiceFactory};
