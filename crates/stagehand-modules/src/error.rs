//! ---
//! sh_section: "03-module-orchestration"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Configuration, construction, and supervision errors of the orchestrator."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use stagehand_services::SupervisorError;
use thiserror::Error;

/// Result alias used by the module crate.
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Errors raised while registering, resolving, constructing, or running modules.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module '{module}' is already registered")]
    Duplicate { module: String },

    #[error("module '{module}' is not registered")]
    UnknownModule { module: String },

    #[error("module '{module}' depends on '{dependency}', which is not registered")]
    MissingDependency { module: String, dependency: String },

    /// `path` starts and ends with the same module.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("unknown target module '{target}'")]
    UnknownTarget { target: String },

    /// Invisible modules only exist to satisfy other modules' dependencies.
    #[error("module '{target}' cannot be selected as a target")]
    NotSelectable { target: String },

    #[error("failed to initialize module '{module}': {source:#}")]
    Initialization {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("modules have already been initialized")]
    AlreadyInitialized,

    #[error("modules have not been initialized")]
    NotInitialized,

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl ModuleError {
    /// Whether the error was detected before any service was created.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ModuleError::Duplicate { .. }
                | ModuleError::UnknownModule { .. }
                | ModuleError::MissingDependency { .. }
                | ModuleError::Cycle { .. }
                | ModuleError::UnknownTarget { .. }
                | ModuleError::NotSelectable { .. }
        )
    }
}
