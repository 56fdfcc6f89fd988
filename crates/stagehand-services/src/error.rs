//! ---
//! sh_section: "02-service-lifecycle"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Error types for service lifecycles and supervision."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use strum::Display;

use crate::manager::SupervisorPhase;
use crate::state::State;

/// Result alias used by the service crate.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Sentinel cause for a deliberate, non-erroneous shutdown.
///
/// A service whose running hook returns this error (directly or wrapped with context)
/// ends up `Failed`, which makes the supervisor stop every other service, but the run
/// as a whole still counts as a clean shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stop requested")]
pub struct StopRequested;

/// Whether `err` carries the [`StopRequested`] sentinel anywhere in its chain.
pub fn is_stop_requested(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<StopRequested>())
}

/// Lifecycle hook during which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Starting,
    Running,
    Stopping,
}

/// Failure cause recorded on a service that reached [`State::Failed`].
///
/// Cheap to clone; the underlying error is shared between the service, its
/// listeners, and whoever surfaces it to the host process.
#[derive(Debug, Clone)]
pub struct ServiceFailure {
    service: String,
    phase: Phase,
    cause: Arc<anyhow::Error>,
}

impl ServiceFailure {
    pub fn new(service: impl Into<String>, phase: Phase, cause: anyhow::Error) -> Self {
        Self {
            service: service.into(),
            phase,
            cause: Arc::new(cause),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    pub fn is_stop_requested(&self) -> bool {
        is_stop_requested(&self.cause)
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "service '{}' failed while {}: {:#}",
            self.service, self.phase, self.cause
        )
    }
}

impl std::error::Error for ServiceFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &(dyn std::error::Error + 'static) = &**self.cause;
        Some(cause)
    }
}

/// Errors raised by individual services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The requested operation does not apply to the service's current state.
    #[error("service '{service}' is {actual}, expected {expected}")]
    InvalidState {
        service: String,
        expected: State,
        actual: State,
    },
    /// The service stopped before it ever reached the running state.
    #[error("service '{service}' is {state} and will never be running")]
    NotRunning { service: String, state: State },
    /// The service is failed; carries its failure cause.
    #[error(transparent)]
    Failed(#[from] ServiceFailure),
    /// `start` was invoked outside of a Tokio runtime.
    #[error("service '{service}' cannot start outside of a tokio runtime")]
    NoRuntime { service: String },
}

/// Errors returned by [`crate::ServiceManager::run`].
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// `run` may only be called once per manager.
    #[error("service manager cannot run while {phase}")]
    AlreadyStarted { phase: SupervisorPhase },
    /// A service refused to start; every other service was stopped.
    #[error("failed to start services: {0}")]
    Start(#[from] ServiceError),
    /// The first genuine runtime failure observed during supervision.
    #[error(transparent)]
    Failed(ServiceFailure),
}

impl SupervisorError {
    /// The service failure behind this error, if any.
    pub fn failure(&self) -> Option<&ServiceFailure> {
        match self {
            SupervisorError::Failed(failure) => Some(failure),
            SupervisorError::Start(ServiceError::Failed(failure)) => Some(failure),
            _ => None,
        }
    }
}
