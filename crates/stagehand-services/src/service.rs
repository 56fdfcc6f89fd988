//! ---
//! sh_section: "02-service-lifecycle"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Runtime contract implemented by every supervised service."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServiceFailure};
use crate::state::State;

/// A single state change published by a service.
#[derive(Debug, Clone)]
pub struct Transition {
    pub service: String,
    pub from: State,
    pub to: State,
    /// Populated when `to` is [`State::Failed`].
    pub failure: Option<ServiceFailure>,
}

/// Channel end handed to services so they can publish their transitions.
pub type TransitionSender = mpsc::UnboundedSender<Transition>;

/// Shared handle to a type-erased service.
pub type SharedService = Arc<dyn Service>;

/// Lifecycle contract of a long-running unit of work.
///
/// Implementations must publish transitions to every registered listener in the order
/// they happen, and must eventually reach a terminal state once [`Service::stop`] was
/// called or the start token was cancelled.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Name used in logs, metrics, and failure causes.
    fn name(&self) -> &str;

    /// Move from `New` to `Starting` and continue startup in the background.
    ///
    /// Cancelling `token` has the same effect as calling [`Service::stop`].
    fn start(&self, token: &CancellationToken) -> Result<()>;

    /// Request the service to stop. Idempotent; never blocks.
    fn stop(&self);

    fn state(&self) -> State;

    /// Failure cause, present only once the service is [`State::Failed`].
    fn failure_cause(&self) -> Option<ServiceFailure>;

    /// Subscribe to every future transition of this service.
    fn add_listener(&self, listener: TransitionSender);

    /// Wait until the service is running. Errors if it stops or fails first.
    async fn await_running(&self) -> Result<()>;

    /// Wait until the service is terminal. Errors with the failure cause if it failed.
    async fn await_terminated(&self) -> Result<()>;
}
