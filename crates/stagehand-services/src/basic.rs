//! ---
//! sh_section: "02-service-lifecycle"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Hook driven service implementation backing every module."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
//! [`BasicService`] drives a [`Lifecycle`] through the state machine in [`crate::state`].
//!
//! * `starting` runs while the service is `Starting`. An error fails the service and
//!   skips `stopping`.
//! * `running` runs while the service is `Running`. The default waits for the token to
//!   be cancelled. Returning early stops the service; returning an error fails it after
//!   `stopping` has run.
//! * `stopping` always runs once the service leaves `Running` (or `Starting` when the
//!   token was cancelled during startup) and receives the running failure, if any.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Phase, Result, ServiceError, ServiceFailure};
use crate::service::{Service, Transition, TransitionSender};
use crate::state::State;

/// Hooks invoked by [`BasicService`]. Every hook has a sensible default.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    async fn starting(&self, _token: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    async fn running(&self, token: CancellationToken) -> anyhow::Result<()> {
        token.cancelled().await;
        Ok(())
    }

    async fn stopping(&self, _failure: Option<&anyhow::Error>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Lifecycle without hooks: starts immediately and idles until stopped.
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl Lifecycle for Idle {}

/// A [`BasicService`] that does nothing but occupy a slot in the service set.
pub type IdleService = BasicService<Idle>;

#[derive(Debug)]
struct Core {
    state: State,
    failure: Option<ServiceFailure>,
    token: Option<CancellationToken>,
    listeners: Vec<TransitionSender>,
}

struct Inner<L> {
    name: String,
    lifecycle: L,
    core: Mutex<Core>,
    state_tx: watch::Sender<State>,
}

/// Service implementation built from [`Lifecycle`] hooks.
pub struct BasicService<L> {
    inner: Arc<Inner<L>>,
}

impl<L> Clone for BasicService<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L> std::fmt::Debug for BasicService<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicService")
            .field("name", &self.inner.name)
            .field("state", &self.inner.core.lock().state)
            .finish()
    }
}

impl IdleService {
    pub fn idle(name: impl Into<String>) -> Self {
        Self::new(name, Idle)
    }
}

impl<L: Lifecycle> BasicService<L> {
    pub fn new(name: impl Into<String>, lifecycle: L) -> Self {
        let (state_tx, _) = watch::channel(State::New);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                lifecycle,
                core: Mutex::new(Core {
                    state: State::New,
                    failure: None,
                    token: None,
                    listeners: Vec::new(),
                }),
                state_tx,
            }),
        }
    }

    /// Access the hooks backing this service.
    pub fn lifecycle(&self) -> &L {
        &self.inner.lifecycle
    }
}

impl<L: Lifecycle> Inner<L> {
    /// Apply a transition if it is legal from the current state.
    ///
    /// State, failure, listener delivery, and the watch update all happen under the same
    /// lock so every observer sees the transitions of this service in order.
    fn transition(&self, to: State, failure: Option<ServiceFailure>) -> bool {
        let mut core = self.core.lock();
        self.apply(&mut core, to, failure)
    }

    fn apply(&self, core: &mut Core, to: State, failure: Option<ServiceFailure>) -> bool {
        let from = core.state;
        if !from.can_transition_to(to) {
            debug!(service = %self.name, %from, %to, "ignoring illegal transition");
            return false;
        }
        core.state = to;
        if failure.is_some() {
            core.failure = failure.clone();
        }
        let transition = Transition {
            service: self.name.clone(),
            from,
            to,
            failure,
        };
        core.listeners
            .retain(|listener| listener.send(transition.clone()).is_ok());
        self.state_tx.send_replace(to);
        debug!(service = %self.name, %from, %to, "service transition");
        true
    }

    fn fail(&self, phase: Phase, cause: anyhow::Error) {
        let failure = ServiceFailure::new(self.name.clone(), phase, cause);
        self.transition(State::Failed, Some(failure));
    }

    async fn main(self: Arc<Self>, token: CancellationToken) {
        let started = guarded("starting", self.lifecycle.starting(token.clone())).await;
        if let Err(err) = started {
            self.fail(Phase::Starting, err);
            token.cancel();
            return;
        }

        let running_failure = if token.is_cancelled() {
            debug!(service = %self.name, "stop requested during startup");
            self.transition(State::Stopping, None);
            None
        } else {
            self.transition(State::Running, None);
            let outcome = guarded("running", self.lifecycle.running(token.clone())).await;
            self.transition(State::Stopping, None);
            outcome.err()
        };

        let stopped = guarded("stopping", self.lifecycle.stopping(running_failure.as_ref())).await;
        match (running_failure, stopped) {
            (Some(cause), stopped) => {
                if let Err(err) = stopped {
                    warn!(service = %self.name, error = %err, "stopping hook failed after running failure");
                }
                self.fail(Phase::Running, cause);
            }
            (None, Err(err)) => self.fail(Phase::Stopping, err),
            (None, Ok(())) => {
                self.transition(State::Terminated, None);
            }
        }
        token.cancel();
    }
}

/// Convert a panicking hook into an ordinary error so the service still reaches a
/// terminal state.
async fn guarded<F>(hook: &'static str, future: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("{} hook panicked: {}", hook, panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[async_trait]
impl<L: Lifecycle> Service for BasicService<L> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn start(&self, token: &CancellationToken) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| ServiceError::NoRuntime {
            service: self.inner.name.clone(),
        })?;
        let token = token.child_token();
        {
            let mut core = self.inner.core.lock();
            if core.state != State::New {
                return Err(ServiceError::InvalidState {
                    service: self.inner.name.clone(),
                    expected: State::New,
                    actual: core.state,
                });
            }
            core.token = Some(token.clone());
            self.inner.apply(&mut core, State::Starting, None);
        }
        handle.spawn(self.inner.clone().main(token));
        Ok(())
    }

    fn stop(&self) {
        let mut core = self.inner.core.lock();
        match core.state {
            State::New => {
                self.inner.apply(&mut core, State::Terminated, None);
            }
            _ => {
                if let Some(token) = &core.token {
                    token.cancel();
                }
            }
        }
    }

    fn state(&self) -> State {
        self.inner.core.lock().state
    }

    fn failure_cause(&self) -> Option<ServiceFailure> {
        self.inner.core.lock().failure.clone()
    }

    fn add_listener(&self, listener: TransitionSender) {
        self.inner.core.lock().listeners.push(listener);
    }

    async fn await_running(&self) -> Result<()> {
        let state = self
            .wait_for(|state| !matches!(state, State::New | State::Starting))
            .await;
        match state {
            State::Running => Ok(()),
            State::Failed => Err(self.failed_error()),
            state => Err(ServiceError::NotRunning {
                service: self.inner.name.clone(),
                state,
            }),
        }
    }

    async fn await_terminated(&self) -> Result<()> {
        match self.wait_for(State::is_terminal).await {
            State::Failed => Err(self.failed_error()),
            _ => Ok(()),
        }
    }
}

impl<L: Lifecycle> BasicService<L> {
    async fn wait_for(&self, predicate: impl Fn(State) -> bool) -> State {
        let mut rx = self.inner.state_tx.subscribe();
        let observed = match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            // The sender lives as long as `self`, so this arm is unreachable in practice.
            Err(_) => self.state(),
        };
        observed
    }

    fn failed_error(&self) -> ServiceError {
        match self.failure_cause() {
            Some(failure) => ServiceError::Failed(failure),
            None => ServiceError::NotRunning {
                service: self.inner.name.clone(),
                state: State::Failed,
            },
        }
    }
}
