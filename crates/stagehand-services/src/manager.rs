//! ---
//! sh_section: "02-service-lifecycle"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Concurrent supervisor starting, observing, and draining a service set."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use stagehand_metrics::ServiceMetrics;
use strum::Display;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ServiceFailure, SupervisorError};
use crate::service::{SharedService, Transition};
use crate::state::State;

/// Coarse state of the supervisor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SupervisorPhase {
    /// Built but not yet running.
    Idle,
    /// Services have been started and are being observed.
    Running,
    /// Stop was requested from every service; waiting for all of them to finish.
    Draining,
    /// Every service is terminal.
    Stopped,
}

/// Supervises a fixed set of services as a single unit.
///
/// The set is frozen at construction. Services are started concurrently; the first
/// failure, cancellation of the run token, or [`ServiceManager::shutdown`] stops all
/// of them.
pub struct ServiceManager {
    services: IndexMap<String, SharedService>,
    phase: Mutex<SupervisorPhase>,
    /// Cancelled by `shutdown`; parent of every token handed to a service.
    stop: CancellationToken,
    entered: AtomicBool,
    metrics: Option<ServiceMetrics>,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("phase", &*self.phase.lock())
            .finish()
    }
}

impl ServiceManager {
    /// Build a manager over `services`, keyed by the name they are reported under.
    pub fn new(services: IndexMap<String, SharedService>) -> Self {
        Self {
            services,
            phase: Mutex::new(SupervisorPhase::Idle),
            stop: CancellationToken::new(),
            entered: AtomicBool::new(false),
            metrics: None,
        }
    }

    /// Feed lifecycle metrics for every observed transition into `metrics`.
    pub fn with_metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn phase(&self) -> SupervisorPhase {
        *self.phase.lock()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn services(&self) -> &IndexMap<String, SharedService> {
        &self.services
    }

    /// Current membership of every lifecycle state, for diagnostics.
    pub fn services_by_state(&self) -> IndexMap<State, Vec<String>> {
        let mut by_state: IndexMap<State, Vec<String>> = IndexMap::new();
        for (name, service) in &self.services {
            by_state
                .entry(service.state())
                .or_default()
                .push(name.clone());
        }
        by_state
    }

    fn set_phase(&self, phase: SupervisorPhase) {
        let mut current = self.phase.lock();
        if *current != phase {
            debug!(from = %*current, to = %phase, "supervisor phase change");
            *current = phase;
        }
    }

    fn stop_requested(&self, token: &CancellationToken) -> bool {
        self.stop.is_cancelled() || token.is_cancelled()
    }

    fn all_terminal(&self) -> bool {
        self.services.values().all(|service| service.state().is_terminal())
    }

    /// Start every service and block until `token` is cancelled or a service fails.
    ///
    /// Either way every service is stopped and awaited before returning. The result is
    /// the first failure whose cause is not [`crate::StopRequested`], or `Ok(())`.
    /// A [`ServiceManager::shutdown`] that lands before or during startup is a clean stop.
    pub async fn run(&self, token: CancellationToken) -> Result<(), SupervisorError> {
        let first = !self.entered.swap(true, Ordering::SeqCst);
        {
            let mut phase = self.phase.lock();
            match *phase {
                SupervisorPhase::Idle => *phase = SupervisorPhase::Running,
                SupervisorPhase::Stopped if first && self.stop.is_cancelled() => {
                    info!("shutdown requested before run, nothing to start");
                    return Ok(());
                }
                other => return Err(SupervisorError::AlreadyStarted { phase: other }),
            }
        }

        if self.services.is_empty() {
            warn!("no services to supervise, waiting for shutdown");
            tokio::select! {
                _ = token.cancelled() => {}
                _ = self.stop.cancelled() => {}
            }
            self.set_phase(SupervisorPhase::Stopped);
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        for service in self.services.values() {
            service.add_listener(tx.clone());
        }
        drop(tx);

        if let Some(metrics) = &self.metrics {
            metrics.set_service_count(self.services.len(), State::New.as_str());
        }

        let mut observer = Observer::new(self.services.len(), self.metrics.as_ref());
        let run_token = self.stop.child_token();

        let mut interrupted = false;
        for (name, service) in &self.services {
            if self.stop_requested(&token) {
                interrupted = true;
                break;
            }
            if let Err(err) = service.start(&run_token) {
                // Shutdown may have stopped a service that was still new.
                if self.stop_requested(&token) {
                    debug!(service = %name, error = %err, "start refused after stop was requested");
                    interrupted = true;
                    break;
                }
                error!(service = %name, error = %err, "service failed to start, stopping all services");
                self.drain(&mut rx, &mut observer).await;
                run_token.cancel();
                return Err(SupervisorError::Start(err));
            }
        }
        if interrupted {
            info!("shutdown requested during startup, stopping all services");
        } else {
            info!(services = self.services.len(), "services started");
        }

        if !interrupted {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!("shutdown requested, stopping all services");
                        break;
                    }
                    _ = self.stop.cancelled() => {
                        info!("supervisor shutdown called, stopping all services");
                        break;
                    }
                    transition = rx.recv() => {
                        let Some(transition) = transition else { break };
                        if observer.observe(&transition) {
                            warn!(service = %transition.service, "service failed, stopping all services");
                            break;
                        }
                        if self.all_terminal() {
                            info!("all services finished on their own");
                            break;
                        }
                    }
                }
            }
        }

        self.drain(&mut rx, &mut observer).await;
        run_token.cancel();

        match observer.first_failure {
            Some(failure) => Err(SupervisorError::Failed(failure)),
            None => Ok(()),
        }
    }

    /// Stop every service and consume transitions until all of them are terminal.
    async fn drain(&self, rx: &mut mpsc::UnboundedReceiver<Transition>, observer: &mut Observer<'_>) {
        self.set_phase(SupervisorPhase::Draining);
        for service in self.services.values() {
            service.stop();
        }
        // A terminal state is published under the same lock that sets it, so once a
        // service reads as terminal its final transition is already queued.
        while !self.all_terminal() {
            match rx.recv().await {
                Some(transition) => {
                    observer.observe(&transition);
                }
                None => break,
            }
        }
        while let Ok(transition) = rx.try_recv() {
            observer.observe(&transition);
        }
        self.set_phase(SupervisorPhase::Stopped);
        info!(by_state = ?self.state_summary(), "all services stopped");
    }

    /// Stop every service and wait until each one is terminal.
    ///
    /// Safe to call any number of times, before, during, or after [`ServiceManager::run`].
    pub async fn shutdown(&self) {
        self.stop.cancel();
        {
            let mut phase = self.phase.lock();
            if *phase == SupervisorPhase::Idle {
                *phase = SupervisorPhase::Stopped;
            }
        }
        for service in self.services.values() {
            service.stop();
        }
        let outcomes = join_all(
            self.services
                .values()
                .map(|service| async move { (service.name().to_owned(), service.await_terminated().await) }),
        )
        .await;
        for (name, outcome) in outcomes {
            if let Err(err) = outcome {
                debug!(service = %name, error = %err, "service ended in failure");
            }
        }
    }

    fn state_summary(&self) -> Vec<(&'static str, usize)> {
        self.services_by_state()
            .into_iter()
            .map(|(state, names)| (state.as_str(), names.len()))
            .collect()
    }
}

/// Aggregates transitions for one supervised run.
struct Observer<'a> {
    total: usize,
    running: usize,
    healthy_reported: bool,
    first_failure: Option<ServiceFailure>,
    metrics: Option<&'a ServiceMetrics>,
}

impl<'a> Observer<'a> {
    fn new(total: usize, metrics: Option<&'a ServiceMetrics>) -> Self {
        Self {
            total,
            running: 0,
            healthy_reported: false,
            first_failure: None,
            metrics,
        }
    }

    /// Record a transition. Returns `true` when the service failed.
    fn observe(&mut self, transition: &Transition) -> bool {
        debug!(
            service = %transition.service,
            from = %transition.from,
            to = %transition.to,
            "observed service transition"
        );
        if let Some(metrics) = self.metrics {
            metrics.record_transition(
                &transition.service,
                transition.from.as_str(),
                transition.to.as_str(),
            );
        }

        if transition.from == State::Running {
            self.running = self.running.saturating_sub(1);
        }
        if transition.to == State::Running {
            self.running += 1;
            if self.running == self.total && !self.healthy_reported {
                self.healthy_reported = true;
                info!(services = self.total, "all services running");
            }
        }

        if transition.to != State::Failed {
            return false;
        }
        match &transition.failure {
            Some(failure) => {
                let stop_requested = failure.is_stop_requested();
                if let Some(metrics) = self.metrics {
                    metrics.record_failure(&transition.service, stop_requested);
                }
                if stop_requested {
                    info!(service = %transition.service, "service requested stop");
                } else {
                    error!(service = %transition.service, error = %failure, "service failed");
                    if self.first_failure.is_none() {
                        self.first_failure = Some(failure.clone());
                    }
                }
            }
            None => warn!(service = %transition.service, "service failed without a recorded cause"),
        }
        true
    }
}
