//! ---
//! sh_section: "02-service-lifecycle"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Supervisor behaviour under failure, cancellation, and repeated shutdown."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use indexmap::IndexMap;
use stagehand_metrics::{new_registry, ServiceMetrics};
use stagehand_services::{
    BasicService, IdleService, Lifecycle, Phase, Service, ServiceManager, SharedService, State,
    StopRequested, SupervisorError, SupervisorPhase,
};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// Runs until `trigger` fires, then fails with `message`.
struct FailOnSignal {
    trigger: Arc<Notify>,
    message: &'static str,
}

#[async_trait]
impl Lifecycle for FailOnSignal {
    async fn running(&self, token: CancellationToken) -> anyhow::Result<()> {
        tokio::select! {
            _ = token.cancelled() => Ok(()),
            _ = self.trigger.notified() => Err(anyhow!(self.message)),
        }
    }
}

/// Reports a requested stop instead of a clean exit once cancelled.
struct StopsWithSentinel;

#[async_trait]
impl Lifecycle for StopsWithSentinel {
    async fn running(&self, token: CancellationToken) -> anyhow::Result<()> {
        token.cancelled().await;
        Err(StopRequested.into())
    }
}

struct RefusesToStart;

#[async_trait]
impl Lifecycle for RefusesToStart {
    async fn starting(&self, _token: CancellationToken) -> anyhow::Result<()> {
        Err(anyhow!("listen tcp :6443: address already in use"))
    }
}

struct UncleanStop;

#[async_trait]
impl Lifecycle for UncleanStop {
    async fn stopping(&self, _failure: Option<&anyhow::Error>) -> anyhow::Result<()> {
        Err(anyhow!("failed to flush informer cache"))
    }
}

struct FinishesImmediately;

#[async_trait]
impl Lifecycle for FinishesImmediately {
    async fn running(&self, _token: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

fn service_set(services: Vec<SharedService>) -> IndexMap<String, SharedService> {
    services
        .into_iter()
        .map(|service| (service.name().to_owned(), service))
        .collect()
}

fn spawn_run(
    manager: &Arc<ServiceManager>,
    token: &CancellationToken,
) -> tokio::task::JoinHandle<Result<(), SupervisorError>> {
    let manager = manager.clone();
    let token = token.clone();
    tokio::spawn(async move { manager.run(token).await })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_service_stops_the_rest_and_is_reported() {
    let trigger = Arc::new(Notify::new());
    let x: SharedService = Arc::new(IdleService::idle("x"));
    let y: SharedService = Arc::new(BasicService::new(
        "y",
        FailOnSignal {
            trigger: trigger.clone(),
            message: "watch channel closed",
        },
    ));
    let z: SharedService = Arc::new(IdleService::idle("z"));
    let manager = Arc::new(ServiceManager::new(service_set(vec![
        x.clone(),
        y.clone(),
        z.clone(),
    ])));

    let token = CancellationToken::new();
    let run = spawn_run(&manager, &token);
    for service in [&x, &y, &z] {
        timeout(WAIT, service.await_running()).await.unwrap().unwrap();
    }
    trigger.notify_one();

    let err = timeout(WAIT, run).await.unwrap().unwrap().unwrap_err();
    let failure = err.failure().expect("runtime failure");
    assert_eq!(failure.service(), "y");
    assert_eq!(failure.phase(), Phase::Running);
    assert!(err.to_string().contains("watch channel closed"));

    assert_eq!(x.state(), State::Terminated);
    assert_eq!(y.state(), State::Failed);
    assert_eq!(z.state(), State::Terminated);
    assert_eq!(manager.phase(), SupervisorPhase::Stopped);
    assert!(!token.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requested_stops_during_cancellation_are_a_clean_shutdown() {
    let services: Vec<SharedService> = (0..3)
        .map(|idx| {
            Arc::new(BasicService::new(format!("watcher-{idx}"), StopsWithSentinel)) as SharedService
        })
        .collect();
    let manager = Arc::new(ServiceManager::new(service_set(services.clone())));

    let token = CancellationToken::new();
    let run = spawn_run(&manager, &token);
    for service in &services {
        service.await_running().await.unwrap();
    }
    token.cancel();

    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    for service in &services {
        assert_eq!(service.state(), State::Failed);
        assert!(service.failure_cause().unwrap().is_stop_requested());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_set_waits_for_cancellation() {
    let manager = Arc::new(ServiceManager::new(IndexMap::new()));
    let token = CancellationToken::new();
    let run = spawn_run(&manager, &token);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!run.is_finished());

    token.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(manager.phase(), SupervisorPhase::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_is_idempotent() {
    let a: SharedService = Arc::new(IdleService::idle("kine"));
    let b: SharedService = Arc::new(IdleService::idle("cert-generator"));
    let manager = Arc::new(ServiceManager::new(service_set(vec![a.clone(), b.clone()])));

    let token = CancellationToken::new();
    let run = spawn_run(&manager, &token);
    a.await_running().await.unwrap();
    b.await_running().await.unwrap();

    timeout(WAIT, manager.shutdown()).await.unwrap();
    timeout(WAIT, manager.shutdown()).await.unwrap();
    assert_eq!(a.state(), State::Terminated);
    assert_eq!(b.state(), State::Terminated);

    // Shutdown ends the run cleanly without the token being cancelled.
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_without_run_terminates_new_services() {
    let service: SharedService = Arc::new(IdleService::idle("kine"));
    let manager = ServiceManager::new(service_set(vec![service.clone()]));

    timeout(WAIT, manager.shutdown()).await.unwrap();
    assert_eq!(service.state(), State::Terminated);
    assert_eq!(manager.phase(), SupervisorPhase::Stopped);

    // The stop was deliberate, so the first run reports a clean outcome.
    timeout(WAIT, manager.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();
    let err = manager.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyStarted { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_racing_startup_is_a_clean_stop() {
    for round in 0..100 {
        let services: Vec<SharedService> = (0..64)
            .map(|idx| {
                let service: SharedService = Arc::new(IdleService::idle(format!("svc-{idx}")));
                service
            })
            .collect();
        let manager = Arc::new(ServiceManager::new(service_set(services.clone())));

        let run = spawn_run(&manager, &CancellationToken::new());
        tokio::task::yield_now().await;
        timeout(WAIT, manager.shutdown()).await.unwrap();

        let outcome = timeout(WAIT, run).await.unwrap().unwrap();
        assert!(outcome.is_ok(), "round {round}: {outcome:?}");
        for service in &services {
            assert_eq!(service.state(), State::Terminated, "round {round}: {}", service.name());
        }
        assert_eq!(manager.phase(), SupervisorPhase::Stopped, "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn startup_failure_is_returned() {
    let healthy: SharedService = Arc::new(IdleService::idle("kine"));
    let broken: SharedService = Arc::new(BasicService::new("kubernetes-apiserver", RefusesToStart));
    let manager = ServiceManager::new(service_set(vec![healthy.clone(), broken.clone()]));

    let err = timeout(WAIT, manager.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.service(), "kubernetes-apiserver");
    assert_eq!(failure.phase(), Phase::Starting);
    assert!(healthy.state().is_terminal());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_hook_error_is_reported_after_cancellation() {
    let service: SharedService = Arc::new(BasicService::new("kubernetes-informers", UncleanStop));
    let manager = Arc::new(ServiceManager::new(service_set(vec![service.clone()])));

    let token = CancellationToken::new();
    let run = spawn_run(&manager, &token);
    service.await_running().await.unwrap();
    token.cancel();

    let err = timeout(WAIT, run).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err.failure().unwrap().phase(), Phase::Stopping);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_returns_once_every_service_finished() {
    let services: Vec<SharedService> = vec![
        Arc::new(BasicService::new("job-a", FinishesImmediately)),
        Arc::new(BasicService::new("job-b", FinishesImmediately)),
    ];
    let manager = ServiceManager::new(service_set(services));
    timeout(WAIT, manager.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_follow_the_service_set() {
    let metrics = ServiceMetrics::new(new_registry()).unwrap();
    let services: Vec<SharedService> = vec![
        Arc::new(IdleService::idle("kine")),
        Arc::new(IdleService::idle("cert-generator")),
    ];
    let manager =
        Arc::new(ServiceManager::new(service_set(services.clone())).with_metrics(metrics.clone()));

    let token = CancellationToken::new();
    let run = spawn_run(&manager, &token);
    for service in &services {
        service.await_running().await.unwrap();
    }
    token.cancel();
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();

    assert_eq!(metrics.services_in_state("terminated"), 2);
    assert_eq!(metrics.services_in_state("running"), 0);
    assert_eq!(metrics.services_in_state("new"), 0);
}
