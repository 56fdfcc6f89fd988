//! ---
//! sh_section: "04-observability"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Metrics collection and export utilities."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Registry that `ServiceMetrics` writes to and the exporter reads from.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Serve `registry` in the Prometheus text format at `GET /metrics` on `addr`.
///
/// Binding happens before this returns, so a port conflict fails daemon startup
/// instead of surfacing later from the spawned task.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics exporter listening");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Running exporter; dropping it leaves the task serving until the runtime exits.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address; differs from the requested one when port `0` was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics describing the supervised service set.
#[derive(Clone, Debug)]
pub struct ServiceMetrics {
    registry: SharedRegistry,
    services_total: IntGauge,
    services_by_state: IntGaugeVec,
    transitions: IntCounterVec,
    failures: IntCounterVec,
}

impl ServiceMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let services_total = IntGauge::with_opts(Opts::new(
            "stagehand_services_total",
            "Number of services in the supervised service set",
        ))?;
        registry.register(Box::new(services_total.clone()))?;

        let services_by_state = IntGaugeVec::new(
            Opts::new(
                "stagehand_services_by_state",
                "Number of services currently in each lifecycle state",
            ),
            &["state"],
        )?;
        registry.register(Box::new(services_by_state.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new(
                "stagehand_service_transitions_total",
                "Lifecycle transitions observed per service and target state",
            ),
            &["service", "state"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                "stagehand_service_failures_total",
                "Services that reached the failed state, split by requested-stop causes",
            ),
            &["service", "stop_requested"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        Ok(Self {
            registry,
            services_total,
            services_by_state,
            transitions,
            failures,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Record the size of a freshly built service set; every member starts in `initial`.
    pub fn set_service_count(&self, count: usize, initial: &str) {
        self.services_total.set(count as i64);
        self.services_by_state
            .with_label_values(&[initial])
            .set(count as i64);
    }

    pub fn record_transition(&self, service: &str, from: &str, to: &str) {
        self.services_by_state.with_label_values(&[from]).dec();
        self.services_by_state.with_label_values(&[to]).inc();
        self.transitions.with_label_values(&[service, to]).inc();
    }

    pub fn record_failure(&self, service: &str, stop_requested: bool) {
        let label = if stop_requested { "true" } else { "false" };
        self.failures.with_label_values(&[service, label]).inc();
    }

    /// Current gauge value for a state; mainly useful for assertions.
    pub fn services_in_state(&self, state: &str) -> i64 {
        self.services_by_state.with_label_values(&[state]).get()
    }
}
