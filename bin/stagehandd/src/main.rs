//! ---
//! sh_section: "01-core-functionality"
//! sh_subsection: "binary"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Binary entrypoint for the Stagehand daemon."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stagehand_common::config::AppConfig;
use stagehand_common::logging::{init_tracing, LogFormat};
use stagehand_metrics::{new_registry, spawn_http_server, ServiceMetrics};
use stagehand_modules::{register_default_topology, IdleServices, Orchestrator};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Stagehand module orchestrator", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long = "target",
        value_name = "MODULE",
        value_delimiter = ',',
        help = "Modules to run, replacing the configured targets"
    )]
    targets: Vec<String>,

    #[arg(long, value_name = "FORMAT", help = "Override the stdout log format (json or pretty)")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Initialize and supervise the selected modules")]
    Run,
    #[command(about = "Print the initialization order for the selected modules")]
    Plan,
    #[command(about = "List the modules that can be selected as targets")]
    Modules,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/stagehand.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if !cli.targets.is_empty() {
        config.target = cli.targets.clone();
        config.validate().context("invalid --target override")?;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_tracing("stagehandd", &config.logging)?;

    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), targets = ?config.target, "configuration loaded"),
        None => info!(targets = ?config.target, "no configuration file found, using defaults"),
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await?,
        Commands::Plan => {
            let orchestrator = build_orchestrator(&config.target)?;
            let plan = orchestrator.plan()?;
            for (idx, module) in plan.iter().enumerate() {
                println!("{:>2}. {}", idx + 1, module);
            }
        }
        Commands::Modules => {
            let orchestrator = build_orchestrator(&config.target)?;
            for module in orchestrator.registry().visible_modules() {
                let dependencies: Vec<&str> = module.dependencies().collect();
                let kind = if module.is_grouping() { "group" } else { "service" };
                println!("{:<28}{:<9}{}", module.name(), kind, dependencies.join(", "));
            }
        }
    }

    Ok(())
}

fn build_orchestrator(targets: &[String]) -> Result<Orchestrator> {
    let mut orchestrator = Orchestrator::new(targets.iter().cloned());
    register_default_topology(&mut orchestrator, Arc::new(IdleServices))?;
    Ok(orchestrator)
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let service_metrics = ServiceMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let mut orchestrator = build_orchestrator(&config.target)?.with_metrics(service_metrics);
    orchestrator
        .init()
        .context("failed to initialize module services")?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received, stopping modules");
            token.cancel();
        }
    });

    info!(targets = ?orchestrator.targets(), "daemon running; waiting for termination signal");
    let outcome = orchestrator.run(token).await;
    orchestrator.shutdown().await;

    if let Some(server) = metrics_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "metrics exporter did not shut down cleanly");
        }
    }

    match outcome {
        Ok(()) => {
            info!("all modules stopped");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "module services failed");
            Err(err).context("module services failed")
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = unix_signal(signal::unix::SignalKind::terminate(), "SIGTERM") => {},
            _ = unix_signal(signal::unix::SignalKind::quit(), "SIGQUIT") => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind, name: &'static str) {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(?err, signal = name, "failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_flag_uses_config_spelling() {
        let cli = Cli::try_parse_from(["stagehandd", "--log-format", "json", "plan"]).unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::StructuredJson));
        assert!(matches!(cli.command, Some(Commands::Plan)));

        let cli = Cli::try_parse_from(["stagehandd", "--log-format", "structured-json"]).unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::StructuredJson));

        let cli = Cli::try_parse_from(["stagehandd", "--log-format", "pretty"]).unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Pretty));

        assert!(Cli::try_parse_from(["stagehandd", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn targets_are_comma_delimited() {
        let cli = Cli::try_parse_from(["stagehandd", "--target", "kine,cert-generator"]).unwrap();
        assert_eq!(cli.targets, ["kine", "cert-generator"]);
        assert!(cli.command.is_none());
    }
}
