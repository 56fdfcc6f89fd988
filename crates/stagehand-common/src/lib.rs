//! ---
//! sh_section: "01-core-functionality"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Shared primitives and utilities for the orchestrator runtime."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
//! Shared primitives for the Stagehand workspace: configuration loading and
//! tracing setup consumed by the daemon and the integration tests.

pub mod config;
pub mod logging;

pub use config::{AppConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, DEFAULT_TARGET};
pub use logging::{init_tracing, LogFormat};
