//! ---
//! sh_section: "15-testing-qa-runbook"
//! sh_subsection: "integration-tests"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Validation of the shipped configuration against the module topology."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;

use stagehand_common::config::AppConfig;
use stagehand_common::logging::LogFormat;
use stagehand_modules::{register_default_topology, IdleServices, Orchestrator};

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

fn default_orchestrator(targets: &[String]) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(targets.iter().cloned());
    register_default_topology(&mut orchestrator, Arc::new(IdleServices)).unwrap();
    orchestrator
}

#[test]
fn shipped_config_selects_resolvable_targets() {
    let config: AppConfig = read("configs/stagehand.toml").parse().unwrap();
    assert_eq!(config.target, ["all"]);
    assert_eq!(config.logging.format, LogFormat::StructuredJson);
    assert!(!config.metrics.enabled);

    let plan = default_orchestrator(&config.target).plan().unwrap();
    assert_eq!(plan.modules().last().map(String::as_str), Some("all"));
}

#[test]
fn every_visible_module_is_a_valid_target() {
    let names: Vec<String> = default_orchestrator(&[])
        .registry()
        .visible_modules()
        .map(|module| module.name().to_owned())
        .collect();
    assert!(!names.is_empty());
    for name in names {
        let orchestrator = default_orchestrator(std::slice::from_ref(&name));
        let plan = orchestrator
            .plan()
            .unwrap_or_else(|err| panic!("{name}: {err}"));
        assert_eq!(plan.modules().last(), Some(&name));
    }
}

#[test]
fn config_without_targets_supervises_nothing() {
    let config: AppConfig = "target = []".parse().unwrap();
    let mut orchestrator = default_orchestrator(&config.target);
    orchestrator.init().unwrap();
    assert!(orchestrator.services().unwrap().is_empty());
}
