/// # distributor CLI interface
///
/// Command parsing and entrypoints of the `distributor` binary. All business
/// logic (registry, walkers, processing) lives in `distributor-core`; this
/// module only loads files, calls into the core and prints reports.
///
/// ## Commands
/// - `check`: load the config, register every declared registration and
///   report the issues found. Fails when there are any.
/// - `scan`: list, per registration, the references a payload carries, in the
///   order their extra data would be aligned.
use crate::load_config::{load_config, resolve_config_path};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use distributor_core::json_blocks::JsonBlockParser;
use distributor_core::model::Payload;
use distributor_core::processor::occurrence_sources;
use distributor_core::registry::Registry;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// CLI for distributor: validate registered data and inspect payloads.
#[derive(Parser)]
#[clap(
    name = "distributor",
    version,
    about = "Validate registered-data rules and scan content payloads for the references they rewrite"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate settings and registrations of a config file
    Check {
        /// Path to the YAML config file (defaults to $DISTRIBUTOR_CONFIG)
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Report the registered references found in a JSON payload
    Scan {
        /// Path to the YAML config file (defaults to $DISTRIBUTOR_CONFIG)
        #[clap(long)]
        config: Option<PathBuf>,
        /// Path to the payload JSON file
        #[clap(long)]
        payload: PathBuf,
        /// Treat the payload as a REST payload (prefer raw content)
        #[clap(long)]
        rest: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub registrations: usize,
    pub issues: BTreeMap<String, Vec<String>>,
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Check { config } => {
            let path = resolve_config_path(config)?;
            let config = load_config(&path)?;
            tracing::info!(command = "check", "Checking registrations");

            let report = check(&config.registrations);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.issues.is_empty() {
                tracing::info!(command = "check", registrations = report.registrations, "Configuration is valid");
                Ok(())
            } else {
                Err(anyhow!(
                    "{} registration(s) have issues",
                    report.issues.len()
                ))
            }
        }
        Commands::Scan {
            config,
            payload,
            rest,
        } => {
            let path = resolve_config_path(config)?;
            let config = load_config(&path)?;
            let raw = std::fs::read_to_string(&payload)
                .with_context(|| format!("Failed to read payload file {payload:?}"))?;
            let payload: Payload = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse payload JSON {payload:?}"))?;
            tracing::info!(command = "scan", post_id = ?payload.post_id, rest, "Scanning payload");

            let registry = Registry::from_config(&config.registrations);
            let report = scan(&registry, &payload, rest);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

/// Registers every declared registration and collects the issues per key.
pub fn check(registrations: &[distributor_core::config::RegistrationConfig]) -> CheckReport {
    let mut registry = Registry::new();
    let mut issues = BTreeMap::new();
    for registration in registrations {
        let found = registry.register(&registration.key, registration.to_args());
        if !found.is_empty() {
            issues.insert(
                registration.key.clone(),
                found.iter().map(ToString::to_string).collect(),
            );
        }
    }
    CheckReport {
        registrations: registry.len(),
        issues,
    }
}

/// References per registration key, in extra-data order. Keys without any are omitted.
pub fn scan(registry: &Registry, payload: &Payload, is_rest: bool) -> BTreeMap<String, Vec<Value>> {
    let parser = JsonBlockParser;
    registry
        .all()
        .iter()
        .filter_map(|entry| {
            let sources = occurrence_sources(&parser, payload, entry, is_rest);
            (!sources.is_empty()).then(|| (entry.key.clone(), sources))
        })
        .collect()
}
