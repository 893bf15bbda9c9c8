/// `load_config` module: reads the YAML configuration file of the CLI.
///
/// This is the only place where untrusted YAML is parsed and mapped to the
/// strongly-typed settings and registrations of `distributor-core`.
///
/// # Schema
/// ```yaml
/// settings:            # optional, every field defaults
///   auto_distribution_enabled: true
///   max_dependency_depth: 2
/// registrations:
///   - key: featured_image
///     location: post_meta
///     attributes:
///       meta_key: _thumbnail_id
///     kind: media
/// ```
///
/// # Errors
/// All errors use `anyhow::Error` with the offending path in context, surfaced
/// at the CLI boundary.
use anyhow::{anyhow, Context, Result};
use distributor_core::config::{DistributorConfig, RegistrationConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Environment variable naming the config file when `--config` is omitted.
pub const CONFIG_ENV_VAR: &str = "DISTRIBUTOR_CONFIG";

#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub settings: DistributorConfig,
    #[serde(default)]
    pub registrations: Vec<RegistrationConfig>,
}

/// The explicit path, else the one named by [`CONFIG_ENV_VAR`].
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    std::env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .map_err(|_| anyhow!("No --config given and {CONFIG_ENV_VAR} is not set"))
}

/// Loads and validates a YAML config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    // An empty document is a valid, all-defaults configuration.
    let config: CliConfig = if content.trim().is_empty() {
        CliConfig::default()
    } else {
        serde_yaml::from_str(&content).map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            anyhow!("Failed to parse config YAML: {e}")
        })?
    };

    config
        .settings
        .validate()
        .with_context(|| format!("Invalid settings in {path_ref:?}"))?;
    config.settings.trace_loaded();
    info!(
        config_path = ?path_ref,
        registrations = config.registrations.len(),
        "Parsed config YAML successfully"
    );

    Ok(config)
}
