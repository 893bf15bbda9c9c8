use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DistributorError, DistributorResult};
use crate::registry::{DataArgs, DataAttributes};

/// Settings of the distribution pipeline. Every field has the default the
/// plugin ships with, so an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub auto_distribution_enabled: bool,
    pub default_post_status: String,
    pub supported_post_types: Vec<String>,
    pub external_connections_per_page: usize,
    pub push_capability: String,
    /// Roles allowed to push to an external connection that lists none itself.
    pub default_allowed_roles: Vec<String>,
    pub distribute_term_parent: bool,
    pub update_term_hierarchy: bool,
    /// How many dependency hops still get their own references processed.
    pub max_dependency_depth: u32,
    pub pull_error_ttl_secs: u64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            auto_distribution_enabled: false,
            default_post_status: "publish".to_string(),
            supported_post_types: vec!["post".to_string(), "page".to_string()],
            external_connections_per_page: 200,
            push_capability: "manage_options".to_string(),
            default_allowed_roles: vec!["administrator".to_string(), "editor".to_string()],
            distribute_term_parent: false,
            update_term_hierarchy: false,
            max_dependency_depth: 1,
            pull_error_ttl_secs: 86_400,
        }
    }
}

impl DistributorConfig {
    pub fn trace_loaded(&self) {
        info!(
            auto_distribution_enabled = self.auto_distribution_enabled,
            supported_post_types = ?self.supported_post_types,
            max_dependency_depth = self.max_dependency_depth,
            "Loaded DistributorConfig"
        );
        debug!(?self, "DistributorConfig loaded (full debug)");
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> DistributorResult<()> {
        if self.default_post_status.trim().is_empty() {
            return Err(DistributorError::Config(
                "default_post_status must not be empty".to_string(),
            ));
        }
        if self.max_dependency_depth == 0 {
            return Err(DistributorError::Config(
                "max_dependency_depth must be at least 1".to_string(),
            ));
        }
        if self.external_connections_per_page == 0 {
            return Err(DistributorError::Config(
                "external_connections_per_page must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A registration as written in a configuration file.
///
/// Only built-in kinds can be declared this way; custom callbacks are
/// registered in code through [`DataArgs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    pub key: String,
    pub location: String,
    #[serde(default)]
    pub attributes: DataAttributes,
    #[serde(default)]
    pub kind: Option<String>,
}

impl RegistrationConfig {
    pub fn to_args(&self) -> DataArgs {
        DataArgs {
            location: self.location.clone(),
            attributes: self.attributes.clone(),
            kind: self.kind.clone(),
            ..DataArgs::default()
        }
    }
}
