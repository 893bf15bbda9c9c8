//! The collaborators of one site, bundled so the pipeline can be handed a
//! single reference.

use std::sync::Arc;

use crate::config::DistributorConfig;
use crate::contract::{BlockParser, ConnectionProvider, ContentStore, JobQueue, UserContext};
use crate::hooks::{DefaultHooks, DistributionHooks};
use crate::model::DistributionContext;
use crate::registry::Registry;

#[derive(Clone)]
pub struct Site {
    pub registry: Arc<Registry>,
    pub store: Arc<dyn ContentStore>,
    pub connections: Arc<dyn ConnectionProvider>,
    pub users: Arc<dyn UserContext>,
    pub jobs: Arc<dyn JobQueue>,
    pub parser: Arc<dyn BlockParser>,
    pub hooks: Arc<dyn DistributionHooks>,
    pub config: DistributorConfig,
}

impl Site {
    pub fn new(
        registry: Registry,
        store: Arc<dyn ContentStore>,
        connections: Arc<dyn ConnectionProvider>,
        users: Arc<dyn UserContext>,
        jobs: Arc<dyn JobQueue>,
        parser: Arc<dyn BlockParser>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            connections,
            users,
            jobs,
            parser,
            hooks: Arc::new(DefaultHooks),
            config: DistributorConfig::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn DistributionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: DistributorConfig) -> Self {
        self.config = config;
        self
    }

    /// Context a top-level distribution starts from.
    pub fn root_context(&self) -> DistributionContext {
        DistributionContext::new(self.config.max_dependency_depth)
    }
}
