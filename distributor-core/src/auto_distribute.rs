//! # auto_distribute: copy newly published content to every eligible connection
//!
//! A publish event calls [`AutoDistributor::schedule_post`], which queues one
//! deferred job per (post, user) pair. When the job fires, the host calls
//! [`AutoDistributor::distribute_to_all_connections`], which enumerates the
//! connections the user may push to and distributes the post to each one it
//! has not reached yet.
//!
//! Content received from another site (carrying `dt_original_post_url`) is
//! never scheduled nor distributed, so a mesh of sites cannot bounce an item
//! back and forth.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::contract::AutoDistributeJob;
use crate::distribute::Distributor;
use crate::error::{DistributorError, DistributorResult};
use crate::model::{
    display_site_url, ConnectionDescriptor, ConnectionDirection, ConnectionMap, ConnectionType,
    Post, PostId, RemotePost, Syndicated, UserId, META_CONNECTION_MAP, META_ORIGINAL_POST_URL,
};
use crate::site::Site;

/// Why a post takes no part in auto-distribution at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Ineligible {
    Disabled,
    MissingPost,
    /// No user to distribute as.
    MissingUser,
    UnsupportedType,
    /// The post was itself received from another site.
    Received,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Ineligible::Disabled => "auto-distribution is disabled",
            Ineligible::MissingPost => "post does not exist",
            Ineligible::MissingUser => "no user to distribute as",
            Ineligible::UnsupportedType => "post type is not supported",
            Ineligible::Received => "post was received from another site",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled(AutoDistributeJob),
    AlreadyScheduled(AutoDistributeJob),
    Skipped(Ineligible),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    AlreadySyndicated,
    /// The per-post hook declined this connection.
    Vetoed,
}

/// What one auto-distribution run did, per connection key (e.g. `external12`).
#[derive(Debug, Default, Serialize)]
pub struct AutoDistributionReport {
    pub post_id: PostId,
    pub ineligible: Option<Ineligible>,
    pub pushed: Vec<(String, PostId)>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<(String, String)>,
}

pub struct AutoDistributor<'a> {
    site: &'a Site,
}

impl<'a> AutoDistributor<'a> {
    pub fn new(site: &'a Site) -> Self {
        Self { site }
    }

    pub fn enabled(&self) -> bool {
        self.site
            .hooks
            .auto_distribution_enabled(self.site.config.auto_distribution_enabled)
    }

    pub fn supported_post_types(&self) -> Vec<String> {
        self.site
            .hooks
            .supported_post_types(self.site.config.supported_post_types.clone())
    }

    async fn eligible_post(&self, post_id: PostId) -> Result<Post, Ineligible> {
        if !self.enabled() {
            return Err(Ineligible::Disabled);
        }
        let store = &self.site.store;
        let post = match store.get_post(post_id).await {
            Ok(Some(post)) => post,
            Ok(None) => return Err(Ineligible::MissingPost),
            Err(e) => {
                warn!(post_id, error = ?e, "[AUTO] Could not load post");
                return Err(Ineligible::MissingPost);
            }
        };
        if !self.supported_post_types().contains(&post.post_type) {
            return Err(Ineligible::UnsupportedType);
        }
        // An unreadable marker counts as present.
        let received = match store.get_post_meta(post_id, META_ORIGINAL_POST_URL).await {
            Ok(marker) => marker.is_some_and(|v| !v.is_null() && v != "" && v != false),
            Err(e) => {
                warn!(post_id, error = ?e, "[AUTO] Could not read origin marker");
                true
            }
        };
        if received {
            return Err(Ineligible::Received);
        }
        Ok(post)
    }

    /// Queues a single deferred run for `post_id`, on behalf of `user_id` or the current user.
    pub async fn schedule_post(
        &self,
        post_id: PostId,
        user_id: Option<UserId>,
    ) -> DistributorResult<ScheduleOutcome> {
        if let Err(reason) = self.eligible_post(post_id).await {
            debug!(post_id, %reason, "[AUTO] Not scheduling");
            return Ok(ScheduleOutcome::Skipped(reason));
        }

        let user_id = match user_id.filter(|id| *id > 0) {
            Some(id) => id,
            None => self.site.users.current_user_id().await,
        };
        let job = AutoDistributeJob { post_id, user_id };

        let jobs = &self.site.jobs;
        if jobs.is_scheduled(job).await.map_err(DistributorError::Store)? {
            debug!(post_id, user_id, "[AUTO] Already scheduled");
            return Ok(ScheduleOutcome::AlreadyScheduled(job));
        }
        jobs.schedule_once(job).await.map_err(DistributorError::Store)?;

        info!(post_id, user_id, "[AUTO] Scheduled auto-distribution");
        Ok(ScheduleOutcome::Scheduled(job))
    }

    /// Distributes `post_id` to every eligible connection it has not reached yet.
    ///
    /// A failing connection does not stop the others; it is listed in the report.
    pub async fn distribute_to_all_connections(
        &self,
        post_id: PostId,
        user_id: UserId,
    ) -> DistributorResult<AutoDistributionReport> {
        let mut report = AutoDistributionReport {
            post_id,
            ..AutoDistributionReport::default()
        };
        if user_id == 0 {
            report.ineligible = Some(Ineligible::MissingUser);
            return Ok(report);
        }
        let post = match self.eligible_post(post_id).await {
            Ok(post) => post,
            Err(reason) => {
                debug!(post_id, %reason, "[AUTO] Not distributing");
                report.ineligible = Some(reason);
                return Ok(report);
            }
        };

        let connections = self.get_connections(&post, user_id).await?;
        info!(post_id, user_id, candidates = connections.len(), "[AUTO] Distributing to all connections");

        let distributor = Distributor::new(self.site);
        for connection in connections {
            let key = connection.key();
            if connection.syndicated.is_syndicated() {
                report.skipped.push((key, SkipReason::AlreadySyndicated));
                continue;
            }
            if !self.site.hooks.should_auto_distribute(
                &post,
                user_id,
                connection.connection_type,
                connection.id,
            ) {
                report.skipped.push((key, SkipReason::Vetoed));
                continue;
            }

            match distributor
                .distribute_to_connection(post_id, user_id, connection.id, connection.connection_type)
                .await
            {
                Ok(RemotePost { id }) => report.pushed.push((key, id)),
                Err(e) => {
                    warn!(post_id, connection = %key, error = %e, "[AUTO] Distribution to connection failed");
                    report.failed.push((key, e.to_string()));
                }
            }
        }

        info!(
            post_id,
            pushed = report.pushed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "[AUTO] Auto-distribution finished"
        );
        Ok(report)
    }

    /// External connections followed by internal ones, with their syndicated state.
    pub async fn get_connections(
        &self,
        post: &Post,
        user_id: UserId,
    ) -> DistributorResult<Vec<ConnectionDescriptor>> {
        self.site
            .users
            .set_current_user(user_id)
            .await
            .map_err(DistributorError::Store)?;

        let map = ConnectionMap::from_meta(
            self.site
                .store
                .get_post_meta(post.id, META_CONNECTION_MAP)
                .await
                .map_err(DistributorError::Store)?,
        );

        let mut connections = self.get_external_connections(post, &map).await?;
        connections.extend(self.get_internal_connections(post, user_id, &map).await?);
        Ok(connections)
    }

    async fn get_external_connections(
        &self,
        post: &Post,
        map: &ConnectionMap,
    ) -> DistributorResult<Vec<ConnectionDescriptor>> {
        let site = self.site;
        let limit = site
            .hooks
            .external_connections_per_page(site.config.external_connections_per_page);
        let records = site
            .connections
            .external_connections(limit)
            .await
            .map_err(DistributorError::Store)?;

        let capability = site.hooks.push_capability(site.config.push_capability.clone());
        let is_admin = site.users.current_user_can(&capability).await;
        let roles = if is_admin {
            Vec::new()
        } else {
            site.users.current_user_roles().await
        };

        let mut connections = Vec::new();
        for record in records {
            if !record.type_registered {
                continue;
            }
            let Some(status) = record.status.as_ref().filter(|s| s.can_get && !s.no_distributor) else {
                continue;
            };
            if !status.can_post.contains(&post.post_type) {
                continue;
            }
            if !is_admin {
                let allowed = if record.allowed_roles.is_empty() {
                    &site.config.default_allowed_roles
                } else {
                    &record.allowed_roles
                };
                if !roles.iter().any(|role| allowed.contains(role)) {
                    debug!(connection_id = record.id, "[AUTO] User may not push to connection");
                    continue;
                }
            }

            connections.push(ConnectionDescriptor {
                connection_type: ConnectionType::External,
                id: record.id,
                url: record.base_url,
                name: record.name,
                syndicated: Syndicated::Flag(map.get(ConnectionType::External, record.id).is_some()),
            });
        }
        Ok(connections)
    }

    async fn get_internal_connections(
        &self,
        post: &Post,
        user_id: UserId,
        map: &ConnectionMap,
    ) -> DistributorResult<Vec<ConnectionDescriptor>> {
        let site = self.site;
        if !site.connections.internal_connections_available().await {
            return Ok(Vec::new());
        }

        let here = site.store.current_site_id().await;
        let sites = site
            .connections
            .authorized_sites(user_id, ConnectionDirection::Push)
            .await
            .map_err(DistributorError::Store)?;

        let mut connections = Vec::new();
        for target in sites {
            if target.site_id == here || !target.post_types.contains(&post.post_type) {
                continue;
            }

            let syndicated = match map.get(ConnectionType::Internal, target.site_id) {
                Some(entry) => match site.connections.site_permalink(target.site_id, entry.post_id).await {
                    Some(permalink) if !permalink.is_empty() => Syndicated::Permalink(permalink),
                    // The remote copy may have been deleted; it still counts.
                    _ => Syndicated::Flag(true),
                },
                None => Syndicated::Flag(false),
            };

            connections.push(ConnectionDescriptor {
                connection_type: ConnectionType::Internal,
                id: target.site_id,
                url: display_site_url(&target.url),
                name: target.name,
                syndicated,
            });
        }
        Ok(connections)
    }
}
