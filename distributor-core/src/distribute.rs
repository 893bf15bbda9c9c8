//! # distribute: push content and its dependencies to a connection
//!
//! [`Distributor::distribute_to_connection`] pushes one content item and
//! records the result in the item's connection map.
//!
//! [`Distributor::preprocess_for_connection`] runs before a payload leaves for
//! a connection that cannot pull. Every dependent post referenced through a
//! `post` registration is pushed first, so the payload can carry the remote id
//! (`remote_post_id`) the receiving side resolves against.
//!
//! Dependency pushes run with a nested [`DistributionContext`]. Once the
//! context reaches its maximum depth the receiving side stops processing
//! registered data, which bounds how far a chain of dependencies is followed.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::contract::Connection;
use crate::error::{BoxError, DistributorError, DistributorResult};
use crate::model::{
    value_as_id, ConnectionId, ConnectionMap, ConnectionType, DistributionContext, MapEntry,
    Payload, PostId, PushArgs, RemotePost, UserId, META_CONNECTION_MAP,
};
use crate::registry::DataKind;
use crate::site::Site;

pub struct Distributor<'a> {
    site: &'a Site,
}

impl<'a> Distributor<'a> {
    pub fn new(site: &'a Site) -> Self {
        Self { site }
    }

    /// Pushes dependent posts ahead of `payload` and tags their extra data with the remote ids.
    ///
    /// Failures are logged and leave the affected entry unchanged.
    pub async fn preprocess_for_connection(
        &self,
        payload: Payload,
        connection: &dyn Connection,
        context: DistributionContext,
    ) -> Payload {
        if payload.distributor_extra_data.is_empty()
            || context.suppresses_processing()
            || !self.site.hooks.process_extra_data(&payload)
        {
            return payload;
        }

        let post_keys: Vec<String> = self
            .site
            .registry
            .of_kind(DataKind::Post)
            .map(|entry| entry.key.clone())
            .collect();
        if post_keys.is_empty() {
            return payload;
        }

        let status = payload.status_or(&self.site.config.default_post_status);
        let mut payload = payload;

        for key in post_keys {
            let Some(items) = payload.distributor_extra_data.get_mut(&key) else {
                continue;
            };
            for item in items.iter_mut() {
                let Some(source_post_id) = item.get("source_post_id").and_then(value_as_id) else {
                    continue;
                };

                match self
                    .push_dependency(source_post_id, connection, &status, context)
                    .await
                {
                    Ok(Some(remote_post_id)) => {
                        if let Some(fields) = item.as_object_mut() {
                            fields.insert("remote_post_id".to_string(), json!(remote_post_id));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(
                        data_key = %key,
                        source_post_id,
                        connection_id = connection.id(),
                        error = ?e,
                        "[DISTRIBUTE] Dependency push failed, sending plain reference"
                    ),
                }
            }
        }

        payload
    }

    /// Remote id of a dependency on `connection`, pushing it first when it has none.
    async fn push_dependency(
        &self,
        source_post_id: PostId,
        connection: &dyn Connection,
        status: &str,
        context: DistributionContext,
    ) -> Result<Option<PostId>, BoxError> {
        let store = &self.site.store;
        if store.get_post(source_post_id).await?.is_none() {
            debug!(source_post_id, "[DISTRIBUTE] Dependency no longer exists");
            return Ok(None);
        }

        let connection_type = connection.connection_type();
        let connection_id = connection.id();
        let map = ConnectionMap::from_meta(store.get_post_meta(source_post_id, META_CONNECTION_MAP).await?);
        if let Some(remote_post_id) = map.remote_post_id(connection_type, connection_id) {
            debug!(source_post_id, remote_post_id, "[DISTRIBUTE] Dependency already on connection");
            return Ok(Some(remote_post_id));
        }

        let remote = connection
            .push(
                source_post_id,
                PushArgs {
                    post_status: status.to_string(),
                    context: context.nested(),
                },
            )
            .await?;
        if remote.id == 0 {
            return Ok(None);
        }

        // The remote copy exists from here on; bookkeeping failures must not hide its id.
        if let Err(e) = self
            .record_mapping(source_post_id, connection_type, connection_id, remote.id)
            .await
        {
            warn!(source_post_id, remote_post_id = remote.id, error = ?e, "[DISTRIBUTE] Could not record dependency mapping");
        }
        if let Err(e) = connection
            .log_sync(BTreeMap::from([(remote.id, source_post_id)]))
            .await
        {
            warn!(source_post_id, remote_post_id = remote.id, error = ?e, "[DISTRIBUTE] Could not log dependency sync");
        }

        info!(source_post_id, remote_post_id = remote.id, connection_id, "[DISTRIBUTE] Pushed dependency");
        Ok(Some(remote.id))
    }

    /// Pushes `post_id` to one connection as `user_id` and records the mapping.
    pub async fn distribute_to_connection(
        &self,
        post_id: PostId,
        user_id: UserId,
        connection_id: ConnectionId,
        connection_type: ConnectionType,
    ) -> DistributorResult<RemotePost> {
        info!(post_id, user_id, connection_id, %connection_type, "[DISTRIBUTE] Distributing post");

        let site = self.site;
        let post = site
            .store
            .get_post(post_id)
            .await
            .map_err(DistributorError::Store)?
            .ok_or_else(|| DistributorError::NotFound(format!("post {post_id}")))?;

        site.users
            .set_current_user(user_id)
            .await
            .map_err(DistributorError::Store)?;

        let connection = site
            .connections
            .connection(connection_type, connection_id)
            .await
            .map_err(|e| DistributorError::InvalidConnection(format!("{connection_type}{connection_id}: {e}")))?;

        let status = site
            .hooks
            .default_status(site.config.default_post_status.clone(), &post);
        let remote = connection
            .push(
                post_id,
                PushArgs {
                    post_status: status,
                    context: site.root_context(),
                },
            )
            .await
            .map_err(|e| {
                error!(post_id, connection_id, error = ?e, "[DISTRIBUTE][ERROR] Push failed");
                DistributorError::Transport(e)
            })?;

        if remote.id == 0 {
            return Err(DistributorError::Transport(
                format!("connection {connection_type}{connection_id} returned no remote id").into(),
            ));
        }

        self.record_mapping(post_id, connection_type, connection_id, remote.id)
            .await
            .map_err(DistributorError::Store)?;

        info!(post_id, remote_post_id = remote.id, connection_id, "[DISTRIBUTE] Post distributed");
        Ok(remote)
    }

    /// Writes one connection's entry into the persisted map of `post_id`.
    ///
    /// The map is re-read right before writing and only this connection's entry
    /// changes, so entries recorded meanwhile by other runs are kept.
    pub async fn record_mapping(
        &self,
        post_id: PostId,
        connection_type: ConnectionType,
        connection_id: ConnectionId,
        remote_post_id: PostId,
    ) -> Result<(), BoxError> {
        let store = &self.site.store;
        let mut map = ConnectionMap::from_meta(store.get_post_meta(post_id, META_CONNECTION_MAP).await?);
        map.record(
            connection_type,
            connection_id,
            MapEntry {
                post_id: remote_post_id,
                time: Utc::now().timestamp(),
            },
        );
        store
            .update_post_meta(post_id, META_CONNECTION_MAP, serde_json::to_value(&map)?)
            .await
    }
}
