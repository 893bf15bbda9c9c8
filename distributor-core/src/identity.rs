//! # identity: map a referenced entity onto the receiving site
//!
//! Every resolver answers the same question: which local id stands for the
//! entity the sender referenced? It first looks for a copy that already
//! exists and only creates one when nothing matches, so resolving the same
//! reference twice through the same connection yields the same id and never a
//! second copy.
//!
//! Lookups run cheapest and most specific first:
//! - media: original id + url tag, then import
//! - post: remote id hint, connection map, original id + source tag, title + type, then pull
//! - term: slug + taxonomy (parents first when enabled), then insert
//!
//! Failures never propagate. A resolver that cannot find or create the entity
//! answers [`Resolution::Fallback`] with the source id, so the reference is
//! kept as sent.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::BoxError;
use crate::handlers::{MediaExtraData, PostExtraData, TermExtraData};
use crate::model::{
    ConnectionContext, ConnectionDirection, ConnectionType, NewTerm, Payload, PostId, PostUpdate,
    PullItem, TermId, META_ATTACHMENT_ALT, META_ORIGINAL_MEDIA_ID, META_ORIGINAL_MEDIA_URL,
};
use crate::registry::DataKind;
use crate::site::Site;

/// Outcome of resolving one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
    /// A local copy already existed.
    Existing(T),
    /// A local copy was created for this reference.
    Created(T),
    /// Nothing usable; the source id is kept.
    Fallback(T),
}

impl<T: Copy> Resolution<T> {
    pub fn id(&self) -> T {
        match self {
            Resolution::Existing(id) | Resolution::Created(id) | Resolution::Fallback(id) => *id,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback(_))
    }
}

pub struct IdentityResolver<'a> {
    site: &'a Site,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(site: &'a Site) -> Self {
        Self { site }
    }

    /// Resolves a reference of a built-in kind from its raw extra data.
    pub async fn resolve_or_create(
        &self,
        kind: DataKind,
        extra_data: &Value,
        source_id: u64,
        payload: &Payload,
        connection: Option<&ConnectionContext>,
    ) -> Resolution<u64> {
        match kind {
            DataKind::Media => match MediaExtraData::from_value(extra_data) {
                Some(media) => self.resolve_media(&media, source_id).await,
                None => Resolution::Fallback(source_id),
            },
            DataKind::Post => match PostExtraData::from_value(extra_data) {
                Some(post) => self.resolve_post(&post, source_id, payload, connection).await,
                None => Resolution::Fallback(source_id),
            },
            DataKind::Term => match TermExtraData::from_value(extra_data) {
                Some(term) => self.resolve_term(&term, source_id).await,
                None => Resolution::Fallback(source_id),
            },
        }
    }

    /// Finds the attachment previously imported for `source_media_id`, or imports it.
    pub async fn resolve_media(&self, media: &MediaExtraData, source_media_id: PostId) -> Resolution<PostId> {
        if media.url.is_empty() {
            return Resolution::Fallback(source_media_id);
        }

        match self.try_resolve_media(media, source_media_id).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(source_media_id, url = %media.url, error = ?e, "[IDENTITY] Media resolution failed, keeping source id");
                Resolution::Fallback(source_media_id)
            }
        }
    }

    async fn try_resolve_media(
        &self,
        media: &MediaExtraData,
        source_media_id: PostId,
    ) -> Result<Resolution<PostId>, BoxError> {
        let store = &self.site.store;

        if let Some(existing) = store
            .find_attachment_by_original(source_media_id, &media.url)
            .await?
            .filter(|id| *id > 0)
        {
            debug!(source_media_id, media_id = existing, "[IDENTITY] Media already imported");
            return Ok(Resolution::Existing(existing));
        }

        let Some(media_id) = store.import_media(&media.url).await?.filter(|id| *id > 0) else {
            debug!(source_media_id, url = %media.url, "[IDENTITY] Media import produced nothing");
            return Ok(Resolution::Fallback(source_media_id));
        };

        store
            .update_post(PostUpdate {
                id: media_id,
                title: Some(media.title.trim().to_string()),
                excerpt: Some(media.caption.trim().to_string()),
                content: Some(media.description.trim().to_string()),
                mime_type: Some(media.mime_type.trim().to_string()),
            })
            .await?;

        if !media.alt.trim().is_empty() {
            store
                .update_post_meta(media_id, META_ATTACHMENT_ALT, json!(media.alt.trim()))
                .await?;
        }
        store
            .update_post_meta(media_id, META_ORIGINAL_MEDIA_ID, json!(source_media_id))
            .await?;
        store
            .update_post_meta(media_id, META_ORIGINAL_MEDIA_URL, json!(media.url))
            .await?;

        info!(source_media_id, media_id, "[IDENTITY] Imported media");
        Ok(Resolution::Created(media_id))
    }

    /// Finds the local copy of a dependent post, pulling it when the connection allows.
    pub async fn resolve_post(
        &self,
        post: &PostExtraData,
        source_post_id: PostId,
        payload: &Payload,
        connection: Option<&ConnectionContext>,
    ) -> Resolution<PostId> {
        let Some(connection) = connection else {
            return Resolution::Fallback(source_post_id);
        };
        if post.post_type.is_none() && post.post_title.is_none() {
            return Resolution::Fallback(source_post_id);
        }

        match self.find_post(post, source_post_id, connection).await {
            Ok(Some(existing)) => return Resolution::Existing(existing),
            Ok(None) => {}
            Err(e) => {
                warn!(source_post_id, error = ?e, "[IDENTITY] Post lookup failed, keeping source id");
                return Resolution::Fallback(source_post_id);
            }
        }

        let pulls = connection.connection_type == ConnectionType::Internal
            || connection.direction == ConnectionDirection::Pull;
        if !pulls {
            // External pushes carry dependencies ahead of the parent.
            return Resolution::Fallback(source_post_id);
        }

        match self.pull_post(post, source_post_id, payload, connection).await {
            Ok(Some(new_id)) => Resolution::Created(new_id),
            Ok(None) => Resolution::Fallback(source_post_id),
            Err(e) => {
                warn!(
                    source_post_id,
                    connection_id = connection.connection_id,
                    error = ?e,
                    "[IDENTITY] Pulling dependency failed, keeping source id"
                );
                Resolution::Fallback(source_post_id)
            }
        }
    }

    async fn find_post(
        &self,
        post: &PostExtraData,
        source_post_id: PostId,
        connection: &ConnectionContext,
    ) -> Result<Option<PostId>, BoxError> {
        let store = &self.site.store;

        if let Some(hint) = post.remote_post_id {
            if store.get_post(hint).await?.is_some() {
                debug!(source_post_id, post_id = hint, "[IDENTITY] Resolved post from remote id hint");
                return Ok(Some(hint));
            }
        }

        if connection.connection_type == ConnectionType::Internal {
            if let Some(map) = &post.dt_connection_map {
                let here = store.current_site_id().await;
                if let Some(mapped) = map.remote_post_id(ConnectionType::Internal, here) {
                    if store.get_post(mapped).await?.is_some() {
                        debug!(source_post_id, post_id = mapped, "[IDENTITY] Resolved post from connection map");
                        return Ok(Some(mapped));
                    }
                }
            }
        }

        let source_key = connection.connection_type.original_source_meta_key();
        if let Some(found) = store
            .find_post_by_original(source_post_id, source_key, connection.connection_id)
            .await?
        {
            debug!(source_post_id, post_id = found, "[IDENTITY] Resolved post from original id");
            return Ok(Some(found));
        }

        if let Some(title) = post.post_title.as_deref().filter(|t| !t.is_empty()) {
            let post_type = post.post_type.as_deref().unwrap_or("post");
            if let Some(found) = store.find_post_by_title(post_type, title).await? {
                debug!(source_post_id, post_id = found, "[IDENTITY] Resolved post from title");
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    async fn pull_post(
        &self,
        post: &PostExtraData,
        source_post_id: PostId,
        payload: &Payload,
        context: &ConnectionContext,
    ) -> Result<Option<PostId>, BoxError> {
        let store = &self.site.store;
        let connection = self
            .site
            .connections
            .connection(context.connection_type, context.connection_id)
            .await?;

        let item = PullItem {
            remote_post_id: source_post_id,
            post_type: post.post_type.clone().unwrap_or_default(),
            post_status: payload.post_status.clone().unwrap_or_default(),
        };
        let results = connection
            .pull(vec![item], context.distribution.nested())
            .await?;

        let mut pull_errors: BTreeMap<PostId, Value> = BTreeMap::new();
        let new_id = match results.into_iter().next() {
            Some(Ok(new_id)) if new_id > 0 => {
                let media_errors_key = format!("dt_media_errors_{new_id}");
                if let Some(media_errors) = store.get_transient(&media_errors_key).await? {
                    store.delete_transient(&media_errors_key).await?;
                    pull_errors.insert(source_post_id, media_errors);
                }
                Some(new_id)
            }
            Some(Ok(_)) => None,
            Some(Err(message)) => {
                pull_errors.insert(source_post_id, json!([message]));
                None
            }
            None => None,
        };

        if !pull_errors.is_empty() {
            let key = format!(
                "dt_connection_pull_errors_{}_{}",
                context.connection_type, context.connection_id
            );
            warn!(source_post_id, transient = %key, "[IDENTITY] Recording pull errors");
            store
                .set_transient(&key, json!(pull_errors), self.site.config.pull_error_ttl_secs)
                .await?;
        }

        if let Some(new_id) = new_id {
            connection
                .log_sync(BTreeMap::from([(source_post_id, new_id)]))
                .await?;
            info!(source_post_id, post_id = new_id, "[IDENTITY] Pulled dependency");
        }

        Ok(new_id)
    }

    /// Finds the term by slug within its taxonomy, inserting it (and, when
    /// enabled, its ancestors) when missing.
    pub async fn resolve_term(&self, term: &TermExtraData, source_term_id: TermId) -> Resolution<TermId> {
        let store = &self.site.store;
        if term.taxonomy.is_empty() || !store.taxonomy_exists(&term.taxonomy).await {
            return Resolution::Fallback(source_term_id);
        }

        let hooks = &self.site.hooks;
        let process_parent = hooks.distribute_term_parent(self.site.config.distribute_term_parent)
            && store.is_taxonomy_hierarchical(&term.taxonomy).await;
        let update_hierarchy = hooks.update_term_hierarchy(self.site.config.update_term_hierarchy);

        // Root ancestor first, so each parent id is known before its child.
        let chain: Vec<&TermExtraData> = if process_parent {
            let mut chain = term.ancestry();
            chain.reverse();
            chain
        } else {
            vec![term]
        };

        let mut parent_id: TermId = 0;
        let mut resolved = Resolution::Fallback(0);
        for current in chain {
            resolved = self
                .resolve_single_term(current, parent_id, process_parent, update_hierarchy)
                .await;
            parent_id = resolved.id();
        }

        match resolved.id() {
            0 => Resolution::Fallback(source_term_id),
            _ => resolved,
        }
    }

    async fn resolve_single_term(
        &self,
        term: &TermExtraData,
        parent_id: TermId,
        process_parent: bool,
        update_hierarchy: bool,
    ) -> Resolution<TermId> {
        let store = &self.site.store;
        let wants_parent = process_parent && parent_id > 0;

        match store.get_term_by_slug(&term.slug, &term.taxonomy).await {
            Ok(Some(existing)) if existing.id > 0 => {
                if update_hierarchy && wants_parent && existing.parent != parent_id {
                    if let Err(e) = store
                        .update_term_parent(existing.id, &term.taxonomy, parent_id)
                        .await
                    {
                        warn!(term_id = existing.id, parent_id, error = ?e, "[IDENTITY] Could not update term parent");
                    }
                }
                return Resolution::Existing(existing.id);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(slug = %term.slug, taxonomy = %term.taxonomy, error = ?e, "[IDENTITY] Term lookup failed");
                return Resolution::Fallback(0);
            }
        }

        let new_term = NewTerm {
            name: term.name.clone(),
            taxonomy: term.taxonomy.clone(),
            slug: term.slug.clone(),
            description: term.description.clone(),
            parent: wants_parent.then_some(parent_id),
        };
        match store.insert_term(new_term).await {
            Ok(id) if id > 0 => {
                info!(term_id = id, slug = %term.slug, taxonomy = %term.taxonomy, "[IDENTITY] Inserted term");
                Resolution::Created(id)
            }
            Ok(_) => Resolution::Fallback(0),
            Err(e) => {
                warn!(slug = %term.slug, taxonomy = %term.taxonomy, error = ?e, "[IDENTITY] Could not insert term");
                Resolution::Fallback(0)
            }
        }
    }
}
