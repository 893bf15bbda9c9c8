//! Built-in and custom callbacks of registered data, dispatched by handler variant.
//!
//! The sending side calls [`pre_distribute`] once per occurrence to build that
//! occurrence's extra data. The receiving side calls [`post_distribute`] with
//! the matching extra data and gets back the replacement, if any.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::identity::IdentityResolver;
use crate::model::{
    value_as_id, ConnectionContext, ConnectionMap, Payload, PostId, TermId, META_ATTACHMENT_ALT,
    META_CONNECTION_MAP, META_ORIGINAL_POST_ID, POST_TYPE_ATTACHMENT,
};
use crate::registry::{DataKind, Handler, PostDistributeInput, RegisteredData};
use crate::site::Site;
use crate::walker::{InnerReplacement, Replacement};

/// What the receiving side needs to import an attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaExtraData {
    pub title: String,
    pub caption: String,
    pub description: String,
    pub alt: String,
    pub url: String,
    pub guid: Option<String>,
    pub mime_type: String,
}

impl MediaExtraData {
    /// `None` when the value carries no `url`.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("url")?;
        serde_json::from_value(value.clone())
            .map_err(|e| debug!(error = %e, "Unreadable media extra data"))
            .ok()
    }
}

/// What the receiving side needs to find or pull a dependent post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostExtraData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_title: Option<String>,
    #[serde(deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub source_post_id: Option<PostId>,
    #[serde(deserialize_with = "lenient_map", skip_serializing_if = "Option::is_none")]
    pub dt_connection_map: Option<ConnectionMap>,
    /// Set by the sender after pushing the dependency ahead of its parent.
    #[serde(deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub remote_post_id: Option<PostId>,
}

impl PostExtraData {
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone())
            .map_err(|e| debug!(error = %e, "Unreadable post extra data"))
            .ok()
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_as_id(&Value::deserialize(deserializer)?))
}

fn lenient_map<'de, D>(deserializer: D) -> Result<Option<ConnectionMap>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = ConnectionMap::from_meta(Some(Value::deserialize(deserializer)?));
    Ok((!map.is_empty()).then_some(map))
}

/// A term and, when parents are carried, its ancestors nested under `parent`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermExtraData {
    pub term_id: TermId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub taxonomy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<TermExtraData>>,
}

impl TermExtraData {
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() || is_empty_object(value) {
            return None;
        }
        serde_json::from_value(value.clone())
            .map_err(|e| debug!(error = %e, "Unreadable term extra data"))
            .ok()
    }

    /// This term followed by its ancestors, nearest first. Stops at a repeated id.
    pub fn ancestry(&self) -> Vec<&TermExtraData> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(term) = current {
            if term.term_id > 0 && !seen.insert(term.term_id) {
                break;
            }
            chain.push(term);
            current = term.parent.as_deref().filter(|parent| parent.term_id > 0);
        }
        chain
    }
}

fn empty_extra_data() -> Value {
    Value::Object(Map::new())
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(Map::is_empty)
}

/// Extra data for one occurrence, `{}` when there is nothing to ship.
pub async fn pre_distribute(
    site: &Site,
    entry: &RegisteredData,
    source: &Value,
    source_post_id: PostId,
) -> Value {
    match &entry.handler {
        Handler::Builtin(kind) => {
            let Some(id) = value_as_id(source) else {
                return empty_extra_data();
            };
            let prepared = match kind {
                DataKind::Media => prepare_media(site, id).await,
                DataKind::Post => prepare_post(site, id).await,
                DataKind::Term => prepare_term(site, id).await,
            };
            prepared.unwrap_or_else(empty_extra_data)
        }
        Handler::Custom(custom) => match &custom.pre_distribute {
            Some(callback) => callback(source, source_post_id),
            None => empty_extra_data(),
        },
    }
}

async fn prepare_media(site: &Site, media_id: PostId) -> Option<Value> {
    let media = match site.store.get_post(media_id).await {
        Ok(media) => media?,
        Err(e) => {
            warn!(media_id, error = ?e, "Could not load attachment");
            return None;
        }
    };
    if media.post_type != POST_TYPE_ATTACHMENT {
        return None;
    }

    let url = site
        .store
        .attachment_url(media_id)
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    let alt = site
        .store
        .get_post_meta(media_id, META_ATTACHMENT_ALT)
        .await
        .ok()
        .flatten()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    let extra = MediaExtraData {
        title: media.title,
        caption: media.excerpt,
        description: media.content,
        alt,
        guid: Some(media.guid.unwrap_or_else(|| url.clone())),
        url,
        mime_type: media.mime_type,
    };
    serde_json::to_value(extra).ok()
}

async fn prepare_post(site: &Site, post_id: PostId) -> Option<Value> {
    let store = &site.store;
    let post = match store.get_post(post_id).await {
        Ok(post) => post?,
        Err(e) => {
            warn!(post_id, error = ?e, "Could not load dependent post");
            return None;
        }
    };

    // Copies received from elsewhere are never re-exported.
    let received = store
        .get_post_meta(post_id, META_ORIGINAL_POST_ID)
        .await
        .ok()
        .flatten()
        .is_some_and(|v| !v.is_null());
    if received {
        debug!(post_id, "Dependent post is not a source post, skipping");
        return None;
    }

    let map = ConnectionMap::from_meta(store.get_post_meta(post_id, META_CONNECTION_MAP).await.ok().flatten());
    let extra = PostExtraData {
        post_type: Some(post.post_type),
        post_title: Some(post.title),
        source_post_id: Some(post_id),
        dt_connection_map: (!map.is_empty()).then_some(map),
        remote_post_id: None,
    };
    serde_json::to_value(extra).ok()
}

async fn prepare_term(site: &Site, term_id: TermId) -> Option<Value> {
    let with_parents = site.hooks.distribute_term_parent(site.config.distribute_term_parent);
    let term = prepare_term_chain(site, term_id, with_parents).await?;
    serde_json::to_value(term).ok()
}

/// Loads a term and, when asked and the taxonomy is hierarchical, its full parent chain.
pub async fn prepare_term_chain(site: &Site, term_id: TermId, with_parents: bool) -> Option<TermExtraData> {
    let store = &site.store;
    let leaf = store.get_term(term_id).await.ok().flatten()?;

    let mut chain = vec![leaf];
    let hierarchical = with_parents && store.is_taxonomy_hierarchical(&chain[0].taxonomy).await;
    if hierarchical {
        let mut seen = HashSet::from([term_id]);
        let mut parent = chain[0].parent;
        while parent > 0 && seen.insert(parent) {
            match store.get_term(parent).await {
                Ok(Some(term)) => {
                    parent = term.parent;
                    chain.push(term);
                }
                _ => break,
            }
        }
    }

    // Fold from the root ancestor down so each child owns its parent.
    chain.into_iter().rev().fold(None, |parent, term| {
        Some(TermExtraData {
            term_id: term.id,
            name: term.name,
            slug: term.slug,
            description: term.description,
            taxonomy: term.taxonomy,
            parent: parent.map(Box::new),
        })
    })
}

/// Replacement for one occurrence on the receiving side, `None` to keep it.
pub async fn post_distribute(
    site: &Site,
    entry: &RegisteredData,
    extra_data: &Value,
    source: &Value,
    payload: &Payload,
    connection: Option<&ConnectionContext>,
) -> Option<Replacement> {
    match &entry.handler {
        Handler::Builtin(kind) => {
            let source_id = value_as_id(source)?;
            let resolution = IdentityResolver::new(site)
                .resolve_or_create(*kind, extra_data, source_id, payload, connection)
                .await;
            if resolution.is_fallback() {
                return None;
            }

            let new_id = resolution.id();
            let replacement = Replacement::new(json!(new_id));
            if *kind != DataKind::Media {
                return Some(replacement);
            }
            let inner = media_inner_replacements(site, extra_data, source_id, new_id).await;
            Some(replacement.with_inner_content(inner))
        }
        Handler::Custom(custom) => {
            let callback = custom.post_distribute.as_ref()?;
            let value = callback(PostDistributeInput {
                extra_data,
                source,
                payload,
                connection,
            })?;
            Some(Replacement::from_value(value))
        }
    }
}

/// Markup fixes after swapping an image: its url, its `wp-image-<id>` class and its guid.
async fn media_inner_replacements(
    site: &Site,
    extra_data: &Value,
    source_id: PostId,
    new_id: PostId,
) -> Vec<InnerReplacement> {
    let from_url = extra_data.get("url").and_then(Value::as_str).unwrap_or_default();
    let to_url = site
        .store
        .attachment_url(new_id)
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    if from_url.is_empty() || to_url.is_empty() {
        return Vec::new();
    }

    let mut replacements = vec![
        InnerReplacement::new(from_url, to_url.as_str()),
        InnerReplacement::new(format!("wp-image-{source_id}"), format!("wp-image-{new_id}")),
    ];
    if let Some(guid) = extra_data.get("guid").and_then(Value::as_str).filter(|g| !g.is_empty()) {
        replacements.push(InnerReplacement::new(guid, to_url.as_str()));
    }
    replacements
}
