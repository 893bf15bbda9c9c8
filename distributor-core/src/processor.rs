//! # processor: apply every registration to a payload
//!
//! [`RegisteredDataHandler`] is the entry point on both ends of a distribution:
//!
//! - [`RegisteredDataHandler::prepare_extra_data`] runs on the sending site and
//!   builds the [`ExtraDataEnvelope`] by calling each registration's
//!   pre-distribute handler once per occurrence.
//! - [`RegisteredDataHandler::process`] runs on the receiving site and rewrites
//!   the payload's content and meta with the post-distribute handlers.
//!
//! Both sides enumerate occurrences with the same traversal. Per registration,
//! block occurrences come first (depth-first, pre-order), then shortcode
//! occurrences in markup order. Inside block content, shortcodes are read from
//! each block's own markup rather than from the serialized tree. The Nth
//! extra-data entry therefore always lands on the Nth occurrence.
//!
//! Handlers may do I/O, the walkers do not. Each rewrite therefore runs in three
//! steps: collect occurrences, resolve a replacement for each in order, then
//! rewrite using the resolved list.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::contract::BlockParser;
use crate::handlers::{post_distribute, pre_distribute};
use crate::model::{ConnectionContext, ExtraDataEnvelope, Meta, Payload, PostId};
use crate::registry::{Location, RegisteredData};
use crate::shortcode::{
    collect_block_shortcode_occurrences, collect_shortcode_occurrences, has_shortcode,
    rewrite_block_shortcodes, rewrite_shortcode_occurrences,
};
use crate::site::Site;
use crate::walker::{
    collect_block_occurrences, has_block, rewrite_blocks, AttributeKeys, BlockMatcher, Occurrence,
    Replacement,
};

pub struct RegisteredDataHandler<'a> {
    site: &'a Site,
    connection: Option<ConnectionContext>,
}

impl<'a> RegisteredDataHandler<'a> {
    /// `connection` describes the connection the payload arrives through, if any.
    pub fn new(site: &'a Site, connection: Option<ConnectionContext>) -> Self {
        Self { site, connection }
    }

    fn is_suppressed(&self, payload: &Payload) -> bool {
        if !self.site.hooks.process_extra_data(payload) {
            return true;
        }
        self.connection
            .is_some_and(|c| c.distribution.suppresses_processing())
    }

    /// Rewrites every registered reference in `payload` on the receiving side.
    ///
    /// `is_rest` selects the REST content slot (`raw_content` when present).
    pub async fn process(&self, payload: Payload, is_rest: bool) -> Payload {
        if self.is_suppressed(&payload) {
            debug!(post_id = ?payload.post_id, "[PROCESS] Registered data processing suppressed");
            return payload;
        }
        let registry = &self.site.registry;
        if registry.is_empty() {
            return payload;
        }

        let unprocessed = payload.clone();
        let mut payload = payload;

        for entry in registry.all() {
            if !entry.has_post_distribute() {
                continue;
            }
            let extra_data = payload
                .distributor_extra_data
                .get(&entry.key)
                .cloned()
                .unwrap_or_default();

            match entry.location {
                Some(Location::PostMeta) => self.process_meta(&mut payload, entry, &extra_data).await,
                Some(Location::PostContent) => {
                    self.process_content(&mut payload, entry, &extra_data, is_rest).await
                }
                None => {}
            }
        }

        info!(post_id = ?payload.post_id, entries = registry.len(), "[PROCESS] Registered data processed");
        self.site.hooks.after_registered_data_processed(payload, &unprocessed)
    }

    async fn process_meta(&self, payload: &mut Payload, entry: &RegisteredData, extra_data: &[Value]) {
        let Some(keys) = entry.attributes.meta_keys() else {
            return;
        };
        let meta = payload.meta_for();
        if meta.is_empty() {
            return;
        }
        let Some(source) = meta_source_data(meta, keys) else {
            return;
        };

        let unprocessed = meta.clone();
        let mut updated = meta.clone();
        // Meta is a single occurrence per registration.
        let current = extra_data.first().cloned().unwrap_or_else(|| Value::Object(Map::new()));
        let replacement =
            post_distribute(self.site, entry, &current, &source, payload, self.connection.as_ref()).await;

        if let Some(replacement) = replacement.filter(|r| !r.is_empty()) {
            keys.merge(&replacement.value, |key, value| {
                let wrapped = match updated.get(key) {
                    Some(Value::Array(items)) if items.len() == 1 => Value::Array(vec![value]),
                    _ => value,
                };
                updated.insert(key.to_string(), wrapped);
            });
            debug!(data_key = %entry.key, "[PROCESS] Meta rewritten");
        }

        *payload.meta_for_mut() = self
            .site
            .hooks
            .after_meta_processed(updated, entry, extra_data, &unprocessed);
    }

    async fn process_content(
        &self,
        payload: &mut Payload,
        entry: &RegisteredData,
        extra_data: &[Value],
        is_rest: bool,
    ) {
        let block_target = entry.attributes.block_target();
        let shortcode_target = entry.attributes.shortcode_target();
        if block_target.is_none() && shortcode_target.is_none() {
            return;
        }
        let mut content = payload.content_for(is_rest).to_string();
        if content.is_empty() {
            return;
        }

        let mut offset = 0;

        if let Some((block_name, keys)) = block_target {
            let parser = &self.site.parser;
            if parser.has_blocks(&content) {
                let mut blocks = parser.parse(&content);
                let matcher = BlockMatcher::new(block_name, keys);
                let mut rewritten = content.clone();

                if has_block(&blocks, block_name) {
                    let occurrences = collect_block_occurrences(&blocks, matcher);
                    let replacements = self
                        .resolve_occurrences(entry, &occurrences, extra_data, 0, payload)
                        .await;
                    offset = occurrences.len();

                    if rewrite_blocks(&mut blocks, matcher, |o| replacements.get(o.index).cloned().flatten()) {
                        rewritten = parser.serialize(&blocks);
                        debug!(data_key = %entry.key, block_name, "[PROCESS] Blocks rewritten");
                    }
                }

                content = self
                    .site
                    .hooks
                    .after_block_data_processed(rewritten, entry, extra_data, &content);
            }
        }

        if let Some((shortcode, keys)) = shortcode_target {
            let parser = &self.site.parser;
            let rewritten = if parser.has_blocks(&content) {
                let mut blocks = parser.parse(&content);
                let occurrences = collect_block_shortcode_occurrences(&blocks, shortcode, keys);
                if occurrences.is_empty() {
                    None
                } else {
                    let replacements = self
                        .resolve_occurrences(entry, &occurrences, extra_data, offset, payload)
                        .await;
                    let changed = rewrite_block_shortcodes(&mut blocks, shortcode, keys, |o| {
                        replacements.get(o.index).cloned().flatten()
                    });
                    Some(if changed { parser.serialize(&blocks) } else { content.clone() })
                }
            } else if has_shortcode(&content, shortcode) {
                let occurrences = collect_shortcode_occurrences(&content, shortcode, keys);
                let replacements = self
                    .resolve_occurrences(entry, &occurrences, extra_data, offset, payload)
                    .await;
                Some(rewrite_shortcode_occurrences(&content, shortcode, keys, |o| {
                    replacements.get(o.index).cloned().flatten()
                }))
            } else {
                None
            };

            if let Some(rewritten) = rewritten {
                debug!(data_key = %entry.key, shortcode, "[PROCESS] Shortcodes processed");
                content = self
                    .site
                    .hooks
                    .after_shortcode_data_processed(rewritten, entry, extra_data, &content);
            }
        }

        *payload.content_for_mut(is_rest) = content;
    }

    /// Replacement per occurrence, in order. Missing extra data counts as `{}`.
    async fn resolve_occurrences(
        &self,
        entry: &RegisteredData,
        occurrences: &[Occurrence],
        extra_data: &[Value],
        offset: usize,
        payload: &Payload,
    ) -> Vec<Option<Replacement>> {
        let mut replacements = Vec::with_capacity(occurrences.len());
        for occurrence in occurrences {
            let current = extra_data
                .get(offset + occurrence.index)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            let replacement = post_distribute(
                self.site,
                entry,
                &current,
                &occurrence.source,
                payload,
                self.connection.as_ref(),
            )
            .await;
            replacements.push(replacement);
        }
        replacements
    }

    /// Builds the extra data shipped with `payload` from the sending site.
    pub async fn prepare_extra_data(&self, post_id: PostId, payload: &Payload, is_rest: bool) -> ExtraDataEnvelope {
        let mut envelope = ExtraDataEnvelope::new();
        if !self.site.hooks.process_extra_data(payload) {
            return envelope;
        }

        for entry in self.site.registry.all() {
            if !entry.has_pre_distribute() {
                continue;
            }
            let sources = occurrence_sources(self.site.parser.as_ref(), payload, entry, is_rest);
            if sources.is_empty() {
                continue;
            }

            let mut extra = Vec::with_capacity(sources.len());
            for source in &sources {
                extra.push(pre_distribute(self.site, entry, source, post_id).await);
            }
            debug!(data_key = %entry.key, occurrences = extra.len(), "[PROCESS] Extra data prepared");
            envelope.insert(entry.key.clone(), extra);
        }

        envelope
    }
}

/// Source values of every occurrence of `entry` in `payload`, in the order
/// extra data is aligned to.
pub fn occurrence_sources(
    parser: &dyn BlockParser,
    payload: &Payload,
    entry: &RegisteredData,
    is_rest: bool,
) -> Vec<Value> {
    match entry.location {
        Some(Location::PostMeta) => meta_sources(payload, entry),
        Some(Location::PostContent) => content_sources(parser, payload.content_for(is_rest), entry),
        None => Vec::new(),
    }
}

fn content_sources(parser: &dyn BlockParser, content: &str, entry: &RegisteredData) -> Vec<Value> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut sources = Vec::new();

    if let Some((block_name, keys)) = entry.attributes.block_target() {
        if parser.has_blocks(content) {
            let blocks = parser.parse(content);
            if has_block(&blocks, block_name) {
                sources.extend(
                    collect_block_occurrences(&blocks, BlockMatcher::new(block_name, keys))
                        .into_iter()
                        .map(|o| o.source),
                );
            }
        }
    }

    if let Some((shortcode, keys)) = entry.attributes.shortcode_target() {
        let occurrences = if parser.has_blocks(content) {
            collect_block_shortcode_occurrences(&parser.parse(content), shortcode, keys)
        } else if has_shortcode(content, shortcode) {
            collect_shortcode_occurrences(content, shortcode, keys)
        } else {
            Vec::new()
        };
        sources.extend(occurrences.into_iter().map(|o| o.source));
    }

    sources
}

fn meta_sources(payload: &Payload, entry: &RegisteredData) -> Vec<Value> {
    let meta = payload.meta_for();
    entry
        .attributes
        .meta_keys()
        .and_then(|keys| meta_source_data(meta, keys))
        .into_iter()
        .collect()
}

/// Meta values handed to a handler, single-element lists unwrapped.
///
/// `None` when none of the keys is set.
fn meta_source_data(meta: &Meta, keys: &AttributeKeys) -> Option<Value> {
    let source = keys.source_data(|key| meta.get(key).map(unwrap_single))?;
    match (keys, &source) {
        (AttributeKeys::Multi(_), Value::Object(found)) if found.is_empty() => None,
        _ => Some(source),
    }
}

fn unwrap_single(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        other => other.clone(),
    }
}
