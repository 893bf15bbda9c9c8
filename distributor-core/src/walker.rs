//! # walker: locate and rewrite references embedded in block trees
//!
//! Content is a list of [`Block`] nodes, each owning its children. A
//! [`BlockMatcher`] names the block of interest and the attribute key(s) that
//! carry a reference. Walking is depth-first, pre-order; every matching node is
//! one [`Occurrence`] and its `index` is the position in that order.
//!
//! The sending side uses [`collect_block_occurrences`] to build extra data, the
//! receiving side uses [`rewrite_blocks`] to apply replacements. Both run the
//! same traversal, so the Nth extra-data entry always belongs to the Nth
//! occurrence.
//!
//! Rendered markup (`innerHTML`, `innerContent`) duplicates some attributes
//! (image URLs, `wp-image-<id>` classes). A [`Replacement`] can carry literal
//! [`InnerReplacement`]s that keep that copy consistent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of a parsed block tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// `None` for freeform (classic) content between blocks.
    #[serde(default)]
    pub block_name: Option<String>,
    #[serde(default, deserialize_with = "attrs_or_empty")]
    pub attrs: Map<String, Value>,
    #[serde(default, rename = "innerHTML")]
    pub inner_html: String,
    #[serde(default)]
    pub inner_content: Vec<Option<String>>,
    #[serde(default)]
    pub inner_blocks: Vec<Block>,
}

// Parsers emit `[]` for blocks without attributes.
fn attrs_or_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

impl Block {
    pub fn is_named(&self, name: &str) -> bool {
        self.block_name.as_deref() == Some(name)
    }
}

/// A single attribute key, or a list of keys read and written together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeKeys {
    Single(String),
    Multi(Vec<String>),
}

impl AttributeKeys {
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeKeys::Single(key) => key.is_empty(),
            AttributeKeys::Multi(keys) => keys.is_empty(),
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        match self {
            AttributeKeys::Single(key) => vec![key.as_str()],
            AttributeKeys::Multi(keys) => keys.iter().map(String::as_str).collect(),
        }
    }

    /// Builds the source data handed to a callback.
    ///
    /// Single-key mode yields the attribute value, or `None` when the node does
    /// not carry it (the node is then not an occurrence). Multi-key mode always
    /// yields an object holding whichever keys are present.
    pub fn source_data<F>(&self, lookup: F) -> Option<Value>
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self {
            AttributeKeys::Single(key) => lookup(key),
            AttributeKeys::Multi(keys) => {
                let found: Map<String, Value> = keys
                    .iter()
                    .filter_map(|key| lookup(key).map(|value| (key.clone(), value)))
                    .collect();
                Some(Value::Object(found))
            }
        }
    }

    /// Writes a replacement back through `assign`.
    ///
    /// Multi-key mode only merges the listed keys that the replacement carries.
    pub fn merge<F>(&self, replacement: &Value, mut assign: F)
    where
        F: FnMut(&str, Value),
    {
        match self {
            AttributeKeys::Single(key) => assign(key, replacement.clone()),
            AttributeKeys::Multi(keys) => {
                if let Value::Object(values) = replacement {
                    for key in keys {
                        if let Some(value) = values.get(key) {
                            assign(key, value.clone());
                        }
                    }
                }
            }
        }
    }
}

/// Which nodes a walk is interested in.
#[derive(Debug, Clone, Copy)]
pub struct BlockMatcher<'a> {
    pub block_name: &'a str,
    pub keys: &'a AttributeKeys,
}

impl<'a> BlockMatcher<'a> {
    pub fn new(block_name: &'a str, keys: &'a AttributeKeys) -> Self {
        Self { block_name, keys }
    }
}

/// A tracked reference found during a walk.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub index: usize,
    pub source: Value,
}

/// Literal search/replace applied to a node's rendered markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerReplacement {
    pub search: String,
    pub replace: String,
}

impl InnerReplacement {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }
}

/// New value for an occurrence, plus optional markup fixes.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub value: Value,
    pub inner_content_replacements: Vec<InnerReplacement>,
}

impl Replacement {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            inner_content_replacements: Vec::new(),
        }
    }

    pub fn with_inner_content(mut self, replacements: Vec<InnerReplacement>) -> Self {
        self.inner_content_replacements = replacements;
        self
    }

    /// Interprets a loosely-typed callback result. An object may carry its own
    /// `inner_content_replacements` list next to the attribute values.
    pub fn from_value(value: Value) -> Self {
        let inner = value
            .get("inner_content_replacements")
            .cloned()
            .and_then(|raw| serde_json::from_value::<Vec<InnerReplacement>>(raw).ok())
            .unwrap_or_default();
        Self::new(value).with_inner_content(inner)
    }

    pub fn is_empty(&self) -> bool {
        is_empty_value(&self.value)
    }
}

/// Emptiness as callbacks understand it: null, false, 0, "", "0", [] and {}.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// True when `name` appears anywhere in the tree.
pub fn has_block(blocks: &[Block], name: &str) -> bool {
    blocks
        .iter()
        .any(|block| block.is_named(name) || has_block(&block.inner_blocks, name))
}

/// Lists every occurrence in traversal order without changing the tree.
pub fn collect_block_occurrences(blocks: &[Block], matcher: BlockMatcher<'_>) -> Vec<Occurrence> {
    let mut scratch = blocks.to_vec();
    let mut found = Vec::new();
    rewrite_blocks(&mut scratch, matcher, |occurrence| {
        found.push(occurrence.clone());
        None
    });
    found
}

/// Rewrites matching nodes in place. Returns whether anything changed.
///
/// `transform` is called once per occurrence, in depth-first pre-order; a
/// `None` or empty replacement leaves the node untouched but still consumes its
/// index.
pub fn rewrite_blocks<F>(blocks: &mut [Block], matcher: BlockMatcher<'_>, mut transform: F) -> bool
where
    F: FnMut(&Occurrence) -> Option<Replacement>,
{
    let mut index = 0;
    walk(blocks, matcher, &mut index, &mut transform)
}

fn walk<F>(blocks: &mut [Block], matcher: BlockMatcher<'_>, index: &mut usize, transform: &mut F) -> bool
where
    F: FnMut(&Occurrence) -> Option<Replacement>,
{
    let mut changed = false;

    for block in blocks.iter_mut() {
        if block.is_named(matcher.block_name) {
            let source = matcher
                .keys
                .source_data(|key| block.attrs.get(key).cloned());
            if let Some(source) = source {
                let occurrence = Occurrence {
                    index: *index,
                    source,
                };
                *index += 1;

                if let Some(replacement) = transform(&occurrence).filter(|r| !r.is_empty()) {
                    matcher.keys.merge(&replacement.value, |key, value| {
                        block.attrs.insert(key.to_string(), value);
                    });
                    search_replace_inner_content(block, &replacement.inner_content_replacements);
                    changed = true;
                }
            }
        }

        if !block.inner_blocks.is_empty() && walk(&mut block.inner_blocks, matcher, index, transform) {
            changed = true;
        }
    }

    changed
}

/// Applies literal replacements to the rendered markup of one node.
pub fn search_replace_inner_content(block: &mut Block, replacements: &[InnerReplacement]) {
    for r in replacements.iter().filter(|r| !r.search.is_empty()) {
        block.inner_html = block.inner_html.replace(&r.search, &r.replace);
        for chunk in block.inner_content.iter_mut().flatten() {
            *chunk = chunk.replace(&r.search, &r.replace);
        }
    }
}
