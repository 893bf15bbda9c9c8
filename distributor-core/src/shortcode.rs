//! Shortcode attribute rewriting over raw markup.
//!
//! Only the opening tag of a shortcode is touched: its attribute string is
//! parsed, the tracked attribute(s) replaced, and the string serialized back
//! into the same span. Enclosed content, closing tags, escaped shortcodes
//! (`[[name]]`) and other shortcodes are left as they are.
//!
//! Block content is never scanned as one string: the serialized tree is not
//! markup. [`rewrite_block_shortcodes`] visits each block's own markup chunks
//! in document order instead and leaves the tree for the caller to serialize.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::walker::{AttributeKeys, Block, Occurrence, Replacement};

static ATTRIBUTE_REGEX: OnceLock<Regex> = OnceLock::new();
static ENTITY_REGEX: OnceLock<Regex> = OnceLock::new();
static INVISIBLE_SPACE_REGEX: OnceLock<Regex> = OnceLock::new();

fn attribute_regex() -> &'static Regex {
    ATTRIBUTE_REGEX.get_or_init(|| {
        Regex::new(
            r#"([\w-]+)\s*=\s*"([^"]*)"(?:\s|$)|([\w-]+)\s*=\s*'([^']*)'(?:\s|$)|([\w-]+)\s*=\s*([^\s'"]+)(?:\s|$)|"([^"]*)"(?:\s|$)|'([^']*)'(?:\s|$)|(\S+)(?:\s|$)"#,
        )
        .expect("Shortcode attribute regex is valid")
    })
}

fn entity_regex() -> &'static Regex {
    ENTITY_REGEX.get_or_init(|| {
        Regex::new(r"^(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);")
            .expect("Entity regex is valid")
    })
}

fn invisible_space_regex() -> &'static Regex {
    INVISIBLE_SPACE_REGEX
        .get_or_init(|| Regex::new("[\u{00a0}\u{200b}]+").expect("Invisible space regex is valid"))
}

/// Opening-tag pattern for one shortcode name.
///
/// Groups: 1 escape `[`, 2 name, 3 attribute string, 4 self-closing `/`, 5 escape `]`.
fn tag_regex(shortcode: &str) -> Option<Regex> {
    let pattern = format!(
        r"\[(\[?)({})(\s[^\]]*?)?(/)?\](\]?)",
        regex::escape(shortcode)
    );
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(shortcode, error = %e, "Could not build shortcode pattern");
            None
        }
    }
}

fn is_escaped(caps: &Captures<'_>) -> bool {
    caps.get(1).is_some_and(|m| !m.as_str().is_empty())
        && caps.get(5).is_some_and(|m| !m.as_str().is_empty())
}

/// Parsed attribute string of a shortcode, in source order.
///
/// Named attributes are keyed by their lowercased name; positional values have no key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortcodeAttrs {
    entries: Vec<(Option<String>, String)>,
}

impl ShortcodeAttrs {
    pub fn parse(text: &str) -> Self {
        let text = invisible_space_regex().replace_all(text, " ");
        let mut entries = Vec::new();

        for caps in attribute_regex().captures_iter(&text) {
            let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());
            let entry = if let (Some(k), Some(v)) = (group(1), group(2)) {
                (Some(k.to_lowercase()), v)
            } else if let (Some(k), Some(v)) = (group(3), group(4)) {
                (Some(k.to_lowercase()), v)
            } else if let (Some(k), Some(v)) = (group(5), group(6)) {
                (Some(k.to_lowercase()), v)
            } else if let Some(v) = group(7).or_else(|| group(8)).or_else(|| group(9)) {
                (None, v)
            } else {
                continue;
            };
            entries.push(entry);
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_deref() == Some(key))
            .map(|(_, v)| v.as_str())
    }

    /// Overwrites an existing attribute in place or appends a new one.
    pub fn set(&mut self, key: &str, value: String) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.as_deref() == Some(key))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((Some(key.to_string()), value)),
        }
    }

    /// Serializes back to ` key="value"` pairs, escaping values.
    pub fn to_attr_string(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| match key {
                Some(key) => format!(r#" {}="{}""#, key, esc_attr(value)),
                None => format!(r#" "{}""#, esc_attr(value)),
            })
            .collect()
    }
}

/// HTML-attribute escaping that leaves existing entities intact.
pub fn esc_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, ch) in value.char_indices() {
        match ch {
            '&' if entity_regex().is_match(&value[i + 1..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

fn value_to_attr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn source_data(keys: &AttributeKeys, attrs: &ShortcodeAttrs) -> Option<Value> {
    keys.source_data(|key| attrs.get(key).map(|v| Value::String(v.to_string())))
}

/// True when the markup contains an unescaped `shortcode`.
pub fn has_shortcode(markup: &str, shortcode: &str) -> bool {
    if shortcode.is_empty() || !markup.contains('[') {
        return false;
    }
    tag_regex(shortcode)
        .map(|re| re.captures_iter(markup).any(|caps| !is_escaped(&caps)))
        .unwrap_or(false)
}

/// Lists every occurrence of `shortcode` carrying the tracked attribute(s).
pub fn collect_shortcode_occurrences(
    markup: &str,
    shortcode: &str,
    keys: &AttributeKeys,
) -> Vec<Occurrence> {
    let mut found = Vec::new();
    rewrite_shortcode_occurrences(markup, shortcode, keys, |occurrence| {
        found.push(occurrence.clone());
        None
    });
    found
}

/// Rewrites the tracked attribute(s) of each `shortcode` occurrence.
///
/// Occurrences are numbered from 0 in markup order. A `None` or empty
/// replacement leaves the tag byte-for-byte unchanged.
pub fn rewrite_shortcode_occurrences<F>(
    markup: &str,
    shortcode: &str,
    keys: &AttributeKeys,
    mut transform: F,
) -> String
where
    F: FnMut(&Occurrence) -> Option<Replacement>,
{
    let Some(re) = tag_regex(shortcode) else {
        return markup.to_string();
    };
    let mut index = 0;

    re.replace_all(markup, |caps: &Captures<'_>| {
        let whole = &caps[0];
        if is_escaped(caps) {
            return whole.to_string();
        }

        let attr_text = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let mut attrs = ShortcodeAttrs::parse(attr_text);
        let Some(source) = source_data(keys, &attrs) else {
            return whole.to_string();
        };

        let occurrence = Occurrence { index, source };
        index += 1;

        let Some(replacement) = transform(&occurrence).filter(|r| !r.is_empty()) else {
            return whole.to_string();
        };
        keys.merge(&replacement.value, |key, value| {
            attrs.set(key, value_to_attr(&value));
        });

        // Splice the new attribute string where the old one was, or right after the name.
        let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let (start, end) = match (caps.get(3), caps.get(2)) {
            (Some(m), _) => (m.start() - offset, m.end() - offset),
            (None, Some(name)) => (name.end() - offset, name.end() - offset),
            (None, None) => return whole.to_string(),
        };
        let trailing = &attr_text[attr_text.trim_end().len()..];
        format!("{}{}{}{}", &whole[..start], attrs.to_attr_string(), trailing, &whole[end..])
    })
    .into_owned()
}

/// Lists every occurrence of `shortcode` inside a block tree, in document order.
pub fn collect_block_shortcode_occurrences(
    blocks: &[Block],
    shortcode: &str,
    keys: &AttributeKeys,
) -> Vec<Occurrence> {
    let mut scratch = blocks.to_vec();
    let mut found = Vec::new();
    rewrite_block_shortcodes(&mut scratch, shortcode, keys, |occurrence| {
        found.push(occurrence.clone());
        None
    });
    found
}

/// Rewrites `shortcode` occurrences in the markup of every block. Returns
/// whether anything changed.
///
/// A block's `innerContent` chunks are visited in order, descending into the
/// child block at each `null` placeholder. Blocks without `innerContent` are
/// read from `innerHTML`, then their children. `innerHTML` is kept in step with
/// the rewritten chunks.
pub fn rewrite_block_shortcodes<F>(
    blocks: &mut [Block],
    shortcode: &str,
    keys: &AttributeKeys,
    mut transform: F,
) -> bool
where
    F: FnMut(&Occurrence) -> Option<Replacement>,
{
    let mut index = 0;
    walk_blocks(blocks, shortcode, keys, &mut index, &mut transform)
}

fn walk_blocks<F>(
    blocks: &mut [Block],
    shortcode: &str,
    keys: &AttributeKeys,
    index: &mut usize,
    transform: &mut F,
) -> bool
where
    F: FnMut(&Occurrence) -> Option<Replacement>,
{
    let mut changed = false;

    for block in blocks.iter_mut() {
        if block.inner_content.is_empty() {
            let mut own = Vec::new();
            let rewritten = rewrite_chunk(&block.inner_html, shortcode, keys, index, transform, &mut own);
            if rewritten != block.inner_html {
                block.inner_html = rewritten;
                changed = true;
            }
            if walk_blocks(&mut block.inner_blocks, shortcode, keys, index, transform) {
                changed = true;
            }
            continue;
        }

        let mut own = Vec::new();
        let mut children = block.inner_blocks.iter_mut();
        for chunk in block.inner_content.iter_mut() {
            match chunk {
                Some(markup) => {
                    let rewritten = rewrite_chunk(markup, shortcode, keys, index, transform, &mut own);
                    if rewritten != *markup {
                        *markup = rewritten;
                        changed = true;
                    }
                }
                None => {
                    if let Some(child) = children.next() {
                        if walk_blocks(std::slice::from_mut(child), shortcode, keys, index, transform) {
                            changed = true;
                        }
                    }
                }
            }
        }
        // Children without a placeholder still count, after the markup.
        for child in children {
            if walk_blocks(std::slice::from_mut(child), shortcode, keys, index, transform) {
                changed = true;
            }
        }

        if own.iter().any(Option::is_some) {
            block.inner_html = rewrite_shortcode_occurrences(&block.inner_html, shortcode, keys, |o| {
                own.get(o.index).cloned().flatten()
            });
        }
    }

    changed
}

/// Rewrites one markup chunk, numbering its occurrences from `index` on and
/// recording each answer in `own`.
fn rewrite_chunk<F>(
    markup: &str,
    shortcode: &str,
    keys: &AttributeKeys,
    index: &mut usize,
    transform: &mut F,
    own: &mut Vec<Option<Replacement>>,
) -> String
where
    F: FnMut(&Occurrence) -> Option<Replacement>,
{
    if !markup.contains('[') {
        return markup.to_string();
    }
    rewrite_shortcode_occurrences(markup, shortcode, keys, |local| {
        let occurrence = Occurrence {
            index: *index,
            source: local.source.clone(),
        };
        *index += 1;
        let replacement = transform(&occurrence).filter(|r| !r.is_empty());
        own.push(replacement.clone());
        replacement
    })
}
