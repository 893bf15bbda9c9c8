//! # registry: declared rules for data that must be rewritten on distribution
//!
//! A registration names where a reference lives (a meta key, a block
//! attribute, a shortcode attribute) and how to carry it across sites: either
//! one of the built-in kinds (`media`, `post`, `term`) or a pair of custom
//! callbacks.
//!
//! The [`Registry`] is built once at startup and handed to the processor and
//! orchestrator by reference. Invalid registrations are reported as
//! [`RegistrationIssue`]s and logged, but still stored, the same way a
//! misconfigured integration degrades rather than aborting the request.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RegistrationConfig;
use crate::model::{ConnectionContext, Payload, PostId};
use crate::walker::AttributeKeys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    PostMeta,
    PostContent,
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post_meta" => Ok(Location::PostMeta),
            "post_content" => Ok(Location::PostContent),
            other => Err(format!("unknown location '{other}'")),
        }
    }
}

/// Where inside the location the reference sits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_key: Option<AttributeKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_attribute: Option<AttributeKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcode_attribute: Option<AttributeKeys>,
}

impl DataAttributes {
    pub fn meta_keys(&self) -> Option<&AttributeKeys> {
        self.meta_key.as_ref().filter(|keys| !keys.is_empty())
    }

    /// Block name and attribute keys, when both are usable.
    pub fn block_target(&self) -> Option<(&str, &AttributeKeys)> {
        let name = self.block_name.as_deref().filter(|n| !n.is_empty())?;
        let keys = self.block_attribute.as_ref().filter(|k| !k.is_empty())?;
        Some((name, keys))
    }

    /// Shortcode name and attribute keys, when both are usable.
    pub fn shortcode_target(&self) -> Option<(&str, &AttributeKeys)> {
        let name = self.shortcode.as_deref().filter(|n| !n.is_empty())?;
        let keys = self.shortcode_attribute.as_ref().filter(|k| !k.is_empty())?;
        Some((name, keys))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Media,
    Post,
    Term,
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "media" => Ok(DataKind::Media),
            "post" => Ok(DataKind::Post),
            "term" => Ok(DataKind::Term),
            other => Err(format!("unknown data kind '{other}'")),
        }
    }
}

/// Arguments of a custom post-distribute callback.
pub struct PostDistributeInput<'a> {
    /// Extra data of this occurrence, `{}` when the sender shipped none.
    pub extra_data: &'a Value,
    /// The attribute value(s) as found in the received content.
    pub source: &'a Value,
    pub payload: &'a Payload,
    pub connection: Option<&'a ConnectionContext>,
}

/// Source side: (attribute value(s), source post id) -> extra data.
pub type PreDistributeFn = Arc<dyn Fn(&Value, PostId) -> Value + Send + Sync>;
/// Receiving side: replacement value, or `None` to keep the original.
pub type PostDistributeFn = Arc<dyn Fn(PostDistributeInput<'_>) -> Option<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub struct CustomHandler {
    pub pre_distribute: Option<PreDistributeFn>,
    pub post_distribute: Option<PostDistributeFn>,
}

/// How an entry's references are carried across.
#[derive(Clone)]
pub enum Handler {
    Builtin(DataKind),
    Custom(CustomHandler),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Builtin(kind) => f.debug_tuple("Builtin").field(kind).finish(),
            Handler::Custom(custom) => f
                .debug_struct("Custom")
                .field("pre_distribute", &custom.pre_distribute.is_some())
                .field("post_distribute", &custom.post_distribute.is_some())
                .finish(),
        }
    }
}

/// Registration arguments as an integrator supplies them.
#[derive(Clone, Default)]
pub struct DataArgs {
    pub location: String,
    pub attributes: DataAttributes,
    pub kind: Option<String>,
    pub pre_distribute: Option<PreDistributeFn>,
    pub post_distribute: Option<PostDistributeFn>,
}

/// A stored registration.
#[derive(Debug, Clone)]
pub struct RegisteredData {
    pub key: String,
    /// `None` when the registration named an unknown location; such entries are never processed.
    pub location: Option<Location>,
    pub attributes: DataAttributes,
    pub kind: Option<DataKind>,
    pub handler: Handler,
}

impl RegisteredData {
    pub fn has_pre_distribute(&self) -> bool {
        match &self.handler {
            Handler::Builtin(_) => true,
            Handler::Custom(custom) => custom.pre_distribute.is_some(),
        }
    }

    pub fn has_post_distribute(&self) -> bool {
        match &self.handler {
            Handler::Builtin(_) => true,
            Handler::Custom(custom) => custom.post_distribute.is_some(),
        }
    }
}

/// A problem found while registering. Registration proceeds regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationIssue {
    InvalidLocation(String),
    MissingMetaKey,
    InvalidKind(String),
    KindWithCustomCallbacks,
}

impl fmt::Display for RegistrationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationIssue::InvalidLocation(location) => write!(
                f,
                "Invalid data location '{location}'. It must be either post_meta or post_content."
            ),
            RegistrationIssue::MissingMetaKey => {
                write!(f, "Invalid data attributes. meta_key is required for post_meta location.")
            }
            RegistrationIssue::InvalidKind(kind) => write!(
                f,
                "Invalid data type '{kind}'. It must be either media, post, or term."
            ),
            RegistrationIssue::KindWithCustomCallbacks => {
                write!(f, "If type is set, custom callbacks cannot be used.")
            }
        }
    }
}

/// Table of registrations, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegisteredData>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from file-declared registrations, logging any issues.
    pub fn from_config(registrations: &[RegistrationConfig]) -> Self {
        let mut registry = Self::new();
        for registration in registrations {
            registry.register(&registration.key, registration.to_args());
        }
        registry
    }

    /// Stores (or replaces) the registration under `key`.
    ///
    /// A valid `kind` installs the built-in handler and overrides any custom
    /// callbacks. Every issue found is logged and returned.
    pub fn register(&mut self, key: &str, args: DataArgs) -> Vec<RegistrationIssue> {
        let mut issues = Vec::new();

        let location = match args.location.parse::<Location>() {
            Ok(location) => Some(location),
            Err(_) => {
                issues.push(RegistrationIssue::InvalidLocation(args.location.clone()));
                None
            }
        };

        if location == Some(Location::PostMeta) && args.attributes.meta_keys().is_none() {
            issues.push(RegistrationIssue::MissingMetaKey);
        }

        let kind = match args.kind.as_deref().filter(|k| !k.is_empty()) {
            Some(raw) => match raw.parse::<DataKind>() {
                Ok(kind) => Some(kind),
                Err(_) => {
                    issues.push(RegistrationIssue::InvalidKind(raw.to_string()));
                    None
                }
            },
            None => None,
        };

        let has_custom = args.pre_distribute.is_some() || args.post_distribute.is_some();
        if kind.is_some() && has_custom {
            issues.push(RegistrationIssue::KindWithCustomCallbacks);
        }

        for issue in &issues {
            warn!(data_key = key, issue = %issue, "[REGISTRY] Registration issue");
        }

        let handler = match kind {
            Some(kind) => Handler::Builtin(kind),
            None => Handler::Custom(CustomHandler {
                pre_distribute: args.pre_distribute,
                post_distribute: args.post_distribute,
            }),
        };

        let entry = RegisteredData {
            key: key.to_string(),
            location,
            attributes: args.attributes,
            kind,
            handler,
        };
        debug!(data_key = key, ?entry, "[REGISTRY] Registered data");

        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }

        issues
    }

    pub fn get(&self, key: &str) -> Option<&RegisteredData> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn all(&self) -> &[RegisteredData] {
        &self.entries
    }

    pub fn of_kind(&self, kind: DataKind) -> impl Iterator<Item = &RegisteredData> {
        self.entries.iter().filter(move |e| e.kind == Some(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
