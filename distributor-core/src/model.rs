//! Plain data shared across the pipeline: posts, terms, payloads, connections
//! and the persisted connection map.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type PostId = u64;
pub type TermId = u64;
pub type SiteId = u64;
pub type ConnectionId = u64;
pub type UserId = u64;

/// Meta key holding the [`ConnectionMap`] of a content item.
pub const META_CONNECTION_MAP: &str = "dt_connection_map";
/// Present on items received from another site; suppresses auto-distribution.
pub const META_ORIGINAL_POST_URL: &str = "dt_original_post_url";
pub const META_ORIGINAL_POST_ID: &str = "dt_original_post_id";
pub const META_ORIGINAL_BLOG_ID: &str = "dt_original_blog_id";
pub const META_ORIGINAL_SOURCE_ID: &str = "dt_original_source_id";
pub const META_ORIGINAL_MEDIA_ID: &str = "dt_original_media_id";
pub const META_ORIGINAL_MEDIA_URL: &str = "dt_original_media_url";
pub const META_ATTACHMENT_ALT: &str = "_wp_attachment_image_alt";

pub const POST_TYPE_ATTACHMENT: &str = "attachment";

/// A post, page or attachment as the content store exposes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub post_type: String,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub mime_type: String,
}

/// Field updates applied to an existing post (used after a media import).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostUpdate {
    pub id: PostId,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub content: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub taxonomy: String,
    #[serde(default)]
    pub parent: TermId,
}

/// Arguments for creating a term on the receiving site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTerm {
    pub name: String,
    pub taxonomy: String,
    pub slug: String,
    pub description: String,
    pub parent: Option<TermId>,
}

/// Post meta as carried in a payload. Values are often single-element arrays.
pub type Meta = BTreeMap<String, Value>;

/// Per registered-data key, the extra data of each occurrence in content order.
pub type ExtraDataEnvelope = BTreeMap<String, Vec<Value>>;

/// The outbound/inbound representation of a content item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub post_id: Option<PostId>,
    #[serde(default)]
    pub post_type: String,
    #[serde(default)]
    pub post_title: String,
    #[serde(default)]
    pub post_status: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Unrendered content shipped alongside REST payloads.
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub distributor_meta: Meta,
    #[serde(default)]
    pub distributor_extra_data: ExtraDataEnvelope,
}

impl Payload {
    /// Content a rewrite should operate on. REST payloads prefer the raw copy.
    pub fn content_for(&self, is_rest: bool) -> &str {
        match (&self.raw_content, is_rest) {
            (Some(raw), true) => raw,
            _ => &self.content,
        }
    }

    pub fn content_for_mut(&mut self, is_rest: bool) -> &mut String {
        match (&mut self.raw_content, is_rest) {
            (Some(raw), true) => raw,
            _ => &mut self.content,
        }
    }

    /// Meta map a rewrite should operate on: `meta` when populated, else `distributor_meta`.
    pub fn meta_for(&self) -> &Meta {
        if self.meta.is_empty() {
            &self.distributor_meta
        } else {
            &self.meta
        }
    }

    pub fn meta_for_mut(&mut self) -> &mut Meta {
        if self.meta.is_empty() {
            &mut self.distributor_meta
        } else {
            &mut self.meta
        }
    }

    pub fn status_or(&self, default: &str) -> String {
        self.post_status
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Internal,
    External,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Internal => "internal",
            ConnectionType::External => "external",
        }
    }

    /// Meta key tagging a received post with the id of the site or connection it came from.
    pub fn original_source_meta_key(&self) -> &'static str {
        match self {
            ConnectionType::Internal => META_ORIGINAL_BLOG_ID,
            ConnectionType::External => META_ORIGINAL_SOURCE_ID,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(ConnectionType::Internal),
            "external" => Ok(ConnectionType::External),
            other => Err(format!("unknown connection type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    Push,
    Pull,
}

/// Recursion state threaded through a distribution.
///
/// Pushing or pulling a dependency runs with [`DistributionContext::nested`];
/// registered-data processing is skipped once `depth` reaches `max_depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionContext {
    pub depth: u32,
    pub max_depth: u32,
}

impl DistributionContext {
    pub fn new(max_depth: u32) -> Self {
        Self {
            depth: 0,
            max_depth,
        }
    }

    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth.saturating_add(1),
            max_depth: self.max_depth,
        }
    }

    pub fn suppresses_processing(&self) -> bool {
        self.depth >= self.max_depth
    }
}

impl Default for DistributionContext {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Which connection a payload is travelling through, as seen by the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_type: ConnectionType,
    pub connection_id: ConnectionId,
    pub direction: ConnectionDirection,
    pub distribution: DistributionContext,
}

/// Prior distribution state of a connection for a given content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Syndicated {
    Flag(bool),
    Permalink(String),
}

impl Syndicated {
    pub fn is_syndicated(&self) -> bool {
        match self {
            Syndicated::Flag(flag) => *flag,
            Syndicated::Permalink(_) => true,
        }
    }
}

/// A possible distribution target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub id: ConnectionId,
    pub url: String,
    pub name: String,
    pub syndicated: Syndicated,
}

impl ConnectionDescriptor {
    /// Stable key, e.g. `external12` or `internal3`.
    pub fn key(&self) -> String {
        format!("{}{}", self.connection_type, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    pub post_id: PostId,
    pub time: i64,
}

/// Persisted record of where a content item has been copied to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMap {
    #[serde(default, deserialize_with = "lenient_section")]
    pub internal: BTreeMap<SiteId, MapEntry>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub external: BTreeMap<ConnectionId, MapEntry>,
}

// An empty section is persisted as `[]` rather than `{}`; any non-map reads as empty.
fn lenient_section<'de, D>(deserializer: D) -> Result<BTreeMap<u64, MapEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Keys arrive as strings; buffered untagged content cannot read them as integers.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Section {
        Map(BTreeMap<String, MapEntry>),
        Other(serde::de::IgnoredAny),
    }
    Ok(match Section::deserialize(deserializer)? {
        Section::Map(map) => map
            .into_iter()
            .filter_map(|(id, entry)| id.trim().parse().ok().map(|id| (id, entry)))
            .collect(),
        Section::Other(_) => BTreeMap::new(),
    })
}

impl ConnectionMap {
    /// Reads a persisted map; anything unreadable counts as an empty map.
    pub fn from_meta(value: Option<Value>) -> Self {
        match value {
            Some(map @ Value::Object(_)) => serde_json::from_value(map).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Unreadable connection map, treating as empty");
                ConnectionMap::default()
            }),
            _ => ConnectionMap::default(),
        }
    }

    pub fn section(&self, connection_type: ConnectionType) -> &BTreeMap<u64, MapEntry> {
        match connection_type {
            ConnectionType::Internal => &self.internal,
            ConnectionType::External => &self.external,
        }
    }

    pub fn get(&self, connection_type: ConnectionType, id: ConnectionId) -> Option<&MapEntry> {
        self.section(connection_type).get(&id)
    }

    /// Remote post id recorded for a connection, if it is a usable one.
    pub fn remote_post_id(&self, connection_type: ConnectionType, id: ConnectionId) -> Option<PostId> {
        self.get(connection_type, id)
            .map(|entry| entry.post_id)
            .filter(|post_id| *post_id > 0)
    }

    /// Inserts or overwrites the entry of one connection.
    pub fn record(&mut self, connection_type: ConnectionType, id: ConnectionId, entry: MapEntry) {
        let section = match connection_type {
            ConnectionType::Internal => &mut self.internal,
            ConnectionType::External => &mut self.external,
        };
        section.insert(id, entry);
    }

    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }
}

/// What a connection returns after a successful push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePost {
    pub id: PostId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushArgs {
    pub post_status: String,
    pub context: DistributionContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullItem {
    pub remote_post_id: PostId,
    pub post_type: String,
    pub post_status: String,
}

/// A site of the network the acting user may push to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedSite {
    pub site_id: SiteId,
    pub name: String,
    pub url: String,
    pub post_types: Vec<String>,
}

/// Status persisted on an external connection after its last health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConnectionStatus {
    #[serde(default)]
    pub can_get: bool,
    #[serde(default)]
    pub can_post: Vec<String>,
    #[serde(default)]
    pub no_distributor: bool,
}

/// An external connection as stored on the sending site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalConnectionRecord {
    pub id: ConnectionId,
    pub name: String,
    pub base_url: String,
    /// Whether the connection's transport type is registered in this process.
    pub type_registered: bool,
    pub status: Option<ExternalConnectionStatus>,
    pub allowed_roles: Vec<String>,
}

/// Strips scheme, `www.` and trailing slash, the way internal connection URLs are shown.
pub fn display_site_url(url: &str) -> String {
    let lowered = url.to_ascii_lowercase();
    let mut start = 0;
    for prefix in ["https://", "http://"] {
        if lowered.starts_with(prefix) {
            start = prefix.len();
            break;
        }
    }
    if lowered[start..].starts_with("www.") {
        start += "www.".len();
    }
    url[start..].trim_end_matches('/').to_string()
}

/// Reads an id carried as a JSON number or numeric string. Zero is not an id.
pub fn value_as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
}
