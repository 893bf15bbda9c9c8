//! # contract: interfaces to everything outside the distribution pipeline
//!
//! The pipeline never talks to a database, a network or a block grammar
//! directly. It talks to the traits below, implemented by the host platform in
//! production and by mocks or fakes in tests.
//!
//! ## Traits
//! - [`ContentStore`]: posts, post meta, attachments, terms and transients of
//!   the site the code runs on.
//! - [`Connection`]: one distribution target; pushes, pulls and sync logging.
//! - [`ConnectionProvider`]: resolves connections and enumerates candidates
//!   for auto-distribution.
//! - [`UserContext`]: the acting user and their capabilities.
//! - [`JobQueue`]: deferred single-fire jobs.
//! - [`BlockParser`]: turns content into a block tree and back.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`; the generated `Mock*` types are
//!   exported with the `test-export-mocks` feature so integration tests and
//!   downstream crates can use them.
//!
//! ## Errors
//! - Fallible methods return [`BoxError`]. Callers decide whether a failure
//!   aborts the operation or degrades to keeping the original reference.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BoxError;
use crate::model::{
    AuthorizedSite, ConnectionDirection, ConnectionId, ConnectionType, DistributionContext,
    ExternalConnectionRecord, NewTerm, Post, PostId, PostUpdate, PullItem, PushArgs, RemotePost,
    SiteId, Term, TermId, UserId,
};
use crate::walker::Block;

/// Content and metadata storage of the local site.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch a post of any type (including attachments). `None` when missing.
    async fn get_post(&self, id: PostId) -> Result<Option<Post>, BoxError>;

    async fn update_post(&self, update: PostUpdate) -> Result<(), BoxError>;

    /// Single meta value, `None` when the key is not set.
    async fn get_post_meta(&self, id: PostId, key: &str) -> Result<Option<Value>, BoxError>;

    async fn update_post_meta(&self, id: PostId, key: &str, value: Value) -> Result<(), BoxError>;

    async fn attachment_url(&self, id: PostId) -> Result<Option<String>, BoxError>;

    /// Attachment previously imported from `original_id` at `original_url`.
    async fn find_attachment_by_original(
        &self,
        original_id: PostId,
        original_url: &str,
    ) -> Result<Option<PostId>, BoxError>;

    /// Download a remote file into the media library.
    async fn import_media(&self, url: &str) -> Result<Option<PostId>, BoxError>;

    /// Oldest post whose `dt_original_post_id` is `original_id` and whose
    /// `source_meta_key` meta equals `source_id`.
    async fn find_post_by_original(
        &self,
        original_id: PostId,
        source_meta_key: &str,
        source_id: u64,
    ) -> Result<Option<PostId>, BoxError>;

    /// Oldest post of `post_type` with exactly this title, any status.
    async fn find_post_by_title(
        &self,
        post_type: &str,
        title: &str,
    ) -> Result<Option<PostId>, BoxError>;

    async fn get_term(&self, id: TermId) -> Result<Option<Term>, BoxError>;

    async fn get_term_by_slug(&self, slug: &str, taxonomy: &str) -> Result<Option<Term>, BoxError>;

    async fn insert_term(&self, term: NewTerm) -> Result<TermId, BoxError>;

    async fn update_term_parent(
        &self,
        id: TermId,
        taxonomy: &str,
        parent: TermId,
    ) -> Result<(), BoxError>;

    async fn taxonomy_exists(&self, taxonomy: &str) -> bool;

    async fn is_taxonomy_hierarchical(&self, taxonomy: &str) -> bool;

    /// Id of the site this store belongs to within its network.
    async fn current_site_id(&self) -> SiteId;

    async fn get_transient(&self, key: &str) -> Result<Option<Value>, BoxError>;

    async fn set_transient(&self, key: &str, value: Value, ttl_secs: u64) -> Result<(), BoxError>;

    async fn delete_transient(&self, key: &str) -> Result<(), BoxError>;
}

/// Per-item result of a pull: the new local id, or an error message.
pub type PullResult = Result<PostId, String>;

/// A configured target site capable of receiving or providing content.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    fn connection_type(&self) -> ConnectionType;

    fn id(&self) -> ConnectionId;

    /// Copy a local post to the remote side.
    async fn push(&self, post_id: PostId, args: PushArgs) -> Result<RemotePost, BoxError>;

    /// Copy remote posts to the local side. One result per requested item, in order.
    async fn pull(
        &self,
        items: Vec<PullItem>,
        context: DistributionContext,
    ) -> Result<Vec<PullResult>, BoxError>;

    /// Record which remote post id maps to which local one.
    async fn log_sync(&self, mapping: BTreeMap<PostId, PostId>) -> Result<(), BoxError>;
}

/// Source of connections for the acting site.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Instantiate a connection by type and id.
    async fn connection(
        &self,
        connection_type: ConnectionType,
        id: ConnectionId,
    ) -> Result<Arc<dyn Connection>, BoxError>;

    /// Up to `limit` external connections with their stored status.
    async fn external_connections(
        &self,
        limit: usize,
    ) -> Result<Vec<ExternalConnectionRecord>, BoxError>;

    /// Whether network (internal) connections exist in this installation at all.
    async fn internal_connections_available(&self) -> bool;

    /// Network sites `user` is authorized to distribute to in `direction`.
    async fn authorized_sites(
        &self,
        user: UserId,
        direction: ConnectionDirection,
    ) -> Result<Vec<AuthorizedSite>, BoxError>;

    /// Permalink of `post_id` on network site `site`, if it still exists.
    async fn site_permalink(&self, site: SiteId, post_id: PostId) -> Option<String>;
}

/// The user on whose behalf distribution runs.
///
/// Impersonation via [`UserContext::set_current_user`] is not reverted
/// automatically; whoever switches the user restores it.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait UserContext: Send + Sync {
    async fn current_user_id(&self) -> UserId;

    async fn set_current_user(&self, user: UserId) -> Result<(), BoxError>;

    async fn current_user_can(&self, capability: &str) -> bool;

    async fn current_user_roles(&self) -> Vec<String>;
}

/// A deferred auto-distribution run for one content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutoDistributeJob {
    pub post_id: PostId,
    pub user_id: UserId,
}

/// Single-fire deferred jobs.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn is_scheduled(&self, job: AutoDistributeJob) -> Result<bool, BoxError>;

    /// Queue `job` to fire once, as soon as possible.
    async fn schedule_once(&self, job: AutoDistributeJob) -> Result<(), BoxError>;
}

/// Converts between stored content and a block tree.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait BlockParser: Send + Sync {
    /// Whether the content is block-structured at all.
    fn has_blocks(&self, content: &str) -> bool;

    fn parse(&self, content: &str) -> Vec<Block>;

    fn serialize(&self, blocks: &[Block]) -> String;
}
