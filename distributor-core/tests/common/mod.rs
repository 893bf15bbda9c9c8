//! Shared fixtures: an in-memory content store and site builders.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use distributor_core::contract::{
    ContentStore, MockConnectionProvider, MockJobQueue, MockUserContext,
};
use distributor_core::error::BoxError;
use distributor_core::json_blocks::JsonBlockParser;
use distributor_core::model::{
    value_as_id, NewTerm, Post, PostId, PostUpdate, SiteId, Term, TermId,
    META_ORIGINAL_MEDIA_ID, META_ORIGINAL_MEDIA_URL, META_ORIGINAL_POST_ID, POST_TYPE_ATTACHMENT,
};
use distributor_core::registry::Registry;
use distributor_core::site::Site;

#[derive(Default)]
struct State {
    posts: BTreeMap<PostId, Post>,
    meta: BTreeMap<(PostId, String), Value>,
    attachment_urls: BTreeMap<PostId, String>,
    terms: BTreeMap<TermId, Term>,
    taxonomies: BTreeMap<String, bool>,
    transients: BTreeMap<String, Value>,
    next_id: u64,
    calls: Vec<String>,
}

/// A content store kept in memory. Ids are handed out from 1000 upwards.
pub struct FakeStore {
    site_id: SiteId,
    state: Mutex<State>,
}

impl FakeStore {
    pub fn new(site_id: SiteId) -> Arc<Self> {
        Arc::new(Self {
            site_id,
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
        })
    }

    fn next_id(state: &mut State) -> u64 {
        state.next_id += 1;
        state.next_id
    }

    pub fn add_post(&self, id: PostId, post_type: &str, title: &str) {
        self.state.lock().posts.insert(
            id,
            Post {
                id,
                post_type: post_type.to_string(),
                title: title.to_string(),
                status: "publish".to_string(),
                ..Post::default()
            },
        );
    }

    pub fn add_attachment(&self, id: PostId, url: &str) {
        let mut state = self.state.lock();
        state.posts.insert(
            id,
            Post {
                id,
                post_type: POST_TYPE_ATTACHMENT.to_string(),
                title: format!("Image {id}"),
                excerpt: format!("Caption {id}"),
                content: format!("Description {id}"),
                status: "inherit".to_string(),
                guid: None,
                mime_type: "image/jpeg".to_string(),
            },
        );
        state.attachment_urls.insert(id, url.to_string());
    }

    pub fn add_taxonomy(&self, name: &str, hierarchical: bool) {
        self.state.lock().taxonomies.insert(name.to_string(), hierarchical);
    }

    pub fn add_term(&self, id: TermId, taxonomy: &str, slug: &str, parent: TermId) {
        self.state.lock().terms.insert(
            id,
            Term {
                id,
                name: slug.to_uppercase(),
                slug: slug.to_string(),
                description: String::new(),
                taxonomy: taxonomy.to_string(),
                parent,
            },
        );
    }

    pub fn set_meta(&self, id: PostId, key: &str, value: Value) {
        self.state.lock().meta.insert((id, key.to_string()), value);
    }

    pub fn meta(&self, id: PostId, key: &str) -> Option<Value> {
        self.state.lock().meta.get(&(id, key.to_string())).cloned()
    }

    pub fn post(&self, id: PostId) -> Option<Post> {
        self.state.lock().posts.get(&id).cloned()
    }

    pub fn post_count(&self) -> usize {
        self.state.lock().posts.len()
    }

    pub fn term(&self, id: TermId) -> Option<Term> {
        self.state.lock().terms.get(&id).cloned()
    }

    pub fn term_count(&self) -> usize {
        self.state.lock().terms.len()
    }

    pub fn transient(&self, key: &str) -> Option<Value> {
        self.state.lock().transients.get(key).cloned()
    }

    pub fn set_transient_value(&self, key: &str, value: Value) {
        self.state.lock().transients.insert(key.to_string(), value);
    }

    /// Calls recorded by lookups that tests assert on, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Creates a post as a pull from `source_key` = `source_id` would.
    pub fn insert_pulled_post(&self, original_id: PostId, source_key: &str, source_id: u64, post_type: &str, title: &str) -> PostId {
        let id = {
            let mut state = self.state.lock();
            Self::next_id(&mut state)
        };
        self.add_post(id, post_type, title);
        self.set_meta(id, META_ORIGINAL_POST_ID, json!(original_id));
        self.set_meta(id, source_key, json!(source_id));
        id
    }

    fn meta_matches(state: &State, id: PostId, key: &str, expected: &Value) -> bool {
        match state.meta.get(&(id, key.to_string())) {
            Some(value) => {
                value == expected || (value_as_id(value).is_some() && value_as_id(value) == value_as_id(expected))
            }
            None => false,
        }
    }
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn get_post(&self, id: PostId) -> Result<Option<Post>, BoxError> {
        Ok(self.post(id))
    }

    async fn update_post(&self, update: PostUpdate) -> Result<(), BoxError> {
        let mut state = self.state.lock();
        let post = state
            .posts
            .get_mut(&update.id)
            .ok_or_else(|| format!("no post {}", update.id))?;
        if let Some(title) = update.title {
            post.title = title;
        }
        if let Some(excerpt) = update.excerpt {
            post.excerpt = excerpt;
        }
        if let Some(content) = update.content {
            post.content = content;
        }
        if let Some(mime_type) = update.mime_type {
            post.mime_type = mime_type;
        }
        Ok(())
    }

    async fn get_post_meta(&self, id: PostId, key: &str) -> Result<Option<Value>, BoxError> {
        Ok(self.meta(id, key))
    }

    async fn update_post_meta(&self, id: PostId, key: &str, value: Value) -> Result<(), BoxError> {
        self.set_meta(id, key, value);
        Ok(())
    }

    async fn attachment_url(&self, id: PostId) -> Result<Option<String>, BoxError> {
        Ok(self.state.lock().attachment_urls.get(&id).cloned())
    }

    async fn find_attachment_by_original(
        &self,
        original_id: PostId,
        original_url: &str,
    ) -> Result<Option<PostId>, BoxError> {
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("find_attachment_by_original({original_id}, {original_url})"));
        let found = state.posts.keys().copied().find(|id| {
            Self::meta_matches(&state, *id, META_ORIGINAL_MEDIA_ID, &json!(original_id))
                && Self::meta_matches(&state, *id, META_ORIGINAL_MEDIA_URL, &json!(original_url))
        });
        Ok(found)
    }

    async fn import_media(&self, url: &str) -> Result<Option<PostId>, BoxError> {
        let id = {
            let mut state = self.state.lock();
            state.calls.push(format!("import_media({url})"));
            Self::next_id(&mut state)
        };
        let file = url.rsplit('/').next().unwrap_or("file");
        self.add_attachment(id, &format!("https://target.test/uploads/{file}"));
        Ok(Some(id))
    }

    async fn find_post_by_original(
        &self,
        original_id: PostId,
        source_meta_key: &str,
        source_id: u64,
    ) -> Result<Option<PostId>, BoxError> {
        let state = self.state.lock();
        Ok(state.posts.keys().copied().find(|id| {
            Self::meta_matches(&state, *id, META_ORIGINAL_POST_ID, &json!(original_id))
                && Self::meta_matches(&state, *id, source_meta_key, &json!(source_id))
        }))
    }

    async fn find_post_by_title(&self, post_type: &str, title: &str) -> Result<Option<PostId>, BoxError> {
        let state = self.state.lock();
        Ok(state
            .posts
            .values()
            .find(|p| p.post_type == post_type && p.title == title)
            .map(|p| p.id))
    }

    async fn get_term(&self, id: TermId) -> Result<Option<Term>, BoxError> {
        Ok(self.term(id))
    }

    async fn get_term_by_slug(&self, slug: &str, taxonomy: &str) -> Result<Option<Term>, BoxError> {
        let state = self.state.lock();
        Ok(state
            .terms
            .values()
            .find(|t| t.slug == slug && t.taxonomy == taxonomy)
            .cloned())
    }

    async fn insert_term(&self, term: NewTerm) -> Result<TermId, BoxError> {
        let mut state = self.state.lock();
        let id = Self::next_id(&mut state);
        state.terms.insert(
            id,
            Term {
                id,
                name: term.name,
                slug: term.slug,
                description: term.description,
                taxonomy: term.taxonomy,
                parent: term.parent.unwrap_or(0),
            },
        );
        Ok(id)
    }

    async fn update_term_parent(&self, id: TermId, _taxonomy: &str, parent: TermId) -> Result<(), BoxError> {
        let mut state = self.state.lock();
        let term = state.terms.get_mut(&id).ok_or_else(|| format!("no term {id}"))?;
        term.parent = parent;
        Ok(())
    }

    async fn taxonomy_exists(&self, taxonomy: &str) -> bool {
        self.state.lock().taxonomies.contains_key(taxonomy)
    }

    async fn is_taxonomy_hierarchical(&self, taxonomy: &str) -> bool {
        self.state.lock().taxonomies.get(taxonomy).copied().unwrap_or(false)
    }

    async fn current_site_id(&self) -> SiteId {
        self.site_id
    }

    async fn get_transient(&self, key: &str) -> Result<Option<Value>, BoxError> {
        Ok(self.transient(key))
    }

    async fn set_transient(&self, key: &str, value: Value, _ttl_secs: u64) -> Result<(), BoxError> {
        self.set_transient_value(key, value);
        Ok(())
    }

    async fn delete_transient(&self, key: &str) -> Result<(), BoxError> {
        self.state.lock().transients.remove(key);
        Ok(())
    }
}

/// A site around `store` whose other collaborators are bare mocks.
pub fn site_with(store: Arc<FakeStore>, registry: Registry) -> Site {
    site_with_collaborators(
        store,
        registry,
        MockConnectionProvider::new(),
        MockUserContext::new(),
        MockJobQueue::new(),
    )
}

pub fn site_with_collaborators(
    store: Arc<FakeStore>,
    registry: Registry,
    connections: MockConnectionProvider,
    users: MockUserContext,
    jobs: MockJobQueue,
) -> Site {
    Site::new(
        registry,
        store,
        Arc::new(connections),
        Arc::new(users),
        Arc::new(jobs),
        Arc::new(JsonBlockParser),
    )
}

/// Serialized block list, the content shape [`JsonBlockParser`] reads.
pub fn block_content(blocks: Value) -> String {
    blocks.to_string()
}

pub fn image_block(id: u64, url: &str) -> Value {
    json!({
        "blockName": "core/image",
        "attrs": { "id": id },
        "innerHTML": format!("<figure><img src=\"{url}\" class=\"wp-image-{id}\"/></figure>"),
        "innerContent": [format!("<figure><img src=\"{url}\" class=\"wp-image-{id}\"/></figure>")],
        "innerBlocks": []
    })
}

/// Routes pipeline logs to the test harness output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
