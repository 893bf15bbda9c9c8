mod common;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use mockall::predicate::eq;
use parking_lot::Mutex;
use serde_json::json;

use common::{init_tracing, site_with_collaborators, FakeStore};
use distributor_core::auto_distribute::{
    AutoDistributor, Ineligible, ScheduleOutcome, SkipReason,
};
use distributor_core::config::DistributorConfig;
use distributor_core::contract::{
    AutoDistributeJob, Connection, JobQueue, MockConnection, MockConnectionProvider,
    MockJobQueue, MockUserContext,
};
use distributor_core::error::BoxError;
use distributor_core::hooks::DistributionHooks;
use distributor_core::json_blocks::JsonBlockParser;
use distributor_core::model::{
    AuthorizedSite, ConnectionDirection, ConnectionId, ConnectionMap, ConnectionType,
    ExternalConnectionRecord, ExternalConnectionStatus, Post, RemotePost, Syndicated, UserId,
    META_CONNECTION_MAP, META_ORIGINAL_POST_URL,
};
use distributor_core::registry::Registry;
use distributor_core::site::Site;

const USER: UserId = 5;

fn enabled() -> DistributorConfig {
    DistributorConfig {
        auto_distribution_enabled: true,
        ..DistributorConfig::default()
    }
}

/// Remembers scheduled jobs so a second schedule sees the first.
#[derive(Default)]
struct RecordingQueue {
    scheduled: Mutex<HashSet<AutoDistributeJob>>,
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn is_scheduled(&self, job: AutoDistributeJob) -> Result<bool, BoxError> {
        Ok(self.scheduled.lock().contains(&job))
    }

    async fn schedule_once(&self, job: AutoDistributeJob) -> Result<(), BoxError> {
        self.scheduled.lock().insert(job);
        Ok(())
    }
}

fn scheduling_site(store: Arc<FakeStore>, queue: Arc<RecordingQueue>, users: MockUserContext) -> Site {
    Site::new(
        Registry::new(),
        store,
        Arc::new(MockConnectionProvider::new()),
        Arc::new(users),
        queue,
        Arc::new(JsonBlockParser),
    )
    .with_config(enabled())
}

#[tokio::test]
async fn test_schedule_is_deduplicated_per_post_and_user() {
    let store = FakeStore::new(1);
    store.add_post(10, "post", "Launch");
    let queue = Arc::new(RecordingQueue::default());
    let mut users = MockUserContext::new();
    users.expect_current_user_id().return_const(8u64);
    let site = scheduling_site(store, queue.clone(), users);
    let auto = AutoDistributor::new(&site);

    let first = auto.schedule_post(10, None).await.expect("schedule");
    let second = auto.schedule_post(10, None).await.expect("schedule");
    let other_user = auto.schedule_post(10, Some(USER)).await.expect("schedule");

    let job = AutoDistributeJob { post_id: 10, user_id: 8 };
    assert_eq!(first, ScheduleOutcome::Scheduled(job));
    assert_eq!(second, ScheduleOutcome::AlreadyScheduled(job));
    assert_eq!(
        other_user,
        ScheduleOutcome::Scheduled(AutoDistributeJob { post_id: 10, user_id: USER })
    );
    assert_eq!(queue.scheduled.lock().len(), 2);
}

#[tokio::test]
async fn test_received_content_is_never_scheduled() {
    let store = FakeStore::new(1);
    store.add_post(10, "post", "Copy");
    store.set_meta(10, META_ORIGINAL_POST_URL, json!("https://origin.test/?p=3"));
    let queue = Arc::new(RecordingQueue::default());
    let site = scheduling_site(store, queue.clone(), MockUserContext::new());

    let outcome = AutoDistributor::new(&site)
        .schedule_post(10, Some(USER))
        .await
        .expect("schedule");

    assert_eq!(outcome, ScheduleOutcome::Skipped(Ineligible::Received));
    assert!(queue.scheduled.lock().is_empty());
}

#[tokio::test]
async fn test_empty_origin_marker_does_not_count_as_received() {
    let store = FakeStore::new(1);
    store.add_post(10, "post", "Local");
    store.set_meta(10, META_ORIGINAL_POST_URL, json!(""));
    let queue = Arc::new(RecordingQueue::default());
    let site = scheduling_site(store, queue, MockUserContext::new());

    let outcome = AutoDistributor::new(&site)
        .schedule_post(10, Some(USER))
        .await
        .expect("schedule");

    assert!(matches!(outcome, ScheduleOutcome::Scheduled(_)));
}

#[tokio::test]
async fn test_disabled_and_unsupported_posts_are_skipped() {
    let store = FakeStore::new(1);
    store.add_post(10, "post", "Launch");
    store.add_post(11, "product", "Widget");
    let queue = Arc::new(RecordingQueue::default());

    let disabled = scheduling_site(store.clone(), queue.clone(), MockUserContext::new())
        .with_config(DistributorConfig::default());
    let outcome = AutoDistributor::new(&disabled)
        .schedule_post(10, Some(USER))
        .await
        .expect("schedule");
    assert_eq!(outcome, ScheduleOutcome::Skipped(Ineligible::Disabled));

    let site = scheduling_site(store, queue.clone(), MockUserContext::new());
    let auto = AutoDistributor::new(&site);
    assert_eq!(
        auto.schedule_post(11, Some(USER)).await.expect("schedule"),
        ScheduleOutcome::Skipped(Ineligible::UnsupportedType)
    );
    assert_eq!(
        auto.schedule_post(99, Some(USER)).await.expect("schedule"),
        ScheduleOutcome::Skipped(Ineligible::MissingPost)
    );
    assert!(queue.scheduled.lock().is_empty());
}

fn external(id: ConnectionId, can_post: &[&str], allowed_roles: &[&str]) -> ExternalConnectionRecord {
    ExternalConnectionRecord {
        id,
        name: format!("Remote {id}"),
        base_url: format!("https://remote{id}.test/wp-json"),
        type_registered: true,
        status: Some(ExternalConnectionStatus {
            can_get: true,
            can_post: can_post.iter().map(|t| t.to_string()).collect(),
            no_distributor: false,
        }),
        allowed_roles: allowed_roles.iter().map(|r| r.to_string()).collect(),
    }
}

fn candidate_records() -> Vec<ExternalConnectionRecord> {
    let mut unreachable = external(14, &["post"], &[]);
    unreachable.status = Some(ExternalConnectionStatus {
        can_get: false,
        ..ExternalConnectionStatus::default()
    });
    let mut unregistered = external(16, &["post"], &[]);
    unregistered.type_registered = false;
    let mut unchecked = external(18, &["post"], &[]);
    unchecked.status = None;

    vec![
        external(12, &["post"], &[]),
        external(13, &["post", "page"], &[]),
        unreachable,
        external(15, &["page"], &[]),
        unregistered,
        external(17, &["post"], &["author"]),
        unchecked,
    ]
}

fn network_sites() -> Vec<AuthorizedSite> {
    vec![
        AuthorizedSite {
            site_id: 1,
            name: "Here".to_string(),
            url: "https://here.test".to_string(),
            post_types: vec!["post".to_string()],
        },
        AuthorizedSite {
            site_id: 2,
            name: "Two".to_string(),
            url: "https://www.two.test/".to_string(),
            post_types: vec!["post".to_string()],
        },
        AuthorizedSite {
            site_id: 4,
            name: "Pages only".to_string(),
            url: "http://four.test".to_string(),
            post_types: vec!["page".to_string()],
        },
    ]
}

/// An editor (not an administrator) with network access.
fn editor() -> MockUserContext {
    let mut users = MockUserContext::new();
    users.expect_set_current_user().with(eq(USER)).returning(|_| Ok(()));
    users
        .expect_current_user_can()
        .withf(|capability| capability == "manage_options")
        .return_const(false);
    users
        .expect_current_user_roles()
        .returning(|| vec!["editor".to_string()]);
    users
}

fn provider(connections: Vec<((ConnectionType, ConnectionId), Arc<dyn Connection>)>) -> MockConnectionProvider {
    let mut provider = MockConnectionProvider::new();
    provider
        .expect_external_connections()
        .with(eq(200usize))
        .returning(|_| Ok(candidate_records()));
    provider.expect_internal_connections_available().return_const(true);
    provider
        .expect_authorized_sites()
        .with(eq(USER), eq(ConnectionDirection::Push))
        .returning(|_, _| Ok(network_sites()));
    provider
        .expect_site_permalink()
        .returning(|_, _| Some("https://two.test/launch".to_string()));
    provider.expect_connection().returning(move |connection_type, id| {
        connections
            .iter()
            .find(|(key, _)| *key == (connection_type, id))
            .map(|(_, connection)| connection.clone())
            .ok_or_else(|| format!("no connection {connection_type}{id}").into())
    });
    provider
}

fn pushing(result: Result<u64, &'static str>) -> Arc<dyn Connection> {
    let mut connection = MockConnection::new();
    connection.expect_push().times(1).returning(move |_, _| match result {
        Ok(id) => Ok(RemotePost { id }),
        Err(message) => Err(message.into()),
    });
    Arc::new(connection)
}

fn launch_post(store: &FakeStore) {
    store.add_post(10, "post", "Launch");
    store.set_meta(
        10,
        META_CONNECTION_MAP,
        json!({ "external": { "12": { "post_id": 812, "time": 1 } }, "internal": [] }),
    );
}

#[tokio::test]
async fn test_connections_are_filtered_by_status_type_and_role() {
    let store = FakeStore::new(1);
    launch_post(&store);
    store.set_meta(
        10,
        META_CONNECTION_MAP,
        json!({ "external": { "12": { "post_id": 812, "time": 1 } }, "internal": { "2": { "post_id": 50, "time": 1 } } }),
    );
    let site = site_with_collaborators(store.clone(), Registry::new(), provider(Vec::new()), editor(), MockJobQueue::new())
        .with_config(enabled());
    let post = store.post(10).expect("post");

    let connections = AutoDistributor::new(&site)
        .get_connections(&post, USER)
        .await
        .expect("connections");

    let keys: Vec<String> = connections.iter().map(|c| c.key()).collect();
    assert_eq!(keys, vec!["external12", "external13", "internal2"]);
    assert_eq!(connections[0].syndicated, Syndicated::Flag(true));
    assert_eq!(connections[1].syndicated, Syndicated::Flag(false));
    assert_eq!(
        connections[2].syndicated,
        Syndicated::Permalink("https://two.test/launch".to_string())
    );
    assert_eq!(connections[2].url, "two.test");
}

#[tokio::test]
async fn test_distributes_to_each_unsyndicated_connection() {
    init_tracing();
    let store = FakeStore::new(1);
    launch_post(&store);
    let connections = vec![
        ((ConnectionType::External, 13), pushing(Ok(913))),
        ((ConnectionType::Internal, 2), pushing(Err("site is archived"))),
    ];
    let site = site_with_collaborators(store.clone(), Registry::new(), provider(connections), editor(), MockJobQueue::new())
        .with_config(enabled());

    let report = AutoDistributor::new(&site)
        .distribute_to_all_connections(10, USER)
        .await
        .expect("report");

    assert_eq!(report.ineligible, None);
    assert_eq!(report.pushed, vec![("external13".to_string(), 913)]);
    assert_eq!(
        report.skipped,
        vec![("external12".to_string(), SkipReason::AlreadySyndicated)]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "internal2");

    let map = ConnectionMap::from_meta(store.meta(10, META_CONNECTION_MAP));
    assert_eq!(map.remote_post_id(ConnectionType::External, 13), Some(913));
    assert_eq!(map.remote_post_id(ConnectionType::External, 12), Some(812));
    assert_eq!(map.get(ConnectionType::Internal, 2), None);
}

struct ExternalOnly;

impl DistributionHooks for ExternalOnly {
    fn should_auto_distribute(
        &self,
        _post: &Post,
        _user: UserId,
        connection_type: ConnectionType,
        _connection_id: ConnectionId,
    ) -> bool {
        connection_type == ConnectionType::External
    }
}

#[tokio::test]
async fn test_hook_can_veto_single_connections() {
    let store = FakeStore::new(1);
    launch_post(&store);
    let connections = vec![((ConnectionType::External, 13), pushing(Ok(913)))];
    let site = site_with_collaborators(store, Registry::new(), provider(connections), editor(), MockJobQueue::new())
        .with_config(enabled())
        .with_hooks(Arc::new(ExternalOnly));

    let report = AutoDistributor::new(&site)
        .distribute_to_all_connections(10, USER)
        .await
        .expect("report");

    assert_eq!(report.pushed, vec![("external13".to_string(), 913)]);
    assert!(report
        .skipped
        .contains(&("internal2".to_string(), SkipReason::Vetoed)));
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_received_content_is_never_distributed() {
    let store = FakeStore::new(1);
    launch_post(&store);
    store.set_meta(10, META_ORIGINAL_POST_URL, json!("https://origin.test/?p=3"));
    // Bare collaborators: enumerating connections would panic.
    let site = site_with_collaborators(
        store,
        Registry::new(),
        MockConnectionProvider::new(),
        MockUserContext::new(),
        MockJobQueue::new(),
    )
    .with_config(enabled());
    let auto = AutoDistributor::new(&site);

    let received = auto.distribute_to_all_connections(10, USER).await.expect("report");
    let anonymous = auto.distribute_to_all_connections(10, 0).await.expect("report");

    assert_eq!(received.ineligible, Some(Ineligible::Received));
    assert!(received.pushed.is_empty());
    assert_eq!(anonymous.ineligible, Some(Ineligible::MissingUser));
}
