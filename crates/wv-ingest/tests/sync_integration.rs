use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use wv_core::upstream::{UpstreamMember, UpstreamSpace, UpstreamTask};
use wv_ingest::{
    IngestionSync, SyncConfig, SyncError, SyncPhase, TaskSource, UpstreamError,
};
use wv_storage::{TaskFilter, WorkloadStore};

#[derive(Default)]
struct ScriptedSource {
    spaces: Vec<Value>,
    members: Vec<Value>,
    pages: BTreeMap<u32, Result<Vec<Value>, u16>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn with_pages(pages: Vec<Vec<Value>>) -> Self {
        Self {
            spaces: vec![json!({"id": "s1", "name": "People Ops"})],
            members: vec![json!({"user": {"id": 1, "username": "ada", "email": "ada@example.com"}})],
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(idx, page)| (idx as u32, Ok(page)))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

fn decode<T: serde::de::DeserializeOwned>(values: &[Value]) -> Vec<T> {
    values
        .iter()
        .map(|value| serde_json::from_value(value.clone()).expect("fixture decodes"))
        .collect()
}

#[async_trait]
impl TaskSource for ScriptedSource {
    async fn list_spaces(&self, _org_id: &str) -> Result<Vec<UpstreamSpace>, UpstreamError> {
        self.calls.lock().push("spaces".to_string());
        Ok(decode(&self.spaces))
    }

    async fn list_members(&self, _org_id: &str) -> Result<Vec<UpstreamMember>, UpstreamError> {
        self.calls.lock().push("members".to_string());
        Ok(decode(&self.members))
    }

    async fn list_tasks(
        &self,
        _org_id: &str,
        page: u32,
    ) -> Result<Vec<UpstreamTask>, UpstreamError> {
        self.calls.lock().push(format!("tasks:{page}"));
        match self.pages.get(&page) {
            Some(Ok(values)) => Ok(decode(values)),
            Some(Err(status)) => Err(UpstreamError::Status {
                status: *status,
                body: "upstream exploded".to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

fn task(id: &str, assignee: &str, spent_ms: i64) -> Value {
    json!({
        "id": id,
        "name": format!("task {id}"),
        "status": {"status": "open", "type": "open", "color": "#ddd"},
        "assignees": [{"id": assignee, "username": format!("user-{assignee}")}],
        "time_spent": spent_ms,
        "due_date": "1771840800000"
    })
}

fn store() -> Arc<Mutex<WorkloadStore>> {
    Arc::new(Mutex::new(
        WorkloadStore::open_in_memory().expect("open store"),
    ))
}

fn config() -> SyncConfig {
    SyncConfig {
        org_id: Some("9001".to_string()),
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn pagination_stops_at_first_empty_page() {
    let source = ScriptedSource::with_pages(vec![
        vec![task("t1", "a", 3_600_000), task("t2", "a", 1_800_000)],
        vec![task("t3", "b", 7_200_000)],
    ]);
    let store = store();
    let sync = IngestionSync::new(source, store.clone(), config());

    let report = sync.sync_tasks().await.expect("sync tasks");
    assert_eq!(report.pages, 2);
    assert_eq!(report.processed, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(store.lock().task_count().expect("count"), 3);
}

#[tokio::test]
async fn page_requests_are_sequential_from_zero() {
    let source = Arc::new(ScriptedSource::with_pages(vec![
        vec![task("t1", "a", 1)],
        vec![task("t2", "a", 1)],
    ]));
    let sync = IngestionSync::new(source.clone(), store(), config());

    sync.sync_tasks().await.expect("sync tasks");
    assert_eq!(source.calls(), vec!["tasks:0", "tasks:1", "tasks:2"]);
}

#[tokio::test]
async fn failed_page_keeps_committed_progress() {
    let mut source = ScriptedSource::with_pages(vec![vec![
        task("t1", "a", 1_000),
        task("t2", "a", 2_000),
    ]]);
    source.pages.insert(1, Err(503));
    let store = store();
    let sync = IngestionSync::new(source, store.clone(), config());

    let partial = sync.sync_tasks().await.expect_err("page 1 fails");
    assert_eq!(partial.committed.tasks.processed, 2);
    assert_eq!(partial.committed.tasks.pages, 1);
    assert!(matches!(
        partial.error,
        SyncError::UpstreamUnavailable {
            phase: SyncPhase::Tasks,
            page: Some(1),
            ..
        }
    ));
    assert_eq!(partial.error.kind(), "upstream_unavailable");
    assert_eq!(store.lock().task_count().expect("count"), 2);
}

#[tokio::test]
async fn records_without_id_are_skipped_not_fatal() {
    let source = ScriptedSource::with_pages(vec![vec![
        json!({"name": "no id here"}),
        json!({"id": "bare"}),
        task("t1", "a", 1_000),
    ]]);
    let store = store();
    let sync = IngestionSync::new(source, store.clone(), config());

    let report = sync.sync_tasks().await.expect("sync tasks");
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 1);

    let bare = store
        .lock()
        .task("bare")
        .expect("load")
        .expect("unassigned task still stored");
    assert!(bare.assignee.is_empty());
}

#[tokio::test]
async fn re_ingesting_identical_payload_changes_nothing_but_sync_time() {
    let pages = vec![vec![task("t1", "a", 3_600_000)]];
    let store = store();

    let first = IngestionSync::new(ScriptedSource::with_pages(pages.clone()), store.clone(), config());
    first.sync_tasks().await.expect("first sync");
    let before = store.lock().task("t1").expect("load").expect("exists");
    let first_synced = store.lock().task_synced_at("t1").expect("synced").expect("set");

    let second = IngestionSync::new(ScriptedSource::with_pages(pages), store.clone(), config());
    second.sync_tasks().await.expect("second sync");
    let after = store.lock().task("t1").expect("load").expect("exists");
    let second_synced = store.lock().task_synced_at("t1").expect("synced").expect("set");

    assert_eq!(before, after);
    assert!(second_synced >= first_synced);
    assert_eq!(store.lock().list_tasks(&TaskFilter::default()).expect("list").len(), 1);
}

#[tokio::test]
async fn missing_org_id_is_a_configuration_error() {
    let sync = IngestionSync::new(
        ScriptedSource::with_pages(Vec::new()),
        store(),
        SyncConfig {
            org_id: Some("   ".to_string()),
            ..SyncConfig::default()
        },
    );

    let err = sync.sync_teams().await.expect_err("no org id");
    assert!(matches!(err, SyncError::Configuration(_)));

    let partial = sync.sync_tasks().await.expect_err("no org id");
    assert_eq!(partial.error.kind(), "configuration_error");
    assert_eq!(partial.committed.tasks.processed, 0);
}

#[tokio::test]
async fn zero_spaces_is_upstream_empty() {
    let mut source = ScriptedSource::with_pages(Vec::new());
    source.spaces.clear();
    let sync = IngestionSync::new(source, store(), config());

    let err = sync.sync_teams().await.expect_err("empty org");
    assert!(matches!(
        err,
        SyncError::UpstreamEmpty {
            phase: SyncPhase::Teams,
            ..
        }
    ));
}

#[tokio::test]
async fn full_sync_runs_phases_in_order() {
    let source = Arc::new(ScriptedSource::with_pages(vec![vec![task("t1", "1", 1_000)]]));
    let store = store();
    let sync = IngestionSync::new(source.clone(), store.clone(), config());

    let report = sync.sync_all().await.expect("full sync");
    assert_eq!(report.teams.teams, 1);
    assert_eq!(report.members.members, 1);
    assert_eq!(report.tasks.processed, 1);
    assert_eq!(
        source.calls(),
        vec!["spaces", "members", "tasks:0", "tasks:1"]
    );

    let members = store.lock().list_members().expect("members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, "employee");
    assert_eq!(store.lock().list_teams().expect("teams").len(), 1);
}

#[tokio::test]
async fn full_sync_stops_at_failing_phase() {
    let mut scripted = ScriptedSource::with_pages(vec![vec![task("t1", "1", 1_000)]]);
    scripted.spaces.clear();
    let source = Arc::new(scripted);
    let sync = IngestionSync::new(source.clone(), store(), config());

    let partial = sync.sync_all().await.expect_err("teams phase fails");
    assert_eq!(partial.error.kind(), "upstream_empty");
    assert_eq!(partial.committed.teams.teams, 0);
    assert_eq!(source.calls(), vec!["spaces"]);
}

#[tokio::test]
async fn runaway_pagination_hits_the_page_cap() {
    let source = ScriptedSource::with_pages(vec![
        vec![task("t1", "a", 1)],
        vec![task("t2", "a", 1)],
        vec![task("t3", "a", 1)],
    ]);
    let sync = IngestionSync::new(
        source,
        store(),
        SyncConfig {
            max_pages: 2,
            ..config()
        },
    );

    let partial = sync.sync_tasks().await.expect_err("cap reached");
    assert!(matches!(
        partial.error,
        SyncError::PaginationLimit { max_pages: 2 }
    ));
    assert_eq!(partial.committed.tasks.processed, 2);
}
