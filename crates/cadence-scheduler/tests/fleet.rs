//! Several job services sharing one database file, the way a fleet shares
//! its store.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_scheduler::event_log::{self, execute_job_channel};
use cadence_scheduler::{
    store, ExecuteJobOn, ExecutionOutcome, JobContext, JobDefinition, JobHandler, JobRegistry, JobResult,
    JobService, SchedulerHandle, SchedulerOptions, SkipReason, Store,
};
use chrono::Utc;

/// Counts runs and remembers which server ran them.
#[derive(Default)]
struct Recorder {
    runs: AtomicUsize,
    servers: Mutex<Vec<String>>,
}

struct Recording(Arc<Recorder>);

#[async_trait]
impl JobHandler for Recording {
    async fn execute(&self, ctx: &JobContext) -> JobResult {
        self.0.runs.fetch_add(1, Ordering::SeqCst);
        self.0.servers.lock().unwrap().push(ctx.server.clone());
        Ok(None)
    }
}

fn node(path: &Path, server: &str, defs: &[JobDefinition], recorder: &Arc<Recorder>) -> (Store, Arc<JobService>) {
    let store = Store::open(path).unwrap();
    let mut registry = JobRegistry::new();
    for def in defs {
        registry.register(def.clone(), Arc::new(Recording(recorder.clone()))).unwrap();
    }
    registry.reconcile(&store.conn()).unwrap();
    let svc = JobService::new(server, store.clone(), Arc::new(registry), SchedulerOptions::default());
    (store, svc)
}

fn hourly(name: &str) -> JobDefinition {
    JobDefinition::interval(name, Duration::from_secs(3600))
}

#[tokio::test]
async fn one_job_runs_only_on_default_server() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cadence.db");
    let recorder = Arc::new(Recorder::default());
    let defs = [hourly("nightly-report").execute_on(ExecuteJobOn::One { server: None })];

    let fleet: Vec<_> = ["web-c", "web-a", "web-b"]
        .iter()
        .map(|name| node(&db, name, &defs, &recorder).1)
        .collect();
    for svc in &fleet {
        svc.ping();
    }

    for svc in &fleet {
        let report = svc.tick().await;
        assert_eq!(report.default_server.as_deref(), Some("web-a"));
    }

    assert_eq!(recorder.runs.load(Ordering::SeqCst), 1);
    assert_eq!(*recorder.servers.lock().unwrap(), vec!["web-a".to_string()]);
}

#[tokio::test]
async fn pinned_job_runs_only_on_its_server() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cadence.db");
    let recorder = Arc::new(Recorder::default());
    let defs = [hourly("export").execute_on(ExecuteJobOn::One { server: Some("web-b".into()) })];

    let (_, a) = node(&db, "web-a", &defs, &recorder);
    let (_, b) = node(&db, "web-b", &defs, &recorder);
    a.ping();
    b.ping();

    let on_a = a.tick().await;
    assert_eq!(on_a.executions, vec![("export".to_string(), ExecutionOutcome::Skipped(SkipReason::NotThisServer))]);
    b.tick().await;
    assert_eq!(*recorder.servers.lock().unwrap(), vec!["web-b".to_string()]);
}

#[tokio::test]
async fn shared_last_execution_holds_back_peers() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cadence.db");
    let recorder = Arc::new(Recorder::default());
    let defs = [hourly("sync")];

    let (_, a) = node(&db, "web-a", &defs, &recorder);
    let (_, b) = node(&db, "web-b", &defs, &recorder);

    a.tick().await;
    let report = b.tick().await;
    assert_eq!(report.executions, vec![("sync".to_string(), ExecutionOutcome::Skipped(SkipReason::NotDue))]);
    assert_eq!(recorder.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fresh_manual_trigger_runs_inactive_job_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cadence.db");
    let recorder = Arc::new(Recorder::default());
    let defs = [hourly("rebuild-index").inactive()];
    let (store, svc) = node(&db, "web-a", &defs, &recorder);

    SchedulerHandle::new(store.clone()).request_run("web-a", "rebuild-index").unwrap();

    let report = svc.tick().await;
    assert_eq!(report.triggered, vec![("rebuild-index".to_string(), ExecutionOutcome::Completed)]);
    // scheduled pass does not pick up the inactive job
    assert!(report.executions.is_empty());

    let again = svc.tick().await;
    assert!(again.triggered.is_empty());
    assert_eq!(recorder.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn trigger_for_another_server_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cadence.db");
    let recorder = Arc::new(Recorder::default());
    let defs = [hourly("rebuild-index").inactive()];
    let (store, a) = node(&db, "web-a", &defs, &recorder);

    event_log::request_execution(&store.conn(), "web-b", "rebuild-index").unwrap();
    a.tick().await;

    assert_eq!(recorder.runs.load(Ordering::SeqCst), 0);
    let pending = event_log::read_since(
        &store.conn(),
        &execute_job_channel("web-b"),
        Utc::now() - chrono::Duration::minutes(1),
    )
    .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn expired_manual_trigger_is_purged_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cadence.db");
    let recorder = Arc::new(Recorder::default());
    let defs = [hourly("rebuild-index").inactive()];
    let (store, svc) = node(&db, "web-a", &defs, &recorder);

    let stale_at = Utc::now() - chrono::Duration::seconds(40);
    event_log::append_at(&store.conn(), &execute_job_channel("web-a"), "rebuild-index", stale_at).unwrap();
    // addressed elsewhere and just as old: purged too
    event_log::append_at(&store.conn(), &execute_job_channel("web-z"), "rebuild-index", stale_at).unwrap();

    let report = svc.tick().await;
    assert!(report.triggered.is_empty());
    assert_eq!(report.expired_triggers, 2);
    assert_eq!(recorder.runs.load(Ordering::SeqCst), 0);

    let left = event_log::read_older_than(&store.conn(), "EXECUTE_JOB_", Utc::now()).unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn job_removed_by_a_newer_deploy_is_not_run() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cadence.db");
    let recorder = Arc::new(Recorder::default());
    let (store, old_node) = node(&db, "web-a", &[hourly("legacy")], &recorder);

    // a newer build boots without the job
    JobRegistry::new().reconcile(&store.conn()).unwrap();
    event_log::request_execution(&store.conn(), "web-a", "legacy").unwrap();

    let report = old_node.tick().await;
    assert_eq!(report.triggered, vec![("legacy".to_string(), ExecutionOutcome::Skipped(SkipReason::Deleted))]);
    assert!(report.executions.is_empty());
    assert_eq!(recorder.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn queues_overlap_but_jobs_in_one_queue_do_not() {
    struct Sleepy(Arc<Mutex<Vec<(String, std::time::Instant, std::time::Instant)>>>);

    #[async_trait]
    impl JobHandler for Sleepy {
        async fn execute(&self, ctx: &JobContext) -> JobResult {
            let start = std::time::Instant::now();
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.lock().unwrap().push((ctx.job_name.clone(), start, std::time::Instant::now()));
            Ok(None)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("cadence.db")).unwrap();
    let spans = Arc::new(Mutex::new(Vec::new()));
    let mut registry = JobRegistry::new();
    for (name, queue) in [("a1", "alpha"), ("a2", "alpha"), ("b1", "beta")] {
        registry.register(hourly(name).queue(queue), Arc::new(Sleepy(spans.clone()))).unwrap();
    }
    registry.reconcile(&store.conn()).unwrap();
    let svc = JobService::new("web-a", store.clone(), Arc::new(registry), SchedulerOptions::default());

    let report = svc.tick().await;
    assert_eq!(report.ran().count(), 3);

    let spans = spans.lock().unwrap();
    let find = |n: &str| spans.iter().find(|(name, _, _)| name == n).map(|(_, s, e)| (*s, *e)).unwrap();
    let (a1, a2, b1) = (find("a1"), find("a2"), find("b1"));
    // same queue: strictly one after the other
    assert!(a1.1 <= a2.0);
    // different queues: b1 ran while alpha was busy
    assert!(b1.0 < a1.1 || b1.0 < a2.1);

    let rows = store::list_jobs(&store.conn()).unwrap();
    assert!(rows.iter().all(|j| j.last_execution.is_some()));
}

#[tokio::test]
async fn declared_parameters_reach_the_handler() {
    struct Export(Mutex<Option<serde_json::Value>>);

    #[async_trait]
    impl JobHandler for Export {
        async fn execute(&self, ctx: &JobContext) -> JobResult {
            assert!(ctx.user.is_system());
            *self.0.lock().unwrap() = Some(ctx.parameters.clone());
            Ok(Some(format!("exported as {}", ctx.parameters["format"])))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("cadence.db")).unwrap();
    let handler = Arc::new(Export(Mutex::new(None)));
    let mut registry = JobRegistry::new();
    registry
        .register(
            hourly("export")
                .tag("reports")
                .on_days(cadence_scheduler::DaysOfWeek::NONE)
                .parameters(serde_json::json!({ "format": "csv" })),
            handler.clone(),
        )
        .unwrap();
    registry.reconcile(&store.conn()).unwrap();
    let svc = JobService::new("web-a", store.clone(), Arc::new(registry), SchedulerOptions::default());

    // no weekday allowed: never due on schedule
    let report = svc.tick().await;
    assert_eq!(report.executions, vec![("export".to_string(), ExecutionOutcome::Skipped(SkipReason::NotDue))]);

    SchedulerHandle::new(store.clone()).request_run("web-a", "export").unwrap();
    svc.tick().await;
    assert_eq!(handler.0.lock().unwrap().as_ref().unwrap()["format"], "csv");

    let row = store::get_job_by_name(&store.conn(), "export").unwrap().unwrap();
    assert_eq!(row.tag.as_deref(), Some("reports"));
}

#[tokio::test]
async fn crashed_peer_leaves_no_open_run_behind() {
    use cadence_scheduler::jobs::HistoryRetentionJob;
    use cadence_scheduler::HistoryStatus;

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cadence.db");
    let store = Store::open(&db).unwrap();
    let mut registry = JobRegistry::new();
    registry
        .register(HistoryRetentionJob::definition(), Arc::new(HistoryRetentionJob::new(1)))
        .unwrap();
    registry.reconcile(&store.conn()).unwrap();

    // web-old died mid-run weeks ago and never came back
    let orphan = store::insert_running_history(
        &store.conn(),
        cadence_scheduler::types::job_id_for("sync"),
        "web-old",
        Utc::now() - chrono::Duration::days(40),
    )
    .unwrap();
    assert_eq!(
        store::get_history(&store.conn(), &orphan.id).unwrap().unwrap().status,
        HistoryStatus::Running
    );

    let svc = JobService::new("web-a", store.clone(), Arc::new(registry), SchedulerOptions::default());
    svc.ping();
    let report = svc.tick().await;

    assert_eq!(report.repaired_runs, 1);
    assert_eq!(
        report.executions,
        vec![(HistoryRetentionJob::NAME.to_string(), ExecutionOutcome::Completed)]
    );
    // closed by the sweep, then old enough for retention to drop
    assert!(store::get_history(&store.conn(), &orphan.id).unwrap().is_none());
    let own = store::recent_history(&store.conn(), cadence_scheduler::types::job_id_for(HistoryRetentionJob::NAME), 1)
        .unwrap();
    assert_eq!(own[0].message.as_deref(), Some("removed 1 history rows older than 1 days"));
}
