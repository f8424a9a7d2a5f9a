use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::SchedulerConfig;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::affinity::elect_default_server;
use crate::db::Store;
use crate::event_log::{self, execute_job_channel, EXECUTE_JOB_PREFIX};
use crate::executor::JobExecutor;
use crate::queue::JobQueue;
use crate::registry::{JobRegistry, RegisteredJob};
use crate::store;
use crate::types::ExecutionOutcome;

/// Timing knobs of the control loop.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub tick_interval: Duration,
    pub ping_interval: Duration,
    pub trigger_window: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(cfg.tick_interval_ms.max(1)),
            ping_interval: Duration::from_secs(cfg.ping_interval_secs.max(1)),
            trigger_window: Duration::from_secs(cfg.trigger_window_secs),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// The previous tick was still running; nothing was done.
    pub skipped: bool,
    /// Manual triggers consumed this tick, by job name.
    pub triggered: Vec<(String, ExecutionOutcome)>,
    /// Expired triggers removed without running.
    pub expired_triggers: usize,
    /// Abandoned running rows, on any server, closed as failed.
    pub repaired_runs: usize,
    /// Server elected for unpinned `One` jobs.
    pub default_server: Option<String>,
    /// Scheduled attempts, by job name. Jobs in busy queues are absent.
    pub executions: Vec<(String, ExecutionOutcome)>,
}

impl TickReport {
    /// Attempts that actually ran, manual or scheduled.
    pub fn ran(&self) -> impl Iterator<Item = &(String, ExecutionOutcome)> {
        self.triggered.iter().chain(&self.executions).filter(|(_, o)| o.ran())
    }
}

/// The per-process control loop.
///
/// Each tick it closes abandoned runs fleet-wide, consumes manual triggers
/// addressed to this server, elects the default server and offers every
/// active job to its queue. Queues run
/// concurrently; jobs inside a queue run one after another.
pub struct JobService {
    server: String,
    options: SchedulerOptions,
    store: Store,
    registry: Arc<JobRegistry>,
    executor: JobExecutor,
    queues: DashMap<String, Arc<JobQueue>>,
    ticking: AtomicBool,
}

impl JobService {
    pub fn new(server: &str, store: Store, registry: Arc<JobRegistry>, options: SchedulerOptions) -> Arc<Self> {
        Arc::new(Self {
            server: server.to_string(),
            executor: JobExecutor::new(store.clone(), server, options.ping_interval),
            options,
            store,
            registry,
            queues: DashMap::new(),
            ticking: AtomicBool::new(false),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true`, then waits
    /// for in-flight ticks to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(server = %self.server, jobs = self.registry.len(), "job service started");

        let tracker = TaskTracker::new();
        let mut tick = tokio::time::interval(self.options.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick fires immediately, which also announces us
        let mut presence = tokio::time::interval(self.options.ping_interval);
        presence.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = presence.tick() => self.ping(),
                _ = tick.tick() => {
                    let service = Arc::clone(&self);
                    tracker.spawn(async move {
                        service.tick().await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("job service shutting down");
                        break;
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        info!("job service stopped");
    }

    /// Record this server as alive.
    pub fn ping(&self) {
        let conn = self.store.conn();
        if let Err(e) = store::ping_server(&conn, &self.server, Utc::now()) {
            warn!(error = %e, "server ping failed");
        }
    }

    /// Run one pass. Returns immediately with `skipped` set if the previous
    /// pass is still going.
    #[instrument(skip_all, fields(server = %self.server))]
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        if self.ticking.swap(true, Ordering::AcqRel) {
            debug!("previous tick still running; skipping");
            return TickReport { skipped: true, ..TickReport::default() };
        }
        let _guard = TickGuard(&self.ticking);

        let mut report = TickReport::default();
        report.repaired_runs = self.executor.repair_stale_runs();
        let (triggered, expired) = self.run_manual_triggers().await;
        report.triggered = triggered;
        report.expired_triggers = expired;
        report.default_server = self.default_server();
        report.executions = self.run_scheduled(report.default_server.clone()).await;
        report
    }

    fn queue(&self, name: &str) -> Arc<JobQueue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(JobQueue::new(name)))
            .clone()
    }

    /// Consume fresh `EXECUTE_JOB_<server>` rows, each through its job's
    /// queue with policy bypassed, and purge expired ones. A row is deleted
    /// only after its run has finished.
    async fn run_manual_triggers(&self) -> (Vec<(String, ExecutionOutcome)>, usize) {
        let window = chrono::Duration::from_std(self.options.trigger_window).unwrap_or(chrono::Duration::seconds(30));
        let cutoff = Utc::now() - window;

        let (pending, expired) = {
            let conn = self.store.conn();
            let expired = event_log::purge_older_than(&conn, EXECUTE_JOB_PREFIX, cutoff);
            match event_log::read_since(&conn, &execute_job_channel(&self.server), cutoff) {
                Ok(rows) => (rows, expired),
                Err(e) => {
                    error!(error = %e, "reading manual triggers failed");
                    (Vec::new(), expired)
                }
            }
        };
        if expired > 0 {
            info!(count = expired, "expired manual triggers purged");
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            match self.registry.by_name(&entry.value) {
                Some(job) => {
                    info!(job = %entry.value, trigger_id = entry.id, "manual trigger");
                    let outcome = self.queue_for(job).execute_forced(job, &self.executor).await;
                    outcomes.push((entry.value.clone(), outcome));
                }
                None => warn!(job = %entry.value, trigger_id = entry.id, "manual trigger for unknown job dropped"),
            }
            let conn = self.store.conn();
            if let Err(e) = event_log::delete(&conn, entry.id) {
                warn!(trigger_id = entry.id, error = %e, "could not delete manual trigger");
            }
        }
        (outcomes, expired)
    }

    /// Queue a job runs in: the one its registry row names, falling back to
    /// the declaration.
    fn queue_for(&self, job: &RegisteredJob) -> Arc<JobQueue> {
        let conn = self.store.conn();
        let name = match store::get_job(&conn, job.definition.id) {
            Ok(Some(row)) => row.queue,
            _ => job.definition.queue.clone(),
        };
        drop(conn);
        self.queue(&name)
    }

    fn default_server(&self) -> Option<String> {
        let servers = {
            let conn = self.store.conn();
            match store::list_servers(&conn) {
                Ok(servers) => servers,
                Err(e) => {
                    warn!(error = %e, "listing servers failed; no default server this tick");
                    return None;
                }
            }
        };
        elect_default_server(&servers, Utc::now(), self.executor.stale_after())
    }

    /// Group active jobs by queue and run every queue concurrently.
    async fn run_scheduled(self: &Arc<Self>, default_server: Option<String>) -> Vec<(String, ExecutionOutcome)> {
        let rows = {
            let conn = self.store.conn();
            match store::list_jobs(&conn) {
                Ok(rows) => rows,
                Err(e) => {
                    error!(error = %e, "loading job registry failed");
                    return Vec::new();
                }
            }
        };

        let mut by_queue: BTreeMap<String, Vec<RegisteredJob>> = BTreeMap::new();
        for row in rows.into_iter().filter(|r| r.active) {
            match self.registry.get(&row.id) {
                Some(job) => by_queue.entry(row.queue).or_default().push(job.clone()),
                None => debug!(job = %row.name, "no handler for registry row"),
            }
        }

        let mut handles = Vec::with_capacity(by_queue.len());
        for (name, jobs) in by_queue {
            let queue = self.queue(&name);
            let service = Arc::clone(self);
            let default_server = default_server.clone();
            handles.push(tokio::spawn(async move {
                queue.execute(&jobs, &service.executor, default_server.as_deref()).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in futures_util::future::join_all(handles).await {
            match handle {
                Ok(Some(batch)) => outcomes.extend(batch),
                Ok(None) => {}
                Err(e) => error!(error = %e, "queue task ended abnormally"),
            }
        }
        outcomes
    }
}

/// Clears the re-entrancy flag even if the tick unwinds.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
