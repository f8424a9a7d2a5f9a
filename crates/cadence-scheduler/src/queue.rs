use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::executor::JobExecutor;
use crate::registry::RegisteredJob;
use crate::types::ExecutionOutcome;

/// A named lane of jobs that run one at a time.
///
/// Distinct queues never block each other. A busy queue turns away a new
/// batch rather than stacking it behind the current one; the next tick will
/// offer the jobs again.
pub struct JobQueue {
    name: String,
    gate: Semaphore,
}

impl JobQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gate: Semaphore::new(1),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gate.available_permits() == 0
    }

    /// Run `jobs` in order, each through the executor's policy checks.
    ///
    /// Returns `None` without touching any job if the queue is already busy.
    #[instrument(skip_all, fields(queue = %self.name, jobs = jobs.len()))]
    pub async fn execute(
        &self,
        jobs: &[RegisteredJob],
        executor: &JobExecutor,
        default_server: Option<&str>,
    ) -> Option<Vec<(String, ExecutionOutcome)>> {
        let Ok(_permit) = self.gate.try_acquire() else {
            debug!("queue busy; batch skipped");
            return None;
        };

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let outcome = executor.run(job, default_server, false).await;
            outcomes.push((job.definition.name.clone(), outcome));
        }
        Some(outcomes)
    }

    /// Run one job with policy checks bypassed, waiting for the queue to
    /// free up first so a manual trigger is never lost to a busy lane.
    #[instrument(skip_all, fields(queue = %self.name, job = %job.definition.name))]
    pub async fn execute_forced(&self, job: &RegisteredJob, executor: &JobExecutor) -> ExecutionOutcome {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => return ExecutionOutcome::Failed(format!("queue {} is closed", self.name)),
        };
        executor.run(job, None, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::handler::{JobContext, JobHandler, JobResult};
    use crate::registry::JobRegistry;
    use crate::types::JobDefinition;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    /// Records the wall-clock span of every run.
    struct Slow {
        runs: Arc<Mutex<Vec<(Instant, Instant)>>>,
    }

    #[async_trait]
    impl JobHandler for Slow {
        async fn execute(&self, _ctx: &JobContext) -> JobResult {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(80)).await;
            self.runs.lock().unwrap().push((start, Instant::now()));
            Ok(None)
        }
    }

    fn setup(names: &[&str]) -> (tempfile::TempDir, JobRegistry, JobExecutor, Arc<Mutex<Vec<(Instant, Instant)>>>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("cadence.db")).unwrap();
        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut registry = JobRegistry::new();
        for name in names {
            let def = JobDefinition::interval(name, Duration::from_secs(3600));
            registry.register(def, Arc::new(Slow { runs: runs.clone() })).unwrap();
        }
        registry.reconcile(&store.conn()).unwrap();
        let executor = JobExecutor::new(store, "s1", Duration::from_secs(10));
        (dir, registry, executor, runs)
    }

    #[tokio::test]
    async fn busy_queue_turns_away_second_batch() {
        let (_dir, registry, executor, runs) = setup(&["a", "b"]);
        let queue = JobQueue::new("default");
        let first = vec![registry.by_name("a").unwrap().clone()];
        let second = vec![registry.by_name("b").unwrap().clone()];

        let (r1, r2) = tokio::join!(
            queue.execute(&first, &executor, None),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(queue.is_busy());
                queue.execute(&second, &executor, None).await
            }
        );

        assert_eq!(r1.unwrap().len(), 1);
        assert!(r2.is_none());
        assert_eq!(runs.lock().unwrap().len(), 1);
        assert!(!queue.is_busy());
    }

    #[tokio::test]
    async fn jobs_in_one_batch_never_overlap() {
        let (_dir, registry, executor, runs) = setup(&["a", "b", "c"]);
        let queue = JobQueue::new("default");
        let batch: Vec<_> = ["a", "b", "c"].iter().map(|n| registry.by_name(n).unwrap().clone()).collect();

        let outcomes = queue.execute(&batch, &executor, None).await.unwrap();
        assert!(outcomes.iter().all(|(_, o)| *o == ExecutionOutcome::Completed));

        let runs = runs.lock().unwrap();
        assert_eq!(runs.len(), 3);
        for pair in runs.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
    }

    #[tokio::test]
    async fn separate_queues_run_side_by_side() {
        let (_dir, registry, executor, runs) = setup(&["a", "b"]);
        let q1 = JobQueue::new("q1");
        let q2 = JobQueue::new("q2");
        let a = vec![registry.by_name("a").unwrap().clone()];
        let b = vec![registry.by_name("b").unwrap().clone()];

        let (r1, r2) = tokio::join!(q1.execute(&a, &executor, None), q2.execute(&b, &executor, None));
        assert!(r1.is_some() && r2.is_some());

        let runs = runs.lock().unwrap();
        let (first, second) = (runs[0], runs[1]);
        // the second started before the first finished
        assert!(second.0 < first.1);
    }

    #[tokio::test]
    async fn forced_run_waits_for_the_queue() {
        let (_dir, registry, executor, runs) = setup(&["a", "b"]);
        let queue = JobQueue::new("default");
        let batch = vec![registry.by_name("a").unwrap().clone()];
        let forced = registry.by_name("b").unwrap();

        let (_, outcome) = tokio::join!(queue.execute(&batch, &executor, None), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.execute_forced(forced, &executor).await
        });

        assert_eq!(outcome, ExecutionOutcome::Completed);
        let runs = runs.lock().unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].1 <= runs[1].0);
    }
}
