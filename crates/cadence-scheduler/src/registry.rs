use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::handler::JobHandler;
use crate::store;
use crate::types::{Job, JobDefinition, Schedule};

/// A declaration paired with the code that runs it.
#[derive(Clone)]
pub struct RegisteredJob {
    pub definition: JobDefinition,
    pub handler: Arc<dyn JobHandler>,
}

/// Every job this process knows how to run, keyed by stable id.
///
/// Populated once at startup and read-only afterwards, so it is shared as
/// `Arc<JobRegistry>` without locking.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: HashMap<Uuid, RegisteredJob>,
}

/// What a reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a job. Names must be unique and intervals non-zero.
    pub fn register(&mut self, definition: JobDefinition, handler: Arc<dyn JobHandler>) -> Result<()> {
        if let Schedule::Interval { every } = definition.schedule {
            if every.is_zero() {
                return Err(SchedulerError::InvalidSchedule(format!("{}: zero interval", definition.name)));
            }
        }
        if self.jobs.contains_key(&definition.id) {
            return Err(SchedulerError::DuplicateJob { name: definition.name });
        }
        self.jobs.insert(definition.id, RegisteredJob { definition, handler });
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<&RegisteredJob> {
        self.jobs.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisteredJob> {
        self.jobs.values().find(|j| j.definition.name == name)
    }

    /// Declarations sorted by name.
    pub fn definitions(&self) -> Vec<&JobDefinition> {
        let mut defs: Vec<_> = self.jobs.values().map(|j| &j.definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Bring the `jobs` table in line with the declarations.
    ///
    /// Missing rows are inserted with the declared initial state, rows whose
    /// queue or tag moved are updated, rows nobody declares are deleted.
    /// Active flags and timestamps on existing rows are left alone. Safe to
    /// run from several booting processes at once: inserts are
    /// `INSERT OR IGNORE` keyed by the name-derived id.
    #[instrument(skip_all, fields(declared = self.jobs.len()))]
    pub fn reconcile(&self, conn: &Connection) -> Result<ReconcileReport> {
        let tx = conn.unchecked_transaction()?;
        let mut report = ReconcileReport::default();

        let existing = store::list_jobs(&tx)?;
        let existing_ids: HashSet<Uuid> = existing.iter().map(|j| j.id).collect();

        for row in &existing {
            match self.jobs.get(&row.id) {
                None => {
                    if store::delete_job(&tx, row.id)? {
                        info!(job = %row.name, "job no longer declared; removed");
                        report.deleted += 1;
                    }
                }
                Some(registered) => {
                    let def = &registered.definition;
                    if row.queue != def.queue || row.tag != def.tag {
                        store::update_job_placement(&tx, row.id, &def.queue, def.tag.as_deref())?;
                        info!(job = %def.name, queue = %def.queue, "job placement updated");
                        report.updated += 1;
                    }
                }
            }
        }

        for registered in self.jobs.values() {
            let def = &registered.definition;
            if existing_ids.contains(&def.id) {
                continue;
            }
            let row = Job {
                id: def.id,
                name: def.name.clone(),
                queue: def.queue.clone(),
                active: def.initially_active,
                last_execution: None,
                heartbeat: None,
                tag: def.tag.clone(),
            };
            // A concurrent boot may have inserted it after our read.
            if store::insert_job_if_missing(&tx, &row)? {
                info!(job = %def.name, schedule = %def.schedule, active = def.initially_active, "job registered");
                report.inserted += 1;
            }
        }

        tx.commit()?;
        Ok(report)
    }
}
