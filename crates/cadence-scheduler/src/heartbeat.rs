use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::db::{open_connection, Store};
use crate::store;
use crate::types::HistoryStatus;

/// Liveness ticker for one running attempt.
///
/// Runs as its own task with its own SQLite connection, so a job that hogs
/// its thread or the shared store handle does not silence its heartbeat.
/// Every failure is logged and swallowed.
pub struct Heartbeat {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Start stamping `history_id` (and its job row) every `interval`.
    /// The first stamp happens one interval from now; the row was created
    /// with a fresh heartbeat.
    pub fn start(store: &Store, history_id: String, job_id: Uuid, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let path = store.path().to_path_buf();
        let span = tracing::debug_span!("heartbeat", history_id = %history_id);

        let task = tokio::spawn(
            async move {
                let mut conn: Option<Connection> = None;
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await; // completes immediately

                loop {
                    tokio::select! {
                        _ = ticker.tick() => beat(&path, &mut conn, &history_id, job_id),
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!("heartbeat stopped");
            }
            .instrument(span),
        );

        Self { stop_tx, task }
    }

    /// Stop the ticker and wait for it to finish its current write.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "heartbeat task ended abnormally");
        }
    }
}

fn beat(path: &Path, conn: &mut Option<Connection>, history_id: &str, job_id: Uuid) {
    if conn.is_none() {
        match open_connection(path) {
            Ok(c) => *conn = Some(c),
            Err(e) => {
                warn!(error = %e, "heartbeat could not open its connection");
                return;
            }
        }
    }
    let Some(conn) = conn.as_ref() else {
        return;
    };

    // Re-read first: never stamp a row someone already moved to a terminal state.
    match store::get_history(conn, history_id) {
        Ok(Some(h)) if h.status == HistoryStatus::Running => {}
        Ok(_) => {
            debug!("history row no longer running; skipping beat");
            return;
        }
        Err(e) => {
            warn!(error = %e, "heartbeat read failed");
            return;
        }
    }

    let now = Utc::now();
    if let Err(e) = store::touch_history_heartbeat(conn, history_id, now) {
        warn!(error = %e, "heartbeat write failed");
    }
    if let Err(e) = store::touch_job_heartbeat(conn, job_id, now) {
        debug!(error = %e, "job heartbeat write failed");
    }
}
