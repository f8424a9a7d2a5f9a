//! `cadence-scheduler`: fleet-wide job scheduling coordinated through a
//! shared SQLite store.
//!
//! # Overview
//!
//! Jobs are declared in code and reconciled into the `jobs` table at boot.
//! Every process runs a [`engine::JobService`] that ticks once a second,
//! consumes manual triggers addressed to it, and offers due jobs to their
//! queues. No process talks to another directly: presence, triggers,
//! history and heartbeats all live in the store.
//!
//! # Affinity
//!
//! | Variant              | Runs on                                          |
//! |----------------------|--------------------------------------------------|
//! | `All`                | any server whose tick finds it due               |
//! | `One { server: None }` | the elected default server only                |
//! | `One { server: Some }` | the named server only                          |
//! | `Every`              | each server, on its own cadence                  |
//!
//! # Modules
//!
//! | Module      | Role                                              |
//! |-------------|---------------------------------------------------|
//! | `registry`  | declarations and boot-time reconciliation         |
//! | `schedule`  | due-ness of interval and time-of-day schedules    |
//! | `executor`  | one attempt: admission, heartbeat, outcome        |
//! | `queue`     | one-at-a-time lanes                               |
//! | `engine`    | the tick loop                                     |
//! | `event_log` | append-only broadcast channel                     |
//! | `handle`    | operator actions                                  |

pub mod affinity;
pub mod db;
pub mod engine;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod handle;
pub mod handler;
pub mod heartbeat;
pub mod jobs;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod types;

pub use db::Store;
pub use engine::{JobService, SchedulerOptions, TickReport};
pub use error::{JobError, Result, SchedulerError};
pub use handle::SchedulerHandle;
pub use handler::{JobContext, JobHandler, JobResult};
pub use registry::{JobRegistry, RegisteredJob};
pub use types::{
    DaysOfWeek, ExecuteJobOn, ExecutionOutcome, HistoryStatus, Job, JobDefinition, JobHistory, Schedule, Server,
    SkipReason,
};
