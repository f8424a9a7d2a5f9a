use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for job ids. Changing it would orphan every registry row.
const JOB_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6a1c_1f0e_8b7d_4c55_9a3e_2f4d_5b6c_7e80);

/// Stable id of a job, derived from its name so every process computes the
/// same id without talking to the others.
pub fn job_id_for(name: &str) -> Uuid {
    Uuid::new_v5(&JOB_ID_NAMESPACE, name.as_bytes())
}

/// When a job becomes due.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Due once `every` has elapsed since the last execution.
    Interval { every: Duration },

    /// Due during the minute following `at` each day. `timezone` is an IANA
    /// zone; `None` means UTC.
    TimeOfDay { at: NaiveTime, timezone: Option<Tz> },
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval { every } => write!(f, "every {}s", every.as_secs()),
            Schedule::TimeOfDay { at, timezone } => {
                let zone = timezone.map(|tz| tz.name()).unwrap_or("UTC");
                write!(f, "daily at {} {}", at.format("%H:%M"), zone)
            }
        }
    }
}

/// Bitmask of weekdays on which a job may run. Bit 0 is Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const NONE: DaysOfWeek = DaysOfWeek(0);
    pub const MONDAY: DaysOfWeek = DaysOfWeek(1 << 0);
    pub const TUESDAY: DaysOfWeek = DaysOfWeek(1 << 1);
    pub const WEDNESDAY: DaysOfWeek = DaysOfWeek(1 << 2);
    pub const THURSDAY: DaysOfWeek = DaysOfWeek(1 << 3);
    pub const FRIDAY: DaysOfWeek = DaysOfWeek(1 << 4);
    pub const SATURDAY: DaysOfWeek = DaysOfWeek(1 << 5);
    pub const SUNDAY: DaysOfWeek = DaysOfWeek(1 << 6);
    pub const WEEKDAYS: DaysOfWeek = DaysOfWeek(0b001_1111);
    pub const WEEKEND: DaysOfWeek = DaysOfWeek(0b110_0000);
    pub const ALL: DaysOfWeek = DaysOfWeek(0b111_1111);

    pub fn from_weekday(day: Weekday) -> Self {
        DaysOfWeek(1 << day.num_days_from_monday())
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & Self::from_weekday(day).0 != 0
    }
}

impl Default for DaysOfWeek {
    fn default() -> Self {
        DaysOfWeek::ALL
    }
}

/// Which servers of the fleet may run a job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecuteJobOn {
    /// Any server; the shared last-execution timestamp spaces runs out.
    #[default]
    All,
    /// Exactly one server: the pinned one, or the elected default server.
    One { server: Option<String> },
    /// Every server, each on its own cadence (process-local maintenance).
    Every,
}

/// A job as declared in code. Read-only to the scheduler.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub id: Uuid,
    pub name: String,
    pub queue: String,
    pub schedule: Schedule,
    pub days: DaysOfWeek,
    pub execute_on: ExecuteJobOn,
    /// Active state used when the registry row is first created. Later
    /// changes are made on the row, not here.
    pub initially_active: bool,
    pub tag: Option<String>,
    pub parameters: serde_json::Value,
}

/// Queue used when a declaration does not name one.
pub const DEFAULT_QUEUE: &str = "default";

impl JobDefinition {
    fn new(name: &str, schedule: Schedule) -> Self {
        Self {
            id: job_id_for(name),
            name: name.to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            schedule,
            days: DaysOfWeek::ALL,
            execute_on: ExecuteJobOn::All,
            initially_active: true,
            tag: None,
            parameters: serde_json::Value::Null,
        }
    }

    /// A job due every `every`.
    pub fn interval(name: &str, every: Duration) -> Self {
        Self::new(name, Schedule::Interval { every })
    }

    /// A job due once a day at `at` (UTC unless [`Self::in_timezone`] is used).
    pub fn daily_at(name: &str, at: NaiveTime) -> Self {
        Self::new(name, Schedule::TimeOfDay { at, timezone: None })
    }

    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    pub fn on_days(mut self, days: DaysOfWeek) -> Self {
        self.days = days;
        self
    }

    pub fn execute_on(mut self, execute_on: ExecuteJobOn) -> Self {
        self.execute_on = execute_on;
        self
    }

    /// Only meaningful for time-of-day schedules; ignored for intervals.
    pub fn in_timezone(mut self, tz: Tz) -> Self {
        if let Schedule::TimeOfDay { ref mut timezone, .. } = self.schedule {
            *timezone = Some(tz);
        }
        self
    }

    pub fn inactive(mut self) -> Self {
        self.initially_active = false;
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A persisted registry row (`jobs` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub queue: String,
    pub active: bool,
    /// Advisory: last start or finish on any server.
    pub last_execution: Option<DateTime<Utc>>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub tag: Option<String>,
}

/// Lifecycle state of a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HistoryStatus::Running => "running",
            HistoryStatus::Completed => "completed",
            HistoryStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for HistoryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(HistoryStatus::Running),
            "completed" => Ok(HistoryStatus::Completed),
            "failed" => Ok(HistoryStatus::Failed),
            other => Err(format!("unknown history status: {other}")),
        }
    }
}

/// One execution attempt (`job_history` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistory {
    /// UUID v7: time-sortable.
    pub id: String,
    pub job_id: Uuid,
    pub server: String,
    pub status: HistoryStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Result message on success, error text or panic message on failure.
    pub message: Option<String>,
    pub heartbeat: DateTime<Utc>,
}

/// A fleet member (`servers` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub last_ping: DateTime<Utc>,
}

/// Why an attempt did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No registry row or no handler for the job any more.
    Deleted,
    Inactive,
    NotThisServer,
    NotDue,
    /// A fresh `running` row for this job already exists on this server.
    AlreadyRunning,
}

/// Result of handing a job to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Skipped(SkipReason),
    Completed,
    Failed(String),
}

impl ExecutionOutcome {
    pub fn ran(&self) -> bool {
        !matches!(self, ExecutionOutcome::Skipped(_))
    }
}
