//! `cadence-security`: per-process replica of the role/user/team/permission
//! graph, kept eventually consistent through the `SECURITY_CACHE` channel of
//! the shared event log.
//!
//! Writers change the `sec_*` tables and then [`events::publish`] an event;
//! every process's [`refresh::PermissionCacheJob`] picks it up within one
//! refresh interval.

pub mod cache;
pub mod db;
pub mod error;
pub mod events;
pub mod refresh;
pub mod types;

pub use cache::PermissionCache;
pub use error::{Result, SecurityError};
pub use events::{publish, SecurityEvent};
pub use refresh::PermissionCacheJob;
pub use types::{RefreshReport, UserAccess};
