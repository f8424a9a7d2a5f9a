use chrono::{DateTime, Duration, Utc};

use crate::types::{ExecuteJobOn, Server};

/// Elect the fleet's default server.
///
/// Candidates are the servers seen within `liveness` of `now`; if none
/// qualify (e.g. the whole fleet just restarted) every known server is a
/// candidate. The lexicographically lowest name wins, so every process
/// reading the same table reaches the same answer.
pub fn elect_default_server(servers: &[Server], now: DateTime<Utc>, liveness: Duration) -> Option<String> {
    let live = match now.checked_sub_signed(liveness) {
        Some(cutoff) => servers.iter().filter(|s| s.last_ping >= cutoff).map(|s| &s.name).min(),
        None => servers.iter().map(|s| &s.name).min(),
    };
    live.or_else(|| servers.iter().map(|s| &s.name).min()).cloned()
}

/// Whether `this_server` may run a job with the given affinity.
pub fn may_run_here(execute_on: &ExecuteJobOn, this_server: &str, default_server: Option<&str>) -> bool {
    match execute_on {
        ExecuteJobOn::All | ExecuteJobOn::Every => true,
        ExecuteJobOn::One { server: Some(pinned) } => pinned == this_server,
        ExecuteJobOn::One { server: None } => default_server == Some(this_server),
    }
}
