use std::sync::Arc;
use std::time::Duration;

use cadence_core::CadenceConfig;
use cadence_scheduler::jobs::HistoryRetentionJob;
use cadence_scheduler::{JobRegistry, Result};
use cadence_security::{PermissionCache, PermissionCacheJob};

/// Every job this node declares.
pub fn build_registry(config: &CadenceConfig, permissions: Arc<PermissionCache>) -> Result<JobRegistry> {
    let mut registry = JobRegistry::new();

    registry.register(
        HistoryRetentionJob::definition(),
        Arc::new(HistoryRetentionJob::new(config.scheduler.history_retention_days)),
    )?;

    let security = &config.security;
    registry.register(
        PermissionCacheJob::definition(Duration::from_secs(security.refresh_interval_secs.max(1))),
        Arc::new(PermissionCacheJob::new(permissions, Duration::from_secs(security.event_ttl_secs))),
    )?;

    Ok(registry)
}
