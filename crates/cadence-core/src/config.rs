use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Scheduling constants. The tick and trigger window are part of the fleet
// contract: every process must agree on them.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TRIGGER_WINDOW_SECS: u64 = 30;
pub const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_SECURITY_REFRESH_SECS: u64 = 2;
pub const DEFAULT_EVENT_TTL_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Identity of this process within the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique, stable name. Manual triggers are addressed to it and the
    /// default-server election orders by it.
    #[serde(default = "default_server_name")]
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Admin API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Control loop resolution.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Heartbeat cadence for running jobs and for server presence.
    /// A running job is presumed dead after three missed pings.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Manual triggers older than this are purged without running.
    #[serde(default = "default_trigger_window_secs")]
    pub trigger_window_secs: u64,
    /// Days of job history kept by the retention job.
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            trigger_window_secs: DEFAULT_TRIGGER_WINDOW_SECS,
            history_retention_days: DEFAULT_HISTORY_RETENTION_DAYS,
        }
    }
}

/// Permission cache refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_security_refresh_secs")]
    pub refresh_interval_secs: u64,
    /// SECURITY_CACHE events older than this are garbage-collected.
    #[serde(default = "default_event_ttl_secs")]
    pub event_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_SECURITY_REFRESH_SECS,
            event_ttl_secs: DEFAULT_EVENT_TTL_SECS,
        }
    }
}

fn default_server_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_ping_interval_secs() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}
fn default_trigger_window_secs() -> u64 {
    DEFAULT_TRIGGER_WINDOW_SECS
}
fn default_history_retention_days() -> u32 {
    DEFAULT_HISTORY_RETENTION_DAYS
}
fn default_security_refresh_secs() -> u64 {
    DEFAULT_SECURITY_REFRESH_SECS
}
fn default_event_ttl_secs() -> u64 {
    DEFAULT_EVENT_TTL_SECS
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_SCHEDULER__PING_INTERVAL_SECS=5`. A missing file is not an
    /// error: every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fleet_constants() {
        let config = CadenceConfig::default();
        assert_eq!(config.scheduler.tick_interval_ms, 1_000);
        assert_eq!(config.scheduler.trigger_window_secs, 30);
        assert_eq!(config.security.event_ttl_secs, 300);
        assert_eq!(config.http.port, DEFAULT_PORT);
    }

    #[test]
    fn load_reads_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.toml");
        std::fs::write(
            &path,
            r#"
[server]
name = "node-b"

[scheduler]
ping_interval_secs = 3
history_retention_days = 7
"#,
        )
        .unwrap();

        let config = CadenceConfig::load(path.to_str()).unwrap();
        assert_eq!(config.server.name, "node-b");
        assert_eq!(config.scheduler.ping_interval_secs, 3);
        assert_eq!(config.scheduler.history_retention_days, 7);
        // untouched sections fall back to defaults
        assert_eq!(config.scheduler.trigger_window_secs, DEFAULT_TRIGGER_WINDOW_SECS);
        assert_eq!(config.security.refresh_interval_secs, DEFAULT_SECURITY_REFRESH_SECS);
    }

    #[test]
    fn load_rejects_malformed_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.toml");
        std::fs::write(&path, "[scheduler]\ntick_interval_ms = \"soon\"\n").unwrap();

        let err = CadenceConfig::load(path.to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
