//! Service configuration management

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clock_sync::{SyncConfig, DEFAULT_AUTHORITY_BIND};
use session_aggregator::TradingEntry;
use session_core::NYSE_EXCHANGE;
use signal_broadcaster::BroadcasterConfig;
use trading_calendar::{CalendarSpec, GeneratorConfig, PacerConfig};

/// Prefix of environment overrides, e.g. `CONTROL_PLANE_LOGGING__LEVEL=debug`
pub const ENV_PREFIX: &str = "CONTROL_PLANE";

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Clock authority endpoints
    pub authority: AuthorityConfig,

    /// Clock synchronizer settings
    pub sync: SyncConfig,

    /// Calendar event generation
    pub generator: GeneratorConfig,

    /// Real-time pacing of generated events
    pub pacer: PacerConfig,

    /// Signal broadcaster settings
    pub broadcaster: BroadcasterConfig,

    /// Which dates to generate
    pub schedule: ScheduleConfig,

    /// Calendars added on top of the built-in ones
    pub calendars: Vec<CalendarSpec>,

    /// Strategies to run
    pub controllables: Vec<ControllableConfig>,

    /// Service-level configuration
    pub service: ServiceSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Remote authority, e.g. `ws://10.0.0.5:8095`. The local clock is the authority when unset.
    pub url: Option<String>,

    /// Address the `authority` subcommand listens on
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// First date to generate; defaults to yesterday in UTC so an open session is picked up
    pub start_date: Option<NaiveDate>,

    /// Number of calendar days to cover
    pub days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllableConfig {
    pub id: String,
    pub exchanges: Vec<String>,
    #[serde(default)]
    pub trading_entry: TradingEntry,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Log file path (if None, logs to stdout)
    pub file: Option<PathBuf>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics
    pub enabled: bool,

    /// Metrics export port
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            authority: AuthorityConfig::default(),
            sync: SyncConfig::default(),
            generator: GeneratorConfig::default(),
            pacer: PacerConfig::default(),
            broadcaster: BroadcasterConfig::default(),
            schedule: ScheduleConfig::default(),
            calendars: Vec::new(),
            controllables: vec![ControllableConfig {
                id: "default".to_string(),
                exchanges: vec![NYSE_EXCHANGE.to_string()],
                trading_entry: TradingEntry::default(),
            }],
            service: ServiceSettings::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self { url: None, bind: DEFAULT_AUTHORITY_BIND.to_string() }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { start_date: None, days: 7 }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { shutdown_timeout_secs: 10 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), file: None }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, port: 9090 }
    }
}

impl AuthorityConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind.parse().with_context(|| format!("Invalid authority bind address: {}", self.bind))
    }

    /// Listen address for the `authority` subcommand; the command line wins
    pub fn resolve_bind(&self, cli: Option<SocketAddr>) -> Result<SocketAddr> {
        match cli {
            Some(addr) => Ok(addr),
            None => self.bind_addr(),
        }
    }
}

impl ServiceSettings {
    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Load configuration from an optional file and environment variables
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read configuration sources")?;

    let config: ServiceConfig =
        settings.try_deserialize().context("Failed to deserialize configuration")?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    // Validate log level
    if config.logging.level.trim().is_empty() {
        return Err(anyhow!("Log level must not be empty"));
    }

    // Validate log format
    match config.logging.format.as_str() {
        "json" | "pretty" | "compact" => {}
        _ => return Err(anyhow!("Invalid log format: {}", config.logging.format)),
    }

    // Validate metrics port
    if config.metrics.enabled && config.metrics.port == 0 {
        return Err(anyhow!("Invalid metrics port: {}", config.metrics.port));
    }

    if let Some(url) = &config.authority.url {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(anyhow!("Authority url must be ws:// or wss://, got {}", url));
        }
    }
    config.authority.bind_addr()?;

    if config.sync.max_attempts == 0 {
        return Err(anyhow!("sync.max_attempts must be at least 1"));
    }

    if config.schedule.days == 0 {
        return Err(anyhow!("schedule.days must be at least 1"));
    }

    if config.controllables.is_empty() {
        return Err(anyhow!("At least one controllable must be configured"));
    }

    let mut ids = HashSet::new();
    for controllable in &config.controllables {
        if !ids.insert(controllable.id.as_str()) {
            return Err(anyhow!("Duplicate controllable id: {}", controllable.id));
        }
        if controllable.exchanges.is_empty() {
            return Err(anyhow!("Controllable {} subscribes to no exchanges", controllable.id));
        }
    }

    Ok(())
}

/// Save configuration to a TOML file
pub fn save_config(config: &ServiceConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write configuration to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ServiceConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_controllables() {
        let mut config = ServiceConfig::default();
        config.controllables.push(config.controllables[0].clone());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_non_websocket_authority() {
        let mut config = ServiceConfig::default();
        config.authority.url = Some("http://localhost:8095".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_authority_bind_from_config_or_cli() {
        let mut config = ServiceConfig::default();
        config.authority.bind = "127.0.0.1:9100".to_string();
        let cli: SocketAddr = "0.0.0.0:9200".parse().unwrap();

        assert_eq!(config.authority.resolve_bind(None).unwrap(), "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.authority.resolve_bind(Some(cli)).unwrap(), cli);

        config.authority.bind = "not-an-address".to_string();
        assert!(config.authority.resolve_bind(None).is_err());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_loads_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[authority]
url = "ws://127.0.0.1:9000"

[schedule]
start_date = "2024-03-04"
days = 3

[broadcaster]
coalesce_window_ms = 250

[[controllables]]
id = "pairs"
exchanges = ["NYSE", "XLON"]
trading_entry = "on_first_minute"

[[calendars]]
exchange = "XLON"
timezone = "Europe/London"
open = "08:00:00"
close = "16:30:00"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.authority.url.as_deref(), Some("ws://127.0.0.1:9000"));
        assert_eq!(config.schedule.start_date, NaiveDate::from_ymd_opt(2024, 3, 4));
        assert_eq!(config.schedule.days, 3);
        assert_eq!(config.broadcaster.coalesce_window_ms, 250);
        assert_eq!(config.controllables.len(), 1);
        assert_eq!(config.controllables[0].trading_entry, TradingEntry::OnFirstMinute);
        assert_eq!(config.calendars[0].exchange, "XLON");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control-plane.toml");
        let mut config = ServiceConfig::default();
        config.schedule.days = 2;
        save_config(&config, &path).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.schedule.days, 2);
        assert_eq!(loaded.controllables, config.controllables);
    }
}
