//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files (JSON when the file ends in `.json`) and
//! environment variable overrides for the connection and logging settings.
//!
//! JSON files written for the earlier Go monitor load unchanged: every field
//! also answers to its CamelCase name (`DatabaseConfig`, `Monitoring`, `SQL`,
//! `RollUp`, ...). Unknown keys are rejected rather than ignored.

use crate::dispatcher::FailurePolicy;
use crate::output::OutputFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Replacement for spaces in field names when printing
    #[serde(default = "default_space_replacement", alias = "SpaceReplacement")]
    pub space_replacement: String,

    #[serde(default, alias = "DatabaseConfig")]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Monitoring queries, dispatched in parallel each run
    #[serde(default, alias = "Monitoring")]
    pub queries: Vec<Query>,
}

fn default_space_replacement() -> String {
    "_".to_string()
}

/// Supported database drivers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// PostgreSQL server reached with the keyword/value connection string
    #[default]
    #[serde(alias = "postgresql")]
    Postgres,

    /// SQLite file; `database` is the file path
    Sqlite,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default, alias = "Driver")]
    pub driver: DatabaseDriver,

    #[serde(default = "default_db_host", alias = "Host")]
    pub host: String,

    #[serde(default = "default_db_port", alias = "Port")]
    pub port: u16,

    /// Database name, or the file path for SQLite
    #[serde(default = "default_db_name", alias = "Database")]
    pub database: String,

    #[serde(default, alias = "Username")]
    pub username: String,

    #[serde(default, alias = "Password")]
    pub password: String,

    #[serde(default = "default_ssl_mode", alias = "SSLMode")]
    pub ssl_mode: String,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "postgres".to_string()
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            username: String::new(),
            password: String::new(),
            ssl_mode: default_ssl_mode(),
        }
    }
}

impl DatabaseConfig {
    /// Keyword/value connection parameters
    pub fn connection_string(&self) -> String {
        self.format_params(&self.password)
    }

    /// Connection parameters with the password masked, safe to log
    pub fn redacted_connection_string(&self) -> String {
        let masked = if self.password.is_empty() { "" } else { "****" };
        self.format_params(masked)
    }

    fn format_params(&self, password: &str) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={}",
            quote_param(&self.host),
            self.port,
            quote_param(&self.database),
            quote_param(&self.username),
            quote_param(password),
            quote_param(&self.ssl_mode)
        )
    }
}

/// Quote a connection parameter when it is empty or holds spaces or quotes
fn quote_param(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Dispatcher configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Records buffered between producers and the printer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Whether one failing query aborts the run or is reported and skipped
    #[serde(default)]
    pub on_query_error: FailurePolicy,

    /// Repeat runs every N seconds; a single run when unset
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Lower bound for time-filtered queries when `--since` is not given
    #[serde(default)]
    pub default_since: Option<String>,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            on_query_error: FailurePolicy::default(),
            interval_secs: None,
            default_since: None,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// strftime format for the bracketed event time
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

fn default_time_format() -> String {
    crate::output::DEFAULT_TIME_FORMAT.to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            time_format: default_time_format(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

/// One monitoring query
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Query {
    /// Label for diagnostics; the SQL text is used when absent
    #[serde(default, alias = "Name")]
    pub name: Option<String>,

    #[serde(alias = "SQL")]
    pub sql: String,

    /// Collapse a two-column result into a single key/value record
    #[serde(default, alias = "RollUp")]
    pub roll_up: bool,

    /// Bind the run's lower-bound timestamp as the first query parameter
    #[serde(default, alias = "TimeFilter")]
    pub time_filter: bool,

    /// Column holding the event time
    #[serde(default, alias = "TimeStampColumn")]
    pub timestamp_column: Option<String>,

    /// Format used when the event time column is a string: strftime, or a
    /// Go reference layout such as `2006-01-02 15:04:05`
    #[serde(default = "default_timestamp_format", alias = "TimeStampFormat")]
    pub timestamp_format: String,

    #[serde(default, alias = "Transforms")]
    pub transforms: Vec<Transform>,
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

impl Query {
    /// Create a per-row query with no time handling
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            name: None,
            sql: sql.into(),
            roll_up: false,
            time_filter: false,
            timestamp_column: None,
            timestamp_format: default_timestamp_format(),
            transforms: Vec::new(),
        }
    }

    /// Builder method: set the diagnostic label
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder method: roll rows up into one record
    pub fn rolled_up(mut self) -> Self {
        self.roll_up = true;
        self
    }

    /// Builder method: bind the lower-bound timestamp parameter
    pub fn time_filtered(mut self) -> Self {
        self.time_filter = true;
        self
    }

    /// Builder method: resolve the event time from a column
    pub fn timestamp(mut self, column: impl Into<String>, format: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self.timestamp_format = format.into();
        self
    }

    /// Builder method: append a transform rule
    pub fn transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Label used in logs and errors
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.sql.trim())
    }
}

/// A regex substitution applied to result fields
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transform {
    /// Field to rewrite; every string field when absent or empty
    #[serde(default, alias = "FieldName")]
    pub field_name: Option<String>,

    #[serde(alias = "Regexp")]
    pub regexp: String,

    #[serde(default, alias = "Output")]
    pub output: String,
}

impl Transform {
    /// Rule applied to every string field
    pub fn all_fields(regexp: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            field_name: None,
            regexp: regexp.into(),
            output: output.into(),
        }
    }

    /// Rule applied to one named field
    pub fn field(
        name: impl Into<String>,
        regexp: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            field_name: Some(name.into()),
            regexp: regexp.into(),
            output: output.into(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config: Config = if is_json {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?
        };

        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from the first default location that exists
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("dbmonitor").join("config.toml")),
            Some(PathBuf::from("/etc/dbmonitor/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        for path in &config_paths {
            if path.exists() {
                tracing::info!("Loading config from {:?}", path);
                return Self::load_with_env(path);
            }
        }

        Err(ConfigError::NotFound(config_paths))
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Database overrides
        if let Ok(host) = std::env::var("DBMONITOR_DB_HOST") {
            self.database.host = host;
        }
        if let Ok(port) = std::env::var("DBMONITOR_DB_PORT") {
            if let Ok(p) = port.parse() {
                self.database.port = p;
            }
        }
        if let Ok(name) = std::env::var("DBMONITOR_DB_NAME") {
            self.database.database = name;
        }
        if let Ok(user) = std::env::var("DBMONITOR_DB_USER") {
            self.database.username = user;
        }
        if let Ok(password) = std::env::var("DBMONITOR_DB_PASSWORD") {
            self.database.password = password;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("DBMONITOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("DBMONITOR_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            space_replacement: default_space_replacement(),
            database: DatabaseConfig::default(),
            monitor: MonitorConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
            queries: Vec::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("No config file found (looked in {0:?})")]
    NotFound(Vec<PathBuf>),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# dbmonitor Configuration
#
# Environment variables override these settings:
# - DBMONITOR_DB_HOST, DBMONITOR_DB_PORT, DBMONITOR_DB_NAME
# - DBMONITOR_DB_USER, DBMONITOR_DB_PASSWORD
# - DBMONITOR_LOG_LEVEL, DBMONITOR_LOG_FORMAT

# Replacement for spaces in field names
space_replacement = "_"

[database]
# Database driver: postgres or sqlite
driver = "postgres"

# Connection parameters (for sqlite, `database` is the file path)
host = "localhost"
port = 5432
database = "postgres"
username = ""
password = ""
ssl_mode = "disable"

[monitor]
# Records buffered between query tasks and the printer
channel_capacity = 64

# What a failing query does to the run: abort or isolate
on_query_error = "abort"

# Repeat every N seconds (single run when unset)
# interval_secs = 60

# Lower bound for time-filtered queries when --since is not given
# default_since = "1h"

[output]
# Output format: kv or json
format = "kv"

# strftime format for the bracketed event time
time_format = "%m/%d/%Y %H:%M:%S %z"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty or json
format = "pretty"

# Optional log file path (stderr when unset)
# file = "database-monitor.log"

[[queries]]
name = "active sessions"
sql = "SELECT state, count(*) FROM sessions GROUP BY state"
roll_up = true

[[queries]]
name = "recent errors"
sql = "SELECT logged_at, message FROM errors WHERE logged_at > $1"
time_filter = true
timestamp_column = "logged_at"
timestamp_format = "%Y-%m-%d %H:%M:%S"

[[queries.transforms]]
regexp = "\\s+"
output = " "
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();

        assert_eq!(config.space_replacement, "_");
        assert_eq!(config.database.driver, DatabaseDriver::Postgres);
        assert_eq!(config.monitor.channel_capacity, 64);
        assert_eq!(config.monitor.on_query_error, FailurePolicy::Abort);
        assert_eq!(config.queries.len(), 2);
        assert!(config.queries[0].roll_up);
        assert!(config.queries[1].time_filter);
        assert_eq!(config.queries[1].transforms.len(), 1);
        assert_eq!(config.queries[1].transforms[0].output, " ");
    }

    #[test]
    fn test_query_defaults() {
        let config: Config = toml::from_str(
            r#"
            [[queries]]
            sql = "SELECT 1"
            "#,
        )
        .unwrap();

        let query = &config.queries[0];
        assert!(!query.roll_up);
        assert!(!query.time_filter);
        assert_eq!(query.timestamp_column, None);
        assert_eq!(query.timestamp_format, "%Y-%m-%d %H:%M:%S");
        assert_eq!(query.label(), "SELECT 1");
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "space_replacement": "-",
                "database": {{ "database": "/tmp/x.db" }},
                "queries": [{{ "sql": "SELECT 1", "roll_up": true }}]
            }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.space_replacement, "-");
        assert_eq!(config.database.database, "/tmp/x.db");
        assert!(config.queries[0].roll_up);
    }

    #[test]
    fn test_load_go_monitor_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "DatabaseConfig": {{
                    "Host": "db", "Port": 6543, "Username": "mon", "Password": "pw",
                    "Database": "app", "SSLMode": "require"
                }},
                "SpaceReplacement": "-",
                "Monitoring": [
                    {{ "SQL": "SELECT state, count(*) FROM sessions GROUP BY state", "RollUp": true }},
                    {{
                        "SQL": "SELECT * FROM jobs WHERE finished > $1",
                        "TimeFilter": true,
                        "TimeStampColumn": "finished",
                        "TimeStampFormat": "2006-01-02 15:04:05",
                        "Transforms": [{{ "FieldName": "status", "Regexp": "^F.*", "Output": "failed" }}]
                    }}
                ]
            }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.queries.len(), 2);
        assert_eq!(config.space_replacement, "-");
        assert_eq!(config.database.driver, DatabaseDriver::Postgres);
        assert_eq!(
            config.database.connection_string(),
            "host=db port=6543 dbname=app user=mon password=pw sslmode=require"
        );

        assert!(config.queries[0].roll_up);
        let jobs = &config.queries[1];
        assert!(jobs.time_filter);
        assert_eq!(jobs.timestamp_column.as_deref(), Some("finished"));
        assert_eq!(jobs.timestamp_format, "2006-01-02 15:04:05");
        assert_eq!(jobs.transforms[0].field_name.as_deref(), Some("status"));
        assert_eq!(jobs.transforms[0].output, "failed");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = toml::from_str::<Config>(
            r#"
            [[queries]]
            sql = "SELECT 1"
            rollup = true
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("rollup"));

        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{ "Monitors": [{{ "SQL": "SELECT 1" }}] }}"#).unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/dbmonitor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_connection_string_redaction() {
        let db = DatabaseConfig {
            username: "monitor".to_string(),
            password: "secret".to_string(),
            ..DatabaseConfig::default()
        };

        assert_eq!(
            db.connection_string(),
            "host=localhost port=5432 dbname=postgres user=monitor password=secret sslmode=disable"
        );
        assert!(!db.redacted_connection_string().contains("secret"));
    }

    #[test]
    fn test_connection_string_quotes_values() {
        let db = DatabaseConfig {
            username: "monitor".to_string(),
            password: "it's a secret".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(db
            .connection_string()
            .contains(r"password='it\'s a secret' sslmode=disable"));

        let anonymous = DatabaseConfig::default();
        assert!(anonymous.connection_string().contains("user='' password=''"));
        assert!(anonymous.redacted_connection_string().contains("password=''"));
    }
}
