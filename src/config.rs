//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;

use crate::domain::{Amount, Credits};

/// Storage implementation selected at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Transfer rule limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRules {
    /// Smallest amount a transfer may move
    pub minimum: Amount,
    /// Cap on completed outgoing transfers in the trailing 24 hours
    pub daily_limit: Credits,
}

impl Default for TransferRules {
    fn default() -> Self {
        Self {
            minimum: Amount::MIN,
            daily_limit: Credits::from_units(1_000 * crate::domain::amount::UNITS_PER_CREDIT),
        }
    }
}

/// Ledger behavior knobs shared by handlers and jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub rules: TransferRules,
    /// Default lifetime of granted credits; 0 disables expiry
    pub credit_lifetime_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rules: TransferRules::default(),
            credit_lifetime_days: 365,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL (required for the postgres backend)
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Seconds to wait for a pooled connection
    pub database_acquire_timeout_secs: u64,

    /// Apply migrations/ at start-up
    pub database_auto_migrate: bool,

    pub storage_backend: StorageBackend,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    pub ledger: LedgerConfig,

    /// In-process scheduler intervals
    pub expiry_interval_secs: u64,
    pub auto_transfer_interval_secs: u64,

    /// Run the in-process scheduler inside the server
    pub run_scheduler: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &'static str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let storage_backend = parse_var(&var("STORAGE_BACKEND", "postgres"), "STORAGE_BACKEND")?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        let database_max_connections =
            parse_var(&var("DATABASE_MAX_CONNECTIONS", "10"), "DATABASE_MAX_CONNECTIONS")?;

        let database_acquire_timeout_secs = parse_var(
            &var("DATABASE_ACQUIRE_TIMEOUT_SECS", "5"),
            "DATABASE_ACQUIRE_TIMEOUT_SECS",
        )?;

        let database_auto_migrate = parse_bool(&var("DATABASE_AUTO_MIGRATE", "false"), "DATABASE_AUTO_MIGRATE")?;

        let host = var("HOST", "127.0.0.1");

        let port = parse_var(&var("PORT", "3000"), "PORT")?;

        let environment = var("ENVIRONMENT", "development");

        let default_format = if environment == "production" { "json" } else { "pretty" };
        let log_format = parse_var(&var("LOG_FORMAT", default_format), "LOG_FORMAT")?;

        let minimum: Amount = parse_var(&var("MIN_TRANSFER_AMOUNT", "0.0001"), "MIN_TRANSFER_AMOUNT")?;

        let daily_limit: Credits = parse_var(&var("DAILY_TRANSFER_LIMIT", "1000.0000"), "DAILY_TRANSFER_LIMIT")?;
        if daily_limit.is_negative() {
            return Err(ConfigError::InvalidValue("DAILY_TRANSFER_LIMIT"));
        }

        let credit_lifetime_days = parse_var(&var("CREDIT_LIFETIME_DAYS", "365"), "CREDIT_LIFETIME_DAYS")?;

        let expiry_interval_secs = parse_interval(&var("EXPIRY_INTERVAL_SECS", "3600"), "EXPIRY_INTERVAL_SECS")?;

        let auto_transfer_interval_secs =
            parse_interval(&var("AUTO_TRANSFER_INTERVAL_SECS", "3600"), "AUTO_TRANSFER_INTERVAL_SECS")?;

        let run_scheduler = parse_bool(&var("RUN_SCHEDULER", "false"), "RUN_SCHEDULER")?;

        Ok(Self {
            database_url,
            database_max_connections,
            database_acquire_timeout_secs,
            database_auto_migrate,
            storage_backend,
            host,
            port,
            environment,
            log_format,
            ledger: LedgerConfig {
                rules: TransferRules { minimum, daily_limit },
                credit_lifetime_days,
            },
            expiry_interval_secs,
            auto_transfer_interval_secs,
            run_scheduler,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_var<T: FromStr>(value: &str, name: &'static str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue(name))
}

fn parse_bool(value: &str, name: &'static str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(name)),
    }
}

fn parse_interval(value: &str, name: &'static str) -> Result<u64, ConfigError> {
    match parse_var::<u64>(value, name)? {
        0 => Err(ConfigError::InvalidValue(name)),
        secs => Ok(secs),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_memory_backend() {
        let config = load(&[("STORAGE_BACKEND", "memory")]).unwrap();

        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert!(config.database_url.is_none());
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.database_acquire_timeout_secs, 5);
        assert!(!config.database_auto_migrate);
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.ledger, LedgerConfig::default());
        assert_eq!(config.ledger.rules.minimum.to_string(), "0.0001");
        assert_eq!(config.ledger.rules.daily_limit.to_string(), "1000.0000");
        assert_eq!(config.expiry_interval_secs, 3600);
        assert!(!config.run_scheduler);
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("DATABASE_URL")));

        let config = load(&[("DATABASE_URL", "postgres://localhost/ledger")]).unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Postgres);
    }

    #[test]
    fn test_production_defaults_to_json_logs() {
        let config = load(&[("STORAGE_BACKEND", "memory"), ("ENVIRONMENT", "production")]).unwrap();
        assert!(config.is_production());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rule_overrides() {
        let config = load(&[
            ("STORAGE_BACKEND", "memory"),
            ("MIN_TRANSFER_AMOUNT", "1.5"),
            ("DAILY_TRANSFER_LIMIT", "250"),
            ("CREDIT_LIFETIME_DAYS", "0"),
        ])
        .unwrap();

        assert_eq!(config.ledger.rules.minimum.to_string(), "1.5000");
        assert_eq!(config.ledger.rules.daily_limit.to_string(), "250.0000");
        assert_eq!(config.ledger.credit_lifetime_days, 0);
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let cases = [
            ("PORT", "not-a-port"),
            ("STORAGE_BACKEND", "redis"),
            ("LOG_FORMAT", "xml"),
            ("MIN_TRANSFER_AMOUNT", "0"),
            ("DAILY_TRANSFER_LIMIT", "-1"),
            ("EXPIRY_INTERVAL_SECS", "0"),
            ("RUN_SCHEDULER", "maybe"),
        ];

        for (key, value) in cases {
            let backend = if key == "STORAGE_BACKEND" { value } else { "memory" };
            let err = load(&[("STORAGE_BACKEND", backend), (key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue(name) if name == key),
                "{} = {} should be rejected, got {:?}",
                key,
                value,
                err
            );
        }
    }
}
