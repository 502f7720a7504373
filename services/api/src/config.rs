//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use rewards_core::RewardPolicy;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Postgres connection string. Without one the service runs on an in-memory store.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub cors_origin: String,
    pub pass_threshold: u32,
    pub token_capacity: u32,
    pub token_regen_interval: Duration,
    pub max_transaction_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Reward Rules ---
        let defaults = RewardPolicy::default();
        let pass_threshold = parse_or(&lookup, "PASS_THRESHOLD", defaults.pass_threshold)?;
        if pass_threshold > 100 {
            return Err(ConfigError::InvalidValue(
                "PASS_THRESHOLD".to_string(),
                "must be a percentage between 0 and 100".to_string(),
            ));
        }
        let token_capacity = parse_or(&lookup, "TOKEN_CAPACITY", defaults.token_capacity)?;
        if token_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "TOKEN_CAPACITY".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let token_regen_hours = parse_or(
            &lookup,
            "TOKEN_REGEN_HOURS",
            defaults.token_regen_interval.num_hours(),
        )?;
        let token_regen_interval = Duration::try_hours(token_regen_hours)
            .filter(|interval| *interval > Duration::zero())
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "TOKEN_REGEN_HOURS".to_string(),
                    format!("{} is not a positive number of hours in range", token_regen_hours),
                )
            })?;
        let max_transaction_attempts = parse_or(
            &lookup,
            "MAX_TRANSACTION_ATTEMPTS",
            defaults.max_transaction_attempts,
        )?;
        if max_transaction_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TRANSACTION_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            pass_threshold,
            token_capacity,
            token_regen_interval,
            max_transaction_attempts,
        })
    }

    /// The reward rules with the configured overrides applied.
    pub fn reward_policy(&self) -> RewardPolicy {
        RewardPolicy {
            pass_threshold: self.pass_threshold,
            token_capacity: self.token_capacity,
            token_regen_interval: self.token_regen_interval,
            max_transaction_attempts: self.max_transaction_attempts,
            ..RewardPolicy::default()
        }
    }
}

/// Parses `name` if set, otherwise falls back to `default`.
fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
