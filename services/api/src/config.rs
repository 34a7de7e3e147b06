//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// Longest login cookie lifetime accepted.
pub const MAX_AUTH_SESSION_DAYS: i64 = 365;

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
    pub database_url: String,
    pub log_level: Level,
    /// Quiet period before an editing session saves content.
    pub save_debounce: Duration,
    /// Lifetime of a login cookie.
    pub auth_session_days: i64,
    pub cors_origin: String,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Editing and Auth Settings ---
        let save_debounce_ms = parse_number(&lookup, "SAVE_DEBOUNCE_MS", 500u64)?;
        let auth_session_days = parse_number(&lookup, "AUTH_SESSION_DAYS", 30i64)?;
        if !(1..=MAX_AUTH_SESSION_DAYS).contains(&auth_session_days) {
            return Err(ConfigError::InvalidValue(
                "AUTH_SESSION_DAYS".to_string(),
                format!("must be between 1 and {} days", MAX_AUTH_SESSION_DAYS),
            ));
        }

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            save_debounce: Duration::from_millis(save_debounce_ms),
            auth_session_days,
            cors_origin,
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config =
            Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/quill")]))
                .unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.save_debounce, Duration::from_millis(500));
        assert_eq!(config.auth_session_days, 30);
        assert_eq!(config.cors_origin, "http://localhost:5173");
    }

    #[test]
    fn database_url_is_required() {
        let result = Config::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingVar(var)) if var == "DATABASE_URL"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/quill"),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("RUST_LOG", "debug"),
            ("SAVE_DEBOUNCE_MS", "250"),
            ("AUTH_SESSION_DAYS", "7"),
        ]))
        .unwrap();
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.save_debounce, Duration::from_millis(250));
        assert_eq!(config.auth_session_days, 7);
    }

    #[test]
    fn bad_values_are_rejected() {
        let result = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/quill"),
            ("SAVE_DEBOUNCE_MS", "soon"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(var, _)) if var == "SAVE_DEBOUNCE_MS"));

        let result = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/quill"),
            ("AUTH_SESSION_DAYS", "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(var, _)) if var == "AUTH_SESSION_DAYS"));
    }

    #[test]
    fn auth_session_days_has_an_upper_bound() {
        let at_limit = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/quill"),
            ("AUTH_SESSION_DAYS", "365"),
        ]))
        .unwrap();
        assert_eq!(at_limit.auth_session_days, MAX_AUTH_SESSION_DAYS);

        let result = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/quill"),
            ("AUTH_SESSION_DAYS", "9999999999999"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(var, _)) if var == "AUTH_SESSION_DAYS"));
    }
}
