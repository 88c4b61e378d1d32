//! services/app/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which hosted backend the gateway talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Everything lives in process memory; nothing survives a restart.
    Memory,
    Firebase { api_key: String, project_id: String },
}

/// Credentials the binary signs in with on startup, if present.
#[derive(Clone, Debug)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend: BackendKind,
    pub log_level: Level,
    pub gateway_timeout: Duration,
    pub read_retries: u32,
    pub retry_backoff: Duration,
    pub poll_interval: Duration,
    pub login: Option<LoginCredentials>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
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
        // --- Backend Selection ---
        let backend_str = lookup("HUMONIX_BACKEND").unwrap_or_else(|| "memory".to_string());
        let backend = match backend_str.to_lowercase().as_str() {
            "memory" => BackendKind::Memory,
            "firebase" => BackendKind::Firebase {
                api_key: lookup("FIREBASE_API_KEY")
                    .ok_or_else(|| ConfigError::MissingVar("FIREBASE_API_KEY".to_string()))?,
                project_id: lookup("FIREBASE_PROJECT_ID")
                    .ok_or_else(|| ConfigError::MissingVar("FIREBASE_PROJECT_ID".to_string()))?,
            },
            other => {
                return Err(ConfigError::InvalidValue(
                    "HUMONIX_BACKEND".to_string(),
                    format!("'{}' is not one of memory, firebase", other),
                ))
            }
        };

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Gateway Call Policy ---
        let gateway_timeout = Duration::from_millis(parse_or(&lookup, "GATEWAY_TIMEOUT_MS", 10_000)?);
        let read_retries = parse_or(&lookup, "GATEWAY_READ_RETRIES", 2)?;
        let retry_backoff = Duration::from_millis(parse_or(&lookup, "GATEWAY_RETRY_BACKOFF_MS", 200)?);
        let poll_interval =
            Duration::from_millis(parse_or(&lookup, "FIRESTORE_POLL_INTERVAL_MS", 2_000)?);

        let login = match (lookup("HUMONIX_LOGIN_EMAIL"), lookup("HUMONIX_LOGIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(LoginCredentials { email, password }),
            _ => None,
        };

        Ok(Self {
            backend,
            log_level,
            gateway_timeout,
            read_retries,
            retry_backoff,
            poll_interval,
            login,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
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
    fn defaults_to_the_memory_backend() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.gateway_timeout, Duration::from_secs(10));
        assert_eq!(config.read_retries, 2);
        assert!(config.login.is_none());
    }

    #[test]
    fn firebase_requires_its_keys() {
        let err = Config::from_lookup(lookup_from(&[("HUMONIX_BACKEND", "firebase")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "FIREBASE_API_KEY"));

        let config = Config::from_lookup(lookup_from(&[
            ("HUMONIX_BACKEND", "firebase"),
            ("FIREBASE_API_KEY", "key"),
            ("FIREBASE_PROJECT_ID", "humonix-dev"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            BackendKind::Firebase {
                api_key: "key".to_string(),
                project_id: "humonix-dev".to_string()
            }
        );
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let err = Config::from_lookup(lookup_from(&[("GATEWAY_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "GATEWAY_TIMEOUT_MS"));
    }

    #[test]
    fn login_needs_both_email_and_password() {
        let config =
            Config::from_lookup(lookup_from(&[("HUMONIX_LOGIN_EMAIL", "a@b.com")])).unwrap();
        assert!(config.login.is_none());
    }
}
