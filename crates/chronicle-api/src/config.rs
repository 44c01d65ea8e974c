//! Server configuration read from the environment.

use crate::error::AppError;
use chronicle_core::config::{DEFAULT_SNAPSHOT_THRESHOLD, RepositoryConfig};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

/// Settings for the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `PostgreSQL` URL; `None` selects the in-memory backends.
    pub database_url: Option<String>,
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Repository snapshot threshold for aggregates without their own rule.
    pub snapshot_threshold: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
        }
    }
}

impl AppConfig {
    /// Reads `DATABASE_URL`, `HOST`, `PORT` and `SNAPSHOT_THRESHOLD`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|e| AppError::Config(format!("PORT must be a valid u16: {e}")))?,
            None => defaults.port,
        };
        let snapshot_threshold = match lookup("SNAPSHOT_THRESHOLD") {
            Some(raw) => raw.parse().map_err(|e| {
                AppError::Config(format!("SNAPSHOT_THRESHOLD must be an integer: {e}"))
            })?,
            None => defaults.snapshot_threshold,
        };

        let config = Self {
            database_url,
            host,
            port,
            snapshot_threshold,
        };
        config
            .repository_config()
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Repository settings derived from this configuration.
    #[must_use]
    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig::default().with_snapshot_threshold(self.snapshot_threshold)
    }

    /// `host:port` string to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_environment_overrides_defaults() {
        // Arrange
        let vars = lookup(&[
            ("DATABASE_URL", "postgres://localhost/chronicle"),
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("SNAPSHOT_THRESHOLD", "10"),
        ]);

        // Act
        let config = AppConfig::from_lookup(vars).unwrap();

        // Assert
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/chronicle"));
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.repository_config().default_snapshot_threshold, 10);
    }

    #[test]
    fn test_invalid_port_is_a_config_error() {
        let result = AppConfig::from_lookup(lookup(&[("PORT", "http")]));

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_non_positive_snapshot_threshold_is_a_config_error() {
        let result = AppConfig::from_lookup(lookup(&[("SNAPSHOT_THRESHOLD", "0")]));

        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
