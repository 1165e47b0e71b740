//! Database configuration.

use serde::{Deserialize, Serialize};
use sqlrel_core::{ConfigError, Error, Result};
use sqlrel_pool::PoolConfig;
use sqlrel_query::DialectKind;

/// Dialect and pool settings for a [`Database`](crate::Database).
///
/// ```ignore
/// let config = DatabaseConfig::from_json(r#"{"dialect": "postgresql", "pool": {"max_connections": 4}}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub dialect: DialectKind,
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::Standard,
            pool: PoolConfig::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn new(dialect: DialectKind) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: DatabaseConfig = serde_json::from_str(text)?;
        config.pool.validate().map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid pool settings: {}", e),
                source: Some(Box::new(e)),
            })
        })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dialect_aliases_and_pool_defaults() {
        let config =
            DatabaseConfig::from_json(r#"{"dialect": "PostgreSQL", "pool": {"max_connections": 3}}"#)
                .unwrap();
        assert_eq!(config.dialect, DialectKind::Postgres);
        assert_eq!(config.pool.max_connections, 3);
        assert_eq!(config.pool.min_connections, 1);

        let empty = DatabaseConfig::from_json("{}").unwrap();
        assert_eq!(empty, DatabaseConfig::default());
    }

    #[test]
    fn rejects_unknown_dialects_and_bad_pools() {
        let err = DatabaseConfig::from_json(r#"{"dialect": "oracle"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("oracle"));

        let err = DatabaseConfig::from_json(r#"{"pool": {"max_connections": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("max_connections"));
    }
}
