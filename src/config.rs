//! Runtime configuration
//!
//! Read once at startup from the environment, after loading `.env` if one
//! is present.

use std::net::SocketAddr;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Engine and server settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Postgres connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    /// Dispatch claim reminders after commits
    pub reminders_enabled: bool,
    pub db_max_connections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            reminders_enabled: true,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

impl EngineConfig {
    /// Load from `DATABASE_URL`, `DISPUTE_BIND_ADDR`,
    /// `DISPUTE_REMINDERS_ENABLED` and `DISPUTE_DB_MAX_CONNECTIONS`
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside development
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let bind_raw =
            lookup("DISPUTE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                var: "DISPUTE_BIND_ADDR",
                value: bind_raw.clone(),
                reason: e.to_string(),
            })?;

        let reminders_enabled = match lookup("DISPUTE_REMINDERS_ENABLED") {
            None => true,
            Some(v) => parse_bool(&v).ok_or_else(|| ConfigError::Invalid {
                var: "DISPUTE_REMINDERS_ENABLED",
                value: v.clone(),
                reason: "expected true/false".to_string(),
            })?,
        };

        let db_max_connections = match lookup("DISPUTE_DB_MAX_CONNECTIONS") {
            None => DEFAULT_DB_MAX_CONNECTIONS,
            Some(v) => v
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    var: "DISPUTE_DB_MAX_CONNECTIONS",
                    value: v.clone(),
                    reason: "expected a positive integer".to_string(),
                })?,
        };

        Ok(Self {
            database_url,
            bind_addr,
            reminders_enabled,
            db_max_connections,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
