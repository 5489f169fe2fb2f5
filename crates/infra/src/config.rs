//! Service configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::saga::recovery::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_SWEEP_SECS: u64 = 30;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres for ledger, sales and outbox; in-memory stores when absent.
    pub database_url: Option<String>,
    /// Remote ledger service; in-process ledger when absent.
    pub ledger_url: Option<String>,
    pub ledger_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_compensation_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            ledger_url: None,
            ledger_timeout: Duration::from_millis(DEFAULT_LEDGER_TIMEOUT_MS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_SECS),
            max_compensation_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source (process env, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = var("RETAIL_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            name: "RETAIL_BIND_ADDR",
            value: bind_addr.clone(),
            reason: e.to_string(),
        })?;

        let ledger_timeout_ms = parse_positive("LEDGER_TIMEOUT_MS", var("LEDGER_TIMEOUT_MS"), DEFAULT_LEDGER_TIMEOUT_MS)?;
        let sweep_secs = parse_positive("COMPENSATION_SWEEP_SECS", var("COMPENSATION_SWEEP_SECS"), DEFAULT_SWEEP_SECS)?;
        let max_attempts = parse_positive(
            "COMPENSATION_MAX_ATTEMPTS",
            var("COMPENSATION_MAX_ATTEMPTS"),
            u64::from(DEFAULT_MAX_ATTEMPTS),
        )?;
        let max_compensation_attempts = u32::try_from(max_attempts).map_err(|e| ConfigError::Invalid {
            name: "COMPENSATION_MAX_ATTEMPTS",
            value: max_attempts.to_string(),
            reason: e.to_string(),
        })?;

        let ledger_url = var("LEDGER_URL");
        if let Some(url) = &ledger_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    name: "LEDGER_URL",
                    value: url.clone(),
                    reason: "expected an http(s) URL".to_string(),
                });
            }
        }

        Ok(Self {
            bind_addr,
            database_url: var("DATABASE_URL"),
            ledger_url,
            ledger_timeout: Duration::from_millis(ledger_timeout_ms),
            sweep_interval: Duration::from_secs(sweep_secs),
            max_compensation_attempts,
        })
    }
}

fn parse_positive(name: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(v) => Ok(v),
        Err(e) => Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(from(&[]).unwrap(), AppConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = from(&[
            ("RETAIL_BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/retail"),
            ("LEDGER_URL", "http://ledger:8080"),
            ("LEDGER_TIMEOUT_MS", "750"),
            ("COMPENSATION_SWEEP_SECS", "5"),
            ("COMPENSATION_MAX_ATTEMPTS", "3"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/retail"));
        assert_eq!(config.ledger_url.as_deref(), Some("http://ledger:8080"));
        assert_eq!(config.ledger_timeout, Duration::from_millis(750));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.max_compensation_attempts, 3);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = from(&[("DATABASE_URL", "  "), ("LEDGER_TIMEOUT_MS", "")]).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.ledger_timeout, Duration::from_millis(DEFAULT_LEDGER_TIMEOUT_MS));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            from(&[("LEDGER_TIMEOUT_MS", "soon")]),
            Err(ConfigError::Invalid { name: "LEDGER_TIMEOUT_MS", .. })
        ));
        assert!(matches!(
            from(&[("COMPENSATION_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::Invalid { name: "COMPENSATION_MAX_ATTEMPTS", .. })
        ));
        assert!(matches!(
            from(&[("RETAIL_BIND_ADDR", "localhost")]),
            Err(ConfigError::Invalid { name: "RETAIL_BIND_ADDR", .. })
        ));
        assert!(matches!(
            from(&[("LEDGER_URL", "ledger:8080")]),
            Err(ConfigError::Invalid { name: "LEDGER_URL", .. })
        ));
    }
}
