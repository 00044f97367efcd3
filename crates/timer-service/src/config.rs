//! Timer service configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default, so an empty environment yields a working development setup.

use crate::ids::{CodeAlphabet, DEFAULT_CODE_ALPHABET, DEFAULT_CODE_LENGTH};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8787;

/// Default browser origin allowed by CORS when wildcard mode is off.
pub const DEFAULT_PUBLIC_ORIGIN: &str = "http://localhost:3000";

/// Default session time-to-live in minutes.
pub const DEFAULT_SESSION_TTL_MINUTES: u64 = 120;

/// Default interval between eviction sweeps in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 0;

/// Accepted range for `SESSION_CODE_LENGTH`.
pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 16;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Timer service configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:<PORT>").
    pub bind_address: String,

    /// Listening port, used when `BIND_ADDRESS` is not set.
    pub port: u16,

    /// Origin allowed by CORS when `cors_allow_all` is false.
    pub public_origin: String,

    /// Deployment environment name (e.g., "production").
    pub environment: Option<String>,

    /// Wildcard CORS. Defaults on outside production.
    pub cors_allow_all: bool,

    /// Lifetime recorded as `expiresAt` on each session.
    pub session_ttl: Duration,

    /// Symbols session codes are drawn from.
    pub code_alphabet: CodeAlphabet,

    /// Number of symbols per session code.
    pub code_length: usize,

    /// Whether the registry removes sessions past `expiresAt`.
    pub eviction_enabled: bool,

    /// How often the registry looks for expired sessions.
    pub sweep_interval: Duration,

    /// How long shutdown waits after it stops accepting sessions.
    pub drain_period: Duration,

    pub log_format: LogFormat,
}

/// Custom Debug implementation; the alphabet is logged by size only.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("public_origin", &self.public_origin)
            .field("environment", &self.environment)
            .field("cors_allow_all", &self.cors_allow_all)
            .field("session_ttl", &self.session_ttl)
            .field("code_alphabet_len", &self.code_alphabet.len())
            .field("code_length", &self.code_length)
            .field("eviction_enabled", &self.eviction_enabled)
            .field("sweep_interval", &self.sweep_interval)
            .field("drain_period", &self.drain_period)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid bind address configuration: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid port configuration: {0}")]
    InvalidPort(String),

    #[error("Invalid session TTL configuration: {0}")]
    InvalidSessionTtl(String),

    #[error("Invalid session code configuration: {0}")]
    InvalidSessionCode(String),

    #[error("Invalid eviction configuration: {0}")]
    InvalidEviction(String),

    #[error("Invalid drain configuration: {0}")]
    InvalidDrain(String),

    #[error("Invalid log format configuration: {0}")]
    InvalidLogFormat(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = if let Some(value_str) = vars.get("PORT") {
            value_str.trim().parse::<u16>().map_err(|e| {
                ConfigError::InvalidPort(format!(
                    "PORT must be a valid port number, got '{}': {}",
                    value_str, e
                ))
            })?
        } else {
            DEFAULT_PORT
        };

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| format!("0.0.0.0:{}", port));

        if let Err(e) = bind_address.parse::<SocketAddr>() {
            return Err(ConfigError::InvalidBindAddress(format!(
                "BIND_ADDRESS must be a socket address, got '{}': {}",
                bind_address, e
            )));
        }

        let public_origin = vars
            .get("PUBLIC_ORIGIN")
            .cloned()
            .unwrap_or_else(|| DEFAULT_PUBLIC_ORIGIN.to_string());

        let environment = vars.get("ENVIRONMENT").cloned();
        let is_production = environment
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("production"));

        let cors_allow_all = if let Some(value_str) = vars.get("CORS_ALLOW_ALL") {
            parse_flag(value_str)
        } else {
            !is_production
        };

        // Parse session TTL with validation
        let session_ttl = if let Some(value_str) = vars.get("SESSION_TTL_MINUTES") {
            let value: u64 = value_str.trim().parse().map_err(|e| {
                ConfigError::InvalidSessionTtl(format!(
                    "SESSION_TTL_MINUTES must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidSessionTtl(
                    "SESSION_TTL_MINUTES must be greater than 0".to_string(),
                ));
            }

            Duration::from_secs(value.saturating_mul(60))
        } else {
            Duration::from_secs(DEFAULT_SESSION_TTL_MINUTES * 60)
        };

        let code_alphabet = CodeAlphabet::new(
            vars.get("SESSION_CODE_ALPHABET")
                .map_or(DEFAULT_CODE_ALPHABET, String::as_str),
        )
        .map_err(|e| ConfigError::InvalidSessionCode(format!("SESSION_CODE_ALPHABET: {}", e)))?;

        let code_length = if let Some(value_str) = vars.get("SESSION_CODE_LENGTH") {
            let value: usize = value_str.trim().parse().map_err(|e| {
                ConfigError::InvalidSessionCode(format!(
                    "SESSION_CODE_LENGTH must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&value) {
                return Err(ConfigError::InvalidSessionCode(format!(
                    "SESSION_CODE_LENGTH must be between {} and {}, got {}",
                    MIN_CODE_LENGTH, MAX_CODE_LENGTH, value
                )));
            }

            value
        } else {
            DEFAULT_CODE_LENGTH
        };

        let eviction_enabled = vars
            .get("SESSION_EVICTION_ENABLED")
            .is_some_and(|v| parse_flag(v));

        let sweep_interval = if let Some(value_str) = vars.get("SESSION_SWEEP_INTERVAL_SECONDS") {
            let value: u64 = value_str.trim().parse().map_err(|e| {
                ConfigError::InvalidEviction(format!(
                    "SESSION_SWEEP_INTERVAL_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidEviction(
                    "SESSION_SWEEP_INTERVAL_SECONDS must be greater than 0".to_string(),
                ));
            }

            Duration::from_secs(value)
        } else {
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS)
        };

        let drain_period = if let Some(value_str) = vars.get("DRAIN_SECONDS") {
            let value: u64 = value_str.trim().parse().map_err(|e| {
                ConfigError::InvalidDrain(format!(
                    "DRAIN_SECONDS must be a valid non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;
            Duration::from_secs(value)
        } else {
            Duration::from_secs(DEFAULT_DRAIN_SECONDS)
        };

        let log_format = match vars.get("LOG_FORMAT").map(|v| v.trim().to_ascii_lowercase()) {
            None => LogFormat::default(),
            Some(v) if v.is_empty() || v == "pretty" || v == "text" => LogFormat::Pretty,
            Some(v) if v == "json" => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidLogFormat(format!(
                    "LOG_FORMAT must be 'json' or 'pretty', got '{}'",
                    other
                )));
            }
        };

        Ok(Config {
            bind_address,
            port,
            public_origin,
            environment,
            cors_allow_all,
            session_ttl,
            code_alphabet,
            code_length,
            eviction_enabled,
            sweep_interval,
            drain_period,
            log_format,
        })
    }
}

/// `1`, `true`, `yes` and `on` (any case) enable a flag.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind_address, "0.0.0.0:8787");
        assert_eq!(config.public_origin, DEFAULT_PUBLIC_ORIGIN);
        assert!(config.environment.is_none());
        assert!(config.cors_allow_all);
        assert_eq!(config.session_ttl, Duration::from_secs(120 * 60));
        assert_eq!(config.code_alphabet, CodeAlphabet::default());
        assert_eq!(config.code_length, DEFAULT_CODE_LENGTH);
        assert!(!config.eviction_enabled);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.drain_period, Duration::ZERO);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let config = Config::from_vars(&vars(&[
            ("PORT", "9000"),
            ("PUBLIC_ORIGIN", "https://timer.example.com"),
            ("ENVIRONMENT", "staging"),
            ("CORS_ALLOW_ALL", "0"),
            ("SESSION_TTL_MINUTES", "30"),
            ("SESSION_CODE_ALPHABET", "abcdef"),
            ("SESSION_CODE_LENGTH", "8"),
            ("SESSION_EVICTION_ENABLED", "true"),
            ("SESSION_SWEEP_INTERVAL_SECONDS", "5"),
            ("DRAIN_SECONDS", "3"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .expect("Config should load successfully");

        assert_eq!(config.port, 9000);
        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert_eq!(config.public_origin, "https://timer.example.com");
        assert_eq!(config.environment.as_deref(), Some("staging"));
        assert!(!config.cors_allow_all);
        assert_eq!(config.session_ttl, Duration::from_secs(30 * 60));
        assert_eq!(config.code_alphabet, CodeAlphabet::new("ABCDEF").unwrap());
        assert_eq!(config.code_length, 8);
        assert!(config.eviction_enabled);
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.drain_period, Duration::from_secs(3));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_bind_address_overrides_port() {
        let config = Config::from_vars(&vars(&[("PORT", "9000"), ("BIND_ADDRESS", "127.0.0.1:0")]))
            .expect("Config should load successfully");
        assert_eq!(config.bind_address, "127.0.0.1:0");
    }

    #[test]
    fn test_invalid_bind_address_rejected() {
        let result = Config::from_vars(&vars(&[("BIND_ADDRESS", "localhost")]));
        assert!(matches!(result, Err(ConfigError::InvalidBindAddress(_))));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result = Config::from_vars(&vars(&[("PORT", "70000")]));
        assert!(matches!(result, Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn test_production_disables_wildcard_cors() {
        let config = Config::from_vars(&vars(&[("ENVIRONMENT", "production")])).unwrap();
        assert!(!config.cors_allow_all);

        let config = Config::from_vars(&vars(&[
            ("ENVIRONMENT", "production"),
            ("CORS_ALLOW_ALL", "1"),
        ]))
        .unwrap();
        assert!(config.cors_allow_all);
    }

    #[test]
    fn test_session_ttl_rejects_zero() {
        let result = Config::from_vars(&vars(&[("SESSION_TTL_MINUTES", "0")]));
        match result {
            Err(ConfigError::InvalidSessionTtl(msg)) => {
                assert!(msg.contains("greater than 0"));
            }
            other => panic!("Expected InvalidSessionTtl, got {:?}", other),
        }
    }

    #[test]
    fn test_session_ttl_rejects_non_numeric() {
        let result = Config::from_vars(&vars(&[("SESSION_TTL_MINUTES", "two hours")]));
        assert!(matches!(result, Err(ConfigError::InvalidSessionTtl(_))));
    }

    #[test]
    fn test_code_alphabet_rejects_duplicates() {
        let result = Config::from_vars(&vars(&[("SESSION_CODE_ALPHABET", "AAB")]));
        assert!(matches!(result, Err(ConfigError::InvalidSessionCode(_))));
    }

    #[test]
    fn test_code_length_bounds() {
        for bad in ["3", "17", "x"] {
            let result = Config::from_vars(&vars(&[("SESSION_CODE_LENGTH", bad)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidSessionCode(_))),
                "length {bad} should be rejected"
            );
        }
        for good in ["4", "16"] {
            assert!(Config::from_vars(&vars(&[("SESSION_CODE_LENGTH", good)])).is_ok());
        }
    }

    #[test]
    fn test_sweep_interval_rejects_zero() {
        let result = Config::from_vars(&vars(&[("SESSION_SWEEP_INTERVAL_SECONDS", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidEviction(_))));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let result = Config::from_vars(&vars(&[("LOG_FORMAT", "xml")]));
        assert!(matches!(result, Err(ConfigError::InvalidLogFormat(_))));
    }

    #[test]
    fn test_parse_flag() {
        for on in ["1", "true", "TRUE", " yes ", "on"] {
            assert!(parse_flag(on), "{on} should enable");
        }
        for off in ["0", "false", "", "nope"] {
            assert!(!parse_flag(off), "{off} should disable");
        }
    }

    #[test]
    fn test_debug_output_lists_settings() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("bind_address"));
        assert!(debug.contains("code_length"));
    }
}
