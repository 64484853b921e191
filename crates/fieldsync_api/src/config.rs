use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub auth_secret: Option<Vec<u8>>,
    pub token_expiry: Duration,
    pub max_push_batch: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field(
                "auth_secret",
                &self.auth_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_expiry", &self.token_expiry)
            .field("max_push_batch", &self.max_push_batch)
            .field("default_page_size", &self.default_page_size)
            .field("max_page_size", &self.max_page_size)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "FIELDSYNC_BIND_ADDR", "127.0.0.1:8080");

        let auth_secret = optional_trimmed(&lookup, "FIELDSYNC_AUTH_SECRET")
            .map(|secret| secret.into_bytes());
        if let Some(secret) = auth_secret.as_ref() {
            if secret.len() < 16 {
                return Err(ConfigError::Invalid(
                    "FIELDSYNC_AUTH_SECRET must be at least 16 bytes".to_string(),
                ));
            }
        }

        let token_expiry_secs = parse_in_range(
            &lookup,
            "FIELDSYNC_TOKEN_EXPIRY_SECS",
            "86400",
            60..=604_800,
        )?;

        let max_push_batch =
            parse_in_range(&lookup, "FIELDSYNC_MAX_PUSH_BATCH", "100", 1..=10_000)? as usize;
        let default_page_size =
            parse_in_range(&lookup, "FIELDSYNC_DEFAULT_PAGE_SIZE", "100", 1..=10_000)? as usize;
        let max_page_size =
            parse_in_range(&lookup, "FIELDSYNC_MAX_PAGE_SIZE", "500", 1..=10_000)? as usize;
        if default_page_size > max_page_size {
            return Err(ConfigError::Invalid(
                "FIELDSYNC_DEFAULT_PAGE_SIZE must not exceed FIELDSYNC_MAX_PAGE_SIZE".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            auth_secret,
            token_expiry: Duration::from_secs(token_expiry_secs),
            max_push_batch,
            default_page_size,
            max_page_size,
        })
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = value_or_default(&lookup, name, default)
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
