//! Configuration loading and representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

pub const ENV_RETRY_MAX_ATTEMPTS: &str = "SHARELEDGER_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "SHARELEDGER_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "SHARELEDGER_RETRY_MAX_DELAY_MS";
pub const ENV_ALLOW_UNAPPROVED_PURCHASES: &str = "SHARELEDGER_ALLOW_UNAPPROVED_PURCHASES";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Whether purchases must wait for admin approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasePolicy {
    /// Accept purchases against listings still pending review.
    pub allow_unapproved_listings: bool,
}

impl Default for PurchasePolicy {
    fn default() -> Self {
        Self {
            allow_unapproved_listings: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub purchase: PurchasePolicy,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl LedgerConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = LedgerConfig::default();

        if let Some(raw) = lookup(ENV_RETRY_MAX_ATTEMPTS) {
            let attempts: u32 = parse(ENV_RETRY_MAX_ATTEMPTS, &raw)?;
            if attempts == 0 {
                return Err(invalid(ENV_RETRY_MAX_ATTEMPTS, &raw, "must be at least 1"));
            }
            cfg.retry.max_attempts = attempts;
        }
        if let Some(raw) = lookup(ENV_RETRY_BASE_DELAY_MS) {
            cfg.retry.base_delay = Duration::from_millis(parse(ENV_RETRY_BASE_DELAY_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_RETRY_MAX_DELAY_MS) {
            cfg.retry.max_delay = Duration::from_millis(parse(ENV_RETRY_MAX_DELAY_MS, &raw)?);
        }
        if cfg.retry.max_delay < cfg.retry.base_delay {
            return Err(invalid(
                ENV_RETRY_MAX_DELAY_MS,
                &cfg.retry.max_delay.as_millis().to_string(),
                "must not be below the base delay",
            ));
        }
        if let Some(raw) = lookup(ENV_ALLOW_UNAPPROVED_PURCHASES) {
            cfg.purchase.allow_unapproved_listings = parse_bool(ENV_ALLOW_UNAPPROVED_PURCHASES, &raw)?;
        }
        cfg.database_url = lookup(ENV_DATABASE_URL).filter(|url| !url.trim().is_empty());

        Ok(cfg)
    }
}

fn invalid(key: &'static str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, raw, "expected a non-negative integer"))
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected true/false")),
    }
}
