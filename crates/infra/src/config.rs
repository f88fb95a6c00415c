//! Marketplace configuration loaded from the environment.

use std::time::Duration;

use thiserror::Error;

use bazaar_core::{CommissionRate, Money};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Tunables of the ledger. Amounts are minor units.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketConfig {
    pub commission_rate: CommissionRate,
    pub escrow_hold: chrono::Duration,
    pub min_payout: Money,
    pub currency: String,
    pub provider_timeout: Duration,
    pub payout_max_retries: u32,
    pub payout_interval: Duration,
    /// Base delay of the exponential backoff between payout retries.
    pub payout_retry_base: Duration,
    /// Attempts at a compare-and-swap stock reservation before giving up.
    pub reservation_attempts: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            commission_rate: CommissionRate::default(),
            escrow_hold: chrono::Duration::days(7),
            min_payout: Money(1_000),
            currency: "NGN".to_string(),
            provider_timeout: Duration::from_secs(10),
            payout_max_retries: 3,
            payout_interval: Duration::from_secs(3600),
            payout_retry_base: Duration::from_secs(900),
            reservation_attempts: 5,
        }
    }
}

impl MarketConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("BAZAAR_COMMISSION_RATE") {
            let fraction: f64 = parse("BAZAAR_COMMISSION_RATE", &raw)?;
            config.commission_rate = CommissionRate::from_fraction(fraction)
                .map_err(|e| invalid("BAZAAR_COMMISSION_RATE", &raw, e.to_string()))?;
        }
        if let Some(raw) = lookup("BAZAAR_ESCROW_HOLD_DAYS") {
            let days: u32 = parse("BAZAAR_ESCROW_HOLD_DAYS", &raw)?;
            config.escrow_hold = chrono::Duration::days(i64::from(days));
        }
        if let Some(raw) = lookup("BAZAAR_MIN_PAYOUT") {
            config.min_payout = Money(parse("BAZAAR_MIN_PAYOUT", &raw)?);
        }
        if let Some(raw) = lookup("BAZAAR_CURRENCY") {
            let currency = raw.trim().to_ascii_uppercase();
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(invalid("BAZAAR_CURRENCY", &raw, "expected a 3-letter code"));
            }
            config.currency = currency;
        }
        if let Some(raw) = lookup("BAZAAR_PROVIDER_TIMEOUT_SECS") {
            let secs: u64 = parse("BAZAAR_PROVIDER_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(invalid("BAZAAR_PROVIDER_TIMEOUT_SECS", &raw, "must be positive"));
            }
            config.provider_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("BAZAAR_PAYOUT_MAX_RETRIES") {
            config.payout_max_retries = parse("BAZAAR_PAYOUT_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("BAZAAR_PAYOUT_INTERVAL_SECS") {
            let secs: u64 = parse("BAZAAR_PAYOUT_INTERVAL_SECS", &raw)?;
            if secs == 0 {
                return Err(invalid("BAZAAR_PAYOUT_INTERVAL_SECS", &raw, "must be positive"));
            }
            config.payout_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| invalid(key, raw, e.to_string()))
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}
