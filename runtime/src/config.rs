//! Handler configuration.
//!
//! Loaded from environment variables with defaults:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `GREENLEAF_RETRY_MAX` | `3` | Retries per reward call |
//! | `GREENLEAF_RETRY_INITIAL_MS` | `100` | First backoff delay |
//! | `GREENLEAF_RETRY_MAX_DELAY_MS` | `5000` | Backoff cap |
//! | `GREENLEAF_RETRY_MULTIPLIER` | `2.0` | Backoff growth |
//! | `GREENLEAF_DEAD_LETTER_CAPACITY` | `1000` | Dead letter queue size |
//! | `GREENLEAF_UTC_OFFSET_MINUTES` | `0` | Offset used for local time of day |

use crate::retry::RetryPolicy;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from reading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// What was wrong
        reason: String,
    },
}

/// Runtime settings shared by all reaction handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Retry policy for reward calls
    pub retry: RetryPolicy,
    /// Dead letter queue capacity
    pub dead_letter_capacity: usize,
    /// Local time zone as minutes east of UTC
    pub utc_offset_minutes: i32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            dead_letter_capacity: 1000,
            utc_offset_minutes: 0,
        }
    }
}

impl HandlerConfig {
    /// Load from the environment, falling back to defaults for anything
    /// missing or invalid.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from the environment, rejecting invalid values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first variable that is set
    /// but cannot be parsed.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::try_from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let retry = RetryPolicy::default()
            .with_max_retries(
                lenient(&lookup, "GREENLEAF_RETRY_MAX").unwrap_or(defaults.retry.max_retries),
            )
            .with_initial_delay(
                lenient(&lookup, "GREENLEAF_RETRY_INITIAL_MS")
                    .map_or(defaults.retry.initial_delay, Duration::from_millis),
            )
            .with_max_delay(
                lenient(&lookup, "GREENLEAF_RETRY_MAX_DELAY_MS")
                    .map_or(defaults.retry.max_delay, Duration::from_millis),
            )
            .with_multiplier(
                lenient::<_, f64>(&lookup, "GREENLEAF_RETRY_MULTIPLIER")
                    .filter(|m| m.is_finite() && *m >= 1.0)
                    .unwrap_or(defaults.retry.multiplier),
            );

        let utc_offset_minutes = lenient(&lookup, "GREENLEAF_UTC_OFFSET_MINUTES")
            .filter(|minutes| offset_from_minutes(*minutes).is_some())
            .unwrap_or(defaults.utc_offset_minutes);

        Self {
            retry,
            dead_letter_capacity: lenient(&lookup, "GREENLEAF_DEAD_LETTER_CAPACITY")
                .unwrap_or(defaults.dead_letter_capacity),
            utc_offset_minutes,
        }
    }

    /// Like [`try_from_env`](Self::try_from_env), reading variables through
    /// `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable or out-of-range values.
    pub fn try_from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_retries =
            parse_var(&lookup, "GREENLEAF_RETRY_MAX")?.unwrap_or(defaults.retry.max_retries);
        let initial_delay = parse_var(&lookup, "GREENLEAF_RETRY_INITIAL_MS")?
            .map_or(defaults.retry.initial_delay, Duration::from_millis);
        let max_delay = parse_var(&lookup, "GREENLEAF_RETRY_MAX_DELAY_MS")?
            .map_or(defaults.retry.max_delay, Duration::from_millis);
        let multiplier: f64 =
            parse_var(&lookup, "GREENLEAF_RETRY_MULTIPLIER")?.unwrap_or(defaults.retry.multiplier);
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(invalid(
                "GREENLEAF_RETRY_MULTIPLIER",
                multiplier.to_string(),
                "must be a finite number >= 1.0",
            ));
        }

        let utc_offset_minutes = parse_var(&lookup, "GREENLEAF_UTC_OFFSET_MINUTES")?
            .unwrap_or(defaults.utc_offset_minutes);
        if offset_from_minutes(utc_offset_minutes).is_none() {
            return Err(invalid(
                "GREENLEAF_UTC_OFFSET_MINUTES",
                utc_offset_minutes.to_string(),
                "must be within ±1439 minutes",
            ));
        }

        Ok(Self {
            retry: RetryPolicy::default()
                .with_max_retries(max_retries)
                .with_initial_delay(initial_delay)
                .with_max_delay(max_delay)
                .with_multiplier(multiplier),
            dead_letter_capacity: parse_var(&lookup, "GREENLEAF_DEAD_LETTER_CAPACITY")?
                .unwrap_or(defaults.dead_letter_capacity),
            utc_offset_minutes,
        })
    }

    /// The configured local offset, or UTC if out of range.
    #[must_use]
    pub fn local_offset(&self) -> FixedOffset {
        offset_from_minutes(self.utc_offset_minutes).unwrap_or_else(|| Utc.fix())
    }
}

fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    if minutes.unsigned_abs() >= 24 * 60 {
        return None;
    }
    FixedOffset::east_opt(minutes * 60)
}

fn lenient<F, T>(lookup: &F, var: &'static str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let value = lookup(var)?;
    if let Ok(parsed) = value.trim().parse() {
        Some(parsed)
    } else {
        tracing::warn!(var, value = %value, "Ignoring invalid configuration value");
        None
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(var, value.clone(), e.to_string()))
        })
        .transpose()
}

fn invalid(var: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.into(),
    }
}
