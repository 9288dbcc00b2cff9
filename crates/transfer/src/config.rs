//! Transfer configuration.
//!
//! Durations are carried as milliseconds in JSON (`attemptTimeoutMs`,
//! `initialDelayMs`, ...) so config files stay plain numbers.

use std::path::Path;
use std::time::Duration;

use chunkline_protocol::constants::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PARALLEL_WORKERS,
    DEFAULT_MAX_RETRIES_PER_CHUNK,
};
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Delay schedule between re-attempts of the same chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay before the first re-attempt. Zero disables backoff.
    #[serde(rename = "initialDelayMs", with = "millis")]
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    #[serde(rename = "maxDelayMs", with = "millis")]
    pub max_delay: Duration,
    /// Multiplier for each subsequent re-attempt.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Re-attempt immediately.
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Calculates the delay before re-attempt number `retry` (1-based).
    ///
    /// A factor that is not a finite number >= 1.0 is treated as 1.0, so
    /// the delay stays at `initial_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let cap = self.max_delay.max(self.initial_delay);
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            1.0
        };
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * factor.powi(exp);
        Duration::try_from_secs_f64(secs.min(cap.as_secs_f64())).unwrap_or(cap)
    }
}

/// Caller-supplied settings for one transfer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    pub chunk_size_bytes: u64,
    pub max_parallel_workers: usize,
    pub max_retries_per_chunk: u32,
    /// Upper bound for one attempt (read + send). `None` means unbounded.
    #[serde(rename = "attemptTimeoutMs", with = "optional_millis")]
    pub attempt_timeout: Option<Duration>,
    pub backoff: BackoffConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            max_parallel_workers: DEFAULT_MAX_PARALLEL_WORKERS,
            max_retries_per_chunk: DEFAULT_MAX_RETRIES_PER_CHUNK,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            backoff: BackoffConfig::default(),
        }
    }
}

impl TransferConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json(json: &str) -> Result<Self, TransferError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size_bytes == 0 {
            return Err(TransferError::InvalidConfiguration(
                "chunk size must be positive".into(),
            ));
        }
        if self.max_parallel_workers == 0 {
            return Err(TransferError::InvalidConfiguration(
                "at least one worker is required".into(),
            ));
        }
        if self.attempt_timeout.is_some_and(|t| t.is_zero()) {
            return Err(TransferError::InvalidConfiguration(
                "attempt timeout must be positive".into(),
            ));
        }
        if !self.backoff.factor.is_finite() || self.backoff.factor < 1.0 {
            return Err(TransferError::InvalidConfiguration(format!(
                "backoff factor must be >= 1.0, got {}",
                self.backoff.factor
            )));
        }
        Ok(())
    }
}

/// Serializes a `Duration` as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Serializes an optional `Duration` as milliseconds or `null`.
mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
