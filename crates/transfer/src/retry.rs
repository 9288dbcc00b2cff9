use std::time::Duration;

use tokio::time::Instant;

use crate::config::{BackoffConfig, TransferConfig};
use crate::state::SessionState;

/// Stand-in deadline for a delay too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending; eligible again after `delay`.
    Retry { attempts: u32, delay: Duration },
    /// Retries exhausted; the chunk is failed-terminal.
    Abandon { attempts: u32 },
}

/// Decides whether a failed chunk is re-queued or abandoned.
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    max_retries: u32,
    backoff: BackoffConfig,
}

impl RetryCoordinator {
    pub fn new(max_retries: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(config.max_retries_per_chunk, config.backoff.clone())
    }

    /// Decision for a chunk that has now failed `attempts` times.
    ///
    /// A chunk gets `max_retries + 1` attempts in total.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts <= self.max_retries {
            RetryDecision::Retry {
                attempts,
                delay: self.backoff.delay_for_attempt(attempts),
            }
        } else {
            RetryDecision::Abandon { attempts }
        }
    }

    /// Records the failure of in-flight chunk `index` and moves it out
    /// of in-flight, either back to pending or to failed-terminal.
    ///
    /// Must be called with the session lock held.
    pub(crate) fn on_failure(
        &self,
        state: &mut SessionState,
        index: u32,
        error: String,
        now: Instant,
    ) -> RetryDecision {
        let attempts = state.record_failure(index);
        let decision = self.decide(attempts);
        match decision {
            RetryDecision::Retry { delay, .. } => {
                let ready_at = (!delay.is_zero())
                    .then(|| now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE));
                state.requeue(index, ready_at);
            }
            RetryDecision::Abandon { .. } => {
                state.abandon(index, error);
            }
        }
        decision
    }
}
