//! Bounded exponential backoff for provider calls.
//!
//! Each upstream call walks `Pending -> Retrying(n) -> {Succeeded | Failed}`.
//! Only transient failures move to `Retrying`; permanent ones fail at once.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{ConfigError, Error, GeocodeError, RouteError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidParameter {
                field: "retry.base_delay_ms",
                reason: format!("exceeds max_delay_ms ({})", self.max_delay_ms),
            });
        }
        Ok(())
    }

    /// Delay before the retry that follows `failures` failed attempts.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    /// Number of failed attempts so far.
    Retrying(u32),
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Transient,
    Permanent,
}

impl AttemptState {
    pub fn advance(self, outcome: Outcome, max_attempts: u32) -> AttemptState {
        let failures = match self {
            AttemptState::Pending => 0,
            AttemptState::Retrying(n) => n,
            done => return done,
        };
        match outcome {
            Outcome::Success => AttemptState::Succeeded,
            Outcome::Permanent => AttemptState::Failed,
            Outcome::Transient if failures + 1 >= max_attempts => AttemptState::Failed,
            Outcome::Transient => AttemptState::Retrying(failures + 1),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::Failed)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for RouteError {
    fn is_transient(&self) -> bool {
        matches!(self, RouteError::Provider(_))
    }
}

impl Retryable for GeocodeError {
    fn is_transient(&self) -> bool {
        matches!(self, GeocodeError::Provider(_))
    }
}

/// Runs `op` until it succeeds, fails permanently, exhausts the policy or the
/// token is cancelled. `op` receives the 1-based attempt number.
pub fn run_with_retry<T, E, F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, Error>
where
    E: Retryable + Into<Error> + std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut state = AttemptState::Pending;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let attempt = match state {
            AttemptState::Retrying(failures) => failures + 1,
            _ => 1,
        };
        let result = op(attempt);
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(err) if err.is_transient() => Outcome::Transient,
            Err(_) => Outcome::Permanent,
        };
        state = state.advance(outcome, policy.max_attempts);

        match (state, result) {
            (AttemptState::Succeeded, Ok(value)) => return Ok(value),
            (AttemptState::Retrying(failures), Err(err)) => {
                let delay = policy.backoff(failures);
                debug!(
                    "{}: attempt {}/{} failed ({}), retrying in {:?}",
                    label, attempt, policy.max_attempts, err, delay
                );
                if !cancel.sleep(delay) {
                    return Err(Error::Cancelled);
                }
            }
            (_, Err(err)) => {
                if outcome == Outcome::Transient {
                    warn!("{}: giving up after {} attempts: {}", label, attempt, err);
                }
                return Err(err.into());
            }
            (_, Ok(value)) => return Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_state_machine_transitions() {
        let s = AttemptState::Pending;
        assert_eq!(s.advance(Outcome::Success, 3), AttemptState::Succeeded);
        assert_eq!(s.advance(Outcome::Permanent, 3), AttemptState::Failed);
        let s = s.advance(Outcome::Transient, 3);
        assert_eq!(s, AttemptState::Retrying(1));
        let s = s.advance(Outcome::Transient, 3);
        assert_eq!(s, AttemptState::Retrying(2));
        assert_eq!(s.advance(Outcome::Transient, 3), AttemptState::Failed);
        assert_eq!(
            AttemptState::Failed.advance(Outcome::Success, 3),
            AttemptState::Failed
        );
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(8_000));
        assert_eq!(policy.backoff(100), Duration::from_millis(8_000));
    }

    #[test]
    fn test_transient_errors_are_retried_until_success() {
        let mut calls = 0;
        let result = run_with_retry(&fast_policy(3), &CancellationToken::new(), "t", |_| {
            calls += 1;
            if calls < 3 {
                Err(RouteError::Provider("503".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_attempt_ceiling_surfaces_provider_error() {
        let mut calls = 0;
        let result: Result<(), Error> =
            run_with_retry(&fast_policy(3), &CancellationToken::new(), "t", |_| {
                calls += 1;
                Err(RouteError::Provider("timeout".into()))
            });
        assert_eq!(result, Err(Error::Route(RouteError::Provider("timeout".into()))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_not_found_and_invalid_input_are_not_retried() {
        for err in [RouteError::NotFound, RouteError::InvalidInput("lat".into())] {
            let mut calls = 0;
            let result: Result<(), Error> =
                run_with_retry(&fast_policy(5), &CancellationToken::new(), "t", |_| {
                    calls += 1;
                    Err(err.clone())
                });
            assert_eq!(result, Err(Error::Route(err)));
            assert_eq!(calls, 1);
        }
    }

    #[test]
    fn test_cancelled_token_stops_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let mut calls = 0;
        let result: Result<(), Error> = run_with_retry(&fast_policy(3), &token, "t", |_| {
            calls += 1;
            Ok::<(), RouteError>(())
        });
        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(zero.validate().is_err());
    }
}
