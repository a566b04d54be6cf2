use std::{fmt::Display, future::Future, time::Duration};

use tracing::{error, warn};

use crate::env::{MAX_RETRIES, REQUEST_TIMEOUT};

/// A state that controls the flow after a failed attempt.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The control flow should retry if possible, waiting at least `after` when given.
    ///
    /// See: [`retry_if_possible`]
    Retry {
        /// The delay hinted by the remote side, e.g. from a `Retry-After` header.
        after: Option<Duration>,
    },
    /// The control flow should exit immediately.
    Stop,
}

/// Errors that know whether the attempt producing them may be repeated.
pub trait Stateful {
    /// Returns the [`State`] the control flow should continue with.
    fn state(&self) -> State;
}

/// How often and how patiently failed transactions are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of retries after the first attempt.
    pub max_retries: u8,
    /// The delay before the first retry. Doubled for every further retry.
    pub base_delay: Duration,
    /// The upper bound of any computed or hinted delay.
    pub max_delay: Duration,
    /// The timeout applied to a single attempt.
    pub timeout: Duration,
    /// The timeout applied to a single attempt moving artifact bytes.
    pub transfer_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Creates a [`RetryPolicy`] from the [`MAX_RETRIES`] and [`REQUEST_TIMEOUT`] environment variables.
    pub fn from_env() -> Self {
        Self {
            max_retries: *MAX_RETRIES,
            timeout: *REQUEST_TIMEOUT,
            ..Self::default()
        }
    }

    /// Creates a [`RetryPolicy`] that never waits between attempts.
    pub fn immediate(max_retries: u8) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Computes the delay before the `retry`-th retry, preferring the remote hint.
    pub fn backoff(&self, retry: u8, hint: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << u32::from(retry.saturating_sub(1).min(16)));
        hint.unwrap_or(exponential).min(self.max_delay)
    }
}

/// Decides whether retrying is allowed based on a provided retry times and the policy.
///
/// # Errors
///
/// Returns [`Err<()>`] if retrying is not allowed, otherwise [`Ok<()>`] is returned.
pub fn retry_if_possible(retry: &mut u8, policy: &RetryPolicy) -> Result<(), ()> {
    if *retry >= policy.max_retries {
        error!(
            "retried for too many times ({}), stopping!",
            policy.max_retries
        );
        Err(())
    } else {
        *retry += 1;
        warn!("retrying… ({retry} / {})", policy.max_retries);
        Ok(())
    }
}

/// Runs a transaction until it succeeds, fails with [`State::Stop`], or the retry limit is reached.
///
/// The last error is returned when the transaction does not succeed.
///
/// # Errors
///
/// Returns the error of the last attempt.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, name: &str, mut f: F) -> Result<T, E>
where
    E: Stateful + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry: u8 = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => match err.state() {
                State::Retry { after } => {
                    warn!("transaction {name} failed: {err}");
                    if retry_if_possible(&mut retry, policy).is_err() {
                        return Err(err);
                    }
                    tokio::time::sleep(policy.backoff(retry, after)).await;
                }
                State::Stop => {
                    error!("transaction {name} failed: {err}");
                    return Err(err);
                }
            },
        }
    }
}
