//! Retry with exponential backoff for day store operations

use std::thread;
use std::time::Duration;

use log::{error, warn};
use serde::{Deserialize, Serialize};

/// Configuration for retry logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            exponential_base: 1.0,
        }
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is reached,
/// sleeping between attempts. Errors for which `is_retryable` returns false
/// are returned immediately.
pub fn retry_with_backoff<T, E, F, P>(
    config: &RetryConfig,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = Duration::from_millis(config.initial_delay_ms);

    loop {
        attempt += 1;

        match operation() {
            Ok(result) => {
                if attempt > 1 {
                    warn!(
                        "Operation '{}' succeeded after {} attempts",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    error!(
                        "Operation '{}' failed with a permanent error: {}",
                        operation_name, e
                    );
                    return Err(e);
                }
                if attempt >= max_attempts {
                    error!(
                        "Operation '{}' failed after {} attempts. Final error: {}",
                        operation_name, attempt, e
                    );
                    return Err(e);
                }

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempt, max_attempts, e, delay
                );

                thread::sleep(delay);

                delay = Duration::from_millis(
                    (delay.as_millis() as f64 * config.exponential_base) as u64,
                )
                .min(Duration::from_millis(config.max_delay_ms));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            exponential_base: 2.0,
        }
    }

    #[test]
    fn test_retry_success_on_third_attempt() {
        let mut attempts = 0;
        let result = retry_with_backoff(&fast_config(3), "test_operation", |_| true, || {
            attempts += 1;
            if attempts < 3 {
                Err("simulated failure")
            } else {
                Ok("success")
            }
        });

        assert_eq!(result, Ok("success"));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_retry_exhausted() {
        let mut attempts = 0;
        let result = retry_with_backoff(&fast_config(2), "test_operation", |_| true, || {
            attempts += 1;
            Err::<(), &str>("persistent failure")
        });

        assert_eq!(result, Err("persistent failure"));
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let mut attempts = 0;
        let _ = retry_with_backoff(&fast_config(0), "test_operation", |_| true, || {
            attempts += 1;
            Err::<(), &str>("nope")
        });
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let mut attempts = 0;
        let result = retry_with_backoff(
            &fast_config(5),
            "test_operation",
            |e: &&str| *e != "corrupt",
            || {
                attempts += 1;
                Err::<(), &str>("corrupt")
            },
        );

        assert_eq!(result, Err("corrupt"));
        assert_eq!(attempts, 1);
    }
}
