//! Retry logic module.
//!
//! Bounded exponential backoff for transient failures: a busy or locked
//! SQLite database, pool checkout timeouts, and interrupted file writes.

use crate::config::RetrySettings;
use crate::error::{Result, RewindError};
use log::debug;
use std::io;
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_factor: 2.0,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig {
            max_attempts: settings.max_attempts.max(1),
            initial_delay_ms: settings.initial_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            backoff_factor: settings.backoff_factor,
        }
    }
}

impl RetryConfig {
    /// A single attempt with no waiting. Handy in tests.
    pub fn no_retry() -> Self {
        RetryConfig {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_factor: 1.0,
        }
    }

    fn next_delay(&self, current: u64) -> u64 {
        ((current as f32 * self.backoff_factor) as u64).min(self.max_delay_ms)
    }
}

/// Check if an error is worth another attempt
pub fn is_retryable_error(error: &RewindError) -> bool {
    match error {
        RewindError::Database(e) => {
            if let rusqlite::Error::SqliteFailure(code, _) = e {
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) {
                    return true;
                }
            }
            let error_string = e.to_string().to_lowercase();
            error_string.contains("busy") || error_string.contains("locked")
        }
        // Pool checkout only fails on timeout
        RewindError::Pool(_) => true,
        RewindError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ),
        _ => false,
    }
}

/// Retry a fallible operation with exponential backoff
pub fn retry_with_backoff<F, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    run_with_backoff(config, operation, |_| true)
}

/// Retry only while the error is retryable; anything else returns at once
pub fn retry_if_retryable<F, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    run_with_backoff(config, operation, is_retryable_error)
}

fn run_with_backoff<F, T, P>(config: &RetryConfig, mut operation: F, should_retry: P) -> Result<T>
where
    F: FnMut() -> Result<T>,
    P: Fn(&RewindError) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut current_delay = config.initial_delay_ms;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }

                // Don't sleep after the last attempt
                if attempt < max_attempts {
                    debug!(
                        "Attempt {}/{} failed ({}), retrying in {}ms...",
                        attempt, max_attempts, e, current_delay
                    );
                    thread::sleep(Duration::from_millis(current_delay));
                    current_delay = config.next_delay(current_delay);
                }

                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| RewindError::other("Retry failed with no error information")))
}
