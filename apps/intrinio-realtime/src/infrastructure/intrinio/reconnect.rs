//! Reconnection Backoff
//!
//! Implements the self-heal delay sequence. Delays are consumed front to back;
//! once a single delay remains it is returned forever. A successful reconnect
//! restores the configured list.

use std::collections::VecDeque;
use std::time::Duration;

/// Default self-heal delays, in milliseconds.
pub const DEFAULT_BACKOFF_MS: [u64; 6] = [0, 100, 500, 1000, 2000, 5000];

/// Error type for backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    /// The configured delay list is empty.
    #[error("backoff sequence must contain at least one delay")]
    Empty,

    /// The final delay is zero, so retries would never be rate limited.
    #[error("final backoff delay must be greater than zero")]
    ZeroFinalDelay,
}

/// Consumable sequence of reconnect delays.
///
/// # Example
///
/// ```rust
/// use intrinio_realtime::infrastructure::intrinio::reconnect::BackoffSequence;
/// use std::time::Duration;
///
/// let mut backoff = BackoffSequence::from_millis(&[0, 100]).unwrap();
/// assert_eq!(backoff.next_delay(), Duration::ZERO);
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
///
/// // Successful reconnect
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Duration::ZERO);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffSequence {
    configured: Vec<Duration>,
    remaining: VecDeque<Duration>,
}

impl BackoffSequence {
    /// Create a sequence from a list of delays.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::Empty`] if `delays` is empty and
    /// [`BackoffError::ZeroFinalDelay`] if the repeating delay is zero.
    pub fn new(delays: Vec<Duration>) -> Result<Self, BackoffError> {
        match delays.last() {
            None => return Err(BackoffError::Empty),
            Some(last) if last.is_zero() => return Err(BackoffError::ZeroFinalDelay),
            Some(_) => {}
        }

        let remaining = delays.iter().copied().collect();
        Ok(Self {
            configured: delays,
            remaining,
        })
    }

    /// Create a sequence from a list of millisecond delays.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`BackoffSequence::new`].
    pub fn from_millis(millis: &[u64]) -> Result<Self, BackoffError> {
        Self::new(millis.iter().copied().map(Duration::from_millis).collect())
    }

    /// Take the next delay.
    ///
    /// The front element is removed only while more than one remains, so the
    /// final delay repeats indefinitely.
    pub fn next_delay(&mut self) -> Duration {
        if self.remaining.len() > 1 {
            self.remaining.pop_front().unwrap_or_default()
        } else {
            self.remaining.front().copied().unwrap_or_default()
        }
    }

    /// Restore the configured list after a successful reconnect.
    pub fn reset(&mut self) {
        self.remaining = self.configured.iter().copied().collect();
    }

    /// The configured delays.
    #[must_use]
    pub fn configured(&self) -> &[Duration] {
        &self.configured
    }
}

impl Default for BackoffSequence {
    fn default() -> Self {
        let configured: Vec<Duration> = DEFAULT_BACKOFF_MS
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect();
        let remaining = configured.iter().copied().collect();
        Self {
            configured,
            remaining,
        }
    }
}
