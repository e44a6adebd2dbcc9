//! Exponential backoff for connection attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Backoff schedule: `delay(n) = min(base * 2^(n-1), cap)` for the
/// 1-based attempt number `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_tries: u32,
}

impl RetryPolicy {
    /// Schedule for the initial dial.
    pub fn initial_connect() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_tries: 5,
        }
    }

    /// Schedule for a mid-session reconnect.
    pub fn reconnect() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_tries: 3,
        }
    }

    /// Delay before retrying after the given 1-based attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let exp = self.base.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        exp.min(self.cap)
    }

    /// Sleep out the backoff for `attempt`, waking early with
    /// `SessionClosed` if the token is cancelled.
    pub async fn sleep(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), Error> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::SessionClosed),
            _ = tokio::time::sleep(self.delay(attempt)) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::initial_connect();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(6), Duration::from_secs(32));
        assert_eq!(policy.delay(7), Duration::from_secs(60));
        assert_eq!(policy.delay(30), Duration::from_secs(60));
    }

    #[test]
    fn bounded_tries() {
        assert_eq!(RetryPolicy::initial_connect().max_tries, 5);
        assert_eq!(RetryPolicy::reconnect().max_tries, 3);
    }

    #[tokio::test]
    async fn sleep_aborts_on_cancellation() {
        let policy = RetryPolicy {
            base: Duration::from_secs(60),
            cap: Duration::from_secs(60),
            max_tries: 1,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let start = std::time::Instant::now();
        let err = policy.sleep(1, &cancel).await.unwrap_err();
        assert_eq!(err, Error::SessionClosed);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
