//! Per-email OTP send throttling backed by the send log.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::storage::SendLog;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

#[derive(Clone, Copy, Debug)]
pub struct OtpThrottle {
    limit: i64,
    window: Duration,
}

impl OtpThrottle {
    #[must_use]
    pub fn new(limit: i64, window_seconds: i64) -> Self {
        Self {
            limit,
            window: Duration::seconds(window_seconds),
        }
    }

    /// Limited once `limit` sends fall inside the trailing window.
    #[must_use]
    pub fn decide(&self, sent_in_window: i64) -> RateLimitDecision {
        if sent_in_window >= self.limit {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }

    /// Read-only; never appends to the log.
    ///
    /// # Errors
    /// Returns an error if the send log cannot be read.
    pub async fn check<L>(&self, log: &L, email: &str, now: DateTime<Utc>) -> Result<RateLimitDecision>
    where
        L: SendLog + ?Sized,
    {
        let sent = log.count_sent_since(email, now - self.window).await?;
        Ok(self.decide(sent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    #[test]
    fn decide_limits_at_threshold() {
        let throttle = OtpThrottle::new(3, 3600);
        assert_eq!(throttle.decide(0), RateLimitDecision::Allowed);
        assert_eq!(throttle.decide(2), RateLimitDecision::Allowed);
        assert_eq!(throttle.decide(3), RateLimitDecision::Limited);
        assert_eq!(throttle.decide(10), RateLimitDecision::Limited);
    }

    #[tokio::test]
    async fn check_ignores_sends_outside_window() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_default();
        let throttle = OtpThrottle::new(3, 3600);

        store.log_sent("a@x.com", now - Duration::seconds(3600)).await?;
        store.log_sent("a@x.com", now - Duration::minutes(30)).await?;
        store.log_sent("a@x.com", now - Duration::minutes(1)).await?;
        assert_eq!(
            throttle.check(&store, "a@x.com", now).await?,
            RateLimitDecision::Allowed
        );

        store.log_sent("a@x.com", now).await?;
        assert_eq!(
            throttle.check(&store, "a@x.com", now).await?,
            RateLimitDecision::Limited
        );
        assert_eq!(
            throttle.check(&store, "b@x.com", now).await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }
}
