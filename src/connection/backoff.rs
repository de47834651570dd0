//! Reconnect backoff policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::core::{
    CLIENT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RETRY_AFTER, DEVICE_BACKOFF_CAP_AFTER_ATTEMPTS,
    DEVICE_MAX_BACKOFF,
};

/// Client policy: `2^attempt` seconds (1-based), no jitter, bounded attempts.
#[derive(Debug, Clone)]
pub struct ClientBackoff {
    attempt: u32,
    max_attempts: u32,
}

impl Default for ClientBackoff {
    fn default() -> Self {
        Self::new(CLIENT_MAX_RECONNECT_ATTEMPTS)
    }
}

impl ClientBackoff {
    /// Policy giving up after `max_attempts` reconnect attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(Duration::from_secs(2u64.saturating_pow(self.attempt)))
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// A connect succeeded.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Device policy: jittered exponential backoff, unbounded attempts.
///
/// The base is `2^counter` seconds, capped at 60s once the counter passes 6.
/// A uniform jitter in `[0, base]` is added.
#[derive(Debug, Clone, Default)]
pub struct DeviceBackoff {
    counter: u32,
}

impl DeviceBackoff {
    /// Fresh policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with_rng(&mut rand::thread_rng())
    }

    /// Delay before the next attempt, drawing jitter from `rng`.
    pub fn next_delay_with_rng(&mut self, rng: &mut impl Rng) -> Duration {
        let base = self.base();
        self.counter = self.counter.saturating_add(1);
        let jitter_ms = rng.gen_range(0..=base.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }

    /// Base delay for the current counter.
    ///
    /// Counter 6 still yields 64s; the 60s cap applies from counter 7.
    pub fn base(&self) -> Duration {
        if self.counter > DEVICE_BACKOFF_CAP_AFTER_ATTEMPTS {
            DEVICE_MAX_BACKOFF
        } else {
            Duration::from_secs(1 << self.counter)
        }
    }

    /// Attempts counted since the last reset.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The connection stayed up long enough.
    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

/// Interpret a `Retry-After` header: delay-seconds or an HTTP-date.
///
/// Missing, unparseable, negative or past values yield 300 seconds.
pub fn parse_retry_after(value: Option<&str>, now: DateTime<Utc>) -> Duration {
    let Some(value) = value.map(str::trim) else {
        return DEFAULT_RETRY_AFTER;
    };

    if let Ok(seconds) = value.parse::<i64>() {
        return u64::try_from(seconds)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
    }

    match DateTime::parse_from_rfc2822(value) {
        Ok(date) => (date.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(DEFAULT_RETRY_AFTER),
        Err(_) => DEFAULT_RETRY_AFTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_client_schedule() {
        let mut backoff = ClientBackoff::default();
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 64, 128, 256]);
        assert_eq!(backoff.attempts(), 8);
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_device_base_schedule() {
        let mut backoff = DeviceBackoff::new();
        let mut rng = StdRng::seed_from_u64(7);
        let mut bases = Vec::new();
        for _ in 0..10 {
            bases.push(backoff.base().as_secs());
            backoff.next_delay_with_rng(&mut rng);
        }
        assert_eq!(bases, vec![1, 2, 4, 8, 16, 32, 64, 60, 60, 60]);
    }

    #[test]
    fn test_device_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let mut backoff = DeviceBackoff::new();
            for _ in 0..12 {
                let base = backoff.base();
                let delay = backoff.next_delay_with_rng(&mut rng);
                assert!(delay >= base && delay <= base * 2, "{delay:?} vs {base:?}");
            }
        }
    }

    #[test]
    fn test_device_reset() {
        let mut backoff = DeviceBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.counter(), 2);
        backoff.reset();
        assert_eq!(backoff.base(), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after(Some("120"), now), Duration::from_secs(120));
        assert_eq!(parse_retry_after(Some(" 5 "), now), Duration::from_secs(5));
        assert_eq!(parse_retry_after(Some("-3"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(Some("soon"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(None, now), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap();
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT"), now),
            Duration::from_secs(60)
        );
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:00:00 GMT"), now),
            DEFAULT_RETRY_AFTER
        );
    }
}
