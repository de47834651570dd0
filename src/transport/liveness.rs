//! Application-level liveness probe.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks the single outstanding ping of a relay socket.
///
/// At most one probe is outstanding; starting a probe while one is pending
/// is a no-op, so the earliest deadline wins.
#[derive(Debug, Default, Clone)]
pub struct LivenessProbe {
    deadline: Option<Instant>,
}

impl LivenessProbe {
    /// Create an idle probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the probe. Returns `true` if a new ping should be sent.
    pub fn start(&mut self, timeout: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + timeout);
        true
    }

    /// A pong arrived.
    pub fn on_pong(&mut self) {
        self.deadline = None;
    }

    /// Disarm without a verdict (socket replaced or closed).
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Deadline of the outstanding probe.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether a probe is outstanding.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Sleep until `deadline`, or forever when there is none.
///
/// Used as a `select!` arm for optional single-shot timers.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_single_outstanding_probe() {
        let mut probe = LivenessProbe::new();
        assert!(probe.start(Duration::from_secs(1)));
        let first = probe.deadline().unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!probe.start(Duration::from_secs(1)));
        assert_eq!(probe.deadline(), Some(first));

        probe.on_pong();
        assert!(!probe.is_pending());
        assert!(probe.start(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_opt_fires() {
        let deadline = Instant::now() + Duration::from_secs(3);
        sleep_until_opt(Some(deadline)).await;
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_opt_none_pends() {
        let result =
            tokio::time::timeout(Duration::from_secs(60), sleep_until_opt(None)).await;
        assert!(result.is_err());
    }
}
