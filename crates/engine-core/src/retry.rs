use std::time::Duration;

/// Poll schedule applied while the transport reports `Connecting`.
///
/// Delays grow linearly with the attempt index, so the default policy
/// waits 0s, 1s, 2s, 3s before the wait is declared exhausted and an
/// explicit connect is issued.
#[derive(Debug, Clone, Copy)]
pub struct ConnectPollPolicy {
    max_attempts: u32,
}

impl ConnectPollPolicy {
    /// Create a policy with a bounded attempt count (`max_attempts >= 1`).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the given zero-based poll attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_secs(u64::from(attempt.min(self.max_attempts)))
    }
}

impl Default for ConnectPollPolicy {
    fn default() -> Self {
        Self::new(4)
    }
}
