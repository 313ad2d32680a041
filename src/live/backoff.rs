use rand::Rng;
use std::time::Duration;

/// Reconnect delays for a live channel after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_backoff_ms as f64;
        let max = self.max_backoff_ms as f64;

        // Exponential: base * 2^(attempt - 1)
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let raw_backoff = base * 2_f64.powi(exponent);
        let capped_backoff = raw_backoff.min(max);

        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };

        Duration::from_millis((capped_backoff as u64) + jitter)
    }
}
