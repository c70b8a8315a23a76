use std::time::Duration;

/// Backoff schedule for reconnecting after an unsolicited close.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Immediate, unbounded retries.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    /// Delay before the given 1-based attempt, or `None` once the budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }

        let factor = self.multiplier.powi(attempt.saturating_sub(1).min(64) as i32);
        let max_secs = self.max_delay.as_secs_f64();
        if self.initial_delay.as_secs_f64() * factor >= max_secs {
            return Some(self.max_delay);
        }
        Some(self.initial_delay.mul_f64(factor))
    }
}
