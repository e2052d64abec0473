//! Backoff between attempts to reach the server

use std::time::Duration;

/// Doubling delays from 2s up to 32s, then 32s more per attempt, until the
/// attempt budget runs out (a little over half an hour of waiting in all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    doubling_attempts: u32,
    step_secs: u64,
    max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            doubling_attempts: 5,
            step_secs: 32,
            max_attempts: 65,
        }
    }
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait before retry number `attempt` (counting from 1).
    /// `None` means give up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if attempt >= self.max_attempts {
            return None;
        }
        let secs = if attempt <= self.doubling_attempts {
            1u64 << attempt
        } else {
            let ceiling = 1u64 << self.doubling_attempts;
            ceiling + self.step_secs * u64::from(attempt - self.doubling_attempts)
        };
        Some(Duration::from_secs(secs))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(policy: &ReconnectPolicy, attempt: u32) -> u64 {
        policy.delay(attempt).unwrap().as_secs()
    }

    #[test]
    fn doubles_then_steps() {
        let p = ReconnectPolicy::new();
        let delays: Vec<u64> = (1..=8).map(|n| secs(&p, n)).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 64, 96, 128]);
    }

    #[test]
    fn gives_up_eventually() {
        let p = ReconnectPolicy::new();
        assert_eq!(secs(&p, 64), 32 + 32 * 59);
        assert_eq!(p.delay(65), None);
        assert_eq!(p.delay(100), None);
    }

    #[test]
    fn first_connect_is_immediate() {
        assert_eq!(ReconnectPolicy::new().delay(0), Some(Duration::ZERO));
    }
}
