//! Exponential backoff with jitter for the storage-transient error class:
//! 100 ms base, 30 s cap, retried on transient failure.

use std::time::Duration;

use rand::Rng;

const BASE: Duration = Duration::from_millis(100);
const CAP: Duration = Duration::from_secs(30);

pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The delay to sleep before the next retry, with up to 50% jitter
    /// to avoid every worker retrying in lockstep.
    pub fn next_delay(&mut self) -> Duration {
        let exp_ms = (BASE.as_millis() as u64).saturating_mul(1u64 << self.attempt.min(16));
        let capped_ms = exp_ms.min(CAP.as_millis() as u64);
        self.attempt += 1;

        let half = capped_ms / 2;
        let jitter = if half == 0 { 0 } else { rand::rng().random_range(0..=half) };
        Duration::from_millis(half + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let mut backoff = Backoff::new();
        let first = backoff.next_delay();
        assert!(first <= BASE);
        for _ in 0..20 {
            let d = backoff.next_delay();
            assert!(d <= CAP);
        }
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut backoff = Backoff::new();
        for _ in 0..10 {
            backoff.next_delay();
        }
        backoff.reset();
        let d = backoff.next_delay();
        assert!(d <= BASE);
    }
}
