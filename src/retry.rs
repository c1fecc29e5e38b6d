//! Exponential backoff with jitter, shared by narrative generation,
//! the repair sweep, and job rescheduling.

use rand::Rng;
use std::time::Duration;

/// Delay before the given attempt (1-based): base * 2^(attempt-1),
/// capped, with +/-25% jitter so synchronized failures spread out.
pub fn backoff_delay(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let raw = base_secs.saturating_mul(1u64 << exp).min(max_secs);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_secs_f64(raw as f64 * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        // Jitter bounds: value stays within 25% of the nominal delay.
        let d1 = backoff_delay(1, 2, 60).as_secs_f64();
        assert!((1.5..=2.5).contains(&d1));

        let d3 = backoff_delay(3, 2, 60).as_secs_f64();
        assert!((6.0..=10.0).contains(&d3));

        let capped = backoff_delay(30, 2, 60).as_secs_f64();
        assert!(capped <= 75.0);
    }
}
