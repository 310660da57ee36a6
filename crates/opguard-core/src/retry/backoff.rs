//! Backoff delay computation.
//!
//! `delay = base * multiplier^(attempts - 1)` (or `base` when exponential
//! backoff is off), scaled by a jitter factor in `[0.5, 1.0]` when jitter is
//! on, then capped at `max_delay`. The jitter factor comes from an injected
//! [`JitterSource`] so schedules can be made deterministic.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::policy::RetryConfig;

const JITTER_MIN: f64 = 0.5;
const JITTER_MAX: f64 = 1.0;

/// Source of jitter factors. Implementations should return values in
/// `[0.5, 1.0]`; anything else is clamped.
pub trait JitterSource: Send + Sync {
    fn factor(&self) -> f64;
}

/// Thread-local RNG. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn factor(&self) -> f64 {
        rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX)
    }
}

/// Always the same factor.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn factor(&self) -> f64 {
        self.0
    }
}

/// Seeded RNG: same seed, same sequence of factors.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn factor(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.gen_range(JITTER_MIN..=JITTER_MAX)
    }
}

/// Delay before the retry that follows the `attempts`-th failure (1-based).
pub fn compute_delay(cfg: &RetryConfig, attempts: u32, jitter: &dyn JitterSource) -> Duration {
    let base_ms = cfg.base_delay.as_secs_f64() * 1000.0;

    let mut delay_ms = if cfg.exponential_backoff {
        let exp = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        base_ms * cfg.backoff_multiplier.powi(exp)
    } else {
        base_ms
    };
    if cfg.jitter {
        let factor = jitter.factor();
        let factor = if factor.is_nan() {
            JITTER_MAX
        } else {
            factor.clamp(JITTER_MIN, JITTER_MAX)
        };
        delay_ms *= factor;
    }
    if delay_ms.is_nan() {
        return cfg.max_delay;
    }
    // clamp as a Duration; near Duration::MAX the f64 form overflows
    Duration::try_from_secs_f64(delay_ms.max(0.0) / 1000.0)
        .map_or(cfg.max_delay, |d| d.min(cfg.max_delay))
}

/// Delays before each retry a full sequence would wait through
/// (`max_attempts - 1` entries).
pub fn delay_schedule(cfg: &RetryConfig, jitter: &dyn JitterSource) -> Vec<Duration> {
    (1..cfg.max_attempts)
        .map(|attempts| compute_delay(cfg, attempts, jitter))
        .collect()
}
