//! `opguard schedule <category>` – print the backoff schedule.

use opguard_core::config::OpguardConfig;
use opguard_core::retry::{delay_schedule, FixedJitter, JitterSource, SeededJitter};
use opguard_core::{ErrorCategory, RetryOverrides};
use std::time::Duration;

pub fn run_schedule(cfg: &OpguardConfig, category: ErrorCategory, seed: Option<u64>, max_attempts: Option<u32>) {
    let mut overrides = RetryOverrides::new();
    if let Some(n) = max_attempts {
        overrides = overrides.max_attempts(n);
    }
    let policy = cfg.policy_table().resolve(category, &overrides);
    let jitter: Box<dyn JitterSource> = match seed {
        Some(seed) => Box::new(SeededJitter::new(seed)),
        None => Box::new(FixedJitter(1.0)),
    };
    let delays = delay_schedule(&policy, jitter.as_ref());

    println!(
        "{category}: {} attempts, base {} ms, max {} ms, x{:.1}{}",
        policy.max_attempts,
        policy.base_delay.as_millis(),
        policy.max_delay.as_millis(),
        policy.backoff_multiplier,
        if policy.jitter { ", jitter" } else { "" }
    );
    if delays.is_empty() {
        println!("  no retries");
        return;
    }
    for (i, d) in delays.iter().enumerate() {
        println!("  after attempt {}: wait {:.2}s", i + 1, d.as_secs_f64());
    }
    let total: Duration = delays.iter().sum();
    println!("  total wait: {:.2}s", total.as_secs_f64());
}
