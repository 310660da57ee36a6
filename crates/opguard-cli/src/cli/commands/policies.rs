//! `opguard policies` – show effective retry policies.

use anyhow::Result;
use opguard_core::config::OpguardConfig;
use opguard_core::retry::RetryConfig;
use opguard_core::ErrorCategory;
use serde_json::json;

fn policy_json(category: ErrorCategory, p: &RetryConfig) -> serde_json::Value {
    json!({
        "category": category,
        "max_attempts": p.max_attempts,
        "base_delay_ms": p.base_delay.as_millis() as u64,
        "max_delay_ms": p.max_delay.as_millis() as u64,
        "backoff_multiplier": p.backoff_multiplier,
        "exponential_backoff": p.exponential_backoff,
        "jitter": p.jitter,
    })
}

pub fn run_policies(cfg: &OpguardConfig, only: Option<ErrorCategory>, json: bool) -> Result<()> {
    let table = cfg.policy_table();
    let rows: Vec<(ErrorCategory, &RetryConfig)> = table
        .iter()
        .filter(|(c, _)| only.map_or(true, |o| o == *c))
        .collect();

    if json {
        let out: Vec<_> = rows.iter().map(|(c, p)| policy_json(*c, p)).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{:<11} {:>8} {:>9} {:>9} {:>5} {:>6}",
        "CATEGORY", "ATTEMPTS", "BASE(ms)", "MAX(ms)", "MULT", "JITTER"
    );
    for (c, p) in rows {
        println!(
            "{:<11} {:>8} {:>9} {:>9} {:>5.1} {:>6}",
            c.as_str(),
            p.max_attempts,
            p.base_delay.as_millis(),
            p.max_delay.as_millis(),
            p.backoff_multiplier,
            if p.jitter { "yes" } else { "no" }
        );
    }
    Ok(())
}
