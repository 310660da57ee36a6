//! `opguard simulate <category>` – watch a retry sequence play out.

use anyhow::Result;
use clap::Args;
use opguard_core::config::OpguardConfig;
use opguard_core::notify::{Notification, NotificationSink, NotificationVariant};
use opguard_core::{ErrorCategory, OperationExecutor, RawError, RetryError, RetryOverrides};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Policy category to run under.
    pub category: ErrorCategory,
    /// How many executions fail before one succeeds.
    #[arg(long, default_value = "2", value_name = "N")]
    pub failures: u32,
    /// HTTP status each failing execution returns.
    #[arg(long, default_value = "503")]
    pub status: u16,
    /// Fail with this error code instead of an HTTP status.
    #[arg(long)]
    pub code: Option<String>,
    /// Override the policy's max attempts.
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,
    /// Override the base delay (ms); small values keep the run short.
    #[arg(long, value_name = "MS")]
    pub base_delay_ms: Option<u64>,
    /// Override the max delay (ms).
    #[arg(long, value_name = "MS")]
    pub max_delay_ms: Option<u64>,
    /// Print final retry stats as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SimulateArgs {
    pub fn overrides(&self) -> RetryOverrides {
        let mut o = RetryOverrides::new().context(format!("simulate {}", self.category));
        if let Some(n) = self.max_attempts {
            o = o.max_attempts(n);
        }
        if let Some(ms) = self.base_delay_ms {
            o = o.base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_delay_ms {
            o = o.max_delay(Duration::from_millis(ms));
        }
        o
    }
}

/// Prints notifications as they arrive.
struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn notify(&self, n: Notification) {
        let tag = match n.variant {
            NotificationVariant::Default => "info",
            NotificationVariant::Success => "ok",
            NotificationVariant::Warning => "warn",
            NotificationVariant::Destructive => "error",
        };
        println!("[{tag}] {}: {}", n.title, n.description);
    }
}

pub async fn run_simulate(cfg: OpguardConfig, args: &SimulateArgs) -> Result<()> {
    let executor = OperationExecutor::builder()
        .sink(Arc::new(StdoutSink))
        .config(cfg)
        .build();

    let calls = Arc::new(AtomicU32::new(0));
    let failures = args.failures;
    let status = args.status;
    let code = args.code.clone();
    let result = executor
        .with_retry(
            "simulate",
            format!("Simulated {} operation", args.category),
            args.category,
            args.overrides(),
            {
                let calls = Arc::clone(&calls);
                move || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    let err = match &code {
                        Some(code) => RawError::coded(code.clone()),
                        None => RawError::http(status),
                    };
                    async move {
                        if n < failures {
                            Err(err)
                        } else {
                            Ok(n + 1)
                        }
                    }
                }
            },
        )
        .await;

    match &result {
        Ok(executions) => println!("succeeded after {executions} execution(s)"),
        Err(RetryError::Failed { record, attempts, .. }) => {
            println!("gave up after {attempts} attempt(s): {record}")
        }
        Err(e) => println!("stopped: {e}"),
    }

    let stats = executor.get_retry_stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "executions: {}, recovered: {}, failed: {}",
            stats.attempts_executed,
            stats.successful_retries,
            stats.failed_retries + stats.immediate_failures
        );
    }
    Ok(())
}
