use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{ClassifyOverrides, ErrorCategory, ErrorRecord};

use super::backoff::{compute_delay, JitterSource};

/// Decides whether a classified failure is worth another attempt.
/// Receives the error and the number of failed executions so far.
pub type RetryCondition = Arc<dyn Fn(&ErrorRecord, u32) -> bool + Send + Sync>;

/// Invoked once when a sequence stops because it ran out of attempts.
pub type MaxAttemptsCallback = Arc<dyn Fn(&ErrorRecord, u32) + Send + Sync>;

/// Why the policy refused another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The retry condition rejected the error.
    NotRetryable,
    /// `max_attempts` executions have failed.
    Exhausted,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; the sequence is over.
    Stop(StopReason),
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Immutable retry policy for one sequence.
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of executions, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub exponential_backoff: bool,
    pub jitter: bool,
    pub retry_condition: RetryCondition,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("exponential_backoff", &self.exponential_backoff)
            .field("jitter", &self.jitter)
            .field("retry_condition", &"<predicate>")
            .finish()
    }
}

impl RetryConfig {
    /// Decide what to do after the `attempts`-th failed execution.
    pub fn decide(&self, error: &ErrorRecord, attempts: u32, jitter: &dyn JitterSource) -> RetryDecision {
        if !(self.retry_condition)(error, attempts) {
            return RetryDecision::Stop(StopReason::NotRetryable);
        }
        if attempts >= self.max_attempts {
            return RetryDecision::Stop(StopReason::Exhausted);
        }
        RetryDecision::RetryAfter(compute_delay(self, attempts, jitter))
    }

    /// Enforce `max_attempts >= 1`, `base_delay <= max_delay` and a usable
    /// multiplier. Offending values are clamped with a warning.
    pub fn normalized(mut self) -> Self {
        if self.max_attempts == 0 {
            tracing::warn!("retry max_attempts of 0 raised to 1");
            self.max_attempts = 1;
        }
        if self.base_delay > self.max_delay {
            tracing::warn!(
                base_ms = self.base_delay.as_millis() as u64,
                max_ms = self.max_delay.as_millis() as u64,
                "retry base_delay above max_delay; raising max_delay"
            );
            self.max_delay = self.base_delay;
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            tracing::warn!(multiplier = self.backoff_multiplier, "retry backoff_multiplier below 1; using 1");
            self.backoff_multiplier = 1.0;
        }
        self
    }
}

/// Failures no default policy ever retries.
fn never_retry(e: &ErrorRecord) -> bool {
    e.is_compliance_violation() || e.is_credential_failure()
}

fn transport_failure(e: &ErrorRecord) -> bool {
    e.is_server_error() || e.is_connectivity() || e.is_timeout()
}

fn network_condition(e: &ErrorRecord, _attempts: u32) -> bool {
    !never_retry(e) && e.is_transient()
}

fn data_condition(e: &ErrorRecord, _attempts: u32) -> bool {
    !never_retry(e) && (e.is_timeout() || e.is_server_error())
}

fn healthcare_condition(e: &ErrorRecord, _attempts: u32) -> bool {
    !never_retry(e) && e.category != ErrorCategory::Healthcare && transport_failure(e)
}

fn compliance_condition(e: &ErrorRecord, _attempts: u32) -> bool {
    !never_retry(e) && e.is_server_error()
}

fn transport_condition(e: &ErrorRecord, _attempts: u32) -> bool {
    !never_retry(e) && transport_failure(e)
}

type Condition = fn(&ErrorRecord, u32) -> bool;

struct Defaults {
    max_attempts: u32,
    base_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter: bool,
    condition: Condition,
}

fn defaults(
    max_attempts: u32,
    base_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter: bool,
    condition: Condition,
) -> Defaults {
    Defaults {
        max_attempts,
        base_ms,
        max_ms,
        multiplier,
        jitter,
        condition,
    }
}

fn default_config(category: ErrorCategory) -> RetryConfig {
    let d = match category {
        ErrorCategory::Network => defaults(6, 1_000, 30_000, 1.8, true, network_condition),
        ErrorCategory::Data => defaults(4, 1_500, 45_000, 2.5, true, data_condition),
        ErrorCategory::Healthcare => defaults(5, 2_000, 60_000, 2.0, true, healthcare_condition),
        ErrorCategory::Compliance => defaults(3, 5_000, 120_000, 3.0, true, compliance_condition),
        ErrorCategory::Auth => defaults(3, 1_000, 10_000, 2.0, false, transport_condition),
        ErrorCategory::General | ErrorCategory::Validation => {
            defaults(3, 2_000, 30_000, 2.0, true, transport_condition)
        }
    };
    RetryConfig {
        max_attempts: d.max_attempts,
        base_delay: Duration::from_millis(d.base_ms),
        max_delay: Duration::from_millis(d.max_ms),
        backoff_multiplier: d.multiplier,
        exponential_backoff: true,
        jitter: d.jitter,
        retry_condition: Arc::new(d.condition),
    }
}

/// Category -> default policy.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    entries: BTreeMap<ErrorCategory, RetryConfig>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            entries: ErrorCategory::ALL
                .into_iter()
                .map(|c| (c, default_config(c)))
                .collect(),
        }
    }
}

impl PolicyTable {
    pub fn get(&self, category: ErrorCategory) -> RetryConfig {
        self.entries
            .get(&category)
            .cloned()
            .unwrap_or_else(|| default_config(category))
    }

    /// Replace a category's policy.
    pub fn set(&mut self, category: ErrorCategory, config: RetryConfig) {
        self.entries.insert(category, config.normalized());
    }

    /// Overlay overrides onto a category's policy in place.
    pub fn overlay(&mut self, category: ErrorCategory, overrides: &RetryOverrides) {
        let merged = overrides.apply(&self.get(category));
        self.entries.insert(category, merged);
    }

    /// Resolve the effective policy for one call.
    pub fn resolve(&self, category: ErrorCategory, overrides: &RetryOverrides) -> RetryConfig {
        overrides.apply(&self.get(category))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ErrorCategory, &RetryConfig)> {
        self.entries.iter().map(|(c, cfg)| (*c, cfg))
    }
}

#[derive(Clone)]
enum ConditionOverride {
    Replace(RetryCondition),
    Narrow(RetryCondition),
}

/// Per-call adjustments merged key-by-key over the category policy.
#[derive(Clone, Default)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub exponential_backoff: Option<bool>,
    pub jitter: Option<bool>,
    condition: Option<ConditionOverride>,
    pub on_max_attempts_reached: Option<MaxAttemptsCallback>,
    /// Provenance merged into every classified failure of the sequence.
    pub classify: ClassifyOverrides,
}

impl std::fmt::Debug for RetryOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOverrides")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("exponential_backoff", &self.exponential_backoff)
            .field("jitter", &self.jitter)
            .field("condition", &self.condition.as_ref().map(|_| "<predicate>"))
            .field("classify", &self.classify)
            .finish()
    }
}

impl RetryOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn base_delay(mut self, d: Duration) -> Self {
        self.base_delay = Some(d);
        self
    }

    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    pub fn backoff_multiplier(mut self, m: f64) -> Self {
        self.backoff_multiplier = Some(m);
        self
    }

    pub fn exponential_backoff(mut self, on: bool) -> Self {
        self.exponential_backoff = Some(on);
        self
    }

    pub fn jitter(mut self, on: bool) -> Self {
        self.jitter = Some(on);
        self
    }

    /// Replace the category's retry condition.
    pub fn retry_condition(mut self, f: impl Fn(&ErrorRecord, u32) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(ConditionOverride::Replace(Arc::new(f)));
        self
    }

    /// Keep the category's retry condition and additionally require `f`.
    pub fn narrow_retry_condition(
        mut self,
        f: impl Fn(&ErrorRecord, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(ConditionOverride::Narrow(Arc::new(f)));
        self
    }

    pub fn on_max_attempts_reached(mut self, f: impl Fn(&ErrorRecord, u32) + Send + Sync + 'static) -> Self {
        self.on_max_attempts_reached = Some(Arc::new(f));
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.classify.context = Some(context.into());
        self
    }

    pub fn user_action(mut self, action: impl Into<String>) -> Self {
        self.classify.user_action = Some(action.into());
        self
    }

    /// Merge over `base`; set fields win.
    pub fn apply(&self, base: &RetryConfig) -> RetryConfig {
        let retry_condition: RetryCondition = match &self.condition {
            None => Arc::clone(&base.retry_condition),
            Some(ConditionOverride::Replace(f)) => Arc::clone(f),
            Some(ConditionOverride::Narrow(f)) => {
                let base_cond = Arc::clone(&base.retry_condition);
                let extra = Arc::clone(f);
                Arc::new(move |e: &ErrorRecord, n: u32| base_cond(e, n) && extra(e, n))
            }
        };
        RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_delay: self.base_delay.unwrap_or(base.base_delay),
            max_delay: self.max_delay.unwrap_or(base.max_delay),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            exponential_backoff: self.exponential_backoff.unwrap_or(base.exponential_backoff),
            jitter: self.jitter.unwrap_or(base.jitter),
            retry_condition,
        }
        .normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, RawError};
    use crate::retry::FixedJitter;

    fn rec(raw: RawError) -> ErrorRecord {
        classify(&raw, None)
    }

    #[test]
    fn defaults_match_category_table() {
        let t = PolicyTable::default();
        let cases = [
            (ErrorCategory::Network, 6, 1_000, 1.8, true),
            (ErrorCategory::Data, 4, 1_500, 2.5, true),
            (ErrorCategory::Healthcare, 5, 2_000, 2.0, true),
            (ErrorCategory::Compliance, 3, 5_000, 3.0, true),
            (ErrorCategory::Auth, 3, 1_000, 2.0, false),
            (ErrorCategory::General, 3, 2_000, 2.0, true),
        ];
        for (cat, attempts, base_ms, mult, jitter) in cases {
            let c = t.get(cat);
            assert_eq!(c.max_attempts, attempts, "{cat}");
            assert_eq!(c.base_delay, Duration::from_millis(base_ms), "{cat}");
            assert!((c.backoff_multiplier - mult).abs() < 1e-9, "{cat}");
            assert_eq!(c.jitter, jitter, "{cat}");
            assert!(c.base_delay <= c.max_delay);
        }
    }

    #[test]
    fn auth_never_retries_invalid_credentials() {
        let auth = PolicyTable::default().get(ErrorCategory::Auth);
        let bad = rec(RawError::coded("AUTH_INVALID_CREDENTIALS"));
        for n in 0..20 {
            assert!(!(auth.retry_condition)(&bad, n));
        }
        // even when the response also carried a 5xx
        let bad_500 = rec(RawError::Http {
            status: 500,
            code: Some("AUTH_INVALID_CREDENTIALS".into()),
            message: None,
        });
        assert!(!(auth.retry_condition)(&bad_500, 1));
        assert!((auth.retry_condition)(&rec(RawError::http(502)), 1));
        assert!((auth.retry_condition)(&rec(RawError::timeout()), 1));
    }

    #[test]
    fn compliance_never_retries_violations() {
        let compliance = PolicyTable::default().get(ErrorCategory::Compliance);
        for code in ["AHPRA_COMPLIANCE_VIOLATION", "TGA_COMPLIANCE_VIOLATION", "COMPLIANCE_CHECK_FAILED"] {
            let v = rec(RawError::coded(code));
            for n in 0..20 {
                assert!(!(compliance.retry_condition)(&v, n), "{code}");
            }
        }
        assert!((compliance.retry_condition)(&rec(RawError::http(500)), 1));
        // 5xx only: a timeout is not enough for compliance
        assert!(!(compliance.retry_condition)(&rec(RawError::timeout()), 1));
    }

    #[test]
    fn healthcare_excludes_domain_failures() {
        let hc = PolicyTable::default().get(ErrorCategory::Healthcare);
        assert!(!(hc.retry_condition)(&rec(RawError::coded("PRACTITIONER_VERIFICATION_FAILED")), 1));
        assert!(!(hc.retry_condition)(&rec(RawError::coded("AUTH_SESSION_EXPIRED")), 1));
        assert!((hc.retry_condition)(&rec(RawError::http(503)), 1));
        assert!((hc.retry_condition)(&rec(RawError::from("connection reset")), 1));
    }

    #[test]
    fn network_retries_transient_only() {
        let net = PolicyTable::default().get(ErrorCategory::Network);
        assert!((net.retry_condition)(&rec(RawError::coded("NETWORK_TIMEOUT")), 1));
        assert!((net.retry_condition)(&rec(RawError::http(429)), 1));
        assert!(!(net.retry_condition)(&rec(RawError::http(404)), 1));
        assert!(!(net.retry_condition)(&rec(RawError::from("???")), 1));
    }

    #[test]
    fn data_retries_timeouts_and_5xx() {
        let data = PolicyTable::default().get(ErrorCategory::Data);
        assert!((data.retry_condition)(&rec(RawError::timeout()), 1));
        assert!((data.retry_condition)(&rec(RawError::http(500)), 1));
        assert!(!(data.retry_condition)(&rec(RawError::from("connection refused")), 1));
    }

    #[test]
    fn decide_stops_at_max_attempts() {
        let net = PolicyTable::default().get(ErrorCategory::Network);
        let e = rec(RawError::timeout());
        let j = FixedJitter(1.0);
        for n in 1..6 {
            assert!(matches!(net.decide(&e, n, &j), RetryDecision::RetryAfter(_)));
        }
        assert_eq!(net.decide(&e, 6, &j), RetryDecision::Stop(StopReason::Exhausted));
        let bad = rec(RawError::coded("VALIDATION_FAILED"));
        assert_eq!(net.decide(&bad, 1, &j), RetryDecision::Stop(StopReason::NotRetryable));
    }

    #[test]
    fn overrides_merge_key_by_key() {
        let t = PolicyTable::default();
        let o = RetryOverrides::new().max_attempts(2).jitter(false);
        let c = t.resolve(ErrorCategory::Network, &o);
        assert_eq!(c.max_attempts, 2);
        assert!(!c.jitter);
        assert_eq!(c.base_delay, Duration::from_millis(1_000));
        assert!((c.backoff_multiplier - 1.8).abs() < 1e-9);
    }

    #[test]
    fn replaced_condition_wins_and_narrowed_condition_ands() {
        let t = PolicyTable::default();
        let validation = rec(RawError::coded("VALIDATION_FAILED"));
        let replaced = t.resolve(ErrorCategory::Network, &RetryOverrides::new().retry_condition(|_, _| true));
        assert!((replaced.retry_condition)(&validation, 1));

        let timeout = rec(RawError::timeout());
        let narrowed = t.resolve(
            ErrorCategory::Network,
            &RetryOverrides::new().narrow_retry_condition(|_, n| n < 2),
        );
        assert!((narrowed.retry_condition)(&timeout, 1));
        assert!(!(narrowed.retry_condition)(&timeout, 2));
        assert!(!(narrowed.retry_condition)(&validation, 1));
    }

    #[test]
    fn invalid_overrides_are_normalized() {
        let t = PolicyTable::default();
        let c = t.resolve(
            ErrorCategory::General,
            &RetryOverrides::new()
                .max_attempts(0)
                .base_delay(Duration::from_secs(10))
                .max_delay(Duration::from_secs(1))
                .backoff_multiplier(f64::NAN),
        );
        assert_eq!(c.max_attempts, 1);
        assert!(c.base_delay <= c.max_delay);
        assert_eq!(c.backoff_multiplier, 1.0);
    }

    #[test]
    fn overlay_changes_table_entry() {
        let mut t = PolicyTable::default();
        t.overlay(ErrorCategory::Data, &RetryOverrides::new().max_attempts(9));
        assert_eq!(t.get(ErrorCategory::Data).max_attempts, 9);
        assert_eq!(t.get(ErrorCategory::Network).max_attempts, 6);
    }
}
