use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ErrorCategory;
use crate::registry::RegistryOptions;
use crate::retry::{EngineOptions, PolicyTable, RetryOverrides};

/// Toast durations, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// "Retrying in Xs" warnings.
    pub retry_toast_ms: u64,
    /// "Recovered after N attempts".
    pub recovered_toast_ms: u64,
    /// Final error reports (critical severity doubles this).
    pub error_toast_ms: u64,
    /// Default "Operation timed out" warning from the registry.
    pub timeout_toast_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retry_toast_ms: 3_000,
            recovered_toast_ms: 3_000,
            error_toast_ms: 5_000,
            timeout_toast_ms: 5_000,
        }
    }
}

/// Operation registry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Timeout applied to operations started without one (None = no timeout).
    pub default_timeout_ms: Option<u64>,
}

/// Partial policy override for one category; unset keys keep the built-in value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverride {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub exponential_backoff: Option<bool>,
    pub jitter: Option<bool>,
}

impl PolicyOverride {
    pub fn to_overrides(&self) -> RetryOverrides {
        let mut o = RetryOverrides::new();
        o.max_attempts = self.max_attempts;
        o.base_delay = self.base_delay_ms.map(Duration::from_millis);
        o.max_delay = self.max_delay_ms.map(Duration::from_millis);
        o.backoff_multiplier = self.backoff_multiplier;
        o.exponential_backoff = self.exponential_backoff;
        o.jitter = self.jitter;
        o
    }
}

/// `[retry.<category>]` sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub network: Option<PolicyOverride>,
    pub auth: Option<PolicyOverride>,
    pub compliance: Option<PolicyOverride>,
    pub healthcare: Option<PolicyOverride>,
    pub data: Option<PolicyOverride>,
    pub validation: Option<PolicyOverride>,
    pub general: Option<PolicyOverride>,
}

impl RetrySection {
    pub fn get(&self, category: ErrorCategory) -> Option<&PolicyOverride> {
        match category {
            ErrorCategory::Network => self.network.as_ref(),
            ErrorCategory::Auth => self.auth.as_ref(),
            ErrorCategory::Compliance => self.compliance.as_ref(),
            ErrorCategory::Healthcare => self.healthcare.as_ref(),
            ErrorCategory::Data => self.data.as_ref(),
            ErrorCategory::Validation => self.validation.as_ref(),
            ErrorCategory::General => self.general.as_ref(),
        }
    }

    /// Configured overrides in category order.
    pub fn iter(&self) -> impl Iterator<Item = (ErrorCategory, &PolicyOverride)> {
        ErrorCategory::ALL
            .into_iter()
            .filter_map(|c| self.get(c).map(|o| (c, o)))
    }
}

/// Global configuration loaded from `~/.config/opguard/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpguardConfig {
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Optional per-category policy overrides; missing categories use the built-in table.
    #[serde(default)]
    pub retry: RetrySection,
}

impl OpguardConfig {
    /// Reject values that cannot be clamped into something meaningful.
    pub fn validate(&self) -> Result<()> {
        for (category, o) in self.retry.iter() {
            if let Some(m) = o.backoff_multiplier {
                if !m.is_finite() || m <= 0.0 {
                    bail!("retry.{category}.backoff_multiplier must be a positive number, got {m}");
                }
            }
            if let (Some(base), Some(max)) = (o.base_delay_ms, o.max_delay_ms) {
                if base > max {
                    bail!("retry.{category}: base_delay_ms ({base}) exceeds max_delay_ms ({max})");
                }
            }
        }
        Ok(())
    }

    /// Built-in policy table with the `[retry.*]` overrides applied.
    pub fn policy_table(&self) -> PolicyTable {
        let mut table = PolicyTable::default();
        for (category, o) in self.retry.iter() {
            table.overlay(category, &o.to_overrides());
        }
        table
    }

    pub fn engine_options(&self) -> EngineOptions {
        let n = &self.notifications;
        EngineOptions {
            retry_toast: Duration::from_millis(n.retry_toast_ms),
            recovered_toast: Duration::from_millis(n.recovered_toast_ms),
            error_toast: Duration::from_millis(n.error_toast_ms),
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            default_timeout: self.registry.default_timeout_ms.map(Duration::from_millis),
            timeout_toast: Duration::from_millis(self.notifications.timeout_toast_ms),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("opguard")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<OpguardConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = OpguardConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

/// Load and validate an explicit config file.
pub fn load_from(path: &Path) -> Result<OpguardConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg: OpguardConfig =
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = OpguardConfig::default();
        assert_eq!(cfg.notifications.retry_toast_ms, 3_000);
        assert_eq!(cfg.notifications.error_toast_ms, 5_000);
        assert!(cfg.registry.default_timeout_ms.is_none());
        assert_eq!(cfg.retry.iter().count(), 0);
    }

    #[test]
    fn config_toml_roundtrip() {
        let mut cfg = OpguardConfig::default();
        cfg.retry.data = Some(PolicyOverride {
            max_attempts: Some(2),
            ..PolicyOverride::default()
        });
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: OpguardConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn empty_file_is_default() {
        let cfg: OpguardConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, OpguardConfig::default());
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            [notifications]
            retry_toast_ms = 1500

            [registry]
            default_timeout_ms = 30000

            [retry.network]
            max_attempts = 2
            base_delay_ms = 250
            jitter = false

            [retry.compliance]
            max_delay_ms = 60000
        "#;
        let cfg: OpguardConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.notifications.retry_toast_ms, 1_500);
        assert_eq!(cfg.notifications.recovered_toast_ms, 3_000);
        assert_eq!(cfg.registry.default_timeout_ms, Some(30_000));
        let net = cfg.retry.network.as_ref().unwrap();
        assert_eq!(net.max_attempts, Some(2));
        assert_eq!(net.jitter, Some(false));
        assert!(net.max_delay_ms.is_none());
        assert!(cfg.retry.auth.is_none());
    }

    #[test]
    fn overrides_change_only_their_category() {
        let toml = r#"
            [retry.network]
            max_attempts = 2
            base_delay_ms = 250
        "#;
        let cfg: OpguardConfig = toml::from_str(toml).unwrap();
        let table = cfg.policy_table();
        let net = table.get(ErrorCategory::Network);
        assert_eq!(net.max_attempts, 2);
        assert_eq!(net.base_delay, Duration::from_millis(250));
        assert_eq!(net.max_delay, Duration::from_secs(30));
        assert!((net.backoff_multiplier - 1.8).abs() < 1e-9);
        assert_eq!(table.get(ErrorCategory::Data).max_attempts, 4);
    }

    #[test]
    fn options_follow_notification_section() {
        let mut cfg = OpguardConfig::default();
        cfg.notifications.error_toast_ms = 8_000;
        cfg.registry.default_timeout_ms = Some(1_000);
        assert_eq!(cfg.engine_options().error_toast, Duration::from_secs(8));
        let reg = cfg.registry_options();
        assert_eq!(reg.default_timeout, Some(Duration::from_secs(1)));
        assert_eq!(reg.timeout_toast, Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let toml = r#"
            [retry.data]
            base_delay_ms = 5000
            max_delay_ms = 100
        "#;
        let cfg: OpguardConfig = toml::from_str(toml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("retry.data"));
    }

    #[test]
    fn load_from_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[retry.auth]\nmax_attempts = 1\n").unwrap();
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.policy_table().get(ErrorCategory::Auth).max_attempts, 1);

        fs::write(&path, "[retry.auth]\nbackoff_multiplier = -2.0\n").unwrap();
        assert!(load_from(&path).is_err());
        assert!(load_from(&dir.path().join("missing.toml")).is_err());
    }
}
