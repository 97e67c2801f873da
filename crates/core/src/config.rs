use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Provider selection ────────────────────────────────────────

/// Which worker provider backend a scheduler is wired to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// One dedicated OS thread per work item, pruned lazily.
    #[default]
    Thread,
    /// Blocking workers on a tokio runtime that deregister themselves.
    EventLoop,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Thread => "thread",
            ProviderKind::EventLoop => "event_loop",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" | "threads" => Ok(ProviderKind::Thread),
            "event_loop" | "event-loop" | "eventloop" => Ok(ProviderKind::EventLoop),
            other => Err(ConfigError::Invalid(format!(
                "unknown provider kind '{other}', expected 'thread' or 'event_loop'"
            ))),
        }
    }
}

// ── Pool config ───────────────────────────────────────────────

/// Admission-control settings shared by every worker provider.
///
/// Parsed from TOML with per-field defaults, then overridden by
/// `SPOOL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Live-context count above which new contexts pay the short penalty.
    #[serde(default = "default_slow_down_threshold")]
    pub slow_down_threshold: usize,
    /// Live-context count above which new contexts pay the long penalty.
    #[serde(default = "default_slow_even_more_threshold")]
    pub slow_even_more_threshold: usize,
    /// Short penalty in milliseconds.
    #[serde(default = "default_slow_down_penalty_ms")]
    pub slow_down_penalty_ms: u64,
    /// Long penalty in milliseconds.
    #[serde(default = "default_slow_even_more_penalty_ms")]
    pub slow_even_more_penalty_ms: u64,
    /// Backend to build.
    #[serde(default)]
    pub provider: ProviderKind,
}

fn default_slow_down_threshold() -> usize { 50 }
fn default_slow_even_more_threshold() -> usize { 100 }
fn default_slow_down_penalty_ms() -> u64 { 500 }
fn default_slow_even_more_penalty_ms() -> u64 { 20_000 }

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slow_down_threshold: default_slow_down_threshold(),
            slow_even_more_threshold: default_slow_even_more_threshold(),
            slow_down_penalty_ms: default_slow_down_penalty_ms(),
            slow_even_more_penalty_ms: default_slow_even_more_penalty_ms(),
            provider: ProviderKind::default(),
        }
    }
}

impl PoolConfig {
    /// Default penalties with the given thresholds.
    pub fn with_thresholds(slow_down_threshold: usize, slow_even_more_threshold: usize) -> Self {
        Self {
            slow_down_threshold,
            slow_even_more_threshold,
            ..Self::default()
        }
    }

    /// Replace both penalty durations.
    pub fn penalties(mut self, slow_down: Duration, slow_even_more: Duration) -> Self {
        self.slow_down_penalty_ms = slow_down.as_millis() as u64;
        self.slow_even_more_penalty_ms = slow_even_more.as_millis() as u64;
        self
    }

    /// Select the provider backend.
    pub fn provider(mut self, kind: ProviderKind) -> Self {
        self.provider = kind;
        self
    }

    pub fn slow_down_penalty(&self) -> Duration {
        Duration::from_millis(self.slow_down_penalty_ms)
    }

    pub fn slow_even_more_penalty(&self) -> Duration {
        Duration::from_millis(self.slow_even_more_penalty_ms)
    }

    /// Parse config from a TOML string, apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded pool config file");
        Self::from_toml(&content)
    }

    /// Build config from defaults and environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SPOOL_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SPOOL_SLOW_DOWN_THRESHOLD") {
            self.slow_down_threshold = parse_number("SPOOL_SLOW_DOWN_THRESHOLD", &v)?;
        }
        if let Some(v) = get("SPOOL_SLOW_EVEN_MORE_THRESHOLD") {
            self.slow_even_more_threshold = parse_number("SPOOL_SLOW_EVEN_MORE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("SPOOL_SLOW_DOWN_PENALTY_MS") {
            self.slow_down_penalty_ms = parse_number("SPOOL_SLOW_DOWN_PENALTY_MS", &v)?;
        }
        if let Some(v) = get("SPOOL_SLOW_EVEN_MORE_PENALTY_MS") {
            self.slow_even_more_penalty_ms = parse_number("SPOOL_SLOW_EVEN_MORE_PENALTY_MS", &v)?;
        }
        if let Some(v) = get("SPOOL_PROVIDER") {
            self.provider = v.parse()?;
        }
        Ok(())
    }

    /// Check threshold ordering.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slow_down_threshold == 0 {
            return Err(ConfigError::Invalid(
                "slow_down_threshold must be greater than 0".into(),
            ));
        }
        if self.slow_even_more_threshold <= self.slow_down_threshold {
            return Err(ConfigError::Invalid(format!(
                "slow_even_more_threshold ({}) must be greater than slow_down_threshold ({})",
                self.slow_even_more_threshold, self.slow_down_threshold
            )));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a non-negative integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.slow_down_threshold, 50);
        assert_eq!(config.slow_even_more_threshold, 100);
        assert_eq!(config.slow_down_penalty(), Duration::from_millis(500));
        assert_eq!(config.slow_even_more_penalty(), Duration::from_secs(20));
        assert_eq!(config.provider, ProviderKind::Thread);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml_keeps_defaults() {
        let mut config: PoolConfig = toml::from_str(
            r#"
slow_down_threshold = 20
slow_even_more_threshold = 50
provider = "event_loop"
"#,
        )
        .unwrap();
        config.apply_overrides_from(lookup(&[])).unwrap();

        assert_eq!(config.slow_down_threshold, 20);
        assert_eq!(config.slow_even_more_threshold, 50);
        assert_eq!(config.slow_down_penalty_ms, 500);
        assert_eq!(config.provider, ProviderKind::EventLoop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_provider_in_toml_is_a_parse_error() {
        let err = toml::from_str::<PoolConfig>("provider = \"fibers\"").unwrap_err();
        assert!(err.to_string().contains("fibers"));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = PoolConfig::default();
        config
            .apply_overrides_from(lookup(&[
                ("SPOOL_SLOW_DOWN_THRESHOLD", "5"),
                ("SPOOL_SLOW_EVEN_MORE_THRESHOLD", "10"),
                ("SPOOL_SLOW_DOWN_PENALTY_MS", "1"),
                ("SPOOL_SLOW_EVEN_MORE_PENALTY_MS", "2"),
                ("SPOOL_PROVIDER", "event-loop"),
            ]))
            .unwrap();

        assert_eq!(config.slow_down_threshold, 5);
        assert_eq!(config.slow_even_more_threshold, 10);
        assert_eq!(config.slow_down_penalty(), Duration::from_millis(1));
        assert_eq!(config.slow_even_more_penalty(), Duration::from_millis(2));
        assert_eq!(config.provider, ProviderKind::EventLoop);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = PoolConfig::default();
        config
            .apply_overrides_from(lookup(&[("SPOOL_SLOW_DOWN_THRESHOLD", "  ")]))
            .unwrap();
        assert_eq!(config.slow_down_threshold, 50);
    }

    #[test]
    fn malformed_env_value_is_rejected() {
        let mut config = PoolConfig::default();
        let err = config
            .apply_overrides_from(lookup(&[("SPOOL_SLOW_DOWN_THRESHOLD", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("SPOOL_SLOW_DOWN_THRESHOLD")));

        let err = config
            .apply_overrides_from(lookup(&[("SPOOL_PROVIDER", "green-threads")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let config = PoolConfig::with_thresholds(0, 10);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        assert!(PoolConfig::with_thresholds(10, 10).validate().is_err());
        assert!(PoolConfig::with_thresholds(10, 5).validate().is_err());
        assert!(PoolConfig::with_thresholds(5, 10).validate().is_ok());
    }

    #[test]
    fn parsed_inverted_thresholds_fail_validation() {
        let config: PoolConfig =
            toml::from_str("slow_down_threshold = 100\nslow_even_more_threshold = 50\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_helpers() {
        let config = PoolConfig::with_thresholds(5, 10)
            .penalties(Duration::from_millis(3), Duration::from_millis(7))
            .provider(ProviderKind::EventLoop);
        assert_eq!(config.slow_down_penalty_ms, 3);
        assert_eq!(config.slow_even_more_penalty_ms, 7);
        assert_eq!(config.provider.to_string(), "event_loop");
    }

    #[test]
    fn provider_kind_from_str() {
        assert_eq!("thread".parse::<ProviderKind>().unwrap(), ProviderKind::Thread);
        assert_eq!("Event_Loop".parse::<ProviderKind>().unwrap(), ProviderKind::EventLoop);
        assert!("".parse::<ProviderKind>().is_err());
    }
}
