//! # Engine Configuration
//!
//! Timing, storage and data-file settings. Read from an optional JSON file,
//! then overridden by `AGENTFLOW_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Half-open millisecond range `[min_ms, max_ms)` for simulated delays
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    /// Parse `"1000..3000"`
    pub fn parse(s: &str) -> Option<Self> {
        let (min, max) = s.split_once("..")?;
        let min_ms = min.trim().parse().ok()?;
        let max_ms = max.trim().parse().ok()?;
        (min_ms <= max_ms).then_some(Self { min_ms, max_ms })
    }
}

/// Step delay used by the run scheduler
pub const STEP_DELAY: DelayRange = DelayRange::new(1000, 3000);
/// Node delay used by the canvas driver
pub const NODE_DELAY: DelayRange = DelayRange::new(1500, 2500);

/// Configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay for each simulated run step
    pub step_delay: DelayRange,
    /// Delay for each node during a canvas walk
    pub node_delay: DelayRange,
    /// Buffered events per subscriber before it lags
    pub event_capacity: usize,
    /// SQLite snapshot database
    pub db_path: PathBuf,
    /// Optional agent catalog JSON (defaults to the built-in catalog)
    pub catalog_path: Option<PathBuf>,
    /// Optional routing table JSON (defaults to the built-in table)
    pub routing_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_delay: STEP_DELAY,
            node_delay: NODE_DELAY,
            event_capacity: 256,
            db_path: PathBuf::from(".agentflow/agentflow.db"),
            catalog_path: None,
            routing_path: None,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file if given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                serde_json::from_str(&content).with_context(|| "Failed to parse config JSON")?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `AGENTFLOW_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("AGENTFLOW_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(path) = var("AGENTFLOW_CATALOG") {
            self.catalog_path = Some(PathBuf::from(path));
        }
        if let Some(path) = var("AGENTFLOW_ROUTING") {
            self.routing_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = var("AGENTFLOW_STEP_DELAY_MS") {
            match DelayRange::parse(&raw) {
                Some(range) => self.step_delay = range,
                None => tracing::warn!(value = %raw, "Ignoring malformed AGENTFLOW_STEP_DELAY_MS"),
            }
        }
        if let Some(raw) = var("AGENTFLOW_NODE_DELAY_MS") {
            match DelayRange::parse(&raw) {
                Some(range) => self.node_delay = range,
                None => tracing::warn!(value = %raw, "Ignoring malformed AGENTFLOW_NODE_DELAY_MS"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_ranges() {
        let config = EngineConfig::default();
        assert_eq!(config.step_delay, DelayRange::new(1000, 3000));
        assert_eq!(config.node_delay, DelayRange::new(1500, 2500));
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(DelayRange::parse("5..10"), Some(DelayRange::new(5, 10)));
        assert_eq!(DelayRange::parse("0..0"), Some(DelayRange::new(0, 0)));
        assert_eq!(DelayRange::parse("10..5"), None);
        assert_eq!(DelayRange::parse("fast"), None);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AGENTFLOW_DB_PATH", "/tmp/flow.db"),
            ("AGENTFLOW_STEP_DELAY_MS", "0..0"),
            ("AGENTFLOW_NODE_DELAY_MS", "nonsense"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.db_path, PathBuf::from("/tmp/flow.db"));
        assert_eq!(config.step_delay, DelayRange::new(0, 0));
        assert_eq!(config.node_delay, NODE_DELAY);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"event_capacity": 8}"#).unwrap();
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.step_delay, STEP_DELAY);
    }
}
