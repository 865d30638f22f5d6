// =============================================================================
// Runtime Configuration — hot-loadable strategy settings with atomic save
// =============================================================================
//
// Every tunable named in the engine's configuration surface lives here, with
// a `#[serde(default = "fn")]` on each field so a partial or missing config
// file still loads with documented defaults. Persistence uses an atomic
// tmp + rename pattern, shared with the ban list's persistence scheme.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::FormulaVariant;

fn default_cancel_threshold() -> f64 {
    0.03
}

fn default_reserve_balance() -> f64 {
    25_000.0
}

fn default_min_allowed_price() -> f64 {
    0.7
}

fn default_max_allowed_price() -> f64 {
    370.5
}

fn default_volume_divisor() -> f64 {
    40.0
}

fn default_buying_power_fraction() -> f64 {
    0.95
}

fn default_ban_duration_days() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    Vec::new()
}

/// Top-level runtime configuration for the engine.
///
/// Every field has a serde default so an older JSON file missing new fields
/// still deserializes correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Which exit-policy variant this instance runs.
    #[serde(default)]
    pub formula_variant: FormulaVariant,

    /// Whether a loss applies a 30-day ban to the symbol.
    #[serde(default = "default_true")]
    pub ban_mode: bool,

    /// Whether to cancel an unfilled buy once price rallies past
    /// `requested_price + cancel_threshold`.
    #[serde(default = "default_true")]
    pub with_cancel: bool,

    #[serde(default = "default_cancel_threshold")]
    pub cancel_threshold: f64,

    /// Reserve subtracted from buying power before sizing orders.
    #[serde(default = "default_reserve_balance")]
    pub reserve_balance: f64,

    #[serde(default = "default_min_allowed_price")]
    pub min_allowed_price: f64,

    #[serde(default = "default_max_allowed_price")]
    pub max_allowed_price: f64,

    /// Divisor applied to the 30-minute EMA-volume estimate (`eq1`).
    #[serde(default = "default_volume_divisor")]
    pub volume_divisor: f64,

    /// Fraction of allowed buying power used for `eq2` sizing.
    #[serde(default = "default_buying_power_fraction")]
    pub buying_power_fraction: f64,

    #[serde(default = "default_ban_duration_days")]
    pub ban_duration_days: i64,

    /// Symbols the engine subscribes to and trades.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            formula_variant: FormulaVariant::default(),
            ban_mode: true,
            with_cancel: true,
            cancel_threshold: default_cancel_threshold(),
            reserve_balance: default_reserve_balance(),
            min_allowed_price: default_min_allowed_price(),
            max_allowed_price: default_max_allowed_price(),
            volume_divisor: default_volume_divisor(),
            buying_power_fraction: default_buying_power_fraction(),
            ban_duration_days: default_ban_duration_days(),
            symbols: default_symbols(),
        }
    }
}

impl RuntimeConfig {
    pub fn ban_duration_ms(&self) -> i64 {
        self.ban_duration_days * 24 * 3600 * 1000
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            formula = %config.formula_variant,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename). Prevents corruption if the process
    /// crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialize runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.formula_variant, FormulaVariant::F1);
        assert!(cfg.ban_mode);
        assert!(cfg.with_cancel);
        assert!((cfg.cancel_threshold - 0.03).abs() < f64::EPSILON);
        assert!((cfg.reserve_balance - 25_000.0).abs() < f64::EPSILON);
        assert!((cfg.min_allowed_price - 0.7).abs() < f64::EPSILON);
        assert!((cfg.max_allowed_price - 370.5).abs() < f64::EPSILON);
        assert_eq!(cfg.ban_duration_ms(), 30 * 24 * 3600 * 1000);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.formula_variant, FormulaVariant::F1);
        assert!(cfg.ban_mode);
        assert!((cfg.volume_divisor - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "formula_variant": "F3", "symbols": ["AAPL"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.formula_variant, FormulaVariant::F3);
        assert_eq!(cfg.symbols, vec!["AAPL"]);
        assert!(cfg.with_cancel);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.formula_variant, cfg2.formula_variant);
        assert!((cfg.cancel_threshold - cfg2.cancel_threshold).abs() < f64::EPSILON);
    }

    #[test]
    fn atomic_save_then_load_roundtrips() {
        let dir = std::env::temp_dir().join(format!("crossbar-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.symbols = vec!["AAPL".into(), "MSFT".into()];
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, cfg.symbols);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
