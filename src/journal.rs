// =============================================================================
// Journal Writer — per-symbol enriched-bar dumps
// =============================================================================
//
// Journaling never blocks trading: every failure (missing bars, I/O error) is
// swallowed and logged here rather than propagated to the caller.
// =============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use crate::model::EnrichedMinuteBar;
use crate::types::FormulaVariant;

pub struct JournalWriter {
    base_dir: PathBuf,
}

impl JournalWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    /// Serialize `bars` for `symbol` under `buy_sell_data/<formula>/<phase>/
    /// <end_date>_end_date/<SYM>_SD(<sd>)_ST(<st>)_to_ED(<ed>)_ET(<et>).json`.
    /// Never returns an error to the caller — failures are logged and dropped.
    pub fn write(&self, formula: FormulaVariant, phase: &str, symbol: &str, bars: &[EnrichedMinuteBar]) {
        if let Err(e) = self.try_write(formula, phase, symbol, bars) {
            warn!(error = %e, symbol, phase, "journal write failed — continuing");
        }
    }

    fn try_write(&self, formula: FormulaVariant, phase: &str, symbol: &str, bars: &[EnrichedMinuteBar]) -> Result<()> {
        let first = bars.first().context("no bars to journal")?;
        let last = bars.last().context("no bars to journal")?;

        let (sd, st) = (&first.cal_d, &first.cal_t);
        let (ed, et) = (&last.cal_d, &last.cal_t);

        let dir = self
            .base_dir
            .join("buy_sell_data")
            .join(formula.to_string())
            .join(phase)
            .join(format!("{ed}_end_date"));

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create journal dir {}", dir.display()))?;

        let file_name = format!("{symbol}_SD({sd})_ST({st})_to_ED({ed})_ET({et}).json");
        let path = dir.join(file_name);

        let content = serde_json::to_string_pretty(bars).context("failed to serialize bars")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write journal file {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar(cal_d: &str, cal_t: &str, c: f64) -> EnrichedMinuteBar {
        EnrichedMinuteBar {
            bar: crate::model::Bar { s: 0, e: 60_000, o: c, h: c, l: c, c, v: 10_000.0 },
            sma: c,
            ema: c,
            v_sma: 10_000.0,
            v_ema: 10_000.0,
            cal_d: cal_d.to_string(),
            cal_t: cal_t.to_string(),
            intersection: None,
            bought_at_price: None,
            bought_at_ts: None,
            sold_at_price: None,
            sold_at_ts: None,
        }
    }

    #[test]
    fn writes_and_reparses_roundtrip() {
        let dir = std::env::temp_dir().join(format!("crossbar-journal-test-{}", std::process::id()));
        let writer = JournalWriter::new(&dir);
        let bars = vec![
            sample_bar("2026-07-28", "06:30:00", 10.0),
            sample_bar("2026-07-28", "06:31:00", 11.0),
        ];
        writer.write(FormulaVariant::F1, "buy", "AAPL", &bars);

        let expected = dir
            .join("buy_sell_data")
            .join("F1")
            .join("buy")
            .join("2026-07-28_end_date")
            .join("AAPL_SD(2026-07-28)_ST(06:30:00)_to_ED(2026-07-28)_ET(06:31:00).json");
        assert!(expected.exists());

        let content = std::fs::read_to_string(&expected).unwrap();
        let reparsed: Vec<EnrichedMinuteBar> = serde_json::from_str(&content).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert!((reparsed[1].bar.c - 11.0).abs() < 1e-9);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_bars_does_not_panic() {
        let dir = std::env::temp_dir().join(format!("crossbar-journal-empty-{}", std::process::id()));
        let writer = JournalWriter::new(&dir);
        writer.write(FormulaVariant::F1, "final", "AAPL", &[]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
