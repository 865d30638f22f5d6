// =============================================================================
// SMA / EMA — custom recursive form (non-standard, reproduced exactly)
// =============================================================================
//
// This pair of indicators is specific to this engine: the EMA step is
// `(x - prev) / 3 + prev`, not the textbook `2 / (period + 1)` smoothing
// constant, and the SMA window is an early-terminating 240-second lookback
// rather than a fixed bar count. Both are computed over price (close) and,
// in parallel, over volume.
// =============================================================================

use crate::model::{Bar, EnrichedMinuteBar};

/// Round half-away-from-zero to two decimal places. Every SMA/EMA step is
/// rounded immediately; later steps consume the rounded value, so rounding
/// here must not be deferred or batched.
pub fn round2(x: f64) -> f64 {
    if x >= 0.0 {
        (x * 100.0 + 0.5).floor() / 100.0
    } else {
        (x * 100.0 - 0.5).ceil() / 100.0
    }
}

/// Early-terminating 240-second backward window: walk back from the new bar
/// through already-enriched `history` (oldest-first) plus the new bar itself,
/// stopping as soon as a bar's start falls outside `new_bar.s - 240_000`.
/// Returns the rounded mean of `field` over that window.
pub fn sma_window(history: &[EnrichedMinuteBar], new_bar: &Bar, field: impl Fn(&Bar) -> f64) -> f64 {
    let cutoff = new_bar.s - 240_000;

    let mut sum = field(new_bar);
    let mut count = 1usize;

    for eb in history.iter().rev() {
        if eb.bar.s < cutoff {
            break;
        }
        sum += field(&eb.bar);
        count += 1;
    }

    round2(sum / count as f64)
}

/// One EMA recursion step for bar index `idx` (0-based, counting `history`'s
/// length as the new bar's index).
///
/// - `idx == 0`: seeded from this bar's own SMA.
/// - `idx == 1`: `(x - sma0) / 3 + sma0`, where `sma0` is bar 0's SMA.
/// - `idx >= 2`: `(x - ema_prev) / 3 + ema_prev`.
pub fn ema_step(idx: usize, x: f64, sma0: Option<f64>, ema_prev: Option<f64>, sma_here: f64) -> f64 {
    match idx {
        0 => sma_here,
        1 => {
            let sma0 = sma0.unwrap_or(sma_here);
            round2((x - sma0) / 3.0 + sma0)
        }
        _ => {
            let prev = ema_prev.unwrap_or(sma_here);
            round2((x - prev) / 3.0 + prev)
        }
    }
}

/// Compute `(sma, ema, v_sma, v_ema)` for a new bar given the already-enriched
/// history (oldest-first) preceding it.
pub fn compute_for_new_bar(history: &[EnrichedMinuteBar], new_bar: &Bar) -> (f64, f64, f64, f64) {
    let idx = history.len();

    let sma = sma_window(history, new_bar, |b| b.c);
    let v_sma = sma_window(history, new_bar, |b| b.v);

    let sma0 = history.first().map(|b| b.sma);
    let v_sma0 = history.first().map(|b| b.v_sma);
    let ema_prev = history.last().map(|b| b.ema);
    let v_ema_prev = history.last().map(|b| b.v_ema);

    let ema = ema_step(idx, new_bar.c, sma0, ema_prev, sma);
    let v_ema = ema_step(idx, new_bar.v, v_sma0, v_ema_prev, v_sma);

    (sma, ema, v_sma, v_ema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(s: i64, c: f64, v: f64) -> Bar {
        Bar { s, e: s + 60_000, o: c, h: c + 1.0, l: c - 1.0, c, v }
    }

    fn enrich(history: &[EnrichedMinuteBar], b: Bar) -> EnrichedMinuteBar {
        let (sma, ema, v_sma, v_ema) = compute_for_new_bar(history, &b);
        EnrichedMinuteBar {
            bar: b,
            sma,
            ema,
            v_sma,
            v_ema,
            cal_d: "2026-01-01".into(),
            cal_t: "10:00:00".into(),
            intersection: None,
            bought_at_price: None,
            bought_at_ts: None,
            sold_at_price: None,
            sold_at_ts: None,
        }
    }

    #[test]
    fn round2_half_away_from_zero() {
        assert!((round2(1.005) - 1.01).abs() < 1e-9);
        assert!((round2(-1.005) - (-1.01)).abs() < 1e-9);
        assert!((round2(1.004) - 1.00).abs() < 1e-9);
    }

    #[test]
    fn first_bar_ema_equals_sma() {
        let b = bar(0, 10.0, 10_000.0);
        let eb = enrich(&[], b);
        assert!((eb.sma - 10.0).abs() < 1e-9);
        assert!((eb.ema - eb.sma).abs() < 1e-9);
    }

    #[test]
    fn second_bar_uses_sma0_seed() {
        let mut history = Vec::new();
        history.push(enrich(&history, bar(0, 10.0, 10_000.0)));
        let eb1 = enrich(&history, bar(60_000, 11.0, 11_000.0));

        let sma0 = history[0].sma;
        let expected_ema = round2((11.0 - sma0) / 3.0 + sma0);
        assert!((eb1.ema - expected_ema).abs() < 1e-9);
    }

    #[test]
    fn later_bars_recurse_from_prior_ema() {
        let mut history = Vec::new();
        history.push(enrich(&history, bar(0, 10.0, 10_000.0)));
        let b1 = enrich(&history, bar(60_000, 11.0, 11_000.0));
        history.push(b1.clone());
        let b2 = enrich(&history, bar(120_000, 12.0, 12_000.0));

        let expected_ema = round2((12.0 - b1.ema) / 3.0 + b1.ema);
        assert!((b2.ema - expected_ema).abs() < 1e-9);
    }

    #[test]
    fn sma_window_terminates_early_on_240s_cutoff() {
        // Five 60s bars span 240s from the first to the last start; a sixth
        // bar pushes the first bar outside the window.
        let mut history = Vec::new();
        for i in 0..5 {
            let b = bar(i * 60_000, 10.0 + i as f64, 10_000.0);
            history.push(enrich(&history, b));
        }
        let sixth = bar(5 * 60_000, 20.0, 10_000.0);
        let sma = sma_window(&history, &sixth, |b| b.c);
        // Window should now exclude bar 0 (s=0, cutoff = 300_000 - 240_000 = 60_000).
        let expected = (11.0 + 12.0 + 13.0 + 14.0 + 20.0) / 5.0;
        assert!((sma - round2(expected)).abs() < 1e-9);
    }

    #[test]
    fn sma_window_single_bar_is_its_own_close() {
        let sma = sma_window(&[], &bar(0, 42.0, 1.0), |b| b.c);
        assert!((sma - 42.0).abs() < 1e-9);
    }
}
