// =============================================================================
// Strategy Core — buy/sell decision layer (§4.4)
// =============================================================================
//
// Implemented as an `impl<B: Broker> Engine<B>` block rather than a free-
// standing type: every decision here reads and writes the same `SymbolSlot`
// and `EngineState` the event dispatcher in `engine.rs` owns, and the design
// note in §9 treats F1/F3/F4 as a shared indicator/crossover core with only
// the exit-arming logic varying by formula variant — that variance is
// expressed here as a match on `config.formula_variant` rather than as
// separate trait implementations, since the three variants share every other
// code path verbatim.
// =============================================================================

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::engine::Engine;
use crate::indicators::moving_average::{compute_for_new_bar, round2};
use crate::model::{Bar, EnrichedMinuteBar, SymbolSlot};
use crate::types::{FormulaVariant, MarketSession, SellingMode};

/// A minute bar is "worthy" of triggering a buy when its own four
/// consecutive OHLC differences are all wide enough, and at least half of
/// the last (up to) five minute bars pass the same test (§4.4.2).
fn four_diff_ok(bar: &Bar) -> bool {
    let d1 = round2((bar.o - bar.h).abs());
    let d2 = round2((bar.h - bar.l).abs());
    let d3 = round2((bar.l - bar.c).abs());
    let d4 = round2((bar.c - bar.o).abs());
    d1 > 0.02 && d2 > 0.02 && d3 > 0.02 && d4 > 0.02
}

pub fn is_worthy(bars: &[EnrichedMinuteBar]) -> bool {
    let Some(last) = bars.last() else { return false };
    if !(last.bar.v > 5000.0) {
        return false;
    }
    if !four_diff_ok(&last.bar) {
        return false;
    }

    let window_start = bars.len().saturating_sub(5);
    let window = &bars[window_start..];
    let total = window.len();
    let worthy_count = window.iter().filter(|b| four_diff_ok(&b.bar)).count();
    worthy_count * 2 >= total
}

impl<B: Broker> Engine<B> {
    /// §4.4.1 Buy Intent, evaluated on the second-intersection event.
    /// `cal_t` is the triggering minute bar's wall-clock time.
    pub(crate) fn try_buy_intent(&mut self, sym: &str, slot: &mut SymbolSlot, cal_t: &str, bar_e: i64) {
        if self.state.current_bought_symbol.is_some() {
            return;
        }
        let Some(second_cal_t) = slot.intersection.second_cal_t.clone() else {
            return;
        };
        if self.clock.is_excluded(&second_cal_t) {
            return;
        }
        let Some(highest) = slot.intersection.highest_between_first_and_second else {
            return;
        };
        let buy_at = round2(highest + 0.01);
        if !(buy_at > self.config.min_allowed_price && buy_at < self.config.max_allowed_price) {
            return;
        }
        if !self.clock.is_allowed_trading_hour(cal_t) {
            return;
        }

        slot.buy_command = Some(crate::model::BuyCommand {
            buy_at,
            created_ts: bar_e,
            requested: false,
            requested_price: None,
        });
        info!(symbol = sym, buy_at, "buy intent recorded");
    }

    /// §4.4.2 Buy Trigger plus §4.4.3 order sizing/selection, evaluated on
    /// each second bar.
    pub(crate) async fn try_buy_trigger(&mut self, sym: &str, slot: &mut SymbolSlot, bar: &Bar) {
        if self.state.current_bought_symbol.is_some() {
            return;
        }
        let Some(bc) = slot.buy_command.clone() else {
            return;
        };
        if bc.requested {
            return;
        }
        if bar.s <= bc.created_ts {
            return;
        }
        if slot.bars.len() < 2 {
            return;
        }
        if bar.h < bc.buy_at - 0.01 {
            return;
        }

        let last = &slot.bars[slot.bars.len() - 1];
        let prev = &slot.bars[slot.bars.len() - 2];
        if last.sma == last.ema {
            return;
        }
        if !(last.sma > prev.sma && last.ema > prev.ema) {
            return;
        }
        if !is_worthy(&slot.bars) {
            return;
        }

        let cal_t = self.clock.cal_t(bar.e);
        if self.clock.is_excluded(&cal_t) {
            return;
        }

        let price = bc.buy_at;
        let quantity = match self.compute_quantity(slot, price).await {
            Some(q) if q > 0.0 => q,
            _ => {
                debug!(symbol = sym, "buy trigger qualified but computed quantity is zero — skipping");
                return;
            }
        };

        let Some(session) = self.clock.session(&cal_t) else {
            error!(symbol = sym, cal_t, "class-5 invariant violation: no market session for this timestamp, aborting buy");
            return;
        };

        let order_result = match session {
            MarketSession::PreMarket | MarketSession::AfterMarket => {
                let limit = round2(price + 0.02);
                self.broker.submit_buy_limit(sym, quantity, limit).await
            }
            MarketSession::Normal => {
                let stop = round2(price + 0.01);
                let limit = round2(price + 0.03);
                self.broker.submit_buy_stop_limit(sym, quantity, stop, limit).await
            }
        };

        match order_result {
            Ok(order_ref) => {
                info!(symbol = sym, price, quantity, session = %session, "buy submitted");
                if let Some(buy_command) = slot.buy_command.as_mut() {
                    buy_command.requested = true;
                    buy_command.requested_price = Some(price);
                }
                slot.last_buy_order_ref = Some(order_ref);
                slot.place_buy_at_ms = Some(bar.s);
                slot.cancel_attempted = false;
                self.state.current_bought_symbol = Some(sym.to_string());

                if self.config.formula_variant == FormulaVariant::F3 {
                    slot.trying_sell_on_decrease = true;
                    slot.trying_sell_ts = Some(bar.s);
                }

                self.journal.write(self.config.formula_variant, "buy", sym, &slot.bars);
            }
            Err(e) => {
                warn!(error = %e, symbol = sym, "buy submission failed — will retry on next qualifying second bar");
            }
        }
    }

    /// `eq1`/`eq2` order sizing (§4.4.3).
    async fn compute_quantity(&self, slot: &SymbolSlot, price: f64) -> Option<f64> {
        if price <= 0.0 {
            return None;
        }
        let eq1 = self.compute_eq1(slot).await;

        let account = match self.broker.account().await {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "account lookup failed, cannot size order");
                return None;
            }
        };
        let buying_power = (account.buying_power - self.config.reserve_balance).max(0.0);
        let eq2 = ((buying_power - self.config.reserve_balance) / price * self.config.buying_power_fraction)
            .floor()
            .max(0.0);

        Some(if eq1 == 0.0 { eq2 } else { eq1.min(eq2) })
    }

    /// `eq1`: 30-minute EMA-volume estimate divided by `volumeDivisor`. Uses
    /// in-memory `v_ema` when the slot has enough history; otherwise falls
    /// back to a historical-aggregates fetch.
    ///
    /// The fallback queries `AAPL` regardless of the symbol actually being
    /// traded — a quirk of the reference system this engine was distilled
    /// from, reproduced literally rather than silently "fixed" (see
    /// DESIGN.md's Open Question resolution).
    async fn compute_eq1(&self, slot: &SymbolSlot) -> f64 {
        if slot.bars.len() >= 40 {
            let window = &slot.bars[slot.bars.len() - 30..];
            let total: f64 = window.iter().map(|b| b.v_ema).sum();
            return (total / self.config.volume_divisor).floor();
        }

        let now = slot.bars.last().map(|b| b.bar.e).unwrap_or_else(|| Utc::now().timestamp_millis());
        let from_ms = now - 72 * 3_600_000;

        match self.broker.historical_minute_bars("AAPL", from_ms, now).await {
            Ok(mut bars) if !bars.is_empty() => {
                bars.sort_by_key(|b| b.s);
                let mut history: Vec<EnrichedMinuteBar> = Vec::with_capacity(bars.len());
                for b in &bars {
                    let (sma, ema, v_sma, v_ema) = compute_for_new_bar(&history, b);
                    history.push(EnrichedMinuteBar {
                        bar: *b,
                        sma,
                        ema,
                        v_sma,
                        v_ema,
                        cal_d: String::new(),
                        cal_t: String::new(),
                        intersection: None,
                        bought_at_price: None,
                        bought_at_ts: None,
                        sold_at_price: None,
                        sold_at_ts: None,
                    });
                }
                let window_start = history.len().saturating_sub(30);
                let total: f64 = history[window_start..].iter().map(|b| b.v_ema).sum();
                (total / self.config.volume_divisor).floor()
            }
            Ok(_) => 0.0,
            Err(e) => {
                warn!(error = %e, "historical volume fallback failed, eq1=0");
                0.0
            }
        }
    }

    /// §4.4.5 Cancel-On-Rally.
    pub(crate) async fn cancel_on_rally(&mut self, sym: &str, slot: &mut SymbolSlot, bar: &Bar) {
        if !self.config.with_cancel || !slot.holding() || slot.cancel_attempted {
            return;
        }
        let Some(requested_price) = slot.buy_command.as_ref().and_then(|b| b.requested_price) else {
            return;
        };
        if bar.h < requested_price + self.config.cancel_threshold {
            return;
        }
        let Some(order_ref) = slot.last_buy_order_ref.clone() else {
            return;
        };

        let current = self.broker.get_order(&order_ref.id).await.unwrap_or(order_ref);
        if current.is_filled() {
            return;
        }

        match self.broker.cancel_order(&current.id).await {
            Ok(()) => info!(symbol = sym, order_id = %current.id, "cancelled on rally"),
            Err(e) => warn!(error = %e, symbol = sym, "cancel-on-rally failed, treating as filled"),
        }
        slot.cancel_attempted = true;
    }

    /// §4.3's third-intersection transition arms the exit watcher. A no-op
    /// if nothing is currently held (the crossover machine runs regardless
    /// of position state; only the strategy layer cares whether there is
    /// anything to exit).
    pub(crate) fn arm_exit(&mut self, sym: &str, slot: &mut SymbolSlot, bar_e: i64) {
        if !slot.holding() {
            return;
        }
        slot.trying_sell_on_decrease = false;
        slot.selling_mode = Some(SellingMode::Normal);
        slot.trying_sell_ts = Some(bar_e);
        info!(symbol = sym, formula = %self.config.formula_variant, "exit armed on third intersection");
    }

    /// §4.4.4 Sell Intent and Exit policies, evaluated on each second bar.
    /// Returns `true` if the slot was purged (banned-on-loss) and must not
    /// be reinserted by the caller.
    pub(crate) async fn try_sell_trigger(&mut self, sym: &str, slot: &mut SymbolSlot, bar: &Bar) -> bool {
        if !slot.holding() {
            return false;
        }

        // F3's decrease watcher runs independently of `selling_mode`, armed
        // at buy-submission time and disarmed on firing or on `arm_exit`
        // (the normal third-intersection exit), so the two never race.
        if slot.trying_sell_on_decrease {
            if let Some(ts) = slot.trying_sell_ts {
                if bar.s > ts {
                    if let Some(last) = slot.bars.last().cloned() {
                        if last.bar.l > bar.l {
                            let px = round2(last.bar.l - 0.01);
                            slot.trying_sell_on_decrease = false;
                            return self.execute_sell(sym, slot, SellingMode::Decrease, px).await;
                        }
                    }
                }
            }
        }

        if slot.selling_mode != Some(SellingMode::Normal) {
            return false;
        }
        let Some(ts) = slot.trying_sell_ts else {
            return false;
        };
        if bar.s <= ts {
            return false;
        }

        match self.config.formula_variant {
            FormulaVariant::F1 | FormulaVariant::F3 => {
                slot.trying_sell_on_decrease = false;
                self.execute_sell(sym, slot, SellingMode::Normal, bar.o).await
            }
            FormulaVariant::F4 => {
                let Some(last) = slot.bars.last().cloned() else {
                    return false;
                };
                if last.bar.l > bar.l {
                    let px = round2(last.bar.l - 0.01);
                    self.execute_sell(sym, slot, SellingMode::Decrease, px).await
                } else {
                    false
                }
            }
        }
    }

    /// Excluded-time forced sell (§4.3, §4.4.4), checked on minute bars.
    /// Returns `true` if the slot was purged.
    pub(crate) async fn forced_sell(&mut self, sym: &str, slot: &mut SymbolSlot) -> bool {
        let Some(last) = slot.bars.last().cloned() else {
            return false;
        };
        self.execute_sell(sym, slot, SellingMode::Forced, round2(last.bar.l)).await
    }

    /// Unsubscribe-while-holding forced sell (§4.4.4). The slot is removed
    /// by the caller regardless of the outcome, so the purge return value is
    /// not consulted here.
    pub(crate) async fn blind_sell(&mut self, sym: &str, slot: &mut SymbolSlot) {
        let Some(last) = slot.bars.last().cloned() else {
            return;
        };
        self.execute_sell(sym, slot, SellingMode::Blind, round2(last.bar.l)).await;
    }

    /// Common sell submission path (§4.4.4): cancel the buy if it is not yet
    /// filled and no cancel has been attempted; otherwise submit a sell-limit
    /// at a flat `$0.01` limit for the filled quantity. Returns `true` if the
    /// sale completed and the slot was purged by a ban.
    async fn execute_sell(&mut self, sym: &str, slot: &mut SymbolSlot, mode: SellingMode, reference_price: f64) -> bool {
        slot.selling_mode = Some(mode);
        slot.sell_at_price = Some(reference_price);

        let Some(order_ref) = slot.last_buy_order_ref.clone() else {
            warn!(symbol = sym, "sell attempted with no buy order on record — aborting");
            return false;
        };

        if !order_ref.is_filled() && !slot.cancel_attempted {
            match self.broker.cancel_order(&order_ref.id).await {
                Ok(()) => info!(symbol = sym, order_id = %order_ref.id, "cancelled unfilled buy instead of selling"),
                Err(e) => warn!(error = %e, symbol = sym, "cancel failed, treating as filled (order likely filled)"),
            }
            slot.cancel_attempted = true;
            return false;
        }

        let qty = order_ref.filled_qty;
        if qty <= 0.0 {
            warn!(symbol = sym, "sell attempted with zero filled quantity — aborting");
            return false;
        }

        match self.broker.submit_sell_limit(sym, qty, 0.01).await {
            Ok(_sell_ref) => {
                info!(symbol = sym, mode = %mode, reference_price, "sell submitted");
                self.journal.write(self.config.formula_variant, "sell", sym, &slot.bars);
                self.finish_sale(sym, slot, reference_price)
            }
            Err(e) => {
                warn!(error = %e, symbol = sym, "sell submission failed — will retry on next qualifying tick");
                false
            }
        }
    }

    /// §4.5 Ban List application on loss. Returns `true` if the slot should
    /// be purged by the caller.
    fn finish_sale(&mut self, sym: &str, slot: &mut SymbolSlot, execution_price: f64) -> bool {
        let requested_price = slot.buy_command.as_ref().and_then(|b| b.requested_price).unwrap_or(execution_price);
        let loss = requested_price > execution_price;

        let mut purge = false;
        if loss && self.config.ban_mode {
            // The "lost money on" counter is written then immediately removed
            // (§9 quirk, retained): the ban takes effect on the first loss,
            // so `lost_count` never actually accumulates past one per symbol.
            *self.state.lost_count.entry(sym.to_string()).or_insert(0) += 1;
            self.state.lost_count.remove(sym);

            let now = slot.bars.last().map(|b| b.bar.e).unwrap_or_else(|| Utc::now().timestamp_millis());
            self.banned.apply_ban(sym, now, self.config.ban_duration_ms());
            purge = true;
            warn!(symbol = sym, requested_price, execution_price, "loss recorded — symbol banned");
        } else {
            info!(
                symbol = sym,
                requested_price,
                execution_price,
                outcome = if loss { "loss" } else { "profit" },
                "sale complete"
            );
        }

        if self.state.current_bought_symbol.as_deref() == Some(sym) {
            self.state.current_bought_symbol = None;
        }

        if !purge {
            slot.buy_command = None;
            slot.last_buy_order_ref = None;
            slot.cancel_attempted = false;
            slot.place_buy_at_ms = None;
            slot.trying_sell_ts = None;
            slot.sell_at_price = None;
            slot.selling_mode = None;
            slot.trying_sell_on_decrease = false;
        }

        purge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ban_list::BanList;
    use crate::clock::Clock;
    use crate::config::RuntimeConfig;
    use crate::engine::test_support::FakeBroker;
    use crate::engine::Engine;
    use crate::journal::JournalWriter;
    use crate::model::{Bar, IntersectionState};

    fn bar(s: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> Bar {
        Bar { s, e: s + 60_000, o, h, l, c, v }
    }

    fn sec(s: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { s, e: s + 1_000, o, h, l, c, v: 100.0 }
    }

    fn temp_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("crossbar-strategy-test-{}-{}", std::process::id(), name))
    }

    fn test_engine(name: &str, variant: FormulaVariant) -> Engine<FakeBroker> {
        let mut config = RuntimeConfig::default();
        config.formula_variant = variant;
        let dir = temp_dir(name);
        Engine::new(
            config,
            Clock::los_angeles(),
            FakeBroker::new(100_000.0),
            JournalWriter::new(&dir),
            BanList::load(dir.join("ban_list.json")),
        )
    }

    #[test]
    fn four_diff_ok_rejects_flat_bars() {
        let flat = bar(0, 10.0, 10.0, 10.0, 10.0, 10_000.0);
        assert!(!four_diff_ok(&flat));
    }

    #[test]
    fn four_diff_ok_accepts_wide_range_bar() {
        let wide = bar(0, 10.0, 10.5, 9.4, 10.2, 10_000.0);
        assert!(four_diff_ok(&wide));
    }

    #[test]
    fn is_worthy_requires_volume_and_majority() {
        let narrow = EnrichedMinuteBar {
            bar: bar(0, 10.0, 10.0, 10.0, 10.0, 10_000.0),
            sma: 10.0,
            ema: 10.0,
            v_sma: 10_000.0,
            v_ema: 10_000.0,
            cal_d: "2026-01-01".into(),
            cal_t: "10:00:00".into(),
            intersection: None,
            bought_at_price: None,
            bought_at_ts: None,
            sold_at_price: None,
            sold_at_ts: None,
        };
        assert!(!is_worthy(&[narrow]));

        let mut wide = narrow.clone();
        wide.bar = bar(0, 10.0, 10.5, 9.4, 10.2, 10_000.0);
        assert!(is_worthy(&[wide]));
    }

    #[test]
    fn is_worthy_false_on_low_volume() {
        let low_vol = EnrichedMinuteBar {
            bar: bar(0, 10.0, 10.5, 9.4, 10.2, 4_000.0),
            sma: 10.0,
            ema: 10.0,
            v_sma: 4_000.0,
            v_ema: 4_000.0,
            cal_d: "2026-01-01".into(),
            cal_t: "10:00:00".into(),
            intersection: None,
            bought_at_price: None,
            bought_at_ts: None,
            sold_at_price: None,
            sold_at_ts: None,
        };
        assert!(!is_worthy(&[low_vol]));
    }

    #[test]
    fn is_worthy_empty_bars_is_false() {
        assert!(!is_worthy(&[]));
    }

    /// §8 boundary: buyAt 0.71/370.49 accepted, 0.70/370.50 rejected.
    #[tokio::test]
    async fn buy_intent_respects_price_range_boundary() {
        let mut engine = test_engine("price-boundary", FormulaVariant::F1);
        let mut slot = SymbolSlot {
            intersection: IntersectionState {
                second_cal_t: Some("10:00:00".into()),
                highest_between_first_and_second: Some(0.69), // buy_at = 0.70, rejected
                ..Default::default()
            },
            ..Default::default()
        };
        engine.try_buy_intent("AAPL", &mut slot, "06:03:00", 60_000);
        assert!(slot.buy_command.is_none());

        slot.intersection.highest_between_first_and_second = Some(0.70); // buy_at = 0.71, accepted
        engine.try_buy_intent("AAPL", &mut slot, "06:03:00", 60_000);
        assert!(slot.buy_command.is_some());
        assert!((slot.buy_command.unwrap().buy_at - 0.71).abs() < 1e-9);
    }

    #[test]
    fn buy_intent_requires_allowed_trading_hour_boundary() {
        let mut engine = test_engine("hours-boundary", FormulaVariant::F1);
        let mut slot = SymbolSlot {
            intersection: IntersectionState {
                second_cal_t: Some("06:02:59".into()),
                highest_between_first_and_second: Some(10.0),
                ..Default::default()
            },
            ..Default::default()
        };
        engine.try_buy_intent("AAPL", &mut slot, "06:02:59", 60_000);
        assert!(slot.buy_command.is_none(), "06:02:59 is one second before the allowed window");

        slot.intersection.second_cal_t = Some("06:03:00".into());
        engine.try_buy_intent("AAPL", &mut slot, "06:03:00", 60_000);
        assert!(slot.buy_command.is_some());
    }

    /// §8 boundary: second bar `s` must be strictly greater than createdTs.
    #[tokio::test]
    async fn buy_trigger_rejects_equal_timestamp() {
        let mut engine = test_engine("ts-boundary", FormulaVariant::F1);
        let mut slot = SymbolSlot::default();
        slot.buy_command = Some(crate::model::BuyCommand {
            buy_at: 10.0,
            created_ts: 60_000,
            requested: false,
            requested_price: None,
        });
        slot.bars.push(EnrichedMinuteBar {
            bar: bar(0, 9.0, 10.5, 8.5, 9.8, 10_000.0),
            sma: 9.0,
            ema: 9.0,
            v_sma: 10_000.0,
            v_ema: 10_000.0,
            cal_d: "2026-01-01".into(),
            cal_t: "06:30:00".into(),
            intersection: None,
            bought_at_price: None,
            bought_at_ts: None,
            sold_at_price: None,
            sold_at_ts: None,
        });
        slot.bars.push(EnrichedMinuteBar {
            bar: bar(60_000, 10.0, 11.5, 9.5, 10.5, 10_000.0),
            sma: 10.0,
            ema: 10.5,
            v_sma: 10_000.0,
            v_ema: 10_500.0,
            cal_d: "2026-01-01".into(),
            cal_t: "06:31:00".into(),
            intersection: None,
            bought_at_price: None,
            bought_at_ts: None,
            sold_at_price: None,
            sold_at_ts: None,
        });

        let equal_ts_bar = sec(60_000, 10.0, 10.0, 10.0, 10.0);
        engine.try_buy_trigger("AAPL", &mut slot, &equal_ts_bar).await;
        assert!(!slot.holding(), "equal timestamp must not trigger the buy");
    }
}
