// =============================================================================
// Engine — process-wide state and event dispatch
// =============================================================================
//
// Owns everything named in the data model's `EngineState` (§3) plus the
// collaborators each event handler needs: the clock, the broker gateway, the
// ban list, and the journal writer. Runs single-threaded: `dispatch` is called
// once per `FeedEvent` from the engine's own task, so nothing here needs
// interior mutability or locking (§5).
//
// The buy/sell decision logic itself lives in `strategy.rs` as an `impl
// Engine` block; this module owns state and routes each event kind to the
// right handler.
// =============================================================================

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::ban_list::BanList;
use crate::broker::Broker;
use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::feed::FeedEvent;
use crate::indicators::moving_average::compute_for_new_bar;
use crate::journal::JournalWriter;
use crate::model::{Bar, EnrichedMinuteBar, SymbolSlot};

/// Channel name the minute-aggregate subscription lifecycle is keyed on.
/// Second-aggregate ("A") subscribe/unsubscribe status messages carry no
/// lifecycle meaning for this engine — a symbol's slot lives and dies with
/// its AM subscription.
const MINUTE_CHANNEL: &str = "AM";

/// Process-wide engine state (§3 `EngineState`).
#[derive(Default)]
pub struct EngineState {
    pub slots: HashMap<String, SymbolSlot>,
    pub current_bought_symbol: Option<String>,
    pub lost_count: HashMap<String, u32>,
}

impl EngineState {
    /// Invariant check (§3): at most one symbol has an outstanding buy.
    #[cfg(test)]
    pub fn at_most_one_outstanding_buy(&self) -> bool {
        let holding_count = self
            .slots
            .values()
            .filter(|s| s.buy_command.as_ref().is_some_and(|b| b.requested))
            .count();
        holding_count <= 1
    }
}

pub struct Engine<B: Broker> {
    pub config: RuntimeConfig,
    pub clock: Clock,
    pub broker: B,
    pub journal: JournalWriter,
    pub banned: BanList,
    pub state: EngineState,
}

impl<B: Broker> Engine<B> {
    pub fn new(config: RuntimeConfig, clock: Clock, broker: B, journal: JournalWriter, banned: BanList) -> Self {
        Self {
            config,
            clock,
            broker,
            journal,
            banned,
            state: EngineState::default(),
        }
    }

    /// Read-only snapshot for the status HTTP surface (§10.4). Cheap enough
    /// to call after every dispatched event.
    pub fn snapshot(&self) -> crate::status::EngineSnapshot {
        let slots = self
            .state
            .slots
            .iter()
            .map(|(symbol, slot)| crate::status::SlotSnapshot {
                symbol: symbol.clone(),
                bars_seen: slot.bars.len(),
                holding: slot.holding(),
                selling_mode: slot.selling_mode.map(|m| m.to_string()),
                last_close: slot.last_bar().map(|b| b.bar.c),
            })
            .collect();

        crate::status::EngineSnapshot {
            formula_variant: self.config.formula_variant.to_string(),
            current_bought_symbol: self.state.current_bought_symbol.clone(),
            banned_symbol_count: self.banned.len(),
            slots,
        }
    }

    pub async fn dispatch(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Subscribed { channel, sym } => self.on_subscribed(&channel, &sym),
            FeedEvent::Unsubscribed { channel, sym } => self.on_unsubscribed(&channel, &sym).await,
            FeedEvent::MinuteBar { sym, bar } => self.on_minute_bar(&sym, bar).await,
            FeedEvent::SecondBar { sym, bar } => self.on_second_bar(&sym, bar).await,
        }
    }

    fn on_subscribed(&mut self, channel: &str, sym: &str) {
        if channel != MINUTE_CHANNEL {
            return;
        }
        let now = Utc::now().timestamp_millis();
        if !self.banned.check_on_subscribe(sym, now) {
            debug!(symbol = sym, "subscription dropped: symbol currently banned");
            return;
        }
        self.state.slots.entry(sym.to_string()).or_insert_with(SymbolSlot::default);
        info!(symbol = sym, "slot created on subscription");
    }

    async fn on_unsubscribed(&mut self, channel: &str, sym: &str) {
        if channel != MINUTE_CHANNEL {
            return;
        }
        let Some(mut slot) = self.state.slots.remove(sym) else {
            return;
        };

        if slot.holding() {
            info!(symbol = sym, "unsubscribe while holding — attempting blind sell");
            self.blind_sell(sym, &mut slot).await;
        }

        self.journal.write(self.config.formula_variant, "final", sym, &slot.bars);
        if self.state.current_bought_symbol.as_deref() == Some(sym) {
            self.state.current_bought_symbol = None;
        }
        info!(symbol = sym, "slot removed on unsubscription");
    }

    async fn on_minute_bar(&mut self, sym: &str, bar: Bar) {
        let Some(mut slot) = self.state.slots.remove(sym) else {
            debug!(symbol = sym, "minute bar dropped: no active slot");
            return;
        };

        let (cal_d, cal_t) = self.clock.to_cal(bar.e);
        let (sma, ema, v_sma, v_ema) = compute_for_new_bar(&slot.bars, &bar);
        let idx = slot.bars.len();
        let is_excluded = self.clock.is_excluded(&cal_t);

        let outcome = crate::crossover::on_minute_bar(&mut slot.intersection, idx, &bar, sma, ema, &cal_t, is_excluded);

        let enriched = EnrichedMinuteBar {
            bar,
            sma,
            ema,
            v_sma,
            v_ema,
            cal_d,
            cal_t: cal_t.clone(),
            intersection: outcome.tag,
            bought_at_price: None,
            bought_at_ts: None,
            sold_at_price: None,
            sold_at_ts: None,
        };
        slot.bars.push(enriched);

        debug!(symbol = sym, idx, sma, ema, tag = ?outcome.tag, "minute bar enriched");

        let bar_e = bar.e;

        if outcome.buy_intent_eligible {
            self.try_buy_intent(sym, &mut slot, &cal_t, bar_e);
        }

        if outcome.third_intersection {
            self.arm_exit(sym, &mut slot, bar_e);
        }

        let mut purged = false;
        if outcome.forced_sell_candidate && slot.holding() {
            info!(symbol = sym, "excluded time entered while holding — forced sell");
            purged = self.forced_sell(sym, &mut slot).await;
        }

        if !purged {
            self.state.slots.insert(sym.to_string(), slot);
        }
    }

    async fn on_second_bar(&mut self, sym: &str, bar: Bar) {
        let Some(mut slot) = self.state.slots.remove(sym) else {
            return;
        };

        self.cancel_on_rally(sym, &mut slot, &bar).await;
        self.try_buy_trigger(sym, &mut slot, &bar).await;
        let purged = self.try_sell_trigger(sym, &mut slot, &bar).await;

        if !purged {
            self.state.slots.insert(sym.to_string(), slot);
        }
    }
}
