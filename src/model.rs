// =============================================================================
// Core data model — Bar, EnrichedMinuteBar, SymbolSlot, and friends
// =============================================================================
//
// These types are pure data: no I/O, no locking. The engine (`engine.rs`) owns
// a `HashMap<String, SymbolSlot>` and mutates it on a single task; nothing here
// needs `Sync`.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::SellingMode;

/// A single OHLCV aggregate bar — minute or second resolution, distinguished
/// only by the span between `s` and `e`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Start of the bar, epoch milliseconds.
    pub s: i64,
    /// End of the bar, epoch milliseconds.
    pub e: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

/// An intersection tag written onto a minute bar by the crossover state
/// machine. There is no `third` variant: the third intersection re-enters
/// `first` and is tagged accordingly (see `crossover.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntersectionTag {
    Pre,
    First,
    Second,
}

/// A minute bar enriched with the indicators and calendar fields the strategy
/// core reads. Appended once per incoming minute bar and never mutated
/// afterward except to add the optional trade-outcome tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedMinuteBar {
    #[serde(flatten)]
    pub bar: Bar,
    pub sma: f64,
    pub ema: f64,
    pub v_sma: f64,
    pub v_ema: f64,
    /// ISO date in the configured zone, e.g. "2026-07-28".
    pub cal_d: String,
    /// Wall-clock time in the configured zone, "HH:MM:SS".
    pub cal_t: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intersection: Option<IntersectionTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bought_at_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bought_at_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_at_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_at_ts: Option<i64>,
}

/// Running state of the SMA/EMA crossover detector for one symbol.
///
/// Only three states exist after initialization (`pre`, `first`, `second`):
/// the "third intersection" is a transition back into `first` with
/// `secondFound` cleared, not a fourth state.
#[derive(Debug, Clone, Default)]
pub struct IntersectionState {
    pub pre_point_found: bool,
    pub first_found: bool,
    pub second_found: bool,
    pub second_cal_t: Option<String>,
    pub highest_between_first_and_second: Option<f64>,
    pub first_index: Option<usize>,
    pub second_index: Option<usize>,
}

/// A pending or fulfilled buy decision for one symbol.
#[derive(Debug, Clone)]
pub struct BuyCommand {
    pub buy_at: f64,
    pub created_ts: i64,
    pub requested: bool,
    pub requested_price: Option<f64>,
}

/// A broker order reference, as returned by every Broker Gateway submission
/// and lookup call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRef {
    pub id: String,
    pub status: String,
    pub requested_qty: f64,
    pub filled_qty: f64,
}

impl OrderRef {
    pub fn is_filled(&self) -> bool {
        self.status == "filled" || self.status == "partially_filled"
    }
}

/// All per-symbol state the engine tracks between events.
#[derive(Debug, Clone, Default)]
pub struct SymbolSlot {
    pub bars: Vec<EnrichedMinuteBar>,
    pub intersection: IntersectionState,
    pub buy_command: Option<BuyCommand>,
    pub last_buy_order_ref: Option<OrderRef>,
    pub cancel_attempted: bool,
    pub place_buy_at_ms: Option<i64>,
    pub trying_sell_ts: Option<i64>,
    pub sell_at_price: Option<f64>,
    pub selling_mode: Option<SellingMode>,
    /// F3 only: armed at buy-request time, disarmed on any exit. F4 needs no
    /// equivalent flag — its decrease check lives inline in the ordinary
    /// sell-trying branch (see `strategy::formula`).
    pub trying_sell_on_decrease: bool,
}

impl SymbolSlot {
    pub fn last_bar(&self) -> Option<&EnrichedMinuteBar> {
        self.bars.last()
    }

    pub fn holding(&self) -> bool {
        self.buy_command.as_ref().is_some_and(|b| b.requested)
    }
}
