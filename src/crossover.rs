// =============================================================================
// Crossover State Machine
// =============================================================================
//
// Classifies each new minute bar as a pre-point, first, second, or "third"
// intersection of the SMA/EMA pair. There are only three states after
// initialization — the third intersection re-enters `first` rather than
// introducing a fourth state, and is tagged `first` on the bar for journal
// compatibility with the second-intersection path it resembles.
// =============================================================================

use crate::model::{Bar, IntersectionState, IntersectionTag};

/// What a single minute-bar evaluation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossoverOutcome {
    pub tag: Option<IntersectionTag>,
    /// Second-intersection bar: the strategy core should evaluate Buy Intent.
    pub buy_intent_eligible: bool,
    /// Re-entry into `first` from `second`: closes any open position.
    pub third_intersection: bool,
    /// In `second` with no re-crossing, but the bar's `cal_t` is excluded:
    /// candidate for a forced sell if a position is currently open.
    pub forced_sell_candidate: bool,
}

/// Evaluate one newly-indicator-enriched minute bar against `state`, mutating
/// it in place. Must be called after SMA/EMA for this bar are already written.
pub fn on_minute_bar(
    state: &mut IntersectionState,
    bar_index: usize,
    bar: &Bar,
    sma: f64,
    ema: f64,
    cal_t: &str,
    is_excluded: bool,
) -> CrossoverOutcome {
    let mut outcome = CrossoverOutcome::default();

    if !state.pre_point_found {
        if ema > sma {
            state.pre_point_found = true;
            outcome.tag = Some(IntersectionTag::Pre);
        }
        return outcome;
    }

    if !state.first_found && !state.second_found {
        if sma > ema {
            state.first_found = true;
            state.highest_between_first_and_second = Some(bar.h);
            outcome.tag = Some(IntersectionTag::First);
        }
        return outcome;
    }

    if state.first_found && !state.second_found {
        if ema > sma {
            state.second_found = true;
            state.second_cal_t = Some(cal_t.to_string());
            state.second_index = Some(bar_index);
            outcome.tag = Some(IntersectionTag::Second);
            outcome.buy_intent_eligible = true;
        } else {
            let highest = state.highest_between_first_and_second.unwrap_or(bar.h);
            if bar.h > highest {
                state.highest_between_first_and_second = Some(bar.h);
            }
        }
        return outcome;
    }

    // state.second_found == true
    if sma > ema {
        state.first_found = true;
        state.second_found = false;
        state.highest_between_first_and_second = Some(bar.h);
        outcome.tag = Some(IntersectionTag::First);
        outcome.third_intersection = true;
    } else if is_excluded {
        outcome.forced_sell_candidate = true;
    }

    outcome
}
