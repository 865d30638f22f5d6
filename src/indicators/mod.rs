// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators used
// by the trading engine.

pub mod moving_average;

pub use moving_average::{ema_step, round2, sma_window};
