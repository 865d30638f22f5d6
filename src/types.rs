// =============================================================================
// Shared types used across the crossbar trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Which of the three exit-policy variants a running engine instance uses.
///
/// F1/F3/F4 share the indicator engine and crossover state machine verbatim;
/// they differ only in how (and whether) an early "sell on decrease" exit is
/// armed alongside the normal third-intersection exit. See `strategy::formula`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormulaVariant {
    F1,
    F3,
    F4,
}

impl Default for FormulaVariant {
    fn default() -> Self {
        Self::F1
    }
}

impl std::fmt::Display for FormulaVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::F1 => write!(f, "F1"),
            Self::F3 => write!(f, "F3"),
            Self::F4 => write!(f, "F4"),
        }
    }
}

/// The market session a timestamp falls into, used to select order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSession {
    PreMarket,
    Normal,
    AfterMarket,
}

impl std::fmt::Display for MarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreMarket => write!(f, "pre-market"),
            Self::Normal => write!(f, "normal"),
            Self::AfterMarket => write!(f, "after-market"),
        }
    }
}

/// Why a sell was triggered; determines the reference price used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellingMode {
    /// Third-intersection exit, armed one second and fired the next.
    Normal,
    /// Excluded-time window entered while holding a position.
    Forced,
    /// Unsubscribe received while holding a position.
    Blind,
    /// F3/F4: price fell below the prior minute bar's low.
    Decrease,
}

impl std::fmt::Display for SellingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Forced => write!(f, "forced"),
            Self::Blind => write!(f, "blind"),
            Self::Decrease => write!(f, "decrease"),
        }
    }
}
