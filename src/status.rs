// =============================================================================
// Status surface — minimal read-only HTTP health/snapshot endpoints
// =============================================================================
//
// Intentionally thin (§10.4): one liveness probe, one read-only engine
// snapshot. No control-plane mutation endpoints, no authentication layer —
// this is an operator dashboard backend, not a remote-control surface.
// =============================================================================

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::types::FormulaVariant;

/// A read-only snapshot of one symbol's slot, refreshed by the engine after
/// every dispatched event.
#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub symbol: String,
    pub bars_seen: usize,
    pub holding: bool,
    pub selling_mode: Option<String>,
    pub last_close: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub formula_variant: String,
    pub current_bought_symbol: Option<String>,
    pub banned_symbol_count: usize,
    pub slots: Vec<SlotSnapshot>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            formula_variant: FormulaVariant::default().to_string(),
            current_bought_symbol: None,
            banned_symbol_count: 0,
            slots: Vec::new(),
        }
    }
}

/// Shared handle the engine loop publishes snapshots into and the HTTP
/// server reads from. A `RwLock` rather than a channel: readers just want
/// the latest value, not a history of every change.
pub type SharedSnapshot = Arc<RwLock<EngineSnapshot>>;

pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(RwLock::new(EngineSnapshot::default()))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn snapshot(State(shared): State<SharedSnapshot>) -> Json<EngineSnapshot> {
    Json(shared.read().clone())
}

pub fn router(shared: SharedSnapshot) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/snapshot", get(snapshot))
        .layer(CorsLayer::permissive())
        .with_state(shared)
}
