//! Health endpoints for the Player Controller.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we admit new sessions?)
//!
//! # Health State
//!
//! - `live`: always true after startup
//! - `ready`: set once the signaling listener is bound, cleared on shutdown
//!
//! Readiness additionally requires every media node's control channel to be up.
//! The body reports how many nodes are connected.

use crate::scheduler::NodePool;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct HealthContext {
    state: Arc<HealthState>,
    pool: Arc<NodePool>,
}

/// Create the health router.
///
/// - `GET /health` - 200 while the process runs
/// - `GET /ready` - 200 when ready and every node is connected, 503 otherwise
pub fn health_router(health_state: Arc<HealthState>, pool: Arc<NodePool>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(HealthContext {
            state: health_state,
            pool,
        })
}

async fn liveness_handler(State(ctx): State<HealthContext>) -> StatusCode {
    if ctx.state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(ctx): State<HealthContext>) -> (StatusCode, Json<Value>) {
    let total = ctx.pool.len();
    let connected = ctx
        .pool
        .nodes()
        .filter(|node| node.engine().is_connected())
        .count();

    let ready = ctx.state.is_ready() && total > 0 && connected == total;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "ready": ready,
            "nodes": total,
            "nodes_connected": connected,
        })),
    )
}
