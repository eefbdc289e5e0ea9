//! HTTP surface of the thumbnailer.
//!
//! - `POST /events` applies a storage notification batch
//! - `GET /healthz` is liveness
//! - `GET /readyz` is readiness (scratch directory check)

use crate::{
    handlers::{
        event_handlers::handle_events,
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. The caller supplies the state with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/events", post(handle_events))
}
