//! Notification intake.
//!
//! - POST /events -> apply a notification batch, respond with the batch report

use crate::{
    errors::AppError,
    models::{event::NotificationBatch, report::BatchReport},
    state::AppState,
};
use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use tracing::{info, warn};

/// `POST /events`
///
/// Responds 200 with the report when every record either succeeded or failed
/// for good, and 500 when at least one record is worth redelivering.
pub async fn handle_events(
    State(state): State<AppState>,
    payload: Result<Json<NotificationBatch>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchReport>), AppError> {
    let Json(batch) = payload?;
    let events = batch.into_events();
    info!("Received batch of {} records", events.len());

    let report = state.dispatcher.dispatch(events).await;

    let status = if report.has_retryable_failure() {
        warn!("Batch has retryable failures; asking for redelivery");
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}
