use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::Json;
use axum::Router;

use crate::engine::tracking::{self, TimelineView, TrackingView};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/track/:tracking_number", get(track))
        .route("/tracking/:tracking_number/history", get(history))
}

async fn track(
    State(state): State<Arc<AppState>>,
    Path(tracking_number): Path<String>,
) -> Result<Json<TrackingView>, AppError> {
    Ok(Json(tracking::lookup(&state, &tracking_number).await?))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(tracking_number): Path<String>,
) -> Result<Json<TimelineView>, AppError> {
    Ok(Json(tracking::history(&state, &tracking_number).await?))
}
