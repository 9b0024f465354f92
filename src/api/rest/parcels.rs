use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::auth::{Caller, OptionalCaller};
use crate::engine::{lifecycle, tracking};
use crate::error::AppError;
use crate::models::parcel::{Parcel, ParcelStatus};
use crate::models::records::ApprovalLog;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/book", post(book))
        .route("/parcels", get(list_parcels))
        .route("/approvals/pending", get(pending_approvals))
        .route("/parcels/:id/approve", post(decide))
        .route("/parcels/:id/approvals", get(approval_trail))
        .route("/parcels/:id/assign", post(assign_driver))
        .route("/parcels/:id/status", post(advance))
        .route("/parcels/:id/deliver", post(complete))
        .route("/parcels/:id/cancel", post(cancel))
        .route("/statistics", get(statistics))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    #[serde(default, alias = "assigned_driver_id")]
    pub driver_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub status: ParcelStatus,
}

#[derive(Deserialize, Default)]
pub struct CompleteRequest {
    #[serde(default)]
    pub delivery_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

async fn book(
    State(state): State<Arc<AppState>>,
    OptionalCaller(caller): OptionalCaller,
    Json(payload): Json<lifecycle::SubmitRequest>,
) -> Result<(StatusCode, Json<Parcel>), AppError> {
    let parcel = lifecycle::submit(&state, caller.as_ref(), payload).await?;
    Ok((StatusCode::CREATED, Json(parcel)))
}

async fn list_parcels(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<Vec<Parcel>>, AppError> {
    Ok(Json(tracking::list_parcels(&state, &caller).await?))
}

async fn pending_approvals(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<Vec<Parcel>>, AppError> {
    Ok(Json(tracking::pending_approvals(&state, &caller).await?))
}

async fn decide(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<lifecycle::DecisionRequest>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(lifecycle::decide(&state, &caller, id, payload).await?))
}

async fn approval_trail(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ApprovalLog>>, AppError> {
    Ok(Json(tracking::approval_trail(&state, &caller, id).await?))
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(
        lifecycle::assign_driver(&state, &caller, id, payload.driver_id).await?,
    ))
}

async fn advance(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(
        lifecycle::advance(&state, &caller, id, payload.status).await?,
    ))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    payload: Option<Json<CompleteRequest>>,
) -> Result<Json<Parcel>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    Ok(Json(
        lifecycle::complete(&state, &caller, id, payload.delivery_time).await?,
    ))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<Parcel>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    Ok(Json(lifecycle::cancel(&state, &caller, id, payload.reason).await?))
}

async fn statistics(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<tracking::Statistics>, AppError> {
    Ok(Json(tracking::statistics(&state, &caller).await?))
}
