use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::api::rest::auth::Caller;
use crate::engine::ingestion::{self, DriverStatusReceipt, DriverStatusRequest, IngestReceipt, LocationFix};
use crate::engine::registry::{self, OnboardDriverRequest};
use crate::engine::tracking::{self, DriverPosition, DriverState};
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::parcel::Parcel;
use crate::models::records::LocationHistory;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(onboard))
        .route("/driver/gps/tracking", post(push_fix))
        .route("/driver/gps/status", post(set_status))
        .route("/driver/status", get(driver_state))
        .route("/driver/parcels", get(driver_parcels))
        .route("/driver/location", get(own_location))
        .route("/driver/location/:driver_id", get(driver_location))
        .route("/driver/location/history/:driver_id", get(location_history))
}

async fn onboard(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(payload): Json<OnboardDriverRequest>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    let driver = registry::onboard_driver(&state, &caller, payload).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

async fn push_fix(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(payload): Json<LocationFix>,
) -> Result<Json<IngestReceipt>, AppError> {
    Ok(Json(ingestion::ingest(&state, &caller, payload).await?))
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(payload): Json<DriverStatusRequest>,
) -> Result<Json<DriverStatusReceipt>, AppError> {
    Ok(Json(ingestion::set_status(&state, &caller, payload).await?))
}

async fn driver_state(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<DriverState>, AppError> {
    Ok(Json(tracking::driver_state(&state, &caller).await?))
}

async fn driver_parcels(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<Vec<Parcel>>, AppError> {
    Ok(Json(tracking::driver_parcels(&state, &caller).await?))
}

async fn location_history(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(driver_id): Path<Uuid>,
) -> Result<Json<Vec<LocationHistory>>, AppError> {
    Ok(Json(
        tracking::driver_location_history(&state, &caller, driver_id).await?,
    ))
}

async fn own_location(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<DriverPosition>, AppError> {
    Ok(Json(tracking::driver_location(&state, &caller, None).await?))
}

async fn driver_location(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(driver_id): Path<Uuid>,
) -> Result<Json<DriverPosition>, AppError> {
    Ok(Json(
        tracking::driver_location(&state, &caller, Some(driver_id)).await?,
    ))
}
