use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use axum::Router;

use crate::api::rest::auth::Caller;
use crate::engine::registry::{self, CreateServiceRequest};
use crate::error::AppError;
use crate::models::service::Service;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/services", get(list_services).post(create_service))
}

async fn list_services(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Service>>, AppError> {
    Ok(Json(registry::list_services(&state).await?))
}

async fn create_service(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(payload): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    let service = registry::create_service(&state, &caller, payload).await?;
    Ok((StatusCode::CREATED, Json(service)))
}
