use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::parcel::TrackingNumber;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FeedParams {
    #[serde(default)]
    pub tracking_number: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedParams>,
) -> Result<impl IntoResponse, AppError> {
    let filter = match params.tracking_number.as_deref() {
        Some(raw) => Some(
            TrackingNumber::parse(raw)
                .ok_or_else(|| AppError::NotFound("parcel not found".to_string()))?,
        ),
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, filter)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: Option<TrackingNumber>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = BroadcastStream::new(state.tracking_updates_tx.subscribe());

    info!(tracking_number = ?filter, "live feed client connected");

    let send_task = tokio::spawn(async move {
        while let Some(item) = updates.next().await {
            let update = match item {
                Ok(update) => update,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, "live feed client lagging; updates skipped");
                    continue;
                }
            };

            if filter
                .as_ref()
                .is_some_and(|wanted| *wanted != update.tracking_number)
            {
                continue;
            }

            let json = match serde_json::to_string(&update) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize tracking update for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("live feed client disconnected");
}
