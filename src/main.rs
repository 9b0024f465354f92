use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use parcel_tracker::api;
use parcel_tracker::config::{Config, LogFormat};
use parcel_tracker::engine::dispatcher::run_notification_dispatcher;
use parcel_tracker::error::AppError;
use parcel_tracker::external::geocoder::{Geocoder, NominatimGeocoder, NullGeocoder};
use parcel_tracker::external::identity::StaticTokenProvider;
use parcel_tracker::external::notifier::{LogNotifier, Notifier, WebhookNotifier};
use parcel_tracker::models::service::Service;
use parcel_tracker::state::{AppState, Collaborators};
use parcel_tracker::store::{InMemoryStore, RecordStore};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let store = Arc::new(InMemoryStore::new());
    seed_services(store.as_ref()).await?;

    let identity = StaticTokenProvider::from_entries(config.token_entries()?);
    tracing::info!(tokens = identity.len(), "identity provider loaded");

    let geocoder: Arc<dyn Geocoder> = match &config.geocoder_url {
        Some(url) => Arc::new(NominatimGeocoder::new(url, config.core.geocoder_timeout)),
        None => Arc::new(NullGeocoder),
    };
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url, config.core.notifier_timeout)),
        None => Arc::new(LogNotifier),
    };

    let collaborators = Collaborators {
        store,
        identity: Arc::new(identity),
        geocoder,
    };
    let (app_state, notification_rx) = AppState::new(
        collaborators,
        config.core.clone(),
        config.notification_queue_size,
        config.event_buffer_size,
    );
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_notification_dispatcher(
        shared_state.clone(),
        notifier,
        notification_rx,
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn seed_services(store: &dyn RecordStore) -> Result<(), AppError> {
    for (name, description, days) in [
        ("Standard", "Door-to-door road delivery", 3),
        ("Express", "Next-day priority delivery", 1),
    ] {
        store
            .insert_service(Service {
                id: Uuid::new_v4(),
                name: name.to_string(),
                description: description.to_string(),
                estimated_delivery_days: days,
                is_active: true,
            })
            .await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
