use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::CoreSettings;
use crate::external::geocoder::{Geocoder, NullGeocoder};
use crate::external::identity::{IdentityProvider, StaticTokenProvider};
use crate::external::notifier::Notification;
use crate::models::records::TrackingUpdate;
use crate::observability::metrics::Metrics;
use crate::store::{InMemoryStore, RecordStore};

/// Adapters plugged into the core at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub geocoder: Arc<dyn Geocoder>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            identity: Arc::new(StaticTokenProvider::new()),
            geocoder: Arc::new(NullGeocoder),
        }
    }
}

pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub geocoder: Arc<dyn Geocoder>,
    pub notification_tx: mpsc::Sender<Notification>,
    pub tracking_updates_tx: broadcast::Sender<TrackingUpdate>,
    pub metrics: Metrics,
    pub settings: CoreSettings,
}

impl AppState {
    pub fn new(
        collaborators: Collaborators,
        settings: CoreSettings,
        notification_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let (notification_tx, notification_rx) = mpsc::channel(notification_queue_size);
        let (tracking_updates_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                store: collaborators.store,
                identity: collaborators.identity,
                geocoder: collaborators.geocoder,
                notification_tx,
                tracking_updates_tx,
                metrics: Metrics::new(),
                settings,
            },
            notification_rx,
        )
    }
}
