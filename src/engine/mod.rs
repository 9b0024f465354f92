pub mod dispatcher;
pub mod ingestion;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod tracking;

use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::parcel::{ApprovalStatus, Parcel};
use crate::models::records::TrackingUpdate;
use crate::state::AppState;
use crate::store::{CommitOutcome, ParcelCommit, StoreError, Versioned};

/// Reads the parcel, lets `plan` turn it into a commit, and writes it with a
/// compare-and-set on the version that was read. When another writer wins
/// the race the parcel is re-read and `plan` runs again on the fresh state,
/// so every guard inside `plan` sees the state it is actually writing over.
pub(crate) async fn commit_with_retry<F>(
    state: &AppState,
    parcel_id: Uuid,
    mut plan: F,
) -> Result<CommitOutcome, AppError>
where
    F: FnMut(Versioned<Parcel>) -> Result<ParcelCommit, AppError> + Send,
{
    let attempts = state.settings.commit_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let current = state
            .store
            .parcel(parcel_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("parcel {parcel_id} not found")))?;

        let commit = plan(current)?;

        match state.store.commit_parcel(commit).await {
            Ok(outcome) => return Ok(outcome),
            Err(StoreError::VersionConflict { .. }) if attempt < attempts => {
                debug!(parcel_id = %parcel_id, attempt, "parcel changed underneath; retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Broadcasts a committed change to live-feed subscribers. Unapproved
/// parcels are never published.
pub(crate) fn publish_update(state: &AppState, outcome: &CommitOutcome) {
    let parcel = &outcome.parcel.record;
    if parcel.approval_status != ApprovalStatus::Approved {
        return;
    }

    let update = TrackingUpdate {
        tracking_number: parcel.tracking_number.clone(),
        status: parcel.status,
        event: outcome.event.clone(),
        current_location: parcel.current_location,
    };

    let _ = state.tracking_updates_tx.send(update);
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::config::CoreSettings;
    use crate::external::notifier::Notification;
    use crate::models::driver::{DEFAULT_TRACKING_INTERVAL_SECS, Driver};
    use crate::models::identity::{Capability, Identity};
    use crate::state::{AppState, Collaborators};

    pub fn state() -> (AppState, mpsc::Receiver<Notification>) {
        AppState::new(Collaborators::default(), CoreSettings::default(), 64, 64)
    }

    pub fn state_with(collaborators: Collaborators) -> (AppState, mpsc::Receiver<Notification>) {
        AppState::new(collaborators, CoreSettings::default(), 64, 64)
    }

    pub fn approver() -> Identity {
        Identity::new("approver-1").with_capability(Capability::ApproveParcel)
    }

    pub fn staff() -> Identity {
        Identity::staff("ops-1")
    }

    pub fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            out.push(notification);
        }
        out
    }

    pub async fn driver(state: &AppState, user_id: &str) -> Driver {
        let driver = Driver {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            phone_number: "+255700000001".to_string(),
            license_number: None,
            vehicle_registration: None,
            is_available: true,
            is_online: false,
            current_location: None,
            last_location_update: None,
            tracking_interval: DEFAULT_TRACKING_INTERVAL_SECS,
            device_token: None,
            battery_level: None,
            accuracy: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.store.insert_driver(driver).await.unwrap()
    }
}
