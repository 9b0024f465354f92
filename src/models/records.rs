//! Append-only records hanging off a parcel.
//!
//! The store assigns `sequence` on append; it breaks timestamp ties so that
//! ordering is stable regardless of arrival order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;
use crate::models::parcel::{ParcelStatus, TrackingNumber};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub parcel_id: Uuid,
    pub tracking_number: TrackingNumber,
    pub status: String,
    pub description: String,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub created_by: Option<String>,
}

impl TrackingEvent {
    pub fn new(
        parcel_id: Uuid,
        tracking_number: TrackingNumber,
        status: impl Into<String>,
        description: impl Into<String>,
        created_by: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parcel_id,
            tracking_number,
            status: status.into(),
            description: description.into(),
            location: None,
            timestamp: Utc::now(),
            sequence: 0,
            created_by,
        }
    }

    pub fn at_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Approved,
    Rejected,
    RequestedChanges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalLog {
    pub id: Uuid,
    pub parcel_id: Uuid,
    pub action: ApprovalAction,
    pub performed_by: String,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationHistory {
    pub id: Uuid,
    pub parcel_id: Uuid,
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub address: String,
    pub status: ParcelStatus,
    pub tracking_session: Option<Uuid>,
    pub sequence: u64,
}

/// Newest first: later timestamp wins, then later insertion.
pub fn newest_first(
    a_ts: &DateTime<Utc>,
    a_seq: u64,
    b_ts: &DateTime<Utc>,
    b_seq: u64,
) -> Ordering {
    b_ts.cmp(a_ts).then(b_seq.cmp(&a_seq))
}

/// Pushed to live-feed subscribers after a publicly visible event commits.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingUpdate {
    pub tracking_number: TrackingNumber,
    pub status: ParcelStatus,
    pub event: Option<TrackingEvent>,
    pub current_location: Option<GeoPoint>,
}
