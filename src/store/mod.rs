//! Record store port.
//!
//! The engines only talk to storage through [`RecordStore`]. Parcel writes go
//! through [`RecordStore::commit_parcel`], a compare-and-set on the parcel's
//! version that also appends the audit records produced by the transition,
//! so a state change and its log entries land together or not at all.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::driver::{Driver, DriverPatch, TrackingSession};
use crate::models::parcel::{ApprovalStatus, Parcel, ParcelStatus, TrackingNumber};
use crate::models::records::{ApprovalLog, LocationHistory, TrackingEvent};
use crate::models::service::Service;

pub use memory::InMemoryStore;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("version conflict on {record}: expected {expected}, found {actual}")]
    VersionConflict {
        record: String,
        expected: u64,
        actual: u64,
    },

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

/// One atomic parcel write: the new parcel state plus whatever append-only
/// records the transition produced.
#[derive(Debug, Clone)]
pub struct ParcelCommit {
    pub parcel: Parcel,
    pub expected_version: u64,
    pub event: Option<TrackingEvent>,
    pub approval_log: Option<ApprovalLog>,
    pub location: Option<LocationHistory>,
}

impl ParcelCommit {
    pub fn new(parcel: Parcel, expected_version: u64) -> Self {
        Self {
            parcel,
            expected_version,
            event: None,
            approval_log: None,
            location: None,
        }
    }

    pub fn with_event(mut self, event: TrackingEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_approval_log(mut self, log: ApprovalLog) -> Self {
        self.approval_log = Some(log);
        self
    }

    pub fn with_location(mut self, location: LocationHistory) -> Self {
        self.location = Some(location);
        self
    }
}

/// What a commit stored, with store-assigned sequences filled in.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub parcel: Versioned<Parcel>,
    pub event: Option<TrackingEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct ParcelFilter {
    pub approval_status: Option<ApprovalStatus>,
    pub statuses: Option<Vec<ParcelStatus>>,
    pub assigned_driver: Option<Uuid>,
    pub party_email: Option<String>,
}

impl ParcelFilter {
    pub fn matches(&self, parcel: &Parcel) -> bool {
        self.approval_status
            .is_none_or(|status| parcel.approval_status == status)
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&parcel.status))
            && self
                .assigned_driver
                .is_none_or(|driver| parcel.assigned_driver == Some(driver))
            && self
                .party_email
                .as_deref()
                .is_none_or(|email| parcel.is_party(email))
    }
}

/// Parcel state and its logs read at one point in time.
#[derive(Debug, Clone)]
pub struct TrackingSnapshot {
    pub parcel: Parcel,
    /// Newest first.
    pub events: Vec<TrackingEvent>,
    /// Newest first, truncated to the requested limit.
    pub recent_locations: Vec<LocationHistory>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new parcel with its creation event. Fails with
    /// [`StoreError::Duplicate`] when the tracking number is taken.
    async fn insert_parcel(
        &self,
        parcel: Parcel,
        event: TrackingEvent,
    ) -> Result<CommitOutcome, StoreError>;

    async fn parcel(&self, id: Uuid) -> Result<Option<Versioned<Parcel>>, StoreError>;

    async fn parcel_by_tracking_number(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Option<Versioned<Parcel>>, StoreError>;

    /// Matching parcels, newest first.
    async fn find_parcels(&self, filter: &ParcelFilter) -> Result<Vec<Parcel>, StoreError>;

    async fn commit_parcel(&self, commit: ParcelCommit) -> Result<CommitOutcome, StoreError>;

    async fn tracking_snapshot(
        &self,
        parcel_id: Uuid,
        location_limit: usize,
    ) -> Result<Option<TrackingSnapshot>, StoreError>;

    async fn approval_logs(&self, parcel_id: Uuid) -> Result<Vec<ApprovalLog>, StoreError>;

    /// Location rows recorded by a driver, newest first.
    async fn driver_location_history(
        &self,
        driver_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LocationHistory>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the user already has a driver.
    async fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError>;

    async fn driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError>;

    async fn driver_by_user(&self, user_id: &str) -> Result<Option<Driver>, StoreError>;

    async fn update_driver(&self, id: Uuid, patch: DriverPatch) -> Result<Driver, StoreError>;

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError>;

    async fn insert_service(&self, service: Service) -> Result<Service, StoreError>;

    async fn service(&self, id: Uuid) -> Result<Option<Service>, StoreError>;

    async fn list_services(&self) -> Result<Vec<Service>, StoreError>;

    /// Returns the already open session if there is one.
    async fn open_session(&self, session: TrackingSession) -> Result<TrackingSession, StoreError>;

    async fn active_session(&self, driver_id: Uuid) -> Result<Option<TrackingSession>, StoreError>;

    async fn close_session(
        &self,
        driver_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<TrackingSession>, StoreError>;

    async fn record_session_fix(
        &self,
        session_id: Uuid,
        distance_km: f64,
    ) -> Result<TrackingSession, StoreError>;
}
