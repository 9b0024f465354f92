//! Read-only projections over parcels, drivers and their logs.
//!
//! Public lookups are gated on approval: until a parcel is approved only a
//! restricted view is served, with no timeline, location rows or
//! coordinates.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Driver, TrackingSession};
use crate::models::identity::{Capability, Identity};
use crate::models::parcel::{ApprovalStatus, Parcel, ParcelStatus, TrackingNumber};
use crate::models::records::{ApprovalLog, LocationHistory, TrackingEvent};
use crate::state::AppState;
use crate::store::{ParcelFilter, TrackingSnapshot, Versioned};

const PENDING_MESSAGE: &str =
    "Your parcel is still pending approval. You will receive an email once approved.";

#[derive(Debug, Clone, Serialize)]
pub struct RestrictedTracking {
    pub tracking_number: TrackingNumber,
    pub approval_status: ApprovalStatus,
    pub warning: &'static str,
    pub message: &'static str,
}

impl RestrictedTracking {
    fn of(parcel: &Parcel) -> Self {
        Self {
            tracking_number: parcel.tracking_number.clone(),
            approval_status: parcel.approval_status,
            warning: "Parcel not yet approved",
            message: PENDING_MESSAGE,
        }
    }
}

/// Public parcel fields. Contact emails and phones are never exposed here.
#[derive(Debug, Clone, Serialize)]
pub struct ParcelSummary {
    pub id: Uuid,
    pub tracking_number: TrackingNumber,
    pub sender_name: String,
    pub receiver_name: String,
    pub pickup_location: String,
    pub delivery_location: String,
    pub weight: f64,
    pub dimensions: Option<String>,
    pub special_instructions: Option<String>,
    pub service_id: Option<Uuid>,
    pub status: ParcelStatus,
    pub approval_status: ApprovalStatus,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Parcel> for ParcelSummary {
    fn from(parcel: &Parcel) -> Self {
        Self {
            id: parcel.id,
            tracking_number: parcel.tracking_number.clone(),
            sender_name: parcel.sender.name.clone(),
            receiver_name: parcel.receiver.name.clone(),
            pickup_location: parcel.pickup_location.clone(),
            delivery_location: parcel.delivery_location.clone(),
            weight: parcel.weight,
            dimensions: parcel.dimensions.clone(),
            special_instructions: parcel.special_instructions.clone(),
            service_id: parcel.service_id,
            status: parcel.status,
            approval_status: parcel.approval_status,
            estimated_delivery: parcel.estimated_delivery,
            pickup_time: parcel.pickup_time,
            delivery_time: parcel.delivery_time,
            created_at: parcel.created_at,
            updated_at: parcel.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CurrentLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullTracking {
    pub parcel: ParcelSummary,
    pub tracking_events: Vec<TrackingEvent>,
    pub location_history: Vec<LocationHistory>,
    pub current_location: CurrentLocation,
}

impl From<TrackingSnapshot> for FullTracking {
    fn from(snapshot: TrackingSnapshot) -> Self {
        let TrackingSnapshot {
            parcel,
            events,
            recent_locations,
        } = snapshot;

        Self {
            parcel: ParcelSummary::from(&parcel),
            tracking_events: events,
            location_history: recent_locations,
            current_location: CurrentLocation {
                latitude: parcel.current_location.map(|point| point.lat),
                longitude: parcel.current_location.map(|point| point.lng),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TrackingView {
    Restricted(RestrictedTracking),
    Full(Box<FullTracking>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TimelineView {
    Restricted(RestrictedTracking),
    Events(Vec<TrackingEvent>),
}

fn not_found() -> AppError {
    AppError::NotFound("parcel not found".to_string())
}

async fn resolve(state: &AppState, raw: &str) -> Result<Versioned<Parcel>, AppError> {
    let tracking_number = TrackingNumber::parse(raw).ok_or_else(not_found)?;
    state
        .store
        .parcel_by_tracking_number(&tracking_number)
        .await?
        .ok_or_else(not_found)
}

pub async fn lookup(state: &AppState, raw: &str) -> Result<TrackingView, AppError> {
    let parcel = resolve(state, raw).await?;
    if parcel.record.approval_status != ApprovalStatus::Approved {
        return Ok(TrackingView::Restricted(RestrictedTracking::of(&parcel.record)));
    }

    // parcel, events and locations must come from one consistent read
    let snapshot = state
        .store
        .tracking_snapshot(parcel.record.id, state.settings.recent_locations)
        .await?
        .ok_or_else(not_found)?;

    if snapshot.parcel.approval_status != ApprovalStatus::Approved {
        return Ok(TrackingView::Restricted(RestrictedTracking::of(&snapshot.parcel)));
    }
    Ok(TrackingView::Full(Box::new(FullTracking::from(snapshot))))
}

pub async fn history(state: &AppState, raw: &str) -> Result<TimelineView, AppError> {
    let parcel = resolve(state, raw).await?;
    if parcel.record.approval_status != ApprovalStatus::Approved {
        return Ok(TimelineView::Restricted(RestrictedTracking::of(&parcel.record)));
    }

    let snapshot = state
        .store
        .tracking_snapshot(parcel.record.id, 0)
        .await?
        .ok_or_else(not_found)?;
    Ok(TimelineView::Events(snapshot.events))
}

fn require(actor: &Identity, capability: Capability, what: &str) -> Result<(), AppError> {
    if actor.can(capability) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{what} requires the {} capability",
            capability.as_str()
        )))
    }
}

pub async fn pending_approvals(state: &AppState, actor: &Identity) -> Result<Vec<Parcel>, AppError> {
    require(actor, Capability::ApproveParcel, "listing pending approvals")?;

    let filter = ParcelFilter {
        approval_status: Some(ApprovalStatus::Pending),
        ..ParcelFilter::default()
    };
    Ok(state.store.find_parcels(&filter).await?)
}

pub async fn approval_trail(
    state: &AppState,
    actor: &Identity,
    parcel_id: Uuid,
) -> Result<Vec<ApprovalLog>, AppError> {
    require(actor, Capability::ApproveParcel, "reading approval logs")?;

    if state.store.parcel(parcel_id).await?.is_none() {
        return Err(not_found());
    }
    Ok(state.store.approval_logs(parcel_id).await?)
}

/// Everyone with view-all rights sees every parcel; anyone else sees the
/// parcels they sent or receive.
pub async fn list_parcels(state: &AppState, actor: &Identity) -> Result<Vec<Parcel>, AppError> {
    if actor.can(Capability::ViewAllParcels) {
        return Ok(state.store.find_parcels(&ParcelFilter::default()).await?);
    }

    let Some(email) = actor.email.as_deref() else {
        return Ok(Vec::new());
    };
    let filter = ParcelFilter {
        party_email: Some(email.to_string()),
        ..ParcelFilter::default()
    };
    Ok(state.store.find_parcels(&filter).await?)
}

pub async fn driver_location_history(
    state: &AppState,
    actor: &Identity,
    driver_id: Uuid,
) -> Result<Vec<LocationHistory>, AppError> {
    if !actor.can(Capability::ViewAllParcels) {
        let own = state.store.driver_by_user(&actor.user_id).await?;
        if own.is_none_or(|driver| driver.id != driver_id) {
            return Err(AppError::Forbidden(
                "drivers may only read their own location history".to_string(),
            ));
        }
    }

    if state.store.driver(driver_id).await?.is_none() {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    Ok(state
        .store
        .driver_location_history(driver_id, state.settings.driver_history_limit)
        .await?)
}

/// Last known position of a driver. Open to any authenticated caller.
#[derive(Debug, Clone, Serialize)]
pub struct DriverPosition {
    pub driver_id: Uuid,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub is_available: bool,
    pub is_online: bool,
}

impl From<&Driver> for DriverPosition {
    fn from(driver: &Driver) -> Self {
        Self {
            driver_id: driver.id,
            latitude: driver.current_location.map(|point| point.lat),
            longitude: driver.current_location.map(|point| point.lng),
            last_update: driver.last_location_update,
            is_available: driver.is_available,
            is_online: driver.is_online,
        }
    }
}

/// Position of `driver_id`, or of the calling driver when none is given.
pub async fn driver_location(
    state: &AppState,
    caller: &Identity,
    driver_id: Option<Uuid>,
) -> Result<DriverPosition, AppError> {
    let driver = match driver_id {
        Some(driver_id) => state
            .store
            .driver(driver_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?,
        None => calling_driver(state, caller).await?,
    };
    Ok(DriverPosition::from(&driver))
}

async fn calling_driver(state: &AppState, caller: &Identity) -> Result<Driver, AppError> {
    state
        .store
        .driver_by_user(&caller.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("driver not found".to_string()))
}

async fn assigned_to(state: &AppState, driver_id: Uuid) -> Result<Vec<Parcel>, AppError> {
    let filter = ParcelFilter {
        approval_status: Some(ApprovalStatus::Approved),
        assigned_driver: Some(driver_id),
        ..ParcelFilter::default()
    };
    Ok(state.store.find_parcels(&filter).await?)
}

pub async fn driver_parcels(state: &AppState, caller: &Identity) -> Result<Vec<Parcel>, AppError> {
    let driver = calling_driver(state, caller).await?;
    assigned_to(state, driver.id).await
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverState {
    pub driver: Driver,
    pub assigned_parcels_count: usize,
    pub active_parcels_count: usize,
    pub completed_today_count: usize,
    pub active_session: Option<TrackingSession>,
}

pub async fn driver_state(state: &AppState, caller: &Identity) -> Result<DriverState, AppError> {
    let driver = calling_driver(state, caller).await?;
    let parcels = assigned_to(state, driver.id).await?;
    let active_session = state.store.active_session(driver.id).await?;

    let today = Utc::now().date_naive();
    let active_parcels_count = parcels
        .iter()
        .filter(|parcel| parcel.status.is_active_transit())
        .count();
    let completed_today_count = parcels
        .iter()
        .filter(|parcel| {
            parcel.status == ParcelStatus::Delivered
                && parcel
                    .delivery_time
                    .is_some_and(|at| at.date_naive() == today)
        })
        .count();

    Ok(DriverState {
        assigned_parcels_count: parcels.len(),
        active_parcels_count,
        completed_today_count,
        active_session,
        driver,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_parcels: usize,
    pub parcels_last_30_days: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub by_approval_status: BTreeMap<&'static str, usize>,
    pub total_drivers: usize,
    pub available_drivers: usize,
    pub online_drivers: usize,
}

pub async fn statistics(state: &AppState, actor: &Identity) -> Result<Statistics, AppError> {
    if !actor.is_staff {
        return Err(AppError::Forbidden(
            "statistics are available to staff only".to_string(),
        ));
    }

    let parcels = state.store.find_parcels(&ParcelFilter::default()).await?;
    let drivers = state.store.list_drivers().await?;
    let window_start = Utc::now() - Duration::days(30);

    let mut by_status: BTreeMap<&'static str, usize> = ParcelStatus::ALL
        .iter()
        .map(|status| (status.as_str(), 0))
        .collect();
    let mut by_approval_status: BTreeMap<&'static str, usize> = ApprovalStatus::ALL
        .iter()
        .map(|status| (status.as_str(), 0))
        .collect();
    for parcel in &parcels {
        *by_status.entry(parcel.status.as_str()).or_default() += 1;
        *by_approval_status
            .entry(parcel.approval_status.as_str())
            .or_default() += 1;
    }

    Ok(Statistics {
        total_parcels: parcels.len(),
        parcels_last_30_days: parcels
            .iter()
            .filter(|parcel| parcel.created_at >= window_start)
            .count(),
        by_status,
        by_approval_status,
        total_drivers: drivers.len(),
        available_drivers: drivers.iter().filter(|driver| driver.is_available).count(),
        online_drivers: drivers.iter().filter(|driver| driver.is_online).count(),
    })
}
