use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{commit_with_retry, publish_update};
use crate::error::{AppError, FieldErrors};
use crate::geo::session_step_km;
use crate::models::driver::{
    DeviceType, Driver, DriverPatch, GeoPoint, MAX_TRACKING_INTERVAL_SECS,
    MIN_TRACKING_INTERVAL_SECS, TrackingSession,
};
use crate::models::identity::Identity;
use crate::models::parcel::{ApprovalStatus, ParcelStatus};
use crate::models::records::{LocationHistory, TrackingEvent};
use crate::state::AppState;
use crate::store::{ParcelCommit, ParcelFilter};

#[derive(Debug, Clone, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// km/h
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub battery_level: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub parcel_id: Option<Uuid>,
}

impl LocationFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub updated_parcels: usize,
    pub skipped_parcels: usize,
    pub session_id: Option<Uuid>,
}

pub fn validate_fix(fix: &LocationFix) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();

    if !fix.latitude.is_finite() || !(-90.0..=90.0).contains(&fix.latitude) {
        errors.push("latitude", "latitude must be between -90 and 90");
    }
    if !fix.longitude.is_finite() || !(-180.0..=180.0).contains(&fix.longitude) {
        errors.push("longitude", "longitude must be between -180 and 180");
    }
    if fix
        .accuracy
        .is_some_and(|accuracy| !accuracy.is_finite() || accuracy < 0.0)
    {
        errors.push("accuracy", "accuracy cannot be negative");
    }
    if fix
        .speed
        .is_some_and(|speed| !speed.is_finite() || speed < 0.0)
    {
        errors.push("speed", "speed cannot be negative");
    }
    if fix
        .bearing
        .is_some_and(|bearing| !bearing.is_finite() || !(0.0..=360.0).contains(&bearing))
    {
        errors.push("bearing", "bearing must be between 0 and 360");
    }
    if fix
        .battery_level
        .is_some_and(|level| !(0..=100).contains(&level))
    {
        errors.push("battery_level", "battery level must be between 0 and 100");
    }

    errors.into_result()
}

async fn calling_driver(state: &AppState, caller: &Identity) -> Result<Driver, AppError> {
    state
        .store
        .driver_by_user(&caller.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("driver not found".to_string()))
}

/// Reverse-geocodes a fix, bounded by the configured timeout. Any failure
/// degrades to the coordinate label.
async fn resolve_address(state: &AppState, point: GeoPoint) -> String {
    let outcome = match timeout(state.settings.geocoder_timeout, state.geocoder.reverse(point)).await
    {
        Ok(Ok(address)) if !address.trim().is_empty() => {
            state
                .metrics
                .geocoder_lookups_total
                .with_label_values(&["resolved"])
                .inc();
            return address;
        }
        Ok(Ok(_)) => "empty",
        Ok(Err(err)) => {
            debug!(error = %err, "reverse geocoding failed");
            "failed"
        }
        Err(_) => {
            warn!(
                timeout_ms = state.settings.geocoder_timeout.as_millis() as u64,
                "reverse geocoding timed out"
            );
            "timeout"
        }
    };

    state
        .metrics
        .geocoder_lookups_total
        .with_label_values(&[outcome])
        .inc();
    point.fallback_label()
}

pub async fn ingest(
    state: &AppState,
    caller: &Identity,
    fix: LocationFix,
) -> Result<IngestReceipt, AppError> {
    let timer = state.metrics.ingest_latency_seconds.start_timer();
    let driver = calling_driver(state, caller).await?;

    if let Err(err) = validate_fix(&fix) {
        state
            .metrics
            .location_fixes_total
            .with_label_values(&["rejected"])
            .inc();
        return Err(err);
    }

    let point = fix.point();
    let recorded_at = fix.timestamp.unwrap_or_else(Utc::now);
    let previous = driver.current_location;

    state
        .store
        .update_driver(
            driver.id,
            DriverPatch {
                location: Some((point, recorded_at)),
                accuracy: fix.accuracy,
                battery_level: fix.battery_level.and_then(|level| u8::try_from(level).ok()),
                ..DriverPatch::default()
            },
        )
        .await?;

    let session = match state.store.active_session(driver.id).await? {
        Some(open) => {
            let step_km = session_step_km(previous.as_ref(), &point);
            Some(state.store.record_session_fix(open.id, step_km).await?)
        }
        None => None,
    };
    let session_id = session.as_ref().map(|session| session.id);

    let mut skipped = 0;
    let targets: Vec<Uuid> = match fix.parcel_id {
        Some(parcel_id) => match state.store.parcel(parcel_id).await? {
            Some(current) if current.record.assigned_driver == Some(driver.id) => vec![parcel_id],
            _ => {
                debug!(
                    parcel_id = %parcel_id,
                    driver_id = %driver.id,
                    "fix names a parcel not assigned to this driver"
                );
                skipped += 1;
                Vec::new()
            }
        },
        None => {
            let filter = ParcelFilter {
                approval_status: Some(ApprovalStatus::Approved),
                statuses: Some(ParcelStatus::ACTIVE_TRANSIT.to_vec()),
                assigned_driver: Some(driver.id),
                ..ParcelFilter::default()
            };
            state
                .store
                .find_parcels(&filter)
                .await?
                .into_iter()
                .map(|parcel| parcel.id)
                .collect()
        }
    };

    let mut updated = 0;
    if !targets.is_empty() {
        let address = match fix.address.as_deref().map(str::trim) {
            Some(given) if !given.is_empty() => given.to_string(),
            _ => resolve_address(state, point).await,
        };
        let moving = fix
            .speed
            .filter(|speed| *speed > state.settings.motion_speed_threshold_kmh);

        for parcel_id in targets {
            let result = commit_with_retry(state, parcel_id, |current| {
                let mut parcel = current.record;
                if !parcel.accepts_location_from(driver.id) {
                    return Err(AppError::InvalidState(format!(
                        "parcel {} no longer takes fixes from this driver",
                        parcel.tracking_number
                    )));
                }

                parcel.current_location = Some(point);
                let row = LocationHistory {
                    id: Uuid::new_v4(),
                    parcel_id: parcel.id,
                    driver_id: driver.id,
                    latitude: point.lat,
                    longitude: point.lng,
                    timestamp: recorded_at,
                    address: address.clone(),
                    status: parcel.status,
                    tracking_session: session_id,
                    sequence: 0,
                };

                let event = moving.map(|speed| {
                    TrackingEvent::new(
                        parcel.id,
                        parcel.tracking_number.clone(),
                        parcel.status.as_str(),
                        format!("Driver moving at {speed:.1} km/h towards destination"),
                        Some(caller.user_id.clone()),
                    )
                    .at_location(address.clone())
                });

                let commit = ParcelCommit::new(parcel, current.version).with_location(row);
                Ok(match event {
                    Some(event) => commit.with_event(event),
                    None => commit,
                })
            })
            .await;

            match result {
                Ok(outcome) => {
                    updated += 1;
                    state
                        .metrics
                        .parcel_location_updates_total
                        .with_label_values(&["updated"])
                        .inc();
                    publish_update(state, &outcome);
                }
                Err(err) => {
                    skipped += 1;
                    state
                        .metrics
                        .parcel_location_updates_total
                        .with_label_values(&["skipped"])
                        .inc();
                    warn!(
                        parcel_id = %parcel_id,
                        driver_id = %driver.id,
                        error = %err,
                        "skipping parcel location update"
                    );
                }
            }
        }
    }

    state
        .metrics
        .location_fixes_total
        .with_label_values(&["accepted"])
        .inc();
    timer.observe_duration();
    debug!(
        driver_id = %driver.id,
        updated_parcels = updated,
        skipped_parcels = skipped,
        "location fix ingested"
    );

    Ok(IngestReceipt {
        success: true,
        message: "Location updated successfully".to_string(),
        timestamp: recorded_at,
        accuracy: fix.accuracy,
        updated_parcels: updated,
        skipped_parcels: skipped,
        session_id,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverStatusRequest {
    pub is_online: bool,
    #[serde(default)]
    pub tracking_interval: Option<i64>,
    #[serde(default)]
    pub device_token: Option<String>,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverStatusReceipt {
    pub success: bool,
    pub message: String,
    pub is_online: bool,
    pub tracking_interval: u32,
    pub session: Option<TrackingSession>,
}

pub async fn set_status(
    state: &AppState,
    caller: &Identity,
    request: DriverStatusRequest,
) -> Result<DriverStatusReceipt, AppError> {
    let driver = calling_driver(state, caller).await?;

    let tracking_interval = match request.tracking_interval {
        Some(secs) => {
            let in_range = (i64::from(MIN_TRACKING_INTERVAL_SECS)
                ..=i64::from(MAX_TRACKING_INTERVAL_SECS))
                .contains(&secs);
            if !in_range {
                return Err(AppError::invalid_field(
                    "tracking_interval",
                    format!(
                        "tracking interval must be between {MIN_TRACKING_INTERVAL_SECS} and {MAX_TRACKING_INTERVAL_SECS} seconds"
                    ),
                ));
            }
            u32::try_from(secs).ok()
        }
        None => None,
    };

    let updated = state
        .store
        .update_driver(
            driver.id,
            DriverPatch {
                is_online: Some(request.is_online),
                tracking_interval,
                device_token: request.device_token,
                ..DriverPatch::default()
            },
        )
        .await?;

    let now = Utc::now();
    let session = if request.is_online {
        let session = state
            .store
            .open_session(TrackingSession {
                id: Uuid::new_v4(),
                driver_id: driver.id,
                start_time: now,
                end_time: None,
                device_type: request.device_type.unwrap_or_default(),
                user_agent: request.user_agent,
                locations_count: 0,
                distance_traveled_km: 0.0,
            })
            .await?;
        Some(session)
    } else {
        if let Some(closed) = state.store.close_session(driver.id, now).await? {
            info!(
                driver_id = %driver.id,
                session_id = %closed.id,
                locations = closed.locations_count,
                distance_km = closed.distance_traveled_km,
                "tracking session closed"
            );
        }
        None
    };

    info!(
        driver_id = %driver.id,
        is_online = updated.is_online,
        tracking_interval = updated.tracking_interval,
        "driver status updated"
    );

    Ok(DriverStatusReceipt {
        success: true,
        message: format!(
            "Driver is now {}",
            if updated.is_online { "online" } else { "offline" }
        ),
        is_online: updated.is_online,
        tracking_interval: updated.tracking_interval,
        session,
    })
}
