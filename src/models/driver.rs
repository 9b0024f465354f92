use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_TRACKING_INTERVAL_SECS: u32 = 5;
pub const MAX_TRACKING_INTERVAL_SECS: u32 = 300;
pub const DEFAULT_TRACKING_INTERVAL_SECS: u32 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Label used when no address could be resolved.
    pub fn fallback_label(&self) -> String {
        format!("Lat: {:.6}, Lng: {:.6}", self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub user_id: String,
    pub phone_number: String,
    pub license_number: Option<String>,
    pub vehicle_registration: Option<String>,
    pub is_available: bool,
    pub is_online: bool,
    pub current_location: Option<GeoPoint>,
    pub last_location_update: Option<DateTime<Utc>>,
    pub tracking_interval: u32,
    pub device_token: Option<String>,
    pub battery_level: Option<u8>,
    pub accuracy: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field-level update applied atomically by the store. `None` leaves the
/// field untouched, so concurrent patches touching different fields do
/// not clobber each other.
#[derive(Debug, Clone, Default)]
pub struct DriverPatch {
    pub location: Option<(GeoPoint, DateTime<Utc>)>,
    pub accuracy: Option<f64>,
    pub battery_level: Option<u8>,
    pub is_online: Option<bool>,
    pub tracking_interval: Option<u32>,
    pub device_token: Option<String>,
}

impl DriverPatch {
    pub fn apply(self, driver: &mut Driver) {
        if let Some((point, at)) = self.location {
            driver.current_location = Some(point);
            driver.last_location_update = Some(at);
        }
        if let Some(accuracy) = self.accuracy {
            driver.accuracy = Some(accuracy);
        }
        if let Some(battery) = self.battery_level {
            driver.battery_level = Some(battery);
        }
        if let Some(is_online) = self.is_online {
            driver.is_online = is_online;
        }
        if let Some(interval) = self.tracking_interval {
            driver.tracking_interval = interval;
        }
        if let Some(token) = self.device_token {
            driver.device_token = Some(token);
        }
        driver.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Web,
    Android,
    Ios,
    #[default]
    Unknown,
}

/// Span between a driver going online and offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSession {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub device_type: DeviceType,
    pub user_agent: Option<String>,
    pub locations_count: u64,
    pub distance_traveled_km: f64,
}
