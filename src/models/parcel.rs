use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

pub const TRACKING_NUMBER_LEN: usize = 8;

/// Public identifier of a parcel: eight uppercase ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingNumber(String);

impl TrackingNumber {
    /// Derives a candidate from a fresh v4 UUID. Candidates can collide, so
    /// callers must rely on the store's uniqueness check.
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..TRACKING_NUMBER_LEN].to_ascii_uppercase())
    }

    /// Normalises user input (trim + uppercase) and checks the format.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let well_formed = normalized.len() == TRACKING_NUMBER_LEN
            && normalized
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());

        well_formed.then_some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TrackingNumber {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid tracking number: {value}"))
    }
}

impl From<TrackingNumber> for String {
    fn from(value: TrackingNumber) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ParcelStatus {
    Pending,
    #[serde(rename = "Awaiting_Approval")]
    AwaitingApproval,
    Approved,
    Assigned,
    #[serde(rename = "Picked_Up")]
    PickedUp,
    #[serde(rename = "In_Transit")]
    InTransit,
    #[serde(rename = "Out_for_Delivery")]
    OutForDelivery,
    Delivered,
    Cancelled,
    Rejected,
}

impl ParcelStatus {
    pub const ACTIVE_TRANSIT: [ParcelStatus; 4] = [
        ParcelStatus::Assigned,
        ParcelStatus::PickedUp,
        ParcelStatus::InTransit,
        ParcelStatus::OutForDelivery,
    ];

    pub const ALL: [ParcelStatus; 10] = [
        ParcelStatus::Pending,
        ParcelStatus::AwaitingApproval,
        ParcelStatus::Approved,
        ParcelStatus::Assigned,
        ParcelStatus::PickedUp,
        ParcelStatus::InTransit,
        ParcelStatus::OutForDelivery,
        ParcelStatus::Delivered,
        ParcelStatus::Cancelled,
        ParcelStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParcelStatus::Pending => "Pending",
            ParcelStatus::AwaitingApproval => "Awaiting_Approval",
            ParcelStatus::Approved => "Approved",
            ParcelStatus::Assigned => "Assigned",
            ParcelStatus::PickedUp => "Picked_Up",
            ParcelStatus::InTransit => "In_Transit",
            ParcelStatus::OutForDelivery => "Out_for_Delivery",
            ParcelStatus::Delivered => "Delivered",
            ParcelStatus::Cancelled => "Cancelled",
            ParcelStatus::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ParcelStatus::Delivered | ParcelStatus::Cancelled | ParcelStatus::Rejected
        )
    }

    pub fn is_active_transit(self) -> bool {
        Self::ACTIVE_TRANSIT.contains(&self)
    }

    /// The single legal driver-side step out of this state, if any.
    pub fn next_in_transit(self) -> Option<ParcelStatus> {
        match self {
            ParcelStatus::Assigned => Some(ParcelStatus::PickedUp),
            ParcelStatus::PickedUp => Some(ParcelStatus::InTransit),
            ParcelStatus::InTransit => Some(ParcelStatus::OutForDelivery),
            _ => None,
        }
    }
}

impl fmt::Display for ParcelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    UnderReview,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 4] = [
        ApprovalStatus::Pending,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
        ApprovalStatus::UnderReview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::UnderReview => "under_review",
        }
    }

    /// Whether an approver may still decide on the parcel.
    pub fn is_open(self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::UnderReview)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parcel {
    pub id: Uuid,
    pub tracking_number: TrackingNumber,
    pub sender: Contact,
    pub receiver: Contact,
    pub pickup_location: String,
    pub delivery_location: String,
    pub weight: f64,
    pub dimensions: Option<String>,
    pub declared_value: Option<Decimal>,
    pub special_instructions: Option<String>,
    pub service_id: Option<Uuid>,
    pub assigned_driver: Option<Uuid>,
    pub status: ParcelStatus,
    pub approval_status: ApprovalStatus,
    pub current_location: Option<GeoPoint>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Parcel {
    /// Live coordinates are accepted only from an approved parcel in transit.
    pub fn accepts_location_from(&self, driver_id: Uuid) -> bool {
        self.assigned_driver == Some(driver_id)
            && self.approval_status == ApprovalStatus::Approved
            && self.status.is_active_transit()
    }

    pub fn is_party(&self, email: &str) -> bool {
        self.sender.email.eq_ignore_ascii_case(email)
            || self.receiver.email.eq_ignore_ascii_case(email)
    }
}
