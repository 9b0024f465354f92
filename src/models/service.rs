use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest delivery estimate a service may advertise.
pub const MAX_ESTIMATED_DELIVERY_DAYS: u32 = 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub estimated_delivery_days: u32,
    pub is_active: bool,
}
