use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ApproveParcel,
    AssignDriver,
    ViewAllParcels,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::ApproveParcel => "approve_parcel",
            Capability::AssignDriver => "assign_driver",
            Capability::ViewAllParcels => "view_all_parcels",
        }
    }
}

/// Authenticated caller as reported by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub capabilities: HashSet<Capability>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            is_staff: false,
            capabilities: HashSet::new(),
        }
    }

    pub fn staff(user_id: impl Into<String>) -> Self {
        Self {
            is_staff: true,
            ..Self::new(user_id)
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Staff implicitly hold every capability.
    pub fn can(&self, capability: Capability) -> bool {
        self.is_staff || self.capabilities.contains(&capability)
    }
}
