//! Driver onboarding and the service catalogue.

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, FieldErrors};
use crate::models::driver::{DEFAULT_TRACKING_INTERVAL_SECS, Driver};
use crate::models::identity::Identity;
use crate::models::service::{MAX_ESTIMATED_DELIVERY_DAYS, Service};
use crate::models::validation::{is_blank, is_valid_phone};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct OnboardDriverRequest {
    pub user_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub license_number: Option<String>,
    #[serde(default)]
    pub vehicle_registration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub estimated_delivery_days: i64,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

fn require_staff(actor: &Identity, what: &str) -> Result<(), AppError> {
    if actor.is_staff {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("{what} is restricted to staff")))
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub async fn onboard_driver(
    state: &AppState,
    actor: &Identity,
    request: OnboardDriverRequest,
) -> Result<Driver, AppError> {
    require_staff(actor, "driver onboarding")?;

    let mut errors = FieldErrors::new();
    if is_blank(&request.user_id) {
        errors.push("user_id", "user id is required");
    }
    if !is_valid_phone(request.phone_number.trim()) {
        errors.push("phone_number", "enter a valid phone number");
    }
    errors.into_result()?;

    let now = Utc::now();
    let driver = state
        .store
        .insert_driver(Driver {
            id: Uuid::new_v4(),
            user_id: request.user_id.trim().to_string(),
            phone_number: request.phone_number.trim().to_string(),
            license_number: blank_to_none(request.license_number),
            vehicle_registration: blank_to_none(request.vehicle_registration),
            is_available: true,
            is_online: false,
            current_location: None,
            last_location_update: None,
            tracking_interval: DEFAULT_TRACKING_INTERVAL_SECS,
            device_token: None,
            battery_level: None,
            accuracy: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    info!(driver_id = %driver.id, user_id = %driver.user_id, "driver onboarded");
    Ok(driver)
}

pub async fn create_service(
    state: &AppState,
    actor: &Identity,
    request: CreateServiceRequest,
) -> Result<Service, AppError> {
    require_staff(actor, "managing services")?;

    let mut errors = FieldErrors::new();
    if is_blank(&request.name) {
        errors.push("name", "name is required");
    }
    let days = u32::try_from(request.estimated_delivery_days).ok();
    match days {
        None => errors.push(
            "estimated_delivery_days",
            "estimated delivery days cannot be negative",
        ),
        Some(days) if days > MAX_ESTIMATED_DELIVERY_DAYS => errors.push(
            "estimated_delivery_days",
            format!("estimated delivery days cannot exceed {MAX_ESTIMATED_DELIVERY_DAYS}"),
        ),
        Some(_) => {}
    }
    errors.into_result()?;

    let service = state
        .store
        .insert_service(Service {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            description: request.description.trim().to_string(),
            estimated_delivery_days: days.unwrap_or_default(),
            is_active: request.is_active,
        })
        .await?;

    info!(service_id = %service.id, name = %service.name, "service created");
    Ok(service)
}

/// Active services only; retired ones stay referenced by old parcels.
pub async fn list_services(state: &AppState) -> Result<Vec<Service>, AppError> {
    let services = state.store.list_services().await?;
    Ok(services
        .into_iter()
        .filter(|service| service.is_active)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{approver, staff, state};

    fn onboarding(user_id: &str, phone: &str) -> OnboardDriverRequest {
        OnboardDriverRequest {
            user_id: user_id.to_string(),
            phone_number: phone.to_string(),
            license_number: Some("  ".to_string()),
            vehicle_registration: Some("T 123 ABC".to_string()),
        }
    }

    #[tokio::test]
    async fn onboarding_creates_one_driver_per_user() {
        let (state, _rx) = state();

        let driver = onboard_driver(&state, &staff(), onboarding("driver-1", "+255700000001"))
            .await
            .unwrap();
        assert!(driver.is_available);
        assert!(!driver.is_online);
        assert_eq!(driver.tracking_interval, 30);
        assert_eq!(driver.license_number, None);
        assert_eq!(driver.vehicle_registration.as_deref(), Some("T 123 ABC"));

        let err = onboard_driver(&state, &staff(), onboarding("driver-1", "+255700000002"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn onboarding_is_staff_only_and_validates_phone() {
        let (state, _rx) = state();

        let err = onboard_driver(&state, &approver(), onboarding("driver-1", "+255700000001"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = onboard_driver(&state, &staff(), onboarding(" ", "0700"))
            .await
            .unwrap_err();
        match err {
            AppError::Validation(fields) => {
                assert!(fields.contains("user_id"));
                assert!(fields.contains("phone_number"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn catalogue_lists_only_active_services() {
        let (state, _rx) = state();

        for (name, active) in [("Express", true), ("Legacy", false)] {
            create_service(
                &state,
                &staff(),
                CreateServiceRequest {
                    name: name.to_string(),
                    description: String::new(),
                    estimated_delivery_days: 1,
                    is_active: active,
                },
            )
            .await
            .unwrap();
        }

        let listed = list_services(&state).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Express");

        let err = create_service(
            &state,
            &staff(),
            CreateServiceRequest {
                name: "Broken".to_string(),
                description: String::new(),
                estimated_delivery_days: -1,
                is_active: true,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref f) if f.contains("estimated_delivery_days")));
    }

    #[tokio::test]
    async fn service_estimate_is_capped_at_a_year() {
        let (state, _rx) = state();
        let create = |days: i64| CreateServiceRequest {
            name: "Sea freight".to_string(),
            description: String::new(),
            estimated_delivery_days: days,
            is_active: true,
        };

        let yearly = create_service(&state, &staff(), create(365)).await.unwrap();
        assert_eq!(yearly.estimated_delivery_days, MAX_ESTIMATED_DELIVERY_DAYS);

        for days in [366, 1_000_000_000] {
            let err = create_service(&state, &staff(), create(days))
                .await
                .unwrap_err();
            assert!(
                matches!(err, AppError::Validation(ref f) if f.contains("estimated_delivery_days")),
                "{days} days accepted"
            );
        }
        assert_eq!(list_services(&state).await.unwrap().len(), 1);
    }
}
