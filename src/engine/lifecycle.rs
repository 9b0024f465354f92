//! Parcel lifecycle: intake, the approval gate, assignment, transit
//! progression, delivery and cancellation.
//!
//! Each operation validates first, then commits the state change together
//! with its tracking event (and approval log, for decisions) through
//! [`commit_with_retry`]. Notifications and live-feed updates are emitted
//! only after the commit has succeeded.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::queue::enqueue_notification;
use crate::engine::{commit_with_retry, publish_update};
use crate::error::{AppError, FieldErrors};
use crate::external::notifier::Notification;
use crate::models::driver::Driver;
use crate::models::identity::{Capability, Identity};
use crate::models::parcel::{ApprovalStatus, Contact, Parcel, ParcelStatus, TrackingNumber};
use crate::models::records::{ApprovalAction, ApprovalLog, TrackingEvent};
use crate::models::service::Service;
use crate::models::validation::{is_blank, is_valid_email, is_valid_phone};
use crate::state::AppState;
use crate::store::{CommitOutcome, ParcelCommit, RecordStore, StoreError};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub sender_name: String,
    pub sender_email: String,
    pub sender_phone: String,
    pub receiver_name: String,
    pub receiver_email: String,
    pub receiver_phone: String,
    pub pickup_location: String,
    pub delivery_location: String,
    pub weight: f64,
    #[serde(default)]
    pub dimensions: Option<String>,
    #[serde(default)]
    pub declared_value: Option<Decimal>,
    #[serde(default, alias = "service")]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
    RequestChanges,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    pub action: DecisionAction,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default, alias = "assigned_driver_id")]
    pub driver_id: Option<Uuid>,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
}

fn validate_submission(request: &SubmitRequest) -> FieldErrors {
    let mut errors = FieldErrors::new();

    for (prefix, name, email, phone) in [
        (
            "sender",
            &request.sender_name,
            &request.sender_email,
            &request.sender_phone,
        ),
        (
            "receiver",
            &request.receiver_name,
            &request.receiver_email,
            &request.receiver_phone,
        ),
    ] {
        if is_blank(name) {
            errors.push(format!("{prefix}_name"), "name is required");
        }
        if !is_valid_email(email.trim()) {
            errors.push(format!("{prefix}_email"), "enter a valid email address");
        }
        if !is_valid_phone(phone.trim()) {
            errors.push(format!("{prefix}_phone"), "enter a valid phone number");
        }
    }

    if is_blank(&request.pickup_location) {
        errors.push("pickup_location", "pickup location is required");
    }
    if is_blank(&request.delivery_location) {
        errors.push("delivery_location", "delivery location is required");
    }
    if !request.weight.is_finite() || request.weight <= 0.0 {
        errors.push("weight", "weight must be greater than 0");
    }
    if request
        .declared_value
        .is_some_and(|value| value.is_sign_negative())
    {
        errors.push("declared_value", "declared value cannot be negative");
    }

    errors
}

fn contact(name: &str, email: &str, phone: &str) -> Contact {
    Contact {
        name: name.trim().to_string(),
        email: email.trim().to_ascii_lowercase(),
        phone: phone.trim().to_string(),
    }
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Inserts a parcel under a freshly generated tracking number, drawing a new
/// number whenever the store reports a collision.
pub(crate) async fn insert_with_unique_tracking_number<G, B>(
    store: &dyn RecordStore,
    attempts: u32,
    mut next_number: G,
    build: B,
) -> Result<CommitOutcome, AppError>
where
    G: FnMut() -> TrackingNumber + Send,
    B: Fn(TrackingNumber) -> (Parcel, TrackingEvent) + Send,
{
    for attempt in 1..=attempts.max(1) {
        let (parcel, event) = build(next_number());
        let tracking_number = parcel.tracking_number.clone();

        match store.insert_parcel(parcel, event).await {
            Ok(outcome) => return Ok(outcome),
            Err(StoreError::Duplicate(_)) => {
                warn!(
                    tracking_number = %tracking_number,
                    attempt,
                    "tracking number collision; regenerating"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::Conflict(
        "could not allocate a unique tracking number".to_string(),
    ))
}

pub async fn submit(
    state: &AppState,
    actor: Option<&Identity>,
    request: SubmitRequest,
) -> Result<Parcel, AppError> {
    let mut errors = validate_submission(&request);

    let service: Option<Service> = match request.service_id {
        Some(id) => match state.store.service(id).await? {
            Some(service) if service.is_active => Some(service),
            Some(_) => {
                errors.push("service_id", "service is not active");
                None
            }
            None => {
                errors.push("service_id", "unknown service");
                None
            }
        },
        None => None,
    };

    errors.into_result()?;

    let now = Utc::now();
    let estimated_delivery = match (request.estimated_delivery, service.as_ref()) {
        (Some(explicit), _) => Some(explicit),
        (None, Some(service)) => Some(
            now.checked_add_signed(Duration::days(i64::from(
                service.estimated_delivery_days,
            )))
            .ok_or_else(|| {
                AppError::invalid_field("service_id", "service delivery estimate is out of range")
            })?,
        ),
        (None, None) => None,
    };
    let parcel_id = Uuid::new_v4();
    let created_by = actor.map(|identity| identity.user_id.clone());

    let build = |tracking_number: TrackingNumber| {
        let parcel = Parcel {
            id: parcel_id,
            tracking_number: tracking_number.clone(),
            sender: contact(
                &request.sender_name,
                &request.sender_email,
                &request.sender_phone,
            ),
            receiver: contact(
                &request.receiver_name,
                &request.receiver_email,
                &request.receiver_phone,
            ),
            pickup_location: request.pickup_location.trim().to_string(),
            delivery_location: request.delivery_location.trim().to_string(),
            weight: request.weight,
            dimensions: optional_text(request.dimensions.clone()),
            declared_value: request.declared_value,
            special_instructions: optional_text(request.special_instructions.clone()),
            service_id: service.as_ref().map(|service| service.id),
            assigned_driver: None,
            status: ParcelStatus::Pending,
            approval_status: ApprovalStatus::Pending,
            current_location: None,
            estimated_delivery,
            pickup_time: None,
            delivery_time: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        let event = TrackingEvent::new(
            parcel_id,
            tracking_number,
            ParcelStatus::AwaitingApproval.as_str(),
            "Parcel order submitted and awaiting approval",
            created_by.clone(),
        );
        (parcel, event)
    };

    let outcome = insert_with_unique_tracking_number(
        state.store.as_ref(),
        state.settings.tracking_number_attempts,
        TrackingNumber::generate,
        build,
    )
    .await?;

    let parcel = outcome.parcel.record;
    state.metrics.parcels_submitted_total.inc();
    info!(
        parcel_id = %parcel.id,
        tracking_number = %parcel.tracking_number,
        "parcel submitted"
    );

    enqueue_notification(state, Notification::submission(&parcel));
    Ok(parcel)
}

fn invalid_transition(parcel: &Parcel, action: &str) -> AppError {
    AppError::InvalidState(format!(
        "cannot {action} parcel {} in status {} (approval {})",
        parcel.tracking_number, parcel.status, parcel.approval_status
    ))
}

pub async fn decide(
    state: &AppState,
    actor: &Identity,
    parcel_id: Uuid,
    request: DecisionRequest,
) -> Result<Parcel, AppError> {
    if !actor.can(Capability::ApproveParcel) {
        return Err(AppError::Forbidden(
            "approving parcels requires the approve_parcel capability".to_string(),
        ));
    }

    // an unknown driver must not sink the approval itself
    let bound_driver = match (request.action, request.driver_id) {
        (DecisionAction::Approve, Some(driver_id)) => {
            let driver = state.store.driver(driver_id).await?;
            if driver.is_none() {
                warn!(parcel_id = %parcel_id, driver_id = %driver_id, "ignoring unknown driver on approval");
            }
            driver.map(|driver| driver.id)
        }
        _ => None,
    };

    let notes = request.notes.trim().to_string();
    let rejection_reason = optional_text(request.rejection_reason.clone());

    let outcome = commit_with_retry(state, parcel_id, |current| {
        let mut parcel = current.record;
        if !parcel.approval_status.is_open() || parcel.status.is_terminal() {
            return Err(invalid_transition(&parcel, "decide on"));
        }

        let now = Utc::now();
        let (label, description, action) = match request.action {
            DecisionAction::Approve => {
                parcel.approval_status = ApprovalStatus::Approved;
                parcel.status = ParcelStatus::Approved;
                parcel.approved_by = Some(actor.user_id.clone());
                parcel.approved_at = Some(now);
                if let Some(driver_id) = bound_driver {
                    parcel.assigned_driver = Some(driver_id);
                }
                if let Some(estimate) = request.estimated_delivery {
                    parcel.estimated_delivery = Some(estimate);
                }
                (
                    ParcelStatus::Approved.as_str(),
                    format!("Parcel approved by {}. {notes}", actor.user_id),
                    ApprovalAction::Approved,
                )
            }
            DecisionAction::Reject => {
                parcel.approval_status = ApprovalStatus::Rejected;
                parcel.status = ParcelStatus::Rejected;
                parcel.rejection_reason = rejection_reason.clone();
                (
                    ParcelStatus::Rejected.as_str(),
                    format!(
                        "Parcel rejected. Reason: {}",
                        rejection_reason.as_deref().unwrap_or("not given")
                    ),
                    ApprovalAction::Rejected,
                )
            }
            DecisionAction::RequestChanges => {
                parcel.approval_status = ApprovalStatus::UnderReview;
                (
                    "Under_Review",
                    format!("Changes requested: {notes}"),
                    ApprovalAction::RequestedChanges,
                )
            }
        };

        let event = TrackingEvent::new(
            parcel.id,
            parcel.tracking_number.clone(),
            label,
            description.trim(),
            Some(actor.user_id.clone()),
        );
        let log = ApprovalLog {
            id: Uuid::new_v4(),
            parcel_id: parcel.id,
            action,
            performed_by: actor.user_id.clone(),
            notes: notes.clone(),
            timestamp: now,
            sequence: 0,
        };

        Ok(ParcelCommit::new(parcel, current.version)
            .with_event(event)
            .with_approval_log(log))
    })
    .await?;

    let parcel = outcome.parcel.record.clone();
    let transition = match request.action {
        DecisionAction::Approve => "approve",
        DecisionAction::Reject => "reject",
        DecisionAction::RequestChanges => "request_changes",
    };
    state.metrics.transition(transition);
    info!(
        parcel_id = %parcel.id,
        tracking_number = %parcel.tracking_number,
        approver = %actor.user_id,
        decision = transition,
        "approval decision recorded"
    );

    match request.action {
        DecisionAction::Approve => {
            enqueue_notification(
                state,
                Notification::approval(&parcel, &state.settings.frontend_url),
            );
            publish_update(state, &outcome);
        }
        DecisionAction::Reject => enqueue_notification(state, Notification::rejection(&parcel)),
        DecisionAction::RequestChanges => {}
    }

    Ok(parcel)
}

pub async fn assign_driver(
    state: &AppState,
    actor: &Identity,
    parcel_id: Uuid,
    driver_id: Option<Uuid>,
) -> Result<Parcel, AppError> {
    if !actor.can(Capability::AssignDriver) {
        return Err(AppError::Forbidden(
            "assigning drivers requires the assign_driver capability".to_string(),
        ));
    }

    let requested: Option<Driver> = match driver_id {
        Some(id) => Some(
            state
                .store
                .driver(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?,
        ),
        None => None,
    };

    let outcome = commit_with_retry(state, parcel_id, |current| {
        let mut parcel = current.record;
        let assignable = parcel.approval_status == ApprovalStatus::Approved
            && matches!(parcel.status, ParcelStatus::Approved | ParcelStatus::Assigned);
        if !assignable {
            return Err(invalid_transition(&parcel, "assign"));
        }

        let driver_id = requested
            .as_ref()
            .map(|driver| driver.id)
            .or(parcel.assigned_driver)
            .ok_or_else(|| {
                AppError::invalid_field("driver_id", "no driver given or bound to this parcel")
            })?;

        parcel.assigned_driver = Some(driver_id);
        parcel.status = ParcelStatus::Assigned;

        let event = TrackingEvent::new(
            parcel.id,
            parcel.tracking_number.clone(),
            ParcelStatus::Assigned.as_str(),
            "Parcel assigned to a driver",
            Some(actor.user_id.clone()),
        );
        Ok(ParcelCommit::new(parcel, current.version).with_event(event))
    })
    .await?;

    state.metrics.transition("assign");
    info!(
        parcel_id = %parcel_id,
        driver_id = ?outcome.parcel.record.assigned_driver,
        "driver assigned"
    );
    publish_update(state, &outcome);
    Ok(outcome.parcel.record)
}

/// Staff, dispatchers, and the parcel's own driver may move it along.
async fn acting_driver(state: &AppState, actor: &Identity) -> Result<Option<Uuid>, AppError> {
    if actor.is_staff || actor.can(Capability::AssignDriver) {
        return Ok(None);
    }
    Ok(state
        .store
        .driver_by_user(&actor.user_id)
        .await?
        .map(|driver| driver.id))
}

fn ensure_may_move(actor: &Identity, acting: Option<Uuid>, parcel: &Parcel) -> Result<(), AppError> {
    let privileged = actor.is_staff || actor.can(Capability::AssignDriver);
    let own_parcel = acting.is_some() && parcel.assigned_driver == acting;
    if privileged || own_parcel {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "parcel {} is not assigned to you",
            parcel.tracking_number
        )))
    }
}

pub async fn advance(
    state: &AppState,
    actor: &Identity,
    parcel_id: Uuid,
    target: ParcelStatus,
) -> Result<Parcel, AppError> {
    let acting = acting_driver(state, actor).await?;

    let outcome = commit_with_retry(state, parcel_id, |current| {
        let mut parcel = current.record;
        ensure_may_move(actor, acting, &parcel)?;

        if parcel.status.next_in_transit() != Some(target) {
            return Err(AppError::InvalidState(format!(
                "cannot move parcel {} from {} to {target}",
                parcel.tracking_number, parcel.status
            )));
        }

        parcel.status = target;
        let description = match target {
            ParcelStatus::PickedUp => {
                parcel.pickup_time = Some(Utc::now());
                "Parcel picked up by driver"
            }
            ParcelStatus::InTransit => "Parcel is in transit",
            _ => "Parcel is out for delivery",
        };

        let event = TrackingEvent::new(
            parcel.id,
            parcel.tracking_number.clone(),
            target.as_str(),
            description,
            Some(actor.user_id.clone()),
        );
        Ok(ParcelCommit::new(parcel, current.version).with_event(event))
    })
    .await?;

    state.metrics.transition(target.as_str());
    info!(parcel_id = %parcel_id, status = %target, "parcel advanced");
    publish_update(state, &outcome);
    Ok(outcome.parcel.record)
}

pub async fn complete(
    state: &AppState,
    actor: &Identity,
    parcel_id: Uuid,
    delivery_time: Option<DateTime<Utc>>,
) -> Result<Parcel, AppError> {
    let acting = acting_driver(state, actor).await?;

    let outcome = commit_with_retry(state, parcel_id, |current| {
        let mut parcel = current.record;
        ensure_may_move(actor, acting, &parcel)?;

        if !matches!(
            parcel.status,
            ParcelStatus::InTransit | ParcelStatus::OutForDelivery
        ) {
            return Err(invalid_transition(&parcel, "deliver"));
        }

        parcel.status = ParcelStatus::Delivered;
        parcel.delivery_time = Some(delivery_time.unwrap_or_else(Utc::now));

        let event = TrackingEvent::new(
            parcel.id,
            parcel.tracking_number.clone(),
            ParcelStatus::Delivered.as_str(),
            format!("Parcel delivered to {}", parcel.receiver.name),
            Some(actor.user_id.clone()),
        )
        .at_location(parcel.delivery_location.clone());
        Ok(ParcelCommit::new(parcel, current.version).with_event(event))
    })
    .await?;

    let parcel = outcome.parcel.record.clone();
    state.metrics.transition("deliver");
    info!(
        parcel_id = %parcel.id,
        tracking_number = %parcel.tracking_number,
        "parcel delivered"
    );

    enqueue_notification(state, Notification::delivery(&parcel));
    publish_update(state, &outcome);
    Ok(parcel)
}

pub async fn cancel(
    state: &AppState,
    actor: &Identity,
    parcel_id: Uuid,
    reason: Option<String>,
) -> Result<Parcel, AppError> {
    let reason = optional_text(reason);

    let outcome = commit_with_retry(state, parcel_id, |current| {
        let mut parcel = current.record;

        let is_sender = actor
            .email
            .as_deref()
            .is_some_and(|email| parcel.sender.email.eq_ignore_ascii_case(email));
        if !(actor.is_staff || actor.can(Capability::ApproveParcel) || is_sender) {
            return Err(AppError::Forbidden(
                "only the sender or staff may cancel a parcel".to_string(),
            ));
        }

        if parcel.status.is_terminal() {
            return Err(invalid_transition(&parcel, "cancel"));
        }

        parcel.status = ParcelStatus::Cancelled;
        let description = match &reason {
            Some(reason) => format!("Parcel cancelled: {reason}"),
            None => "Parcel cancelled".to_string(),
        };

        let event = TrackingEvent::new(
            parcel.id,
            parcel.tracking_number.clone(),
            ParcelStatus::Cancelled.as_str(),
            description,
            Some(actor.user_id.clone()),
        );
        Ok(ParcelCommit::new(parcel, current.version).with_event(event))
    })
    .await?;

    let parcel = outcome.parcel.record.clone();
    state.metrics.transition("cancel");
    info!(
        parcel_id = %parcel.id,
        tracking_number = %parcel.tracking_number,
        actor = %actor.user_id,
        "parcel cancelled"
    );

    enqueue_notification(state, Notification::cancellation(&parcel));
    publish_update(state, &outcome);
    Ok(parcel)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::test_support::{approver, drain, driver, staff, state};
    use crate::external::notifier::NotificationKind;
    use crate::store::{InMemoryStore, ParcelFilter};

    fn request() -> SubmitRequest {
        SubmitRequest {
            sender_name: "Asha Mrema".to_string(),
            sender_email: "asha@example.com".to_string(),
            sender_phone: "+255712345678".to_string(),
            receiver_name: "Juma Ali".to_string(),
            receiver_email: "juma@example.com".to_string(),
            receiver_phone: "0754123456".to_string(),
            pickup_location: "Kariakoo, Dar es Salaam".to_string(),
            delivery_location: "Njiro, Arusha".to_string(),
            weight: 2.5,
            dimensions: None,
            declared_value: None,
            service_id: None,
            special_instructions: None,
            estimated_delivery: None,
        }
    }

    fn decision(action: DecisionAction) -> DecisionRequest {
        DecisionRequest {
            action,
            notes: String::new(),
            rejection_reason: None,
            driver_id: None,
            estimated_delivery: None,
        }
    }

    async fn service(state: &AppState, days: u32) -> Service {
        state
            .store
            .insert_service(Service {
                id: Uuid::new_v4(),
                name: "Standard".to_string(),
                description: "Road freight".to_string(),
                estimated_delivery_days: days,
                is_active: true,
            })
            .await
            .unwrap()
    }

    /// Drives a fresh parcel up to `Assigned` for the given driver.
    async fn assigned_parcel(state: &AppState, driver_id: Uuid) -> Parcel {
        let parcel = submit(state, None, request()).await.unwrap();
        let mut approve = decision(DecisionAction::Approve);
        approve.driver_id = Some(driver_id);
        decide(state, &approver(), parcel.id, approve).await.unwrap();
        assign_driver(state, &staff(), parcel.id, None).await.unwrap()
    }

    #[tokio::test]
    async fn submit_creates_pending_parcel_with_creation_event_and_confirmation() {
        let (state, mut rx) = state();

        let parcel = submit(&state, None, request()).await.unwrap();

        assert_eq!(parcel.status, ParcelStatus::Pending);
        assert_eq!(parcel.approval_status, ApprovalStatus::Pending);
        assert_eq!(parcel.tracking_number.as_str().len(), 8);

        let snapshot = state
            .store
            .tracking_snapshot(parcel.id, 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(snapshot.events[0].status, "Awaiting_Approval");

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::SubmissionConfirmation);
        assert_eq!(sent[0].recipients, vec!["asha@example.com".to_string()]);
    }

    #[tokio::test]
    async fn submit_rejects_bad_weight_and_phone_with_field_detail() {
        let (state, _rx) = state();
        let mut bad = request();
        bad.weight = 0.0;
        bad.receiver_phone = "12-34".to_string();

        let err = submit(&state, None, bad).await.unwrap_err();
        match err {
            AppError::Validation(fields) => {
                assert!(fields.contains("weight"));
                assert!(fields.contains("receiver_phone"));
                assert!(!fields.contains("sender_phone"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_with_service_estimates_delivery_from_service_days() {
        let (state, _rx) = state();
        let standard = service(&state, 3).await;
        let mut with_service = request();
        with_service.service_id = Some(standard.id);

        let parcel = submit(&state, None, with_service).await.unwrap();

        let expected = parcel.created_at + Duration::days(3);
        let estimate = parcel.estimated_delivery.unwrap();
        assert!((estimate - expected).num_milliseconds().abs() <= 1_000);
    }

    #[tokio::test]
    async fn submit_keeps_explicit_estimate_over_service_default() {
        let (state, _rx) = state();
        let standard = service(&state, 3).await;
        let explicit = Utc::now() + Duration::days(10);
        let mut with_estimate = request();
        with_estimate.service_id = Some(standard.id);
        with_estimate.estimated_delivery = Some(explicit);

        let parcel = submit(&state, None, with_estimate).await.unwrap();
        assert_eq!(parcel.estimated_delivery, Some(explicit));
    }

    #[tokio::test]
    async fn submit_rejects_service_whose_estimate_overflows() {
        let (state, mut rx) = state();
        let glacial = service(&state, 1_000_000_000).await;
        let mut with_service = request();
        with_service.service_id = Some(glacial.id);

        let err = submit(&state, None, with_service).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref f) if f.contains("service_id")));
        assert!(drain(&mut rx).is_empty());
        assert!(
            state
                .store
                .find_parcels(&ParcelFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn submit_rejects_unknown_service() {
        let (state, _rx) = state();
        let mut unknown = request();
        unknown.service_id = Some(Uuid::new_v4());

        let err = submit(&state, None, unknown).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref f) if f.contains("service_id")));
    }

    #[tokio::test]
    async fn colliding_tracking_numbers_are_regenerated() {
        let store = InMemoryStore::new();
        let taken = TrackingNumber::parse("TAKEN001").unwrap();
        let fresh = TrackingNumber::parse("FRESH002").unwrap();

        let (state, _rx) = state();
        let template = submit(&state, None, request()).await.unwrap();
        let build = |tracking_number: TrackingNumber| {
            let mut parcel = template.clone();
            parcel.id = Uuid::new_v4();
            parcel.tracking_number = tracking_number.clone();
            let event = TrackingEvent::new(parcel.id, tracking_number, "Awaiting_Approval", "", None);
            (parcel, event)
        };

        insert_with_unique_tracking_number(&store, 5, || taken.clone(), &build)
            .await
            .unwrap();

        let mut candidates = vec![fresh.clone(), taken.clone()];
        let outcome = insert_with_unique_tracking_number(
            &store,
            5,
            || candidates.pop().unwrap(),
            &build,
        )
        .await
        .unwrap();
        assert_eq!(outcome.parcel.record.tracking_number, fresh);

        let err = insert_with_unique_tracking_number(&store, 3, || taken.clone(), &build)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.parcel_count(), 2);
    }

    #[tokio::test]
    async fn approve_is_not_idempotent() {
        let (state, mut rx) = state();
        let parcel = submit(&state, None, request()).await.unwrap();
        drain(&mut rx);

        let approved = decide(&state, &approver(), parcel.id, decision(DecisionAction::Approve))
            .await
            .unwrap();
        assert_eq!(approved.status, ParcelStatus::Approved);
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("approver-1"));

        let err = decide(&state, &approver(), parcel.id, decision(DecisionAction::Approve))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let logs = state.store.approval_logs(parcel.id).await.unwrap();
        assert_eq!(logs.len(), 1);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Approval);
        assert_eq!(sent[0].recipients.len(), 2);
    }

    #[tokio::test]
    async fn reject_records_reason_log_and_event() {
        let (state, mut rx) = state();
        let parcel = submit(&state, None, request()).await.unwrap();
        drain(&mut rx);

        let mut reject = decision(DecisionAction::Reject);
        reject.rejection_reason = Some("damaged".to_string());
        let rejected = decide(&state, &approver(), parcel.id, reject).await.unwrap();

        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
        assert_eq!(rejected.status, ParcelStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("damaged"));

        let logs = state.store.approval_logs(parcel.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, ApprovalAction::Rejected);

        let snapshot = state
            .store
            .tracking_snapshot(parcel.id, 10)
            .await
            .unwrap()
            .unwrap();
        let rejections: Vec<_> = snapshot
            .events
            .iter()
            .filter(|event| event.status == "Rejected")
            .collect();
        assert_eq!(rejections.len(), 1);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Rejection);
        assert_eq!(sent[0].recipients, vec!["asha@example.com".to_string()]);
    }

    #[tokio::test]
    async fn request_changes_keeps_status_and_allows_later_approval() {
        let (state, mut rx) = state();
        let parcel = submit(&state, None, request()).await.unwrap();
        drain(&mut rx);

        let reviewed = decide(
            &state,
            &approver(),
            parcel.id,
            decision(DecisionAction::RequestChanges),
        )
        .await
        .unwrap();
        assert_eq!(reviewed.approval_status, ApprovalStatus::UnderReview);
        assert_eq!(reviewed.status, ParcelStatus::Pending);
        assert!(drain(&mut rx).is_empty());

        decide(&state, &approver(), parcel.id, decision(DecisionAction::Approve))
            .await
            .unwrap();

        let logs = state.store.approval_logs(parcel.id).await.unwrap();
        let actions: Vec<_> = logs.iter().map(|log| log.action).collect();
        assert_eq!(
            actions,
            vec![ApprovalAction::Approved, ApprovalAction::RequestedChanges]
        );
    }

    #[tokio::test]
    async fn decide_requires_capability_and_existing_parcel() {
        let (state, _rx) = state();
        let parcel = submit(&state, None, request()).await.unwrap();

        let err = decide(
            &state,
            &Identity::new("nobody"),
            parcel.id,
            decision(DecisionAction::Approve),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = decide(&state, &approver(), Uuid::new_v4(), decision(DecisionAction::Approve))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn approve_ignores_unknown_driver_but_binds_known_one() {
        let (state, _rx) = state();
        let first = submit(&state, None, request()).await.unwrap();
        let second = submit(&state, None, request()).await.unwrap();
        let known = driver(&state, "driver-1").await;

        let mut unknown_driver = decision(DecisionAction::Approve);
        unknown_driver.driver_id = Some(Uuid::new_v4());
        let approved = decide(&state, &approver(), first.id, unknown_driver)
            .await
            .unwrap();
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert_eq!(approved.assigned_driver, None);

        let mut known_driver = decision(DecisionAction::Approve);
        known_driver.driver_id = Some(known.id);
        let approved = decide(&state, &approver(), second.id, known_driver)
            .await
            .unwrap();
        assert_eq!(approved.assigned_driver, Some(known.id));
    }

    #[tokio::test]
    async fn racing_approvals_yield_exactly_one_success() {
        let (state, _rx) = state();
        let state = Arc::new(state);
        let parcel_id = submit(&state, None, request()).await.unwrap().id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                decide(&state, &approver(), parcel_id, decision(DecisionAction::Approve)).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(AppError::InvalidState(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(state.store.approval_logs(parcel_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn driver_walks_parcel_through_transit_to_delivery() {
        let (state, mut rx) = state();
        let courier = driver(&state, "driver-1").await;
        let as_driver = Identity::new("driver-1");
        let parcel = assigned_parcel(&state, courier.id).await;
        drain(&mut rx);

        let err = advance(&state, &as_driver, parcel.id, ParcelStatus::InTransit)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let picked = advance(&state, &as_driver, parcel.id, ParcelStatus::PickedUp)
            .await
            .unwrap();
        assert!(picked.pickup_time.is_some());

        let err = complete(&state, &as_driver, parcel.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        advance(&state, &as_driver, parcel.id, ParcelStatus::InTransit)
            .await
            .unwrap();
        let delivered = complete(&state, &as_driver, parcel.id, None).await.unwrap();
        assert_eq!(delivered.status, ParcelStatus::Delivered);
        assert!(delivered.delivery_time.is_some());

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Delivery);
        assert_eq!(sent[0].recipients.len(), 2);
    }

    #[tokio::test]
    async fn other_drivers_cannot_move_a_parcel() {
        let (state, _rx) = state();
        let courier = driver(&state, "driver-1").await;
        driver(&state, "driver-2").await;
        let parcel = assigned_parcel(&state, courier.id).await;

        let err = advance(
            &state,
            &Identity::new("driver-2"),
            parcel.id,
            ParcelStatus::PickedUp,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn assign_needs_a_driver_and_an_approved_parcel() {
        let (state, _rx) = state();
        let pending = submit(&state, None, request()).await.unwrap();
        let courier = driver(&state, "driver-1").await;

        let err = assign_driver(&state, &staff(), pending.id, Some(courier.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        decide(&state, &approver(), pending.id, decision(DecisionAction::Approve))
            .await
            .unwrap();
        let err = assign_driver(&state, &staff(), pending.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = assign_driver(&state, &staff(), pending.id, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let assigned = assign_driver(&state, &staff(), pending.id, Some(courier.id))
            .await
            .unwrap();
        assert_eq!(assigned.status, ParcelStatus::Assigned);
        assert_eq!(assigned.assigned_driver, Some(courier.id));
    }

    #[tokio::test]
    async fn cancel_on_delivered_fails_but_assigned_succeeds() {
        let (state, _rx) = state();
        let courier = driver(&state, "driver-1").await;

        let delivered = assigned_parcel(&state, courier.id).await;
        for step in [ParcelStatus::PickedUp, ParcelStatus::InTransit] {
            advance(&state, &staff(), delivered.id, step).await.unwrap();
        }
        complete(&state, &staff(), delivered.id, None).await.unwrap();
        let err = cancel(&state, &staff(), delivered.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let assigned = assigned_parcel(&state, courier.id).await;
        let cancelled = cancel(&state, &staff(), assigned.id, Some("customer request".into()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, ParcelStatus::Cancelled);
    }

    #[tokio::test]
    async fn sender_may_cancel_but_strangers_may_not() {
        let (state, _rx) = state();
        let parcel = submit(&state, None, request()).await.unwrap();

        let err = cancel(
            &state,
            &Identity::new("someone").with_email("someone@example.com"),
            parcel.id,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let sender = Identity::new("asha").with_email("ASHA@example.com");
        let cancelled = cancel(&state, &sender, parcel.id, None).await.unwrap();
        assert_eq!(cancelled.status, ParcelStatus::Cancelled);

        let err = decide(&state, &approver(), parcel.id, decision(DecisionAction::Approve))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
