use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::external::UpstreamError;
use crate::models::parcel::{Parcel, TrackingNumber};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SubmissionConfirmation,
    Approval,
    Rejection,
    Delivery,
    Cancellation,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::SubmissionConfirmation => "submission_confirmation",
            NotificationKind::Approval => "approval",
            NotificationKind::Rejection => "rejection",
            NotificationKind::Delivery => "delivery",
            NotificationKind::Cancellation => "cancellation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub tracking_number: TrackingNumber,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn submission(parcel: &Parcel) -> Self {
        Self {
            kind: NotificationKind::SubmissionConfirmation,
            tracking_number: parcel.tracking_number.clone(),
            recipients: vec![parcel.sender.email.clone()],
            subject: format!("Parcel request submitted: {}", parcel.tracking_number),
            body: format!(
                "Dear {},\n\nYour parcel request is pending approval. We will notify you once it has been reviewed.\n\n{}",
                parcel.sender.name,
                summary(parcel)
            ),
        }
    }

    pub fn approval(parcel: &Parcel, frontend_url: &str) -> Self {
        Self {
            kind: NotificationKind::Approval,
            tracking_number: parcel.tracking_number.clone(),
            recipients: vec![parcel.sender.email.clone(), parcel.receiver.email.clone()],
            subject: format!("Parcel approved: {}", parcel.tracking_number),
            body: format!(
                "Dear {},\n\nYour parcel has been approved.\n\n{}\nTrack it at {}/track/{}",
                parcel.sender.name,
                summary(parcel),
                frontend_url.trim_end_matches('/'),
                parcel.tracking_number
            ),
        }
    }

    pub fn rejection(parcel: &Parcel) -> Self {
        Self {
            kind: NotificationKind::Rejection,
            tracking_number: parcel.tracking_number.clone(),
            recipients: vec![parcel.sender.email.clone()],
            subject: format!("Parcel request update: {}", parcel.tracking_number),
            body: format!(
                "Dear {},\n\nYour parcel request has been rejected.\nReason: {}",
                parcel.sender.name,
                parcel.rejection_reason.as_deref().unwrap_or("not given")
            ),
        }
    }

    pub fn delivery(parcel: &Parcel) -> Self {
        let delivered_at = parcel
            .delivery_time
            .map(|at| at.to_rfc3339())
            .unwrap_or_default();
        Self {
            kind: NotificationKind::Delivery,
            tracking_number: parcel.tracking_number.clone(),
            recipients: vec![parcel.sender.email.clone(), parcel.receiver.email.clone()],
            subject: format!("Parcel delivered: {}", parcel.tracking_number),
            body: format!(
                "Dear {},\n\nYour parcel has been delivered to {} at {}.",
                parcel.receiver.name, parcel.delivery_location, delivered_at
            ),
        }
    }

    pub fn cancellation(parcel: &Parcel) -> Self {
        Self {
            kind: NotificationKind::Cancellation,
            tracking_number: parcel.tracking_number.clone(),
            recipients: vec![parcel.sender.email.clone()],
            subject: format!("Parcel cancelled: {}", parcel.tracking_number),
            body: format!(
                "Dear {},\n\nParcel {} has been cancelled.",
                parcel.sender.name, parcel.tracking_number
            ),
        }
    }
}

fn summary(parcel: &Parcel) -> String {
    format!(
        "Tracking number: {}\nSender: {}\nReceiver: {}\nPickup: {}\nDelivery: {}\nWeight: {} kg\n",
        parcel.tracking_number,
        parcel.sender.name,
        parcel.receiver.name,
        parcel.pickup_location,
        parcel.delivery_location,
        parcel.weight
    )
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), UpstreamError>;
}

/// Writes notifications to the log instead of delivering them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), UpstreamError> {
        info!(
            kind = notification.kind.as_str(),
            tracking_number = %notification.tracking_number,
            recipients = notification.recipients.len(),
            subject = %notification.subject,
            "notification"
        );
        Ok(())
    }
}

/// Posts each notification as JSON to a relay that owns actual delivery.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), UpstreamError> {
        let response = self.client.post(&self.url).json(notification).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(UpstreamError::Status(response.status().as_u16()))
        }
    }
}
