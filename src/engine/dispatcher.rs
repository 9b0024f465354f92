use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::external::notifier::{Notification, Notifier};
use crate::state::AppState;

pub async fn run_notification_dispatcher(
    state: Arc<AppState>,
    notifier: Arc<dyn Notifier>,
    mut notification_rx: mpsc::Receiver<Notification>,
) {
    info!("notification dispatcher started");

    while let Some(notification) = notification_rx.recv().await {
        state.metrics.notifications_in_queue.dec();
        deliver(&state, notifier.as_ref(), &notification).await;
    }

    warn!("notification dispatcher stopped: queue channel closed");
}

async fn deliver(state: &AppState, notifier: &dyn Notifier, notification: &Notification) {
    let outcome = match timeout(state.settings.notifier_timeout, notifier.send(notification)).await
    {
        Ok(Ok(())) => {
            debug!(
                kind = notification.kind.as_str(),
                tracking_number = %notification.tracking_number,
                "notification sent"
            );
            "sent"
        }
        Ok(Err(err)) => {
            warn!(
                error = %err,
                kind = notification.kind.as_str(),
                tracking_number = %notification.tracking_number,
                "notification failed"
            );
            "failed"
        }
        Err(_) => {
            warn!(
                kind = notification.kind.as_str(),
                tracking_number = %notification.tracking_number,
                timeout_ms = state.settings.notifier_timeout.as_millis() as u64,
                "notification timed out"
            );
            "timeout"
        }
    };

    state
        .metrics
        .notifications_total
        .with_label_values(&[outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::run_notification_dispatcher;
    use crate::config::CoreSettings;
    use crate::engine::queue::enqueue_notification;
    use crate::external::UpstreamError;
    use crate::external::notifier::{Notification, NotificationKind, Notifier};
    use crate::models::parcel::TrackingNumber;
    use crate::state::{AppState, Collaborators};

    struct FlakyNotifier {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), UpstreamError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match notification.kind {
                NotificationKind::Rejection => Err(UpstreamError::Status(502)),
                NotificationKind::Delivery => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn notification(kind: NotificationKind) -> Notification {
        Notification {
            kind,
            tracking_number: TrackingNumber::parse("AAAA1111").unwrap(),
            recipients: vec!["asha@example.com".to_string()],
            subject: "subject".to_string(),
            body: "body".to_string(),
        }
    }

    #[tokio::test]
    async fn failures_and_timeouts_are_counted_and_do_not_stop_the_worker() {
        let settings = CoreSettings {
            notifier_timeout: Duration::from_millis(50),
            ..CoreSettings::default()
        };
        let (state, rx) = AppState::new(Collaborators::default(), settings, 16, 16);
        let state = Arc::new(state);
        let notifier = Arc::new(FlakyNotifier {
            attempts: AtomicUsize::new(0),
        });

        enqueue_notification(&state, notification(NotificationKind::Rejection));
        enqueue_notification(&state, notification(NotificationKind::Delivery));
        enqueue_notification(&state, notification(NotificationKind::Approval));

        let worker = tokio::spawn(run_notification_dispatcher(
            state.clone(),
            notifier.clone(),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;
        worker.abort();

        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 3);
        let counted = |outcome: &str| {
            state
                .metrics
                .notifications_total
                .with_label_values(&[outcome])
                .get()
        };
        assert_eq!(counted("failed"), 1);
        assert_eq!(counted("timeout"), 1);
        assert_eq!(counted("sent"), 1);
        assert_eq!(state.metrics.notifications_in_queue.get(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (state, _rx) = AppState::new(Collaborators::default(), CoreSettings::default(), 1, 16);

        enqueue_notification(&state, notification(NotificationKind::Approval));
        enqueue_notification(&state, notification(NotificationKind::Approval));

        assert_eq!(state.metrics.notifications_in_queue.get(), 1);
        assert_eq!(
            state
                .metrics
                .notifications_total
                .with_label_values(&["dropped"])
                .get(),
            1
        );
    }
}
