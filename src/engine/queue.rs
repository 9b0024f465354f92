use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::external::notifier::Notification;
use crate::state::AppState;

/// Hands a notification to the dispatcher without waiting. A full or closed
/// queue drops it: notifications are best-effort and must never hold up the
/// operation that produced them.
pub fn enqueue_notification(state: &AppState, notification: Notification) {
    match state.notification_tx.try_send(notification) {
        Ok(()) => state.metrics.notifications_in_queue.inc(),
        Err(TrySendError::Full(dropped)) => {
            state
                .metrics
                .notifications_total
                .with_label_values(&["dropped"])
                .inc();
            warn!(
                kind = dropped.kind.as_str(),
                tracking_number = %dropped.tracking_number,
                "notification queue full; dropping notification"
            );
        }
        Err(TrySendError::Closed(dropped)) => {
            state
                .metrics
                .notifications_total
                .with_label_values(&["dropped"])
                .inc();
            warn!(
                kind = dropped.kind.as_str(),
                tracking_number = %dropped.tracking_number,
                "notification dispatcher is gone; dropping notification"
            );
        }
    }
}
