//! Live notification fan-out to dashboard observers.
//!
//! Every tap, registration and admin action publishes one [`Notification`]
//! to all connected observers. Delivery is best-effort: with no observers
//! the notification is dropped, and an observer that falls more than the
//! channel capacity behind skips the oldest notifications.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use tapgate_core::access::{AccessOutcome, ReasonCode};
use tapgate_core::card::AccessLevel;

use crate::gate::ReaderMode;

/// A message pushed to live observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A reader presented a card.
    CardScanned {
        event_id: i64,
        card_id: String,
        site_id: Option<String>,
        name: Option<String>,
        access: AccessOutcome,
        reason: ReasonCode,
        message: String,
        mode: ReaderMode,
        created_at: i64,
    },
    /// A card was registered or re-registered.
    UserRegistered {
        card_id: String,
        name: String,
        access_level: AccessLevel,
        created: bool,
    },
    /// A card record was removed.
    UserDeleted { card_id: String },
    /// An operator asked a reader to sound its buzzer.
    Buzzer {
        event_id: i64,
        card_id: String,
        duration_ms: u64,
    },
}

/// Broadcast hub for [`Notification`]s.
#[derive(Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<Notification>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current observer. Returns how many observers the
    /// notification was queued for.
    pub fn publish(&self, notification: Notification) -> usize {
        match self.tx.send(notification) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No observers connected, notification dropped");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn deleted(card_id: &str) -> Notification {
        Notification::UserDeleted {
            card_id: card_id.to_string(),
        }
    }

    #[test]
    fn publish_without_observers_is_not_an_error() {
        let notifier = EventNotifier::new(4);
        assert_eq!(notifier.publish(deleted("A1")), 0);
    }

    #[tokio::test]
    async fn every_observer_receives_each_notification() {
        let notifier = EventNotifier::new(4);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();
        assert_eq!(notifier.observer_count(), 2);

        assert_eq!(notifier.publish(deleted("A1")), 2);

        assert_eq!(first.recv().await.unwrap(), deleted("A1"));
        assert_eq!(second.recv().await.unwrap(), deleted("A1"));
    }

    #[tokio::test]
    async fn slow_observer_lags_instead_of_blocking() {
        let notifier = EventNotifier::new(2);
        let mut rx = notifier.subscribe();
        for id in ["A1", "A2", "A3"] {
            notifier.publish(deleted(id));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap(), deleted("A2"));
    }

    #[test]
    fn notifications_are_tagged_by_event() {
        let json = serde_json::to_value(Notification::Buzzer {
            event_id: 1,
            card_id: "A1".to_string(),
            duration_ms: 200,
        })
        .unwrap();
        assert_eq!(json["event"], "buzzer");
        assert_eq!(json["duration_ms"], 200);

        let json = serde_json::to_value(Notification::CardScanned {
            event_id: 1,
            card_id: "Z9".to_string(),
            site_id: Some("C1".to_string()),
            name: None,
            access: AccessOutcome::Denied,
            reason: ReasonCode::NotRegistered,
            message: "Card not registered".to_string(),
            mode: ReaderMode::Read,
            created_at: 0,
        })
        .unwrap();
        assert_eq!(json["event"], "card_scanned");
        assert_eq!(json["access"], "denied");
        assert_eq!(json["reason"], "not_registered");
        assert_eq!(json["mode"], "read");
    }
}
