use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-room broadcast hub. Every committed event is published here; this
/// is the seam the external notification collaborator consumes. Delivery
/// to end users is that collaborator's problem, not ours.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel.
    #[allow(dead_code)]
    pub fn remove(&self, room_id: &Ulid) {
        self.channels.remove(room_id);
    }
}

/// Wire form of an event for external consumers.
pub fn event_payload(event: &Event) -> String {
    serde_json::to_string(event).expect("event serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeRange;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        let event = Event::LockAcquired {
            id: Ulid::new(),
            room_id: rid,
            range: TimeRange::new(1000, 2000),
            owner: "alice".into(),
            created_at: 0,
            expires_at: 300_000,
        };
        hub.send(rid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        // No subscriber — should not panic
        hub.send(
            rid,
            &Event::LockReleased {
                id: Ulid::new(),
                room_id: rid,
            },
        );
    }

    #[test]
    fn payload_is_valid_json() {
        let event = Event::BookingConfirmed {
            id: Ulid::new(),
            room_id: Ulid::new(),
            range: TimeRange::new(1000, 2000),
            owner: "alice".into(),
            created_at: 0,
            via_lock: Some(Ulid::new()),
        };
        let payload = event_payload(&event);
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(parsed.is_object());
    }
}
