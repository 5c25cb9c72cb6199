use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::RoomSnapshot;

const CHANNEL_CAPACITY: usize = 256;

/// Post-commit "room changed" notification: the full post-change snapshot
/// plus the list of fields that changed. Delivery is fire-and-forget; the
/// core never waits on, retries, or rolls back for a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomChange {
    pub hotel: String,
    pub room_number: String,
    pub snapshot: RoomSnapshot,
    pub changed: Vec<String>,
}

impl RoomChange {
    pub fn new(hotel: &str, snapshot: RoomSnapshot, changed: &[&str]) -> Self {
        Self {
            hotel: hotel.to_string(),
            room_number: snapshot.number.clone(),
            snapshot,
            changed: changed.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Where committed room changes go. Injected into the engine so the core
/// stays testable without a live fan-out.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn room_changed(&self, change: RoomChange);
}

/// Broadcast hub: per-room channels for watch subscriptions.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<RoomChange>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes for a room. Creates the channel if needed.
    pub fn subscribe(&self, room_number: &str) -> broadcast::Receiver<RoomChange> {
        let sender = self
            .channels
            .entry(room_number.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeSink for NotifyHub {
    /// No-op if nobody is listening; a lagging receiver loses old frames,
    /// never blocks the sender.
    async fn room_changed(&self, change: RoomChange) {
        if let Some(sender) = self.channels.get(&change.room_number) {
            let _ = sender.send(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoomStatus;

    fn snapshot(number: &str) -> RoomSnapshot {
        RoomSnapshot {
            number: number.into(),
            status: RoomStatus::Occupied,
            is_occupied: true,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("101");

        let change = RoomChange::new("grand", snapshot("101"), &["room_status", "is_occupied"]);
        hub.room_changed(change.clone()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, change);
        assert_eq!(received.changed, vec!["room_status", "is_occupied"]);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic or block
        hub.room_changed(RoomChange::new("grand", snapshot("102"), &["room_status"]))
            .await;
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let hub = NotifyHub::new();
        let mut rx_101 = hub.subscribe("101");
        let _rx_102 = hub.subscribe("102");

        hub.room_changed(RoomChange::new("grand", snapshot("102"), &["room_status"]))
            .await;

        assert!(matches!(
            rx_101.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
