//! Per-task progress broadcast.
//!
//! One broadcast channel per task. Publishers never block; a lagging
//! subscriber loses old events (at-most-once). Late subscribers receive the
//! latest snapshot before live events, so a client attaching mid-pipeline
//! sees where the task stands immediately.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use es_domain::progress::ProgressEvent;

const CHANNEL_CAPACITY: usize = 64;

pub struct ProgressBroadcaster {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
    snapshots: RwLock<HashMap<Uuid, ProgressEvent>>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Publish an event for a task. Events for one task are published from
    /// one worker, so per-subscriber delivery order matches publish order.
    pub fn publish(&self, event: ProgressEvent) {
        let task_id = event.task_id;
        self.snapshots.write().insert(task_id, event.clone());

        let sender = self.channels.read().get(&task_id).cloned();
        if let Some(sender) = sender {
            // Send fails only when no subscriber is listening; that's fine.
            let _ = sender.send(event.clone());
        }

        if event.is_terminal() {
            // The channel stays up for already-attached subscribers (they
            // hold receivers); new subscribers get the snapshot.
            self.channels.write().remove(&task_id);
        }
    }

    /// Subscribe to a task's events. Returns the current snapshot (if the
    /// task has ever reported) plus a live receiver.
    pub fn subscribe(
        &self,
        task_id: Uuid,
    ) -> (Option<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        let snapshot = self.snapshots.read().get(&task_id).cloned();
        let mut channels = self.channels.write();
        let sender = channels
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        (snapshot, sender.subscribe())
    }

    /// Drop snapshot state for a task (after deletion).
    pub fn forget(&self, task_id: Uuid) {
        self.channels.write().remove(&task_id);
        self.snapshots.write().remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use es_domain::task::{StageType, TaskStatus};

    fn event(task_id: Uuid, progress: u8) -> ProgressEvent {
        ProgressEvent::progress(task_id, TaskStatus::Transcribing, StageType::Transcribe, progress)
    }

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let b = ProgressBroadcaster::new();
        let id = Uuid::new_v4();
        let (snapshot, mut rx) = b.subscribe(id);
        assert!(snapshot.is_none());

        for p in [25, 40, 55] {
            b.publish(event(id, p));
        }
        for expected in [25, 40, 55] {
            assert_eq!(rx.recv().await.unwrap().progress, expected);
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_snapshot() {
        let b = ProgressBroadcaster::new();
        let id = Uuid::new_v4();
        b.publish(event(id, 45));

        let (snapshot, _rx) = b.subscribe(id);
        assert_eq!(snapshot.unwrap().progress, 45);
    }

    #[tokio::test]
    async fn terminal_event_reaches_attached_subscriber() {
        let b = ProgressBroadcaster::new();
        let id = Uuid::new_v4();
        let (_, mut rx) = b.subscribe(id);

        b.publish(ProgressEvent::completed(id));
        let got = rx.recv().await.unwrap();
        assert!(got.is_terminal());
        assert_eq!(got.progress, 100);

        // Snapshot persists for late subscribers after completion.
        let (snapshot, _) = b.subscribe(id);
        assert_eq!(snapshot.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn tasks_are_isolated() {
        let b = ProgressBroadcaster::new();
        let a = Uuid::new_v4();
        let c = Uuid::new_v4();
        let (_, mut rx_a) = b.subscribe(a);

        b.publish(event(c, 60));
        b.publish(event(a, 30));
        assert_eq!(rx_a.recv().await.unwrap().progress, 30);
        assert!(rx_a.try_recv().is_err());
    }
}
