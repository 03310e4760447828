// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event fan-out. Single `tokio::sync::broadcast` channel shared by every
//! component; preserves per-source FIFO order, no cross-component string
//! matching between emitter and subscriber.

use fleet_core::Event;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Lagged/closed subscribers never block the emitter; a dropped event is
    /// merely a disconnected observability reader, not an error.
    pub fn emit(&self, event: Event) {
        trace!(event = event.name(), "emitting event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{RepoId, WorkerName};

    #[tokio::test]
    async fn subscriber_receives_emitted_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(Event::WorkerCreated {
            repo_id: RepoId::new("acme/widgets"),
            name: WorkerName::new("w1"),
            kind: fleet_core::WorkerKind::Dynamic,
        });
        bus.emit(Event::WorkerRemoved {
            repo_id: RepoId::new("acme/widgets"),
            name: WorkerName::new("w1"),
        });

        assert_eq!(rx.recv().await.unwrap().name(), "worker:created");
        assert_eq!(rx.recv().await.unwrap().name(), "worker:removed");
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(Event::LeaderChanged { holder_id: fleet_core::HolderId::new("x"), term: 1 });
    }
}
