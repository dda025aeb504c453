use tokio::sync::broadcast;

use limelight_types::events::PushEvent;

/// Fans live pushes out to every connected dashboard. Events carry a topic
/// (`turn/{game_id}` or `client/{game_id}`); each connection filters for the
/// single topic it identified for.
#[derive(Clone)]
pub struct Dispatcher {
    broadcast_tx: broadcast::Sender<PushEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self { broadcast_tx }
    }

    /// Subscribe to the push stream. Each receiver filters by topic itself.
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Publish an event. Delivery is at-most-once: with no subscribers (or a
    /// lagged one) the event is simply dropped, and reconnecting dashboards
    /// re-poll the read API for current state.
    pub fn publish(&self, event: PushEvent) {
        let _ = self.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limelight_types::events::PushPayload;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        dispatcher.publish(PushEvent::secret(7, "abc123"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "client/7");
        match event.payload {
            PushPayload::Secret { value } => assert_eq!(value, "abc123"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let dispatcher = Dispatcher::new();
        // Must not error or block.
        dispatcher.publish(PushEvent::turn_update(1, "PENDING", "U1", "Ada", None));
    }

    #[tokio::test]
    async fn topics_separate_turn_and_client_feeds() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        dispatcher.publish(PushEvent::turn_update(3, "IN_PROGRESS", "U1", "Ada", Some(1.5)));
        dispatcher.publish(PushEvent::secret(3, "deadbeef"));

        assert_eq!(rx.recv().await.unwrap().topic, "turn/3");
        assert_eq!(rx.recv().await.unwrap().topic, "client/3");
    }
}
