//! Change notifier: turns store change events into reconcile requests.
//!
//! Only `WebUi` events matter: child identities are derived from the parent,
//! so children are never watched directly. Events are hints, not deltas. If
//! the receiver falls behind and events are dropped, the notifier asks for a
//! full resync instead.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use webui_state::{ChangeEvent, Kind, ObjectKey};

/// What the controller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// This parent may have changed.
    Changed(ObjectKey),
    /// Notifications were lost; re-check every parent.
    Resync,
}

pub struct ChangeNotifier {
    events: broadcast::Receiver<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new(events: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { events }
    }

    /// Next notification, or `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.kind == Kind::WebUi => {
                    return Some(Notification::Changed(event.key));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "change notifications dropped, requesting resync");
                    return Some(Notification::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webui_state::ChangeOp;

    fn event(kind: Kind, name: &str) -> ChangeEvent {
        ChangeEvent {
            kind,
            key: ObjectKey::new("ns", name),
            op: ChangeOp::Updated,
        }
    }

    #[tokio::test]
    async fn only_webui_events_are_forwarded() {
        let (tx, rx) = broadcast::channel(16);
        let mut notifier = ChangeNotifier::new(rx);

        tx.send(event(Kind::Workload, "webui-a")).unwrap();
        tx.send(event(Kind::ContentStore, "webui-a")).unwrap();
        tx.send(event(Kind::WebUi, "a")).unwrap();

        assert_eq!(
            notifier.next().await,
            Some(Notification::Changed(ObjectKey::new("ns", "a")))
        );
    }

    #[tokio::test]
    async fn lagging_receiver_requests_resync() {
        let (tx, rx) = broadcast::channel(2);
        let mut notifier = ChangeNotifier::new(rx);

        for name in ["a", "b", "c", "d"] {
            tx.send(event(Kind::WebUi, name)).unwrap();
        }

        assert_eq!(notifier.next().await, Some(Notification::Resync));
        // The retained tail is still delivered.
        assert_eq!(
            notifier.next().await,
            Some(Notification::Changed(ObjectKey::new("ns", "c")))
        );
    }

    #[tokio::test]
    async fn closed_channel_ends_the_stream() {
        let (tx, rx) = broadcast::channel::<ChangeEvent>(4);
        let mut notifier = ChangeNotifier::new(rx);
        drop(tx);
        assert_eq!(notifier.next().await, None);
    }
}
