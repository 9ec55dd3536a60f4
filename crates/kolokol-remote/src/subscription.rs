use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use kolokol_shared::{RemoteEvent, Topic, TopicEvent};

/// Where a subscription delivers its events.
pub type EventSink = mpsc::UnboundedSender<TopicEvent>;

/// Handle to a live subscription.
///
/// The disposer runs exactly once: on [`Subscription::unsubscribe`] or when
/// the handle is dropped, whichever comes first.
pub struct Subscription {
    topic: Topic,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(topic: Topic, disposer: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            topic,
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn unsubscribe(mut self) {
        self.dispose();
    }

    fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            trace!(topic = %self.topic, "Disposing subscription");
            disposer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.disposer.is_some())
            .finish()
    }
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    listeners: HashMap<Topic, Vec<(u64, EventSink)>>,
}

/// Fan-out of topic events to registered sinks.
#[derive(Clone, Default)]
pub struct SubscriptionHub {
    inner: Arc<Mutex<HubInner>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic, sink: EventSink) -> Subscription {
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                inner.next_id += 1;
                let id = inner.next_id;
                inner
                    .listeners
                    .entry(topic.clone())
                    .or_default()
                    .push((id, sink));
                id
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Subscription hub lock poisoned");
                0
            }
        };

        debug!(topic = %topic, id, "Subscribed");

        let hub: Weak<Mutex<HubInner>> = Arc::downgrade(&self.inner);
        let key = topic.clone();
        Subscription::new(topic, move || {
            let Some(shared) = hub.upgrade() else {
                return;
            };
            if let Ok(mut inner) = shared.lock() {
                if let Some(list) = inner.listeners.get_mut(&key) {
                    list.retain(|(listener, _)| *listener != id);
                    if list.is_empty() {
                        inner.listeners.remove(&key);
                    }
                }
            };
        })
    }

    /// Deliver an event to every listener of `topic`. Returns how many sinks
    /// accepted it; closed sinks are pruned.
    pub fn publish(&self, topic: &Topic, event: RemoteEvent) -> usize {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(_) => return 0,
        };
        let Some(list) = inner.listeners.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        list.retain(|(_, sink)| {
            let ok = sink
                .send(TopicEvent {
                    topic: topic.clone(),
                    event: event.clone(),
                })
                .is_ok();
            if ok {
                delivered += 1;
            }
            ok
        });
        if list.is_empty() {
            inner.listeners.remove(topic);
        }

        trace!(topic = %topic, delivered, "Published event");
        delivered
    }

    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.listeners.get(topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kolokol_shared::UserId;

    fn status_event() -> RemoteEvent {
        RemoteEvent::UserStatusChanged {
            user_id: UserId::from("2"),
            is_online: true,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn drop_disposes_exactly_once() {
        let hub = SubscriptionHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sub = hub.subscribe(Topic::UserStatus, tx);
        assert_eq!(hub.listener_count(&Topic::UserStatus), 1);
        drop(sub);
        assert_eq!(hub.listener_count(&Topic::UserStatus), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = SubscriptionHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = hub.subscribe(Topic::UserStatus, tx);

        assert_eq!(hub.publish(&Topic::UserStatus, status_event()), 1);
        sub.unsubscribe();
        assert_eq!(hub.publish(&Topic::UserStatus, status_event()), 0);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_sinks_are_pruned() {
        let hub = SubscriptionHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let _sub = hub.subscribe(Topic::UserStatus, tx);
        drop(rx);
        assert_eq!(hub.publish(&Topic::UserStatus, status_event()), 0);
        assert_eq!(hub.listener_count(&Topic::UserStatus), 0);
    }

    #[test]
    fn disposing_one_listener_keeps_the_others() {
        let hub = SubscriptionHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = hub.subscribe(Topic::UserStatus, tx.clone());
        let _second = hub.subscribe(Topic::UserStatus, tx);
        assert_eq!(hub.listener_count(&Topic::UserStatus), 2);

        first.unsubscribe();
        assert_eq!(hub.listener_count(&Topic::UserStatus), 1);
        assert_eq!(hub.publish(&Topic::UserStatus, status_event()), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn disposing_after_the_hub_is_gone() {
        let hub = SubscriptionHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sub = hub.subscribe(Topic::UserStatus, tx);
        drop(hub);
        sub.unsubscribe();
    }
}
