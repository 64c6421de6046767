//! Change notifications for UI subscribers

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::{Cart, UserIdentity};

/// Kinds of change a subscriber can listen for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    CartUpdate,
    UserUpdate,
    SignOut,
}

/// Payload delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The cart changed (locally, from another tab, or from the server)
    CartUpdate(Cart),
    /// The signed-in user changed; `None` after sign-out
    UserUpdate(Option<UserIdentity>),
    /// The session ended
    SignOut,
}

impl StoreEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            StoreEvent::CartUpdate(_) => EventType::CartUpdate,
            StoreEvent::UserUpdate(_) => EventType::UserUpdate,
            StoreEvent::SignOut => EventType::SignOut,
        }
    }
}

/// Handle returned by `on_change`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Registry of change callbacks
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriptionId, EventType, Callback)>>,
}

impl Subscribers {
    pub fn subscribe<F>(&self, event_type: EventType, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, event_type, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _, _)| *entry_id != id);
        entries.len() != before
    }

    /// Invoke every matching callback synchronously, in subscription order.
    /// The registry lock is released first so callbacks may (un)subscribe.
    pub fn emit(&self, event: &StoreEvent) {
        let event_type = event.event_type();
        let matching: Vec<Callback> = self
            .entries
            .read()
            .iter()
            .filter(|(_, ty, _)| *ty == event_type)
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();
        for callback in matching {
            callback(event);
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_filters_by_type() {
        let subscribers = Subscribers::default();
        let carts = Arc::new(AtomicUsize::new(0));
        let sign_outs = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&carts);
        subscribers.subscribe(EventType::CartUpdate, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let s = Arc::clone(&sign_outs);
        subscribers.subscribe(EventType::SignOut, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        subscribers.emit(&StoreEvent::CartUpdate(Cart::new()));
        subscribers.emit(&StoreEvent::CartUpdate(Cart::new()));
        subscribers.emit(&StoreEvent::SignOut);

        assert_eq!(carts.load(Ordering::SeqCst), 2);
        assert_eq!(sign_outs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let subscribers = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = subscribers.subscribe(EventType::UserUpdate, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscribers.unsubscribe(id));
        assert!(!subscribers.unsubscribe(id));
        subscribers.emit(&StoreEvent::UserUpdate(None));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
