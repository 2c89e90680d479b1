//! In-process publish/subscribe for snapshot updates.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

type Handler<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

struct Registration<K, V> {
    id: u64,
    /// `None` receives every topic.
    topic: Option<K>,
    handler: Handler<K, V>,
}

struct Registry<K, V> {
    next_id: u64,
    registrations: Vec<Registration<K, V>>,
}

/// Synchronous fan-out of `(topic, value)` pairs to registered handlers.
///
/// Handlers run on the emitting thread, in registration order. The handler
/// list is snapshotted before dispatch, so a handler may subscribe or
/// unsubscribe without deadlocking.
pub struct Notifier<K, V> {
    registry: Arc<Mutex<Registry<K, V>>>,
}

impl<K, V> Notifier<K, V>
where
    K: PartialEq + Send + Sync + 'static,
    V: 'static,
{
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                registrations: Vec::new(),
            })),
        }
    }

    /// Receive values emitted for `topic`.
    pub fn subscribe<F>(&self, topic: K, handler: F) -> Subscription
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.register(Some(topic), Arc::new(handler))
    }

    /// Receive values emitted for every topic.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, topic: Option<K>, handler: Handler<K, V>) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.registrations.push(Registration { id, topic, handler });
            id
        };

        let weak: Weak<Mutex<Registry<K, V>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.lock().registrations.retain(|r| r.id != id);
            }
        })
    }

    /// Deliver `value` to every handler subscribed to `topic`. Returns the
    /// number of handlers invoked.
    pub fn emit(&self, topic: &K, value: &V) -> usize {
        let handlers: Vec<Handler<K, V>> = self
            .registry
            .lock()
            .registrations
            .iter()
            .filter(|r| r.topic.as_ref().map_or(true, |t| t == topic))
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in &handlers {
            handler(topic, value);
        }
        trace!(handlers = handlers.len(), "Emitted update");
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().registrations.len()
    }
}

impl<K, V> Default for Notifier<K, V>
where
    K: PartialEq + Send + Sync + 'static,
    V: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop receiving values. Idempotent with drop.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_topic_subscribers_only_see_their_topic() {
        let notifier: Notifier<String, u32> = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = notifier.subscribe("a".to_string(), move |_, v| sink.lock().push(*v));

        notifier.emit(&"a".to_string(), &1);
        notifier.emit(&"b".to_string(), &2);
        notifier.emit(&"a".to_string(), &3);

        assert_eq!(*seen.lock(), vec![1, 3]);
    }

    #[test]
    fn test_subscribe_all_sees_every_topic() {
        let notifier: Notifier<String, u32> = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = notifier.subscribe_all(move |k, v| sink.lock().push((k.clone(), *v)));

        assert_eq!(notifier.emit(&"a".to_string(), &1), 1);
        notifier.emit(&"b".to_string(), &2);

        assert_eq!(*seen.lock(), vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let notifier: Notifier<&'static str, ()> = Notifier::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let sub = notifier.subscribe("k", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        notifier.emit(&"k", &());
        sub.unsubscribe();
        notifier.emit(&"k", &());

        let counter = Arc::clone(&count);
        drop(notifier.subscribe("k", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        notifier.emit(&"k", &());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let notifier: Arc<Notifier<&'static str, ()>> = Arc::new(Notifier::new());
        let nested = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::clone(&notifier);
        let keep = Arc::clone(&nested);
        let _sub = notifier.subscribe("k", move |_, _| {
            keep.lock().push(inner.subscribe("k", |_, _| {}));
        });

        notifier.emit(&"k", &());
        assert_eq!(notifier.subscriber_count(), 2);
    }

    #[test]
    fn test_subscription_outliving_notifier_is_harmless() {
        let notifier: Notifier<&'static str, ()> = Notifier::new();
        let sub = notifier.subscribe("k", |_, _| {});
        drop(notifier);
        sub.unsubscribe();
    }
}
