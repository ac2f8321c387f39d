//! Replaying broadcast registry.
//!
//! A `Broadcast<T>` holds the most recent value plus a list of subscriber
//! callbacks. Callbacks run synchronously on `publish`, and a new subscriber
//! is handed the current value immediately, so late subscribers never start
//! empty. Delivery is serialized: a subscriber sees values in publish order,
//! and its replay never races ahead of a concurrent publish.
//!
//! Callbacks must not subscribe to the same broadcast they are invoked from.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Arc<dyn Fn(Arc<T>) + Send + Sync>;

pub struct Broadcast<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    delivery: Mutex<()>,
    state: Mutex<State<T>>,
}

struct State<T> {
    latest: Option<Arc<T>>,
    subscribers: Vec<(u64, Callback<T>)>,
    next_id: u64,
}

fn lock<G>(mutex: &Mutex<G>) -> MutexGuard<'_, G> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Send + Sync + 'static> Broadcast<T> {
    pub fn new() -> Self {
        Self::from_latest(None)
    }

    pub fn with_initial(value: T) -> Self {
        Self::from_latest(Some(Arc::new(value)))
    }

    fn from_latest(latest: Option<Arc<T>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                delivery: Mutex::new(()),
                state: Mutex::new(State {
                    latest,
                    subscribers: Vec::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    pub fn publish(&self, value: T) -> Arc<T> {
        self.publish_arc(Arc::new(value))
    }

    /// Replaces the current value and delivers it to every subscriber.
    pub fn publish_arc(&self, value: Arc<T>) -> Arc<T> {
        self.replace_with(|_| value)
    }

    /// Applies `f` to a copy of the current value and publishes the result.
    /// The read and the publish happen as one step, so concurrent updates
    /// never lose each other's changes. `f` must not touch this broadcast.
    pub fn update<F>(&self, f: F) -> Arc<T>
    where
        T: Clone + Default,
        F: FnOnce(&mut T),
    {
        self.replace_with(|current| {
            let mut next = current.map(|c| (**c).clone()).unwrap_or_default();
            f(&mut next);
            Arc::new(next)
        })
    }

    fn replace_with<F>(&self, next: F) -> Arc<T>
    where
        F: FnOnce(Option<&Arc<T>>) -> Arc<T>,
    {
        let _delivery = lock(&self.shared.delivery);
        let (value, subscribers) = {
            let mut state = lock(&self.shared.state);
            let value = next(state.latest.as_ref());
            state.latest = Some(value.clone());
            let subscribers: Vec<Callback<T>> =
                state.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            (value, subscribers)
        };

        for callback in subscribers {
            callback(value.clone());
        }
        value
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        lock(&self.shared.state).latest.clone()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);

        let _delivery = lock(&self.shared.delivery);
        let (id, replay) = {
            let mut state = lock(&self.shared.state);
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, callback.clone()));
            (id, state.latest.clone())
        };

        if let Some(current) = replay {
            callback(current);
        }

        let registry: Arc<dyn Unsubscribe> = self.shared.clone();
        Subscription {
            id,
            registry: Some(Arc::downgrade(&registry)),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.state).subscribers.len()
    }
}

impl<T: Send + Sync + 'static> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

impl<T: Send + Sync> Unsubscribe for Shared<T> {
    fn unsubscribe(&self, id: u64) {
        lock(&self.state).subscribers.retain(|(sub_id, _)| *sub_id != id);
    }
}

/// Handle for one registered observer. Dropping it detaches the observer.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Option<Weak<dyn Unsubscribe>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
