use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback list notified synchronously on the caller's task.
///
/// Callbacks are invoked after the internal lock is released, so a callback
/// may subscribe or unsubscribe without deadlocking.
pub struct Observers<T> {
    callbacks: Mutex<Vec<(ObserverId, Callback<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> Observers<T> {
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }

    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }
}

/// A value plus the observers told about each change to it.
pub struct Observable<T> {
    value: Mutex<T>,
    observers: Observers<T>,
}

impl<T: Clone> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            observers: Observers::default(),
        }
    }

    pub fn get(&self) -> T {
        (*self.value.lock()).clone()
    }

    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    /// Mutates in place. Observers get a copy taken under the lock, and no
    /// copy is made while nobody is subscribed.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> R {
        let (result, changed) = {
            let mut guard = self.value.lock();
            let result = mutate(&mut *guard);
            let changed = (!self.observers.is_empty()).then(|| (*guard).clone());
            (result, changed)
        };
        if let Some(changed) = changed {
            self.observers.notify(&changed);
        }
        result
    }

    /// Stores `value` without notifying; pair with [`Observable::publish`].
    pub(crate) fn set_quietly(&self, value: T) {
        *self.value.lock() = value;
    }

    /// Notifies observers of the current value.
    pub(crate) fn publish(&self) {
        if self.observers.is_empty() {
            return;
        }
        let current = self.get();
        self.observers.notify(&current);
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ObserverId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notifies_every_subscriber_on_change() {
        let observable = Observable::new(0_i32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        observable.subscribe(move |value| first.lock().push(("first", *value)));
        observable.subscribe(move |value| second.lock().push(("second", *value)));

        observable.set(7);

        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
        assert_eq!(observable.get(), 7);
    }

    #[test]
    fn unsubscribed_callback_stops_receiving() {
        let observable = Observable::new(String::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = observable.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observable.set("a".to_string());
        assert!(observable.unsubscribe(id));
        assert!(!observable.unsubscribe(id));
        observable.set("b".to_string());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct CountedClone(Arc<AtomicUsize>);

    impl Clone for CountedClone {
        fn clone(&self) -> Self {
            self.0.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(&self.0))
        }
    }

    #[test]
    fn update_without_observers_does_not_copy() {
        let clones = Arc::new(AtomicUsize::new(0));
        let observable = Observable::new(CountedClone(Arc::clone(&clones)));

        for _ in 0..10 {
            observable.update(|_| ());
        }
        assert_eq!(clones.load(Ordering::SeqCst), 0);

        let id = observable.subscribe(|_| ());
        observable.update(|_| ());
        assert_eq!(clones.load(Ordering::SeqCst), 1);

        observable.unsubscribe(id);
        observable.update(|_| ());
        assert_eq!(clones.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quiet_set_waits_for_publish() {
        let observable = Observable::new(0_u8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        observable.subscribe(move |value| sink.lock().push(*value));

        observable.set_quietly(3);
        assert!(seen.lock().is_empty());
        observable.publish();

        assert_eq!(*seen.lock(), vec![3]);
    }

    #[test]
    fn callback_may_read_the_observable_it_watches() {
        let observable = Arc::new(Observable::new(1_u32));
        let seen = Arc::new(AtomicUsize::new(0));
        let reader = Arc::clone(&observable);
        let sink = Arc::clone(&seen);
        observable.subscribe(move |_| {
            sink.store(reader.get() as usize, Ordering::SeqCst);
        });

        observable.update(|value| *value += 4);

        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
