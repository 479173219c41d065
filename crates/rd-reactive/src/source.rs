//! Local observer lists
//!
//! Observers are registered for a lifetime and removed when it terminates.
//! Notification runs outside the lock, on a snapshot of the observers, so an
//! observer may advise, unadvise or mutate the source it observes.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use rd_core::Lifetime;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Observers<T> {
    next_key: u64,
    entries: Vec<(u64, Observer<T>)>,
}

/// A stream of events of type `T`
pub struct Source<T> {
    observers: Arc<Mutex<Observers<T>>>,
}

impl<T: 'static> Source<T> {
    pub fn new() -> Self {
        Source {
            observers: Arc::new(Mutex::new(Observers {
                next_key: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Number of live observers
    pub fn len(&self) -> usize {
        self.observers.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observe events until `lifetime` terminates.
    ///
    /// Returns `false` without registering if `lifetime` is not alive.
    pub fn advise(&self, lifetime: &Lifetime, observer: impl Fn(&T) + Send + Sync + 'static) -> bool {
        if !lifetime.is_alive() {
            return false;
        }

        let key = {
            let mut observers = self.observers.lock();
            let key = observers.next_key;
            observers.next_key += 1;
            observers.entries.push((key, Arc::new(observer)));
            key
        };

        let weak: Weak<Mutex<Observers<T>>> = Arc::downgrade(&self.observers);
        let registered = lifetime.try_on_termination(move || {
            if let Some(observers) = weak.upgrade() {
                observers.lock().entries.retain(|(k, _)| *k != key);
            }
        });
        if !registered {
            self.observers.lock().entries.retain(|(k, _)| *k != key);
        }
        registered
    }

    /// Notify every observer registered at the time of the call
    pub fn fire(&self, value: &T) {
        let snapshot: Vec<Observer<T>> = self
            .observers
            .lock()
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in snapshot {
            observer(value);
        }
    }
}

impl<T: 'static> Default for Source<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rd_core::LifetimeDefinition;

    #[test]
    fn test_observers_are_removed_with_lifetime() {
        let source = Source::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let def = LifetimeDefinition::new();
        let sink = Arc::clone(&seen);
        assert!(source.advise(&def.lifetime(), move |v| sink.lock().push(*v)));

        source.fire(&1);
        def.terminate();
        source.fire(&2);

        assert_eq!(*seen.lock(), vec![1]);
        assert!(source.is_empty());
    }

    #[test]
    fn test_advise_on_dead_lifetime_is_rejected() {
        let source = Source::<u32>::new();
        assert!(!source.advise(&Lifetime::terminated(), |_| {}));
        assert!(source.is_empty());
    }

    #[test]
    fn test_observer_may_advise_during_fire() {
        let source = Arc::new(Source::<u32>::new());
        let inner = Arc::clone(&source);
        source.advise(&Lifetime::eternal(), move |_| {
            inner.advise(&Lifetime::eternal(), |_| {});
        });
        source.fire(&0);
        assert_eq!(source.len(), 2);
    }
}
