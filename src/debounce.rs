//! Key-based debounce dispatcher.
//!
//! Rapid submissions under the same key collapse to the latest one: each
//! new call cancels the previous entry's future, and an effect only
//! fires if its entry is still the registry's current one when its
//! source settles. Supersession is silent; the displaced caller is
//! never told.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::future::{Future, FutureId, Promise};
use crate::owner::OwnerHandle;

static GLOBAL_REGISTRY: Lazy<DebounceRegistry> = Lazy::new(DebounceRegistry::new);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DebounceKey {
    owner_token: u64,
    name: String,
}

struct Entry {
    id: FutureId,
    cancel: Box<dyn Fn() + Send>,
}

/// Registry of the live pending future per debounce key.
///
/// Cheaply cloneable handle; clones share the same entry table. Entries
/// are mutated only through owner-thread marshaling (or direct calls on
/// the owner thread), never from worker threads.
#[derive(Clone)]
pub struct DebounceRegistry {
    entries: Arc<Mutex<HashMap<DebounceKey, Entry>>>,
}

impl DebounceRegistry {
    pub fn new() -> Self {
        DebounceRegistry {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Process-wide default registry.
    pub fn global() -> DebounceRegistry {
        GLOBAL_REGISTRY.clone()
    }

    /// Number of live (not yet settled or superseded) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn replace(&self, key: DebounceKey, entry: Entry) -> Option<Entry> {
        self.entries.lock().insert(key, entry)
    }

    fn current(&self, key: &DebounceKey) -> Option<FutureId> {
        self.entries.lock().get(key).map(|entry| entry.id)
    }

    /// Remove the entry iff it still belongs to `id` (it may have been
    /// superseded since).
    fn remove_if(&self, key: &DebounceKey, id: FutureId) {
        let mut entries = self.entries.lock();
        if entries.get(key).map(|entry| entry.id) == Some(id) {
            entries.remove(key);
        }
    }
}

impl Default for DebounceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `effect` with `source`'s value, unless a newer call under the
/// same `(owner_token, key)` supersedes this one first.
///
/// The previous entry for the key, if any, has its future canceled, so
/// its effect can never fire even if its underlying task still runs to
/// completion. The winning effect is invoked on the owner thread.
pub fn debounce<T, E>(
    registry: &DebounceRegistry,
    owner: &OwnerHandle,
    owner_token: u64,
    key: &str,
    source: &Future<T>,
    effect: E,
) where
    T: Clone + Send + 'static,
    E: FnOnce(T) + Send + 'static,
{
    let key = DebounceKey {
        owner_token,
        name: key.to_string(),
    };

    // Internal promise chained to the source: settles exactly when the
    // source does, and is what supersession cancels.
    let promise = Promise::new();
    let chained = promise.future();
    let id = chained.id();

    let superseded = registry.replace(
        key.clone(),
        Entry {
            id,
            cancel: {
                let chained = chained.clone();
                Box::new(move || chained.cancel())
            },
        },
    );
    if let Some(previous) = superseded {
        debug!("debounce: superseding entry for key {:?}", key.name);
        (previous.cancel)();
    }

    let on_done = {
        let registry = registry.clone();
        let owner = owner.clone();
        let key = key.clone();
        let chained = chained.clone();
        move || {
            let _ = owner.post(move || {
                if registry.current(&key) == Some(id) {
                    if let Some(Ok(value)) = chained.try_result() {
                        trace!("debounce: firing effect for key {:?}", key.name);
                        effect(value);
                    }
                }
                registry.remove_if(&key, id);
            });
        }
    };
    let on_canceled = {
        let registry = registry.clone();
        let owner = owner.clone();
        move || {
            let _ = owner.post(move || registry.remove_if(&key, id));
        }
    };
    chained.subscribe(on_done, on_canceled);

    promise.complete_with(source);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::Owner;
    use crate::pool::ThreadPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn only_the_latest_submission_fires() {
        let registry = DebounceRegistry::new();
        let owner = Owner::new();
        let handle = owner.handle();
        let first_fired = Arc::new(AtomicUsize::new(0));
        let second_fired = Arc::new(AtomicUsize::new(0));

        let first = Promise::new();
        let second = Promise::new();

        {
            let fired = Arc::clone(&first_fired);
            debounce(&registry, &handle, 1, "refresh", &first.future(), move |_: i32| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let fired = Arc::clone(&second_fired);
            debounce(&registry, &handle, 1, "refresh", &second.future(), move |_: i32| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Both sources resolve; only the second effect may run.
        first.complete(1);
        second.complete(2);
        owner.process_pending();

        assert_eq!(first_fired.load(Ordering::SeqCst), 0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let registry = DebounceRegistry::new();
        let owner = Owner::new();
        let handle = owner.handle();
        let fired = Arc::new(AtomicUsize::new(0));

        let a = Promise::new();
        let b = Promise::new();
        for (key, source) in [("save", &a), ("load", &b)] {
            let fired = Arc::clone(&fired);
            debounce(&registry, &handle, 1, key, &source.future(), move |_: i32| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        a.complete(1);
        b.complete(2);
        owner.process_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn distinct_owner_tokens_do_not_interfere() {
        let registry = DebounceRegistry::new();
        let owner = Owner::new();
        let handle = owner.handle();
        let fired = Arc::new(AtomicUsize::new(0));

        let a = Promise::new();
        let b = Promise::new();
        for (token, source) in [(1u64, &a), (2u64, &b)] {
            let fired = Arc::clone(&fired);
            debounce(&registry, &handle, token, "k", &source.future(), move |_: i32| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        a.complete(1);
        b.complete(2);
        owner.process_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn superseded_effect_never_fires_even_when_its_task_completes() {
        let registry = DebounceRegistry::new();
        let owner = Owner::new();
        let handle = owner.handle();
        let pool = ThreadPool::new(2);
        let winner = Arc::new(AtomicUsize::new(0));
        let loser = Arc::new(AtomicUsize::new(0));

        // The first task is slow but not interruptible; the pool still
        // runs it to completion. Its effect must be pre-empted anyway.
        let slow = pool.submit(
            |_: ()| {
                thread::sleep(Duration::from_millis(50));
                1i32
            },
            (),
        );
        let fast = pool.submit(|_: ()| 2i32, ());

        {
            let loser = Arc::clone(&loser);
            debounce(&registry, &handle, 7, "fetch", &slow, move |_| {
                loser.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let winner = Arc::clone(&winner);
            debounce(&registry, &handle, 7, "fetch", &fast, move |value| {
                assert_eq!(value, 2);
                winner.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Drain until the slow source has settled too.
        assert!(owner.wait_for(&slow, Some(Duration::from_secs(5))));
        owner.process_pending();

        assert_eq!(winner.load(Ordering::SeqCst), 1);
        assert_eq!(loser.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn entry_is_cleaned_up_after_completion() {
        let registry = DebounceRegistry::new();
        let owner = Owner::new();
        let handle = owner.handle();

        let source = Promise::new();
        debounce(&registry, &handle, 1, "only", &source.future(), |_: i32| {});
        assert_eq!(registry.len(), 1);

        source.complete(5);
        owner.process_pending();
        assert!(registry.is_empty());
    }

    #[test]
    fn global_registry_is_shared() {
        let a = DebounceRegistry::global();
        let b = DebounceRegistry::global();
        let owner = Owner::new();

        let source = Promise::new();
        debounce(&a, &owner.handle(), 99, "shared", &source.future(), |_: i32| {});
        assert_eq!(b.len(), a.len());

        source.complete(1);
        owner.process_pending();
    }
}
