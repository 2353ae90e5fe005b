//! Future/Promise primitive shared by every component in the toolkit.
//!
//! A `Promise<T>` is the write side: it settles the shared state exactly
//! once with a value, a failure, or a cancellation. A `Future<T>` is the
//! cheaply cloneable read side: it can poll, block, or subscribe a
//! one-shot callback pair. Progress reporting rides along so aggregate
//! futures can expose completion fractions without finishing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{TaskError, TaskResult};

static NEXT_FUTURE_ID: AtomicUsize = AtomicUsize::new(1);

/// Stable identity token for a future's shared state.
///
/// Two handles compare equal iff they observe the same underlying result
/// slot. Used by the debounce registry to decide whether an entry has
/// been superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FutureId(usize);

/// Snapshot of a future's progress range and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub min: usize,
    pub max: usize,
    pub value: usize,
}

impl Progress {
    /// Completion fraction in `[0.0, 1.0]`; `0.0` while the range is empty.
    pub fn fraction(&self) -> f64 {
        if self.max > self.min {
            self.value.saturating_sub(self.min) as f64 / (self.max - self.min) as f64
        } else {
            0.0
        }
    }
}

type Callback = Box<dyn FnOnce() + Send>;

struct Inner<T> {
    outcome: Option<TaskResult<T>>,
    // One-shot (on_done, on_canceled) pairs; at most one side of each
    // pair ever runs, exactly once, when the state settles.
    callbacks: Vec<(Callback, Callback)>,
    progress: Progress,
}

struct Shared<T> {
    id: usize,
    state: Mutex<Inner<T>>,
    settled: Condvar,
}

impl<T> Shared<T> {
    fn new() -> Arc<Self> {
        Arc::new(Shared {
            id: NEXT_FUTURE_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(Inner {
                outcome: None,
                callbacks: Vec::new(),
                progress: Progress::default(),
            }),
            settled: Condvar::new(),
        })
    }

    /// Settle exactly once; later attempts are silent no-ops.
    /// Callbacks run outside the lock.
    fn settle(&self, outcome: TaskResult<T>) {
        let canceled = matches!(outcome, Err(TaskError::Canceled));
        let callbacks = {
            let mut inner = self.state.lock();
            if inner.outcome.is_some() {
                return;
            }
            inner.outcome = Some(outcome);
            std::mem::take(&mut inner.callbacks)
        };
        self.settled.notify_all();
        for (on_done, on_canceled) in callbacks {
            if canceled {
                on_canceled();
            } else {
                on_done();
            }
        }
    }
}

/// Read handle to an eventual single result.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Future<T> {
    /// Identity token shared by all clones of this future.
    pub fn id(&self) -> FutureId {
        FutureId(self.shared.id)
    }

    /// True once the future has settled (value, failure, or cancellation).
    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// True iff the future settled by cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self.shared.state.lock().outcome,
            Some(Err(TaskError::Canceled))
        )
    }

    /// Cancel the future. A no-op if it already settled.
    pub fn cancel(&self) {
        self.shared.settle(Err(TaskError::Canceled));
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> Progress {
        self.shared.state.lock().progress
    }

    /// Register a one-shot callback pair. If the future already settled,
    /// the matching side is invoked immediately on the calling thread.
    pub fn subscribe<D, C>(&self, on_done: D, on_canceled: C)
    where
        D: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let done = {
            let mut inner = self.shared.state.lock();
            match &inner.outcome {
                None => {
                    inner
                        .callbacks
                        .push((Box::new(on_done), Box::new(on_canceled)));
                    return;
                }
                Some(Err(TaskError::Canceled)) => false,
                Some(_) => true,
            }
        };
        if done {
            on_done();
        } else {
            on_canceled();
        }
    }
}

impl<T: Clone> Future<T> {
    /// The settled outcome, if any, without waiting.
    pub fn try_result(&self) -> Option<TaskResult<T>> {
        self.shared.state.lock().outcome.clone()
    }

    /// Block the calling thread until the future settles.
    ///
    /// Intended for worker-side or test use; the owner thread should use
    /// [`Owner::wait_for`](crate::owner::Owner::wait_for) instead so its
    /// marshaling queue keeps draining.
    pub fn result(&self) -> TaskResult<T> {
        let mut inner = self.shared.state.lock();
        while inner.outcome.is_none() {
            self.shared.settled.wait(&mut inner);
        }
        match &inner.outcome {
            Some(outcome) => outcome.clone(),
            None => Err(TaskError::Canceled),
        }
    }
}

/// Write handle used to settle a [`Future`] exactly once.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Promise {
            shared: Shared::new(),
        }
    }

    /// A read handle onto this promise's result slot.
    pub fn future(&self) -> Future<T> {
        Future {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Complete with a value. A no-op if already settled.
    pub fn complete(&self, value: T) {
        self.shared.settle(Ok(value));
    }

    /// Fail with an error. A no-op if already settled.
    pub fn fail(&self, error: TaskError) {
        self.shared.settle(Err(error));
    }

    /// Cancel. A no-op if already settled.
    pub fn cancel(&self) {
        self.shared.settle(Err(TaskError::Canceled));
    }

    /// Widen or narrow the progress range.
    pub fn set_progress_range(&self, min: usize, max: usize) {
        let mut inner = self.shared.state.lock();
        inner.progress.min = min;
        inner.progress.max = max;
    }

    /// Report a progress value within the current range.
    pub fn set_progress_value(&self, value: usize) {
        self.shared.state.lock().progress.value = value;
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Chain this promise to `source`: it settles exactly when the source
    /// does, mirroring its value, failure, or cancellation.
    pub fn complete_with(&self, source: &Future<T>) {
        let on_done = {
            let promise = self.clone();
            let source = source.clone();
            move || match source.try_result() {
                Some(Ok(value)) => promise.complete(value),
                Some(Err(error)) => promise.fail(error),
                None => {}
            }
        };
        let on_canceled = {
            let promise = self.clone();
            move || promise.cancel()
        };
        source.subscribe(on_done, on_canceled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn complete_then_result() {
        let promise = Promise::new();
        let future = promise.future();
        assert!(!future.is_finished());

        promise.complete(42);
        assert!(future.is_finished());
        assert!(!future.is_canceled());
        assert_eq!(future.result(), Ok(42));
        assert_eq!(future.try_result(), Some(Ok(42)));
    }

    #[test]
    fn result_blocks_until_settled() {
        let promise = Promise::new();
        let future = promise.future();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.complete("done".to_string());
        });

        assert_eq!(future.result(), Ok("done".to_string()));
        writer.join().unwrap();
    }

    #[test]
    fn settles_exactly_once() {
        let promise = Promise::new();
        let future = promise.future();
        let fired = Arc::new(AtomicUsize::new(0));

        {
            let fired = Arc::clone(&fired);
            future.subscribe(
                move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                },
                || {},
            );
        }

        promise.complete(1);
        promise.complete(2);
        promise.fail(TaskError::Canceled);
        promise.cancel();

        assert_eq!(future.result(), Ok(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_after_settlement_fires_immediately() {
        let promise = Promise::new();
        let future = promise.future();
        promise.complete(7);

        let fired = Arc::new(AtomicBool::new(false));
        {
            let fired = Arc::clone(&fired);
            future.subscribe(
                move || {
                    fired.store(true, Ordering::SeqCst);
                },
                || panic!("completed future must not report cancellation"),
            );
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_invokes_cancellation_side() {
        let promise: Promise<i32> = Promise::new();
        let future = promise.future();
        let canceled = Arc::new(AtomicBool::new(false));

        {
            let canceled = Arc::clone(&canceled);
            future.subscribe(
                || panic!("canceled future must not report completion"),
                move || {
                    canceled.store(true, Ordering::SeqCst);
                },
            );
        }

        future.cancel();
        assert!(future.is_canceled());
        assert!(canceled.load(Ordering::SeqCst));
        assert_eq!(future.try_result(), Some(Err(TaskError::Canceled)));
    }

    #[test]
    fn failure_counts_as_done_not_canceled() {
        let promise: Promise<i32> = Promise::new();
        let future = promise.future();
        promise.fail(TaskError::Panicked("boom".into()));

        assert!(future.is_finished());
        assert!(!future.is_canceled());
        assert_eq!(
            future.try_result(),
            Some(Err(TaskError::Panicked("boom".into())))
        );
    }

    #[test]
    fn chained_promise_mirrors_source() {
        let source = Promise::new();
        let chained = Promise::new();
        chained.complete_with(&source.future());

        source.complete(9);
        assert_eq!(chained.future().result(), Ok(9));

        let source: Promise<i32> = Promise::new();
        let chained = Promise::new();
        chained.complete_with(&source.future());
        source.future().cancel();
        assert!(chained.future().is_canceled());
    }

    #[test]
    fn canceling_chained_future_leaves_source_alone() {
        let source: Promise<i32> = Promise::new();
        let chained = Promise::new();
        chained.complete_with(&source.future());

        chained.future().cancel();
        assert!(chained.future().is_canceled());
        assert!(!source.future().is_finished());
    }

    #[test]
    fn progress_reporting() {
        let promise: Promise<()> = Promise::new();
        let future = promise.future();
        assert_eq!(future.progress().fraction(), 0.0);

        promise.set_progress_range(0, 4);
        promise.set_progress_value(1);
        let p = future.progress();
        assert_eq!((p.min, p.max, p.value), (0, 4, 1));
        assert_eq!(p.fraction(), 0.25);
    }

    #[test]
    fn ids_are_stable_across_clones_and_unique_across_futures() {
        let a = Promise::<i32>::new();
        let b = Promise::<i32>::new();
        assert_eq!(a.future().id(), a.future().clone().id());
        assert_ne!(a.future().id(), b.future().id());
    }
}
