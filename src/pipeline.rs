//! Streaming pipeline: an open-ended mapper.
//!
//! Values can be appended while execution is underway; dispatch stays
//! bounded by the pool's capacity and each item's result is delivered to
//! its own future at the index it was appended. The aggregate future is
//! purely a progress handle: the stream is unbounded, so it never
//! reaches a terminal state.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::error::TaskError;
use crate::future::{Future, Promise};
use crate::owner::OwnerHandle;
use crate::pool::ThreadPool;

struct PipelineState<A, R> {
    inputs: Vec<Option<A>>,
    promises: Vec<Option<Promise<R>>>,
    results: Vec<Option<R>>,
    cursor: usize,
    running: usize,
    completed: usize,
    aggregate: Promise<()>,
}

/// Open-ended bounded-concurrency mapper over a shared pool.
pub struct Pipeline<A, R> {
    pool: ThreadPool,
    owner: OwnerHandle,
    worker: Arc<dyn Fn(A) -> R + Send + Sync>,
    state: Arc<Mutex<PipelineState<A, R>>>,
    aggregate_future: Future<()>,
}

impl<A, R> Pipeline<A, R>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new<F>(pool: &ThreadPool, owner: &OwnerHandle, worker: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let aggregate = Promise::new();
        let aggregate_future = aggregate.future();
        Pipeline {
            pool: pool.clone(),
            owner: owner.clone(),
            worker: Arc::new(worker),
            state: Arc::new(Mutex::new(PipelineState {
                inputs: Vec::new(),
                promises: Vec::new(),
                results: Vec::new(),
                cursor: 0,
                running: 0,
                completed: 0,
                aggregate,
            })),
            aggregate_future,
        }
    }

    /// Append a value and return the future for its result.
    ///
    /// The append and the dispatch attempt are marshaled onto the owner
    /// thread, serializing concurrent `add` calls against completion
    /// callbacks. The aggregate progress range widens to cover the new
    /// item.
    pub fn add(&self, value: A) -> Future<R> {
        let promise = Promise::new();
        let item_future = promise.future();

        let pool = self.pool.clone();
        let owner = self.owner.clone();
        let worker = Arc::clone(&self.worker);
        let state = Arc::clone(&self.state);
        let _ = self.owner.post(move || {
            {
                let mut st = state.lock();
                st.inputs.push(Some(value));
                st.promises.push(Some(promise));
                st.results.push(None);
                let total = st.inputs.len();
                st.aggregate.set_progress_range(0, total);
                trace!("pipeline: item {} appended", total - 1);
            }
            pump(&pool, &owner, &worker, &state);
        });
        item_future
    }

    /// Aggregate progress handle. It never terminates; observe
    /// [`Future::progress`] on it instead of waiting for completion.
    pub fn future(&self) -> Future<()> {
        self.aggregate_future.clone()
    }

    /// Snapshot of the ordered result accumulation so far: one slot per
    /// appended item, `None` while that item is still outstanding.
    pub fn results(&self) -> Vec<Option<R>> {
        self.state.lock().results.clone()
    }

    /// Number of items appended so far.
    pub fn len(&self) -> usize {
        self.state.lock().inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dispatch loop, owner thread only: keep submitting while capacity and
/// unsubmitted items remain.
fn pump<A, R>(
    pool: &ThreadPool,
    owner: &OwnerHandle,
    worker: &Arc<dyn Fn(A) -> R + Send + Sync>,
    state: &Arc<Mutex<PipelineState<A, R>>>,
) where
    A: Send + 'static,
    R: Clone + Send + 'static,
{
    loop {
        let (index, value) = {
            let mut st = state.lock();
            if st.running >= pool.max_concurrency() || st.cursor >= st.inputs.len() {
                return;
            }
            let index = st.cursor;
            st.cursor += 1;
            let Some(value) = st.inputs[index].take() else {
                continue;
            };
            st.running += 1;
            (index, value)
        };

        trace!("pipeline: dispatching item {}", index);
        let task = {
            let worker = Arc::clone(worker);
            pool.submit(move |arg| worker(arg), value)
        };

        let notify = {
            let pool = pool.clone();
            let owner = owner.clone();
            let worker = Arc::clone(worker);
            let state = Arc::clone(state);
            let task = task.clone();
            move || {
                let poster = owner.clone();
                let _ = poster.post(move || {
                    item_done(&pool, &owner, &worker, &state, index, &task);
                });
            }
        };
        task.subscribe(notify.clone(), notify);
    }
}

/// Owner-thread half of an item completion: deliver to the per-item
/// future, record the ordinal result, advance progress, and refill.
fn item_done<A, R>(
    pool: &ThreadPool,
    owner: &OwnerHandle,
    worker: &Arc<dyn Fn(A) -> R + Send + Sync>,
    state: &Arc<Mutex<PipelineState<A, R>>>,
    index: usize,
    task: &Future<R>,
) where
    A: Send + 'static,
    R: Clone + Send + 'static,
{
    let outcome = task.try_result().unwrap_or(Err(TaskError::Canceled));
    let promise = {
        let mut st = state.lock();
        st.running -= 1;
        st.completed += 1;
        if let Ok(value) = &outcome {
            st.results[index] = Some(value.clone());
        }
        st.aggregate.set_progress_value(st.completed);
        trace!("pipeline: item {} done ({} completed)", index, st.completed);
        st.promises[index].take()
    };

    // Deliver outside the state lock; a failure fails this item alone.
    if let Some(promise) = promise {
        match outcome {
            Ok(value) => promise.complete(value),
            Err(error) => promise.fail(error),
        }
    }
    pump(pool, owner, worker, state);
}
