//! Bounded ordered mapper.
//!
//! [`mapped`] fans a fixed input sequence out over the pool with at most
//! `min(pool.max_concurrency(), N)` tasks in flight, and fans the results
//! back into a single future whose output order always equals input
//! order, no matter how completions interleave.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::error::{TaskError, TaskResult};
use crate::future::{Future, Promise};
use crate::owner::{Owner, OwnerHandle};
use crate::pool::ThreadPool;

struct MapState<A, R> {
    inputs: Vec<Option<A>>,
    slots: Vec<Option<R>>,
    // Per-task futures retained until their slot settles, then released.
    tasks: Vec<Option<Future<R>>>,
    cursor: usize,
    finished: usize,
    failed: bool,
    aggregate: Promise<Vec<R>>,
}

/// Map `inputs` through `worker` on `pool`, preserving input order.
///
/// All bookkeeping runs on the owner thread behind `owner`; the returned
/// aggregate future completes exactly once, when every slot has settled.
/// The first failed slot fails the aggregate and stops further dispatch;
/// already in-flight tasks settle without corrupting other slots.
/// Canceling the aggregate does not preempt in-flight pool tasks.
pub fn mapped<A, R, F>(
    pool: &ThreadPool,
    owner: &OwnerHandle,
    inputs: Vec<A>,
    worker: F,
) -> Future<Vec<R>>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    let aggregate = Promise::new();
    let future = aggregate.future();
    let total = inputs.len();
    aggregate.set_progress_range(0, total);

    if total == 0 {
        aggregate.complete(Vec::new());
        return future;
    }

    let window = pool.max_concurrency().min(total);
    trace!("mapped: {} inputs, {} in flight", total, window);

    let state = Arc::new(Mutex::new(MapState {
        inputs: inputs.into_iter().map(Some).collect(),
        slots: (0..total).map(|_| None).collect(),
        tasks: (0..total).map(|_| None).collect(),
        cursor: 0,
        finished: 0,
        failed: false,
        aggregate,
    }));
    let worker = Arc::new(worker);

    for _ in 0..window {
        dispatch_next(pool, owner, &state, &worker);
    }
    future
}

/// [`mapped`] driven to completion with the owner loop running, so the
/// owner thread keeps processing marshaled work while it waits.
pub fn blocking_mapped<A, R, F>(
    pool: &ThreadPool,
    owner: &Owner,
    inputs: Vec<A>,
    worker: F,
) -> TaskResult<Vec<R>>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    let future = mapped(pool, &owner.handle(), inputs, worker);
    owner.wait_for(&future, None);
    future.result()
}

fn dispatch_next<A, R, F>(
    pool: &ThreadPool,
    owner: &OwnerHandle,
    state: &Arc<Mutex<MapState<A, R>>>,
    worker: &Arc<F>,
) where
    A: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    let (index, arg) = {
        let mut st = state.lock();
        if st.failed || st.cursor >= st.inputs.len() {
            return;
        }
        let index = st.cursor;
        st.cursor += 1;
        let Some(arg) = st.inputs[index].take() else {
            return;
        };
        (index, arg)
    };

    trace!("mapped: dispatching input {}", index);
    let task = {
        let worker = Arc::clone(worker);
        pool.submit(move |arg| worker(arg), arg)
    };
    state.lock().tasks[index] = Some(task.clone());

    // Both completion and cancellation marshal onto the owner thread;
    // the slot settles from whatever the task future holds there.
    let notify = {
        let pool = pool.clone();
        let owner = owner.clone();
        let state = Arc::clone(state);
        let worker = Arc::clone(worker);
        let task = task.clone();
        move || {
            let poster = owner.clone();
            let _ = poster.post(move || {
                settle_slot(&pool, &owner, &state, &worker, index, &task);
            });
        }
    };
    task.subscribe(notify.clone(), notify);
}

/// Owner-thread half of a task completion: store the slot, advance
/// progress, refill the dispatch window, and settle the aggregate when
/// the last slot lands.
fn settle_slot<A, R, F>(
    pool: &ThreadPool,
    owner: &OwnerHandle,
    state: &Arc<Mutex<MapState<A, R>>>,
    worker: &Arc<F>,
    index: usize,
    task: &Future<R>,
) where
    A: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    let outcome = task.try_result().unwrap_or(Err(TaskError::Canceled));
    let aggregate = state.lock().aggregate.clone();

    enum Done<R> {
        Pending { refill: bool },
        Complete(Vec<R>),
        Fail(TaskError),
    }

    let done = {
        let mut st = state.lock();
        st.tasks[index] = None;
        match outcome {
            Ok(value) => {
                st.slots[index] = Some(value);
                st.finished += 1;
                aggregate.set_progress_value(st.finished);
                trace!("mapped: slot {} done ({}/{})", index, st.finished, st.slots.len());
                if st.finished == st.slots.len() {
                    st.tasks.clear();
                    Done::Complete(st.slots.iter_mut().filter_map(Option::take).collect())
                } else {
                    Done::Pending {
                        refill: !st.failed && st.cursor < st.inputs.len(),
                    }
                }
            }
            Err(error) => {
                st.failed = true;
                Done::Fail(error)
            }
        }
    };

    // Settle outside the state lock; subscriber callbacks may do anything.
    match done {
        Done::Complete(results) => aggregate.complete(results),
        Done::Fail(error) => aggregate.fail(error),
        Done::Pending { refill } => {
            if refill {
                dispatch_next(pool, owner, state, worker);
            }
        }
    }
}
