//! Serial task queue: a FIFO backlog with at most one task in flight.
//!
//! `run()` submits the head value and chains the queue's aggregate future
//! to the task; the head stays queued until `dequeue()` pops it and
//! installs a fresh, unresolved aggregate. Nothing ever starts
//! implicitly.

use std::collections::VecDeque;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::future::{Future, Promise};
use crate::owner::OwnerHandle;
use crate::pool::ThreadPool;

struct QueueState<A, R> {
    backlog: VecDeque<A>,
    // True iff the head has been submitted and not yet dequeued.
    started: bool,
    // The in-flight task, retained until it settles. Survives a
    // `dequeue` so a mid-flight pop cannot let a second task start.
    task: Option<Future<R>>,
    aggregate: Promise<R>,
    aggregate_future: Future<R>,
}

/// FIFO queue executing one task at a time on a shared pool.
pub struct SerialQueue<A, R> {
    pool: ThreadPool,
    owner: OwnerHandle,
    worker: Arc<dyn Fn(A) -> R + Send + Sync>,
    state: Arc<Mutex<QueueState<A, R>>>,
}

impl<A, R> SerialQueue<A, R>
where
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new<F>(pool: &ThreadPool, owner: &OwnerHandle, worker: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let aggregate = Promise::new();
        let aggregate_future = aggregate.future();
        SerialQueue {
            pool: pool.clone(),
            owner: owner.clone(),
            worker: Arc::new(worker),
            state: Arc::new(Mutex::new(QueueState {
                backlog: VecDeque::new(),
                started: false,
                task: None,
                aggregate,
                aggregate_future,
            })),
        }
    }

    /// Append a value to the backlog. Never starts execution.
    pub fn enqueue(&self, value: A) {
        self.state.lock().backlog.push_back(value);
    }

    /// Pop the current head, clear the started flag, and install a fresh
    /// unresolved aggregate future. Does not start the new head.
    ///
    /// A still-running head task is not forgotten: it keeps blocking
    /// [`run`](SerialQueue::run) until it settles.
    pub fn dequeue(&self) -> Option<A> {
        let mut st = self.state.lock();
        let popped = st.backlog.pop_front();
        st.started = false;
        let aggregate = Promise::new();
        st.aggregate_future = aggregate.future();
        st.aggregate = aggregate;
        popped
    }

    /// The current head value, if any. The head remains queued.
    pub fn head(&self) -> Option<A> {
        self.state.lock().backlog.front().cloned()
    }

    /// Number of values in the backlog, including a started head.
    pub fn count(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// The aggregate future for the head task's outcome. Replaced by
    /// [`dequeue`](SerialQueue::dequeue).
    pub fn future(&self) -> Future<R> {
        self.state.lock().aggregate_future.clone()
    }

    /// Submit the head value if nothing is running yet.
    ///
    /// A no-op returning the existing aggregate future when a task is
    /// already started, a previously dequeued head is still executing,
    /// or the queue is empty. At most one task per queue instance is
    /// ever in flight.
    pub fn run(&self) -> Future<R> {
        let (task, aggregate, future) = {
            let mut st = self.state.lock();
            if st.started {
                return st.aggregate_future.clone();
            }
            match &st.task {
                Some(task) if !task.is_finished() => {
                    return st.aggregate_future.clone();
                }
                _ => st.task = None,
            }
            let Some(value) = st.backlog.front().cloned() else {
                return st.aggregate_future.clone();
            };
            st.started = true;
            let task = {
                let worker = Arc::clone(&self.worker);
                self.pool.submit(move |arg| worker(arg), value)
            };
            st.task = Some(task.clone());
            (task, st.aggregate.clone(), st.aggregate_future.clone())
        };
        trace!("serial queue: head submitted");

        // Chain the aggregate to the task, marshaled onto the owner
        // thread like every other completion in the toolkit. The
        // retained task handle is released there too, so the queue is
        // ready for the next head even after a mid-flight dequeue.
        let notify = {
            let owner = self.owner.clone();
            let state = Arc::clone(&self.state);
            let task = task.clone();
            let aggregate = aggregate.clone();
            move || {
                let _ = owner.post(move || {
                    {
                        let mut st = state.lock();
                        if st.task.as_ref().map(|t| t.id()) == Some(task.id()) {
                            st.task = None;
                        }
                    }
                    match task.try_result() {
                        Some(Ok(value)) => aggregate.complete(value),
                        Some(Err(error)) => aggregate.fail(error),
                        None => {}
                    }
                });
            }
        };
        task.subscribe(notify.clone(), notify);
        future
    }
}
