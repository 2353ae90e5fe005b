//! Owner-thread marshaling and non-blocking await.
//!
//! Exactly one thread, the one that constructs the [`Owner`], is
//! allowed to mutate the state of the schedulers, queues, pipelines, and
//! debounce registries built on top of it. Worker threads hand results
//! back by posting closures through an [`OwnerHandle`]; the owner drains
//! them with [`Owner::process_one`] or, while waiting on a future,
//! [`Owner::wait_for`].

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::trace;

use crate::future::{Future, Promise};

type Marshaled = Box<dyn FnOnce() + Send>;

/// Granularity of the cooperative wait loop.
const POLL_SLICE: Duration = Duration::from_millis(10);

/// The single coordinating thread's marshaling queue.
///
/// Construct it on the thread that owns all toolkit state; that thread
/// must periodically call [`process_one`](Owner::process_one),
/// [`process_pending`](Owner::process_pending), or
/// [`wait_for`](Owner::wait_for) to drain marshaled work.
pub struct Owner {
    thread: ThreadId,
    sender: Sender<Marshaled>,
    receiver: Receiver<Marshaled>,
}

impl Owner {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Owner {
            thread: thread::current().id(),
            sender,
            receiver,
        }
    }

    /// A cloneable, `Send` handle for posting work onto this owner.
    pub fn handle(&self) -> OwnerHandle {
        OwnerHandle {
            sender: self.sender.clone(),
        }
    }

    /// Run at most one pending unit of marshaled work, waiting up to
    /// `timeout` for one to arrive. Returns whether anything ran.
    pub fn process_one(&self, timeout: Duration) -> bool {
        self.assert_owner_thread();
        match self.receiver.recv_timeout(timeout) {
            Ok(work) => {
                work();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Drain all currently queued work without blocking. Returns how many
    /// units ran.
    pub fn process_pending(&self) -> usize {
        self.assert_owner_thread();
        let mut ran = 0;
        while let Ok(work) = self.receiver.try_recv() {
            work();
            ran += 1;
        }
        ran
    }

    /// Cooperatively wait for `future` to settle without stalling the
    /// owner thread: queued marshaled work keeps running while we wait.
    ///
    /// Returns `true` once the future is finished. On timeout it returns
    /// `false` and leaves the future exactly as it was: still pending,
    /// not canceled. A timeout is an observable non-completion, not an
    /// error; callers re-check or re-wait.
    pub fn wait_for<T>(&self, future: &Future<T>, timeout: Option<Duration>) -> bool {
        self.assert_owner_thread();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if future.is_finished() {
                return true;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        trace!("wait_for timed out with future still pending");
                        return future.is_finished();
                    }
                    (deadline - now).min(POLL_SLICE)
                }
                None => POLL_SLICE,
            };
            self.process_one(slice);
        }
    }

    fn assert_owner_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.thread,
            "owner queue drained from a non-owner thread"
        );
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

/// Posting side of an [`Owner`]'s queue.
#[derive(Clone)]
pub struct OwnerHandle {
    sender: Sender<Marshaled>,
}

impl OwnerHandle {
    /// Schedule `f` to run on the owner thread and return a future for
    /// its result.
    ///
    /// Execution is always deferred to a later processing step, even when
    /// the caller already is the owner thread: `f` never runs inline on
    /// the caller's stack, so callers cannot re-enter themselves.
    pub fn post<R, F>(&self, f: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        let work: Marshaled = Box::new(move || promise.complete(f()));
        if self.sender.send(work).is_err() {
            trace!("owner queue gone; canceling marshaled call");
            future.cancel();
        }
        future
    }
}
