//! Bounded worker pool.
//!
//! Every component in the toolkit consumes the pool through the narrow
//! interface of [`ThreadPool::submit`] and [`ThreadPool::max_concurrency`].
//! Workers are plain OS threads looping over a shared job channel, so the
//! pool's thread count is also its hard concurrency ceiling.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use log::{debug, trace};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::TaskError;
use crate::future::{Future, Promise};

type Job = Box<dyn FnOnce() + Send>;

static GLOBAL_POOL: Lazy<ThreadPool> = Lazy::new(ThreadPool::default);

/// Cheaply cloneable handle to a fixed set of worker threads.
///
/// Dropping the last handle closes the job queue and joins the workers.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl Clone for ThreadPool {
    fn clone(&self) -> Self {
        ThreadPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner {
    sender: Option<Sender<Job>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
}

impl ThreadPool {
    /// Create a pool with the given number of workers.
    ///
    /// Zero is clamped to one: a pool that can run nothing would deadlock
    /// every primitive built on it, and the contract requires a maximum
    /// concurrency of at least 1.
    pub fn new(workers: usize) -> Self {
        let capacity = workers.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("conveyor-worker-{}", i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .expect("failed to spawn pool worker thread");
            handles.push(handle);
        }
        debug!("thread pool started with {} workers", capacity);
        ThreadPool {
            inner: Arc::new(PoolInner {
                sender: Some(sender),
                workers: Mutex::new(handles),
                capacity,
            }),
        }
    }

    /// Process-wide default pool sized to the logical CPU count.
    pub fn global() -> &'static ThreadPool {
        &GLOBAL_POOL
    }

    /// The maximum number of tasks this pool can run concurrently.
    pub fn max_concurrency(&self) -> usize {
        self.inner.capacity
    }

    /// Submit one task: `worker(arg)` runs on some pool thread and the
    /// returned future settles with its result.
    ///
    /// A panicking worker fails only its own future, with
    /// [`TaskError::Panicked`]; the worker thread survives.
    pub fn submit<A, R, F>(&self, worker: F, arg: A) -> Future<R>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        let job: Job = Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(move || worker(arg))) {
                Ok(value) => promise.complete(value),
                Err(payload) => {
                    let message = panic_message(payload);
                    trace!("pool task panicked: {}", message);
                    promise.fail(TaskError::Panicked(message));
                }
            }
        });
        let sent = match &self.inner.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        };
        if !sent {
            // Queue already closed; nobody will ever run the job.
            future.cancel();
        }
        future
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        ThreadPool::new(num_cpus::get())
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        debug!("thread pool shut down");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn submit_returns_worker_result() {
        let pool = ThreadPool::new(2);
        let future = pool.submit(|x: i64| x * x, 7);
        assert_eq!(future.result(), Ok(49));
    }

    #[test]
    fn zero_workers_clamps_to_one() {
        let pool = ThreadPool::new(0);
        assert_eq!(pool.max_concurrency(), 1);
        let future = pool.submit(|x: i32| x + 1, 1);
        assert_eq!(future.result(), Ok(2));
    }

    #[test]
    fn panicking_worker_fails_its_future_only() {
        let pool = ThreadPool::new(1);
        let failed = pool.submit(|_: ()| -> i32 { panic!("bad input") }, ());
        assert_eq!(
            failed.result(),
            Err(TaskError::Panicked("bad input".to_string()))
        );

        // The worker thread survives and keeps serving tasks.
        let ok = pool.submit(|x: i32| x * 2, 21);
        assert_eq!(ok.result(), Ok(42));
    }

    #[test]
    fn concurrency_never_exceeds_capacity() {
        let pool = ThreadPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..24)
            .map(|i| {
                let running = Arc::clone(&running);
                let high_water = Arc::clone(&high_water);
                pool.submit(
                    move |x: usize| {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        high_water.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        running.fetch_sub(1, Ordering::SeqCst);
                        x
                    },
                    i,
                )
            })
            .collect();

        for (i, future) in futures.iter().enumerate() {
            assert_eq!(future.result(), Ok(i));
        }
        assert!(high_water.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn global_pool_is_shared_and_cpu_sized() {
        let a = ThreadPool::global();
        let b = ThreadPool::global();
        assert_eq!(a.max_concurrency(), num_cpus::get());
        assert_eq!(a.max_concurrency(), b.max_concurrency());
        let future = a.submit(|x: u32| x + 1, 41);
        assert_eq!(future.result(), Ok(42));
    }
}
