//! Concurrency toolkit for single-threaded-owner programs.
//!
//! All coordination state lives on one owner thread; worker threads on a
//! shared [`ThreadPool`] only compute and hand results back through
//! marshaled closures. On top of that model the crate provides:
//!
//! - [`Future`]/[`Promise`]: a settle-exactly-once result cell with
//!   progress reporting, cancellation, and one-shot callbacks.
//! - [`mapped`]/[`blocking_mapped`]: a bounded, order-preserving
//!   parallel map over a fixed input sequence.
//! - [`SerialQueue`]: a FIFO backlog running one task at a time, started
//!   and drained explicitly.
//! - [`Pipeline`]: an open-ended mapper accepting new items while
//!   running.
//! - [`debounce()`]: key-based supersession so only the latest of a
//!   burst of submissions takes effect.
//! - [`Owner::wait_for`]: a cooperative await that keeps the owner
//!   thread responsive while it waits.
//!
//! # Example
//!
//! ```
//! use conveyor::{mapped, Owner, ThreadPool};
//!
//! let pool = ThreadPool::new(4);
//! let owner = Owner::new();
//!
//! let squares = mapped(&pool, &owner.handle(), vec![1i64, 2, 3], |x| x * x);
//! assert!(owner.wait_for(&squares, None));
//! assert_eq!(squares.result(), Ok(vec![1, 4, 9]));
//! ```

pub mod debounce;
pub mod error;
pub mod future;
pub mod owner;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod scheduler;

pub use debounce::{debounce, DebounceRegistry};
pub use error::{TaskError, TaskResult};
pub use future::{Future, FutureId, Progress, Promise};
pub use owner::{Owner, OwnerHandle};
pub use pipeline::Pipeline;
pub use pool::ThreadPool;
pub use queue::SerialQueue;
pub use scheduler::{blocking_mapped, mapped};
