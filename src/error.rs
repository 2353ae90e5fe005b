use thiserror::Error;

/// Outcome of a task future.
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Terminal failure of a task future.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The future was canceled before a value was produced.
    #[error("task canceled")]
    Canceled,

    /// The worker panicked while executing the task body.
    #[error("worker panicked: {0}")]
    Panicked(String),
}
