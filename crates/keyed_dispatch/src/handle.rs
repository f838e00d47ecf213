//! Read-only view of a scheduled task's outcome

use std::fmt::{self, Debug};
use std::future::IntoFuture;
use std::time::Duration;

use crate::cell::{CellState, ResultCell, Wait};
use crate::error::TimeoutError;

/// Handle returned by [`KeyedTaskScheduler`](crate::KeyedTaskScheduler).
///
/// Exposes the eventual value or error of a task. Only the scheduler can
/// settle the underlying cell, so every caller sharing a key sees exactly what
/// the task produced.
///
/// ```compile_fail
/// use keyed_dispatch::KeyedTaskScheduler;
///
/// fn settle_from_outside(scheduler: &KeyedTaskScheduler<i32, String>) {
///     let handle = scheduler.enqueue("k", || async { Ok(1) });
///     let _ = handle.resolve(99);
/// }
/// ```
pub struct TaskHandle<T, E> {
    cell: ResultCell<T, E>,
}

impl<T, E> Clone for TaskHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T, E> TaskHandle<T, E> {
    pub(crate) fn new(cell: ResultCell<T, E>) -> Self {
        Self { cell }
    }

    pub fn is_pending(&self) -> bool {
        self.cell.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.cell.is_fulfilled()
    }

    pub fn is_rejected(&self) -> bool {
        self.cell.is_rejected()
    }

    pub fn is_completed(&self) -> bool {
        self.cell.is_completed()
    }

    /// Whether both handles observe the same execution
    pub fn same_handle(&self, other: &Self) -> bool {
        self.cell.same_cell(&other.cell)
    }

    /// Stop caring about the outcome; a later failure is not reported as
    /// unobserved.
    pub fn discard(self) {
        self.cell.discard();
    }

    /// Wait for the task to settle
    pub fn wait(&self) -> Wait<T, E> {
        self.cell.wait()
    }
}

impl<T: Clone, E: Clone> TaskHandle<T, E> {
    pub fn state(&self) -> CellState<T, E> {
        self.cell.state()
    }

    pub fn value(&self) -> Option<T> {
        self.cell.value()
    }

    pub fn error(&self) -> Option<E> {
        self.cell.error()
    }
}

impl<T, E> TaskHandle<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Wait for at most `duration`. The task keeps running on timeout.
    pub async fn wait_timeout(&self, duration: Duration) -> Result<Result<T, E>, TimeoutError> {
        crate::timeout::race_timeout(&self.cell, duration).await
    }
}

impl<T: Clone, E: Clone> IntoFuture for TaskHandle<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = Wait<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.cell.wait()
    }
}

impl<T: Debug, E: Debug> Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.cell).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_mirrors_cell() {
        let cell: ResultCell<i32, String> = ResultCell::new();
        let handle = TaskHandle::new(cell.clone());
        let other = handle.clone();
        assert!(handle.same_handle(&other));
        assert!(handle.is_pending());

        cell.resolve(4).unwrap();
        assert!(handle.is_fulfilled());
        assert_eq!(handle.value(), Some(4));
        assert_eq!(handle.state(), CellState::Fulfilled(4));
        assert_eq!(other.await, Ok(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let handle: TaskHandle<i32, String> = TaskHandle::new(ResultCell::new());
        assert_eq!(
            handle.wait_timeout(Duration::from_millis(20)).await,
            Err(TimeoutError::elapsed(Duration::from_millis(20)))
        );
        assert!(handle.is_pending());
    }
}
