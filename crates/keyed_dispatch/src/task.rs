use std::{future::Future, pin::Pin};

/// A boxed future produced by a deferred task.
pub type TaskFuture<O, E> = Pin<Box<dyn Future<Output = Result<O, E>> + Send + 'static>>;

/// A deferred unit of work: called at most once, when the scheduler admits it.
pub(crate) type DeferredTask<O, E> = Box<dyn FnOnce() -> TaskFuture<O, E> + Send + 'static>;

/// A specification for a unit of work that can be submitted to a
/// [`KeyedTaskScheduler`](crate::KeyedTaskScheduler).
pub trait TaskSpec: Send + 'static {
    type Output: Clone + Send + Sync + 'static;
    type Error: Clone + Send + Sync + 'static;

    /// A stable identifier used to deduplicate concurrent requests.
    fn key(&self) -> String;

    /// Convert this task specification into an async operation.
    fn into_future(self) -> TaskFuture<Self::Output, Self::Error>;
}
