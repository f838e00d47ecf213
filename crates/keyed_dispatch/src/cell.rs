//! Externally resolvable single-assignment result cells
//!
//! A [`ResultCell`] starts out pending and is settled exactly once, either
//! fulfilled with a value or rejected with an error. Any number of waiters can
//! await the cell; each receives a clone of the settled outcome. Waiters are
//! woken in the order they were attached.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::error::{CellError, CellResult};

/// Observable state of a [`ResultCell`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellState<T, E> {
    /// Nobody has settled the cell yet
    Pending,
    /// The cell was resolved with a value
    Fulfilled(T),
    /// The cell was rejected with an error
    Rejected(E),
}

impl<T, E> CellState<T, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, CellState::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, CellState::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, CellState::Rejected(_))
    }

    pub fn is_completed(&self) -> bool {
        !self.is_pending()
    }

    /// Convert a settled state into its outcome, `None` while pending
    pub fn into_result(self) -> Option<Result<T, E>> {
        match self {
            CellState::Pending => None,
            CellState::Fulfilled(value) => Some(Ok(value)),
            CellState::Rejected(error) => Some(Err(error)),
        }
    }
}

impl<T, E> From<Result<T, E>> for CellState<T, E> {
    fn from(outcome: Result<T, E>) -> Self {
        match outcome {
            Ok(value) => CellState::Fulfilled(value),
            Err(error) => CellState::Rejected(error),
        }
    }
}

/// A waiter slot. `waker` is `None` until the waiter is first polled.
struct Waiter {
    id: u64,
    waker: Option<Waker>,
}

struct Inner<T, E> {
    state: CellState<T, E>,
    waiters: VecDeque<Waiter>,
    next_waiter: u64,
    /// Set once some caller has looked at the settled outcome.
    observed: bool,
}

struct Shared<T, E> {
    inner: Mutex<Inner<T, E>>,
    strict: bool,
}

impl<T, E> Shared<T, E> {
    fn new(state: CellState<T, E>, strict: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state,
                waiters: VecDeque::new(),
                next_waiter: 0,
                observed: false,
            }),
            strict,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> Drop for Shared<T, E> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.state.is_rejected() && !inner.observed {
            tracing::debug!("rejected result cell dropped without being observed");
        }
    }
}

/// An externally resolvable cell holding an eventual value or error.
///
/// Cloning a `ResultCell` produces another handle to the same cell. The cell
/// transitions only from pending to fulfilled or from pending to rejected;
/// later attempts to settle it leave the first outcome in place and return
/// [`CellError::AlreadyCompleted`]. Cells created with [`ResultCell::strict`]
/// treat a second completion as a programming error and panic.
pub struct ResultCell<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for ResultCell<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Default for ResultCell<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> ResultCell<T, E> {
    /// Create a new pending cell
    pub fn new() -> Self {
        Self::with_strictness(false)
    }

    /// Create a new pending cell that panics when completed twice
    pub fn strict() -> Self {
        Self::with_strictness(true)
    }

    pub(crate) fn with_strictness(strict: bool) -> Self {
        Self {
            shared: Shared::new(CellState::Pending, strict),
        }
    }

    /// Create a cell that is already fulfilled with `value`
    pub fn resolved(value: T) -> Self {
        Self {
            shared: Shared::new(CellState::Fulfilled(value), false),
        }
    }

    /// Create a cell that is already rejected with `error`
    pub fn rejected(error: E) -> Self {
        Self {
            shared: Shared::new(CellState::Rejected(error), false),
        }
    }

    /// Fulfil the cell with `value`
    pub fn resolve(&self, value: T) -> CellResult<()> {
        self.settle(Ok(value))
    }

    /// Reject the cell with `error`
    pub fn reject(&self, error: E) -> CellResult<()> {
        self.settle(Err(error))
    }

    /// Settle the cell from an outcome.
    ///
    /// Only the call that performs the transition wakes waiters, in the order
    /// they were attached.
    pub fn settle(&self, outcome: Result<T, E>) -> CellResult<()> {
        let waiters = {
            let mut inner = self.shared.lock();
            if inner.state.is_completed() {
                None
            } else {
                inner.state = outcome.into();
                Some(std::mem::take(&mut inner.waiters))
            }
        };

        match waiters {
            Some(waiters) => {
                waiters
                    .into_iter()
                    .filter_map(|waiter| waiter.waker)
                    .for_each(Waker::wake);
                Ok(())
            }
            None if self.shared.strict => {
                panic!(
                    "attempted to settle a result cell twice: {}",
                    CellError::AlreadyCompleted
                )
            }
            None => {
                tracing::debug!("ignoring attempt to settle an already completed result cell");
                Err(CellError::AlreadyCompleted)
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().state.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.shared.lock().state.is_fulfilled()
    }

    pub fn is_rejected(&self) -> bool {
        self.shared.lock().state.is_rejected()
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().state.is_completed()
    }

    /// Whether both handles refer to the same underlying cell
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Mark the outcome as deliberately ignored.
    ///
    /// Used for the losing side of a race so a later rejection is not
    /// reported as unobserved.
    pub fn discard(self) {
        self.shared.lock().observed = true;
    }

    /// Attach a waiter to the cell.
    ///
    /// The waiter's place in the wake order is fixed here, not at first poll.
    /// The returned future owns a handle to the cell and is independent of
    /// `self`.
    pub fn wait(&self) -> Wait<T, E> {
        let id = {
            let mut inner = self.shared.lock();
            if inner.state.is_pending() {
                let id = inner.next_waiter;
                inner.next_waiter += 1;
                inner.waiters.push_back(Waiter { id, waker: None });
                Some(id)
            } else {
                None
            }
        };
        Wait {
            shared: self.shared.clone(),
            id,
        }
    }
}

impl<T: Clone, E: Clone> ResultCell<T, E> {
    /// Snapshot of the current state
    pub fn state(&self) -> CellState<T, E> {
        self.shared.lock().state.clone()
    }

    /// The fulfilled value, if any
    pub fn value(&self) -> Option<T> {
        match &self.shared.lock().state {
            CellState::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection error, if any. Counts as observing the outcome.
    pub fn error(&self) -> Option<E> {
        let mut inner = self.shared.lock();
        match &inner.state {
            CellState::Rejected(error) => {
                let error = error.clone();
                inner.observed = true;
                Some(error)
            }
            _ => None,
        }
    }
}

impl<T, E> IntoFuture for ResultCell<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;
    type IntoFuture = Wait<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}

impl<T: Debug, E: Debug> Debug for ResultCell<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCell")
            .field("state", &self.shared.lock().state)
            .field("strict", &self.shared.strict)
            .finish()
    }
}

/// Future returned by [`ResultCell::wait`]
#[must_use = "futures do nothing unless polled"]
pub struct Wait<T, E> {
    shared: Arc<Shared<T, E>>,
    /// Our slot in the waiter queue, `None` once the outcome was taken or if
    /// the cell was already settled when we attached.
    id: Option<u64>,
}

impl<T: Clone, E: Clone> Future for Wait<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut inner = this.shared.lock();

        if let Some(outcome) = inner.state.clone().into_result() {
            // Settling drains the queue, so our slot is already gone.
            this.id = None;
            inner.observed = true;
            return Poll::Ready(outcome);
        }

        let id = match this.id {
            Some(id) => id,
            None => {
                // Only reachable when polled again after completion.
                let id = inner.next_waiter;
                inner.next_waiter += 1;
                inner.waiters.push_back(Waiter { id, waker: None });
                this.id = Some(id);
                id
            }
        };
        if let Some(waiter) = inner.waiters.iter_mut().find(|waiter| waiter.id == id) {
            match &mut waiter.waker {
                Some(waker) if waker.will_wake(cx.waker()) => {}
                slot => *slot = Some(cx.waker().clone()),
            }
        }
        Poll::Pending
    }
}

impl<T, E> Drop for Wait<T, E> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.shared.lock().waiters.retain(|waiter| waiter.id != id);
        }
    }
}

impl<T, E> Debug for Wait<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::CapturedLogs;

    #[test]
    fn test_state_transitions() {
        let cell: ResultCell<i32, String> = ResultCell::new();
        assert!(cell.is_pending());
        assert!(!cell.is_completed());
        assert_eq!(cell.state(), CellState::Pending);

        cell.resolve(42).unwrap();
        assert!(cell.is_fulfilled());
        assert!(cell.is_completed());
        assert!(!cell.is_rejected());
        assert_eq!(cell.value(), Some(42));
        assert_eq!(cell.error(), None);
    }

    #[test]
    fn test_second_completion_keeps_first_outcome() {
        let cell: ResultCell<&str, String> = ResultCell::new();
        cell.resolve("first").unwrap();

        assert_eq!(cell.resolve("second"), Err(CellError::AlreadyCompleted));
        assert_eq!(
            cell.reject("nope".to_string()),
            Err(CellError::AlreadyCompleted)
        );
        assert_eq!(cell.state(), CellState::Fulfilled("first"));
    }

    #[test]
    #[should_panic(expected = "settle a result cell twice")]
    fn test_strict_cell_panics_on_double_completion() {
        let cell: ResultCell<i32, String> = ResultCell::strict();
        cell.resolve(1).unwrap();
        let _ = cell.resolve(2);
    }

    #[test]
    fn test_clones_share_state() {
        let cell: ResultCell<i32, String> = ResultCell::new();
        let other = cell.clone();
        assert!(cell.same_cell(&other));
        assert!(!cell.same_cell(&ResultCell::new()));

        other.reject("failed".to_string()).unwrap();
        assert!(cell.is_rejected());
        assert_eq!(cell.error(), Some("failed".to_string()));
    }

    #[tokio::test]
    async fn test_waiters_receive_outcome() {
        let cell: ResultCell<i32, String> = ResultCell::new();

        let first = tokio::spawn(cell.wait());
        let second = tokio::spawn(cell.clone().into_future());
        tokio::task::yield_now().await;
        assert!(!first.is_finished());

        cell.resolve(7).unwrap();
        assert_eq!(first.await.unwrap(), Ok(7));
        assert_eq!(second.await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn test_rejection_reaches_every_waiter() {
        let cell: ResultCell<i32, String> = ResultCell::new();
        let waiters: Vec<_> = (0..3).map(|_| tokio::spawn(cell.wait())).collect();

        cell.reject("broken".to_string()).unwrap();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Err("broken".to_string()));
        }
    }

    #[tokio::test]
    async fn test_waiters_resume_in_attachment_order() {
        let cell: ResultCell<(), String> = ResultCell::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Attach in reverse spawn order so wake order, not spawn order, decides.
        let waits: Vec<_> = (0..4).map(|_| cell.wait()).collect();
        let mut handles = Vec::new();
        for (i, wait) in waits.into_iter().enumerate().rev() {
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                wait.await.unwrap();
                order.lock().unwrap().push(i);
            }));
        }
        tokio::task::yield_now().await;

        cell.resolve(()).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_wait_on_settled_cell() {
        let cell: ResultCell<i32, String> = ResultCell::resolved(3);
        assert_eq!(cell.wait().await, Ok(3));

        let cell: ResultCell<i32, String> = ResultCell::rejected("gone".to_string());
        assert_eq!(cell.await, Err("gone".to_string()));
    }

    #[test]
    fn test_dropped_waiter_leaves_queue() {
        let cell: ResultCell<i32, String> = ResultCell::new();
        let wait = cell.wait();
        assert_eq!(cell.shared.lock().waiters.len(), 1);

        drop(wait);
        assert!(cell.shared.lock().waiters.is_empty());
    }

    const UNOBSERVED: &str = "rejected result cell dropped without being observed";

    #[test]
    fn test_unobserved_rejection_is_logged() {
        let (logs, _guard) = CapturedLogs::install();
        let cell: ResultCell<i32, String> = ResultCell::new();
        let other = cell.clone();
        cell.reject("ignored".to_string()).unwrap();

        drop(cell);
        assert!(!logs.contains(UNOBSERVED));
        drop(other);
        assert!(logs.contains(UNOBSERVED));
    }

    #[test]
    fn test_discard_silences_unobserved_rejection() {
        let (logs, _guard) = CapturedLogs::install();
        let cell: ResultCell<i32, String> = ResultCell::new();
        cell.reject("ignored".to_string()).unwrap();
        cell.discard();
        assert!(!logs.contains(UNOBSERVED));
    }

    #[test]
    fn test_observed_rejection_is_not_logged() {
        let (logs, _guard) = CapturedLogs::install();
        let waited: ResultCell<i32, String> = ResultCell::rejected("seen".to_string());
        assert_eq!(
            futures::executor::block_on(waited.wait()),
            Err("seen".to_string())
        );
        drop(waited);

        let peeked: ResultCell<i32, String> = ResultCell::rejected("peeked".to_string());
        assert_eq!(peeked.error(), Some("peeked".to_string()));
        drop(peeked);

        // Fulfilled cells never count as unobserved failures.
        drop(ResultCell::<i32, String>::resolved(1));
        assert!(!logs.contains(UNOBSERVED));
    }
}
