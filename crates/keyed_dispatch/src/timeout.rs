//! Delay and bounded-wait helpers
//!
//! None of the primitives here cancel the work being waited on. A bounded
//! wait races the cell against a timer cell and explicitly discards
//! whichever side loses.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use futures::future::{self, Either};

use crate::cell::ResultCell;
use crate::error::TimeoutError;

/// Sleep for `duration`
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// A cell that is resolved with `value` once `duration` has elapsed
pub fn delayed_cell<T, E>(duration: Duration, value: T) -> ResultCell<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let cell = ResultCell::new();
    let timer = cell.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        let _ = timer.resolve(value);
    });
    cell
}

/// A cell that is rejected with [`TimeoutError::Elapsed`] once `duration` has
/// elapsed
pub fn timeout_cell<T>(duration: Duration) -> ResultCell<T, TimeoutError>
where
    T: Send + 'static,
{
    let cell = ResultCell::new();
    let timer = cell.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        let _ = timer.reject(TimeoutError::elapsed(duration));
    });
    cell
}

/// Await `future` for at most `duration`
pub async fn with_timeout<F: Future>(
    duration: Duration,
    future: F,
) -> Result<F::Output, TimeoutError> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError::elapsed(duration))
}

/// Wait for `cell` to settle for at most `duration`.
///
/// The cell itself is left untouched when the wait times out; it may still
/// settle later for other waiters.
pub async fn race_timeout<T, E>(
    cell: &ResultCell<T, E>,
    duration: Duration,
) -> Result<Result<T, E>, TimeoutError>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let timer = timeout_cell::<Infallible>(duration);
    match future::select(cell.wait(), timer.wait()).await {
        Either::Left((outcome, _)) => {
            // The timer still fires later; nobody is going to look at it.
            timer.discard();
            Ok(outcome)
        }
        Either::Right((expired, _)) => {
            tracing::trace!(?duration, "bounded wait timed out");
            match expired {
                Err(error) => Err(error),
                Ok(never) => match never {},
            }
        }
    }
}
