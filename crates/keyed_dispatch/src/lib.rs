//! Keyed Dispatch - Memoizing Async Task Scheduler
//!
//! A small coordination layer for running keyed async work on tokio with a
//! bound on how much of it runs at once.
//!
//! # Overview
//!
//! - [`ResultCell`] is a settable-once asynchronous value: waiters suspend
//!   until it is resolved or rejected and are woken in attachment order
//! - [`AutoResetSignal`] and [`ManualResetSignal`] are reusable signals built
//!   on top of result cells
//! - [`KeyedTaskScheduler`] deduplicates work by key, admits queued keys in
//!   insertion order up to `max_parallel`, and caches each key's outcome.
//!   Callers get a read-only [`TaskHandle`] on the task's result
//!
//! # Example
//!
//! ```rust
//! use keyed_dispatch::{KeyedTaskScheduler, SchedulerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SchedulerConfig::new().with_max_parallel(2)?;
//!     let scheduler: KeyedTaskScheduler<u64, String> = KeyedTaskScheduler::with_config(config)?;
//!
//!     let first = scheduler.get_or_enqueue("fetch", || async { Ok(42) });
//!     let second = scheduler.get_or_enqueue("fetch", || async { Ok(0) });
//!
//!     assert_eq!(first.await, Ok(42));
//!     assert_eq!(second.await, Ok(42));
//!     Ok(())
//! }
//! ```

pub mod cell;
pub mod error;
pub mod handle;
pub mod limits;
pub mod reporter;
pub mod scheduler;
pub mod signal;
pub mod task;
pub mod timeout;
pub mod types;

#[cfg(test)]
mod test_util;

pub use cell::{CellState, ResultCell, Wait};
pub use error::{CellError, CellResult, ConfigError, ConfigResult, TimeoutError};
pub use handle::TaskHandle;
pub use limits::Limit;
pub use reporter::{MultiReporter, NoOpReporter, SchedulerEvent, SchedulerReporter, TracingReporter};
pub use scheduler::{KeyState, KeyedTaskScheduler, SchedulerStats};
pub use signal::{AutoResetSignal, ManualResetSignal};
pub use task::{TaskFuture, TaskSpec};
pub use timeout::{delay, delayed_cell, race_timeout, timeout_cell, with_timeout};
pub use types::SchedulerConfig;
