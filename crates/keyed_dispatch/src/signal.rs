//! Reusable rendezvous signals built on [`ResultCell`]
//!
//! [`AutoResetSignal`] delivers each outcome as a discrete pulse to the
//! waiters attached before it and immediately rearms. [`ManualResetSignal`]
//! stays set until [`ManualResetSignal::reset`] is called.

use std::fmt::{self, Debug};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cell::{ResultCell, Wait};
use crate::error::{CellError, CellResult};

fn lock<C>(cell: &Mutex<C>) -> MutexGuard<'_, C> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A signal that rearms itself after every delivery.
///
/// From the outside the signal always looks armed for the next pulse: a
/// waiter attached after a `resolve` blocks until the following one.
pub struct AutoResetSignal<T, E> {
    current: Mutex<ResultCell<T, E>>,
}

impl<T, E> Default for AutoResetSignal<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> AutoResetSignal<T, E> {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(ResultCell::new()),
        }
    }

    /// Deliver `value` to every current waiter and rearm
    pub fn resolve(&self, value: T) -> CellResult<()> {
        self.pulse(Ok(value))
    }

    /// Deliver `error` to every current waiter and rearm
    pub fn reject(&self, error: E) -> CellResult<()> {
        self.pulse(Err(error))
    }

    fn pulse(&self, outcome: Result<T, E>) -> CellResult<()> {
        let mut current = lock(&self.current);
        if current.is_completed() {
            return Err(CellError::AlreadyCompleted);
        }
        let delivered = std::mem::replace(&mut *current, ResultCell::new());
        // The replacement is installed before anybody can observe the old
        // cell through the signal.
        delivered.settle(outcome)
    }

    /// Wait for the next pulse
    pub fn wait(&self) -> Wait<T, E> {
        lock(&self.current).wait()
    }

    /// Always true outside of a delivery
    pub fn is_pending(&self) -> bool {
        lock(&self.current).is_pending()
    }
}

impl<T, E> Debug for AutoResetSignal<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoResetSignal")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// A signal that stays set until it is explicitly reset.
///
/// Commonly used as a "ready" gate: waiters pass straight through while the
/// signal is set and block while it is armed.
pub struct ManualResetSignal<T, E> {
    current: Mutex<ResultCell<T, E>>,
}

impl<T: Default, E> Default for ManualResetSignal<T, E> {
    /// An already set signal
    fn default() -> Self {
        Self::new(false)
    }
}

impl<T: Default, E> ManualResetSignal<T, E> {
    /// Create a signal. When `initially_armed` is false the signal starts set
    /// with `T::default()`; otherwise it starts pending.
    pub fn new(initially_armed: bool) -> Self {
        let cell = if initially_armed {
            ResultCell::new()
        } else {
            ResultCell::resolved(T::default())
        };
        Self {
            current: Mutex::new(cell),
        }
    }
}

impl<T, E> ManualResetSignal<T, E> {
    /// Create a signal that is already set with `value`
    pub fn with_value(value: T) -> Self {
        Self {
            current: Mutex::new(ResultCell::resolved(value)),
        }
    }

    /// Create a pending signal
    pub fn armed() -> Self {
        Self {
            current: Mutex::new(ResultCell::new()),
        }
    }

    pub fn resolve(&self, value: T) -> CellResult<()> {
        lock(&self.current).resolve(value)
    }

    pub fn reject(&self, error: E) -> CellResult<()> {
        lock(&self.current).reject(error)
    }

    /// Rearm the signal. No-op while it is already pending.
    pub fn reset(&self) {
        let mut current = lock(&self.current);
        if current.is_completed() {
            *current = ResultCell::new();
        }
    }

    /// Wait until the signal is set
    pub fn wait(&self) -> Wait<T, E> {
        lock(&self.current).wait()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.current).is_pending()
    }

    pub fn is_completed(&self) -> bool {
        lock(&self.current).is_completed()
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.current).is_fulfilled()
    }

    pub fn is_rejected(&self) -> bool {
        lock(&self.current).is_rejected()
    }

    /// Alias for [`is_completed`](Self::is_completed)
    pub fn is_set(&self) -> bool {
        self.is_completed()
    }

    /// Alias for [`is_pending`](Self::is_pending)
    pub fn is_reset(&self) -> bool {
        self.is_pending()
    }
}

impl<T, E> Debug for ManualResetSignal<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualResetSignal")
            .field("set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_reset_delivers_pulses() {
        let signal: AutoResetSignal<&str, String> = AutoResetSignal::new();
        assert!(signal.is_pending());

        let first = tokio::spawn(signal.wait());
        tokio::task::yield_now().await;
        signal.resolve("a").unwrap();
        assert_eq!(first.await.unwrap(), Ok("a"));
        assert!(signal.is_pending());

        let second = tokio::spawn(signal.wait());
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        signal.resolve("b").unwrap();
        assert_eq!(second.await.unwrap(), Ok("b"));
    }

    #[tokio::test]
    async fn test_auto_reset_reject() {
        let signal: AutoResetSignal<i32, String> = AutoResetSignal::new();
        let waiter = signal.wait();
        signal.reject("stopped".to_string()).unwrap();
        assert_eq!(waiter.await, Err("stopped".to_string()));
        assert!(signal.is_pending());
    }

    #[tokio::test]
    async fn test_auto_reset_pulse_without_waiters_is_lost() {
        let signal: AutoResetSignal<i32, String> = AutoResetSignal::new();
        signal.resolve(1).unwrap();

        let late = signal.wait();
        signal.resolve(2).unwrap();
        assert_eq!(late.await, Ok(2));
    }

    #[tokio::test]
    async fn test_manual_reset_starts_set() {
        let signal: ManualResetSignal<(), String> = ManualResetSignal::new(false);
        assert!(signal.is_completed());
        assert!(signal.is_set());
        assert!(signal.is_resolved());
        assert_eq!(signal.wait().await, Ok(()));

        signal.reset();
        assert!(signal.is_pending());
        assert!(signal.is_reset());

        let waiter = tokio::spawn(signal.wait());
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        signal.resolve(()).unwrap();
        assert_eq!(waiter.await.unwrap(), Ok(()));
        for _ in 0..3 {
            assert_eq!(signal.wait().await, Ok(()));
        }
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_manual_reset_initially_armed() {
        let signal: ManualResetSignal<i32, String> = ManualResetSignal::new(true);
        assert!(signal.is_pending());

        // Resetting a pending signal keeps existing waiters attached.
        let waiter = signal.wait();
        signal.reset();
        signal.resolve(5).unwrap();
        assert_eq!(waiter.await, Ok(5));

        assert_eq!(signal.resolve(6), Err(CellError::AlreadyCompleted));
        assert_eq!(signal.wait().await, Ok(5));
    }

    #[tokio::test]
    async fn test_manual_reset_rejection_sticks() {
        let signal: ManualResetSignal<i32, String> = ManualResetSignal::armed();
        signal.reject("down".to_string()).unwrap();
        assert!(signal.is_rejected());
        assert_eq!(signal.wait().await, Err("down".to_string()));
        assert_eq!(signal.wait().await, Err("down".to_string()));

        signal.reset();
        assert!(!signal.is_rejected());
        assert!(signal.is_pending());
    }

    #[test]
    fn test_manual_reset_with_value() {
        let signal: ManualResetSignal<&str, String> = ManualResetSignal::with_value("ready");
        assert!(signal.is_set());
        let defaulted: ManualResetSignal<u8, String> = ManualResetSignal::default();
        assert!(defaulted.is_set());
    }
}
