//! Keyed, bounded-concurrency task scheduler
//!
//! Every key lives in at most one of four maps: queued, in progress,
//! completed or failed. Submitting work hands back a read-only [`TaskHandle`]
//! immediately; a background run loop admits queued keys in insertion order
//! while fewer than `max_parallel` runs are executing. Outcomes are memoized per
//! key until the key is reset or re-enqueued.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, Either, FutureExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::cell::ResultCell;
use crate::error::ConfigResult;
use crate::handle::TaskHandle;
use crate::reporter::{NoOpReporter, SchedulerEvent, SchedulerReporter};
use crate::signal::{AutoResetSignal, ManualResetSignal};
use crate::task::{DeferredTask, TaskFuture, TaskSpec};
use crate::types::SchedulerConfig;

/// Which of the scheduler's maps currently holds a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    /// Submitted, not started yet
    Queued,
    /// Currently executing
    InProgress,
    /// Finished successfully, value cached
    Completed,
    /// Finished with an error, error cached
    Failed,
}

/// Snapshot of the scheduler's map sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl SchedulerStats {
    /// Work not yet finished
    pub fn len(&self) -> usize {
        self.queued + self.in_progress
    }

    /// All work submitted and not evicted
    pub fn size(&self) -> usize {
        self.len() + self.completed + self.failed
    }

    pub fn is_drained(&self) -> bool {
        self.len() == 0
    }
}

/// A queued entry: the handle given to callers and the deferred task.
struct Queued<T, E> {
    handle: ResultCell<T, E>,
    /// Handles of earlier submissions for the same key that were replaced
    /// before they started. They settle with this entry's outcome.
    followers: Vec<ResultCell<T, E>>,
    task: DeferredTask<T, E>,
}

struct State<T, E> {
    queued: IndexMap<String, Queued<T, E>>,
    in_progress: IndexMap<String, ResultCell<T, E>>,
    /// Runs evicted by a re-enqueue that are still executing. They no longer
    /// own their key but still occupy a concurrency slot.
    detached: Vec<ResultCell<T, E>>,
    completed: HashMap<String, T>,
    failed: HashMap<String, E>,
    /// Whether the run loop task is alive
    running: bool,
    /// Whether work was submitted since the last `Empty` event
    busy: bool,
    reporter: Box<dyn SchedulerReporter<T, E>>,
    subscribers: Vec<mpsc::UnboundedSender<SchedulerEvent<T, E>>>,
}

impl<T, E> State<T, E> {
    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queued.len(),
            in_progress: self.in_progress.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
        }
    }

    fn occupied_slots(&self) -> usize {
        self.in_progress.len() + self.detached.len()
    }

    /// Release the slot held by a detached run
    fn release_detached(&mut self, handle: &ResultCell<T, E>) {
        self.detached.retain(|detached| !detached.same_cell(handle));
    }

    fn key_state(&self, key: &str) -> Option<KeyState> {
        if self.queued.contains_key(key) {
            Some(KeyState::Queued)
        } else if self.in_progress.contains_key(key) {
            Some(KeyState::InProgress)
        } else if self.completed.contains_key(key) {
            Some(KeyState::Completed)
        } else if self.failed.contains_key(key) {
            Some(KeyState::Failed)
        } else {
            None
        }
    }
}

impl<T: Clone, E: Clone> State<T, E> {
    fn emit(&mut self, event: SchedulerEvent<T, E>) {
        self.reporter.report_event(&event);
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

struct Shared<T, E> {
    state: Mutex<State<T, E>>,
    config: SchedulerConfig,
    max_parallel: usize,
    /// Set while nothing is queued or in progress.
    drained: ManualResetSignal<(), Infallible>,
    /// Pulsed whenever the run loop may have new work or free capacity that
    /// no in-progress handle will announce.
    wakeup: AutoResetSignal<(), Infallible>,
}

impl<T, E> Shared<T, E> {
    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_run_loop(&self) {
        let _ = self.wakeup.resolve(());
    }
}

impl<T, E> Drop for Shared<T, E> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.reporter.finish();
    }
}

impl<T, E> Shared<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Publish `Empty` if the last piece of outstanding work just went away.
    fn finish_if_drained(&self, state: &mut State<T, E>) {
        if state.busy && state.queued.is_empty() && state.in_progress.is_empty() {
            state.busy = false;
            let stats = state.stats();
            debug!(completed = stats.completed, failed = stats.failed, "scheduler drained");
            state.emit(SchedulerEvent::Empty { stats });
            let _ = self.drained.resolve(());
        }
    }

    /// Remove every trace of `key`. An in-flight run is detached: it keeps
    /// running and settles its own handle but no longer touches the maps.
    /// Its concurrency slot stays taken until it finishes.
    fn evict(&self, state: &mut State<T, E>, key: &str) -> Option<Queued<T, E>> {
        let queued = state.queued.shift_remove(key);
        if let Some(in_flight) = state.in_progress.shift_remove(key) {
            debug!(key = %key, "detaching in-flight task");
            if in_flight.is_pending() {
                state.detached.push(in_flight);
            }
            self.wake_run_loop();
        }
        state.completed.remove(key);
        state.failed.remove(key);
        queued
    }

    fn enqueue_locked(
        self: &Arc<Self>,
        state: &mut State<T, E>,
        key: String,
        task: DeferredTask<T, E>,
    ) -> TaskHandle<T, E> {
        let followers = match self.evict(state, &key) {
            Some(replaced) => {
                debug!(key = %key, "replacing queued task");
                let mut followers = replaced.followers;
                followers.push(replaced.handle);
                followers
            }
            None => Vec::new(),
        };

        let handle = ResultCell::with_strictness(self.config.strict_cells);
        state.queued.insert(
            key.clone(),
            Queued {
                handle: handle.clone(),
                followers,
                task,
            },
        );
        trace!(key = %key, queued = state.queued.len(), "task enqueued");

        state.busy = true;
        self.drained.reset();
        if state.running {
            self.wake_run_loop();
        } else {
            state.running = true;
            tokio::spawn(self.clone().run_loop());
        }
        TaskHandle::new(handle)
    }

    fn get_locked(self: &Arc<Self>, state: &mut State<T, E>, key: &str) -> Option<TaskHandle<T, E>> {
        if let Some(value) = state.completed.get(key) {
            return Some(TaskHandle::new(ResultCell::resolved(value.clone())));
        }
        if let Some(handle) = state.in_progress.get(key) {
            return Some(TaskHandle::new(handle.clone()));
        }
        if let Some(error) = state.failed.get(key) {
            return Some(TaskHandle::new(ResultCell::rejected(error.clone())));
        }
        let queued = state.queued.shift_remove(key)?;
        debug!(key = %key, "promoting queued task ahead of the run loop");
        let handle = queued.handle.clone();
        state.in_progress.insert(key.to_string(), handle.clone());
        tokio::spawn(self.clone().run_task(key.to_string(), queued));
        Some(TaskHandle::new(handle))
    }

    async fn run_loop(self: Arc<Self>) {
        debug!(max_parallel = self.max_parallel, "run loop started");
        loop {
            let (in_flight, wakeup) = {
                let mut state = self.lock();
                if state.queued.is_empty() && state.in_progress.is_empty() {
                    state.running = false;
                    break;
                }

                if state.occupied_slots() < self.max_parallel {
                    if let Some((key, queued)) = state.queued.shift_remove_index(0) {
                        trace!(key = %key, in_progress = state.in_progress.len() + 1, "admitting task");
                        state.in_progress.insert(key.clone(), queued.handle.clone());
                        tokio::spawn(self.clone().run_task(key, queued));
                        continue;
                    }
                }

                // At capacity or nothing left to admit. Attach under the lock
                // so no wakeup pulse can slip in between.
                let in_flight: Vec<_> = state
                    .in_progress
                    .values()
                    .chain(&state.detached)
                    .filter(|handle| handle.is_pending())
                    .map(ResultCell::wait)
                    .collect();
                (in_flight, self.wakeup.wait())
            };

            if in_flight.is_empty() {
                let _ = wakeup.await;
                trace!("run loop woken");
                continue;
            }
            match future::select(future::select_all(in_flight), wakeup).await {
                Either::Left(_) => trace!("in-progress task settled"),
                Either::Right(_) => trace!("run loop woken"),
            }
        }
        debug!("run loop stopped");
    }

    async fn run_task(self: Arc<Self>, key: String, queued: Queued<T, E>) {
        let Queued {
            handle,
            followers,
            task,
        } = queued;

        trace!(key = %key, "task started");
        let outcome = match AssertUnwindSafe(async move { task().await })
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(key = %key, "task panicked, its handle will never settle");
                {
                    let mut state = self.lock();
                    if is_current(&state, &key, &handle) {
                        state.in_progress.shift_remove(&key);
                    } else {
                        state.release_detached(&handle);
                    }
                    self.wake_run_loop();
                    self.finish_if_drained(&mut state);
                }
                std::panic::resume_unwind(panic);
            }
        };

        {
            let mut state = self.lock();
            if is_current(&state, &key, &handle) {
                state.in_progress.shift_remove(&key);
                self.wake_run_loop();
                match &outcome {
                    Ok(value) => {
                        debug!(key = %key, "task completed");
                        state.completed.insert(key.clone(), value.clone());
                        state.emit(SchedulerEvent::Item {
                            key: key.clone(),
                            value: value.clone(),
                        });
                    }
                    Err(error) => {
                        debug!(key = %key, "task failed");
                        state.failed.insert(key.clone(), error.clone());
                        state.emit(SchedulerEvent::Failed {
                            key: key.clone(),
                            error: error.clone(),
                        });
                    }
                }
                self.finish_if_drained(&mut state);
            } else {
                debug!(key = %key, "detached task finished");
                state.release_detached(&handle);
                self.wake_run_loop();
            }
        }

        // Settle after the bookkeeping so woken waiters see the final maps.
        for cell in followers {
            let _ = cell.settle(outcome.clone());
        }
        let _ = handle.settle(outcome);
    }
}

fn is_current<T, E>(state: &State<T, E>, key: &str, handle: &ResultCell<T, E>) -> bool {
    state
        .in_progress
        .get(key)
        .is_some_and(|current| current.same_cell(handle))
}

/// A scheduler that runs at most one task per key and memoizes its outcome.
///
/// The scheduler is a cheap handle; clones share the same state. All methods
/// that may start work must be called from within a tokio runtime.
pub struct KeyedTaskScheduler<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for KeyedTaskScheduler<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Default for KeyedTaskScheduler<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> KeyedTaskScheduler<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a new scheduler with default configuration
    pub fn new() -> Self {
        Self::from_valid_config(SchedulerConfig::default())
    }

    /// Create a new scheduler with custom configuration
    pub fn with_config(config: SchedulerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: SchedulerConfig) -> Self {
        let max_parallel = config.resolved_max_parallel();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queued: IndexMap::new(),
                    in_progress: IndexMap::new(),
                    detached: Vec::new(),
                    completed: HashMap::new(),
                    failed: HashMap::new(),
                    running: false,
                    busy: false,
                    reporter: Box::new(NoOpReporter),
                    subscribers: Vec::new(),
                }),
                config,
                max_parallel,
                drained: ManualResetSignal::new(false),
                wakeup: AutoResetSignal::new(),
            }),
        }
    }

    /// Replace the reporter that observes scheduler events
    pub fn with_reporter<R>(self, reporter: R) -> Self
    where
        R: SchedulerReporter<T, E> + 'static,
    {
        self.shared.lock().reporter = Box::new(reporter);
        self
    }

    /// Get the current configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Subscribe to scheduler events. Every event published after this call
    /// is delivered to the returned receiver.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SchedulerEvent<T, E>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.lock().subscribers.push(sender);
        receiver
    }

    /// Submit `task` under `key`, replacing anything known about the key.
    ///
    /// Returns a handle that settles with the task's outcome. If an earlier
    /// submission for `key` has not started yet, its handle settles with this
    /// task's outcome instead. An earlier submission that is already running
    /// is detached and keeps its own outcome; it still counts against
    /// `max_parallel` until it finishes.
    pub fn enqueue<F, Fut>(&self, key: impl Into<String>, task: F) -> TaskHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut state = self.shared.lock();
        self.shared
            .enqueue_locked(&mut state, key.into(), boxed_task(task))
    }

    /// Look up `key`.
    ///
    /// Completed and failed keys return an already settled handle; a running
    /// key returns the shared in-flight handle; a queued key is started right
    /// away, ahead of the run loop and regardless of the concurrency limit.
    pub fn get(&self, key: &str) -> Option<TaskHandle<T, E>> {
        let mut state = self.shared.lock();
        self.shared.get_locked(&mut state, key)
    }

    /// Return the handle for `key`, submitting `task` only if the key is
    /// unknown. Concurrent callers for the same key share one execution.
    pub fn get_or_enqueue<F, Fut>(&self, key: impl Into<String>, task: F) -> TaskHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let mut state = self.shared.lock();
        match self.shared.get_locked(&mut state, &key) {
            Some(handle) => {
                trace!(key = %key, "deduplicated request");
                handle
            }
            None => self
                .shared
                .enqueue_locked(&mut state, key, boxed_task(task)),
        }
    }

    /// [`get_or_enqueue`](Self::get_or_enqueue) for a [`TaskSpec`]
    pub fn submit<S>(&self, spec: S) -> TaskHandle<T, E>
    where
        S: TaskSpec<Output = T, Error = E>,
    {
        let key = spec.key();
        self.get_or_enqueue(key, move || spec.into_future())
    }

    /// Forget `key`.
    ///
    /// If the key is running, waits for that run to finish first. The run is
    /// not cancelled; only the bookkeeping is removed.
    pub async fn reset(&self, key: &str) {
        loop {
            let (in_flight, wakeup) = {
                let mut state = self.shared.lock();
                match state.in_progress.get(key) {
                    Some(handle) => (
                        handle.is_pending().then(|| handle.wait()),
                        self.shared.wakeup.wait(),
                    ),
                    None => {
                        if self.shared.evict(&mut state, key).is_some() {
                            debug!(key = %key, "dropped queued task");
                        }
                        self.shared.finish_if_drained(&mut state);
                        trace!(key = %key, "key reset");
                        return;
                    }
                }
            };
            // The wakeup covers runs that end without settling their handle.
            match in_flight {
                Some(in_flight) => {
                    let _ = future::select(in_flight, wakeup).await;
                }
                None => {
                    let _ = wakeup.await;
                }
            }
        }
    }

    /// Wait until nothing is queued or in progress
    pub async fn drained(&self) {
        match self.shared.drained.wait().await {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }

    /// Whether any map holds `key`
    pub fn has(&self, key: &str) -> bool {
        self.state(key).is_some()
    }

    /// Which map holds `key`, if any
    pub fn state(&self, key: &str) -> Option<KeyState> {
        self.shared.lock().key_state(key)
    }

    /// Number of queued and in-progress keys
    pub fn len(&self) -> usize {
        self.stats().len()
    }

    /// Whether nothing is queued or in progress
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys in any map
    pub fn size(&self) -> usize {
        self.stats().size()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats()
    }
}

fn boxed_task<T, E, F, Fut>(task: F) -> DeferredTask<T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Box::new(move || -> TaskFuture<T, E> { Box::pin(task()) })
}

impl<T, E> Debug for KeyedTaskScheduler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("KeyedTaskScheduler")
            .field("max_parallel", &self.shared.max_parallel)
            .field("stats", &state.stats())
            .field("detached", &state.detached.len())
            .field("running", &state.running)
            .finish()
    }
}
