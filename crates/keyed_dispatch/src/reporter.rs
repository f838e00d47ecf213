//! Notifications published by the keyed task scheduler
//!
//! Events are delivered synchronously, in order, to a [`SchedulerReporter`]
//! and to every live subscriber channel. Reporters run while the scheduler's
//! bookkeeping is locked and must not call back into the scheduler.

use std::fmt::Debug;

use crate::scheduler::SchedulerStats;

/// Event published by a [`KeyedTaskScheduler`](crate::KeyedTaskScheduler)
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent<T, E> {
    /// A task finished successfully
    Item { key: String, value: T },
    /// A task failed; the error is cached for the key
    Failed { key: String, error: E },
    /// Nothing is queued or in progress any more
    Empty { stats: SchedulerStats },
}

impl<T, E> SchedulerEvent<T, E> {
    /// The key this event is about, `None` for [`SchedulerEvent::Empty`]
    pub fn key(&self) -> Option<&str> {
        match self {
            SchedulerEvent::Item { key, .. } | SchedulerEvent::Failed { key, .. } => Some(key),
            SchedulerEvent::Empty { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SchedulerEvent::Empty { .. })
    }
}

/// Trait for observing scheduler events
pub trait SchedulerReporter<T, E>: Send {
    /// Report a scheduler event
    fn report_event(&mut self, event: &SchedulerEvent<T, E>);

    /// Called when the scheduler is dropped
    fn finish(&mut self) {}
}

/// A reporter that discards all events
#[derive(Debug, Default)]
pub struct NoOpReporter;

impl<T, E> SchedulerReporter<T, E> for NoOpReporter {
    fn report_event(&mut self, _event: &SchedulerEvent<T, E>) {}
}

/// A reporter that forwards events to `tracing`
#[derive(Debug, Default)]
pub struct TracingReporter {
    context: Option<String>,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self { context: None }
    }

    /// Attach a context label to every logged event
    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
        }
    }
}

impl<T: Debug, E: Debug> SchedulerReporter<T, E> for TracingReporter {
    fn report_event(&mut self, event: &SchedulerEvent<T, E>) {
        let context = self.context.as_deref().unwrap_or_default();
        match event {
            SchedulerEvent::Item { key, value } => {
                tracing::debug!(context, key = %key, value = ?value, "task completed");
            }
            SchedulerEvent::Failed { key, error } => {
                tracing::warn!(context, key = %key, error = ?error, "task failed");
            }
            SchedulerEvent::Empty { stats } => {
                tracing::debug!(
                    context,
                    completed = stats.completed,
                    failed = stats.failed,
                    "scheduler drained"
                );
            }
        }
    }
}

/// A reporter that broadcasts events to multiple reporters
pub struct MultiReporter<T, E> {
    reporters: Vec<Box<dyn SchedulerReporter<T, E>>>,
}

impl<T, E> MultiReporter<T, E> {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn add_reporter<R: SchedulerReporter<T, E> + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl<T, E> Default for MultiReporter<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SchedulerReporter<T, E> for MultiReporter<T, E> {
    fn report_event(&mut self, event: &SchedulerEvent<T, E>) {
        for reporter in &mut self.reporters {
            reporter.report_event(event);
        }
    }

    fn finish(&mut self) {
        for reporter in &mut self.reporters {
            reporter.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Event = SchedulerEvent<i32, String>;

    #[derive(Debug, Default)]
    struct TestReporter {
        events: Arc<Mutex<Vec<Event>>>,
        finished: Arc<Mutex<bool>>,
    }

    impl SchedulerReporter<i32, String> for TestReporter {
        fn report_event(&mut self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn finish(&mut self) {
            *self.finished.lock().unwrap() = true;
        }
    }

    fn item(key: &str, value: i32) -> Event {
        SchedulerEvent::Item {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn test_event_helpers() {
        assert_eq!(item("a", 1).key(), Some("a"));
        let empty: Event = SchedulerEvent::Empty {
            stats: SchedulerStats::default(),
        };
        assert!(empty.is_empty());
        assert_eq!(empty.key(), None);
    }

    #[test]
    fn test_multi_reporter() {
        let reporter1 = TestReporter::default();
        let reporter2 = TestReporter::default();
        let events1 = reporter1.events.clone();
        let events2 = reporter2.events.clone();
        let finished = reporter2.finished.clone();

        let mut multi = MultiReporter::new()
            .add_reporter(reporter1)
            .add_reporter(reporter2);
        assert_eq!(multi.len(), 2);

        multi.report_event(&item("a", 1));
        multi.finish();

        assert_eq!(*events1.lock().unwrap(), vec![item("a", 1)]);
        assert_eq!(*events2.lock().unwrap(), vec![item("a", 1)]);
        assert!(*finished.lock().unwrap());
    }

    #[test]
    fn test_tracing_and_no_op_reporters() {
        let mut reporter = TracingReporter::with_context("test");
        reporter.report_event(&item("a", 1));
        reporter.report_event(&SchedulerEvent::<i32, String>::Failed {
            key: "b".to_string(),
            error: "boom".to_string(),
        });

        let mut reporter = NoOpReporter;
        SchedulerReporter::<i32, String>::report_event(&mut reporter, &item("a", 1));
    }
}
