//! Configuration for the keyed task scheduler

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::limits::Limit;

/// Configuration for a [`KeyedTaskScheduler`](crate::KeyedTaskScheduler)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of tasks that can be in progress at once
    pub max_parallel: Limit,

    /// Whether handles produced by the scheduler panic when settled twice
    pub strict_cells: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: Limit::Default,
            strict_cells: cfg!(debug_assertions),
        }
    }
}

impl SchedulerConfig {
    /// Create a new scheduler configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tasks in progress at once
    pub fn with_max_parallel(mut self, max_parallel: usize) -> ConfigResult<Self> {
        let max = NonZeroUsize::new(max_parallel)
            .ok_or_else(|| ConfigError::invalid_max_parallel(max_parallel))?;
        self.max_parallel = Limit::Max(max);
        Ok(self)
    }

    /// Remove the concurrency limit entirely
    pub fn with_unbounded_parallelism(mut self) -> Self {
        self.max_parallel = Limit::None;
        self
    }

    /// Enable or disable strict result cells
    pub fn with_strict_cells(mut self, strict: bool) -> Self {
        self.strict_cells = strict;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        match self.max_parallel.resolve() {
            Some(0) => Err(ConfigError::invalid_max_parallel(0)),
            _ => Ok(()),
        }
    }

    /// The effective concurrency limit
    pub fn resolved_max_parallel(&self) -> usize {
        self.max_parallel.resolve().unwrap_or(usize::MAX)
    }

    /// Create a configuration for tests: one task at a time, strict cells
    pub fn for_testing() -> Self {
        Self {
            max_parallel: Limit::from(1),
            strict_cells: true,
        }
    }
}
