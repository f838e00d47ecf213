use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Defines how many tasks a scheduler may run at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Limit {
    /// There is no limit.
    None,

    /// There is an upper limit.
    Max(NonZeroUsize),

    /// Use a heuristic to determine the limit.
    #[default]
    Default,
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZeroUsize::new(value).map(Limit::Max).unwrap_or(Limit::None)
    }
}

impl Limit {
    /// The effective number of concurrent tasks, `None` when unbounded.
    pub fn resolve(self) -> Option<usize> {
        match self {
            Limit::None => None,
            Limit::Max(max) => Some(max.get()),
            Limit::Default => Some(num_cpus::get().max(1)),
        }
    }
}
