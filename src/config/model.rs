// src/config/model.rs

use serde::Deserialize;

use crate::types::Limit;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [queue]
/// name = "uploads"
/// max_concurrent_operations = 4
/// worker_threads = 2
/// start_suspended = false
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    /// Executor settings from `[queue]`.
    #[serde(default)]
    pub queue: QueueSection,
}

/// Validated configuration. Build it through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub queue: QueueSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(queue: QueueSection) -> Self {
        Self { queue }
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSection {
    /// Used for worker thread names and log fields.
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Ceiling on operations executing at the same time.
    ///
    /// A ceiling of 1 turns the whole queue serial, which makes subgroups
    /// pointless; it is accepted but logged.
    #[serde(default)]
    pub max_concurrent_operations: Limit,

    /// Tokio worker threads driving dependency waits. `None` lets Tokio
    /// pick (one per core). Bodies run on the blocking pool, not on these.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Start with execution suspended; operations queue up until resumed.
    #[serde(default)]
    pub start_suspended: bool,
}

fn default_queue_name() -> String {
    "subgroup-queue".to_string()
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            max_concurrent_operations: Limit::default(),
            worker_threads: None,
            start_suspended: false,
        }
    }
}

impl QueueSection {
    /// Convenience for tests and embedders.
    pub fn with_max_concurrent(mut self, limit: impl Into<Limit>) -> Self {
        self.max_concurrent_operations = limit.into();
        self
    }

    pub fn suspended(mut self, suspended: bool) -> Self {
        self.start_suspended = suspended;
        self
    }
}
