// src/config/validate.rs

use tracing::warn;

use crate::config::model::{ConfigFile, QueueSection, RawConfigFile};
use crate::errors::{Result, SubGroupError};
use crate::types::Limit;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SubGroupError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_queue_section(&raw.queue)?;
        Ok(ConfigFile::new_unchecked(raw.queue))
    }
}

pub fn validate_queue_section(queue: &QueueSection) -> Result<()> {
    if queue.name.trim().is_empty() {
        return Err(SubGroupError::ConfigError(
            "[queue].name must not be empty".to_string(),
        ));
    }

    if queue.worker_threads == Some(0) {
        return Err(SubGroupError::ConfigError(
            "[queue].worker_threads must be >= 1 (got 0)".to_string(),
        ));
    }

    if let Limit::Max(max) = queue.max_concurrent_operations {
        if max.get() == 1 {
            warn!(
                queue = %queue.name,
                "max_concurrent_operations = 1 makes the queue serial; subgroups add nothing"
            );
        }
    }

    Ok(())
}
