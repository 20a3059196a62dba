// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::operation::OperationId;

#[derive(Error, Debug)]
pub enum SubGroupError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Operation {0} was already handed to a queue")]
    AlreadyEnqueued(OperationId),

    #[error("Operation {0} has already started executing")]
    AlreadyStarted(OperationId),

    #[error("Operation {operation} is not ready: dependency {dependency} has not finished")]
    NotReady {
        operation: OperationId,
        dependency: OperationId,
    },

    #[error("Dependency cycle: {operation} cannot depend on {dependency}")]
    DependencyCycle {
        operation: OperationId,
        dependency: OperationId,
    },

    #[error("Executor rejected operation {id}: {reason}")]
    Rejected { id: OperationId, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SubGroupError>;
