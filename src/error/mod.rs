// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

use crate::task::TaskError;

#[derive(Debug, Error)]
pub enum DeferrableError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Task execution failed: {0}")]
    Task(#[from] TaskError),
}

pub type Result<T> = std::result::Result<T, DeferrableError>;
