// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for gm-core operations.

use thiserror::Error;

use crate::job::JobState;

/// All possible errors raised by job state transitions and frame handling.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state: cannot {operation} a job that is {state}\n  hint: callback channels are only open while a job is working")]
    IllegalState {
        operation: &'static str,
        state: JobState,
    },

    #[error("job {0} completed twice\n  hint: the protocol layer delivered a duplicate result")]
    DoubleCompletion(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for gm-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
