// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for server pool operations.

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::pool::ServerKey;

/// Errors returned to application code by [`ServerPool`](crate::ServerPool).
///
/// Loss-policy failures never appear here; the pool resolves them to the
/// default directive.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("job was already submitted\n  hint: a job can be submitted exactly once")]
    AlreadySubmitted,

    #[error("no job server is connected")]
    NoServerAvailable,

    #[error("unknown server: {0}")]
    UnknownServer(ServerKey),

    #[error("server already registered: {0}")]
    DuplicateServer(ServerKey),

    #[error("connection to {0} was lost before the server answered")]
    ConnectionLost(ServerKey),

    #[error("server {0} did not acknowledge the submission in time")]
    ResponseTimeout(ServerKey),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("server pool has been shut down")]
    Shutdown,
}

/// Result type for server pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
