// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Job progress snapshots returned by status queries.

use serde::{Deserialize, Serialize};

/// Point-in-time progress of a job as reported by the server.
///
/// `known` is false when the server no longer tracks the handle (the job
/// finished, or never existed there). In that case the other fields are
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    known: bool,
    running: bool,
    numerator: i64,
    denominator: i64,
}

impl JobStatus {
    /// Creates a status snapshot.
    pub fn new(known: bool, running: bool, numerator: i64, denominator: i64) -> Self {
        JobStatus {
            known,
            running,
            numerator,
            denominator,
        }
    }

    /// The snapshot a server returns for a handle it does not track.
    pub fn unknown() -> Self {
        JobStatus::new(false, false, 0, 0)
    }

    /// Whether the server still tracks the job.
    pub fn is_known(&self) -> bool {
        self.known
    }

    /// Whether a worker is currently executing the job.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }

    /// Completed fraction in `[0, 1]`, if the worker reported a denominator.
    pub fn fraction(&self) -> Option<f64> {
        if self.denominator <= 0 {
            return None;
        }
        let ratio = self.numerator as f64 / self.denominator as f64;
        Some(ratio.clamp(0.0, 1.0))
    }
}

/// Why a status query could not produce a [`JobStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum StatusFailure {
    /// No live connection serves the job's server.
    #[error("no live connection to the job's server")]
    NoConnection,

    /// The server did not answer within the status deadline.
    #[error("status request timed out")]
    Timeout,

    /// The server answered with an error or a malformed response.
    #[error("protocol error while querying status")]
    ProtocolError,
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
