// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Value types describing a job as the protocol sees it.
//!
//! This module contains the scalar vocabulary shared by the client runtime
//! and anything that speaks the job protocol: Priority, JobState and
//! JobHandle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Queue-ordering class applied by the job server.
///
/// Servers pull jobs from a priority queue: every high job is handed out
/// before any normal job, and every normal job before any low job. Within a
/// class jobs are served first-submitted-first-served. Workers never see the
/// priority.
///
/// The derived ordering follows the queue: `Low < Normal < High`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Served after every normal and high job.
    Low,
    /// The default class.
    #[default]
    Normal,
    /// Served before everything else.
    High,
}

impl Priority {
    /// Returns the string representation used in frames and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(Error::InvalidArgument(format!("unknown priority '{s}'"))),
        }
    }
}

/// Lifecycle state of a job.
///
/// States only ever move forward: `New → Submitted → Working → Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet handed to a client.
    New,
    /// Claimed by a client but not yet accepted by a job server.
    Submitted,
    /// Accepted by a job server. Callback channels are open only here.
    Working,
    /// The result is available.
    Completed,
}

impl JobState {
    /// Returns the string representation used in logs and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Submitted => "submitted",
            JobState::Working => "working",
            JobState::Completed => "completed",
        }
    }

    /// Check if a transition from this state to target is valid.
    ///
    /// Only single forward steps are allowed.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        matches!(
            (self, target),
            (JobState::New, JobState::Submitted)
                | (JobState::Submitted, JobState::Working)
                | (JobState::Working, JobState::Completed)
        )
    }

    /// Returns true once the job has a result.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server-assigned identifier for a submitted job.
///
/// Handles are opaque bytes; they are only meaningful to the server that
/// issued them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(Vec<u8>);

impl JobHandle {
    /// Wraps raw handle bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        JobHandle(bytes.into())
    }

    /// The raw handle bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for JobHandle {
    fn from(s: &str) -> Self {
        JobHandle(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for JobHandle {
    fn from(bytes: Vec<u8>) -> Self {
        JobHandle(bytes)
    }
}

impl PartialEq<&str> for JobHandle {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
