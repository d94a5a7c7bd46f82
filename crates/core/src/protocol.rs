// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol frames exchanged between a client and a job server.
//!
//! These are the decoded forms only; how they are laid out on the wire is
//! the transport's business. The exchange is:
//! - Client submits jobs and asks for their status
//! - Server acknowledges submissions with a handle, then pushes progress,
//!   data, warnings, exceptions and finally a result keyed by that handle

use serde::{Deserialize, Serialize};

use crate::job::{JobHandle, Priority};
use crate::status::JobStatus;

/// Frames sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Submit a job.
    ///
    /// The server answers with `JobCreated`. Acknowledgements carry no
    /// correlation id, so they arrive in submission order per connection.
    SubmitJob {
        function: String,
        unique_id: Vec<u8>,
        payload: Vec<u8>,
        priority: Priority,
    },

    /// Ask for the progress of a job by handle.
    ///
    /// The server answers with `StatusRes` for the same handle.
    GetStatus { handle: JobHandle },
}

/// Frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The oldest outstanding submission on this connection was accepted.
    JobCreated { handle: JobHandle },

    /// Data pushed by the worker while the job runs.
    WorkData { handle: JobHandle, data: Vec<u8> },

    /// Warning pushed by the worker while the job runs.
    WorkWarning { handle: JobHandle, data: Vec<u8> },

    /// Exception pushed by the worker while the job runs.
    WorkException { handle: JobHandle, data: Vec<u8> },

    /// Progress notification pushed by the worker.
    WorkStatus {
        handle: JobHandle,
        numerator: i64,
        denominator: i64,
    },

    /// The job finished successfully.
    WorkComplete { handle: JobHandle, data: Vec<u8> },

    /// The job failed.
    WorkFail { handle: JobHandle },

    /// Response to a `GetStatus` request.
    StatusRes { handle: JobHandle, status: JobStatus },

    /// Server-side protocol error.
    Error { code: String, message: String },
}

impl ClientFrame {
    /// Creates a SubmitJob frame.
    pub fn submit_job(
        function: impl Into<String>,
        unique_id: impl Into<Vec<u8>>,
        payload: impl Into<Vec<u8>>,
        priority: Priority,
    ) -> Self {
        ClientFrame::SubmitJob {
            function: function.into(),
            unique_id: unique_id.into(),
            payload: payload.into(),
            priority,
        }
    }

    /// Creates a GetStatus frame.
    pub fn get_status(handle: JobHandle) -> Self {
        ClientFrame::GetStatus { handle }
    }

    /// Serializes the frame to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the frame from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerFrame {
    /// Creates a JobCreated frame.
    pub fn job_created(handle: impl Into<JobHandle>) -> Self {
        ServerFrame::JobCreated {
            handle: handle.into(),
        }
    }

    /// Creates a WorkData frame.
    pub fn work_data(handle: impl Into<JobHandle>, data: impl Into<Vec<u8>>) -> Self {
        ServerFrame::WorkData {
            handle: handle.into(),
            data: data.into(),
        }
    }

    /// Creates a WorkWarning frame.
    pub fn work_warning(handle: impl Into<JobHandle>, data: impl Into<Vec<u8>>) -> Self {
        ServerFrame::WorkWarning {
            handle: handle.into(),
            data: data.into(),
        }
    }

    /// Creates a WorkException frame.
    pub fn work_exception(handle: impl Into<JobHandle>, data: impl Into<Vec<u8>>) -> Self {
        ServerFrame::WorkException {
            handle: handle.into(),
            data: data.into(),
        }
    }

    /// Creates a WorkStatus frame.
    pub fn work_status(handle: impl Into<JobHandle>, numerator: i64, denominator: i64) -> Self {
        ServerFrame::WorkStatus {
            handle: handle.into(),
            numerator,
            denominator,
        }
    }

    /// Creates a WorkComplete frame.
    pub fn work_complete(handle: impl Into<JobHandle>, data: impl Into<Vec<u8>>) -> Self {
        ServerFrame::WorkComplete {
            handle: handle.into(),
            data: data.into(),
        }
    }

    /// Creates a WorkFail frame.
    pub fn work_fail(handle: impl Into<JobHandle>) -> Self {
        ServerFrame::WorkFail {
            handle: handle.into(),
        }
    }

    /// Creates a StatusRes frame.
    pub fn status_res(handle: impl Into<JobHandle>, status: JobStatus) -> Self {
        ServerFrame::StatusRes {
            handle: handle.into(),
            status,
        }
    }

    /// Creates an Error frame.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The job handle this frame is keyed by, if any.
    pub fn handle(&self) -> Option<&JobHandle> {
        match self {
            ServerFrame::JobCreated { handle }
            | ServerFrame::WorkData { handle, .. }
            | ServerFrame::WorkWarning { handle, .. }
            | ServerFrame::WorkException { handle, .. }
            | ServerFrame::WorkStatus { handle, .. }
            | ServerFrame::WorkComplete { handle, .. }
            | ServerFrame::WorkFail { handle }
            | ServerFrame::StatusRes { handle, .. } => Some(handle),
            ServerFrame::Error { .. } => None,
        }
    }

    /// Serializes the frame to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the frame from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
