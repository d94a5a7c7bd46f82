// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! gm-core: Shared protocol vocabulary for the gm job client
//!
//! This crate provides the value types exchanged with job servers: job
//! handles, priorities, lifecycle states, status snapshots and the decoded
//! protocol frames consumed by the client runtime.

pub mod error;
pub mod job;
pub mod protocol;
pub mod status;

pub use error::{Error, Result};
pub use job::{JobHandle, JobState, Priority};
pub use protocol::{ClientFrame, ServerFrame};
pub use status::{JobStatus, StatusFailure};
