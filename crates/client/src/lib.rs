// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! gm-client: Client-side runtime for the gm job protocol
//!
//! Submits jobs to remote or in-process job servers, tracks each job through
//! its lifecycle, forwards server notifications to per-job listeners, and
//! recovers from lost server connections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  submit   ┌─────────────┐  Connection  ┌─────────────┐
//! │     Job     │──────────►│ ServerPool  │─────────────►│ Job server  │
//! │ (listener)  │◄──────────│  (registry) │◄─────────────│             │
//! └─────────────┘  frames   └─────────────┘    frames    └─────────────┘
//!                                  │
//!                    ┌─────────────┴─────────────┐
//!                    ▼                           ▼
//!             ┌─────────────┐             ┌─────────────┐
//!             │ LossPolicy  │             │StatusTracker│
//!             │ (injected)  │             │ (by handle) │
//!             └─────────────┘             └─────────────┘
//! ```
//!
//! Sockets and frame encoding live behind the [`Connector`], [`LocalServer`]
//! and [`Connection`] traits.

pub mod config;
pub mod connection;
pub mod error;
pub mod job;
pub mod policy;
pub mod pool;
pub mod status;
mod tracking;

pub use config::{ConfigError, PoolConfig};
pub use connection::{
    BoxFuture, Connection, ConnectionError, ConnectionResult, Connector, Link, LocalServer,
};
pub use error::{PoolError, PoolResult};
pub use job::{DiscardListener, Job, JobBuilder, JobListener, JobOutcome, JobResult};
pub use policy::{
    DefaultLossPolicy, Grounds, LossDirective, LossPolicy, DEFAULT_DIRECTIVE,
    DEFAULT_RECONNECT_DELAY,
};
pub use pool::{ConnectionState, ServerInfo, ServerKey, ServerKind, ServerPool};
pub use status::{JobSubmittal, StatusCallback};

pub use gm_core::{JobHandle, JobState, JobStatus, Priority, StatusFailure};

#[cfg(test)]
mod test_support;
