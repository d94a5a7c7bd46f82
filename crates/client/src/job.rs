// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The job state machine.
//!
//! A [`Job`] moves `New → Submitted → Working → Completed` and never back.
//! State, result and connection binding live behind one lock so readers
//! always see a consistent snapshot: a binding exists exactly while the job
//! is working, and a result exactly once it is completed.
//!
//! Notifications pushed by the server (data, warnings, exceptions, progress,
//! the final result) reach the caller through the [`JobListener`] given at
//! construction.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use gm_core::{Error, JobHandle, JobState, Priority, Result};
use uuid::Uuid;

use crate::connection::Connection;

/// Longest unique ID a job server accepts.
pub const MAX_UNIQUE_ID_LEN: usize = 64;

/// Receives the notifications a job server pushes for one job.
///
/// Every method defaults to discarding the notification, so implementors
/// only override the channels they care about. Methods run on the
/// connection's reader task and must not block.
pub trait JobListener: Send + Sync {
    /// Data sent by the worker while the job runs.
    fn on_data(&self, _data: &[u8]) {}

    /// Warning sent by the worker while the job runs.
    fn on_warning(&self, _warning: &[u8]) {}

    /// Exception sent by the worker while the job runs.
    fn on_exception(&self, _exception: &[u8]) {}

    /// Progress reported by the worker.
    fn on_status(&self, _numerator: i64, _denominator: i64) {}

    /// The job finished. Called once, after the result is stored.
    fn on_complete(&self, _result: &JobResult) {}
}

/// Listener that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardListener;

impl JobListener for DiscardListener {}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The worker returned a result.
    Success,
    /// The worker reported failure.
    Failure,
}

/// Final result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    outcome: JobOutcome,
    data: Vec<u8>,
}

impl JobResult {
    /// A successful result carrying the worker's output.
    pub fn success(data: impl Into<Vec<u8>>) -> Self {
        JobResult {
            outcome: JobOutcome::Success,
            data: data.into(),
        }
    }

    /// A failed result. Failures carry no data.
    pub fn failure() -> Self {
        JobResult {
            outcome: JobOutcome::Failure,
            data: Vec::new(),
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Success
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Link between a working job and the connection serving it.
///
/// The connection reference is weak: the server pool alone decides when a
/// connection lives or dies. A detached binding keeps only the handle.
struct Binding {
    connection: Option<Weak<dyn Connection>>,
    handle: JobHandle,
}

struct JobInner {
    state: JobState,
    result: Option<JobResult>,
    binding: Option<Binding>,
}

/// A unit of work submitted to a job server.
pub struct Job {
    unique_id: Vec<u8>,
    function: String,
    payload: Vec<u8>,
    priority: Priority,
    listener: Arc<dyn JobListener>,
    inner: RwLock<JobInner>,
}

/// Builder for [`Job`].
pub struct JobBuilder {
    function: String,
    payload: Vec<u8>,
    unique_id: Option<Vec<u8>>,
    priority: Priority,
    listener: Option<Arc<dyn JobListener>>,
}

impl JobBuilder {
    /// Use a caller-chosen unique ID instead of a generated one.
    pub fn unique_id(mut self, unique_id: impl Into<Vec<u8>>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Register the listener that receives this job's notifications.
    pub fn listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validate the arguments and create the job in state `New`.
    pub fn build(self) -> Result<Job> {
        validate_function(&self.function)?;

        let unique_id = match self.unique_id {
            Some(id) => {
                validate_unique_id(&id)?;
                id
            }
            None => generate_unique_id(),
        };

        Ok(Job {
            unique_id,
            function: self.function,
            payload: self.payload,
            priority: self.priority,
            listener: self.listener.unwrap_or_else(|| Arc::new(DiscardListener)),
            inner: RwLock::new(JobInner {
                state: JobState::New,
                result: None,
                binding: None,
            }),
        })
    }
}

fn validate_function(function: &str) -> Result<()> {
    if function.is_empty() {
        return Err(Error::InvalidArgument("function name is empty".into()));
    }
    if function.contains('\0') {
        return Err(Error::InvalidArgument(
            "function name contains a NUL byte".into(),
        ));
    }
    Ok(())
}

fn validate_unique_id(id: &[u8]) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidArgument("unique ID is empty".into()));
    }
    if id.contains(&0) {
        return Err(Error::InvalidArgument("unique ID contains a NUL byte".into()));
    }
    if id.len() > MAX_UNIQUE_ID_LEN {
        return Err(Error::InvalidArgument(format!(
            "unique ID is {} bytes, the limit is {MAX_UNIQUE_ID_LEN}",
            id.len()
        )));
    }
    Ok(())
}

fn generate_unique_id() -> Vec<u8> {
    Uuid::new_v4().to_string().into_bytes()
}

impl Job {
    /// Start building a job for `function` with the given payload.
    pub fn builder(function: impl Into<String>, payload: impl Into<Vec<u8>>) -> JobBuilder {
        JobBuilder {
            function: function.into(),
            payload: payload.into(),
            unique_id: None,
            priority: Priority::Normal,
            listener: None,
        }
    }

    /// Create a normal-priority job with a generated unique ID and no
    /// listener.
    pub fn new(function: impl Into<String>, payload: impl Into<Vec<u8>>) -> Result<Job> {
        Self::builder(function, payload).build()
    }

    fn read(&self) -> RwLockReadGuard<'_, JobInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn unique_id(&self) -> &[u8] {
        &self.unique_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> JobState {
        self.read().state
    }

    pub fn is_complete(&self) -> bool {
        self.state() == JobState::Completed
    }

    /// The server-assigned handle, available only while working.
    pub fn handle(&self) -> Option<JobHandle> {
        self.read().binding.as_ref().map(|b| b.handle.clone())
    }

    /// True only while working over a connection that is still open.
    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|conn| !conn.is_closed())
    }

    /// The result, once completed.
    pub fn result(&self) -> Option<JobResult> {
        self.read().result.clone()
    }

    /// The connection serving this job, if it is still owned by the pool.
    pub(crate) fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.read()
            .binding
            .as_ref()
            .and_then(|b| b.connection.as_ref())
            .and_then(Weak::upgrade)
    }

    /// Claim the job for submission.
    ///
    /// Returns true for exactly one caller; every other caller, concurrent
    /// or later, gets false and changes nothing. [`ServerPool::submit`]
    /// claims the job itself, so a job claimed here is rejected by the pool
    /// with [`PoolError::AlreadySubmitted`].
    ///
    /// [`ServerPool::submit`]: crate::ServerPool::submit
    /// [`PoolError::AlreadySubmitted`]: crate::PoolError::AlreadySubmitted
    pub fn submit(&self) -> bool {
        let mut inner = self.write();
        if inner.state != JobState::New {
            return false;
        }
        inner.state = JobState::Submitted;
        true
    }

    /// Install the binding once a server accepted the job.
    ///
    /// A working job may be bound again for the same handle after its
    /// connection was re-established.
    pub(crate) fn bind(&self, connection: &Arc<dyn Connection>, handle: JobHandle) -> Result<()> {
        let mut inner = self.write();
        match inner.state {
            JobState::Submitted => {}
            JobState::Working
                if inner
                    .binding
                    .as_ref()
                    .is_some_and(|b| b.handle == handle) => {}
            state => {
                return Err(Error::IllegalState {
                    operation: "bind",
                    state,
                })
            }
        }
        inner.state = JobState::Working;
        inner.binding = Some(Binding {
            connection: Some(Arc::downgrade(connection)),
            handle,
        });
        Ok(())
    }

    /// Drop the connection of a working job, keeping its handle.
    ///
    /// The job stays `Working` but nothing routes server frames to it
    /// anymore.
    pub(crate) fn detach(&self) {
        if let Some(binding) = self.write().binding.as_mut() {
            binding.connection = None;
        }
    }

    /// Store the result, release the binding and notify the listener.
    ///
    /// Completing twice is a protocol-layer bug: it is logged, asserted in
    /// debug builds, and reported as [`Error::DoubleCompletion`].
    pub(crate) fn complete(&self, result: JobResult) -> Result<()> {
        let previous = {
            let mut inner = self.write();
            let previous = inner.state;
            if previous == JobState::Working {
                inner.state = JobState::Completed;
                inner.result = Some(result.clone());
                inner.binding = None;
            }
            previous
        };

        match previous {
            JobState::Working => {
                self.listener.on_complete(&result);
                Ok(())
            }
            JobState::Completed => {
                let id = String::from_utf8_lossy(&self.unique_id).into_owned();
                tracing::error!(unique_id = %id, function = %self.function, "job completed twice");
                debug_assert_ne!(previous, JobState::Completed, "job {id} completed twice");
                Err(Error::DoubleCompletion(id))
            }
            state => Err(Error::IllegalState {
                operation: "complete",
                state,
            }),
        }
    }

    fn ensure_working(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            JobState::Working => Ok(()),
            state => Err(Error::IllegalState { operation, state }),
        }
    }

    /// Deliver worker data to the listener. Only valid while working.
    pub fn deliver_data(&self, data: &[u8]) -> Result<()> {
        self.ensure_working("deliver data to")?;
        self.listener.on_data(data);
        Ok(())
    }

    /// Deliver a worker warning to the listener. Only valid while working.
    pub fn deliver_warning(&self, warning: &[u8]) -> Result<()> {
        self.ensure_working("deliver a warning to")?;
        self.listener.on_warning(warning);
        Ok(())
    }

    /// Deliver a worker exception to the listener. Only valid while working.
    pub fn deliver_exception(&self, exception: &[u8]) -> Result<()> {
        self.ensure_working("deliver an exception to")?;
        self.listener.on_exception(exception);
        Ok(())
    }

    /// Forward a progress notification to the listener.
    pub fn deliver_status(&self, numerator: i64, denominator: i64) {
        self.listener.on_status(numerator, denominator);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("Job")
            .field("function", &self.function)
            .field("unique_id", &String::from_utf8_lossy(&self.unique_id))
            .field("priority", &self.priority)
            .field("state", &inner.state)
            .field("handle", &inner.binding.as_ref().map(|b| &b.handle))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
