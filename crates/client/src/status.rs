// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Asynchronous job status queries.
//!
//! A status query needs only a [`JobSubmittal`]; the [`Job`](crate::Job) it
//! came from may be long gone. Queries are correlated with responses by
//! connection and job handle, so responses for different jobs may arrive in
//! any order. Several queries for the same handle on the same connection
//! are answered oldest first, since their responses are indistinguishable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use gm_core::{JobHandle, JobStatus, StatusFailure};
use tokio::sync::oneshot;

use crate::pool::{ConnectionId, ServerKey};
use crate::tracking::Ticket;

/// Correlation token for a submitted job.
///
/// Returned by [`ServerPool::submit`](crate::ServerPool::submit) and valid
/// independently of the job object's lifetime. Two submissions that a
/// restarted server accepted under the same handle still compare unequal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobSubmittal {
    server: ServerKey,
    handle: JobHandle,
    ticket: Ticket,
}

impl JobSubmittal {
    pub(crate) fn new(server: ServerKey, handle: JobHandle, ticket: Ticket) -> Self {
        JobSubmittal {
            server,
            handle,
            ticket,
        }
    }

    /// The server that accepted the job.
    pub fn server(&self) -> &ServerKey {
        &self.server
    }

    /// The handle that server assigned.
    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub(crate) fn ticket(&self) -> Ticket {
        self.ticket
    }
}

/// Receives the outcome of a status query.
///
/// Exactly one method is called per query, on the pool's I/O context.
/// Implementations must not block.
pub trait StatusCallback: Send + 'static {
    fn on_success(&self, submittal: &JobSubmittal, status: JobStatus);

    fn on_failure(&self, submittal: &JobSubmittal, failure: StatusFailure);
}

pub(crate) type StatusReply = Result<JobStatus, StatusFailure>;

struct PendingQuery {
    request: u64,
    reply: oneshot::Sender<StatusReply>,
}

/// Outstanding status queries, keyed by connection and handle.
#[derive(Default)]
pub(crate) struct StatusTracker {
    next_request: AtomicU64,
    pending: Mutex<HashMap<(ConnectionId, JobHandle), VecDeque<PendingQuery>>>,
}

impl StatusTracker {
    fn lock(&self) -> MutexGuard<'_, HashMap<(ConnectionId, JobHandle), VecDeque<PendingQuery>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a query before its request is sent.
    pub(crate) fn register(
        &self,
        connection: ConnectionId,
        handle: JobHandle,
    ) -> (u64, oneshot::Receiver<StatusReply>) {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.lock()
            .entry((connection, handle))
            .or_default()
            .push_back(PendingQuery { request, reply });
        (request, rx)
    }

    /// Answer the oldest query for `handle` on `connection`.
    ///
    /// Returns false if nobody was waiting for it.
    pub(crate) fn resolve(
        &self,
        connection: ConnectionId,
        handle: &JobHandle,
        status: JobStatus,
    ) -> bool {
        let query = {
            let mut pending = self.lock();
            let key = (connection, handle.clone());
            let Some(queue) = pending.get_mut(&key) else {
                return false;
            };
            let query = queue.pop_front();
            if queue.is_empty() {
                pending.remove(&key);
            }
            query
        };
        match query {
            Some(query) => {
                // The caller may have timed out in the meantime.
                let _ = query.reply.send(Ok(status));
                true
            }
            None => false,
        }
    }

    /// Forget one query, e.g. after its deadline passed.
    pub(crate) fn cancel(&self, connection: ConnectionId, handle: &JobHandle, request: u64) {
        let mut pending = self.lock();
        let key = (connection, handle.clone());
        if let Some(queue) = pending.get_mut(&key) {
            queue.retain(|q| q.request != request);
            if queue.is_empty() {
                pending.remove(&key);
            }
        }
    }

    /// Fail every query outstanding on `connection`.
    pub(crate) fn fail_connection(&self, connection: ConnectionId, failure: StatusFailure) -> usize {
        let failed: Vec<PendingQuery> = {
            let mut pending = self.lock();
            let keys: Vec<_> = pending
                .keys()
                .filter(|(conn, _)| *conn == connection)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| pending.remove(key))
                .flatten()
                .collect()
        };
        let count = failed.len();
        for query in failed {
            let _ = query.reply.send(Err(failure));
        }
        count
    }

    /// Number of queries still waiting for a response.
    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
