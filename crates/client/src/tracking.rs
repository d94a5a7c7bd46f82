// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Working jobs tracked by the server pool.
//!
//! Every accepted submission gets a [`Ticket`] that names it for as long as
//! it is tracked. Server frames are routed by the connection they arrived on
//! and the handle they carry, so a handle that a restarted server hands out
//! again can never reach a job accepted over an earlier connection.

use std::collections::HashMap;
use std::sync::Arc;

use gm_core::JobHandle;

use crate::job::Job;
use crate::pool::{ConnectionId, ServerKey};

/// Identifies one accepted submission within a pool.
pub(crate) type Ticket = u64;

struct Tracked {
    server: ServerKey,
    connection: ConnectionId,
    handle: JobHandle,
    job: Arc<Job>,
}

/// Jobs moved onto a new connection by [`JobTable::reroute`].
#[derive(Default)]
pub(crate) struct Rerouted {
    pub(crate) moved: Vec<(JobHandle, Arc<Job>)>,
    /// Jobs dropped because a newer job already holds their handle.
    pub(crate) displaced: Vec<(JobHandle, Arc<Job>)>,
}

#[derive(Default)]
pub(crate) struct JobTable {
    next_ticket: Ticket,
    jobs: HashMap<Ticket, Tracked>,
    routes: HashMap<(ConnectionId, JobHandle), Ticket>,
}

impl JobTable {
    /// Track `job`, accepted on `connection` under `handle`.
    ///
    /// A job already routed under the same handle on that connection stops
    /// being tracked and is returned.
    pub(crate) fn insert(
        &mut self,
        server: &ServerKey,
        connection: ConnectionId,
        handle: JobHandle,
        job: Arc<Job>,
    ) -> (Ticket, Option<Arc<Job>>) {
        let displaced = self
            .routes
            .remove(&(connection, handle.clone()))
            .and_then(|ticket| self.jobs.remove(&ticket))
            .map(|tracked| tracked.job);

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.routes.insert((connection, handle.clone()), ticket);
        self.jobs.insert(
            ticket,
            Tracked {
                server: server.clone(),
                connection,
                handle,
                job,
            },
        );
        (ticket, displaced)
    }

    pub(crate) fn get(&self, connection: ConnectionId, handle: &JobHandle) -> Option<Arc<Job>> {
        let ticket = self.routes.get(&(connection, handle.clone()))?;
        self.jobs.get(ticket).map(|tracked| Arc::clone(&tracked.job))
    }

    /// Stop tracking the job routed under `handle` on `connection`.
    pub(crate) fn remove_route(
        &mut self,
        connection: ConnectionId,
        handle: &JobHandle,
    ) -> Option<Arc<Job>> {
        let ticket = self.routes.remove(&(connection, handle.clone()))?;
        self.jobs.remove(&ticket).map(|tracked| tracked.job)
    }

    pub(crate) fn remove_ticket(&mut self, ticket: Ticket) -> Option<Arc<Job>> {
        let tracked = self.jobs.remove(&ticket)?;
        let route = (tracked.connection, tracked.handle);
        if self.routes.get(&route) == Some(&ticket) {
            self.routes.remove(&route);
        }
        Some(tracked.job)
    }

    /// Stop tracking every job of `server`. Returns how many there were.
    pub(crate) fn remove_server(&mut self, server: &ServerKey) -> usize {
        let tickets = self.tickets_of(server);
        for ticket in &tickets {
            self.remove_ticket(*ticket);
        }
        tickets.len()
    }

    pub(crate) fn count_server(&self, server: &ServerKey) -> usize {
        self.jobs.values().filter(|t| &t.server == server).count()
    }

    /// Route every job of `server` accepted over an older connection
    /// through `connection` instead.
    ///
    /// When two such jobs share a handle the newer submission keeps it.
    pub(crate) fn reroute(&mut self, server: &ServerKey, connection: ConnectionId) -> Rerouted {
        let mut stale: Vec<Ticket> = self
            .jobs
            .iter()
            .filter(|(_, t)| &t.server == server && t.connection != connection)
            .map(|(ticket, _)| *ticket)
            .collect();
        stale.sort_unstable_by(|a, b| b.cmp(a));

        let mut rerouted = Rerouted::default();
        for ticket in stale {
            let Some(tracked) = self.jobs.get(&ticket) else {
                continue;
            };
            let handle = tracked.handle.clone();
            let job = Arc::clone(&tracked.job);
            if self.routes.contains_key(&(connection, handle.clone())) {
                self.remove_ticket(ticket);
                rerouted.displaced.push((handle, job));
                continue;
            }

            let old_route = (tracked.connection, handle.clone());
            if self.routes.get(&old_route) == Some(&ticket) {
                self.routes.remove(&old_route);
            }
            self.routes.insert((connection, handle.clone()), ticket);
            if let Some(tracked) = self.jobs.get_mut(&ticket) {
                tracked.connection = connection;
            }
            rerouted.moved.push((handle, job));
        }
        rerouted
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    fn tickets_of(&self, server: &ServerKey) -> Vec<Ticket> {
        self.jobs
            .iter()
            .filter(|(_, t)| &t.server == server)
            .map(|(ticket, _)| *ticket)
            .collect()
    }
}

#[cfg(test)]
#[path = "tracking_tests.rs"]
mod tests;
