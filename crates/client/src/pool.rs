// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of job servers and owner of every connection to them.
//!
//! The pool is the only component that opens or closes connections and the
//! only caller of the [`LossPolicy`]. Each registered server has one entry
//! that moves between these states:
//!
//! ```text
//!             connect ok
//! Connecting ───────────► Connected
//!     ▲  │ connect failed      │ stream ended / response timeout
//!     │  ▼                     ▼
//!     │ Disconnected ◄─────────┘
//!     │  │ policy consulted once
//!     │  ├── Reconnect { delay } ──► PendingReconnect ──(delay)──┐
//!     │  └── Remove (or local server) ──► entry dropped          │
//!     └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Loss handling is keyed by connection id, so however many jobs, readers
//! or senders notice the same dead connection, the policy fires once.
//!
//! Jobs whose connection was lost stay `Working` with `is_connected() ==
//! false`. When the same server comes back they are bound to the new
//! connection under their old handle; callers that stop caring call
//! [`ServerPool::abandon`]. A restarted server may hand out that handle
//! again: the newer job keeps it and the older one is detached.
//!
//! Each connection remembers the jobs it completed most recently, so a
//! duplicate result or a notification arriving after the result still
//! reaches the job and is reported as misdelivered.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gm_core::{ClientFrame, JobHandle, JobState, JobStatus, ServerFrame, StatusFailure};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionResult, Connector, Link, LocalServer};
use crate::error::{PoolError, PoolResult};
use crate::job::{Job, JobResult};
use crate::policy::{resolve_directive, DefaultLossPolicy, Grounds, LossDirective, LossPolicy};
use crate::status::{JobSubmittal, StatusCallback, StatusTracker};
use crate::tracking::{JobTable, Ticket};

/// Completed jobs each connection remembers for late frames.
const RECENT_COMPLETIONS: usize = 64;

/// Identifies one physical connection for the lifetime of the pool.
pub(crate) type ConnectionId = u64;

/// Identifies a server within a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServerKey {
    /// A job server reached over the network.
    Remote(SocketAddr),
    /// An in-process job server, by name.
    Local(String),
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKey::Remote(addr) => write!(f, "{addr}"),
            ServerKey::Local(name) => write!(f, "local:{name}"),
        }
    }
}

/// Whether a server is remote or in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Remote,
    Local,
}

/// Connection state of a registered server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and serving jobs.
    Connected,
    /// Lost; the loss policy is being consulted.
    Disconnected,
    /// Lost; a reconnect is scheduled after `delay`.
    PendingReconnect { delay: Duration },
}

/// Snapshot of a registry row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub key: ServerKey,
    pub kind: ServerKind,
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
}

#[derive(Clone)]
enum Endpoint {
    Remote(SocketAddr),
    Local(Arc<dyn LocalServer>),
}

impl Endpoint {
    fn kind(&self) -> ServerKind {
        match self {
            Endpoint::Remote(_) => ServerKind::Remote,
            Endpoint::Local(_) => ServerKind::Local,
        }
    }
}

enum EntryState {
    Connecting,
    Connected(Arc<LiveConnection>),
    Disconnected,
    PendingReconnect {
        delay: Duration,
        cancel: CancellationToken,
    },
}

impl EntryState {
    fn public(&self) -> ConnectionState {
        match self {
            EntryState::Connecting => ConnectionState::Connecting,
            EntryState::Connected(_) => ConnectionState::Connected,
            EntryState::Disconnected => ConnectionState::Disconnected,
            EntryState::PendingReconnect { delay, .. } => {
                ConnectionState::PendingReconnect { delay: *delay }
            }
        }
    }
}

/// Registry row for one server.
struct ServerEntry {
    endpoint: Endpoint,
    state: EntryState,
    /// Reconnect attempts since the last successful connection.
    attempts: u32,
    /// Bumped whenever in-flight connect or reconnect tasks become stale.
    epoch: u64,
}

struct PendingSubmission {
    job: Arc<Job>,
    reply: oneshot::Sender<(JobHandle, Ticket)>,
}

/// An established connection and the bookkeeping tied to it.
struct LiveConnection {
    id: ConnectionId,
    server: ServerKey,
    connection: Arc<dyn Connection>,
    /// Serializes sends so submissions hit the wire in queue order.
    send_lock: tokio::sync::Mutex<()>,
    /// Submissions awaiting `JobCreated`, oldest first.
    submissions: Mutex<VecDeque<PendingSubmission>>,
    /// Jobs completed over this connection, newest last.
    completed: Mutex<VecDeque<(JobHandle, Arc<Job>)>>,
    cancel: CancellationToken,
}

impl LiveConnection {
    fn submissions(&self) -> MutexGuard<'_, VecDeque<PendingSubmission>> {
        self.submissions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn completed(&self) -> MutexGuard<'_, VecDeque<(JobHandle, Arc<Job>)>> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember_completed(&self, handle: JobHandle, job: Arc<Job>) {
        let mut completed = self.completed();
        if completed.len() == RECENT_COMPLETIONS {
            completed.pop_front();
        }
        completed.push_back((handle, job));
    }

    fn recently_completed(&self, handle: &JobHandle) -> Option<Arc<Job>> {
        self.completed()
            .iter()
            .rev()
            .find(|(h, _)| h == handle)
            .map(|(_, job)| Arc::clone(job))
    }

    /// Stop the reader, close the link and fail waiting submitters.
    fn tear_down(&self) {
        self.cancel.cancel();
        self.connection.close();
        // Dropping the reply senders wakes every waiting submitter.
        self.submissions().clear();
        self.completed().clear();
    }
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    policy: Arc<dyn LossPolicy>,
    servers: Mutex<BTreeMap<ServerKey, ServerEntry>>,
    /// Working jobs, for dispatch and rebinding.
    jobs: Mutex<JobTable>,
    status: StatusTracker,
    /// Server frames that reached a job unable to take them.
    misdelivered: AtomicU64,
    next_connection_id: AtomicU64,
    next_server: AtomicUsize,
    shutdown: CancellationToken,
}

/// Registry of job servers.
///
/// Cheap to clone; all clones share the same registry. Must be used from
/// within a tokio runtime.
#[derive(Clone)]
pub struct ServerPool {
    inner: Arc<PoolInner>,
}

impl ServerPool {
    /// Create a pool that opens remote connections with `connector` and
    /// consults `policy` on connection loss.
    pub fn new(
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        policy: Arc<dyn LossPolicy>,
    ) -> Self {
        ServerPool {
            inner: Arc::new(PoolInner {
                config,
                connector,
                policy,
                servers: Mutex::new(BTreeMap::new()),
                jobs: Mutex::new(JobTable::default()),
                status: StatusTracker::default(),
                misdelivered: AtomicU64::new(0),
                next_connection_id: AtomicU64::new(1),
                next_server: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Create a pool with [`DefaultLossPolicy`].
    pub fn with_default_policy(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self::new(config, connector, Arc::new(DefaultLossPolicy))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn servers(&self) -> MutexGuard<'_, BTreeMap<ServerKey, ServerEntry>> {
        self.inner
            .servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn jobs(&self) -> MutexGuard<'_, JobTable> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The directive applied when the policy gives none.
    fn fallback_directive(&self) -> LossDirective {
        LossDirective::reconnect(self.inner.config.reconnect_delay())
    }

    // ---------------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------------

    /// Register a remote server and start connecting to it.
    pub fn add_server(&self, addr: SocketAddr) -> PoolResult<ServerKey> {
        self.register(ServerKey::Remote(addr), Endpoint::Remote(addr))
    }

    /// Register an in-process server and start connecting to it.
    pub fn add_local_server(&self, server: Arc<dyn LocalServer>) -> PoolResult<ServerKey> {
        let key = ServerKey::Local(server.name().to_string());
        self.register(key, Endpoint::Local(server))
    }

    fn register(&self, key: ServerKey, endpoint: Endpoint) -> PoolResult<ServerKey> {
        if self.inner.shutdown.is_cancelled() {
            return Err(PoolError::Shutdown);
        }
        {
            let mut servers = self.servers();
            if servers.contains_key(&key) {
                return Err(PoolError::DuplicateServer(key));
            }
            servers.insert(
                key.clone(),
                ServerEntry {
                    endpoint,
                    state: EntryState::Connecting,
                    attempts: 0,
                    epoch: 0,
                },
            );
        }
        info!(server = %key, "job server registered");
        self.spawn_connect(key.clone(), 0);
        Ok(key)
    }

    /// Remove a server, closing its connection without consulting the
    /// loss policy.
    pub fn remove_server(&self, key: &ServerKey) -> PoolResult<()> {
        let entry = self.servers().remove(key);
        match entry {
            Some(entry) => {
                self.release_entry(key, entry);
                info!(server = %key, "job server removed");
                Ok(())
            }
            None => Err(PoolError::UnknownServer(key.clone())),
        }
    }

    fn release_entry(&self, key: &ServerKey, entry: ServerEntry) {
        match entry.state {
            EntryState::Connected(live) => {
                live.tear_down();
                self.inner
                    .status
                    .fail_connection(live.id, StatusFailure::NoConnection);
            }
            EntryState::PendingReconnect { cancel, .. } => cancel.cancel(),
            EntryState::Connecting | EntryState::Disconnected => {}
        }

        let orphaned = self.jobs().remove_server(key);
        if orphaned > 0 {
            warn!(server = %key, orphaned, "jobs left working without a server");
        }
    }

    /// Snapshot of every registered server, ordered by key.
    pub fn server_list(&self) -> Vec<ServerInfo> {
        self.servers()
            .iter()
            .map(|(key, entry)| Self::info(key, entry))
            .collect()
    }

    /// Look up one server.
    pub fn server(&self, key: &ServerKey) -> PoolResult<ServerInfo> {
        self.servers()
            .get(key)
            .map(|entry| Self::info(key, entry))
            .ok_or_else(|| PoolError::UnknownServer(key.clone()))
    }

    fn info(key: &ServerKey, entry: &ServerEntry) -> ServerInfo {
        ServerInfo {
            key: key.clone(),
            kind: entry.endpoint.kind(),
            state: entry.state.public(),
            reconnect_attempts: entry.attempts,
        }
    }

    /// Reconnect a lost server now instead of waiting for its backoff.
    ///
    /// Does nothing for a server that is connected or connecting.
    pub fn reconnect_now(&self, key: &ServerKey) -> PoolResult<()> {
        let epoch = {
            let mut servers = self.servers();
            let entry = servers
                .get_mut(key)
                .ok_or_else(|| PoolError::UnknownServer(key.clone()))?;
            match &entry.state {
                EntryState::Connected(_) | EntryState::Connecting => return Ok(()),
                EntryState::PendingReconnect { cancel, .. } => cancel.cancel(),
                EntryState::Disconnected => {}
            }
            entry.epoch += 1;
            entry.attempts += 1;
            entry.state = EntryState::Connecting;
            entry.epoch
        };
        debug!(server = %key, "reconnecting on request");
        self.spawn_connect(key.clone(), epoch);
        Ok(())
    }

    /// Close every connection and cancel every pending reconnect.
    ///
    /// The loss policy is not consulted. Later submissions fail with
    /// [`PoolError::Shutdown`].
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let entries: Vec<(ServerKey, ServerEntry)> =
            std::mem::take(&mut *self.servers()).into_iter().collect();
        for (key, entry) in entries {
            self.release_entry(&key, entry);
        }
        info!("server pool shut down");
    }

    // ---------------------------------------------------------------------
    // Connecting
    // ---------------------------------------------------------------------

    fn spawn_connect(&self, key: ServerKey, epoch: u64) {
        let pool = self.clone();
        tokio::spawn(async move { pool.connect_attempt(key, epoch).await });
    }

    async fn connect_attempt(&self, key: ServerKey, epoch: u64) {
        let endpoint = {
            let servers = self.servers();
            match servers.get(&key) {
                Some(entry)
                    if entry.epoch == epoch && matches!(entry.state, EntryState::Connecting) =>
                {
                    entry.endpoint.clone()
                }
                _ => return,
            }
        };

        let result = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return,
            result = tokio::time::timeout(self.inner.config.connect_timeout(), self.open(&endpoint)) => result,
        };

        match result {
            Ok(Ok(link)) => self.install(key, epoch, link),
            Ok(Err(e)) => {
                warn!(server = %key, error = %e, "connection attempt failed");
                self.connect_failed(key, epoch);
            }
            Err(_) => {
                warn!(server = %key, "connection attempt timed out");
                self.connect_failed(key, epoch);
            }
        }
    }

    async fn open(&self, endpoint: &Endpoint) -> ConnectionResult<Link> {
        match endpoint {
            Endpoint::Remote(addr) => self.inner.connector.connect(*addr).await,
            Endpoint::Local(server) => server.open().await,
        }
    }

    fn install(&self, key: ServerKey, epoch: u64, link: Link) {
        let Link {
            connection,
            inbound,
        } = link;
        let live = Arc::new(LiveConnection {
            id: self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed),
            server: key.clone(),
            connection,
            send_lock: tokio::sync::Mutex::new(()),
            submissions: Mutex::new(VecDeque::new()),
            completed: Mutex::new(VecDeque::new()),
            cancel: self.inner.shutdown.child_token(),
        });

        let accepted = {
            let mut servers = self.servers();
            match servers.get_mut(&key) {
                Some(entry)
                    if entry.epoch == epoch && matches!(entry.state, EntryState::Connecting) =>
                {
                    entry.state = EntryState::Connected(Arc::clone(&live));
                    entry.attempts = 0;
                    true
                }
                _ => false,
            }
        };
        if !accepted {
            debug!(server = %key, "discarding connection for a stale attempt");
            live.tear_down();
            return;
        }

        info!(server = %key, connection = live.id, "connected to job server");
        self.rebind_jobs(&live);

        let pool = self.clone();
        tokio::spawn(async move { pool.read_frames(live, inbound).await });
    }

    /// Bind jobs left disconnected on this server to its new connection.
    fn rebind_jobs(&self, live: &LiveConnection) {
        let rerouted = self.jobs().reroute(&live.server, live.id);

        for (handle, job) in rerouted.displaced {
            job.detach();
            warn!(server = %live.server, %handle, "job handle reused by a newer job, old job detached");
        }
        for (handle, job) in rerouted.moved {
            match job.bind(&live.connection, handle.clone()) {
                Ok(()) => debug!(server = %live.server, %handle, "job bound to new connection"),
                Err(e) => warn!(server = %live.server, %handle, error = %e, "cannot rebind job"),
            }
        }
    }

    fn connect_failed(&self, key: ServerKey, epoch: u64) {
        let endpoint = {
            let mut servers = self.servers();
            match servers.get_mut(&key) {
                Some(entry)
                    if entry.epoch == epoch && matches!(entry.state, EntryState::Connecting) =>
                {
                    entry.state = EntryState::Disconnected;
                    entry.epoch += 1;
                    entry.endpoint.clone()
                }
                _ => return,
            }
        };
        self.consult_policy(&key, endpoint, Grounds::FailedConnection);
    }

    // ---------------------------------------------------------------------
    // Loss handling
    // ---------------------------------------------------------------------

    /// Handle the loss of connection `connection` to `key`.
    ///
    /// Only the first report for a given connection has any effect.
    pub(crate) fn handle_loss(&self, key: &ServerKey, connection: ConnectionId, grounds: Grounds) {
        let lost = {
            let mut servers = self.servers();
            let Some(entry) = servers.get_mut(key) else {
                debug!(server = %key, connection, "loss reported for unregistered server");
                return;
            };
            match &entry.state {
                EntryState::Connected(live) if live.id == connection => {}
                _ => {
                    debug!(server = %key, connection, "loss already handled");
                    return;
                }
            }
            let previous = std::mem::replace(&mut entry.state, EntryState::Disconnected);
            entry.epoch += 1;
            match previous {
                EntryState::Connected(live) => Some((live, entry.endpoint.clone())),
                _ => None,
            }
        };
        let Some((live, endpoint)) = lost else {
            return;
        };

        live.tear_down();
        let failed = self
            .inner
            .status
            .fail_connection(live.id, StatusFailure::NoConnection);
        let waiting = self.jobs().count_server(key);
        warn!(
            server = %key,
            connection,
            %grounds,
            waiting_jobs = waiting,
            failed_status_queries = failed,
            "lost connection to job server"
        );

        self.consult_policy(key, endpoint, grounds);
    }

    fn consult_policy(&self, key: &ServerKey, endpoint: Endpoint, grounds: Grounds) {
        match endpoint {
            Endpoint::Local(server) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.inner
                        .policy
                        .lost_local_server(server.as_ref(), self, grounds)
                }));
                if outcome.is_err() {
                    warn!(server = %key, "loss policy panicked on local server");
                }
                // Nothing can bring a shut-down in-process server back.
                let entry = self.servers().remove(key);
                if let Some(entry) = entry {
                    self.release_entry(key, entry);
                    info!(server = %key, "local job server removed");
                }
            }
            Endpoint::Remote(addr) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.inner.policy.lost_remote_server(addr, self, grounds)
                }));
                let directive = resolve_directive(key, outcome, self.fallback_directive());
                self.apply_directive(key, directive);
            }
        }
    }

    fn apply_directive(&self, key: &ServerKey, directive: LossDirective) {
        let fallback = self.fallback_directive();
        let mut servers = self.servers();
        let Some(entry) = servers.get_mut(key) else {
            debug!(server = %key, "server removed while consulting loss policy");
            return;
        };
        if !matches!(entry.state, EntryState::Disconnected) {
            debug!(server = %key, "server state changed while consulting loss policy");
            return;
        }

        let directive = match directive {
            LossDirective::Remove if entry.attempts == 0 => {
                warn!(server = %key, "removal deferred until the server has been retried once");
                fallback
            }
            directive => directive,
        };

        match directive {
            LossDirective::Remove => {
                let removed = servers.remove(key);
                drop(servers);
                if let Some(entry) = removed {
                    self.release_entry(key, entry);
                    info!(server = %key, "job server removed by loss policy");
                }
            }
            LossDirective::Reconnect { delay } => {
                entry.epoch += 1;
                let epoch = entry.epoch;
                let cancel = self.inner.shutdown.child_token();
                entry.state = EntryState::PendingReconnect {
                    delay,
                    cancel: cancel.clone(),
                };
                drop(servers);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                info!(server = %key, delay_ms, "reconnect scheduled");

                let pool = self.clone();
                let key = key.clone();
                tokio::spawn(async move { pool.reconnect_after(key, epoch, delay, cancel).await });
            }
        }
    }

    async fn reconnect_after(
        &self,
        key: ServerKey,
        epoch: u64,
        delay: Duration,
        cancel: CancellationToken,
    ) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        {
            let mut servers = self.servers();
            match servers.get_mut(&key) {
                Some(entry)
                    if entry.epoch == epoch
                        && matches!(entry.state, EntryState::PendingReconnect { .. }) =>
                {
                    entry.state = EntryState::Connecting;
                    entry.attempts += 1;
                }
                _ => return,
            }
        }
        debug!(server = %key, "reconnecting");
        self.connect_attempt(key, epoch).await;
    }

    // ---------------------------------------------------------------------
    // Inbound frames
    // ---------------------------------------------------------------------

    async fn read_frames(self, live: Arc<LiveConnection>, mut inbound: mpsc::Receiver<ServerFrame>) {
        loop {
            tokio::select! {
                _ = live.cancel.cancelled() => {
                    debug!(server = %live.server, connection = live.id, "reader stopped");
                    return;
                }
                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        self.handle_loss(&live.server, live.id, Grounds::UnexpectedDisconnect);
                        return;
                    };
                    self.dispatch(&live, frame);
                }
            }
        }
    }

    fn dispatch(&self, live: &LiveConnection, frame: ServerFrame) {
        match frame {
            ServerFrame::JobCreated { handle } => self.accept_submission(live, handle),
            ServerFrame::WorkData { handle, data } => {
                self.deliver(live, &handle, "data", |job| job.deliver_data(&data))
            }
            ServerFrame::WorkWarning { handle, data } => {
                self.deliver(live, &handle, "warning", |job| job.deliver_warning(&data))
            }
            ServerFrame::WorkException { handle, data } => {
                self.deliver(live, &handle, "exception", |job| job.deliver_exception(&data))
            }
            ServerFrame::WorkStatus {
                handle,
                numerator,
                denominator,
            } => self.deliver(live, &handle, "status", |job| {
                job.deliver_status(numerator, denominator);
                Ok(())
            }),
            ServerFrame::WorkComplete { handle, data } => {
                self.finish(live, handle, JobResult::success(data))
            }
            ServerFrame::WorkFail { handle } => self.finish(live, handle, JobResult::failure()),
            ServerFrame::StatusRes { handle, status } => {
                if !self.inner.status.resolve(live.id, &handle, status) {
                    debug!(server = %live.server, %handle, "unsolicited status response");
                }
            }
            ServerFrame::Error { code, message } => {
                warn!(server = %live.server, %code, %message, "job server reported an error");
                self.inner
                    .status
                    .fail_connection(live.id, StatusFailure::ProtocolError);
            }
        }
    }

    fn accept_submission(&self, live: &LiveConnection, handle: JobHandle) {
        let pending = live.submissions().pop_front();
        let Some(pending) = pending else {
            warn!(server = %live.server, %handle, "job created without an outstanding submission");
            return;
        };
        if let Err(e) = pending.job.bind(&live.connection, handle.clone()) {
            error!(server = %live.server, %handle, error = %e, "cannot bind accepted job");
            return;
        }
        let (ticket, displaced) = self.jobs().insert(
            &live.server,
            live.id,
            handle.clone(),
            Arc::clone(&pending.job),
        );
        if let Some(stale) = displaced {
            stale.detach();
            warn!(server = %live.server, %handle, "job handle reused by a newer job, old job detached");
        }
        debug!(server = %live.server, %handle, ticket, "job accepted");
        // The submitter may have given up already.
        let _ = pending.reply.send((handle, ticket));
    }

    /// The job a frame on `live` for `handle` belongs to, including jobs
    /// that connection completed recently.
    fn addressed_job(&self, live: &LiveConnection, handle: &JobHandle) -> Option<Arc<Job>> {
        let tracked = self.jobs().get(live.id, handle);
        tracked.or_else(|| live.recently_completed(handle))
    }

    fn misdelivered(&self) {
        self.inner.misdelivered.fetch_add(1, Ordering::Relaxed);
    }

    fn deliver<F>(&self, live: &LiveConnection, handle: &JobHandle, channel: &str, deliver: F)
    where
        F: FnOnce(&Job) -> gm_core::Result<()>,
    {
        let Some(job) = self.addressed_job(live, handle) else {
            debug!(server = %live.server, %handle, channel, "frame for untracked job dropped");
            return;
        };
        if let Err(e) = deliver(&job) {
            self.misdelivered();
            error!(server = %live.server, %handle, channel, error = %e, "misdelivered job notification");
        }
    }

    fn finish(&self, live: &LiveConnection, handle: JobHandle, result: JobResult) {
        let tracked = self.jobs().remove_route(live.id, &handle);
        let job = match tracked {
            Some(job) => {
                live.remember_completed(handle.clone(), Arc::clone(&job));
                job
            }
            None => match live.recently_completed(&handle) {
                Some(job) => job,
                None => {
                    debug!(server = %live.server, %handle, "result for untracked job dropped");
                    return;
                }
            },
        };

        // A second result trips the job's double-completion assertion; the
        // reader must survive it.
        match panic::catch_unwind(AssertUnwindSafe(|| job.complete(result))) {
            Ok(Ok(())) => debug!(server = %live.server, %handle, "job completed"),
            Ok(Err(e)) => {
                self.misdelivered();
                error!(server = %live.server, %handle, error = %e, "cannot complete job");
            }
            Err(_) => {
                self.misdelivered();
                error!(server = %live.server, %handle, "job completion panicked");
            }
        }
    }

    // ---------------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------------

    fn pick_connection(&self) -> Option<Arc<LiveConnection>> {
        let connected: Vec<Arc<LiveConnection>> = self
            .servers()
            .values()
            .filter_map(|entry| match &entry.state {
                EntryState::Connected(live) => Some(Arc::clone(live)),
                _ => None,
            })
            .collect();
        if connected.is_empty() {
            return None;
        }
        let index = self.inner.next_server.fetch_add(1, Ordering::Relaxed) % connected.len();
        connected.into_iter().nth(index)
    }

    fn live_connection(&self, key: &ServerKey) -> Option<Arc<LiveConnection>> {
        match self.servers().get(key).map(|entry| &entry.state) {
            Some(EntryState::Connected(live)) => Some(Arc::clone(live)),
            _ => None,
        }
    }

    /// Submit a job to a connected server.
    ///
    /// Resolves once the server has accepted the job, at which point the
    /// job is `Working`. If the submission fails after the job was claimed,
    /// the job stays `Submitted`.
    pub async fn submit(&self, job: Arc<Job>) -> PoolResult<JobSubmittal> {
        if self.inner.shutdown.is_cancelled() {
            return Err(PoolError::Shutdown);
        }
        if job.state() != JobState::New {
            return Err(PoolError::AlreadySubmitted);
        }
        let live = self.pick_connection().ok_or(PoolError::NoServerAvailable)?;
        if !job.submit() {
            return Err(PoolError::AlreadySubmitted);
        }

        let frame = ClientFrame::submit_job(
            job.function(),
            job.unique_id(),
            job.payload(),
            job.priority(),
        );
        let (reply, rx) = oneshot::channel();
        let sent = {
            let _guard = live.send_lock.lock().await;
            {
                let mut queue = live.submissions();
                if live.cancel.is_cancelled() {
                    return Err(PoolError::ConnectionLost(live.server.clone()));
                }
                queue.push_back(PendingSubmission {
                    job: Arc::clone(&job),
                    reply,
                });
            }
            live.connection.send(frame).await
        };
        if let Err(e) = sent {
            warn!(server = %live.server, error = %e, "submission could not be sent");
            self.handle_loss(&live.server, live.id, Grounds::UnexpectedDisconnect);
            return Err(e.into());
        }

        match tokio::time::timeout(self.inner.config.response_timeout(), rx).await {
            Ok(Ok((handle, ticket))) => Ok(JobSubmittal::new(live.server.clone(), handle, ticket)),
            Ok(Err(_)) => Err(PoolError::ConnectionLost(live.server.clone())),
            Err(_) => {
                warn!(server = %live.server, "job server did not acknowledge submission");
                self.handle_loss(&live.server, live.id, Grounds::ResponseTimeout);
                Err(PoolError::ResponseTimeout(live.server.clone()))
            }
        }
    }

    /// Stop tracking a job left working without a connection.
    ///
    /// The job keeps its state and handle but loses its connection; it
    /// will never be rebound or completed. Returns false if the pool was
    /// not tracking it, which includes a job already displaced by a newer
    /// one with its handle.
    pub fn abandon(&self, submittal: &JobSubmittal) -> bool {
        let removed = self.jobs().remove_ticket(submittal.ticket());
        let Some(job) = removed else {
            return false;
        };
        job.detach();
        info!(server = %submittal.server(), handle = %submittal.handle(), "job abandoned");
        true
    }

    /// Number of working jobs the pool is tracking.
    pub fn tracked_jobs(&self) -> usize {
        self.jobs().len()
    }

    /// Server frames that reached a job unable to accept them, such as a
    /// second result or data sent after the result.
    pub fn misdelivered_frames(&self) -> u64 {
        self.inner.misdelivered.load(Ordering::Relaxed)
    }

    /// Ask the server serving `submittal` for the job's progress.
    ///
    /// Returns immediately; `callback` receives exactly one of
    /// `on_success` or `on_failure` from the pool's I/O context.
    pub fn get_status<C: StatusCallback>(&self, submittal: JobSubmittal, callback: C) {
        let pool = self.clone();
        tokio::spawn(async move {
            match pool.query_status(&submittal).await {
                Ok(status) => callback.on_success(&submittal, status),
                Err(failure) => callback.on_failure(&submittal, failure),
            }
        });
    }

    async fn query_status(&self, submittal: &JobSubmittal) -> Result<JobStatus, StatusFailure> {
        let Some(live) = self.live_connection(submittal.server()) else {
            return Err(StatusFailure::NoConnection);
        };
        let handle = submittal.handle();
        let (request, rx) = self.inner.status.register(live.id, handle.clone());
        if live.cancel.is_cancelled() {
            self.inner.status.cancel(live.id, handle, request);
            return Err(StatusFailure::NoConnection);
        }

        let sent = {
            let _guard = live.send_lock.lock().await;
            live.connection
                .send(ClientFrame::get_status(handle.clone()))
                .await
        };
        if let Err(e) = sent {
            debug!(server = %live.server, %handle, error = %e, "status request could not be sent");
            self.inner.status.cancel(live.id, handle, request);
            self.handle_loss(&live.server, live.id, Grounds::UnexpectedDisconnect);
            return Err(StatusFailure::NoConnection);
        }

        match tokio::time::timeout(self.inner.config.status_timeout(), rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(StatusFailure::NoConnection),
            Err(_) => {
                self.inner.status.cancel(live.id, handle, request);
                Err(StatusFailure::Timeout)
            }
        }
    }
}

impl fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPool")
            .field("config", &self.inner.config)
            .field("servers", &self.server_list())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
