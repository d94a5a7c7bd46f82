// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory job servers and recording collaborators for unit tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gm_core::{ClientFrame, JobStatus, ServerFrame, StatusFailure};
use tokio::sync::mpsc;

use crate::connection::{
    BoxFuture, Connection, ConnectionError, ConnectionResult, Connector, Link, LocalServer,
};
use crate::job::{JobListener, JobResult};
use crate::policy::{Grounds, LossDirective, LossPolicy};
use crate::pool::ServerPool;
use crate::status::{JobSubmittal, StatusCallback};

/// Install a fmt subscriber once; `RUST_LOG` overrides the default filter.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Poll `condition` until it holds, yielding to the runtime in between.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Connection that records every frame sent over it.
#[derive(Default)]
pub struct MockConnection {
    closed: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<ClientFrame>>,
}

impl MockConnection {
    pub fn sent(&self) -> Vec<ClientFrame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

impl Connection for MockConnection {
    fn send(&self, frame: ClientFrame) -> BoxFuture<'_, ConnectionResult<()>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ConnectionError::Closed);
            }
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(ConnectionError::SendFailed("mock failure".into()));
            }
            self.sent.lock().unwrap().push(frame);
            Ok(())
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server side of one mock link.
#[derive(Clone)]
pub struct MockPeer {
    pub connection: Arc<MockConnection>,
    inbound: Arc<Mutex<Option<mpsc::Sender<ServerFrame>>>>,
}

impl MockPeer {
    fn open() -> (MockPeer, Link) {
        let (tx, rx) = mpsc::channel(64);
        let connection = Arc::new(MockConnection::default());
        let peer = MockPeer {
            connection: Arc::clone(&connection),
            inbound: Arc::new(Mutex::new(Some(tx))),
        };
        (peer, Link::new(connection, rx))
    }

    /// Push a frame to the client.
    pub async fn push(&self, frame: ServerFrame) {
        let tx = self.inbound.lock().unwrap().clone().expect("peer disconnected");
        tx.send(frame).await.expect("client reader gone");
    }

    /// Drop the server side, as a crashed server would.
    pub fn disconnect(&self) {
        self.inbound.lock().unwrap().take();
    }

    /// Wait until the client has sent `count` frames and return them.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<ClientFrame> {
        let connection = Arc::clone(&self.connection);
        wait_until(|| connection.sent().len() >= count).await;
        self.connection.sent()
    }
}

/// Connector handing out mock links, optionally refusing some addresses.
#[derive(Default)]
pub struct MockConnector {
    refused: Mutex<HashMap<SocketAddr, bool>>,
    attempts: Mutex<HashMap<SocketAddr, usize>>,
    peers: Mutex<HashMap<SocketAddr, Vec<MockPeer>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(MockConnector::default())
    }

    pub fn refuse(&self, addr: SocketAddr, refuse: bool) {
        self.refused.lock().unwrap().insert(addr, refuse);
    }

    pub fn attempts(&self, addr: SocketAddr) -> usize {
        self.attempts.lock().unwrap().get(&addr).copied().unwrap_or(0)
    }

    pub fn connections(&self, addr: SocketAddr) -> usize {
        self.peers.lock().unwrap().get(&addr).map_or(0, Vec::len)
    }

    /// The most recent link opened to `addr`.
    pub fn peer(&self, addr: SocketAddr) -> MockPeer {
        self.peers.lock().unwrap()[&addr].last().cloned().unwrap()
    }
}

impl Connector for MockConnector {
    fn connect(&self, addr: SocketAddr) -> BoxFuture<'_, ConnectionResult<Link>> {
        Box::pin(async move {
            *self.attempts.lock().unwrap().entry(addr).or_default() += 1;
            if self.refused.lock().unwrap().get(&addr).copied().unwrap_or(false) {
                return Err(ConnectionError::ConnectFailed("connection refused".into()));
            }
            let (peer, link) = MockPeer::open();
            self.peers.lock().unwrap().entry(addr).or_default().push(peer);
            Ok(link)
        })
    }
}

/// In-process server backed by mock links.
pub struct MockLocalServer {
    name: String,
    peers: Mutex<Vec<MockPeer>>,
}

impl MockLocalServer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(MockLocalServer {
            name: name.to_string(),
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn peer(&self) -> MockPeer {
        self.peers.lock().unwrap().last().cloned().unwrap()
    }

    pub fn connections(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

impl LocalServer for MockLocalServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> BoxFuture<'_, ConnectionResult<Link>> {
        Box::pin(async move {
            let (peer, link) = MockPeer::open();
            self.peers.lock().unwrap().push(peer);
            Ok(link)
        })
    }
}

/// How a [`RecordingPolicy`] answers remote losses.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Nothing,
    Directive(LossDirective),
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossCall {
    Remote(SocketAddr, Grounds),
    Local(String, Grounds),
}

/// Loss policy that records every call.
pub struct RecordingPolicy {
    reply: Reply,
    panic_on_local: AtomicBool,
    calls: Mutex<Vec<LossCall>>,
}

impl RecordingPolicy {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(RecordingPolicy {
            reply,
            panic_on_local: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn panic_on_local(&self) {
        self.panic_on_local.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LossCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl LossPolicy for RecordingPolicy {
    fn lost_remote_server(
        &self,
        addr: SocketAddr,
        _pool: &ServerPool,
        grounds: Grounds,
    ) -> Option<LossDirective> {
        self.calls.lock().unwrap().push(LossCall::Remote(addr, grounds));
        match self.reply {
            Reply::Nothing => None,
            Reply::Directive(directive) => Some(directive),
            Reply::Panic => panic!("policy failure"),
        }
    }

    fn lost_local_server(&self, server: &dyn LocalServer, _pool: &ServerPool, grounds: Grounds) {
        self.calls
            .lock()
            .unwrap()
            .push(LossCall::Local(server.name().to_string(), grounds));
        if self.panic_on_local.load(Ordering::SeqCst) {
            panic!("policy failure");
        }
    }
}

pub type StatusOutcome = (JobSubmittal, Result<JobStatus, StatusFailure>);

/// Status callback forwarding outcomes to a channel.
pub struct ChannelCallback(pub mpsc::UnboundedSender<StatusOutcome>);

impl ChannelCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelCallback(tx), rx)
    }
}

impl StatusCallback for ChannelCallback {
    fn on_success(&self, submittal: &JobSubmittal, status: JobStatus) {
        let _ = self.0.send((submittal.clone(), Ok(status)));
    }

    fn on_failure(&self, submittal: &JobSubmittal, failure: StatusFailure) {
        let _ = self.0.send((submittal.clone(), Err(failure)));
    }
}

/// Job listener that records every notification.
#[derive(Default)]
pub struct RecordingListener {
    pub data: Mutex<Vec<Vec<u8>>>,
    pub warnings: Mutex<Vec<Vec<u8>>>,
    pub exceptions: Mutex<Vec<Vec<u8>>>,
    pub statuses: Mutex<Vec<(i64, i64)>>,
    pub completions: Mutex<Vec<JobResult>>,
}

impl JobListener for RecordingListener {
    fn on_data(&self, data: &[u8]) {
        self.data.lock().unwrap().push(data.to_vec());
    }

    fn on_warning(&self, warning: &[u8]) {
        self.warnings.lock().unwrap().push(warning.to_vec());
    }

    fn on_exception(&self, exception: &[u8]) {
        self.exceptions.lock().unwrap().push(exception.to_vec());
    }

    fn on_status(&self, numerator: i64, denominator: i64) {
        self.statuses.lock().unwrap().push((numerator, denominator));
    }

    fn on_complete(&self, result: &JobResult) {
        self.completions.lock().unwrap().push(result.clone());
    }
}
