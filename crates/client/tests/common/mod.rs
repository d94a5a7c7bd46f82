// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! A loopback job server for integration tests.
//!
//! Frames cross the link JSON-encoded, the way a socket transport would
//! carry them. The server reverses each payload.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gm_client::{
    BoxFuture, Connection, ConnectionError, ConnectionResult, Connector, Grounds, JobResult,
    JobListener, JobStatus, LocalServer, LossDirective, LossPolicy, ServerPool,
};
use gm_core::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Client end of a loopback link.
struct WireConnection {
    requests: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

impl Connection for WireConnection {
    fn send(&self, frame: ClientFrame) -> BoxFuture<'_, ConnectionResult<()>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ConnectionError::Closed);
            }
            let json = frame
                .to_json()
                .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
            self.requests
                .send(json)
                .map_err(|_| ConnectionError::Closed)
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Job server that reverses payloads.
///
/// With `finish_jobs` off it accepts jobs but never completes them.
pub struct ReverseServer {
    name: String,
    finish_jobs: AtomicBool,
    next_handle: AtomicU64,
    connections: AtomicU64,
    crash: Mutex<CancellationToken>,
}

impl ReverseServer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(ReverseServer {
            name: name.to_string(),
            finish_jobs: AtomicBool::new(true),
            next_handle: AtomicU64::new(1),
            connections: AtomicU64::new(0),
            crash: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn hold_jobs(&self) {
        self.finish_jobs.store(false, Ordering::SeqCst);
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Drop every open link, as a crashing server would.
    pub fn crash(&self) {
        let mut token = self.crash.lock().unwrap();
        token.cancel();
        *token = CancellationToken::new();
    }

    fn accept(self: &Arc<Self>) -> gm_client::Link {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::channel(64);
        let crash = self.crash.lock().unwrap().clone();
        self.connections.fetch_add(1, Ordering::SeqCst);

        let server = Arc::clone(self);
        tokio::spawn(async move { server.serve(request_rx, reply_tx, crash).await });

        let connection = Arc::new(WireConnection {
            requests: request_tx,
            closed: AtomicBool::new(false),
        });
        gm_client::Link::new(connection, reply_rx)
    }

    async fn serve(
        &self,
        mut requests: mpsc::UnboundedReceiver<String>,
        replies: mpsc::Sender<ServerFrame>,
        crash: CancellationToken,
    ) {
        loop {
            let json = tokio::select! {
                _ = crash.cancelled() => return,
                json = requests.recv() => {
                    let Some(json) = json else { return };
                    json
                }
            };
            for reply in self.answer(ClientFrame::from_json(&json).unwrap()) {
                let wire = reply.to_json().unwrap();
                if replies.send(ServerFrame::from_json(&wire).unwrap()).await.is_err() {
                    return;
                }
            }
        }
    }

    fn answer(&self, frame: ClientFrame) -> Vec<ServerFrame> {
        match frame {
            ClientFrame::SubmitJob { payload, .. } => {
                let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
                let handle = format!("{}:{n}", self.name);
                let mut replies = vec![ServerFrame::job_created(handle.as_str())];
                if self.finish_jobs.load(Ordering::SeqCst) {
                    let mut reversed = payload;
                    reversed.reverse();
                    replies.push(ServerFrame::work_status(handle.as_str(), 1, 1));
                    replies.push(ServerFrame::work_complete(handle.as_str(), reversed));
                }
                replies
            }
            ClientFrame::GetStatus { handle } => {
                let status = JobStatus::new(true, true, 1, 2);
                vec![ServerFrame::status_res(handle, status)]
            }
        }
    }
}

/// Connector routing every address to one [`ReverseServer`].
pub struct LoopbackConnector(pub Arc<ReverseServer>);

impl Connector for LoopbackConnector {
    fn connect(&self, _addr: SocketAddr) -> BoxFuture<'_, ConnectionResult<gm_client::Link>> {
        Box::pin(async move { Ok(self.0.accept()) })
    }
}

/// In-process server wrapping a [`ReverseServer`].
pub struct EmbeddedServer(pub Arc<ReverseServer>);

impl LocalServer for EmbeddedServer {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn open(&self) -> BoxFuture<'_, ConnectionResult<gm_client::Link>> {
        Box::pin(async move { Ok(self.0.accept()) })
    }
}

/// Loss policy counting calls and always reconnecting quickly.
#[derive(Default)]
pub struct CountingPolicy {
    pub remote: Mutex<Vec<(SocketAddr, Grounds)>>,
    pub local: Mutex<Vec<(String, Grounds)>>,
}

impl LossPolicy for CountingPolicy {
    fn lost_remote_server(
        &self,
        addr: SocketAddr,
        _pool: &ServerPool,
        grounds: Grounds,
    ) -> Option<LossDirective> {
        self.remote.lock().unwrap().push((addr, grounds));
        Some(LossDirective::reconnect(Duration::from_millis(50)))
    }

    fn lost_local_server(&self, server: &dyn LocalServer, _pool: &ServerPool, grounds: Grounds) {
        self.local
            .lock()
            .unwrap()
            .push((server.name().to_string(), grounds));
    }
}

/// Listener collecting progress and the final result.
#[derive(Default)]
pub struct Collector {
    pub statuses: Mutex<Vec<(i64, i64)>>,
    pub result: Mutex<Option<JobResult>>,
}

impl JobListener for Collector {
    fn on_status(&self, numerator: i64, denominator: i64) {
        self.statuses.lock().unwrap().push((numerator, denominator));
    }

    fn on_complete(&self, result: &JobResult) {
        *self.result.lock().unwrap() = Some(result.clone());
    }
}
