// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection abstraction consumed by the server pool.
//!
//! The runtime never touches sockets or frame encoding. It talks to job
//! servers through three seams:
//! - [`Connection`]: an open, shareable link that can send frames
//! - [`Connector`]: opens connections to remote servers by address
//! - [`LocalServer`]: an in-process server that hands out connections
//!
//! Opening either kind yields a [`Link`]: the connection plus the stream of
//! decoded frames the server pushes back.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use gm_core::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;

/// Boxed future returned by the connection seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type for connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Connection attempt failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// An open connection to a job server.
///
/// Connections are shared by every job served over them. Only the server
/// pool owns them; jobs hold weak references.
pub trait Connection: Send + Sync {
    /// Send a frame to the server.
    fn send(&self, frame: ClientFrame) -> BoxFuture<'_, ConnectionResult<()>>;

    /// Check if the connection has been closed, by either side.
    fn is_closed(&self) -> bool;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// An opened connection together with its inbound frame stream.
///
/// The stream ends (`recv` yields `None`) when the server goes away.
pub struct Link {
    pub connection: Arc<dyn Connection>,
    pub inbound: mpsc::Receiver<ServerFrame>,
}

impl Link {
    pub fn new(connection: Arc<dyn Connection>, inbound: mpsc::Receiver<ServerFrame>) -> Self {
        Link {
            connection,
            inbound,
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("closed", &self.connection.is_closed())
            .finish_non_exhaustive()
    }
}

/// Opens connections to remote job servers.
pub trait Connector: Send + Sync {
    /// Connect to the server at `addr`.
    fn connect(&self, addr: SocketAddr) -> BoxFuture<'_, ConnectionResult<Link>>;
}

/// A job server running in this address space.
///
/// Local servers only drop connections when they shut down, so the pool
/// never tries to reconnect to one.
pub trait LocalServer: Send + Sync {
    /// Name identifying the server within a pool.
    fn name(&self) -> &str;

    /// Open an in-process connection to the server.
    fn open(&self) -> BoxFuture<'_, ConnectionResult<Link>>;
}
