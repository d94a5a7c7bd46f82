// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! What to do when a job server connection is lost.
//!
//! The server pool consults a [`LossPolicy`] once per loss event and per
//! server. Remote servers get a say in what happens next through the
//! returned [`LossDirective`]; local servers are always removed and the
//! policy is only told about it.

use std::fmt;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use crate::connection::LocalServer;
use crate::pool::{ServerKey, ServerPool};

/// Backoff used when the policy gives no usable directive.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// The directive the pool falls back to with the default configuration.
pub const DEFAULT_DIRECTIVE: LossDirective = LossDirective::Reconnect {
    delay: DEFAULT_RECONNECT_DELAY,
};

/// Why a loss notification fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grounds {
    /// The server closed an established connection.
    UnexpectedDisconnect,
    /// A connection attempt failed or timed out.
    FailedConnection,
    /// The server stopped answering and the connection was closed.
    ResponseTimeout,
}

impl Grounds {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grounds::UnexpectedDisconnect => "unexpected_disconnect",
            Grounds::FailedConnection => "failed_connection",
            Grounds::ResponseTimeout => "response_timeout",
        }
    }
}

impl fmt::Display for Grounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A policy's decision about a lost remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossDirective {
    /// Keep the server registered and reconnect after `delay`.
    Reconnect { delay: Duration },
    /// Drop the server from the pool.
    Remove,
}

impl LossDirective {
    pub fn reconnect(delay: Duration) -> Self {
        LossDirective::Reconnect { delay }
    }

    pub fn remove() -> Self {
        LossDirective::Remove
    }
}

/// Strategy consulted whenever a server connection is lost or cannot be
/// established.
///
/// Calls happen synchronously on the pool's connection-event path, so they
/// should return quickly. A policy may inspect or change pool membership
/// through the `pool` argument.
pub trait LossPolicy: Send + Sync {
    /// A remote server was lost.
    ///
    /// Returning `None` (or panicking) selects the pool's default directive.
    fn lost_remote_server(
        &self,
        addr: SocketAddr,
        pool: &ServerPool,
        grounds: Grounds,
    ) -> Option<LossDirective>;

    /// A local server was lost. It is removed from the pool regardless.
    fn lost_local_server(&self, server: &dyn LocalServer, pool: &ServerPool, grounds: Grounds);
}

/// Policy that always takes the pool's default directive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLossPolicy;

impl LossPolicy for DefaultLossPolicy {
    fn lost_remote_server(
        &self,
        _addr: SocketAddr,
        _pool: &ServerPool,
        _grounds: Grounds,
    ) -> Option<LossDirective> {
        None
    }

    fn lost_local_server(&self, server: &dyn LocalServer, _pool: &ServerPool, grounds: Grounds) {
        tracing::info!(server = server.name(), %grounds, "local job server lost");
    }
}

/// Turn the outcome of a policy call into the directive the pool applies.
pub(crate) fn resolve_directive(
    server: &ServerKey,
    outcome: thread::Result<Option<LossDirective>>,
    fallback: LossDirective,
) -> LossDirective {
    match outcome {
        Ok(Some(directive)) => directive,
        Ok(None) => {
            tracing::debug!(%server, "loss policy gave no directive, using default");
            fallback
        }
        Err(_) => {
            tracing::warn!(%server, "loss policy panicked, using default directive");
            fallback
        }
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
