// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of error kinds surfaced to agents.
///
/// Handshake and protocol-level SSH failures are folded into `Network`
/// alongside resolve/connect failures; only a rejected key is `Auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Device missing, remote path empty while enabled, port conflicts.
    Config,
    /// Host resolve, TCP connect, or SSH handshake failure.
    Network,
    /// Public-key authentication rejected.
    Auth,
    /// Platform or required tool missing on the device.
    Unsupported,
    /// SFTP upload failure.
    Sync,
    /// Code signing failed on a platform that requires it.
    Sign,
    /// Remote debug-server failed to start or bind.
    ServerLaunch,
    /// Local debugger spawn or connect failure.
    Driver,
    /// Queue wait or internal poll exceeded its budget.
    Timeout,
    /// Session id unknown.
    NotFound,
    /// Session ownership mismatch.
    Forbidden,
    /// Command blocked by a safety rail.
    Rejected,
    /// Invariant violation; should be unreachable.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "CONFIG",
            Self::Network => "NETWORK",
            Self::Auth => "AUTH",
            Self::Unsupported => "UNSUPPORTED",
            Self::Sync => "SYNC",
            Self::Sign => "SIGN",
            Self::ServerLaunch => "SERVER_LAUNCH",
            Self::Driver => "DRIVER",
            Self::Timeout => "TIMEOUT",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::Rejected => "REJECTED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned to the agent that initiated a request.
///
/// Carries the machine-readable kind plus a human-readable diagnostic;
/// the diagnostic may include a truncated remote log tail on
/// [`ErrorKind::ServerLaunch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Sync, message)
    }

    pub fn sign(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Sign, message)
    }

    pub fn server_launch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerLaunch, message)
    }

    pub fn driver(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Driver, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
