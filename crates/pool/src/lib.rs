// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fair-queued pool orchestration for remote debug sessions.
//!
//! Many automated reverse-engineering agents share a small pool of remote
//! devices. Each `start_session` takes a device from "SSH-reachable host"
//! to "attached, halted process behind a debugger prompt" in one
//! transaction: reserve → sync artifact → sign → launch debug-server →
//! attach local debugger over a PTY. Every abort path releases everything
//! it created and hands the device to the next agent in line.

pub mod api;
pub mod config;
pub mod device;
pub mod discover;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod provision;
pub mod pty;
pub mod session;
pub mod ssh;
pub mod test_support;

pub use config::{PoolConfig, Tunables};
pub use device::{DeviceInfo, DeviceRegistry, Health, SigningTool};
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::{AddressConversion, Orchestrator};
pub use providers::{ArtifactProvider, CredentialProvider, StaticImageProvider};

/// Initialize tracing/logging.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
/// `RUST_LOG` wins when set; otherwise `level` applies.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let result = if json {
        fmt::fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt::fmt().with_env_filter(filter).try_init()
    };
    drop(result);
}
