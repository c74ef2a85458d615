// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local debugger driver: spawns lldb on a PTY, negotiates the connect
//! handshake, and exposes a line-structured command channel.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Tunables;
use crate::error::{Error, Result};
use crate::pty::PtyProcess;

/// Ready-for-next-command marker.
const PROMPT_MARKER: &str = "(lldb)";

/// Well-known lldb install locations, tried in order.
const DEBUGGER_CANDIDATES: &[&str] = &[
    "/usr/bin/lldb",
    "/usr/local/bin/lldb",
    "/opt/homebrew/opt/llvm/bin/lldb",
    "/Library/Developer/CommandLineTools/usr/bin/lldb",
];

/// An attached, command-capable debugger process.
#[async_trait]
pub trait DebuggerDriver: Send {
    /// Send one command and read to the next prompt boundary.
    async fn send_command(&mut self, command: &str) -> Result<String>;

    /// Query the target's runtime image base from the image list.
    async fn runtime_image_base(&mut self) -> Result<u64>;

    /// Four-stage teardown: quit, SIGTERM, SIGKILL, reap.
    async fn terminate(self: Box<Self>);

    fn pid(&self) -> i32;
}

/// Spawns and connects drivers. The seam the orchestrator is tested
/// through.
#[async_trait]
pub trait DriverSpawner: Send + Sync {
    async fn spawn_and_connect(&self, host: &str, port: u16) -> Result<Box<dyn DebuggerDriver>>;
}

/// lldb driven over a pseudo-terminal.
pub struct LldbDriver {
    pty: PtyProcess,
    tunables: Tunables,
}

impl LldbDriver {
    /// Spawn lldb and attach it to the remote debug-server.
    ///
    /// User init files are suppressed: user plugins have crashed the host
    /// during PluginInitialize before.
    pub async fn spawn_and_connect(
        debugger_path: &Path,
        host: &str,
        port: u16,
        tunables: Tunables,
    ) -> Result<Self> {
        let command =
            vec![debugger_path.to_string_lossy().into_owned(), "--no-lldbinit".to_owned()];
        let pty = PtyProcess::spawn(&command)?;
        let driver = Self { pty, tunables };
        info!(pid = driver.pty.pid(), "debugger spawned");

        // Discard startup output; an interleaved first command confuses the
        // prompt detector.
        let startup = driver.read_to_prompt(driver.tunables.startup_read_timeout).await;
        debug!(bytes = startup.len(), "discarded debugger startup output");

        // Synchronous mode: without it, `process connect` returns to the
        // prompt before the connection actually completes.
        driver.pty.write_line("settings set target.async false").await?;
        driver.read_to_prompt(driver.tunables.setting_read_timeout).await;

        let connect = format!("process connect connect://{host}:{port}");
        info!(host, port, "connecting to remote debug-server");
        driver.pty.write_line(&connect).await?;

        let output = driver
            .pty
            .read_until(
                connect_complete,
                driver.tunables.connect_read_timeout,
                driver.tunables.read_tick,
                driver.tunables.idle_ticks,
            )
            .await;
        let output = strip_ansi(&output);

        if output.contains("error:") {
            return Err(Error::driver(format!(
                "failed to connect to remote debug-server: {}",
                output.trim()
            )));
        }
        if !halted_at_instruction(&output) {
            // The session may still be usable; record the oddity and go on.
            warn!("process state unclear after connect");
        }

        Ok(driver)
    }

    async fn read_to_prompt(&self, timeout: Duration) -> String {
        let raw = self
            .pty
            .read_until(
                contains_prompt,
                timeout,
                self.tunables.read_tick,
                self.tunables.idle_ticks,
            )
            .await;
        strip_ansi(&raw)
    }
}

#[async_trait]
impl DebuggerDriver for LldbDriver {
    async fn send_command(&mut self, command: &str) -> Result<String> {
        self.pty.write_line(command).await?;
        Ok(self.read_to_prompt(self.tunables.prompt_read_timeout).await)
    }

    async fn runtime_image_base(&mut self) -> Result<u64> {
        let output = self.send_command("image list").await?;
        parse_image_base(&output).ok_or_else(|| {
            Error::driver("failed to parse runtime base address from image list".to_owned())
        })
    }

    async fn terminate(self: Box<Self>) {
        let pid = self.pty.pid();
        let _ = self.pty.write_line("quit").await;
        if self.pty.wait_exit_within(self.tunables.quit_grace).await {
            debug!(pid, "debugger exited after quit");
            return;
        }

        self.pty.signal(Signal::SIGTERM);
        if self.pty.wait_exit_within(self.tunables.term_grace).await {
            debug!(pid, "debugger terminated by SIGTERM");
            return;
        }

        warn!(pid, "debugger still alive, sending SIGKILL");
        self.pty.signal(Signal::SIGKILL);
        self.pty.wait_exit_blocking().await;
        // The PTY master closes when `self.pty` drops.
    }

    fn pid(&self) -> i32 {
        self.pty.pid()
    }
}

/// Production [`DriverSpawner`] backed by [`LldbDriver`].
pub struct LldbSpawner {
    debugger_path: PathBuf,
    tunables: Tunables,
}

impl LldbSpawner {
    pub fn new(debugger_path: PathBuf, tunables: Tunables) -> Self {
        Self { debugger_path, tunables }
    }
}

#[async_trait]
impl DriverSpawner for LldbSpawner {
    async fn spawn_and_connect(&self, host: &str, port: u16) -> Result<Box<dyn DebuggerDriver>> {
        let driver =
            LldbDriver::spawn_and_connect(&self.debugger_path, host, port, self.tunables.clone())
                .await?;
        Ok(Box::new(driver))
    }
}

/// Find an lldb executable at a well-known location.
pub fn auto_detect_debugger() -> Option<PathBuf> {
    DEBUGGER_CANDIDATES.iter().copied().map(PathBuf::from).find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

pub(crate) fn contains_prompt(s: &str) -> bool {
    s.contains(PROMPT_MARKER)
}

/// The `-> 0x…` current instruction marker only appears in disassembly
/// with the target halted.
pub(crate) fn halted_at_instruction(s: &str) -> bool {
    s.contains("->") && s.contains("0x")
}

/// Connect-completion predicate. The prompt is not evidence: the debugger
/// may return to it before the connection finishes. Either the target is
/// halted at an instruction or `error:` covers the failure side.
pub(crate) fn connect_complete(s: &str) -> bool {
    halted_at_instruction(s) || s.contains("error:")
}

/// Remove ANSI SGR sequences (`ESC[...m`).
pub(crate) fn strip_ansi(input: &str) -> String {
    match Regex::new("\x1b\\[[0-9;]*m") {
        Ok(re) => re.replace_all(input, "").into_owned(),
        Err(_) => input.to_owned(),
    }
}

/// Parse the first image's load address from `image list` output, e.g.
/// `[  0] 8A6E4F2A-… 0x000000010abcd000 /path/to/binary`.
pub(crate) fn parse_image_base(output: &str) -> Option<u64> {
    let re = Regex::new(r"\[\s*0\]\s+[0-9A-Fa-f-]+\s+(0x[0-9A-Fa-f]+)").ok()?;
    let caps = re.captures(output)?;
    let hex = caps.get(1)?.as_str();
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
