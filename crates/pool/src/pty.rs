// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pseudo-terminal plumbing for the local debugger process.
//!
//! `forkpty` makes the slave the child's controlling terminal and wires its
//! stdio; the parent keeps only the non-blocking master. The child execs
//! directly, so a dead exec surfaces as immediate EOF on the master.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Wide terminal so debugger output avoids gratuitous line wrapping.
const PTY_COLS: u16 = 200;
const PTY_ROWS: u16 = 50;

/// Newtype wrapper around `OwnedFd` for use with `AsyncFd`.
#[derive(Debug)]
pub struct PtyFd(pub OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

/// A child process attached to a PTY pair.
pub struct PtyProcess {
    master: AsyncFd<PtyFd>,
    pid: Pid,
}

impl PtyProcess {
    /// Spawn `command` on a fresh PTY.
    ///
    /// `command` must have at least one element (the program to run).
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(command: &[String]) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::driver("empty debugger command"));
        }

        let winsize =
            Winsize { ws_col: PTY_COLS, ws_row: PTY_ROWS, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }
            .map_err(|e| Error::driver(format!("forkpty failed: {e}")))?;

        match result {
            ForkptyResult::Child => {
                let c_args: Vec<CString> = match command
                    .iter()
                    .map(|s| CString::new(s.as_bytes()))
                    .collect::<std::result::Result<_, _>>()
                {
                    Ok(args) => args,
                    Err(_) => std::process::exit(127),
                };
                let _ = execvp(&c_args[0], &c_args);
                std::process::exit(127);
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)
                    .map_err(|e| Error::driver(format!("set_nonblocking failed: {e}")))?;
                let master = AsyncFd::new(PtyFd(master))
                    .map_err(|e| Error::driver(format!("AsyncFd::new failed: {e}")))?;
                Ok(Self { master, pid: child })
            }
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Write a command line to the child, appending the newline. Loops on
    /// short writes.
    pub async fn write_line(&self, command: &str) -> Result<()> {
        let mut line = command.as_bytes().to_vec();
        line.push(b'\n');
        write_all(&self.master, &line)
            .await
            .map_err(|e| Error::driver(format!("failed to write to debugger pty: {e}")))
    }

    /// Accumulate output until `done` holds and the line has gone quiet.
    ///
    /// Drains on a readiness tick; once `done(buffer)` is true, requires
    /// `idle_ticks` consecutive quiet ticks before returning, absorbing
    /// late post-marker output. On deadline, returns whatever accumulated.
    pub async fn read_until<F>(
        &self,
        done: F,
        timeout: Duration,
        tick: Duration,
        idle_ticks: u8,
    ) -> String
    where
        F: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; 4096];
        let mut out: Vec<u8> = Vec::new();
        let mut idle = 0u8;

        loop {
            if Instant::now() >= deadline {
                tracing::debug!(bytes = out.len(), "pty read timed out");
                break;
            }

            match tokio::time::timeout(tick, read_chunk(&self.master, &mut buf)).await {
                // Quiet tick: count toward completion once the marker is in.
                Err(_) => {
                    if done(&String::from_utf8_lossy(&out)) {
                        idle += 1;
                        if idle >= idle_ticks {
                            break;
                        }
                    }
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    out.extend_from_slice(&buf[..n]);
                    idle = 0;
                }
                // EIO means the child side closed.
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => break,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "pty read error");
                    break;
                }
            }
        }

        String::from_utf8_lossy(&out).into_owned()
    }

    /// Poll for child exit until `grace` elapses. Returns whether it exited.
    pub async fn wait_exit_within(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                // Exited, signaled, or already reaped.
                _ => return true,
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn signal(&self, signal: Signal) {
        let _ = kill(self.pid, signal);
    }

    /// Blocking final reap, run off the async runtime.
    pub async fn wait_exit_blocking(&self) {
        let pid = self.pid;
        let _ = tokio::task::spawn_blocking(move || {
            loop {
                match waitpid(pid, None) {
                    Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => break,
                    Ok(_) => continue,
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(_) => break,
                }
            }
        })
        .await;
    }
}

/// Set the given file descriptor to non-blocking mode.
fn set_nonblocking(fd: &impl std::os::fd::AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Read a chunk of data from the async PTY fd.
async fn read_chunk(afd: &AsyncFd<PtyFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::read(inner, buf).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Write all data to the async PTY fd, looping on short writes.
async fn write_all(afd: &AsyncFd<PtyFd>, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::write(inner, &data[offset..]).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
