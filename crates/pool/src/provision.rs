// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote preparation: capability validation, artifact staging, and
//! debug-server lifecycle on the device.
//!
//! The readiness gate polls `netstat` on the device itself. Probing the
//! port from the host would consume the debug-server's single accept slot
//! and break the subsequent debugger attach.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::Tunables;
use crate::device::{DeviceInfo, DeviceSnapshot, PlatformRecord, SigningTool};
use crate::discover;
use crate::error::{Error, Result};
use crate::providers::CredentialProvider;
use crate::ssh::SshSession;

const DEBUGSERVER_LOG: &str = "/tmp/debugserver.log";
const LOG_TAIL_CMD: &str = "tail -20 /tmp/debugserver.log 2>&1";

/// Remote processes created by a successful launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTarget {
    pub server_pid: i32,
    /// Child of the server, when it could be observed. Cleanup book-keeping
    /// only.
    pub debugged_pid: Option<i32>,
}

/// Brings a reserved device from SSH-reachable to debug-server-listening,
/// and tears the remote processes down again.
#[async_trait]
pub trait TargetProvisioner: Send + Sync {
    /// Step 1: one-time platform capability validation.
    async fn ensure_capabilities(&self, device: &DeviceSnapshot) -> Result<PlatformRecord>;

    /// Step 2: best-effort identity discovery. Never fails the sequence.
    async fn discover_identity(&self, device: &DeviceSnapshot) -> Option<DeviceInfo>;

    /// Steps 3–4: upload the artifact and sign it if the platform requires.
    async fn stage_artifact(
        &self,
        device: &DeviceSnapshot,
        local: &Path,
        signing: SigningTool,
    ) -> Result<()>;

    /// Step 5: launch the debug-server and gate on the port listening.
    async fn launch_server(&self, device: &DeviceSnapshot) -> Result<RemoteTarget>;

    /// Compensation for step 5 and session teardown: kill the remote
    /// processes. Best-effort.
    async fn kill_remote(&self, device: &DeviceSnapshot, target: &RemoteTarget);

    /// Health probe: can we open an authenticated session at all?
    async fn check_reachable(&self, device: &DeviceSnapshot) -> Result<()>;
}

/// The iOS/jailbroken implementation driving `debugserver` over SSH.
pub struct DebugserverProvisioner {
    credentials: Arc<dyn CredentialProvider>,
    tunables: Tunables,
}

impl DebugserverProvisioner {
    pub fn new(credentials: Arc<dyn CredentialProvider>, tunables: Tunables) -> Self {
        Self { credentials, tunables }
    }

    async fn open(&self, device: &DeviceSnapshot) -> Result<SshSession> {
        SshSession::connect(
            &device.host,
            device.ssh_port,
            &device.ssh_user,
            &self.credentials.private_key_path(),
        )
        .await
    }

    async fn probe(&self, ssh: &SshSession, check: &str) -> bool {
        matches!(ssh.exec(check).await, Ok(out) if out.stdout.contains("YES"))
    }
}

#[async_trait]
impl TargetProvisioner for DebugserverProvisioner {
    async fn ensure_capabilities(&self, device: &DeviceSnapshot) -> Result<PlatformRecord> {
        info!(device = %device.id, host = %device.host, "validating device capabilities");
        let ssh = self.open(device).await?;

        // Modern jailbreaks mount /var/jb; legacy ones leave the dpkg tree.
        let jailbroken = self
            .probe(&ssh, "[ -d /var/jb ] || [ -d /var/lib/dpkg ] && echo YES || echo NO")
            .await;
        if !jailbroken {
            return Err(Error::unsupported(format!(
                "device {} does not appear to be a jailbroken iOS device \
                 (no /var/jb or /var/lib/dpkg)",
                device.name
            )));
        }

        let has_debugserver = self
            .probe(&ssh, "command -v debugserver >/dev/null 2>&1 && echo YES || echo NO")
            .await;
        if !has_debugserver {
            return Err(Error::unsupported(format!(
                "debugserver not found on device {}; install developer tools first",
                device.name
            )));
        }

        // ldid preferred, jtool fallback.
        let signing_tool = if self
            .probe(&ssh, "command -v ldid >/dev/null 2>&1 && echo YES || echo NO")
            .await
        {
            SigningTool::Ldid
        } else if self
            .probe(&ssh, "command -v jtool >/dev/null 2>&1 && echo YES || echo NO")
            .await
        {
            SigningTool::Jtool
        } else {
            return Err(Error::unsupported(format!(
                "device {} has neither ldid nor jtool for code signing",
                device.name
            )));
        };

        ssh.close().await;
        info!(device = %device.id, tool = ?signing_tool, "device capabilities validated");
        Ok(PlatformRecord { initialized: true, signing_tool })
    }

    async fn discover_identity(&self, device: &DeviceSnapshot) -> Option<DeviceInfo> {
        let ssh = match self.open(device).await {
            Ok(ssh) => ssh,
            Err(e) => {
                warn!(device = %device.id, error = %e, "identity discovery skipped");
                return None;
            }
        };
        let info = discover::fetch_device_info(&ssh, &device.host).await;
        ssh.close().await;
        Some(info)
    }

    async fn stage_artifact(
        &self,
        device: &DeviceSnapshot,
        local: &Path,
        signing: SigningTool,
    ) -> Result<()> {
        let ssh = self.open(device).await?;
        ssh.upload(local, &device.remote_binary_path).await?;
        info!(device = %device.id, remote = %device.remote_binary_path, "artifact synced");

        if let Some(tool) = signing.command() {
            let cmd = format!("{tool} -S \"{}\"", device.remote_binary_path);
            let out = ssh.exec(&cmd).await.map_err(|e| {
                Error::sign(format!("failed to run {tool} on {}: {e}", device.name))
            })?;
            if !out.success() {
                // The uploaded file stays; the next session overwrites it.
                return Err(Error::sign(format!(
                    "code signing with {tool} failed (required on this platform): {}",
                    out.stdout.trim()
                )));
            }
            info!(device = %device.id, tool, "artifact signed");
        }

        ssh.close().await;
        Ok(())
    }

    async fn launch_server(&self, device: &DeviceSnapshot) -> Result<RemoteTarget> {
        let ssh = self.open(device).await?;
        let port = device.debugserver_port;

        // Pre-launch diagnostics: tool resolution and the staged artifact.
        if let Ok(out) =
            ssh.exec("echo PATH=$PATH; which debugserver 2>&1; which nohup 2>&1").await
        {
            debug!(device = %device.id, "{}", out.stdout.trim());
        }
        if let Ok(out) = ssh.exec(&format!("ls -la \"{}\" 2>&1", device.remote_binary_path)).await {
            debug!(device = %device.id, "{}", out.stdout.trim());
        }

        let out = ssh.exec(&launch_command(port, &device.remote_binary_path)).await?;
        let server_pid = parse_pid(&out.stdout).ok_or_else(|| {
            Error::server_launch(format!(
                "could not parse debug-server pid from launch output: '{}'",
                out.stdout.trim()
            ))
        })?;
        info!(device = %device.id, pid = server_pid, port, "debug-server launched");

        // The server exits immediately on a signing or path error; catch
        // that before polling the port.
        let verify = ssh.exec(&format!("ps -p {server_pid} -o comm=")).await;
        let running = matches!(&verify, Ok(out) if out.stdout.contains("debugserver"));
        if !running {
            let tail = self.fetch_log_tail(&ssh).await;
            return Err(Error::server_launch(format!(
                "debug-server process {server_pid} not running (may have exited immediately): \
                 {tail}"
            )));
        }

        tokio::time::sleep(self.tunables.launch_settle).await;

        // Debugged process is the server's child. Optional: some setups only
        // launch it on debugger connect.
        let debugged_pid = match ssh.exec(&child_pid_command(server_pid)).await {
            Ok(out) => parse_pid(&out.stdout),
            Err(e) => {
                warn!(device = %device.id, error = %e, "could not probe debugged pid");
                None
            }
        };

        // Readiness gate: the port must enter LISTEN, checked on-device.
        let check = netstat_check_command(port);
        let start = Instant::now();
        let mut listening = false;
        while start.elapsed() < self.tunables.port_poll_budget {
            match ssh.exec(&check).await {
                Ok(out) if port_is_listening(&out.stdout) => {
                    listening = true;
                    break;
                }
                _ => tokio::time::sleep(self.tunables.port_poll_interval).await,
            }
        }
        if !listening {
            let tail = self.fetch_log_tail(&ssh).await;
            let target = RemoteTarget { server_pid, debugged_pid };
            self.kill_remote(device, &target).await;
            return Err(Error::server_launch(format!(
                "debug-server started but port {port} never entered LISTEN: {tail}"
            )));
        }

        ssh.close().await;
        info!(device = %device.id, pid = server_pid, port, "debug-server listening");
        Ok(RemoteTarget { server_pid, debugged_pid })
    }

    async fn kill_remote(&self, device: &DeviceSnapshot, target: &RemoteTarget) {
        let Some(cmd) = kill_command(target.server_pid, target.debugged_pid) else {
            return;
        };
        match self.open(device).await {
            Ok(ssh) => {
                if let Err(e) = ssh.exec(&cmd).await {
                    warn!(device = %device.id, error = %e, "remote kill failed");
                } else {
                    debug!(device = %device.id, server = target.server_pid, "remote processes stopped");
                }
                ssh.close().await;
            }
            Err(e) => warn!(device = %device.id, error = %e, "could not connect for remote cleanup"),
        }
    }

    async fn check_reachable(&self, device: &DeviceSnapshot) -> Result<()> {
        let ssh = self.open(device).await?;
        ssh.close().await;
        Ok(())
    }
}

impl DebugserverProvisioner {
    async fn fetch_log_tail(&self, ssh: &SshSession) -> String {
        match ssh.exec(LOG_TAIL_CMD).await {
            Ok(out) if !out.stdout.trim().is_empty() => out.stdout.trim().to_owned(),
            _ => "(no debug-server log available)".to_owned(),
        }
    }
}

/// Backgrounded launch whose stdout is the server pid. The binary path is
/// quoted: app bundle names contain spaces.
pub(crate) fn launch_command(port: u16, remote_path: &str) -> String {
    format!("nohup debugserver 0.0.0.0:{port} \"{remote_path}\" > {DEBUGSERVER_LOG} 2>&1 & echo $!")
}

/// On-device check for the listen state of `port`.
pub(crate) fn netstat_check_command(port: u16) -> String {
    format!(
        "netstat -an 2>/dev/null | grep -q '[:.]{port}.*LISTEN' \
         && echo LISTENING || echo NOT_LISTENING"
    )
}

/// Decide the poll outcome from the check command's stdout. Exact match:
/// `NOT_LISTENING` contains the substring `LISTENING`, so a contains test
/// would pass the gate on the first poll with the port still unbound.
pub(crate) fn port_is_listening(output: &str) -> bool {
    output.trim() == "LISTENING"
}

/// List the pid of the server's child. grep+sed, not awk: awk is missing on
/// some jailbroken layouts.
pub(crate) fn child_pid_command(server_pid: i32) -> String {
    format!("ps -o pid,ppid | grep ' {server_pid}$' | sed 's/^[[:space:]]*\\([0-9]*\\).*/\\1/'")
}

pub(crate) fn kill_command(server_pid: i32, debugged_pid: Option<i32>) -> Option<String> {
    let mut pids = Vec::new();
    if server_pid > 0 {
        pids.push(server_pid.to_string());
    }
    if let Some(pid) = debugged_pid.filter(|p| *p > 0) {
        pids.push(pid.to_string());
    }
    if pids.is_empty() {
        return None;
    }
    Some(format!("kill -9 {}", pids.join(" ")))
}

pub(crate) fn parse_pid(output: &str) -> Option<i32> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.lines().next()?.trim().parse::<i32>().ok().filter(|p| *p > 0)
}

#[cfg(test)]
#[path = "provision_tests.rs"]
mod tests;
