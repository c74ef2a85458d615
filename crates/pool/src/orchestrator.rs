// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session orchestrator: fair FIFO device allocation, session
//! lifecycle, crash cleanup, and address translation.
//!
//! Locking: the pool mutex guards the device registry and the wait queue;
//! the session table has its own mutex. Neither is ever held across SSH,
//! SFTP, process spawn, or PTY reads. When both are needed the order is
//! session → pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::device::{DeviceRegistry, DeviceSnapshot, Health};
use crate::driver::{auto_detect_debugger, DriverSpawner, LldbSpawner};
use crate::error::{Error, Result};
use crate::providers::{ArtifactProvider, CredentialProvider, StaticImageProvider};
use crate::provision::{DebugserverProvisioner, RemoteTarget, TargetProvisioner};
use crate::session::{
    generate_session_id, SessionHandle, SessionMeta, SessionState, SessionTable,
};

/// An agent parked on the wait queue.
struct Waiter {
    agent_id: String,
    request_id: String,
    notify: Arc<Notify>,
    /// Set when this entry has been woken and not yet re-armed. Prevents
    /// double-notification of the same head.
    notified: bool,
}

struct PoolState {
    registry: DeviceRegistry,
    queue: VecDeque<Waiter>,
}

/// Snapshot of one device's pool state.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub available: bool,
    pub holder: Option<String>,
    pub health: Health,
}

/// Result of an address translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConversion {
    pub ida_address: u64,
    pub runtime_address: u64,
    pub ida_base: u64,
    pub runtime_base: u64,
    pub offset: u64,
}

/// The coordination hub. One value per process; owns the registry and the
/// session table for its whole lifetime.
pub struct Orchestrator {
    pool: Mutex<PoolState>,
    sessions: SessionTable,
    provisioner: Arc<dyn TargetProvisioner>,
    spawner: Arc<dyn DriverSpawner>,
    artifacts: Arc<dyn ArtifactProvider>,
    static_image: Arc<dyn StaticImageProvider>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Build an orchestrator with explicit seams. Tests inject fakes here.
    pub fn new(
        registry: DeviceRegistry,
        provisioner: Arc<dyn TargetProvisioner>,
        spawner: Arc<dyn DriverSpawner>,
        artifacts: Arc<dyn ArtifactProvider>,
        static_image: Arc<dyn StaticImageProvider>,
    ) -> Self {
        Self {
            pool: Mutex::new(PoolState { registry, queue: VecDeque::new() }),
            sessions: SessionTable::default(),
            provisioner,
            spawner,
            artifacts,
            static_image,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the production wiring: debugserver provisioning over SSH and
    /// an lldb driver on a PTY.
    pub fn with_defaults(
        config: &PoolConfig,
        credentials: Arc<dyn CredentialProvider>,
        artifacts: Arc<dyn ArtifactProvider>,
        static_image: Arc<dyn StaticImageProvider>,
    ) -> Result<Self> {
        let registry = config.registry()?;
        let debugger_path = match &config.debugger_path {
            Some(path) => path.clone(),
            None => auto_detect_debugger().ok_or_else(|| {
                Error::config("no debugger executable found; set debugger_path explicitly")
            })?,
        };
        let provisioner =
            Arc::new(DebugserverProvisioner::new(credentials, config.tunables.clone()));
        let spawner = Arc::new(LldbSpawner::new(debugger_path, config.tunables.clone()));
        Ok(Self::new(registry, provisioner, spawner, artifacts, static_image))
    }

    /// Start a debug session for `agent_id`, waiting up to `timeout_ms` for
    /// a device. Returns the new session id.
    pub async fn start_session(
        &self,
        agent_id: &str,
        request_id: &str,
        timeout_ms: u64,
    ) -> Result<String> {
        if self.shutdown.is_cancelled() {
            return Err(Error::internal("orchestrator is shutting down"));
        }
        info!(agent = agent_id, request = request_id, timeout_ms, "session requested");

        let snapshot = self.allocate_device(agent_id, request_id, timeout_ms).await?;
        info!(agent = agent_id, device = %snapshot.id, "device allocated");

        match self.establish(&snapshot, agent_id).await {
            Ok((target, driver)) => self.register(snapshot, agent_id, target, driver).await,
            Err(e) => {
                warn!(agent = agent_id, device = %snapshot.id, error = %e, "session start failed");
                self.release_and_wake(&snapshot.id, agent_id).await;
                Err(e)
            }
        }
    }

    /// Send a raw debugger command to a session and return its output.
    pub async fn send_command(
        &self,
        session_id: &str,
        agent_id: &str,
        command: &str,
    ) -> Result<String> {
        // Safety rail first: these run on the host, not the device, and
        // must never reach the PTY.
        if is_host_shell_command(command) {
            return Err(Error::rejected(
                "'platform shell' runs on the LOCAL machine, not the remote device. \
                 Use debugger commands (memory read, register read, x, ...) to inspect \
                 the remote process.",
            ));
        }

        let handle = self.sessions.get_owned(session_id, agent_id).await?;
        let mut guard = handle.driver.lock().await;
        let Some(driver) = guard.as_mut() else {
            return Err(Error::not_found(format!("session {session_id} is stopping")));
        };
        *handle.state.write().await = SessionState::Executing;
        let result = driver.send_command(command).await;
        *handle.state.write().await = SessionState::Ready;
        result
    }

    /// Translate a static-database address into the running process.
    pub async fn convert_address(
        &self,
        session_id: &str,
        agent_id: &str,
        ida_address: u64,
    ) -> Result<AddressConversion> {
        let handle = self.sessions.get_owned(session_id, agent_id).await?;
        let runtime_base = {
            let mut guard = handle.driver.lock().await;
            let Some(driver) = guard.as_mut() else {
                return Err(Error::not_found(format!("session {session_id} is stopping")));
            };
            driver.runtime_image_base().await?
        };

        let ida_base = self.static_image.static_image_base();
        let offset = ida_address.wrapping_sub(ida_base);
        let runtime_address = runtime_base.wrapping_add(offset);
        debug!(
            ida = format_args!("{ida_address:#x}"),
            runtime = format_args!("{runtime_address:#x}"),
            "address converted"
        );
        Ok(AddressConversion { ida_address, runtime_address, ida_base, runtime_base, offset })
    }

    /// Stop a session and return its device to the pool. Idempotence is
    /// observable: the second call gets `NotFound`.
    pub async fn stop_session(&self, session_id: &str, agent_id: &str) -> Result<()> {
        let handle = self.sessions.remove_owned(session_id, agent_id).await?;
        info!(session = session_id, agent = agent_id, "stopping session");
        self.teardown(handle).await;
        Ok(())
    }

    /// Tear down everything a crashed agent left behind: its sessions, any
    /// device it held mid-allocation, and its queue entries.
    pub async fn cleanup_agent(&self, agent_id: &str) {
        info!(agent = agent_id, "cleaning up after agent");

        for handle in self.sessions.remove_all_for(agent_id).await {
            info!(agent = agent_id, session = %handle.meta.session_id, "terminating orphaned session");
            self.teardown(handle).await;
        }

        let mut pool = self.pool.lock().await;
        for id in pool.registry.release_all_for(agent_id) {
            warn!(agent = agent_id, device = %id, "freed device held without a session");
        }
        // Wake the agent's parked tasks so they observe their removal, then
        // splice the entries out.
        for waiter in pool.queue.iter().filter(|w| w.agent_id == agent_id) {
            waiter.notify.notify_one();
        }
        let before = pool.queue.len();
        pool.queue.retain(|w| w.agent_id != agent_id);
        if pool.queue.len() != before {
            info!(agent = agent_id, removed = before - pool.queue.len(), "spliced agent from queue");
        }
        wake_head(&mut pool);
    }

    /// Probe a device over SSH and record the result in its health field.
    pub async fn probe_device(&self, device_id: &str) -> Result<()> {
        let snapshot = {
            let pool = self.pool.lock().await;
            let device = pool
                .registry
                .get(device_id)
                .ok_or_else(|| Error::config(format!("device not found: {device_id}")))?;
            DeviceSnapshot::from(device)
        };

        let outcome = self.provisioner.check_reachable(&snapshot).await;
        let mut pool = self.pool.lock().await;
        if let Some(device) = pool.registry.get_mut(device_id) {
            if device.enabled {
                device.health = if outcome.is_ok() { Health::Healthy } else { Health::Error };
            }
        }
        outcome
    }

    /// Tear down all live sessions and refuse new work.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.shutdown.cancel();
        {
            let mut pool = self.pool.lock().await;
            for waiter in pool.queue.iter() {
                waiter.notify.notify_one();
            }
            pool.queue.clear();
        }
        for handle in self.sessions.drain().await {
            self.teardown(handle).await;
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.len().await
    }

    pub async fn queue_depth(&self) -> usize {
        self.pool.lock().await.queue.len()
    }

    /// Point-in-time view of the pool for status surfaces.
    pub async fn device_states(&self) -> Vec<DeviceStatus> {
        let pool = self.pool.lock().await;
        pool.registry
            .iter()
            .map(|d| DeviceStatus {
                id: d.id.clone(),
                name: d.name.clone(),
                enabled: d.enabled,
                available: d.available,
                holder: d.holder.clone(),
                health: d.health,
            })
            .collect()
    }

    // -- allocation ---------------------------------------------------------

    /// Reserve a device, parking on the FIFO queue when none is free.
    async fn allocate_device(
        &self,
        agent_id: &str,
        request_id: &str,
        timeout_ms: u64,
    ) -> Result<DeviceSnapshot> {
        let notify = {
            let mut pool = self.pool.lock().await;
            if let Some(snapshot) = pool.registry.reserve(agent_id) {
                return Ok(snapshot);
            }
            // Zero timeout fast-fails without touching the queue.
            if timeout_ms == 0 {
                return Err(Error::timeout("no device available"));
            }

            let notify = Arc::new(Notify::new());
            pool.queue.push_back(Waiter {
                agent_id: agent_id.to_owned(),
                request_id: request_id.to_owned(),
                notify: Arc::clone(&notify),
                notified: false,
            });
            info!(agent = agent_id, position = pool.queue.len(), "all devices busy, queued");
            notify
        };

        // A deadline that overflows is treated as "wait forever".
        let deadline = Instant::now().checked_add(Duration::from_millis(timeout_ms));

        loop {
            let woke = match deadline {
                Some(d) => tokio::time::timeout_at(d, notify.notified()).await.is_ok(),
                None => {
                    notify.notified().await;
                    true
                }
            };

            let mut pool = self.pool.lock().await;
            if !woke {
                // Timed out: splice our entry, preserving order. If we held
                // the wake, pass it on so it is not lost.
                let was_notified = pool
                    .queue
                    .iter()
                    .find(|w| w.agent_id == agent_id && w.request_id == request_id)
                    .map(|w| w.notified)
                    .unwrap_or(false);
                pool.queue.retain(|w| !(w.agent_id == agent_id && w.request_id == request_id));
                if was_notified {
                    wake_head(&mut pool);
                }
                info!(agent = agent_id, "timed out waiting for a device");
                return Err(Error::timeout(format!(
                    "timed out waiting {timeout_ms} ms for an available device"
                )));
            }

            // Woken. The combined condition (at the head AND a device free)
            // guards against a follower stealing the device on a stray wake
            // while the head is still allocating.
            let at_front = pool
                .queue
                .front()
                .map(|w| w.agent_id == agent_id && w.request_id == request_id)
                .unwrap_or(false);
            if at_front {
                if let Some(snapshot) = pool.registry.reserve(agent_id) {
                    pool.queue.pop_front();
                    return Ok(snapshot);
                }
            }

            let mut present = false;
            for waiter in pool.queue.iter_mut() {
                if waiter.agent_id == agent_id && waiter.request_id == request_id {
                    // Re-arm so the next release notifies us again.
                    waiter.notified = false;
                    present = true;
                    break;
                }
            }
            if !present {
                // Spliced out by crash cleanup or shutdown while parked.
                return Err(Error::internal("request was removed from the wait queue"));
            }
        }
    }

    // -- establishment ------------------------------------------------------

    /// Everything between reservation and registration. Runs with no locks
    /// held; on error the partial remote state has already been undone and
    /// only the device release remains for the caller.
    async fn establish(
        &self,
        snapshot: &DeviceSnapshot,
        agent_id: &str,
    ) -> Result<(RemoteTarget, Box<dyn crate::driver::DebuggerDriver>)> {
        // One-time platform validation, cached on the device.
        let platform = {
            let pool = self.pool.lock().await;
            pool.registry
                .get(&snapshot.id)
                .ok_or_else(|| {
                    Error::internal(format!("reserved device {} missing from registry", snapshot.id))
                })?
                .platform
        };
        let platform = if platform.initialized {
            platform
        } else {
            let record = self.provisioner.ensure_capabilities(snapshot).await?;
            let mut pool = self.pool.lock().await;
            if let Some(device) = pool.registry.get_mut(&snapshot.id) {
                device.platform = record;
            }
            record
        };

        // Identity discovery: informational, cached, never fatal.
        let needs_identity = {
            let pool = self.pool.lock().await;
            pool.registry.get(&snapshot.id).map(|d| d.device_info.is_none()).unwrap_or(false)
        };
        if needs_identity {
            if let Some(info) = self.provisioner.discover_identity(snapshot).await {
                let mut pool = self.pool.lock().await;
                if let Some(device) = pool.registry.get_mut(&snapshot.id) {
                    device.device_info = Some(info);
                }
            }
        }

        let artifact = self.artifacts.path_for_agent(agent_id).ok_or_else(|| {
            Error::config(format!("no artifact found for agent {agent_id} in the workspace"))
        })?;

        self.provisioner.stage_artifact(snapshot, &artifact, platform.signing_tool).await?;
        let target = self.provisioner.launch_server(snapshot).await?;

        match self.spawner.spawn_and_connect(&snapshot.host, snapshot.debugserver_port).await {
            Ok(driver) => Ok((target, driver)),
            Err(e) => {
                // The server is up; kill it before handing the device back.
                self.provisioner.kill_remote(snapshot, &target).await;
                Err(e)
            }
        }
    }

    async fn register(
        &self,
        snapshot: DeviceSnapshot,
        agent_id: &str,
        target: RemoteTarget,
        driver: Box<dyn crate::driver::DebuggerDriver>,
    ) -> Result<String> {
        // Crash cleanup may have released the device while we were
        // establishing; a session must never bind a device we no longer
        // hold.
        let still_held = {
            let pool = self.pool.lock().await;
            pool.registry
                .get(&snapshot.id)
                .map(|d| d.holder.as_deref() == Some(agent_id))
                .unwrap_or(false)
        };
        if !still_held {
            warn!(agent = agent_id, device = %snapshot.id, "reservation lost during allocation");
            driver.terminate().await;
            self.provisioner.kill_remote(&snapshot, &target).await;
            return Err(Error::internal("device reservation lost during allocation"));
        }

        let session_id = generate_session_id();
        let meta = SessionMeta {
            session_id: session_id.clone(),
            agent_id: agent_id.to_owned(),
            device_id: snapshot.id.clone(),
            remote_host: snapshot.host.clone(),
            remote_port: snapshot.debugserver_port,
            target,
            driver_pid: driver.pid(),
            is_remote: true,
        };
        self.sessions.insert(Arc::new(SessionHandle::new(meta, driver))).await;
        info!(session = %session_id, agent = agent_id, device = %snapshot.id, "session ready");
        Ok(session_id)
    }

    // -- teardown -----------------------------------------------------------

    /// Full teardown of a session already removed from the table. Every
    /// step is best-effort; local cleanup never waits on remote success.
    async fn teardown(&self, handle: Arc<SessionHandle>) {
        *handle.state.write().await = SessionState::Stopping;

        let driver = handle.driver.lock().await.take();
        if let Some(driver) = driver {
            driver.terminate().await;
        }

        let snapshot = {
            let pool = self.pool.lock().await;
            pool.registry.get(&handle.meta.device_id).map(DeviceSnapshot::from)
        };
        match snapshot {
            Some(snapshot) => self.provisioner.kill_remote(&snapshot, &handle.meta.target).await,
            None => warn!(
                device = %handle.meta.device_id,
                "device not found for remote cleanup"
            ),
        }

        let mut pool = self.pool.lock().await;
        if pool.registry.release(&handle.meta.device_id, &handle.meta.agent_id) {
            debug!(device = %handle.meta.device_id, "device returned to pool");
        }
        wake_head(&mut pool);
        drop(pool);

        *handle.state.write().await = SessionState::Closed;
    }

    async fn release_and_wake(&self, device_id: &str, agent_id: &str) {
        let mut pool = self.pool.lock().await;
        pool.registry.release(device_id, agent_id);
        wake_head(&mut pool);
    }
}

/// Notify the head of the queue if a device is free and it has not already
/// been woken.
fn wake_head(pool: &mut PoolState) {
    if !pool.registry.any_available() {
        return;
    }
    if let Some(head) = pool.queue.front_mut() {
        if !head.notified {
            head.notified = true;
            head.notify.notify_one();
            debug!(agent = %head.agent_id, "notified next agent in queue");
        }
    }
}

/// Commands that would execute on the host instead of the target. Both the
/// full and abbreviated spellings are interpreted by the debugger.
fn is_host_shell_command(command: &str) -> bool {
    command.contains("platform shell") || command.contains("platform sh")
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
