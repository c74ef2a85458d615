// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fake provisioner and driver seams plus an
//! orchestrator fixture wired to them.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use crate::config::{DeviceOverride, DeviceRecord, WorkspaceOverrides};
use crate::device::{DeviceInfo, DeviceRegistry, DeviceSnapshot, PlatformRecord, SigningTool};
use crate::driver::{DebuggerDriver, DriverSpawner};
use crate::error::{Error, ErrorKind, Result};
use crate::orchestrator::Orchestrator;
use crate::providers::{FixedArtifact, FixedImageBase};
use crate::provision::{RemoteTarget, TargetProvisioner};

pub const STATIC_BASE: u64 = 0x0001_0000_0000;
pub const RUNTIME_BASE: u64 = 0x0001_0abc_d000;

pub fn kind_of<T>(result: Result<T>) -> Option<ErrorKind> {
    result.err().map(|e| e.kind())
}

/// Provisioner that succeeds instantly and tracks remote process counts.
#[derive(Default)]
pub struct FakeProvisioner {
    pub fail_launch: AtomicBool,
    pub launches: AtomicUsize,
    pub kills: StdMutex<Vec<(String, i32)>>,
    /// Remote server processes currently alive (launched minus killed).
    pub live_servers: AtomicI64,
}

#[async_trait]
impl TargetProvisioner for FakeProvisioner {
    async fn ensure_capabilities(&self, _device: &DeviceSnapshot) -> Result<PlatformRecord> {
        Ok(PlatformRecord { initialized: true, signing_tool: SigningTool::Ldid })
    }

    async fn discover_identity(&self, device: &DeviceSnapshot) -> Option<DeviceInfo> {
        Some(DeviceInfo {
            udid: format!("00008020-{}", device.id),
            model: "arm64".to_owned(),
            os_version: "16.5".to_owned(),
            display_name: "arm64 - iOS 16.5".to_owned(),
            last_seen: 1,
        })
    }

    async fn stage_artifact(
        &self,
        _device: &DeviceSnapshot,
        _local: &Path,
        _signing: SigningTool,
    ) -> Result<()> {
        Ok(())
    }

    async fn launch_server(&self, _device: &DeviceSnapshot) -> Result<RemoteTarget> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(Error::server_launch(
                "debug-server process 4242 not running (may have exited immediately): \
                 Segmentation fault: 11",
            ));
        }
        let n = self.launches.fetch_add(1, Ordering::SeqCst) as i32;
        self.live_servers.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteTarget { server_pid: 1000 + n, debugged_pid: Some(2000 + n) })
    }

    async fn kill_remote(&self, device: &DeviceSnapshot, target: &RemoteTarget) {
        self.live_servers.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut kills) = self.kills.lock() {
            kills.push((device.id.clone(), target.server_pid));
        }
    }

    async fn check_reachable(&self, _device: &DeviceSnapshot) -> Result<()> {
        Ok(())
    }
}

/// Driver whose output always ends in the prompt marker.
pub struct FakeDriver {
    pid: i32,
    commands: Arc<StdMutex<Vec<String>>>,
    live_drivers: Arc<AtomicI64>,
}

#[async_trait]
impl DebuggerDriver for FakeDriver {
    async fn send_command(&mut self, command: &str) -> Result<String> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_owned());
        }
        Ok(format!("{command}\n(lldb) "))
    }

    async fn runtime_image_base(&mut self) -> Result<u64> {
        Ok(RUNTIME_BASE)
    }

    async fn terminate(self: Box<Self>) {
        self.live_drivers.fetch_sub(1, Ordering::SeqCst);
    }

    fn pid(&self) -> i32 {
        self.pid
    }
}

#[derive(Default)]
pub struct FakeSpawner {
    pub fail_connect: AtomicBool,
    pub spawned: AtomicUsize,
    pub commands: Arc<StdMutex<Vec<String>>>,
    pub live_drivers: Arc<AtomicI64>,
}

#[async_trait]
impl DriverSpawner for FakeSpawner {
    async fn spawn_and_connect(&self, _host: &str, _port: u16) -> Result<Box<dyn DebuggerDriver>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::driver("failed to connect to remote debug-server"));
        }
        let n = self.spawned.fetch_add(1, Ordering::SeqCst) as i32;
        self.live_drivers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDriver {
            pid: 500 + n,
            commands: Arc::clone(&self.commands),
            live_drivers: Arc::clone(&self.live_drivers),
        }))
    }
}

pub struct Fixture {
    pub orch: Arc<Orchestrator>,
    pub provisioner: Arc<FakeProvisioner>,
    pub spawner: Arc<FakeSpawner>,
}

/// A registry of `devices` enabled devices on distinct hosts.
pub fn registry(devices: usize) -> DeviceRegistry {
    let records: Vec<DeviceRecord> = (0..devices)
        .map(|i| DeviceRecord {
            id: format!("dev-{i}"),
            name: format!("bench device {i}"),
            host: format!("10.0.1.{}", i + 1),
            ssh_port: 22,
            ssh_user: "root".to_owned(),
            debugserver_port: 5678,
            device_info: None,
        })
        .collect();
    let mut overrides = WorkspaceOverrides::default();
    for i in 0..devices {
        overrides.device_overrides.insert(
            format!("dev-{i}"),
            DeviceOverride {
                enabled: true,
                remote_binary_path: "/var/mobile/agent/binary".to_owned(),
            },
        );
    }
    match DeviceRegistry::from_config(records, &overrides) {
        Ok(registry) => registry,
        Err(e) => unreachable!("test registry must validate: {e}"),
    }
}

pub fn fixture(devices: usize) -> Fixture {
    let provisioner = Arc::new(FakeProvisioner::default());
    let spawner = Arc::new(FakeSpawner::default());
    let orch = Arc::new(Orchestrator::new(
        registry(devices),
        Arc::clone(&provisioner) as Arc<dyn TargetProvisioner>,
        Arc::clone(&spawner) as Arc<dyn DriverSpawner>,
        Arc::new(FixedArtifact::new("/tmp/agent-binary")),
        Arc::new(FixedImageBase(STATIC_BASE)),
    ));
    Fixture { orch, provisioner, spawner }
}

pub async fn device_available(orch: &Orchestrator, id: &str) -> bool {
    orch.device_states().await.iter().find(|d| d.id == id).map(|d| d.available).unwrap_or(false)
}
