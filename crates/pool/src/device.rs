// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device pool data model.
//!
//! The registry is a passive structure: reserve/release are serialized by
//! the orchestrator's pool mutex, and borrowed views are only valid while
//! that mutex is held. Anything time-consuming takes a [`DeviceSnapshot`]
//! first.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{DeviceOverride, DeviceRecord, WorkspaceOverrides};
use crate::error::{Error, Result};

/// Connection health of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Online and working normally.
    Healthy,
    /// Could not be reached on the last probe.
    Error,
    /// Disabled in configuration.
    Disabled,
}

/// Code-signing tool available on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningTool {
    /// Platform does not require signing.
    #[default]
    None,
    Ldid,
    Jtool,
}

impl SigningTool {
    /// Remote command name, if signing applies.
    pub fn command(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Ldid => Some("ldid"),
            Self::Jtool => Some("jtool"),
        }
    }
}

/// One-time-initialized platform detection result.
///
/// Written exactly once by the task holding the device on first use, read
/// without locking afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformRecord {
    pub initialized: bool,
    pub signing_tool: SigningTool,
}

/// Cached capability record discovered over SSH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub udid: String,
    pub model: String,
    pub os_version: String,
    pub display_name: String,
    /// Unix seconds of the last successful discovery.
    #[serde(default)]
    pub last_seen: u64,
}

impl DeviceInfo {
    pub fn touch(&mut self) {
        self.last_seen =
            SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
    }
}

/// A remote debug target in the pool.
#[derive(Debug, Clone)]
pub struct RemoteDevice {
    pub id: String,
    pub name: String,
    pub host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub debugserver_port: u16,
    pub remote_binary_path: String,
    pub enabled: bool,
    pub device_info: Option<DeviceInfo>,

    // Runtime state, guarded by the orchestrator's pool mutex.
    pub available: bool,
    pub holder: Option<String>,
    pub since: Option<Instant>,
    pub health: Health,

    pub platform: PlatformRecord,
}

impl RemoteDevice {
    fn from_record(record: DeviceRecord, over: Option<&DeviceOverride>) -> Self {
        let (enabled, remote_binary_path) = match over {
            Some(o) => (o.enabled, o.remote_binary_path.clone()),
            None => (false, String::new()),
        };
        let health = if enabled { Health::Healthy } else { Health::Disabled };
        Self {
            id: record.id,
            name: record.name,
            host: record.host,
            ssh_port: record.ssh_port,
            ssh_user: record.ssh_user,
            debugserver_port: record.debugserver_port,
            remote_binary_path,
            enabled,
            device_info: record.device_info,
            available: true,
            holder: None,
            since: None,
            health,
            platform: PlatformRecord::default(),
        }
    }

    fn allocatable(&self) -> bool {
        self.enabled && self.available && self.health == Health::Healthy
    }
}

/// Owned copy of the connection parameters, safe to use after the pool
/// mutex is released.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub debugserver_port: u16,
    pub remote_binary_path: String,
}

impl From<&RemoteDevice> for DeviceSnapshot {
    fn from(d: &RemoteDevice) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            host: d.host.clone(),
            ssh_port: d.ssh_port,
            ssh_user: d.ssh_user.clone(),
            debugserver_port: d.debugserver_port,
            remote_binary_path: d.remote_binary_path.clone(),
        }
    }
}

/// The device pool. First-fit allocation in insertion order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<RemoteDevice>,
}

impl DeviceRegistry {
    /// Merge the global registry with workspace overrides and validate.
    ///
    /// Devices without an override are disabled with an empty remote path.
    /// Enabled devices must carry a remote path, and no two enabled devices
    /// may share a host/debug-port pair.
    pub fn from_config(records: Vec<DeviceRecord>, overrides: &WorkspaceOverrides) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::config("no devices configured in the global registry"));
        }

        let mut devices = Vec::with_capacity(records.len());
        for record in records {
            let over = overrides.device_overrides.get(&record.id);
            devices.push(RemoteDevice::from_record(record, over));
        }

        for device in devices.iter().filter(|d| d.enabled) {
            if device.remote_binary_path.is_empty() {
                return Err(Error::config(format!(
                    "device {} is enabled but has no remote binary path",
                    device.id
                )));
            }
        }

        for (i, a) in devices.iter().enumerate() {
            if !a.enabled {
                continue;
            }
            for b in devices.iter().skip(i + 1).filter(|d| d.enabled) {
                if a.host == b.host && a.debugserver_port == b.debugserver_port {
                    return Err(Error::config(format!(
                        "devices {} and {} both use {}:{} for the debug server",
                        a.id, b.id, a.host, a.debugserver_port
                    )));
                }
            }
        }

        Ok(Self { devices })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteDevice> {
        self.devices.iter()
    }

    pub fn get(&self, id: &str) -> Option<&RemoteDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RemoteDevice> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    /// First enabled, available, healthy device in insertion order.
    pub fn find_available(&self) -> Option<&RemoteDevice> {
        self.devices.iter().find(|d| d.allocatable())
    }

    pub fn any_available(&self) -> bool {
        self.devices.iter().any(|d| d.allocatable())
    }

    /// Reserve the first available device for `agent_id`.
    ///
    /// Single compare-and-set under the caller's pool mutex; returns the
    /// snapshot used for all subsequent off-mutex work.
    pub fn reserve(&mut self, agent_id: &str) -> Option<DeviceSnapshot> {
        let device = self.devices.iter_mut().find(|d| d.allocatable())?;
        device.available = false;
        device.holder = Some(agent_id.to_owned());
        device.since = Some(Instant::now());
        Some(DeviceSnapshot::from(&*device))
    }

    /// Release a device back to the pool.
    ///
    /// The holder must match: a release racing with crash cleanup must not
    /// free a device that has already been handed to someone else. Returns
    /// whether the device actually changed state.
    pub fn release(&mut self, device_id: &str, expected_holder: &str) -> bool {
        let Some(device) = self.get_mut(device_id) else {
            warn!(device = device_id, "release for unknown device");
            return false;
        };
        if device.holder.as_deref() != Some(expected_holder) {
            warn!(
                device = device_id,
                holder = device.holder.as_deref().unwrap_or(""),
                expected = expected_holder,
                "release skipped, holder mismatch"
            );
            return false;
        }
        device.available = true;
        device.holder = None;
        device.since = None;
        true
    }

    /// Release every device held by `agent_id`, returning the ids freed.
    pub fn release_all_for(&mut self, agent_id: &str) -> Vec<String> {
        let mut freed = Vec::new();
        for device in &mut self.devices {
            if !device.available && device.holder.as_deref() == Some(agent_id) {
                device.available = true;
                device.holder = None;
                device.since = None;
                freed.push(device.id.clone());
            }
        }
        freed
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
