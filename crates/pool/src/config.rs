// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pool configuration: the global device registry plus per-workspace
//! overrides.
//!
//! Two levels are merged at load time. The global registry describes every
//! device the installation knows about; the workspace overrides say which
//! of them are enabled for this workspace and where the artifact lands on
//! each. A device without an override is disabled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::device::{DeviceInfo, DeviceRegistry};

const OVERRIDES_FILE: &str = "pool_config.json";

fn default_ssh_port() -> u16 {
    22
}

/// One entry of the global device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub ssh_user: String,
    pub debugserver_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

/// Per-workspace settings for one device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceOverride {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub remote_binary_path: String,
}

/// The workspace overrides document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceOverrides {
    #[serde(default)]
    pub device_overrides: HashMap<String, DeviceOverride>,
}

/// Everything needed to build an orchestrator.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub devices: Vec<DeviceRecord>,
    pub overrides: WorkspaceOverrides,
    /// Workspace directory the overrides document is written back to.
    pub workspace_dir: PathBuf,
    /// Local debugger executable. Auto-detected when absent.
    pub debugger_path: Option<PathBuf>,
    pub tunables: Tunables,
}

impl PoolConfig {
    pub fn registry(&self) -> crate::error::Result<DeviceRegistry> {
        DeviceRegistry::from_config(self.devices.clone(), &self.overrides)
    }
}

/// Load the global registry from a JSON array of [`DeviceRecord`]s.
pub fn load_registry(path: &Path) -> anyhow::Result<Vec<DeviceRecord>> {
    let contents = std::fs::read_to_string(path)?;
    let devices: Vec<DeviceRecord> = serde_json::from_str(&contents)?;
    info!(path = %path.display(), count = devices.len(), "loaded device registry");
    Ok(devices)
}

/// Load workspace overrides from `<workspace_dir>/pool_config.json`.
///
/// A missing or unparsable file means every device stays disabled, matching
/// a freshly created workspace.
pub fn load_overrides(workspace_dir: &Path) -> WorkspaceOverrides {
    let path = workspace_dir.join(OVERRIDES_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => {
            info!(path = %path.display(), "no workspace config, all devices disabled");
            return WorkspaceOverrides::default();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(overrides) => overrides,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse workspace config");
            WorkspaceOverrides::default()
        }
    }
}

/// Write the workspace overrides document back out.
pub fn save_overrides(workspace_dir: &Path, overrides: &WorkspaceOverrides) -> anyhow::Result<()> {
    let path = workspace_dir.join(OVERRIDES_FILE);
    let contents = serde_json::to_string_pretty(overrides)?;
    std::fs::write(&path, contents)?;
    info!(path = %path.display(), "saved workspace config");
    Ok(())
}

/// Internal timing knobs. Defaults follow the debugger's observed behavior;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Wall-clock bound for a read-to-prompt.
    pub prompt_read_timeout: Duration,
    /// Wall-clock bound for the connect-complete read.
    pub connect_read_timeout: Duration,
    /// Bound for draining debugger startup output.
    pub startup_read_timeout: Duration,
    /// Bound for reading a settings command's echo.
    pub setting_read_timeout: Duration,
    /// Total budget for the remote port-listen poll.
    pub port_poll_budget: Duration,
    /// Sub-interval between remote port checks.
    pub port_poll_interval: Duration,
    /// Pause between server launch and the debugged-pid probe.
    pub launch_settle: Duration,
    /// Grace after `quit` before escalating to SIGTERM.
    pub quit_grace: Duration,
    /// Grace after SIGTERM before escalating to SIGKILL.
    pub term_grace: Duration,
    /// Readiness tick for PTY reads.
    pub read_tick: Duration,
    /// Consecutive idle ticks required after a marker appears.
    pub idle_ticks: u8,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            prompt_read_timeout: Duration::from_secs(30),
            connect_read_timeout: Duration::from_secs(30),
            startup_read_timeout: Duration::from_secs(10),
            setting_read_timeout: Duration::from_secs(5),
            port_poll_budget: Duration::from_secs(5),
            port_poll_interval: Duration::from_millis(200),
            launch_settle: Duration::from_millis(500),
            quit_grace: Duration::from_secs(2),
            term_grace: Duration::from_secs(3),
            read_tick: Duration::from_millis(100),
            idle_ticks: 3,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
