// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort device identity discovery.
//!
//! Runs platform probes over an existing SSH session and caches the result
//! on the device record. Discovery never blocks or fails a session start;
//! everything here degrades to hostname-derived fallbacks.

use regex::Regex;
use tracing::{debug, info};

use crate::device::DeviceInfo;
use crate::ssh::SshSession;

const IOREG_CMD: &str = "/usr/sbin/ioreg -rd1 -c IOPlatformExpertDevice \
     | /var/jb/usr/bin/grep IOPlatformUUID | /var/jb/usr/bin/head -1";

/// Probe the device for identity: UDID, OS version, architecture.
pub async fn fetch_device_info(ssh: &SshSession, host: &str) -> DeviceInfo {
    let mut is_ios = false;

    // UDID via ioreg; hostname-derived fallback.
    let udid = match ssh.exec(IOREG_CMD).await {
        Ok(out) if !out.stdout.is_empty() && !out.stdout.contains("not found") => {
            is_ios = true;
            match parse_udid_from_ioreg(&out.stdout) {
                Some(udid) => udid,
                None => {
                    debug!(host, "could not parse UDID, deriving id from hostname");
                    hostname_id(ssh, host).await
                }
            }
        }
        _ => hostname_id(ssh, host).await,
    };

    // OS version: sw_vers on iOS, uname elsewhere.
    let os_version = match ssh.exec("/var/jb/usr/bin/sw_vers -productVersion").await {
        Ok(out) if !out.stdout.is_empty() && !out.stdout.contains("not found") => {
            is_ios = true;
            out.stdout.trim().to_owned()
        }
        _ => match ssh.exec("uname -sr").await {
            Ok(out) if !out.stdout.trim().is_empty() => out.stdout.trim().to_owned(),
            _ => "Unknown".to_owned(),
        },
    };

    // Architecture: jailbreak path first, then PATH.
    let model = match ssh.exec("/var/jb/usr/bin/uname -m").await {
        Ok(out) if !out.stdout.trim().is_empty() && !out.stdout.contains("not found") => {
            out.stdout.trim().to_owned()
        }
        _ => match ssh.exec("uname -m").await {
            Ok(out) if !out.stdout.trim().is_empty() => out.stdout.trim().to_owned(),
            _ => "Unknown".to_owned(),
        },
    };

    let display_name = if is_ios {
        format!("{model} - iOS {os_version}")
    } else {
        format!("{model} - {os_version}")
    };

    let mut info = DeviceInfo { udid, model, os_version, display_name, last_seen: 0 };
    info.touch();
    info!(host, udid = %info.udid, name = %info.display_name, "discovered device identity");
    info
}

async fn hostname_id(ssh: &SshSession, host: &str) -> String {
    match ssh.exec("hostname").await {
        Ok(out) if !out.stdout.trim().is_empty() => format!("device_{}", out.stdout.trim()),
        _ => format!("device_{host}"),
    }
}

/// Extract a UUID-shaped token from `ioreg` output.
///
/// Tries the strict UUID shape first, then falls back to any quoted token
/// with enough length to plausibly be a device identifier.
pub fn parse_udid_from_ioreg(output: &str) -> Option<String> {
    let strict = Regex::new(
        "\"([0-9A-Fa-f]{8}-[0-9A-Fa-f]{4,12}-[0-9A-Fa-f]{4,16}-[0-9A-Fa-f]{4,16}-[0-9A-Fa-f]{4,12})\"",
    )
    .ok()?;
    if let Some(m) = strict.captures(output) {
        return Some(m[1].to_owned());
    }

    let generic = Regex::new("\"([A-Za-z0-9-]+)\"").ok()?;
    for caps in generic.captures_iter(output) {
        let token = &caps[1];
        if token.len() >= 8 && token != "IOPlatformUUID" {
            return Some(token.to_owned());
        }
    }
    None
}

#[cfg(test)]
#[path = "discover_tests.rs"]
mod tests;
