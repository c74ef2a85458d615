// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{
    load_overrides, load_registry, save_overrides, DeviceOverride, DeviceRecord, Tunables,
    WorkspaceOverrides,
};

#[test]
fn registry_round_trips_through_json() -> anyhow::Result<()> {
    let json = r#"[
        {
            "id": "00008020-0012-3456-7890-00112233445E",
            "name": "bench iphone",
            "host": "10.0.1.5",
            "ssh_port": 2222,
            "ssh_user": "mobile",
            "debugserver_port": 5678,
            "device_info": {
                "udid": "00008020-0012-3456-7890-00112233445E",
                "model": "arm64",
                "os_version": "16.5",
                "display_name": "arm64 - iOS 16.5",
                "last_seen": 1722400000
            }
        },
        {
            "id": "spare",
            "name": "spare device",
            "host": "10.0.1.6",
            "ssh_user": "root",
            "debugserver_port": 5679
        }
    ]"#;

    let devices: Vec<DeviceRecord> = serde_json::from_str(json)?;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].ssh_port, 2222);
    let info = devices[0].device_info.as_ref().ok_or_else(|| anyhow::anyhow!("no info"))?;
    assert_eq!(info.model, "arm64");
    // ssh_port defaults to 22, device_info to absent.
    assert_eq!(devices[1].ssh_port, 22);
    assert!(devices[1].device_info.is_none());
    Ok(())
}

#[test]
fn load_registry_from_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("devices.json");
    std::fs::write(
        &path,
        r#"[{"id":"a","name":"a","host":"10.0.0.1","ssh_user":"root","debugserver_port":5678}]"#,
    )?;

    let devices = load_registry(&path)?;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "a");
    Ok(())
}

#[test]
fn overrides_survive_save_and_load() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut overrides = WorkspaceOverrides::default();
    overrides.device_overrides.insert(
        "a".to_owned(),
        DeviceOverride { enabled: true, remote_binary_path: "/var/mobile/agent/bin".to_owned() },
    );

    save_overrides(dir.path(), &overrides)?;
    let loaded = load_overrides(dir.path());
    let a = loaded.device_overrides.get("a").ok_or_else(|| anyhow::anyhow!("missing a"))?;
    assert!(a.enabled);
    assert_eq!(a.remote_binary_path, "/var/mobile/agent/bin");
    Ok(())
}

#[test]
fn missing_overrides_file_disables_everything() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let loaded = load_overrides(dir.path());
    assert!(loaded.device_overrides.is_empty());
    Ok(())
}

#[test]
fn corrupt_overrides_file_is_treated_as_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("pool_config.json"), "{ not json")?;
    let loaded = load_overrides(dir.path());
    assert!(loaded.device_overrides.is_empty());
    Ok(())
}

#[test]
fn override_fields_default_to_disabled() -> anyhow::Result<()> {
    let over: DeviceOverride = serde_json::from_str("{}")?;
    assert!(!over.enabled);
    assert_eq!(over.remote_binary_path, "");
    Ok(())
}

#[test]
fn tunables_defaults_match_contract() {
    let t = Tunables::default();
    assert_eq!(t.prompt_read_timeout, Duration::from_secs(30));
    assert_eq!(t.connect_read_timeout, Duration::from_secs(30));
    assert_eq!(t.port_poll_budget, Duration::from_secs(5));
    assert_eq!(t.port_poll_interval, Duration::from_millis(200));
    assert_eq!(t.quit_grace, Duration::from_secs(2));
    assert_eq!(t.term_grace, Duration::from_secs(3));
    assert_eq!(t.read_tick, Duration::from_millis(100));
    assert_eq!(t.idle_ticks, 3);
}
