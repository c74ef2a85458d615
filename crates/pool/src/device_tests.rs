// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{DeviceRegistry, Health};
use crate::config::{DeviceOverride, DeviceRecord, WorkspaceOverrides};
use crate::error::ErrorKind;

fn record(id: &str, host: &str, port: u16) -> DeviceRecord {
    DeviceRecord {
        id: id.to_owned(),
        name: format!("device {id}"),
        host: host.to_owned(),
        ssh_port: 22,
        ssh_user: "root".to_owned(),
        debugserver_port: port,
        device_info: None,
    }
}

fn enabled(path: &str) -> DeviceOverride {
    DeviceOverride { enabled: true, remote_binary_path: path.to_owned() }
}

fn overrides(entries: &[(&str, DeviceOverride)]) -> WorkspaceOverrides {
    let mut o = WorkspaceOverrides::default();
    for (id, over) in entries {
        o.device_overrides.insert((*id).to_owned(), over.clone());
    }
    o
}

#[test]
fn devices_without_override_stay_disabled() -> anyhow::Result<()> {
    let registry = DeviceRegistry::from_config(
        vec![record("a", "10.0.0.1", 5678), record("b", "10.0.0.2", 5678)],
        &overrides(&[("a", enabled("/var/agent/bin"))]),
    )?;

    let a = registry.get("a").ok_or_else(|| anyhow::anyhow!("missing a"))?;
    assert!(a.enabled);
    assert_eq!(a.health, Health::Healthy);

    let b = registry.get("b").ok_or_else(|| anyhow::anyhow!("missing b"))?;
    assert!(!b.enabled);
    assert_eq!(b.health, Health::Disabled);
    assert_eq!(b.remote_binary_path, "");
    Ok(())
}

#[test]
fn empty_registry_is_a_config_error() {
    let err = DeviceRegistry::from_config(vec![], &WorkspaceOverrides::default()).err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Config));
}

#[test]
fn enabled_device_requires_remote_path() {
    let err = DeviceRegistry::from_config(
        vec![record("a", "10.0.0.1", 5678)],
        &overrides(&[("a", DeviceOverride { enabled: true, remote_binary_path: String::new() })]),
    )
    .err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Config));
}

#[test]
fn conflicting_ports_on_one_host_are_rejected() {
    let err = DeviceRegistry::from_config(
        vec![record("a", "10.0.0.1", 5678), record("b", "10.0.0.1", 5678)],
        &overrides(&[("a", enabled("/x")), ("b", enabled("/y"))]),
    )
    .err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Config));
}

#[test]
fn same_port_on_different_hosts_is_fine() {
    let result = DeviceRegistry::from_config(
        vec![record("a", "10.0.0.1", 5678), record("b", "10.0.0.2", 5678)],
        &overrides(&[("a", enabled("/x")), ("b", enabled("/y"))]),
    );
    assert!(result.is_ok());
}

#[test]
fn reserve_is_first_fit_in_insertion_order() -> anyhow::Result<()> {
    let mut registry = DeviceRegistry::from_config(
        vec![record("a", "10.0.0.1", 5678), record("b", "10.0.0.2", 5678)],
        &overrides(&[("a", enabled("/x")), ("b", enabled("/y"))]),
    )?;

    let first = registry.reserve("agent-1").ok_or_else(|| anyhow::anyhow!("no device"))?;
    assert_eq!(first.id, "a");
    let second = registry.reserve("agent-2").ok_or_else(|| anyhow::anyhow!("no device"))?;
    assert_eq!(second.id, "b");
    assert!(registry.reserve("agent-3").is_none());

    let a = registry.get("a").ok_or_else(|| anyhow::anyhow!("missing a"))?;
    assert!(!a.available);
    assert_eq!(a.holder.as_deref(), Some("agent-1"));
    assert!(a.since.is_some());
    Ok(())
}

#[test]
fn release_requires_matching_holder() -> anyhow::Result<()> {
    let mut registry = DeviceRegistry::from_config(
        vec![record("a", "10.0.0.1", 5678)],
        &overrides(&[("a", enabled("/x"))]),
    )?;
    registry.reserve("agent-1");

    assert!(!registry.release("a", "agent-2"));
    assert!(!registry.get("a").map(|d| d.available).unwrap_or(true));

    assert!(registry.release("a", "agent-1"));
    assert!(registry.get("a").map(|d| d.available).unwrap_or(false));
    // Releasing an already-available device is a no-op.
    assert!(!registry.release("a", "agent-1"));
    Ok(())
}

#[test]
fn release_all_for_frees_only_that_agent() -> anyhow::Result<()> {
    let mut registry = DeviceRegistry::from_config(
        vec![record("a", "10.0.0.1", 5678), record("b", "10.0.0.2", 5678)],
        &overrides(&[("a", enabled("/x")), ("b", enabled("/y"))]),
    )?;
    registry.reserve("agent-1");
    registry.reserve("agent-2");

    let freed = registry.release_all_for("agent-1");
    assert_eq!(freed, vec!["a".to_owned()]);
    assert!(registry.get("a").map(|d| d.available).unwrap_or(false));
    assert!(!registry.get("b").map(|d| d.available).unwrap_or(true));
    Ok(())
}

#[test]
fn unhealthy_devices_are_skipped() -> anyhow::Result<()> {
    let mut registry = DeviceRegistry::from_config(
        vec![record("a", "10.0.0.1", 5678), record("b", "10.0.0.2", 5678)],
        &overrides(&[("a", enabled("/x")), ("b", enabled("/y"))]),
    )?;
    if let Some(a) = registry.get_mut("a") {
        a.health = Health::Error;
    }

    let got = registry.reserve("agent-1").ok_or_else(|| anyhow::anyhow!("no device"))?;
    assert_eq!(got.id, "b");
    Ok(())
}
