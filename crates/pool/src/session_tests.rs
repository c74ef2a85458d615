// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::{generate_session_id, SessionHandle, SessionMeta, SessionTable};
use crate::driver::DebuggerDriver;
use crate::error::{ErrorKind, Result};
use crate::provision::RemoteTarget;

struct NullDriver;

#[async_trait::async_trait]
impl DebuggerDriver for NullDriver {
    async fn send_command(&mut self, _command: &str) -> Result<String> {
        Ok("(lldb) ".to_owned())
    }

    async fn runtime_image_base(&mut self) -> Result<u64> {
        Ok(0x0010_0000_0000)
    }

    async fn terminate(self: Box<Self>) {}

    fn pid(&self) -> i32 {
        42
    }
}

fn kind_of<T>(result: Result<T>) -> Option<ErrorKind> {
    result.err().map(|e| e.kind())
}

fn handle(session_id: &str, agent_id: &str, device_id: &str) -> Arc<SessionHandle> {
    let meta = SessionMeta {
        session_id: session_id.to_owned(),
        agent_id: agent_id.to_owned(),
        device_id: device_id.to_owned(),
        remote_host: "10.0.1.5".to_owned(),
        remote_port: 5678,
        target: RemoteTarget { server_pid: 100, debugged_pid: Some(101) },
        driver_pid: 42,
        is_remote: true,
    };
    Arc::new(SessionHandle::new(meta, Box::new(NullDriver)))
}

#[test]
fn session_ids_are_prefixed_and_unique() {
    let a = generate_session_id();
    let b = generate_session_id();
    assert!(a.starts_with("dbg_"));
    assert_ne!(a, b);
    assert_eq!(a.len(), 4 + 32);
}

#[tokio::test]
async fn ownership_is_validated() {
    let table = SessionTable::default();
    table.insert(handle("s1", "agent-a", "dev-1")).await;

    assert!(table.get_owned("s1", "agent-a").await.is_ok());
    assert_eq!(kind_of(table.get_owned("s1", "agent-b").await), Some(ErrorKind::Forbidden));
    assert_eq!(kind_of(table.get_owned("missing", "agent-a").await), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn remove_is_not_repeatable() {
    let table = SessionTable::default();
    table.insert(handle("s1", "agent-a", "dev-1")).await;

    assert!(table.remove_owned("s1", "agent-a").await.is_ok());
    assert_eq!(kind_of(table.remove_owned("s1", "agent-a").await), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn remove_all_for_drains_only_that_agent() {
    let table = SessionTable::default();
    table.insert(handle("s1", "agent-a", "dev-1")).await;
    table.insert(handle("s2", "agent-b", "dev-2")).await;
    table.insert(handle("s3", "agent-a", "dev-3")).await;

    let drained = table.remove_all_for("agent-a").await;
    assert_eq!(drained.len(), 2);
    assert_eq!(table.len().await, 1);
    assert!(table.get_owned("s2", "agent-b").await.is_ok());
}
