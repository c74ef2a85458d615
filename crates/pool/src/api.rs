// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON request/response surface.
//!
//! Field names here are a wire contract consumed by agent tooling; changes
//! break deployed agents. The module only shapes envelopes; transports
//! (RPC, socket, whatever) are bound by the embedding application.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub agent_id: String,
    pub request_id: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendCommandRequest {
    pub session_id: String,
    pub agent_id: String,
    pub command: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertAddressRequest {
    pub session_id: String,
    pub agent_id: String,
    pub ida_address: u64,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSessionRequest {
    pub session_id: String,
    pub agent_id: String,
    pub request_id: String,
}

pub async fn start_session(orch: &Orchestrator, req: StartSessionRequest) -> Value {
    match orch.start_session(&req.agent_id, &req.request_id, req.timeout_ms).await {
        Ok(session_id) => json!({
            "status": "success",
            "session_id": session_id,
            "request_id": req.request_id,
        }),
        Err(e) => error_response(&e, &req.request_id),
    }
}

pub async fn send_command(orch: &Orchestrator, req: SendCommandRequest) -> Value {
    match orch.send_command(&req.session_id, &req.agent_id, &req.command).await {
        Ok(output) => json!({
            "status": "success",
            "output": output,
            "request_id": req.request_id,
        }),
        Err(e) => error_response(&e, &req.request_id),
    }
}

pub async fn convert_address(orch: &Orchestrator, req: ConvertAddressRequest) -> Value {
    match orch.convert_address(&req.session_id, &req.agent_id, req.ida_address).await {
        Ok(conv) => json!({
            "status": "success",
            "ida_address": conv.ida_address,
            "runtime_address": conv.runtime_address,
            "ida_base": conv.ida_base,
            "runtime_base": conv.runtime_base,
            "offset": conv.offset,
            "request_id": req.request_id,
        }),
        Err(e) => error_response(&e, &req.request_id),
    }
}

pub async fn stop_session(orch: &Orchestrator, req: StopSessionRequest) -> Value {
    match orch.stop_session(&req.session_id, &req.agent_id).await {
        Ok(()) => json!({
            "status": "success",
            "request_id": req.request_id,
        }),
        Err(e) => error_response(&e, &req.request_id),
    }
}

fn error_response(error: &Error, request_id: &str) -> Value {
    json!({
        "status": "error",
        "error": error.to_string(),
        "request_id": request_id,
    })
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
