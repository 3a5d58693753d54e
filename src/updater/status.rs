// SPDX-License-Identifier: MIT

//! Well-known workflow status values
//!
//! Besides state names, a workflow topic carries these statuses exchanged
//! with the requesting agent. The `start` and `stop` commands tag a raw
//! JSON state with them.

use crate::machine::error::MachineError;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Failed,
    Successful,
    Request,
    Response,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Failed => "failed",
            Status::Successful => "successful",
            Status::Request => "external_request",
            Status::Response => "external_response",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_state(state: &str) -> Result<serde_json::Map<String, Value>, MachineError> {
    match serde_json::from_str(state)? {
        Value::Object(map) => Ok(map),
        other => Err(MachineError::MalformedPayload(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Tag a raw JSON state as a workflow request
pub fn start(state: &str) -> Result<String, MachineError> {
    let mut map = parse_state(state)?;
    map.insert("status".into(), Status::Request.as_str().into());
    Ok(Value::Object(map).to_string())
}

/// Tag a raw JSON state as successful or failed, from its `successful` field
pub fn stop(state: &str) -> Result<String, MachineError> {
    let mut map = parse_state(state)?;
    let status = match map.get("successful") {
        Some(Value::Bool(true)) => Status::Successful,
        _ => Status::Failed,
    };
    map.insert("status".into(), status.as_str().into());
    Ok(Value::Object(map).to_string())
}
