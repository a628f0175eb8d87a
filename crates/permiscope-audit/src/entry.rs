// entry.rs — Audit entry data model.
//
// Every gateway run produces exactly one AuditLogEntry. Entries form a
// chain: each one carries the hash of the raw line before it in
// `previousHash`, and optionally an HMAC `signature` over its own content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use permiscope_policy::{canonical_json, Action, Decision};

use crate::error::AuditError;

/// Outcome of a run as recorded in the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl ExecutionResult {
    pub fn succeeded(output: Option<Value>) -> Self {
        Self {
            success: true,
            output,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// A single audit entry: one line in the JSONL audit log.
///
/// `signature` must stay the last field; it is stripped before signing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub action: Action,
    pub decision: Decision,
    pub result: ExecutionResult,
    /// Filled in by `AuditLog::append`.
    #[serde(default)]
    pub previous_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl AuditLogEntry {
    /// Record a run of `action`. The chain fields are set on append.
    pub fn new(action: Action, decision: Decision, result: ExecutionResult) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_id: action.agent_id.clone(),
            action,
            decision,
            result,
            previous_hash: String::new(),
            signature: None,
        }
    }

    /// Bytes covered by the entry signature.
    pub fn signing_payload(&self) -> Result<String, AuditError> {
        Ok(signing_payload(serde_json::to_value(self)?))
    }
}

/// Canonical JSON (sorted keys) of an entry object without its signature.
///
/// Works on a raw `Value` so verification can use exactly what was parsed
/// from the line.
pub fn signing_payload(mut entry: Value) -> String {
    if let Value::Object(map) = &mut entry {
        map.remove("signature");
    }
    canonical_json(&entry)
}
