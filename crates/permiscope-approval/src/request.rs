// request.rs — Approval request records and their canonical key.
//
// One record exists per distinct intent: (agent, action, parameters).
// The record id is derived from that triple, so an approval granted for
// one intent can never be looked up by a different one, and two callers
// asking for the same thing land on the same record.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use permiscope_policy::{canonical_json, Params};

/// Lifecycle state of an approval request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => f.write_str("PENDING"),
            ApprovalStatus::Approved => f.write_str("APPROVED"),
            ApprovalStatus::Rejected => f.write_str("REJECTED"),
        }
    }
}

/// One entry in the approval store file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Canonical key, see [`request_key`].
    pub id: String,
    pub agent_id: String,
    pub action_name: String,
    #[serde(default)]
    pub params: Params,
    pub status: ApprovalStatus,
    /// When the record was created or last re-opened.
    pub timestamp: DateTime<Utc>,
    /// Set when the request is approved; the grant is void from then on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        agent_id: &str,
        action_name: &str,
        params: &Params,
        status: ApprovalStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: request_key(agent_id, action_name, params),
            agent_id: agent_id.to_string(),
            action_name: action_name.to_string(),
            params: params.clone(),
            status,
            timestamp: now,
            expires_at: None,
        }
    }

    /// When an approved record stops counting as a grant.
    ///
    /// A record approved without an expiry (e.g., edited by hand) expires
    /// one TTL after its timestamp.
    pub fn grant_expiry(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        match self.status {
            ApprovalStatus::Approved => Some(
                self.expires_at
                    .unwrap_or_else(|| expiry_after(self.timestamp, ttl)),
            ),
            _ => None,
        }
    }

    /// True for an approved record whose grant has run out.
    pub fn is_expired_grant(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.grant_expiry(ttl).is_some_and(|at| at <= now)
    }
}

/// Compute the canonical key for an intent.
///
/// The triple is serialized as a JSON array with object keys sorted at every
/// depth, then base64url-encoded, so parameter insertion order never matters
/// and no separator inside an id can make two intents collide.
pub fn request_key(agent_id: &str, action_name: &str, params: &Params) -> String {
    let triple = Value::Array(vec![
        Value::String(agent_id.to_string()),
        Value::String(action_name.to_string()),
        Value::Object(params.clone()),
    ]);
    URL_SAFE_NO_PAD.encode(canonical_json(&triple))
}

/// `start + ttl`, clamped to the representable range.
pub(crate) fn expiry_after(start: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    start.checked_add_signed(ttl).unwrap_or(if ttl < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
