//! # Audit Hash Chain
//!
//! Every audit entry commits to its predecessor:
//!
//! ```text
//! current_hash = SHA256( id | user_id | employee_id | action | resource_type
//!                        | resource_id | old_value | new_value | ip | user_agent
//!                        | request_id | status | failure_reason | prev_hash
//!                        | created_at )
//! ```
//!
//! Absent values render as `<nil>`, JSON values in compact form and
//! `created_at` as RFC 3339 with nanoseconds in UTC. The first
//! entry's `prev_hash` is the literal [`GENESIS`].
//!
//! This module is pure: the writer that reads the chain head and persists
//! new entries lives with the datastore.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::digest::sha256_hex;
use crate::enums::{AuditAction, AuditStatus};

/// Previous-hash value of the first entry.
pub const GENESIS: &str = "GENESIS";

const NIL: &str = "<nil>";

/// An audit record before it is chained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditEntry {
    pub user_id: Option<String>,
    pub employee_id: Option<String>,
    pub client_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub status: AuditStatus,
    pub failure_reason: Option<String>,
}

/// A persisted, chained audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub employee_id: Option<String>,
    pub client_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub old_value: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub new_value: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub status: AuditStatus,
    pub failure_reason: Option<String>,
    pub prev_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Chain `entry` onto `prev_hash`. `created_at` is truncated to
    /// microseconds so the hash survives a database round trip.
    pub fn seal(
        entry: NewAuditEntry,
        id: String,
        prev_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut sealed = Self {
            id,
            user_id: entry.user_id,
            employee_id: entry.employee_id,
            client_id: entry.client_id,
            action: entry.action,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            old_value: entry.old_value,
            new_value: entry.new_value,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            request_id: entry.request_id,
            status: entry.status,
            failure_reason: entry.failure_reason,
            prev_hash: prev_hash.to_string(),
            current_hash: String::new(),
            created_at: created_at.trunc_subsecs(6),
        };
        sealed.current_hash = sealed.compute_hash();
        sealed
    }

    /// The `|`-separated canonical tuple that is hashed.
    pub fn canonical_string(&self) -> String {
        let fields: [String; 15] = [
            self.id.clone(),
            opt(&self.user_id),
            opt(&self.employee_id),
            self.action.as_str().to_string(),
            self.resource_type.clone(),
            opt(&self.resource_id),
            json_opt(&self.old_value),
            json_opt(&self.new_value),
            opt(&self.ip_address),
            opt(&self.user_agent),
            opt(&self.request_id),
            self.status.as_str().to_string(),
            opt(&self.failure_reason),
            self.prev_hash.clone(),
            self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        ];
        fields.join("|")
    }

    /// Recompute the hash from the stored fields.
    pub fn compute_hash(&self) -> String {
        sha256_hex(self.canonical_string())
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| NIL.to_string())
}

fn json_opt(value: &Option<serde_json::Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => NIL.to_string(),
    }
}

/// Outcome of walking the chain in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub total_entries: usize,
    pub valid: bool,
    /// Id of the first entry that failed verification.
    pub first_broken_id: Option<String>,
    pub reason: Option<String>,
}

/// Verify a chain given in insertion order. Stops at the first mismatch:
/// either a `prev_hash` that does not equal the predecessor's hash (a
/// missing or reordered row) or a `current_hash` that does not match the
/// recomputed value (an edited row).
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    let mut expected_prev = GENESIS.to_string();
    for entry in entries {
        if entry.prev_hash != expected_prev {
            return broken(entries.len(), entry, "previous hash does not match chain head");
        }
        if entry.compute_hash() != entry.current_hash {
            return broken(entries.len(), entry, "stored hash does not match entry contents");
        }
        expected_prev = entry.current_hash.clone();
    }
    ChainVerification {
        total_entries: entries.len(),
        valid: true,
        first_broken_id: None,
        reason: None,
    }
}

fn broken(total: usize, entry: &AuditEntry, reason: &str) -> ChainVerification {
    ChainVerification {
        total_entries: total,
        valid: false,
        first_broken_id: Some(entry.id.clone()),
        reason: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_entry(resource: &str) -> NewAuditEntry {
        NewAuditEntry {
            user_id: Some("user-1".into()),
            employee_id: None,
            client_id: None,
            action: AuditAction::Update,
            resource_type: resource.into(),
            resource_id: Some("abc".into()),
            old_value: None,
            new_value: Some(serde_json::json!({"priority": "high"})),
            ip_address: Some("10.0.0.1".into()),
            user_agent: None,
            request_id: Some("req-1".into()),
            status: AuditStatus::Success,
            failure_reason: None,
        }
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, secs).unwrap()
    }

    fn chain(n: u32) -> Vec<AuditEntry> {
        let mut prev = GENESIS.to_string();
        let mut out = Vec::new();
        for i in 0..n {
            let e = AuditEntry::seal(new_entry("client"), format!("id-{i}"), &prev, at(i));
            prev = e.current_hash.clone();
            out.push(e);
        }
        out
    }

    #[test]
    fn canonical_string_layout() {
        let e = AuditEntry::seal(new_entry("client"), "id-0".into(), GENESIS, at(0));
        assert_eq!(
            e.canonical_string(),
            "id-0|user-1|<nil>|update|client|abc|<nil>|{\"priority\":\"high\"}|10.0.0.1|<nil>|req-1|success|<nil>|GENESIS|2024-05-01T10:00:00.000000000Z"
        );
        assert_eq!(e.current_hash, sha256_hex(e.canonical_string()));
    }

    #[test]
    fn first_entry_links_to_genesis() {
        let entries = chain(1);
        assert_eq!(entries[0].prev_hash, GENESIS);
        assert!(verify_chain(&entries).valid);
    }

    #[test]
    fn intact_chain_verifies() {
        let entries = chain(5);
        for pair in entries.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].current_hash);
        }
        let result = verify_chain(&entries);
        assert!(result.valid);
        assert_eq!(result.total_entries, 5);
    }

    #[test]
    fn edited_row_is_detected() {
        let mut entries = chain(4);
        entries[2].resource_type = "incident".into();
        let result = verify_chain(&entries);
        assert!(!result.valid);
        assert_eq!(result.first_broken_id.as_deref(), Some("id-2"));
    }

    #[test]
    fn missing_row_is_detected() {
        let mut entries = chain(4);
        entries.remove(1);
        let result = verify_chain(&entries);
        assert!(!result.valid);
        assert_eq!(result.first_broken_id.as_deref(), Some("id-2"));
    }

    #[test]
    fn seal_truncates_to_microseconds() {
        let ts = at(0) + chrono::Duration::nanoseconds(123_456_789);
        let e = AuditEntry::seal(new_entry("client"), "x".into(), GENESIS, ts);
        assert_eq!(e.created_at.timestamp_subsec_nanos(), 123_456_000);
    }
}
