//! `AuditEntry` and the dynamically-typed detail map.
//!
//! Per spec §9 "Dynamic detail mapping": entries carry a tagged variant
//! of the supported value shapes because table-column mapping is
//! type-dependent. Grounded in the teacher's `serde_json::Value`-backed
//! `VerificationContext.data` map (`types.rs`), but given an explicit
//! enum instead of raw `Value` so ingress validation (§7) has something
//! concrete to match on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Violation,
    Metric,
    Audit,
    GatewayContext,
    LlmCallAudit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Violation => "violation",
            Self::Metric => "metric",
            Self::Audit => "audit",
            Self::GatewayContext => "gateway_context",
            Self::LlmCallAudit => "llm_call_audit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

/// A single value in an entry's detail map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetailValue {
    Str(String),
    Num(f64),
    Bool(bool),
    StrSeq(Vec<String>),
    Map(HashMap<String, DetailValue>),
}

/// Free-form detail mapping from string keys to dynamically-typed
/// values, per spec §3.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Details(pub HashMap<String, DetailValue>);

impl Details {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert_str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), DetailValue::Str(value.into()));
        self
    }

    pub fn insert_num(mut self, key: &str, value: f64) -> Self {
        self.0.insert(key.to_string(), DetailValue::Num(value));
        self
    }

    pub fn insert_bool(mut self, key: &str, value: bool) -> Self {
        self.0.insert(key.to_string(), DetailValue::Bool(value));
        self
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key) {
            Some(DetailValue::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn get_num(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(DetailValue::Num(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(DetailValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_str_seq(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(DetailValue::StrSeq(v)) => v.clone(),
            _ => Vec::new(),
        }
    }
}

/// A structured log record. `retries` is excluded from serialization
/// (per spec §6, the fallback file format drops it) since it is
/// mutated only in-process by the worker loop and has no meaning once
/// replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub user_id: String,
    pub client_id: String,
    pub details: Details,
    #[serde(skip)]
    pub retries: u32,
}

impl AuditEntry {
    pub fn new(entry_type: EntryType, severity: Severity, client_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            entry_type,
            timestamp: Utc::now(),
            severity,
            user_id: user_id.into(),
            client_id: client_id.into(),
            details: Details::new(),
            retries: 0,
        }
    }

    pub fn with_details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_excluded_from_serialization() {
        let mut entry = AuditEntry::new(EntryType::Violation, Severity::High, "c1", "u1");
        entry.retries = 3;
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("retries"));
    }

    #[test]
    fn round_trip_preserves_non_retry_fields() {
        let entry = AuditEntry::new(EntryType::GatewayContext, Severity::Medium, "c2", "u2")
            .with_details(Details::new().insert_str("context_id", "ctx-1"));
        let json = serde_json::to_string(&entry).unwrap();
        let decoded: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.client_id, entry.client_id);
        assert_eq!(decoded.user_id, entry.user_id);
        assert_eq!(decoded.entry_type, entry.entry_type);
        assert_eq!(decoded.details, entry.details);
        assert_eq!(decoded.retries, 0);
    }
}
