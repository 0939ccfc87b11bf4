//! `DecisionEntry` and its classification enums (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    PolicyEnforcement,
    LlmGeneration,
    DataRetrieval,
    HumanReview,
    SystemAction,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyEnforcement => "policy_enforcement",
            Self::LlmGeneration => "llm_generation",
            Self::DataRetrieval => "data_retrieval",
            Self::HumanReview => "human_review",
            Self::SystemAction => "system_action",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "policy_enforcement" => Some(Self::PolicyEnforcement),
            "llm_generation" => Some(Self::LlmGeneration),
            "data_retrieval" => Some(Self::DataRetrieval),
            "human_review" => Some(Self::HumanReview),
            "system_action" => Some(Self::SystemAction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    Blocked,
    Modified,
    PendingReview,
    Error,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Blocked => "blocked",
            Self::Modified => "modified",
            Self::PendingReview => "pending_review",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "blocked" => Some(Self::Blocked),
            "modified" => Some(Self::Modified),
            "pending_review" => Some(Self::PendingReview),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Ordered `minimal < limited < high < unacceptable` per spec §3, which
/// `Ord`'s derive gives for free from declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Limited,
    High,
    Unacceptable,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Limited => "limited",
            Self::High => "high",
            Self::Unacceptable => "unacceptable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minimal" => Some(Self::Minimal),
            "limited" => Some(Self::Limited),
            "high" => Some(Self::High),
            "unacceptable" => Some(Self::Unacceptable),
            _ => None,
        }
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Limited
    }
}

/// Immutable once recorded. See spec §3 for field semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub id: Uuid,
    pub chain_id: String,
    pub request_id: String,
    pub parent_request_id: Option<String>,
    pub step_number: i64,

    pub org_id: String,
    pub tenant_id: String,
    pub client_id: Option<String>,
    pub user_id: Option<String>,

    pub decision_type: DecisionType,
    pub outcome: DecisionOutcome,
    pub risk_level: RiskLevel,

    pub model_provider: Option<String>,
    pub model_id: Option<String>,

    pub policies_evaluated: Vec<String>,
    pub policy_triggered: Option<String>,

    pub processing_time_ms: i64,

    pub input_hash: Option<String>,
    pub output_hash: Option<String>,
    pub audit_hash: String,

    pub data_sources: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,

    pub system_id: String,
    pub requires_human_review: bool,

    pub created_at: DateTime<Utc>,
}

impl DecisionEntry {
    /// A new entry with required identification/classification fields
    /// set and every other field at its spec-mandated default, ready
    /// for `DecisionChainTracker::record_decision` to fill in id,
    /// created_at, system_id, risk_level, and audit_hash if still
    /// unset.
    pub fn new(
        chain_id: impl Into<String>,
        request_id: impl Into<String>,
        org_id: impl Into<String>,
        tenant_id: impl Into<String>,
        step_number: i64,
        decision_type: DecisionType,
        outcome: DecisionOutcome,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            chain_id: chain_id.into(),
            request_id: request_id.into(),
            parent_request_id: None,
            step_number,
            org_id: org_id.into(),
            tenant_id: tenant_id.into(),
            client_id: None,
            user_id: None,
            decision_type,
            outcome,
            risk_level: RiskLevel::default(),
            model_provider: None,
            model_id: None,
            policies_evaluated: Vec::new(),
            policy_triggered: None,
            processing_time_ms: 0,
            input_hash: None,
            output_hash: None,
            audit_hash: String::new(),
            data_sources: Vec::new(),
            metadata: HashMap::new(),
            system_id: String::new(),
            requires_human_review: false,
            created_at: Utc::now(),
        }
    }
}
