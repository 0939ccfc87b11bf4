//! Policy Evaluator — interface only (spec §4.4).
//!
//! The regex/DSL matching itself is an explicit Non-goal; this module
//! only fixes the boundary a real evaluator is expected to honor: the
//! shape of its input and result, and how that result feeds the audit
//! pipeline and decision chain tracker. Where the teacher's `policy.rs`
//! defines a YAML rule DSL, this is deliberately thin — "nothing in
//! this core depends on how the evaluator decides blocking."

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditPipeline, Details, EntryType, Severity};
use crate::decision_chain::{DecisionChainTracker, DecisionOutcome, DecisionType};
use crate::error::CoreResult;

#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheck {
    pub policy_id: String,
    pub policy_type: String,
    pub passed: bool,
}

/// What a single evaluation produced. Nothing here encodes how the
/// decision was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub blocked: bool,
    pub reason: String,
    pub triggered_policy_ids: Vec<String>,
    pub severity: Severity,
    pub checks_performed: Vec<PolicyCheck>,
    pub processing_time_ms: i64,
}

#[async_trait::async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, ctx: &UserContext, query: &str, request_type: &str) -> EvaluationResult;
}

/// Always-allow reference implementation; exists so the wiring in
/// `bin/server.rs` has something concrete to construct when no
/// evaluator is configured, not as a policy of its own.
pub struct AllowAllEvaluator;

#[async_trait::async_trait]
impl PolicyEvaluator for AllowAllEvaluator {
    async fn evaluate(&self, _ctx: &UserContext, _query: &str, _request_type: &str) -> EvaluationResult {
        EvaluationResult {
            blocked: false,
            reason: String::new(),
            triggered_policy_ids: Vec::new(),
            severity: Severity::Low,
            checks_performed: Vec::new(),
            processing_time_ms: 0,
        }
    }
}

/// Feeds one evaluation's outcome into the audit pipeline and decision
/// chain tracker, per spec §4.4: a violation log on block, a metric
/// entry per triggered policy on every evaluation, and one decision
/// record regardless of outcome.
#[allow(clippy::too_many_arguments)]
pub async fn record_evaluation(
    pipeline: &AuditPipeline,
    tracker: &DecisionChainTracker,
    chain_id: &str,
    request_id: &str,
    org_id: &str,
    tenant_id: &str,
    client_id: &str,
    step_number: i64,
    query: &str,
    result: &EvaluationResult,
) -> CoreResult<()> {
    if result.blocked {
        for policy_id in &result.triggered_policy_ids {
            let details = Details::new()
                .insert_str("policy_id", policy_id)
                .insert_str("policy_name", policy_id)
                .insert_str("description", &result.reason)
                .insert_str("query", query);
            let entry = AuditEntry::new(EntryType::Violation, result.severity, client_id, "")
                .with_details(details);
            pipeline.log_violation(entry).await?;
        }
    }

    for policy_id in &result.triggered_policy_ids {
        let policy_type = result
            .checks_performed
            .iter()
            .find(|c| &c.policy_id == policy_id)
            .map(|c| c.policy_type.as_str())
            .unwrap_or("unknown");
        let details = Details::new()
            .insert_str("policy_id", policy_id)
            .insert_str("policy_type", policy_type)
            .insert_bool("blocked", result.blocked);
        let entry = AuditEntry::new(EntryType::Metric, result.severity, client_id, "").with_details(details);
        pipeline.log_metric(entry).await?;
    }

    let decision_type = DecisionType::PolicyEnforcement;
    let outcome = if result.blocked {
        DecisionOutcome::Blocked
    } else {
        DecisionOutcome::Approved
    };

    let mut decision = crate::decision_chain::DecisionEntry::new(
        chain_id,
        request_id,
        org_id,
        tenant_id,
        step_number,
        decision_type,
        outcome,
    );
    decision.client_id = Some(client_id.to_string());
    decision.policies_evaluated = result.triggered_policy_ids.clone();
    decision.policy_triggered = if result.blocked {
        result.triggered_policy_ids.last().cloned()
    } else {
        None
    };
    decision.processing_time_ms = result.processing_time_ms;
    decision.created_at = Utc::now();

    tracker.record_decision(decision).await?;
    Ok(())
}
