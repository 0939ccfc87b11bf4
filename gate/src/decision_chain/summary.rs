//! `ChainSummary` — derived aggregate per chain (spec §3).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::entry::{DecisionEntry, DecisionType, RiskLevel};

#[derive(Debug, Clone, Serialize)]
pub struct ChainSummary {
    pub chain_id: String,
    pub total_steps: usize,
    pub total_processing_ms: i64,
    pub has_blocked: bool,
    pub requires_review: bool,
    pub highest_risk_level: RiskLevel,
    pub first_decision_at: DateTime<Utc>,
    pub last_decision_at: DateTime<Utc>,
    pub decision_types: Vec<DecisionType>,
    pub total_policies_applied: usize,
}

impl ChainSummary {
    /// `entries` must already be ordered by ascending step number and
    /// non-empty; callers (the tracker) guarantee both.
    pub fn from_entries(chain_id: &str, entries: &[DecisionEntry]) -> Self {
        let total_steps = entries.len();
        let total_processing_ms = entries.iter().map(|e| e.processing_time_ms).sum();
        let has_blocked = entries
            .iter()
            .any(|e| e.outcome == super::entry::DecisionOutcome::Blocked);
        let requires_review = entries.iter().any(|e| e.requires_human_review);
        let highest_risk_level = entries
            .iter()
            .map(|e| e.risk_level)
            .max()
            .unwrap_or_default();

        let first_decision_at = entries.iter().map(|e| e.created_at).min().unwrap_or_else(Utc::now);
        let last_decision_at = entries.iter().map(|e| e.created_at).max().unwrap_or_else(Utc::now);

        let mut types_seen = HashSet::new();
        let mut decision_types = Vec::new();
        for e in entries {
            if types_seen.insert(e.decision_type) {
                decision_types.push(e.decision_type);
            }
        }

        let mut policies: HashSet<&str> = HashSet::new();
        for e in entries {
            for p in &e.policies_evaluated {
                policies.insert(p.as_str());
            }
        }

        Self {
            chain_id: chain_id.to_string(),
            total_steps,
            total_processing_ms,
            has_blocked,
            requires_review,
            highest_risk_level,
            first_decision_at,
            last_decision_at,
            decision_types,
            total_policies_applied: policies.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_chain::entry::DecisionOutcome;

    fn entry(step: i64, outcome: DecisionOutcome, risk: RiskLevel, ms: i64, policies: &[&str]) -> DecisionEntry {
        let mut e = DecisionEntry::new(
            "chain-x",
            format!("req-{step}"),
            "org",
            "tenant",
            step,
            DecisionType::PolicyEnforcement,
            outcome,
        );
        e.risk_level = risk;
        e.processing_time_ms = ms;
        e.policies_evaluated = policies.iter().map(|s| s.to_string()).collect();
        e
    }

    #[test]
    fn aggregates_match_scenario_in_spec() {
        let entries = vec![
            entry(1, DecisionOutcome::Approved, RiskLevel::Limited, 10, &[]),
            entry(2, DecisionOutcome::Blocked, RiskLevel::High, 25, &["a", "b"]),
            entry(3, DecisionOutcome::Modified, RiskLevel::Limited, 5, &[]),
        ];
        let summary = ChainSummary::from_entries("chain-x", &entries);

        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.total_processing_ms, 40);
        assert!(summary.has_blocked);
        assert!(!summary.requires_review);
        assert_eq!(summary.highest_risk_level, RiskLevel::High);
        assert_eq!(summary.total_policies_applied, 2);
    }
}
