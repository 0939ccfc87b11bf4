//! Tamper-evident audit hash (spec §3, §4.2).
//!
//! SHA-256 over a length-prefixed concatenation `len(a):a|len(b):b|...`
//! of the classification fields, in a fixed field order, rendered as
//! lowercase hex. Length-prefixing (`len` = UTF-8 character length of
//! the field) prevents collisions from field-boundary ambiguity — this
//! format is the normative wire and MUST NOT be changed without
//! breaking cross-implementation hash comparability.

use sha2::{Digest, Sha256};

use super::entry::DecisionEntry;

fn length_prefixed(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| format!("{}:{}", f.chars().count(), f))
        .collect::<Vec<_>>()
        .join("|")
}

/// Computes the hash over: chain id, request id, org, tenant, decision
/// type, decision outcome, risk level, requires-human-review flag, and
/// processing time — in that order, per spec §3.
pub fn compute_audit_hash(entry: &DecisionEntry) -> String {
    let requires_review = entry.requires_human_review.to_string();
    let processing_time = entry.processing_time_ms.to_string();

    let fields = [
        entry.chain_id.as_str(),
        entry.request_id.as_str(),
        entry.org_id.as_str(),
        entry.tenant_id.as_str(),
        entry.decision_type.as_str(),
        entry.outcome.as_str(),
        entry.risk_level.as_str(),
        requires_review.as_str(),
        processing_time.as_str(),
    ];

    let payload = length_prefixed(&fields);
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode_lower(&digest)
}

/// Minimal lowercase-hex encoder so we don't pull in a dedicated `hex`
/// crate for nine bytes of formatting.
mod hex {
    pub fn encode_lower(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_chain::entry::{DecisionOutcome, DecisionType};

    fn base_entry() -> DecisionEntry {
        let mut e = DecisionEntry::new(
            "chain-1",
            "req-1",
            "org-1",
            "tenant-1",
            1,
            DecisionType::PolicyEnforcement,
            DecisionOutcome::Approved,
        );
        e.processing_time_ms = 12;
        e
    }

    #[test]
    fn equal_inputs_produce_equal_hashes() {
        let a = base_entry();
        let b = base_entry();
        assert_eq!(compute_audit_hash(&a), compute_audit_hash(&b));
    }

    #[test]
    fn differing_field_changes_hash() {
        let a = base_entry();
        let mut b = base_entry();
        b.processing_time_ms = 13;
        assert_ne!(compute_audit_hash(&a), compute_audit_hash(&b));
    }

    #[test]
    fn hash_is_lowercase_hex_of_expected_length() {
        let hash = compute_audit_hash(&base_entry());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn length_prefixing_prevents_boundary_ambiguity() {
        // "ab"+"c" vs "a"+"bc" would collide under naive concatenation
        // but not once each field carries its own length prefix.
        let joined_short = length_prefixed(&["ab", "c"]);
        let joined_long = length_prefixed(&["a", "bc"]);
        assert_ne!(joined_short, joined_long);
    }
}
