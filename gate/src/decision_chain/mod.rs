//! Decision Chain Tracker (spec §4.2).

mod entry;
mod hash;
mod summary;
mod tracker;

pub use entry::{DecisionEntry, DecisionOutcome, DecisionType, RiskLevel};
pub use hash::compute_audit_hash;
pub use summary::ChainSummary;
pub use tracker::{DecisionChainTracker, TrackerConfig, TrackerStats, TransparencyInfo};
