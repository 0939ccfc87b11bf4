//! Durable Audit Pipeline (spec §4.1).

mod batcher;
mod entry;
mod fallback;
mod pipeline;

pub use entry::{AuditEntry, DetailValue, Details, EntryType, Severity};
pub use fallback::Fallback;
pub use pipeline::{severity_from_str, AuditPipeline, PipelineStats};
