//! Prometheus text-format export for the three core subsystems.
//!
//! SPEC_FULL §C.2 supplement: the spec exposes statistics only as
//! structured snapshots (`PipelineStats`, `TrackerStats`, `RegistryStats`);
//! this module renders the same atomics the teacher's `MetricsCollector`
//! pattern favors into the exposition format a Prometheus scrape expects,
//! without introducing a metrics-client dependency neither this crate nor
//! the original source used.

use std::fmt::Write as _;

use crate::audit::PipelineStats;
use crate::decision_chain::TrackerStats;
use crate::registry::RegistryStats;

pub struct Snapshot<'a> {
    pub pipeline: &'a PipelineStats,
    pub tracker: &'a TrackerStats,
    pub registry: &'a RegistryStats,
    pub registry_count: usize,
}

/// Renders a `Snapshot` as Prometheus exposition text. Gauges for point
/// values, counters for monotonic ones; names are prefixed `axonflow_`
/// to namespace against whatever else shares the scrape target.
pub fn render_prometheus(snapshot: &Snapshot<'_>) -> String {
    let mut out = String::new();

    write_metric(&mut out, "axonflow_audit_queued_total", "counter", snapshot.pipeline.queued);
    write_metric(&mut out, "axonflow_audit_processed_total", "counter", snapshot.pipeline.processed);
    write_metric(&mut out, "axonflow_audit_failed_total", "counter", snapshot.pipeline.failed);
    write_metric(&mut out, "axonflow_audit_pending", "gauge", snapshot.pipeline.pending);

    write_metric(&mut out, "axonflow_decisions_recorded_total", "counter", snapshot.tracker.decisions_recorded);
    write_metric(&mut out, "axonflow_chains_created_total", "counter", snapshot.tracker.chains_created);
    write_metric(&mut out, "axonflow_decision_record_errors_total", "counter", snapshot.tracker.record_errors);
    write_metric(&mut out, "axonflow_decision_async_pending", "gauge", snapshot.tracker.async_pending);

    write_metric(&mut out, "axonflow_connector_hits_total", "counter", snapshot.registry.hits);
    write_metric(&mut out, "axonflow_connector_misses_total", "counter", snapshot.registry.misses);
    write_metric(&mut out, "axonflow_connector_evictions_total", "counter", snapshot.registry.evictions);
    write_metric(&mut out, "axonflow_connector_factory_creations_total", "counter", snapshot.registry.factory_creations);
    write_metric(&mut out, "axonflow_connector_factory_failures_total", "counter", snapshot.registry.factory_failures);
    write_metric(&mut out, "axonflow_connector_connection_errors_total", "counter", snapshot.registry.connection_errors);
    write_metric(&mut out, "axonflow_connector_cache_size", "gauge", snapshot.registry_count as u64);

    out
}

fn write_metric(out: &mut String, name: &str, metric_type: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} {metric_type}");
    let _ = writeln!(out, "{name} {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_three_subsystems() {
        let pipeline = PipelineStats {
            mode: "compliance",
            queued: 1,
            processed: 2,
            failed: 0,
            pending: 0,
        };
        let tracker = TrackerStats {
            decisions_recorded: 5,
            chains_created: 1,
            record_errors: 0,
            async_pending: 0,
            memory_mode: true,
            memory_chains: 1,
        };
        let registry = RegistryStats {
            hits: 9,
            misses: 1,
            evictions: 0,
            factory_creations: 1,
            factory_failures: 0,
            connection_errors: 0,
            last_eviction: None,
            last_factory_create: None,
            count: 1,
            hit_rate: 90.0,
        };

        let rendered = render_prometheus(&Snapshot {
            pipeline: &pipeline,
            tracker: &tracker,
            registry: &registry,
            registry_count: 1,
        });

        assert!(rendered.contains("axonflow_audit_processed_total 2"));
        assert!(rendered.contains("axonflow_decisions_recorded_total 5"));
        assert!(rendered.contains("axonflow_connector_hits_total 9"));
    }
}
