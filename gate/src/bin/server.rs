//! axonflow-gate admin server.
//!
//! Wires the three core subsystems to a Postgres handle and exposes the
//! registry admin HTTP surface (spec §6) plus a Prometheus scrape
//! target. Connector implementations are supplied by the deploying
//! application, not this crate (spec §1: "connector protocols ... the
//! registry treats them as opaque `Connector` values") — the factory
//! wired here is a placeholder that fails every construction until a
//! real one is substituted.

use std::sync::Arc;
use std::time::Duration;

use axonflow_gate::audit::AuditPipeline;
use axonflow_gate::config::Config;
use axonflow_gate::db::Database;
use axonflow_gate::decision_chain::{DecisionChainTracker, TrackerConfig};
use axonflow_gate::error::{CoreError, CoreResult};
use axonflow_gate::http::{router, AppState};
use axonflow_gate::registry::{Connector, ConnectorConfig, ConnectorFactory, ConnectorType, StaticConnectorConfigProvider, TenantConnectorRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct UnconfiguredConnectorFactory;

impl ConnectorFactory for UnconfiguredConnectorFactory {
    fn create(&self, connector_type: ConnectorType, _config: &ConnectorConfig) -> CoreResult<Box<dyn Connector>> {
        Err(CoreError::FactoryFailed(format!(
            "no connector implementation registered for {}; the deploying application must supply one",
            connector_type.as_str()
        )))
    }
}

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let db = Database::connect(&config.database.url).await?;

    let pipeline = AuditPipeline::new(config.audit.clone(), db.clone())?;
    let recovered = pipeline.recover_from_fallback().await?;
    tracing::info!(recovered, "fallback replay complete at startup");

    let tracker = DecisionChainTracker::new(TrackerConfig::default(), Some(db.clone()));

    let registry = TenantConnectorRegistry::new(
        config.registry,
        Arc::new(StaticConnectorConfigProvider::new()),
        Arc::new(UnconfiguredConnectorFactory),
        None,
    );
    registry.start_periodic_cleanup(CLEANUP_INTERVAL);

    let state = Arc::new(AppState {
        registry: Some(registry.clone()),
        pipeline: Some(pipeline.clone()),
        tracker: Some(tracker.clone()),
    });

    let app = router(state);
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "axonflow-gate admin server listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("shutting down core subsystems");
    if let Err(e) = pipeline.shutdown(SHUTDOWN_TIMEOUT).await {
        tracing::error!(error = %e, "audit pipeline shutdown did not complete cleanly");
    }
    if let Err(e) = tracker.shutdown(SHUTDOWN_TIMEOUT).await {
        tracing::error!(error = %e, "decision chain tracker shutdown did not complete cleanly");
    }
    registry.disconnect_all().await;

    Ok(())
}
