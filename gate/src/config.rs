//! Environment-driven configuration.
//!
//! Reads the variables listed in spec §6. Nothing here touches a file
//! or a config-management crate — the teacher's gate package has no
//! config layer of its own beyond reading a handful of env vars at the
//! call site, so this follows the same shape, just centralized.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Compliance,
    Performance,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return Self { url };
        }

        let host = std::env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("DATABASE_PORT").unwrap_or_else(|_| "5432".to_string());
        let user = std::env::var("DATABASE_USER").unwrap_or_else(|_| "postgres".to_string());
        let password = std::env::var("DATABASE_PASSWORD").unwrap_or_default();
        let name = std::env::var("DATABASE_NAME").unwrap_or_else(|_| "axonflow".to_string());
        let sslmode = std::env::var("DATABASE_SSLMODE").unwrap_or_else(|_| "require".to_string());

        Self {
            url: format!(
                "postgres://{user}:{password}@{host}:{port}/{name}?sslmode={sslmode}"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub mode: PipelineMode,
    pub violation_queue_capacity: usize,
    pub worker_count: usize,
    pub metrics_queue_capacity: usize,
    pub fallback_path: String,
}

impl AuditConfig {
    pub fn from_env() -> Self {
        let mode = match std::env::var("AGENT_PERFORMANCE_MODE") {
            Ok(v) if v == "true" => PipelineMode::Performance,
            _ => PipelineMode::Compliance,
        };

        let fallback_path = std::env::var("AUDIT_FALLBACK_PATH")
            .unwrap_or_else(|_| "/var/lib/axonflow/audit/audit_fallback.jsonl".to_string());

        Self {
            mode,
            violation_queue_capacity: 10_000,
            worker_count: 4,
            metrics_queue_capacity: 1_000,
            fallback_path,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
        }
    }
}

/// `PII_BLOCK_CRITICAL`: `false` or `0` disables blocking of critical
/// PII classes. Default is enabled. Consumed by the (out-of-scope)
/// policy evaluator; kept here because it is the one behavioral toggle
/// spec §6 names outside the three core subsystems.
pub fn pii_block_critical() -> bool {
    match std::env::var("PII_BLOCK_CRITICAL") {
        Ok(v) => v != "false" && v != "0",
        Err(_) => true,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub audit: AuditConfig,
    pub registry: RegistryConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::from_env(),
            audit: AuditConfig::from_env(),
            registry: RegistryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn performance_mode_requires_exact_true() {
        std::env::set_var("AGENT_PERFORMANCE_MODE", "TRUE");
        assert_eq!(AuditConfig::from_env().mode, PipelineMode::Compliance);
        std::env::set_var("AGENT_PERFORMANCE_MODE", "true");
        assert_eq!(AuditConfig::from_env().mode, PipelineMode::Performance);
        std::env::remove_var("AGENT_PERFORMANCE_MODE");
    }

    #[test]
    fn default_fallback_path() {
        std::env::remove_var("AUDIT_FALLBACK_PATH");
        let cfg = AuditConfig::from_env();
        assert_eq!(cfg.fallback_path, "/var/lib/axonflow/audit/audit_fallback.jsonl");
    }

    #[test]
    fn pii_block_default_enabled() {
        std::env::remove_var("PII_BLOCK_CRITICAL");
        assert!(pii_block_critical());
        std::env::set_var("PII_BLOCK_CRITICAL", "false");
        assert!(!pii_block_critical());
        std::env::set_var("PII_BLOCK_CRITICAL", "0");
        assert!(!pii_block_critical());
        std::env::remove_var("PII_BLOCK_CRITICAL");
    }
}
