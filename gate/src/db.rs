//! Shared database handle.
//!
//! One `sqlx::PgPool` shared by the audit pipeline, the decision chain
//! tracker, and (indirectly, via the config provider) the registry.
//! Connection pooling and thread-safety are sqlx's job; this module
//! only adds the retry contract spec §4.1/§7 require on top.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::audit::{AuditEntry, DetailValue, EntryType};
use crate::decision_chain::{DecisionEntry, DecisionOutcome, DecisionType, RiskLevel};
use crate::error::{CoreError, CoreResult};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Retries a fallible database statement with exponential backoff
    /// 100/200/400ms, per spec §4.1 "Failure semantics". This is the
    /// single retry layer the spec's Open Questions section recommends
    /// collapsing to, rather than stacking a second layer in the
    /// pipeline worker on top of this one.
    pub async fn with_retry<F, Fut, T>(op_name: &str, f: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        Self::with_retry_counted(op_name, f).await.0
    }

    /// Like `with_retry`, but also returns the number of failed attempts
    /// made before success or exhaustion, so callers writing an
    /// `AuditEntry` can fold that count into `entry.retries` (spec line
    /// 66: "on each retry increment the entry's retry counter").
    async fn with_retry_counted<F, Fut, T>(op_name: &str, mut f: F) -> (CoreResult<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let delays = [
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ];
        let mut last_err = None;
        let mut failed_attempts = 0u32;
        for (attempt, delay) in delays.iter().enumerate() {
            match f().await {
                Ok(v) => return (Ok(v), failed_attempts),
                Err(e) => {
                    warn!(op = op_name, attempt = attempt + 1, error = %e, "database write failed, retrying");
                    failed_attempts += 1;
                    last_err = Some(e);
                    tokio::time::sleep(*delay).await;
                }
            }
        }
        (Err(CoreError::Database(last_err.unwrap())), failed_attempts)
    }

    /// Writes an `AuditEntry` to the table bound to its `type`, per
    /// spec §4.1's routing table. Fails with `UnknownEntryType` for any
    /// type not in the table, rather than silently dropping it.
    ///
    /// `entry` is `&mut` because each write attempt that fails
    /// increments `entry.retries` before the final error (if any) is
    /// returned to the caller.
    pub async fn write_audit_entry(&self, entry: &mut AuditEntry) -> CoreResult<()> {
        match entry.entry_type {
            EntryType::Violation => self.write_violation(entry).await,
            EntryType::Audit => self.write_audit_log(entry).await,
            EntryType::GatewayContext => self.write_gateway_context(entry).await,
            EntryType::LlmCallAudit => self.write_llm_call_audit(entry).await,
            EntryType::Metric => {
                // Metrics have no synchronous destination; the batcher
                // owns `policy_metrics` upserts.
                Ok(())
            }
        }
    }

    async fn write_violation(&self, entry: &mut AuditEntry) -> CoreResult<()> {
        let policy_name = entry.details.get_str("policy_name").unwrap_or_default();
        let description = entry.details.get_str("description").unwrap_or_default();
        let details_json = serde_json::to_value(&entry.details.0)?;
        let severity = entry.severity.as_str();
        let client_id = entry.client_id.clone();
        let user_id = entry.user_id.clone();

        let (result, failed_attempts) = Database::with_retry_counted("write_violation", || {
            sqlx::query(
                "INSERT INTO policy_violations (violation_type, severity, client_id, user_id, description, details) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&policy_name)
            .bind(severity)
            .bind(&client_id)
            .bind(&user_id)
            .bind(&description)
            .bind(&details_json)
            .execute(&self.pool)
        })
        .await;
        entry.retries += failed_attempts;
        result?;
        Ok(())
    }

    async fn write_audit_log(&self, entry: &mut AuditEntry) -> CoreResult<()> {
        let action = entry.details.get_str("action").unwrap_or_default();
        let resource = entry.details.get_str("resource").unwrap_or_default();
        let client_id = entry.client_id.clone();
        let timestamp = entry.timestamp;

        let (result, failed_attempts) = Database::with_retry_counted("write_audit_log", || {
            sqlx::query(
                "INSERT INTO agent_audit_logs (client_id, action, resource, timestamp) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&client_id)
            .bind(&action)
            .bind(&resource)
            .bind(timestamp)
            .execute(&self.pool)
        })
        .await;
        entry.retries += failed_attempts;
        result?;
        Ok(())
    }

    async fn write_gateway_context(&self, entry: &mut AuditEntry) -> CoreResult<()> {
        let context_id = entry.details.get_str("context_id").unwrap_or_default();
        let user_token_hash = entry.details.get_str("user_token_hash").unwrap_or_default();
        let query_hash = entry.details.get_str("query_hash").unwrap_or_default();
        let data_sources = entry.details.get_str_seq("data_sources");
        let policies_evaluated = entry.details.get_str_seq("policies_evaluated");
        let approved = entry.details.get_bool("approved").unwrap_or(false);
        let block_reason = entry.details.get_str("block_reason");
        let expires_at = entry.details.get_str("expires_at");
        let client_id = entry.client_id.clone();

        let (result, failed_attempts) = Database::with_retry_counted("write_gateway_context", || {
            sqlx::query(
                "INSERT INTO gateway_contexts \
                 (context_id, client_id, user_token_hash, query_hash, data_sources, policies_evaluated, approved, block_reason, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&context_id)
            .bind(&client_id)
            .bind(&user_token_hash)
            .bind(&query_hash)
            .bind(&data_sources)
            .bind(&policies_evaluated)
            .bind(approved)
            .bind(&block_reason)
            .bind(&expires_at)
            .execute(&self.pool)
        })
        .await;
        entry.retries += failed_attempts;
        result?;
        Ok(())
    }

    async fn write_llm_call_audit(&self, entry: &mut AuditEntry) -> CoreResult<()> {
        let audit_id = entry.details.get_str("audit_id").unwrap_or_default();
        let context_id = entry.details.get_str("context_id").unwrap_or_default();
        let provider = entry.details.get_str("provider").unwrap_or_default();
        let model = entry.details.get_str("model").unwrap_or_default();
        let prompt_tokens = entry.details.get_num("prompt_tokens").unwrap_or(0.0) as i64;
        let completion_tokens = entry.details.get_num("completion_tokens").unwrap_or(0.0) as i64;
        let total_tokens = entry.details.get_num("total_tokens").unwrap_or(0.0) as i64;
        let latency_ms = entry.details.get_num("latency_ms").unwrap_or(0.0) as i64;
        let estimated_cost_usd = entry.details.get_num("estimated_cost_usd").unwrap_or(0.0);
        let metadata = match entry.details.0.get("metadata") {
            Some(DetailValue::Map(m)) => serde_json::to_value(m)?,
            _ => serde_json::Value::Null,
        };
        let client_id = entry.client_id.clone();

        let (result, failed_attempts) = Database::with_retry_counted("write_llm_call_audit", || {
            sqlx::query(
                "INSERT INTO llm_call_audits \
                 (audit_id, context_id, client_id, provider, model, prompt_tokens, completion_tokens, total_tokens, latency_ms, estimated_cost_usd, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(&audit_id)
            .bind(&context_id)
            .bind(&client_id)
            .bind(&provider)
            .bind(&model)
            .bind(prompt_tokens)
            .bind(completion_tokens)
            .bind(total_tokens)
            .bind(latency_ms)
            .bind(estimated_cost_usd)
            .bind(&metadata)
            .execute(&self.pool)
        })
        .await;
        entry.retries += failed_attempts;
        result?;
        Ok(())
    }

    /// Upserts one `policy_metrics` row for `(policy_id, today)`,
    /// incrementing `hit_count` always and `block_count` when blocked.
    pub async fn upsert_policy_metric(&self, policy_id: &str, policy_type: &str, blocked: bool) -> CoreResult<()> {
        let block_increment = if blocked { 1 } else { 0 };
        Database::with_retry("upsert_policy_metric", || {
            sqlx::query(
                "INSERT INTO policy_metrics (policy_id, policy_type, hit_count, block_count, date) \
                 VALUES ($1, $2, 1, $3, CURRENT_DATE) \
                 ON CONFLICT (policy_id, date) DO UPDATE SET \
                   policy_type = EXCLUDED.policy_type, \
                   hit_count = policy_metrics.hit_count + 1, \
                   block_count = policy_metrics.block_count + EXCLUDED.block_count",
            )
            .bind(policy_id)
            .bind(policy_type)
            .bind(block_increment)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn insert_decision(&self, entry: &DecisionEntry) -> CoreResult<()> {
        let metadata = serde_json::to_value(&entry.metadata)?;
        Database::with_retry("insert_decision", || {
            sqlx::query(
                "INSERT INTO decision_chain \
                 (id, chain_id, request_id, parent_request_id, step_number, org_id, tenant_id, client_id, user_id, \
                  decision_type, decision_outcome, system_id, model_provider, model_id, policies_evaluated, \
                  policy_triggered, risk_level, requires_human_review, processing_time_ms, input_hash, output_hash, \
                  audit_hash, data_sources, metadata, created_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25)",
            )
            .bind(entry.id)
            .bind(&entry.chain_id)
            .bind(&entry.request_id)
            .bind(&entry.parent_request_id)
            .bind(entry.step_number)
            .bind(&entry.org_id)
            .bind(&entry.tenant_id)
            .bind(&entry.client_id)
            .bind(&entry.user_id)
            .bind(entry.decision_type.as_str())
            .bind(entry.outcome.as_str())
            .bind(&entry.system_id)
            .bind(&entry.model_provider)
            .bind(&entry.model_id)
            .bind(&entry.policies_evaluated)
            .bind(&entry.policy_triggered)
            .bind(entry.risk_level.as_str())
            .bind(entry.requires_human_review)
            .bind(entry.processing_time_ms)
            .bind(&entry.input_hash)
            .bind(&entry.output_hash)
            .bind(&entry.audit_hash)
            .bind(&entry.data_sources)
            .bind(&metadata)
            .bind(entry.created_at)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    /// All entries for one chain, ascending by `step_number`, per spec §4.2.
    pub async fn fetch_chain(&self, chain_id: &str) -> CoreResult<Vec<DecisionEntry>> {
        let rows = Database::with_retry("fetch_chain", || {
            sqlx::query("SELECT * FROM decision_chain WHERE chain_id = $1 ORDER BY step_number ASC")
                .bind(chain_id)
                .fetch_all(&self.pool)
        })
        .await?;
        rows.iter().map(decode_decision_row).collect()
    }

    /// Chain ids touched within `[since, now]` for `(org_id, tenant_id)`,
    /// most-recently-active first, capped at `limit`.
    pub async fn fetch_recent_chain_ids(
        &self,
        org_id: &str,
        tenant_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<String>> {
        let rows = Database::with_retry("fetch_recent_chain_ids", || {
            sqlx::query(
                "SELECT chain_id, MAX(created_at) AS last_activity FROM decision_chain \
                 WHERE org_id = $1 AND tenant_id = $2 AND created_at >= $3 \
                 GROUP BY chain_id ORDER BY last_activity DESC LIMIT $4",
            )
            .bind(org_id)
            .bind(tenant_id)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
        })
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("chain_id").map_err(CoreError::from))
            .collect()
    }
}

fn decode_decision_row(row: &sqlx::postgres::PgRow) -> CoreResult<DecisionEntry> {
    let decision_type_str: String = row.try_get("decision_type")?;
    let outcome_str: String = row.try_get("decision_outcome")?;
    let risk_str: String = row.try_get("risk_level")?;
    let metadata_json: serde_json::Value = row.try_get("metadata")?;
    let metadata = match metadata_json {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    };

    Ok(DecisionEntry {
        id: row.try_get("id")?,
        chain_id: row.try_get("chain_id")?,
        request_id: row.try_get("request_id")?,
        parent_request_id: row.try_get("parent_request_id")?,
        step_number: row.try_get("step_number")?,
        org_id: row.try_get("org_id")?,
        tenant_id: row.try_get("tenant_id")?,
        client_id: row.try_get("client_id")?,
        user_id: row.try_get("user_id")?,
        decision_type: DecisionType::parse(&decision_type_str)
            .ok_or_else(|| CoreError::Validation(format!("unknown decision_type in row: {decision_type_str}")))?,
        outcome: DecisionOutcome::parse(&outcome_str)
            .ok_or_else(|| CoreError::Validation(format!("unknown decision_outcome in row: {outcome_str}")))?,
        risk_level: RiskLevel::parse(&risk_str).unwrap_or_default(),
        model_provider: row.try_get("model_provider")?,
        model_id: row.try_get("model_id")?,
        policies_evaluated: row.try_get("policies_evaluated")?,
        policy_triggered: row.try_get("policy_triggered")?,
        processing_time_ms: row.try_get("processing_time_ms")?,
        input_hash: row.try_get("input_hash")?,
        output_hash: row.try_get("output_hash")?,
        audit_hash: row.try_get("audit_hash")?,
        data_sources: row.try_get("data_sources")?,
        metadata,
        system_id: row.try_get("system_id")?,
        requires_human_review: row.try_get("requires_human_review")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_retry_counted_reports_failed_attempts_before_success() {
        let mut attempts = 0u32;
        let (result, failed_attempts) = Database::with_retry_counted("probe", || {
            attempts += 1;
            let this_attempt = attempts;
            async move {
                if this_attempt < 3 {
                    Err(sqlx::Error::RowNotFound)
                } else {
                    Ok::<(), sqlx::Error>(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(failed_attempts, 2);
    }

    #[tokio::test]
    async fn with_retry_counted_reports_three_failures_on_exhaustion() {
        let (result, failed_attempts) = Database::with_retry_counted("probe", || async { Err::<(), _>(sqlx::Error::RowNotFound) }).await;

        assert!(result.is_err());
        assert_eq!(failed_attempts, 3);
    }
}
