//! Connector types and the `Connector` trait (spec §4.3).
//!
//! Generalizes the teacher's `LegacyConnector` trait (SAP/SWIFT/mainframe
//! protocol bridges) down to the shape this core actually needs: connect,
//! disconnect, health-check. The registry treats a connector as opaque
//! once constructed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// The sixteen connector types spec §4.3 enumerates as acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Postgres,
    Mysql,
    Mongodb,
    Cassandra,
    Redis,
    Http,
    S3,
    AzureBlob,
    Gcs,
    Amadeus,
    Salesforce,
    Slack,
    Snowflake,
    Hubspot,
    Jira,
    Servicenow,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Mongodb => "mongodb",
            Self::Cassandra => "cassandra",
            Self::Redis => "redis",
            Self::Http => "http",
            Self::S3 => "s3",
            Self::AzureBlob => "azure_blob",
            Self::Gcs => "gcs",
            Self::Amadeus => "amadeus",
            Self::Salesforce => "salesforce",
            Self::Slack => "slack",
            Self::Snowflake => "snowflake",
            Self::Hubspot => "hubspot",
            Self::Jira => "jira",
            Self::Servicenow => "servicenow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "postgres" => Some(Self::Postgres),
            "mysql" => Some(Self::Mysql),
            "mongodb" => Some(Self::Mongodb),
            "cassandra" => Some(Self::Cassandra),
            "redis" => Some(Self::Redis),
            "http" => Some(Self::Http),
            "s3" => Some(Self::S3),
            "azure_blob" => Some(Self::AzureBlob),
            "gcs" => Some(Self::Gcs),
            "amadeus" => Some(Self::Amadeus),
            "salesforce" => Some(Self::Salesforce),
            "slack" => Some(Self::Slack),
            "snowflake" => Some(Self::Snowflake),
            "hubspot" => Some(Self::Hubspot),
            "jira" => Some(Self::Jira),
            "servicenow" => Some(Self::Servicenow),
            _ => None,
        }
    }
}

/// Tenant-scoped connection configuration resolved by a
/// `ConnectorConfigProvider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub connector_type: String,
    pub endpoint: String,
    pub credentials: HashMap<String, String>,
    pub settings: HashMap<String, serde_json::Value>,
}

/// Live connector instance managed by the registry. `connect` runs once,
/// before the instance is shared; `disconnect` takes `&self` because the
/// registry may evict an entry while other callers still hold an `Arc`
/// clone of it, and those callers must observe the disconnected state
/// rather than race a unique borrow (spec §5, "callers that hold a
/// reference across either event will observe a disconnected connector").
#[async_trait::async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn connect(&mut self) -> CoreResult<()>;
    async fn disconnect(&self) -> CoreResult<()>;
    async fn health_check(&self) -> CoreResult<bool>;
}
