//! Connector-type → fresh, unconnected `Connector` instance (spec §4.3).

use super::connector::{Connector, ConnectorConfig, ConnectorType};
use crate::error::CoreResult;

pub trait ConnectorFactory: Send + Sync {
    fn create(&self, connector_type: ConnectorType, config: &ConnectorConfig) -> CoreResult<Box<dyn Connector>>;
}
