//! One cached `(tenant, connector)` slot.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use super::connector::Connector;

pub struct CacheEntry {
    pub connector: Arc<dyn Connector>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    last_access_millis: AtomicI64,
}

impl CacheEntry {
    pub fn new(connector: Arc<dyn Connector>, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            connector,
            created_at,
            expires_at,
            last_access_millis: AtomicI64::new(created_at.timestamp_millis()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Updates the last-access timestamp under the registry's read lock;
    /// this is the one piece of entry state mutated without a write
    /// lock, hence the atomic rather than a plain field.
    pub fn touch(&self, now: DateTime<Utc>) {
        self.last_access_millis.store(now.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_access_millis.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.created_at)
    }
}
