//! ==============================================================================
//! query.rs - read-only views over the device store
//! ==============================================================================
//!
//! relationships:
//!     - uses: store.rs (with_device)
//!     - used by: server.rs (GET /latest_timestamp, GET /cumulative_count)
//!
//! ==============================================================================

use std::sync::Arc;

use crate::domain::Reading;
use crate::error::QueryError;
use crate::store::DeviceStore;
use crate::time_codec::Timestamp;

#[derive(Clone)]
pub struct QueryService {
    store: Arc<DeviceStore>,
}

impl QueryService {
    pub fn new(store: Arc<DeviceStore>) -> Self {
        Self { store }
    }

    pub async fn latest_reading(&self, device_id: &str) -> Result<Reading, QueryError> {
        self.store
            .with_device(device_id, |agg| agg.latest())
            .await
            .flatten()
            .ok_or_else(|| QueryError::DeviceNotFound(device_id.to_string()))
    }

    pub async fn latest_timestamp(&self, device_id: &str) -> Result<Timestamp, QueryError> {
        self.latest_reading(device_id).await.map(|r| r.timestamp)
    }

    pub async fn cumulative_count(&self, device_id: &str) -> Result<i128, QueryError> {
        self.store
            .with_device(device_id, |agg| agg.total_count())
            .await
            .ok_or_else(|| QueryError::DeviceNotFound(device_id.to_string()))
    }
}
