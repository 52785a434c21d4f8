//! ==============================================================================
//! ingest.rs - batch ingestion
//! ==============================================================================
//!
//! purpose:
//!     validates raw readings, merges the good ones into the store and
//!     reports the rest. one bad timestamp never sinks the whole batch.
//!
//! relationships:
//!     - uses: time_codec.rs (parse), store.rs (merge_batch)
//!     - used by: server.rs (POST /device)
//!
//! ==============================================================================

use std::sync::Arc;

use serde::Serialize;

use crate::domain::{RawReading, Reading};
use crate::error::IngestError;
use crate::store::{DeviceStore, MergeOutcome, Slot};
use crate::time_codec::TimeCodec;

/// a reading dropped from its batch because the timestamp did not parse
#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct MalformedReading {
    /// position in the submitted batch
    pub index: usize,
    pub timestamp: String,
    pub reason: String,
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    FullyApplied,
    /// some readings were rejected; everything well-formed is still committed
    PartiallyApplied,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct BatchResult {
    pub device_id: String,
    /// this batch created the device's aggregate
    pub new_device: bool,
    pub applied: usize,
    pub duplicates: usize,
    pub malformed: Vec<MalformedReading>,
}

impl BatchResult {
    pub fn status(&self) -> BatchStatus {
        if self.malformed.is_empty() {
            BatchStatus::FullyApplied
        } else {
            BatchStatus::PartiallyApplied
        }
    }
}

#[derive(Clone)]
pub struct ReadingBatchProcessor {
    store: Arc<DeviceStore>,
    log_device_state: bool,
}

impl ReadingBatchProcessor {
    pub fn new(store: Arc<DeviceStore>) -> Self {
        Self {
            store,
            log_device_state: false,
        }
    }

    /// Dump the full aggregate at debug level after every merge.
    pub fn with_device_state_logging(mut self, enabled: bool) -> Self {
        self.log_device_state = enabled;
        self
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    /// Process one batch for `device_id`.
    ///
    /// A bad timestamp only drops that reading. The batch is still merged and
    /// the result reports it as partially applied.
    pub async fn process(
        &self,
        device_id: &str,
        raw_readings: Vec<RawReading>,
    ) -> Result<BatchResult, IngestError> {
        if device_id.is_empty() {
            return Err(IngestError::EmptyDeviceId);
        }

        let mut readings = Vec::with_capacity(raw_readings.len());
        let mut malformed = Vec::new();
        for (index, raw) in raw_readings.into_iter().enumerate() {
            match TimeCodec::parse(&raw.timestamp) {
                Ok(timestamp) => readings.push(Reading::new(timestamp, raw.count)),
                Err(e) => {
                    tracing::warn!(device_id, index, error = %e, "skipping malformed reading");
                    malformed.push(MalformedReading {
                        index,
                        timestamp: e.text,
                        reason: e.reason,
                    });
                }
            }
        }

        let (slot, stats) = if readings.is_empty() {
            (None, Default::default())
        } else {
            let MergeOutcome { slot, stats, .. } =
                self.store.merge_batch(device_id, readings).await;
            if self.log_device_state {
                self.log_state(device_id).await;
            }
            (slot, stats)
        };

        let new_device = slot == Some(Slot::Created);
        if new_device {
            tracing::info!(device_id, "registered new device");
        }

        let result = BatchResult {
            device_id: device_id.to_string(),
            new_device,
            applied: stats.applied,
            duplicates: stats.duplicates,
            malformed,
        };
        tracing::info!(
            device_id,
            applied = result.applied,
            duplicates = result.duplicates,
            malformed = result.malformed.len(),
            "processed batch"
        );
        Ok(result)
    }

    async fn log_state(&self, device_id: &str) {
        let state = self
            .store
            .with_device(device_id, |agg| serde_json::to_string(agg))
            .await;
        match state {
            Some(Ok(json)) => tracing::debug!(device_id, state = %json, "device state"),
            Some(Err(e)) => {
                tracing::debug!(device_id, error = %e, "could not encode device state")
            }
            None => {}
        }
    }
}
