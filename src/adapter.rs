//! Remote sync adapter
//!
//! The only component that talks to the remote store. Raw collection
//! snapshots come in as untyped JSON keyed by device id; everything handed
//! to the store is already typed and coerced.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::error::{TrackerError, TrackerResult};
use crate::models::{CurrentLocation, HistoricalLocation, MotorcycleReading};
use crate::remote::{join_path, Listener, RemoteStore};

/// Field written under the active device to drive the relay
pub const DEVICE_CONTROL_FIELD: &str = "button";

#[derive(Clone)]
pub struct SyncAdapter {
    remote: Arc<dyn RemoteStore>,
    data_path: String,
}

impl SyncAdapter {
    pub fn new(remote: Arc<dyn RemoteStore>, data_path: impl Into<String>) -> Self {
        Self {
            remote,
            data_path: data_path.into(),
        }
    }

    pub fn data_path(&self) -> &str {
        &self.data_path
    }

    /// Open the live subscription on the device collection
    pub fn subscribe(&self) -> Subscription {
        info!(path = %self.data_path, "subscribing to device data");
        Subscription {
            listener: self.remote.listen(&self.data_path),
        }
    }

    /// Every record except `exclude_id`, in collection order
    pub async fn fetch_history(&self, exclude_id: &str) -> TrackerResult<Vec<HistoricalLocation>> {
        let snapshot = self.remote.get(&self.data_path).await?;
        let history = history_from_snapshot(&snapshot, exclude_id);
        debug!(count = history.len(), exclude_id, "fetched history");
        Ok(history)
    }

    /// Merge `{button: 1|0}` into the device record
    pub async fn write_device_control(&self, device_id: &str, on: bool) -> TrackerResult<()> {
        validate_record_id(device_id)?;

        let mut fields = Map::new();
        fields.insert(DEVICE_CONTROL_FIELD.to_string(), json!(if on { 1 } else { 0 }));

        self.remote
            .update(&join_path(&self.data_path, device_id), fields)
            .await?;
        debug!(device_id, on, "relay state written");
        Ok(())
    }

    pub async fn delete_record(&self, id: &str) -> TrackerResult<()> {
        validate_record_id(id)?;
        self.remote.remove(&join_path(&self.data_path, id)).await
    }
}

/// Live stream of active-device readings
pub struct Subscription {
    listener: Listener,
}

impl Subscription {
    /// Next derived reading. Snapshots without any device are skipped so
    /// the last known reading stays in place.
    pub async fn next(&mut self) -> Option<CurrentLocation> {
        while let Some(snapshot) = self.listener.recv().await {
            match select_current(&snapshot) {
                Some(location) => return Some(location),
                None => debug!("snapshot has no device records"),
            }
        }
        None
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.listener.abort_handle()
    }

    pub fn unsubscribe(mut self) {
        self.listener.close();
    }
}

/// The reading under the first key of the collection.
///
/// "First" is whatever order the remote delivered; a store that reorders
/// keys between snapshots can switch the active device.
pub fn select_current(snapshot: &Value) -> Option<CurrentLocation> {
    let (device_id, record) = snapshot.as_object()?.iter().next()?;
    Some(CurrentLocation::new(
        device_id.clone(),
        MotorcycleReading::from_raw(record),
    ))
}

pub fn history_from_snapshot(snapshot: &Value, exclude_id: &str) -> Vec<HistoricalLocation> {
    let Some(records) = snapshot.as_object() else {
        return Vec::new();
    };

    records
        .iter()
        .filter(|(id, _)| id.as_str() != exclude_id)
        .map(|(id, record)| HistoricalLocation::new(id.clone(), MotorcycleReading::from_raw(record)))
        .collect()
}

/// A record id must address exactly one child of the collection
pub fn validate_record_id(id: &str) -> TrackerResult<()> {
    const FORBIDDEN: [char; 6] = ['/', '.', '#', '$', '[', ']'];

    if id.trim().is_empty() || id.contains(FORBIDDEN) {
        return Err(TrackerError::InvalidRecordId(id.to_string()));
    }
    Ok(())
}
