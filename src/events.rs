use serde::Serialize;

use crate::models::CurrentLocation;

/// Events published by the store on every state transition and forwarded
/// to the frontend via Tauri channels
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// A remote change re-derived the active device reading
    LocationUpdated {
        location: CurrentLocation,
        alert_active: bool,
    },

    /// Local relay toggle flipped (remote write is fire-and-forget)
    DeviceToggled { on: bool },

    /// History list replaced by a fresh fetch
    HistoryLoaded { count: usize },

    /// History view opened or closed
    HistoryVisibility { visible: bool },

    /// User picked a history entry
    HistorySelected { id: String },

    /// Record removed remotely and pruned locally
    HistoryDeleted { id: String },

    /// Store torn down; no further events follow
    Disposed,
}

/// Delivery and interaction events for vibration alerts
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// Alert accepted by the delivery service
    Received {
        alert_id: String,
        device_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        receipt_id: Option<String>,
        received_at: chrono::DateTime<chrono::Utc>,
    },

    /// User tapped the alert
    Responded {
        #[serde(skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        data: serde_json::Value,
    },
}
