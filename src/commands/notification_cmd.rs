//! Alert interaction commands

use serde_json::Value;
use tauri::{ipc::Channel, State};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::AppState;
use crate::events::NotificationEvent;
use crate::notification::{NotificationChannel, VIBRATION_CHANNEL};

/// The frontend reports that the user tapped an alert; `data` is the
/// payload the alert was sent with
#[tauri::command]
pub fn notification_responded(data: Value, state: State<'_, AppState>) {
    state.store.notifications().respond(data);
}

/// Android channel settings the frontend registers before showing alerts
#[tauri::command]
pub fn notification_channel() -> NotificationChannel {
    VIBRATION_CHANNEL
}

/// Stream alert delivery and response events to the frontend
#[tauri::command]
pub async fn watch_notifications(
    channel: Channel<NotificationEvent>,
    state: State<'_, AppState>,
) -> Result<(), String> {
    let mut events = state.store.notifications().subscribe();

    tauri::async_runtime::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if channel.send(event).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification watcher lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    Ok(())
}
