//! Store reads and user actions

use tauri::{ipc::Channel, State};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::AppState;
use crate::events::TrackerEvent;
use crate::models::HistoricalLocation;
use crate::store::TrackerState;

/// Everything the UI renders, as one snapshot
#[tauri::command]
pub fn get_state(state: State<'_, AppState>) -> TrackerState {
    state.store.snapshot()
}

/// Flip the relay; returns the new local state
#[tauri::command]
pub fn toggle_device(state: State<'_, AppState>) -> bool {
    state.store.toggle_device()
}

#[tauri::command]
pub fn load_history(state: State<'_, AppState>) {
    state.store.load_history();
}

#[tauri::command]
pub fn select_history(location: HistoricalLocation, state: State<'_, AppState>) {
    state.store.select_history(location);
}

#[tauri::command]
pub fn set_history_visible(visible: bool, state: State<'_, AppState>) {
    state.store.set_history_visible(visible);
}

/// Delete a history record; the error string is shown to the user
#[tauri::command]
pub async fn delete_history(id: String, state: State<'_, AppState>) -> Result<(), String> {
    state.store.delete_history(&id).await?;
    Ok(())
}

/// Forward store events to the frontend until the store is disposed or the
/// channel goes away. Returns a watch id for log correlation.
#[tauri::command]
pub async fn watch_events(
    channel: Channel<TrackerEvent>,
    state: State<'_, AppState>,
) -> Result<String, String> {
    let watch_id = uuid::Uuid::new_v4().to_string();
    let mut events = state.store.events();

    let id = watch_id.clone();
    tauri::async_runtime::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let last = matches!(event, TrackerEvent::Disposed);
                    if channel.send(event).is_err() || last {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(watch_id = %id, skipped, "event watcher lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(watch_id = %id, "event watcher stopped");
    });

    debug!(watch_id = %watch_id, "event watcher started");
    Ok(watch_id)
}
