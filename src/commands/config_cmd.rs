//! Configuration read-out

use tauri::State;

use super::AppState;
use crate::config::Config;

/// Active configuration with secrets blanked
#[tauri::command]
pub async fn get_config(state: State<'_, AppState>) -> Result<Config, String> {
    let config = state.config.lock().await;
    Ok(config.redacted())
}
