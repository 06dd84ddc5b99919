pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod notification;
pub mod remote;
pub mod store;
pub mod stream_state;
pub mod timeouts;

#[cfg(feature = "app")]
mod commands;

#[cfg(feature = "app")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use commands::AppState;
    use config::Config;
    use tauri::Manager;

    logging::init();

    tauri::Builder::default()
        .setup(|app| {
            let config = Config::load()?;
            let state = AppState::from_config(config)?;

            // Subscription and workers live on the async runtime
            let store = state.store.clone();
            tauri::async_runtime::spawn(async move {
                if let Err(e) = store.mount().await {
                    tracing::error!(error = %e, "failed to mount store");
                }
            });

            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Store reads and actions
            commands::tracker::get_state,
            commands::tracker::toggle_device,
            commands::tracker::load_history,
            commands::tracker::select_history,
            commands::tracker::set_history_visible,
            commands::tracker::delete_history,
            commands::tracker::watch_events,
            // Alerts
            commands::notification_cmd::notification_responded,
            commands::notification_cmd::notification_channel,
            commands::notification_cmd::watch_notifications,
            // Configuration
            commands::config_cmd::get_config,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app, event| {
            if let tauri::RunEvent::Exit = event {
                if let Some(state) = app.try_state::<AppState>() {
                    state.store.dispose();
                }
            }
        });
}
