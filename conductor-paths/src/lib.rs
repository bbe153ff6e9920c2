//! XDG Base Directory paths for conductor.
//!
//! The orchestration core keeps its durable state (resume contexts, task queues,
//! snapshots) under the data directory and reads layered configuration from the
//! config directory. XDG paths are used on every platform so a restarted host
//! finds the same state regardless of how it was launched.

use std::path::PathBuf;

const APP_DIR: &str = "conductor";

/// Get the conductor config directory.
///
/// Returns `$XDG_CONFIG_HOME/conductor` if set, otherwise `~/.config/conductor`.
///
/// # Examples
///
/// ```
/// use conductor_paths::config_dir;
///
/// let config = config_dir();
/// let user_config = config.join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config").join(APP_DIR)
    } else {
        PathBuf::from(".config").join(APP_DIR)
    }
}

/// Get the conductor data directory.
///
/// Returns `$XDG_DATA_HOME/conductor` if set, otherwise `~/.local/share/conductor`.
pub fn data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".local/share").join(APP_DIR)
    } else {
        PathBuf::from(".local/share").join(APP_DIR)
    }
}

/// Directory holding the file-backed key/value store.
pub fn store_dir() -> PathBuf {
    data_dir().join("store")
}
