//! Data directory paths.
//!
//!   Linux: $XDG_CONFIG_HOME/snapsolve (default ~/.config/snapsolve)

use std::path::PathBuf;

/// Get the snapsolve data directory.
pub fn get_data_dir() -> PathBuf {
    get_config_base().join("snapsolve")
}

/// Directory for rolling log files.
pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Respect XDG_CONFIG_HOME, default ~/.config.
fn get_config_base() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg);
        }
    }
    dirs::config_dir().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    })
}
