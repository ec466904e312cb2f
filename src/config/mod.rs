//! Configuration reading.
//!
//! Everything lives in `config.json` in the data directory. Every field is
//! optional; missing fields take their defaults.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::hotkey::listener::MAX_READ_BATCH;
use crate::hotkey::{Chord, EnumeratorConfig, HotkeyConfig, ListenerOptions};
use paths::get_data_dir;

/// Top-level config.json shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Chord string, e.g. "left+right" or "ctrl+alt+space".
    #[serde(default)]
    pub chord: Option<String>,
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    #[serde(default)]
    pub device_prefix: Option<String>,
    /// Records requested per device read.
    #[serde(default)]
    pub read_batch: Option<usize>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Zero-based monitor index to capture.
    #[serde(default)]
    pub monitor: Option<usize>,
    /// Screenshot command argv; `{monitor}` and `{output}` are substituted.
    #[serde(default)]
    pub capture_command: Option<Vec<String>>,
    #[serde(default)]
    pub solver: Option<SolverConfig>,
    /// Comma-separated renderers: "terminal" (default), "log".
    #[serde(default)]
    pub output: Option<String>,
}

/// Nested solver settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverConfig {
    /// "anthropic" (default) or "openai".
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl AppConfig {
    /// Hotkey settings with defaults applied.
    pub fn hotkey_config(&self) -> anyhow::Result<HotkeyConfig> {
        let chord = match &self.chord {
            Some(s) => s
                .parse::<Chord>()
                .with_context(|| format!("invalid chord {:?}", s))?,
            None => Chord::default(),
        };

        let mut enumerator = EnumeratorConfig::default();
        if let Some(dir) = &self.input_dir {
            enumerator.input_dir = dir.clone();
        }
        if let Some(prefix) = &self.device_prefix {
            enumerator.device_prefix = prefix.clone();
        }

        let mut listener = ListenerOptions::default();
        if let Some(batch) = self.read_batch {
            anyhow::ensure!(
                (1..=MAX_READ_BATCH).contains(&batch),
                "readBatch must be between 1 and {}",
                MAX_READ_BATCH
            );
            listener.read_batch = batch;
        }
        if let Some(ms) = self.poll_interval_ms {
            anyhow::ensure!(ms > 0, "pollIntervalMs must be at least 1");
            listener.poll_interval = Duration::from_millis(ms);
        }

        Ok(HotkeyConfig {
            chord,
            enumerator,
            listener,
        })
    }

    pub fn monitor(&self) -> usize {
        self.monitor.unwrap_or(0)
    }
}

/// Read config.json from the data directory.
pub fn read_app_config() -> AppConfig {
    read_json_file(&get_config_path()).unwrap_or_default()
}

/// Path to config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

/// Read a JSON file and deserialize it. Missing files are silent; malformed
/// ones are logged.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
