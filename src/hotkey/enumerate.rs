//! Keyboard discovery under the input device directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::probe::DeviceProbe;
use super::HotkeyError;

/// Where to look for device nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratorConfig {
    pub input_dir: PathBuf,
    /// File-name prefix of candidate nodes (`event` for `/dev/input/event*`).
    pub device_prefix: String,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("/dev/input"),
            device_prefix: "event".to_string(),
        }
    }
}

/// Finds keyboard-like devices using a [`DeviceProbe`].
pub struct Enumerator<P> {
    config: EnumeratorConfig,
    probe: P,
}

impl<P: DeviceProbe> Enumerator<P> {
    pub fn new(config: EnumeratorConfig, probe: P) -> Self {
        Self { config, probe }
    }

    /// Candidate nodes, ordered by numeric suffix (`event2` before
    /// `event10`), then by name.
    pub fn candidates(&self) -> Result<Vec<PathBuf>, HotkeyError> {
        let entries = std::fs::read_dir(&self.config.input_dir).map_err(|source| HotkeyError::InputDir {
            path: self.config.input_dir.clone(),
            source,
        })?;

        let mut found: Vec<(Option<u64>, String, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let suffix = name.strip_prefix(&self.config.device_prefix)?;
                let index = suffix.parse::<u64>().ok();
                Some((index, name, entry.path()))
            })
            .collect();

        // Numbered nodes first, in numeric order.
        found.sort_by(|a, b| match (a.0, b.0) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.1.cmp(&b.1)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.1.cmp(&b.1),
        });

        Ok(found.into_iter().map(|(_, _, path)| path).collect())
    }

    /// Discover keyboard-like devices.
    pub fn find_keyboards(&self) -> Result<Vec<PathBuf>, HotkeyError> {
        let candidates = self.candidates()?;
        let keyboards = self.classify(&candidates);
        if keyboards.is_empty() {
            return Err(HotkeyError::NoKeyboard {
                dir: self.config.input_dir.clone(),
            });
        }
        Ok(keyboards)
    }

    /// Name match first (`"keyboard"`, case-insensitive); if nothing
    /// matches, every candidate reporting `EV_KEY`.
    pub fn classify(&self, candidates: &[PathBuf]) -> Vec<PathBuf> {
        let by_name: Vec<PathBuf> = candidates
            .iter()
            .filter(|path| self.name_matches(path))
            .cloned()
            .collect();
        if !by_name.is_empty() {
            return by_name;
        }

        info!("No device named like a keyboard, falling back to EV_KEY capability");
        candidates
            .iter()
            .filter(|path| match self.probe.supports_key_events(path) {
                Ok(supported) => supported,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Capability probe failed");
                    false
                }
            })
            .cloned()
            .collect()
    }

    fn name_matches(&self, path: &Path) -> bool {
        match self.probe.name(path) {
            Ok(name) => {
                let matched = name.to_lowercase().contains("keyboard");
                debug!(path = %path.display(), name = %name, matched, "Probed device");
                matched
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Name probe failed");
                false
            }
        }
    }
}
