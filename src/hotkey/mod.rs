//! Global chord hotkey read straight from the kernel input devices.
//!
//! Keyboards are discovered under `/dev/input`, each one gets its own
//! blocking read loop, and every loop feeds a per-device chord state
//! machine. Completed chords are offered to a single capacity-one trigger
//! channel: a pulse is dropped if one is already pending, so the consumer
//! sees at most one unconsumed trigger and producers never block.
//!
//! Reading `/dev/input/event*` requires the user to be in the `input` group
//! (or root). Works on X11 and Wayland alike.

pub mod chord;
pub mod enumerate;
pub mod keys;
pub mod listener;
pub mod probe;
pub mod record;

use std::io;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::info;

pub use chord::{Chord, ChordParseError};
pub use enumerate::{Enumerator, EnumeratorConfig};
pub use listener::{Canceller, HotkeyListener, KernelDevices, ListenerOptions};
pub use probe::EvdevProbe;

/// Errors of the hotkey subsystem.
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("cannot list input devices in {}: {source}", path.display())]
    InputDir { path: PathBuf, source: io::Error },

    #[error("no keyboard found in {}", dir.display())]
    NoKeyboard { dir: PathBuf },

    #[error("open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("{}: device stream ended", path.display())]
    StreamEnded { path: PathBuf },

    #[error("failed to spawn listener thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("listener for {} panicked", path.display())]
    ListenerPanicked { path: PathBuf },
}

/// A chord occurrence. Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSignal;

/// Producer side of the trigger channel, shared by every device loop.
#[derive(Debug, Clone)]
pub struct TriggerSink {
    tx: mpsc::Sender<TriggerSignal>,
}

impl TriggerSink {
    /// Offer one trigger without blocking.
    ///
    /// Returns `false` when a trigger is already pending (the offer
    /// collapses into it) or the consumer is gone.
    pub fn offer(&self) -> bool {
        self.tx.try_send(TriggerSignal).is_ok()
    }
}

/// Create the capacity-one trigger channel.
pub fn trigger_channel() -> (TriggerSink, mpsc::Receiver<TriggerSignal>) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerSink { tx }, rx)
}

/// Everything needed to start listening.
#[derive(Debug, Clone, Default)]
pub struct HotkeyConfig {
    pub chord: Chord,
    pub enumerator: EnumeratorConfig,
    pub listener: ListenerOptions,
}

/// Discover keyboards and start one read loop per device.
///
/// Fails with [`HotkeyError::NoKeyboard`] before any loop starts if no
/// keyboard-like device is found.
pub fn start(config: &HotkeyConfig, sink: TriggerSink) -> Result<HotkeyListener, HotkeyError> {
    let devices = Enumerator::new(config.enumerator.clone(), EvdevProbe).find_keyboards()?;

    info!(
        chord = %config.chord,
        devices = devices.len(),
        "Starting hotkey listener"
    );

    listener::spawn(
        devices,
        KernelDevices::new(config.listener.poll_interval),
        config.chord.clone(),
        config.listener.clone(),
        sink,
    )
}
