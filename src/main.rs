//! snapsolve: press a global chord, capture the screen, stream an LLM's
//! solution to the terminal.
//!
//! The chord is read straight from the kernel's keyboard devices so it works
//! without focus on both X11 and Wayland. This is the entry point that wires
//! configuration, logging, the hotkey listener and the capture cycle.

#[cfg(not(target_os = "linux"))]
compile_error!("snapsolve reads Linux input devices and only builds on Linux");

mod app;
mod capture;
mod config;
mod hotkey;
mod logger;
mod render;
mod solve;

use anyhow::Context;
use tracing::{error, info, warn};

use app::Stop;
use capture::monitors::list_monitors;
use capture::{default_capture_command, CommandCapturer};
use config::{get_config_path, read_app_config};
use hotkey::{trigger_channel, HotkeyError};
use render::create_renderer;
use solve::{create_solver, Solver};

#[tokio::main]
async fn main() {
    if let Err(e) = logger::init() {
        eprintln!("logging unavailable: {e}");
    }

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let app_config = read_app_config();
    info!(path = %get_config_path().display(), "Configuration loaded");
    let hotkey_config = app_config.hotkey_config()?;

    let monitors = match list_monitors() {
        Ok(monitors) => monitors,
        Err(e) => {
            warn!("Could not list monitors: {:#}", e);
            Vec::new()
        }
    };
    for m in &monitors {
        info!(
            index = m.index,
            output = %m.output,
            model = %m.model,
            width = m.geometry.width,
            height = m.geometry.height,
            "Monitor"
        );
    }
    let monitor = app_config.monitor();
    if !monitors.is_empty() && monitor >= monitors.len() {
        anyhow::bail!(
            "monitor {} not available (only {} displays)",
            monitor,
            monitors.len()
        );
    }

    let capture_command = app_config
        .capture_command
        .clone()
        .unwrap_or_else(default_capture_command);
    let capturer = CommandCapturer::new(capture_command, monitors)?;
    let mut solver = create_solver(app_config.solver.as_ref())?;
    let mut renderer = create_renderer(app_config.output.as_deref())?;

    let (sink, mut triggers) = trigger_channel();
    let listener = match hotkey::start(&hotkey_config, sink) {
        Ok(listener) => listener,
        Err(e @ HotkeyError::NoKeyboard { .. }) => {
            return Err(e).context("is this user in the 'input' group?");
        }
        Err(e) => return Err(e.into()),
    };
    let canceller = listener.canceller();
    let devices: Vec<String> = listener.devices().map(|p| p.display().to_string()).collect();
    info!(?devices, model = solver.model_name(), "Listening");
    renderer.set_status(&format!("press {} to capture", hotkey_config.chord));

    let mut waiter = tokio::task::spawn_blocking(move || listener.wait());

    let stop = app::run(
        monitor,
        &capturer,
        &mut solver,
        renderer.as_mut(),
        &mut triggers,
        tokio::signal::ctrl_c(),
        &mut waiter,
    )
    .await;

    let joined = match stop {
        Stop::Interrupted => {
            info!("Interrupted, shutting down");
            canceller.cancel();
            waiter.await
        }
        Stop::ListenerExited(joined) => joined,
    };

    match joined.context("listener task failed")? {
        Ok(()) => {
            info!("Stopped");
            Ok(())
        }
        Err(e) => Err(e).context("hotkey listener stopped"),
    }
}
