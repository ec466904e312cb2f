//! Screen capture.
//!
//! Capturing is delegated to an external screenshot tool that writes the
//! encoded image to stdout (grim on Wayland, ImageMagick `import` on X11).

pub mod monitors;

use anyhow::Context;
use tokio::process::Command;
use tracing::debug;

use monitors::MonitorInfo;

/// Produces an encoded image of one monitor.
#[allow(async_fn_in_trait)]
pub trait Capturer: Send + Sync {
    async fn capture(&self, monitor: usize) -> anyhow::Result<Vec<u8>>;
}

/// Default screenshot command (Wayland, JPEG to stdout).
pub fn default_capture_command() -> Vec<String> {
    ["grim", "-o", "{output}", "-t", "jpeg", "-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Runs a screenshot command and returns its stdout.
///
/// `{monitor}` in the argv is replaced with the monitor index and
/// `{output}` with its connector name.
pub struct CommandCapturer {
    argv: Vec<String>,
    monitors: Vec<MonitorInfo>,
}

impl CommandCapturer {
    pub fn new(argv: Vec<String>, monitors: Vec<MonitorInfo>) -> anyhow::Result<Self> {
        anyhow::ensure!(!argv.is_empty(), "capture command is empty");
        Ok(Self { argv, monitors })
    }

    fn command_for(&self, monitor: usize) -> anyhow::Result<Vec<String>> {
        let needs_output = self.argv.iter().any(|a| a.contains("{output}"));
        let output = match self.monitors.get(monitor) {
            Some(info) => info.output.as_str(),
            None if needs_output => anyhow::bail!(
                "monitor {} not available (only {} displays)",
                monitor,
                self.monitors.len()
            ),
            None => "",
        };
        Ok(self
            .argv
            .iter()
            .map(|a| {
                a.replace("{monitor}", &monitor.to_string())
                    .replace("{output}", output)
            })
            .collect())
    }
}

impl Capturer for CommandCapturer {
    async fn capture(&self, monitor: usize) -> anyhow::Result<Vec<u8>> {
        let argv = self.command_for(monitor)?;
        debug!(?argv, "Running capture command");

        let out = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .await
            .with_context(|| format!("failed to run {}", argv[0]))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            anyhow::bail!("capture failed ({}): {}", out.status, stderr.trim());
        }
        anyhow::ensure!(!out.stdout.is_empty(), "capture produced no image data");

        debug!(bytes = out.stdout.len(), "Captured monitor {}", monitor);
        Ok(out.stdout)
    }
}
