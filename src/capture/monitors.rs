//! Monitor discovery via `xrandr --listmonitors`, with model names from
//! EDID.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use anyhow::Context;
use tracing::debug;

/// Pixel geometry of a monitor in the virtual screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    pub index: usize,
    /// Output connector name, e.g. "DP-4".
    pub output: String,
    /// Model name from EDID, or "Unknown".
    pub model: String,
    pub geometry: Geometry,
}

/// List monitors in xrandr order.
pub fn list_monitors() -> anyhow::Result<Vec<MonitorInfo>> {
    let out = Command::new("xrandr")
        .arg("--listmonitors")
        .output()
        .context("xrandr failed")?;
    anyhow::ensure!(out.status.success(), "xrandr exited with {}", out.status);

    let edid_names = read_edid_names(Path::new("/sys/class/drm"));
    let monitors = parse_listmonitors(&String::from_utf8_lossy(&out.stdout), &edid_names);
    anyhow::ensure!(!monitors.is_empty(), "no monitors detected");
    Ok(monitors)
}

/// Parse `xrandr --listmonitors` output:
///
/// ```text
/// Monitors: 2
///  0: +*DP-4 2560/597x1440/336+0+0  DP-4
///  1: +HDMI-0 1920/527x1080/296+2560+0  HDMI-0
/// ```
pub fn parse_listmonitors(text: &str, edid_names: &HashMap<String, String>) -> Vec<MonitorInfo> {
    let mut monitors = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Monitors:") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        let output = parts[parts.len() - 1].to_string();
        let model = edid_names
            .get(&output)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string());
        monitors.push(MonitorInfo {
            index: monitors.len(),
            geometry: parse_geometry(parts[2]),
            output,
            model,
        });
    }
    monitors
}

/// Parse `2192/700x1233/400+1080+177`. Unparseable parts are zero.
pub fn parse_geometry(g: &str) -> Geometry {
    let mut geometry = Geometry::default();
    let mut plus = g.split('+');
    let dims = plus.next().unwrap_or_default();
    geometry.x = plus.next().and_then(|v| v.parse().ok()).unwrap_or(0);
    geometry.y = plus.next().and_then(|v| v.parse().ok()).unwrap_or(0);

    if let Some((w, h)) = dims.split_once('x') {
        let strip_mm = |s: &str| s.split('/').next().unwrap_or_default().parse().unwrap_or(0);
        geometry.width = strip_mm(w);
        geometry.height = strip_mm(h);
    }
    geometry
}

/// Map output name -> monitor model from `<drm>/card*-<output>/edid`.
pub fn read_edid_names(drm_dir: &Path) -> HashMap<String, String> {
    let mut names = HashMap::new();
    let Ok(entries) = std::fs::read_dir(drm_dir) else {
        return names;
    };
    for entry in entries.flatten() {
        let base = entry.file_name().to_string_lossy().into_owned();
        if !base.starts_with("card") {
            continue;
        }
        let Some((_, output)) = base.split_once('-') else {
            continue;
        };
        let Ok(data) = std::fs::read(entry.path().join("edid")) else {
            continue;
        };
        if let Some(name) = parse_edid_name(&data) {
            debug!(output, model = %name, "EDID monitor name");
            names.insert(output.to_string(), name);
        }
    }
    names
}

/// Monitor name from the display descriptor tagged 0xFC in the EDID base
/// block (four 18-byte descriptors from offset 54).
pub fn parse_edid_name(data: &[u8]) -> Option<String> {
    if data.len() < 128 {
        return None;
    }
    for i in 0..4 {
        let offset = 54 + i * 18;
        let desc = &data[offset..offset + 18];
        if desc[0..3] != [0u8; 3] || desc[3] != 0xFC {
            continue;
        }
        let raw = String::from_utf8_lossy(&desc[5..18]);
        let name = raw.trim_end_matches(['\n', ' ', '\0']).trim().to_string();
        if name.is_empty() {
            return None;
        }
        return Some(name);
    }
    None
}
