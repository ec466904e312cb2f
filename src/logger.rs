use std::fs;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::paths::get_log_dir;

const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn,mio=warn";

/// Initialize logging.
///
/// Sets up:
/// - Console output (stderr), compact and human-readable. Stdout is left to
///   the terminal renderer.
/// - File output: `{data_dir}/logs/snapsolve.log`, rotated daily, keeping
///   the latest 5 files. Skipped with a warning if the directory is not
///   writable.
/// - Environment filter: `RUST_LOG`, defaulting to `info`.
pub fn init() -> anyhow::Result<()> {
    let log_dir = get_log_dir();
    let _ = fs::create_dir_all(&log_dir);

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("snapsolve")
        .filename_suffix("log")
        .max_log_files(5)
        .build(&log_dir);

    let file_error = file_appender.as_ref().err().map(|e| e.to_string());
    let file_layer = file_appender.ok().map(|appender| {
        fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    match file_error {
        None => tracing::info!(log_dir = %log_dir.display(), "Logger initialized"),
        Some(e) => tracing::warn!(
            log_dir = %log_dir.display(),
            error = %e,
            "File logging disabled"
        ),
    }
    Ok(())
}
