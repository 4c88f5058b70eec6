use std::path::Path;

use tracing::info;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_NAME: &str = "bnt.log";

// Log to stderr, or to `log_file` when the terminal is taken by the dashboard
pub fn init_logging(log_file: Option<&Path>) {
    let level = if cfg!(debug_assertions) { "trace" } else { "info" };

    let (filter, defaulted) = match EnvFilter::try_from_default_env() {
        Ok(f) => (f, false),
        Err(_) => (EnvFilter::new(level), true),
    };

    let registry = tracing_subscriber::registry().with(filter);

    match log_file.map(file_writer) {
        Some(Ok(writer)) => registry
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .init(),
        Some(Err(err)) => {
            // The dashboard owns stderr, run without a log
            eprintln!("Warning: logging disabled: {err}");
            registry.init();
        }
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    if defaulted {
        info!("\"RUST_LOG\" variable not set, defaulting to {level}");
    }
}

// The file appender writes synchronously, no worker thread is spawned
fn file_writer(path: &Path) -> Result<RollingFileAppender, InitError> {
    let file_name = path
        .file_name()
        .map_or_else(|| DEFAULT_LOG_NAME.to_string(), |name| name.to_string_lossy().into_owned());

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
}
