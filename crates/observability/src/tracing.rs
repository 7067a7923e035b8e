//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG` when set, otherwise from
//! [`LogOptions::default_filter`] (`info`).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ::tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::util::SubscriberInitExt;

/// Default log file of the order email queue tools.
pub const DEFAULT_LOG_FILE: &str = "var/log/order_email_queue.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output, for terminals.
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    /// Append to this file instead of writing to stdout.
    pub file: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            file: None,
            default_filter: "info".to_string(),
        }
    }
}

impl LogOptions {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    // Stdout only: nothing here can fail.
    let _ = init_with(LogOptions::default());
}

/// Initialize tracing/logging with explicit options.
///
/// Only opening the log file can fail. A subscriber that is already installed
/// is left in place.
pub fn init_with(options: LogOptions) -> Result<(), LogInitError> {
    let (writer, ansi) = match &options.file {
        Some(path) => (BoxMakeWriter::new(Mutex::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let _ = dispatch(&options, writer, ansi).try_init();

    Ok(())
}

fn dispatch(options: &LogOptions, writer: BoxMakeWriter, ansi: bool) -> Dispatch {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    match options.format {
        LogFormat::Json => Dispatch::new(builder.json().finish()),
        LogFormat::Pretty => Dispatch::new(builder.pretty().with_ansi(ansi).finish()),
    }
}

/// Open `path` for appending, creating missing parent directories.
pub fn open_log_file(path: &Path) -> Result<File, LogInitError> {
    let to_error = |source| LogInitError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(to_error)?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_error)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_to_json_info_on_stdout() {
        let options = LogOptions::default();
        assert_eq!(options.format, LogFormat::Json);
        assert_eq!(options.default_filter, "info");
        assert!(options.file.is_none());
    }

    #[test]
    fn log_file_is_appended_and_parents_are_created() {
        let dir = std::env::temp_dir().join(format!("ordermail-log-{}", std::process::id()));
        let path = dir.join("nested").join("order_email_queue.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn pretty_format_writes_multi_line_events() {
        let dir = std::env::temp_dir().join(format!("ordermail-log-pretty-{}", std::process::id()));
        let path = dir.join("pretty.log");
        let writer = BoxMakeWriter::new(Mutex::new(open_log_file(&path).unwrap()));
        let options = LogOptions::default()
            .with_format(LogFormat::Pretty)
            .with_default_filter("info");

        ::tracing::dispatcher::with_default(&dispatch(&options, writer, false), || {
            ::tracing::info!(order_id = 42, "order email queued");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("order email queued"));
        assert!(contents.contains("order_id: 42"));
        assert!(!contents.trim_start().starts_with('{'));
        assert!(contents.lines().count() > 1);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn json_format_writes_one_object_per_event() {
        let dir = std::env::temp_dir().join(format!("ordermail-log-json-{}", std::process::id()));
        let path = dir.join("json.log");
        let writer = BoxMakeWriter::new(Mutex::new(open_log_file(&path).unwrap()));

        ::tracing::dispatcher::with_default(&dispatch(&LogOptions::default(), writer, false), || {
            ::tracing::info!(order_id = 42, "order email queued");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with('{'));
        assert!(contents.contains(r#""order_id":42"#));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unopenable_log_file_is_reported() {
        let dir = std::env::temp_dir().join(format!("ordermail-log-dir-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        // A directory cannot be opened as a log file.
        let err = open_log_file(&dir).unwrap_err();
        assert!(err.to_string().contains("cannot open log file"));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
