use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LOG_PREFIX: &str = "site_deploy";
const DEFAULT_FILTER: &str = "info";

/// Rolling file output for operator-side logs
pub struct FileLogger {
    log_directory: PathBuf,
    prefix: String,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            prefix: DEFAULT_LOG_PREFIX.to_string(),
            rotation: Rotation::DAILY,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Create the log directory and a non-blocking writer into it. The
    /// guard must be kept alive for buffered lines to be flushed.
    pub fn setup_file_logging(&self) -> io::Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory)?;
        let file_appender =
            RollingFileAppender::new(self.rotation.clone(), &self.log_directory, &self.prefix);
        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Install the global subscriber: console output always, plus a rolling
/// file when `file_logger` is given. Filtering follows `RUST_LOG`.
pub fn setup_logging(file_logger: Option<&FileLogger>) -> io::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match file_logger {
        Some(logger) => {
            let (writer, guard) = logger.setup_file_logging()?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
