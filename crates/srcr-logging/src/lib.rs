//! JSONL logging with per-node context for SRCR mesh hosts
//!
//! Simulations run many routing engines in one process, so every log line
//! needs to say which node emitted it. This crate sets up a
//! `tracing-subscriber` stack for that.
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines by default, pretty output for development
//! - **Node Context**: [`NodeContextGuard`] tags everything in a scope with the node address
//! - **Per-node counters**: [`EventCounter`] tallies events by node and level
//! - **File Rotation**: daily/hourly log files via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use srcr_logging::{LogConfig, SrcrSubscriberBuilder};
//!
//! let _guard = SrcrSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//!
//! let _node = srcr_logging::NodeContextGuard::new(addr);
//! tracing::info!("Processing packet"); // carries node = "A"
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{NodeContextData, NodeContextGuard};
pub use layers::{EventCounter, EventCounts, LogBuffer, NodeContextLayer, jsonl_layer};

use std::fs::{self, File};

use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::{EnvFilter, Registry};

/// Errors from setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid filter directive: {0}")]
    Filter(#[from] ParseError),

    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create rolling appender: {0}")]
    Appender(#[from] InitError),

    #[error("A global subscriber is already set")]
    AlreadySet(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Subscriber the output layers are stacked on
type Base = Layered<NodeContextLayer, Layered<EnvFilter, Registry>>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Builder for configuring and installing the SRCR logging subscriber
///
/// By default console output is JSONL. Use [`LogConfig::development`] for
/// human-readable output.
#[derive(Default)]
pub struct SrcrSubscriberBuilder {
    config: LogConfig,
    counter: Option<EventCounter>,
    buffer: Option<LogBuffer>,
}

impl SrcrSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Count events per node into `counter`
    pub fn with_event_counter(mut self, counter: EventCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Also write JSONL into an in-memory buffer
    pub fn with_buffer(mut self, buffer: LogBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    ///
    /// `RUST_LOG` takes precedence over the configured levels. The returned
    /// guard (present with file output) must be kept alive to flush the file.
    pub fn build(
        self,
    ) -> Result<(Box<dyn Subscriber + Send + Sync>, Option<WorkerGuard>), LoggingError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.directives())?,
        };
        let context = match self.counter.clone() {
            Some(counter) => NodeContextLayer::with_counter(counter),
            None => NodeContextLayer::new(),
        };

        let (layers, guard) = self.output_layers()?;
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(context)
            .with(layers);
        Ok((Box::new(subscriber), guard))
    }

    /// Install the subscriber globally
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let (subscriber, guard) = self.build()?;
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(guard)
    }

    /// Install the subscriber globally, reporting failures on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {e}");
                None
            }
        }
    }

    fn output_layers(&self) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LoggingError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;
        let console = &self.config.console;

        if console.enabled {
            let layer: BoxedLayer = if console.pretty {
                tracing_subscriber::fmt::layer()
                    .with_ansi(console.ansi)
                    .with_target(true)
                    .boxed()
            } else {
                jsonl_layer(std::io::stdout, &self.config.jsonl)
            };
            match &console.level {
                Some(level) => layers.push(layer.with_filter(EnvFilter::try_new(level)?).boxed()),
                None => layers.push(layer),
            }
        }

        if let Some(file) = &self.config.file {
            let (writer, file_guard) = file_writer(file)?;
            layers.push(jsonl_layer(writer, &self.config.jsonl));
            guard = Some(file_guard);
        }

        if let Some(buffer) = &self.buffer {
            layers.push(jsonl_layer(buffer.clone(), &self.config.jsonl));
        }

        Ok((layers, guard))
    }
}

/// Non-blocking writer for file output
///
/// [`RotationStrategy::Never`] truncates a single `<prefix>.log`; the other
/// strategies append to rolling files.
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory)?;
            let path = config.directory.join(format!("{}.log", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log");
    if let Some(max) = config.max_files {
        builder = builder.max_log_files(max);
    }
    let appender = builder.build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    SrcrSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    SrcrSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for tests; repeated calls are harmless
pub fn init_testing() {
    let _ = SrcrSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
