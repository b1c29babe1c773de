use std::fmt;
use std::sync::Arc;

use log::{Level, LevelFilter, Log, Record};

use crate::error::{Error, Result};

/// Logging handle handed to every component.
///
/// Nothing in the crate installs a global logger; records go to the sink the
/// handle was built with, tagged with the handle's target.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: &'static str,
}

impl Logger {
    /// Human-readable lines on stderr, filtered at `level`.
    pub fn stderr(level: LevelFilter) -> Self {
        let (_, sink) = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} {:<5} [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level)
            .chain(std::io::stderr())
            .into_log();

        Self::from_log(Arc::from(sink))
    }

    pub fn discard() -> Self {
        let (_, sink) = fern::Dispatch::new().level(LevelFilter::Off).into_log();
        Self::from_log(Arc::from(sink))
    }

    pub fn from_log(sink: Arc<dyn Log>) -> Self {
        Self {
            sink,
            target: env!("CARGO_PKG_NAME"),
        }
    }

    /// Same sink, different target.
    pub fn scoped(&self, target: &'static str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            target,
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Debug, args)
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, args)
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, args)
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Error, args)
    }

    fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .args(args)
            .level(level)
            .target(self.target)
            .build();
        if self.sink.enabled(record.metadata()) {
            self.sink.log(&record);
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("target", &self.target).finish()
    }
}

pub fn parse_level(level: &str) -> Result<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warn" => Ok(LevelFilter::Warn),
        "error" => Ok(LevelFilter::Error),
        other => Err(Error::Config(format!("invalid log level {other:?}"))),
    }
}
