mod daily;
mod formatters;
mod logger;
mod record;
mod sinks;

use std::sync::Arc;

use crate::alert::RemoteAlertSink;

pub use daily::{DailyPerEntitySink, FileHandleKey, NO_ENTITY_PLACEHOLDER};
pub use formatters::{ConsoleFormatter, ContextFormatter, TimeFormatter, DEFAULT_TIME_FORMAT};
pub use logger::{install_diagnostics, LoggingSystem};
pub use record::{Channel, LogContext, LogRecord, SourceLocation};
pub use sinks::{ConsoleSink, RotatingFileSink};

pub trait LogFormatter: Sync + Send {
    fn format(&self, record: &LogRecord) -> String;
}

pub trait LogSink: Sync + Send {
    fn write_log(&self, record: &LogRecord) -> eyre::Result<()>;
    fn flush(&self);
}

/// The closed set of destinations a channel can fan a record out to.
#[derive(Clone)]
pub enum Sink {
    Console(Arc<ConsoleSink>),
    RotatingFile(Arc<RotatingFileSink>),
    DailyPerEntity(Arc<DailyPerEntitySink>),
    RemoteAlert(Arc<RemoteAlertSink>),
}

impl Sink {
    pub fn name(&self) -> String {
        match self {
            Sink::Console(_) => "console".to_string(),
            Sink::RotatingFile(sink) => format!("file:{}", sink.path().display()),
            Sink::DailyPerEntity(_) => "daily-per-entity".to_string(),
            Sink::RemoteAlert(_) => "remote-alert".to_string(),
        }
    }
}

impl LogSink for Sink {
    fn write_log(&self, record: &LogRecord) -> eyre::Result<()> {
        match self {
            Sink::Console(sink) => sink.write_log(record),
            Sink::RotatingFile(sink) => sink.write_log(record),
            Sink::DailyPerEntity(sink) => sink.write_log(record),
            Sink::RemoteAlert(sink) => sink.write_log(record),
        }
    }

    fn flush(&self) {
        match self {
            Sink::Console(sink) => sink.flush(),
            Sink::RotatingFile(sink) => sink.flush(),
            Sink::DailyPerEntity(sink) => sink.flush(),
            Sink::RemoteAlert(sink) => sink.flush(),
        }
    }
}

/// Last resort reporting for failures inside the pipeline itself. Goes
/// straight to stderr so it can never loop back into a sink.
pub fn report_sink_failure(sink: &str, err: &eyre::Report) {
    eprintln!("chatlog: sink '{}' failed: {:#}", sink, err);
}
