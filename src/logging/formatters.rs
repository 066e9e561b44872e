use chrono::{DateTime, FixedOffset, Offset, Utc};
use yansi::Paint;

use super::{record::LogRecord, LogFormatter};

pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

const MISSING_FIELD: &str = "N/A";
const UNKNOWN_NAME: &str = "Unknown";

/// Renders instants in one fixed civil timezone. Milliseconds are always
/// present in the output, whether or not the configured pattern asks for them.
#[derive(Debug, Clone)]
pub struct TimeFormatter {
    offset: FixedOffset,
    pattern: String,
}

impl TimeFormatter {
    pub fn new(offset: FixedOffset, pattern: &str) -> Self {
        Self {
            offset,
            pattern: with_millis(pattern),
        }
    }

    pub fn local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }

    pub fn format(&self, instant: DateTime<Utc>) -> String {
        self.local(instant).format(&self.pattern).to_string()
    }
}

impl Default for TimeFormatter {
    fn default() -> Self {
        Self::new(Utc.fix(), DEFAULT_TIME_FORMAT)
    }
}

fn with_millis(pattern: &str) -> String {
    const MILLIS: [&str; 4] = ["%3f", "%.3f", "%f", "%.f"];
    if MILLIS.iter().any(|m| pattern.contains(m)) {
        return pattern.to_string();
    }

    if pattern.contains("%S") {
        pattern.replacen("%S", "%S,%3f", 1)
    } else if pattern.contains("%T") {
        pattern.replacen("%T", "%T,%3f", 1)
    } else {
        format!("{},%3f", pattern)
    }
}

/// File line layout shared by every file sink:
/// `<time> - <channel> - <LEVEL> - [<kind> <id>] [<display name>] [<actor>] - <message>`
#[derive(Debug, Clone, Default)]
pub struct ContextFormatter {
    time: TimeFormatter,
}

impl ContextFormatter {
    pub fn new(time: TimeFormatter) -> Self {
        Self { time }
    }

    pub fn time(&self) -> &TimeFormatter {
        &self.time
    }
}

impl LogFormatter for ContextFormatter {
    fn format(&self, record: &LogRecord) -> String {
        let ctx = &record.context;
        format!(
            "{} - {} - {} - [{} {}] [{}] [{}] - {}",
            self.time.format(record.timestamp),
            record.channel,
            record.level,
            ctx.entity_kind.as_deref().unwrap_or(MISSING_FIELD),
            ctx.entity_id.as_deref().unwrap_or(MISSING_FIELD),
            ctx.entity_display_name.as_deref().unwrap_or(UNKNOWN_NAME),
            ctx.actor_name.as_deref().unwrap_or(UNKNOWN_NAME),
            record.message,
        )
    }
}

/// Short, optionally coloured layout for the console.
pub struct ConsoleFormatter {
    time: TimeFormatter,
    use_ansi: bool,
}

impl ConsoleFormatter {
    pub fn new(time: TimeFormatter, use_ansi: bool) -> Self {
        Self { time, use_ansi }
    }

    fn timestamp(&self, record: &LogRecord) -> String {
        let time = format!("[{}]", self.time.format(record.timestamp));
        if self.use_ansi {
            time.dim().to_string()
        } else {
            time
        }
    }

    fn format_level(&self, level: log::Level) -> String {
        let tag = match level {
            log::Level::Error => "ERR",
            log::Level::Warn => "WRN",
            log::Level::Info => "INF",
            log::Level::Debug => "DEB",
            log::Level::Trace => "TRC",
        };

        if !self.use_ansi {
            return tag.to_string();
        }

        match level {
            log::Level::Error => tag.red().to_string(),
            log::Level::Warn => tag.yellow().to_string(),
            log::Level::Info => tag.green().to_string(),
            log::Level::Debug => tag.blue().to_string(),
            log::Level::Trace => tag.white().to_string(),
        }
    }
}

impl LogFormatter for ConsoleFormatter {
    fn format(&self, record: &LogRecord) -> String {
        let entity = match &record.context.entity_id {
            Some(id) => format!(" entity={}", id),
            None => String::new(),
        };

        format!(
            "{} {} {}{}: {}",
            self.timestamp(record),
            self.format_level(record.level),
            record.channel,
            entity,
            record.message,
        )
    }
}
