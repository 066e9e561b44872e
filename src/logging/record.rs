use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::Level;

/// Named destinations application code emits into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    General,
    Chat,
    Error,
    Analytics,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::General,
        Channel::Chat,
        Channel::Error,
        Channel::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::General => "general",
            Channel::Chat => "chat",
            Channel::Error => "error",
            Channel::Analytics => "analytics",
        }
    }

    /// Maps a `log` target onto a channel. Anything unknown is general.
    pub fn from_target(target: &str) -> Self {
        target.parse().unwrap_or(Channel::General)
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Channel::General),
            "chat" => Ok(Channel::Chat),
            "error" => Ok(Channel::Error),
            "analytics" => Ok(Channel::Analytics),
            other => Err(eyre::eyre!("unknown channel '{}'", other)),
        }
    }
}

/// Caller supplied attributes attached to a record. Every field is optional;
/// formatters substitute defaults for the missing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    pub entity_id: Option<String>,
    pub entity_kind: Option<String>,
    pub entity_display_name: Option<String>,
    pub actor_name: Option<String>,
}

impl LogContext {
    pub fn entity(id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.entity_kind = Some(kind.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.entity_display_name = Some(name.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor_name = Some(actor.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entity_id.is_none()
            && self.entity_kind.is_none()
            && self.entity_display_name.is_none()
            && self.actor_name.is_none()
    }

    /// Pulls the well known keys out of a `log` record's key/value source.
    pub fn from_key_values(source: &dyn log::kv::Source) -> Self {
        let get = |key: &'static str| {
            source
                .get(log::kv::Key::from_str(key))
                .map(|value| value.to_string())
        };

        Self {
            entity_id: get("entity_id"),
            entity_kind: get("entity_kind"),
            entity_display_name: get("entity_display_name"),
            actor_name: get("actor_name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub module: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line, &self.module) {
            (Some(file), Some(line), _) => write!(f, "{}:{}", file, line),
            (Some(file), None, _) => f.write_str(file),
            (None, _, Some(module)) => f.write_str(module),
            (None, _, None) => f.write_str("unknown"),
        }
    }
}

/// A single application event. Immutable once emitted; every sink gets a
/// shared reference to the same value.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub channel: Channel,
    pub message: String,
    pub context: LogContext,
    pub location: Option<SourceLocation>,
}

impl LogRecord {
    pub fn new(channel: Channel, level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            channel,
            message: message.into(),
            context: LogContext::default(),
            location: None,
        }
    }

    pub fn with_context(mut self, context: LogContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn from_log(record: &log::Record<'_>) -> Self {
        let location = SourceLocation {
            module: record.module_path().map(str::to_string),
            file: record.file().map(str::to_string),
            line: record.line(),
        };

        Self {
            timestamp: Utc::now(),
            level: record.level(),
            channel: Channel::from_target(record.target()),
            message: record.args().to_string(),
            context: LogContext::from_key_values(record.key_values()),
            location: Some(location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_targets_fall_back_to_general() {
        assert_eq!(Channel::from_target("chat"), Channel::Chat);
        assert_eq!(Channel::from_target("hyper::client"), Channel::General);
    }

    #[test]
    fn context_is_read_from_log_key_values() {
        let kvs: [(&str, &str); 3] = [
            ("entity_id", "42"),
            ("entity_display_name", "Rust Learners"),
            ("unrelated", "x"),
        ];
        let record = LogRecord::from_log(
            &log::Record::builder()
                .target("chat")
                .level(Level::Info)
                .args(format_args!("hello"))
                .key_values(&kvs)
                .file(Some("src/bot.rs"))
                .line(Some(7))
                .build(),
        );

        assert_eq!(record.channel, Channel::Chat);
        assert_eq!(record.message, "hello");
        assert_eq!(record.context.entity_id.as_deref(), Some("42"));
        assert_eq!(
            record.context.entity_display_name.as_deref(),
            Some("Rust Learners")
        );
        assert_eq!(record.context.actor_name, None);
        assert_eq!(
            record.location.map(|l| l.to_string()).as_deref(),
            Some("src/bot.rs:7")
        );
    }
}
