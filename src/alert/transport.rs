use std::{fmt::Display, str::FromStr};

use async_trait::async_trait;

/// Where alerts go: a channel id with an optional numeric thread id,
/// written as `<channel-id>` or `<channel-id>:<thread-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub channel_id: String,
    pub thread_id: Option<i64>,
}

impl FromStr for Destination {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (channel_id, thread_id) = match s.split_once(':') {
            Some((channel, thread)) => {
                let thread = thread
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| eyre::eyre!("thread id '{}' in destination is not numeric", thread))?;
                (channel.trim(), Some(thread))
            }
            None => (s, None),
        };

        if channel_id.is_empty() {
            return Err(eyre::eyre!("destination has an empty channel id"));
        }

        Ok(Self {
            channel_id: channel_id.to_string(),
            thread_id,
        })
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.thread_id {
            Some(thread) => write!(f, "{}:{}", self.channel_id, thread),
            None => f.write_str(&self.channel_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Html,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub format: MessageFormat,
}

impl OutboundMessage {
    pub fn html(text: String) -> Self {
        Self {
            text,
            format: MessageFormat::Html,
        }
    }

    pub fn plain(text: String) -> Self {
        Self {
            text,
            format: MessageFormat::Plain,
        }
    }
}

/// Network client the alert worker delivers through.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Cheap call proving credentials and connectivity.
    async fn verify(&self) -> eyre::Result<()>;

    async fn send(&self, destination: &Destination, message: &OutboundMessage) -> eyre::Result<()>;
}
