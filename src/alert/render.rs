use crate::logging::{LogRecord, TimeFormatter};

/// Hard cap for a rich alert, a little under the transport's 4096 limit.
pub const MAX_RICH_CHARS: usize = 4090;
/// Cap for the plain fallback payload.
pub const MAX_PLAIN_CHARS: usize = 3800;
pub const TRUNCATION_MARKER: &str = "\n… [truncated]";
pub const FALLBACK_PREFIX: &str = "[FALLBACK] ";

// Header fields are short by nature; the cap keeps a pathological module path
// from eating the message budget.
const FIELD_CAP: usize = 256;
const PRE_OPEN: &str = "<pre>";
const PRE_CLOSE: &str = "</pre>";

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn char_count(text: &str) -> usize {
    text.chars().count()
}

/// Longest prefix of at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Like [`truncate_chars`], but never leaves half an `&...;` entity behind.
fn truncate_escaped(text: &str, max: usize) -> &str {
    let prefix = truncate_chars(text, max);
    if prefix.len() == text.len() {
        return prefix;
    }

    match prefix.rfind('&') {
        Some(amp) if !prefix[amp..].contains(';') => &prefix[..amp],
        _ => prefix,
    }
}

fn capped_field(text: &str) -> String {
    let escaped = escape_html(text);
    truncate_escaped(&escaped, FIELD_CAP).to_string()
}

pub struct AlertRenderer {
    time: TimeFormatter,
}

impl AlertRenderer {
    pub fn new(time: TimeFormatter) -> Self {
        Self { time }
    }

    fn location(record: &LogRecord) -> String {
        record
            .location
            .as_ref()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn entity_line(record: &LogRecord) -> Option<String> {
        let ctx = &record.context;
        if ctx.is_empty() {
            return None;
        }

        Some(format!(
            "{} {} ({}) by {}",
            ctx.entity_kind.as_deref().unwrap_or("N/A"),
            ctx.entity_id.as_deref().unwrap_or("N/A"),
            ctx.entity_display_name.as_deref().unwrap_or("Unknown"),
            ctx.actor_name.as_deref().unwrap_or("Unknown"),
        ))
    }

    /// HTML payload: header block plus the escaped message in a `<pre>`,
    /// never longer than [`MAX_RICH_CHARS`].
    pub fn rich(&self, record: &LogRecord) -> String {
        let mut header = format!(
            "🚨 <b>{}</b> in <code>{}</code>\n<b>Time:</b> {}\n<b>Source:</b> <code>{}</code>\n",
            record.level,
            record.channel,
            capped_field(&self.time.format(record.timestamp)),
            capped_field(&Self::location(record)),
        );
        if let Some(entity) = Self::entity_line(record) {
            header.push_str(&format!("<b>Entity:</b> {}\n", capped_field(&entity)));
        }

        let body = escape_html(&record.message);
        let budget = MAX_RICH_CHARS
            .saturating_sub(char_count(&header))
            .saturating_sub(PRE_OPEN.len() + PRE_CLOSE.len());

        let body = if char_count(&body) > budget {
            let keep = budget.saturating_sub(char_count(TRUNCATION_MARKER));
            format!("{}{}", truncate_escaped(&body, keep), TRUNCATION_MARKER)
        } else {
            body
        };

        format!("{}{}{}{}", header, PRE_OPEN, body, PRE_CLOSE)
    }

    /// Formatting-free payload used once rich delivery has given up.
    pub fn plain(&self, record: &LogRecord) -> String {
        let mut text = format!(
            "{}{} in {} at {} ({})\n",
            FALLBACK_PREFIX,
            record.level,
            record.channel,
            self.time.format(record.timestamp),
            Self::location(record),
        );
        if let Some(entity) = Self::entity_line(record) {
            text.push_str(&format!("entity: {}\n", entity));
        }
        text.push_str(&record.message);

        if char_count(&text) <= MAX_PLAIN_CHARS {
            return text;
        }

        let keep = MAX_PLAIN_CHARS - char_count(TRUNCATION_MARKER);
        format!("{}{}", truncate_chars(&text, keep), TRUNCATION_MARKER)
    }
}
