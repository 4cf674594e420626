//! The correlation token: the only durable link between a message and its
//! mirror. It rides along in the Slack-side message text as a link whose label
//! is an invisible glyph:
//!
//! ```text
//! <https://slackcord.invalid/message?ts=<rfc3339>&slack_user_id=<id>&discord_user_id=<id>|ㅤ>
//! ```
//!
//! The timestamp is always the creation time of the Discord-side message of
//! the pair. Field order and keys are fixed for compatibility with existing
//! history.

use crate::error::BridgeError;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};

/// Link target prefix; the timestamp follows directly.
pub const TOKEN_URI: &str = "https://slackcord.invalid/message?ts=";

/// Hangul filler: renders as blank space but keeps the link non-empty.
pub const INVISIBLE_LABEL: &str = "\u{3164}";

const SLACK_USER_KEY: &str = "slack_user_id=";
const DISCORD_USER_KEY: &str = "discord_user_id=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Legacy tokens written with whole seconds.
    Seconds,
    Millis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationToken {
    pub timestamp: DateTime<Utc>,
    pub precision: Precision,
    pub slack_user_id: Option<String>,
    pub discord_user_id: Option<String>,
}

impl CorrelationToken {
    pub fn new(
        timestamp: DateTime<Utc>,
        slack_user_id: Option<&str>,
        discord_user_id: Option<&str>,
    ) -> Self {
        let nanos = timestamp.nanosecond() / 1_000_000 * 1_000_000;
        Self {
            timestamp: timestamp.with_nanosecond(nanos).unwrap_or(timestamp),
            precision: Precision::Millis,
            slack_user_id: slack_user_id.filter(|s| !s.is_empty()).map(str::to_string),
            discord_user_id: discord_user_id.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    /// The text fragment appended to a message.
    pub fn encode(&self) -> String {
        let ts = match self.precision {
            Precision::Millis => self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            Precision::Seconds => self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        format!(
            "<{}{}&{}{}&{}{}|{}>",
            TOKEN_URI,
            ts,
            SLACK_USER_KEY,
            self.slack_user_id.as_deref().unwrap_or(""),
            DISCORD_USER_KEY,
            self.discord_user_id.as_deref().unwrap_or(""),
            INVISIBLE_LABEL
        )
    }

    /// Append the token to visible text.
    pub fn append_to(&self, text: &str) -> String {
        if text.is_empty() {
            self.encode()
        } else {
            format!("{} {}", text, self.encode())
        }
    }

    /// Find and decode the token in `text`.
    ///
    /// `Ok(None)` when no marker is present. A marker with an unreadable
    /// timestamp is `Malformed`.
    pub fn parse(text: &str) -> Result<Option<Self>, BridgeError> {
        let Some((_, fragment)) = split(text) else {
            return Ok(None);
        };
        let payload = fragment
            .trim_start_matches('<')
            .trim_start_matches(TOKEN_URI)
            .replace("&amp;", "&");
        let payload = payload
            .split(['|', '>'])
            .next()
            .unwrap_or_default();

        let mut fields = payload.split('&');
        let ts = fields.next().unwrap_or_default();
        let (timestamp, precision) = parse_timestamp(ts)?;

        let mut token = Self {
            timestamp,
            precision,
            slack_user_id: None,
            discord_user_id: None,
        };
        for field in fields {
            if let Some(v) = field.strip_prefix(SLACK_USER_KEY) {
                token.slack_user_id = Some(v.to_string()).filter(|s| !s.is_empty());
            } else if let Some(v) = field.strip_prefix(DISCORD_USER_KEY) {
                token.discord_user_id = Some(v.to_string()).filter(|s| !s.is_empty());
            }
        }
        Ok(Some(token))
    }

    /// Whether a message created at `time` is the one this token points at.
    pub fn covers(&self, time: DateTime<Utc>) -> bool {
        let truncated = match self.precision {
            Precision::Seconds => time.with_nanosecond(0),
            Precision::Millis => time.with_nanosecond(time.nanosecond() / 1_000_000 * 1_000_000),
        };
        truncated == Some(self.timestamp)
    }
}

fn parse_timestamp(ts: &str) -> Result<(DateTime<Utc>, Precision), BridgeError> {
    let parsed = DateTime::parse_from_rfc3339(ts)
        .map_err(|e| BridgeError::Malformed(format!("token timestamp {:?}: {}", ts, e)))?
        .with_timezone(&Utc);
    let has_fraction = ts
        .split_once('T')
        .map(|(_, time)| time.contains('.'))
        .unwrap_or(false);
    if has_fraction {
        let nanos = parsed.nanosecond() / 1_000_000 * 1_000_000;
        Ok((parsed.with_nanosecond(nanos).unwrap_or(parsed), Precision::Millis))
    } else {
        Ok((parsed, Precision::Seconds))
    }
}

/// Split text at the last token marker: `(visible text, token fragment)`.
pub fn split(text: &str) -> Option<(&str, &str)> {
    let marker = format!("<{}", TOKEN_URI);
    let idx = text.rfind(&marker)?;
    Some((text[..idx].trim_end(), &text[idx..]))
}

/// Text with any token removed.
pub fn visible_text(text: &str) -> &str {
    split(text).map(|(visible, _)| visible).unwrap_or(text)
}
