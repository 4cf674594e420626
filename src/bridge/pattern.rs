//! The `ss/old/new/` edit mini-language.
//!
//! Each line of a command is one replacement. Segments are separated by `/`;
//! a segment ending in a single `\` is joined with the next one by a literal
//! slash. The first segment (`ss`) is the command word and is skipped.

use crate::error::BridgeError;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub find: String,
    pub replace: String,
}

fn command_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*ss/(.+)/(.*)(/)?\s*$").expect("static regex"))
}

fn ref_uri_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\(RefURI:\s<https:.+>\)$").expect("static regex"))
}

/// Whether a message body is an edit command rather than content.
pub fn is_edit_command(text: &str) -> bool {
    text.lines()
        .next()
        .map(|first| command_pattern().is_match(first))
        .unwrap_or(false)
}

/// Parse every non-blank line of a command.
pub fn parse(command: &str) -> Result<Vec<Replacement>, BridgeError> {
    let mut out = Vec::new();
    for line in command.lines().filter(|l| !l.trim().is_empty()) {
        out.push(parse_line(line.trim())?);
    }
    if out.is_empty() {
        return Err(BridgeError::Malformed("empty edit command".into()));
    }
    Ok(out)
}

fn parse_line(line: &str) -> Result<Replacement, BridgeError> {
    let mut segments: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;
    for raw in line.split('/').skip(1) {
        let joined = match pending.take() {
            Some(prefix) => format!("{}/{}", prefix, raw),
            None => raw.to_string(),
        };
        if joined.ends_with('\\') && !joined.ends_with("\\\\") {
            pending = Some(joined[..joined.len() - 1].to_string());
        } else {
            segments.push(joined);
        }
    }
    if let Some(rest) = pending {
        segments.push(rest);
    }

    if segments.len() < 2 {
        return Err(BridgeError::Malformed(format!(
            "edit pattern needs find and replace segments: {:?}",
            line
        )));
    }
    let mut segments = segments.into_iter();
    let find = segments.next().unwrap_or_default();
    let replace = segments.next().unwrap_or_default();
    if find.is_empty() {
        return Err(BridgeError::Malformed("empty find segment".into()));
    }
    Ok(Replacement { find, replace })
}

/// A reply's quote line, either as sent to Discord or entity-escaped on Slack.
fn is_quote_line(line: &str) -> bool {
    line.starts_with("> ") || line.starts_with("&gt; ")
}

/// Apply a command to a mirrored message body. For replies, the leading
/// quote line and the trailing `(RefURI: ...)` line are left alone.
pub fn apply(original: &str, command: &str) -> Result<String, BridgeError> {
    let replacements = parse(command)?;
    let lines: Vec<&str> = original.split('\n').collect();

    let is_reply = lines.len() >= 3
        && is_quote_line(lines[0])
        && lines
            .last()
            .map(|l| ref_uri_pattern().is_match(l))
            .unwrap_or(false);

    let edit = |body: &str| {
        replacements
            .iter()
            .fold(body.to_string(), |acc, r| acc.replace(&r.find, &r.replace))
    };

    if is_reply {
        let body = lines[1..lines.len() - 1].join("\n");
        Ok(format!(
            "{}\n{}\n{}",
            lines[0],
            edit(&body),
            lines[lines.len() - 1]
        ))
    } else {
        Ok(edit(original))
    }
}
