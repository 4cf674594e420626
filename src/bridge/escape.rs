//! Mention, channel and link translation between the two markup dialects.
//!
//! Slack→Discord output must be reproducible: the finder re-escapes a Slack
//! message and compares it byte-for-byte with Discord history.

use crate::channels::{DiscordTransport, SlackTransport};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

fn slack_user_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<@([A-Z0-9]+)(?:\|[^>]*)?>").expect("static regex"))
}

fn slack_channel_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<#([A-Z0-9]+)\|([^>]*)>").expect("static regex"))
}

fn slack_link_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<((?:https?|mailto):[^|>\s]+)(?:\|([^>]+))?>").expect("static regex"))
}

fn discord_markup_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<@!?(\d+)>|<#(\d+)>|<a?:(\w+):\d+>|<(https?://[^>\s]+)>").expect("static regex")
    })
}

/// Slack markup to Discord markdown.
#[derive(Clone)]
pub struct SlackEscaper {
    slack: Arc<dyn SlackTransport>,
}

impl SlackEscaper {
    pub fn new(slack: Arc<dyn SlackTransport>) -> Self {
        Self { slack }
    }

    pub async fn escape(&self, text: &str) -> String {
        let mut names = HashMap::new();
        for caps in slack_user_pattern().captures_iter(text) {
            let id = caps[1].to_string();
            if names.contains_key(&id) {
                continue;
            }
            let name = match self.slack.user_profile(&id).await {
                Ok(profile) if !profile.name().is_empty() => profile.name().to_string(),
                Ok(_) => id.clone(),
                Err(e) => {
                    tracing::warn!("Failed to resolve Slack user {}: {}", id, e);
                    id.clone()
                }
            };
            names.insert(id, name);
        }
        escape_slack_text(text, &names, &self.slack.workspace_url())
    }
}

/// Pure part of the Slack→Discord translation, given resolved user names.
pub fn escape_slack_text(text: &str, names: &HashMap<String, String>, workspace_url: &str) -> String {
    let text = slack_user_pattern().replace_all(text, |caps: &Captures| {
        let id = &caps[1];
        format!("`@{}`", names.get(id).map(String::as_str).unwrap_or(id))
    });
    let text = slack_channel_pattern().replace_all(&text, |caps: &Captures| {
        format!(
            "`#{}`(URI: <{}archives/{}>)",
            &caps[2],
            workspace_url,
            &caps[1]
        )
    });
    let text = slack_link_pattern().replace_all(&text, |caps: &Captures| {
        let url = &caps[1];
        match caps.get(2).map(|m| m.as_str()) {
            Some(label) if label != url => format!("{}(URI: <{}>)", label, url),
            _ => format!("<{}>", url),
        }
    });
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Discord markdown to Slack markup.
#[derive(Clone)]
pub struct DiscordEscaper {
    discord: Arc<dyn DiscordTransport>,
}

impl DiscordEscaper {
    pub fn new(discord: Arc<dyn DiscordTransport>) -> Self {
        Self { discord }
    }

    pub async fn escape(&self, guild: &str, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in discord_markup_pattern().captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&entity_escape(&text[last..whole.start()]));
            last = whole.end();

            if let Some(user) = caps.get(1) {
                let name = match self.discord.member_name(guild, user.as_str()).await {
                    Ok(name) => name,
                    Err(e) => {
                        tracing::warn!("Failed to resolve Discord member {}: {}", user.as_str(), e);
                        user.as_str().to_string()
                    }
                };
                out.push_str(&format!("`@{}`", entity_escape(&name)));
            } else if let Some(channel) = caps.get(2) {
                let name = self
                    .discord
                    .channel_name(channel.as_str())
                    .await
                    .unwrap_or_else(|_| channel.as_str().to_string());
                out.push_str(&format!(
                    "<https://discord.com/channels/{}/{}|#{}>",
                    guild,
                    channel.as_str(),
                    entity_escape(&name)
                ));
            } else if let Some(emoji) = caps.get(3) {
                out.push_str(&format!(":{}:", emoji.as_str()));
            } else if let Some(url) = caps.get(4) {
                out.push_str(&format!("<{}>", url.as_str()));
            }
        }
        out.push_str(&entity_escape(&text[last..]));
        out
    }
}

fn entity_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDiscord, FakeSlack};

    fn names() -> HashMap<String, String> {
        HashMap::from([("U1".to_string(), "Alice".to_string())])
    }

    #[test]
    fn test_user_mention() {
        assert_eq!(
            escape_slack_text("hello <@U1>", &names(), "https://ws.slack.com/"),
            "hello `@Alice`"
        );
        assert_eq!(
            escape_slack_text("hi <@U2|bob>", &names(), "https://ws.slack.com/"),
            "hi `@U2`"
        );
    }

    #[test]
    fn test_channel_and_links() {
        let out = escape_slack_text(
            "see <#C9|general> and <https://a.example/x|docs> or <https://b.example>",
            &names(),
            "https://ws.slack.com/",
        );
        assert_eq!(
            out,
            "see `#general`(URI: <https://ws.slack.com/archives/C9>) and docs(URI: <https://a.example/x>) or <https://b.example>"
        );
    }

    #[test]
    fn test_label_equal_to_url() {
        let out = escape_slack_text("<https://x.io|https://x.io>", &names(), "");
        assert_eq!(out, "<https://x.io>");
    }

    #[test]
    fn test_unescape_entities() {
        let out = escape_slack_text("a &lt;b&gt; &amp;lt;", &names(), "");
        assert_eq!(out, "a <b> &lt;");
    }

    #[tokio::test]
    async fn test_slack_escaper_resolves_profiles() {
        let slack = Arc::new(FakeSlack::default());
        slack.add_user("U1", "Alice");
        let escaper = SlackEscaper::new(slack);
        assert_eq!(escaper.escape("hello <@U1>").await, "hello `@Alice`");
        assert_eq!(escaper.escape("hello <@U404>").await, "hello `@U404`");
    }

    #[tokio::test]
    async fn test_discord_escaper() {
        let discord = Arc::new(FakeDiscord::default());
        discord.add_member("10", "Bobby");
        discord.add_channel_name("20", "general");
        let escaper = DiscordEscaper::new(discord);
        let out = escaper
            .escape("1", "hey <@!10> in <#20> <:party:99> <a:spin:98> a<b & c>")
            .await;
        assert_eq!(
            out,
            "hey `@Bobby` in <https://discord.com/channels/1/20|#general> :party: :spin: a&lt;b &amp; c&gt;"
        );
    }

    #[tokio::test]
    async fn test_discord_links_survive() {
        let escaper = DiscordEscaper::new(Arc::new(FakeDiscord::default()));
        let out = escaper
            .escape("1", "(RefURI: <https://discord.com/channels/1/2/3>)")
            .await;
        assert_eq!(out, "(RefURI: <https://discord.com/channels/1/2/3>)");
    }
}
