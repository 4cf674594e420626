//! Locating the mirror of a message on the other platform.
//!
//! There is no shared id namespace, so the lookup reads the correlation token
//! out of the Slack-side text and searches Discord history around its
//! timestamp. Messages without a token fall back to an exact text match.

use crate::bridge::escape::SlackEscaper;
use crate::bridge::relay::slack_mirror_content;
use crate::bridge::token::{self, CorrelationToken};
use crate::channels::{snowflake_at, DiscordMessage, DiscordTransport, SlackMessage, SlackTransport};
use crate::error::BridgeError;
use std::sync::Arc;
use std::time::Duration;

/// A located mirror together with the token that led to it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Counterpart<M> {
    pub message: M,
    pub token: Option<CorrelationToken>,
}

/// Slack→Discord resolution attempts, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Token,
    ExactText,
}

const FORWARD_STRATEGIES: [Strategy; 2] = [Strategy::Token, Strategy::ExactText];

#[derive(Clone)]
pub struct MessageFinder {
    slack: Arc<dyn SlackTransport>,
    discord: Arc<dyn DiscordTransport>,
    escaper: SlackEscaper,
    history_limit: u8,
    fallback_window: chrono::Duration,
}

impl MessageFinder {
    pub fn new(
        slack: Arc<dyn SlackTransport>,
        discord: Arc<dyn DiscordTransport>,
        history_limit: u8,
        fallback_window: Duration,
    ) -> Self {
        Self {
            escaper: SlackEscaper::new(slack.clone()),
            slack,
            discord,
            history_limit: history_limit.max(1),
            fallback_window: chrono::Duration::from_std(fallback_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
        }
    }

    /// The Discord message mirroring (or mirrored by) a Slack message.
    pub async fn find_from_slack(
        &self,
        source: &SlackMessage,
        discord_channel: &str,
    ) -> Result<Counterpart<DiscordMessage>, BridgeError> {
        let token = match CorrelationToken::parse(&source.text) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Ignoring unreadable token on {}/{}: {}", source.channel, source.ts, e);
                None
            }
        };

        for strategy in FORWARD_STRATEGIES {
            let found = match (strategy, &token) {
                (Strategy::Token, Some(token)) => self.by_token(token, discord_channel).await?,
                (Strategy::Token, None) => None,
                (Strategy::ExactText, _) => self.by_text(source, discord_channel).await?,
            };
            if let Some(message) = found {
                tracing::debug!(
                    "Slack {}/{} -> Discord {} via {:?}",
                    source.channel,
                    source.ts,
                    message.id,
                    strategy
                );
                return Ok(Counterpart { message, token });
            }
        }

        Err(BridgeError::MessageNotFound(format!(
            "no Discord mirror of Slack message {}/{} in {}",
            source.channel, source.ts, discord_channel
        )))
    }

    /// Scan newest-first for the first message older than the token; the one
    /// just before it in the scan is the mirror.
    async fn by_token(
        &self,
        token: &CorrelationToken,
        channel: &str,
    ) -> Result<Option<DiscordMessage>, BridgeError> {
        let around = snowflake_at(token.timestamp);
        let mut messages = self
            .discord
            .list_recent(channel, Some(&around), self.history_limit)
            .await?;
        sort_newest_first(&mut messages);
        Ok(pick_by_token(&messages, token).cloned())
    }

    async fn by_text(
        &self,
        source: &SlackMessage,
        channel: &str,
    ) -> Result<Option<DiscordMessage>, BridgeError> {
        let visible = token::visible_text(&source.text);
        let expected = slack_mirror_content(self.escaper.escape(visible).await, &source.files);
        if expected.trim().is_empty() {
            return Ok(None);
        }
        let source_time = source.time();
        let around = source_time.map(snowflake_at);
        let messages = self
            .discord
            .list_recent(channel, around.as_deref(), self.history_limit)
            .await?;

        let best = messages
            .into_iter()
            .filter(|m| m.content == expected)
            .filter_map(|m| match source_time {
                Some(t) => {
                    let distance = (m.timestamp - t).abs();
                    (distance <= self.fallback_window).then_some((distance, m))
                }
                None => Some((chrono::Duration::zero(), m)),
            })
            .min_by(|(a, ma), (b, mb)| a.cmp(b).then_with(|| ma.id.cmp(&mb.id)))
            .map(|(_, m)| m);
        Ok(best)
    }

    /// The Slack message carrying a token for a Discord message.
    pub async fn find_from_discord(
        &self,
        source: &DiscordMessage,
        slack_channel: &str,
    ) -> Result<Counterpart<SlackMessage>, BridgeError> {
        let messages = self.slack.list_recent(slack_channel, self.history_limit).await?;
        for message in messages {
            if let Ok(Some(token)) = CorrelationToken::parse(&message.text) {
                if token.covers(source.timestamp) {
                    return Ok(Counterpart {
                        message,
                        token: Some(token),
                    });
                }
            }
        }
        Err(BridgeError::MessageNotFound(format!(
            "no Slack mirror of Discord message {}/{} in {}",
            source.channel_id, source.id, slack_channel
        )))
    }
}

fn sort_newest_first(messages: &mut [DiscordMessage]) {
    messages.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.id.len().cmp(&a.id.len()))
            .then_with(|| b.id.cmp(&a.id))
    });
}

fn pick_by_token<'a>(
    newest_first: &'a [DiscordMessage],
    token: &CorrelationToken,
) -> Option<&'a DiscordMessage> {
    let candidate = match newest_first
        .iter()
        .position(|m| m.timestamp < token.timestamp)
    {
        Some(0) => None,
        Some(i) => newest_first.get(i - 1),
        // Nothing older was listed: the oldest message may still be the mirror.
        None => newest_first.last(),
    };
    candidate.filter(|m| token.covers(m.timestamp))
}
