//! Relaying new messages and `ss/old/new/` edits between the platforms.

use crate::bridge::escape::{DiscordEscaper, SlackEscaper};
use crate::bridge::finder::MessageFinder;
use crate::bridge::pattern;
use crate::bridge::token::{self, CorrelationToken};
use crate::channels::{
    Block, DiscordAttachment, DiscordMessage, DiscordTransport, OutgoingFile, RemoteFile,
    SlackFile, SlackMessage, SlackPost, SlackTransport, SlackUserProfile, WebhookMessage,
};
use crate::error::BridgeError;
use crate::identity::IdentityLinker;
use crate::settings::{ChannelRouter, Route};
use serde::Serialize;
use std::sync::Arc;

/// Why an event produced no mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    NoRoute,
    DirectionDisabled,
    OwnMessage,
    Muted,
    ControlSubtype,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Mirrored; `mirror_id` is the Discord message id or Slack `ts`.
    Relayed { mirror_id: String, reposted: bool },
    /// An edit command was applied to an earlier relayed message.
    Edited { message_id: String },
    Dropped(DropReason),
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Prefix of remote file external ids.
    pub program_name: String,
    /// Replace Discord originals with a webhook repost.
    pub repost_discord: bool,
}

/// Webhook display name carrying the author's primary id: `name(primary)`.
pub fn webhook_username(name: &str, primary_id: &str) -> String {
    format!("{}({})", name, primary_id)
}

/// The primary id out of a webhook display name.
pub fn parse_webhook_username(username: &str) -> Option<&str> {
    let inner = username.strip_suffix(')')?;
    let (_, id) = inner.rsplit_once('(')?;
    (!id.is_empty()).then_some(id)
}

/// A reply quotes the first line of its target and links back to it.
pub fn reply_body(guild: &str, source: &DiscordMessage) -> String {
    let Some(reference) = source.referenced.as_deref() else {
        return source.content.clone();
    };
    let mut lines = reference.content.split('\n');
    let first = lines.next().unwrap_or_default();
    let quote = if lines.next().is_some() {
        format!("{}...", first)
    } else {
        first.to_string()
    };
    format!(
        "> {}\n{}\n(RefURI: <https://discord.com/channels/{}/{}/{}>)",
        quote, source.content, guild, reference.channel_id, reference.id
    )
}

/// The Discord body of a Slack message: the escaped text, then one permalink
/// line per non-image file.
pub fn slack_mirror_content(escaped: String, files: &[SlackFile]) -> String {
    files
        .iter()
        .filter(|f| !f.is_image())
        .fold(escaped, |mut content, file| {
            content.push('\n');
            content.push_str(&file.permalink);
            content
        })
}

fn extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct MessageRelay {
    slack: Arc<dyn SlackTransport>,
    discord: Arc<dyn DiscordTransport>,
    router: Arc<dyn ChannelRouter>,
    identity: Arc<dyn IdentityLinker>,
    finder: MessageFinder,
    slack_escaper: SlackEscaper,
    discord_escaper: DiscordEscaper,
    options: RelayOptions,
}

impl MessageRelay {
    pub fn new(
        slack: Arc<dyn SlackTransport>,
        discord: Arc<dyn DiscordTransport>,
        router: Arc<dyn ChannelRouter>,
        identity: Arc<dyn IdentityLinker>,
        finder: MessageFinder,
        options: RelayOptions,
    ) -> Self {
        Self {
            slack_escaper: SlackEscaper::new(slack.clone()),
            discord_escaper: DiscordEscaper::new(discord.clone()),
            slack,
            discord,
            router,
            identity,
            finder,
            options,
        }
    }

    // -----------------------------------------------------------------------
    // Slack -> Discord
    // -----------------------------------------------------------------------

    pub async fn relay_from_slack(&self, source: &SlackMessage) -> Result<RelayOutcome, BridgeError> {
        let Some(route) = self.router.find_discord_channel(&source.channel).await else {
            return Ok(RelayOutcome::Dropped(DropReason::NoRoute));
        };
        if !route.setting.slack_to_discord {
            return Ok(RelayOutcome::Dropped(DropReason::DirectionDisabled));
        }
        if source.bot_id.is_some() {
            return Ok(RelayOutcome::Dropped(DropReason::OwnMessage));
        }
        let Some(user) = source.user.as_deref() else {
            return Ok(RelayOutcome::Dropped(DropReason::ControlSubtype));
        };
        if route.is_muted(user) {
            return Ok(RelayOutcome::Dropped(DropReason::Muted));
        }
        match source.subtype.as_deref() {
            None | Some("file_share") | Some("thread_broadcast") => {}
            Some(_) => return Ok(RelayOutcome::Dropped(DropReason::ControlSubtype)),
        }

        let visible = token::visible_text(&source.text);
        let (images, others): (Vec<&SlackFile>, Vec<&SlackFile>) =
            source.files.iter().partition(|f| f.is_image());
        if visible.trim().is_empty() && source.files.is_empty() {
            return Ok(RelayOutcome::Dropped(DropReason::Empty));
        }

        let mut uploads = Vec::new();
        for file in &images {
            match self.slack.fetch_file(&file.url_private).await {
                Ok(data) => uploads.push(OutgoingFile::new(file.name.clone(), data)),
                Err(e) => tracing::warn!("Skipping Slack image {}: {}", file.name, e),
            }
        }

        let content = slack_mirror_content(self.slack_escaper.escape(visible).await, &source.files);

        let profile = self.slack.user_profile(user).await?;
        let mirror = self
            .discord
            .send(
                &route.discord_channel,
                WebhookMessage {
                    content,
                    username: Some(profile.name().to_string()),
                    avatar_url: profile.image_url.clone(),
                    files: uploads,
                    ..Default::default()
                },
                true,
            )
            .await?
            .ok_or_else(|| BridgeError::discord("webhook send returned no message"))?;
        tracing::info!(
            "Relayed Slack {}/{} to Discord {}",
            source.channel,
            source.ts,
            mirror.id
        );

        let mut reposted = false;
        if self.slack.has_user_token() {
            match self.repost_on_slack(source, user, &profile, &others, &mirror).await {
                Ok(()) => reposted = true,
                Err(e) => tracing::warn!(
                    "Failed to repost Slack {}/{}, keeping the original: {}",
                    source.channel,
                    source.ts,
                    e
                ),
            }
        }
        Ok(RelayOutcome::Relayed {
            mirror_id: mirror.id,
            reposted,
        })
    }

    /// Replace the Slack original with a bot post carrying the correlation
    /// token. The original is deleted only once the repost exists.
    async fn repost_on_slack(
        &self,
        source: &SlackMessage,
        user: &str,
        profile: &SlackUserProfile,
        others: &[&SlackFile],
        mirror: &DiscordMessage,
    ) -> Result<(), BridgeError> {
        let visible = token::visible_text(&source.text);
        let mut blocks: Vec<Block> = mirror
            .attachments
            .iter()
            .map(|a| Block::image(a.url.clone(), a.filename.clone(), Some(a.filename.clone())))
            .collect();

        for file in others {
            let external_id = format!("{}:{}", self.options.program_name, file.id);
            let registered = self
                .slack
                .files_remote_add(RemoteFile {
                    external_id: external_id.clone(),
                    external_url: file.permalink.clone(),
                    title: file.name.clone(),
                    filetype: file.filetype.clone(),
                })
                .await;
            match registered {
                Ok(()) => blocks.push(Block::remote_file(external_id)),
                Err(e) => tracing::warn!("Failed to register remote file {}: {}", file.name, e),
            }
        }
        if !blocks.is_empty() && !visible.is_empty() {
            blocks.insert(0, Block::section(visible));
        }

        let token = CorrelationToken::new(mirror.timestamp, Some(user), None);
        self.slack
            .send(SlackPost {
                channel: source.channel.clone(),
                text: token.append_to(visible),
                blocks,
                username: Some(profile.name().to_string()),
                icon_url: profile.image_url.clone(),
                icon_emoji: None,
            })
            .await?;

        if let Err(e) = self.slack.delete(&source.channel, &source.ts, true).await {
            tracing::warn!(
                "Repost of Slack {}/{} sent but the original could not be deleted: {}",
                source.channel,
                source.ts,
                e
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Discord -> Slack
    // -----------------------------------------------------------------------

    pub async fn relay_from_discord(&self, source: &DiscordMessage) -> Result<RelayOutcome, BridgeError> {
        let Some(guild) = source.guild_id.as_deref() else {
            return Ok(RelayOutcome::Dropped(DropReason::NoRoute));
        };
        if source.author.bot || source.webhook_id.is_some() {
            return Ok(RelayOutcome::Dropped(DropReason::OwnMessage));
        }
        let Some(route) = self.router.find_slack_channel(&source.channel_id, guild).await else {
            return Ok(RelayOutcome::Dropped(DropReason::NoRoute));
        };
        if !route.setting.discord_to_slack {
            return Ok(RelayOutcome::Dropped(DropReason::DirectionDisabled));
        }
        if route.is_muted(&source.author.id) {
            return Ok(RelayOutcome::Dropped(DropReason::Muted));
        }

        if let Some(target) = source.referenced.as_deref() {
            if pattern::is_edit_command(&source.content) {
                match self.relay_edit(source, target, &route).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(e @ (BridgeError::Unauthorized(_) | BridgeError::Malformed(_))) => {
                        tracing::info!("Edit command {} not applied, relaying it as text: {}", source.id, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if source.content.trim().is_empty() && source.attachments.is_empty() {
            return Ok(RelayOutcome::Dropped(DropReason::Empty));
        }

        let name = source.author.display_name().to_string();
        let body = reply_body(guild, source);
        let repost = if self.options.repost_discord {
            self.repost_on_discord(source, &name, &body).await
        } else {
            None
        };
        let anchor = repost.as_ref().unwrap_or(source);

        let mut visible = self.discord_escaper.escape(guild, &body).await;
        if route.setting.show_channel_name {
            let channel_name = self
                .discord
                .channel_name(&source.channel_id)
                .await
                .unwrap_or_else(|_| source.channel_id.clone());
            visible = format!("`#{}` {}", channel_name, visible);
        }

        let (images, others): (Vec<&DiscordAttachment>, Vec<&DiscordAttachment>) =
            anchor.attachments.iter().partition(|a| a.is_image());
        let mut text = visible.clone();
        for attachment in &others {
            text.push('\n');
            text.push_str(&attachment.url);
        }

        let mut blocks: Vec<Block> = images
            .iter()
            .map(|a| Block::image(a.url.clone(), a.filename.clone(), Some(a.filename.clone())))
            .collect();
        for attachment in &others {
            let external_id = format!(
                "{}:{}/{}",
                self.options.program_name, anchor.channel_id, attachment.id
            );
            let registered = self
                .slack
                .files_remote_add(RemoteFile {
                    external_id: external_id.clone(),
                    external_url: attachment.url.clone(),
                    title: attachment.filename.clone(),
                    filetype: extension(&attachment.filename),
                })
                .await;
            match registered {
                Ok(()) => blocks.push(Block::remote_file(external_id)),
                Err(e) => tracing::warn!("Failed to register remote file {}: {}", attachment.filename, e),
            }
        }
        if !blocks.is_empty() && !visible.trim().is_empty() {
            blocks.insert(0, Block::section(visible.clone()));
        }

        let token = CorrelationToken::new(anchor.timestamp, None, Some(&source.author.id));
        let sent = self
            .slack
            .send(SlackPost {
                channel: route.slack_channel.clone(),
                text: token.append_to(&text),
                blocks,
                username: Some(name),
                icon_url: source.author.avatar_url.clone(),
                icon_emoji: None,
            })
            .await;

        let ts = match sent {
            Ok(ts) => ts,
            Err(e) => {
                // Without a Slack mirror the repost would be a duplicate.
                if let Some(repost) = &repost {
                    if let Err(del) = self.discord.delete(&source.channel_id, &repost.id).await {
                        tracing::warn!("Failed to remove repost {}: {}", repost.id, del);
                    }
                }
                return Err(e);
            }
        };
        tracing::info!(
            "Relayed Discord {}/{} to Slack {}/{}",
            source.channel_id,
            source.id,
            route.slack_channel,
            ts
        );

        if repost.is_some() {
            if let Err(e) = self.discord.delete(&source.channel_id, &source.id).await {
                tracing::warn!("Failed to delete reposted Discord message {}: {}", source.id, e);
            }
        }
        Ok(RelayOutcome::Relayed {
            mirror_id: ts,
            reposted: repost.is_some(),
        })
    }

    /// Re-send a Discord message through the channel webhook under
    /// `name(primary id)`. `None` when any step fails; the original stays.
    async fn repost_on_discord(&self, source: &DiscordMessage, name: &str, body: &str) -> Option<DiscordMessage> {
        let primary = match self.identity.resolve_owner_id(&source.author.id).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Identity lookup for {} failed: {}", source.author.id, e);
                source.author.id.clone()
            }
        };

        let mut files = Vec::with_capacity(source.attachments.len());
        for attachment in &source.attachments {
            match self.discord.fetch_attachment(&attachment.url).await {
                Ok(data) => files.push(OutgoingFile::new(attachment.filename.clone(), data)),
                Err(e) => {
                    tracing::warn!("Not reposting {}: attachment {} unavailable: {}", source.id, attachment.filename, e);
                    return None;
                }
            }
        }

        let sent = self
            .discord
            .send(
                &source.channel_id,
                WebhookMessage {
                    content: body.to_string(),
                    username: Some(webhook_username(name, &primary)),
                    avatar_url: source.author.avatar_url.clone(),
                    files,
                    ..Default::default()
                },
                true,
            )
            .await;
        match sent {
            Ok(Some(repost)) => Some(repost),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to repost Discord message {}: {}", source.id, e);
                None
            }
        }
    }

    /// Apply an `ss/old/new/` reply to the relayed message it answers.
    ///
    /// Only the person owning the target (by primary id) may edit it.
    pub async fn relay_edit(
        &self,
        command: &DiscordMessage,
        target: &DiscordMessage,
        route: &Route,
    ) -> Result<RelayOutcome, BridgeError> {
        let owner = target
            .webhook_id
            .as_ref()
            .and_then(|_| parse_webhook_username(&target.author.username))
            .ok_or_else(|| BridgeError::Unauthorized(format!("{} is not a relayed message", target.id)))?;
        let claimed = self
            .identity
            .resolve_owner_id(&command.author.id)
            .await
            .map_err(|e| BridgeError::Unauthorized(format!("identity lookup failed: {}", e)))?;
        if claimed != owner {
            return Err(BridgeError::Unauthorized(format!(
                "{} may not edit a message of {}",
                command.author.id, owner
            )));
        }

        let content = pattern::apply(&target.content, &command.content)?;
        let edited = self
            .discord
            .edit(
                &target.channel_id,
                &target.id,
                WebhookMessage {
                    content,
                    keep_attachments: target.attachments.iter().map(|a| a.id.clone()).collect(),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!("Applied edit {} to {}", command.id, edited.id);

        if let Err(e) = self.discord.delete(&command.channel_id, &command.id).await {
            tracing::warn!("Failed to delete edit command {}: {}", command.id, e);
        }
        if let Err(e) = self.edit_slack_mirror(target, &command.content, route).await {
            tracing::warn!("Slack mirror of {} not edited: {}", target.id, e);
        }
        Ok(RelayOutcome::Edited {
            message_id: edited.id,
        })
    }

    async fn edit_slack_mirror(&self, target: &DiscordMessage, command: &str, route: &Route) -> Result<(), BridgeError> {
        let counterpart = self.finder.find_from_discord(target, &route.slack_channel).await?;
        let mirror = counterpart.message;
        let Some(token) = counterpart.token else {
            return Err(BridgeError::MessageNotFound(format!("{} carries no token", mirror.ts)));
        };

        let text = token.append_to(&pattern::apply(token::visible_text(&mirror.text), command)?);
        let blocks: Vec<Block> = mirror
            .blocks
            .iter()
            .map(|block| match block {
                Block::Section(section) => {
                    let mut section = section.clone();
                    if let Ok(edited) = pattern::apply(&section.text.text, command) {
                        section.text.text = edited;
                    }
                    Block::Section(section)
                }
                other => other.clone(),
            })
            .collect();
        self.slack
            .update(&route.slack_channel, &mirror.ts, &text, &blocks)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{DiscordAuthor, SlackFile};
    use crate::settings::{MutedUser, SendSetting};
    use crate::testing::{both_ways, discord_message, store, FakeDiscord, FakeIdentity, FakeSlack};
    use std::time::Duration;

    struct Fixture {
        slack: Arc<FakeSlack>,
        discord: Arc<FakeDiscord>,
        identity: Arc<FakeIdentity>,
        relay: MessageRelay,
    }

    fn fixture_with(setting: SendSetting, repost_discord: bool) -> Fixture {
        let slack = Arc::new(FakeSlack::default());
        let discord = Arc::new(FakeDiscord::default());
        let identity = Arc::new(FakeIdentity::default());
        let finder = MessageFinder::new(slack.clone(), discord.clone(), 100, Duration::from_secs(600));
        let relay = MessageRelay::new(
            slack.clone(),
            discord.clone(),
            store("G", "C", "D", setting),
            identity.clone(),
            finder,
            RelayOptions {
                program_name: "slackcord".into(),
                repost_discord,
            },
        );
        Fixture {
            slack,
            discord,
            identity,
            relay,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(both_ways(), true)
    }

    fn slack_message(user: &str, text: &str) -> SlackMessage {
        SlackMessage {
            channel: "C".into(),
            ts: "1700000000.000100".into(),
            user: Some(user.into()),
            text: text.into(),
            ..Default::default()
        }
    }

    fn discord_source(content: &str) -> DiscordMessage {
        let mut message = discord_message("D", "9000", 9_000, content);
        message.guild_id = Some("G".into());
        message.author = DiscordAuthor {
            id: "42".into(),
            username: "bob".into(),
            nick: Some("Bobby".into()),
            avatar_url: Some("https://cdn.discord.test/avatar.png".into()),
            bot: false,
        };
        message
    }

    #[test]
    fn test_webhook_username() {
        assert_eq!(webhook_username("Bobby", "p-1"), "Bobby(p-1)");
        assert_eq!(parse_webhook_username("Bobby(p-1)"), Some("p-1"));
        assert_eq!(parse_webhook_username("a (b)(p-2)"), Some("p-2"));
        assert_eq!(parse_webhook_username("Bobby"), None);
        assert_eq!(parse_webhook_username("Bobby()"), None);
    }

    #[test]
    fn test_reply_body() {
        let mut reply = discord_source("me too");
        let mut target = discord_message("D", "8000", 8_000, "first line\nsecond line");
        target.channel_id = "D".into();
        reply.referenced = Some(Box::new(target));
        assert_eq!(
            reply_body("G", &reply),
            "> first line...\nme too\n(RefURI: <https://discord.com/channels/G/D/8000>)"
        );
    }

    #[tokio::test]
    async fn test_slack_mentions_are_escaped() {
        let f = fixture();
        f.slack.add_user("U1", "Alice");
        f.slack.add_user("U2", "Carol");

        let outcome = f
            .relay
            .relay_from_slack(&slack_message("U2", "hello <@U1>"))
            .await
            .unwrap();
        assert!(matches!(outcome, RelayOutcome::Relayed { reposted: false, .. }));

        let (channel, sent) = f.discord.sent().pop().unwrap();
        assert_eq!(channel, "D");
        assert_eq!(sent.content, "hello `@Alice`");
        assert_eq!(sent.username.as_deref(), Some("Carol"));
    }

    #[tokio::test]
    async fn test_slack_drops() {
        let mut setting = both_ways();
        setting.mute_users = vec![MutedUser {
            id: "U9".into(),
            nick_name: "noisy".into(),
        }];
        let f = fixture_with(setting, false);
        f.slack.add_user("U2", "Carol");

        let muted = f.relay.relay_from_slack(&slack_message("U9", "hi")).await.unwrap();
        assert_eq!(muted, RelayOutcome::Dropped(DropReason::Muted));

        let mut bot = slack_message("U2", "hi");
        bot.bot_id = Some("B1".into());
        let own = f.relay.relay_from_slack(&bot).await.unwrap();
        assert_eq!(own, RelayOutcome::Dropped(DropReason::OwnMessage));

        let mut deleted = slack_message("U2", "hi");
        deleted.subtype = Some("message_deleted".into());
        let control = f.relay.relay_from_slack(&deleted).await.unwrap();
        assert_eq!(control, RelayOutcome::Dropped(DropReason::ControlSubtype));

        let mut elsewhere = slack_message("U2", "hi");
        elsewhere.channel = "C-unmapped".into();
        let unrouted = f.relay.relay_from_slack(&elsewhere).await.unwrap();
        assert_eq!(unrouted, RelayOutcome::Dropped(DropReason::NoRoute));

        assert!(f.discord.sent().is_empty());
    }

    #[tokio::test]
    async fn test_thread_broadcast_is_relayed() {
        let f = fixture_with(both_ways(), false);
        f.slack.add_user("U2", "Carol");
        let mut broadcast = slack_message("U2", "also in channel");
        broadcast.subtype = Some("thread_broadcast".into());

        let outcome = f.relay.relay_from_slack(&broadcast).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Relayed { .. }));
        let (_, sent) = f.discord.sent().pop().unwrap();
        assert_eq!(sent.content, "also in channel");
    }

    #[tokio::test]
    async fn test_slack_repost_replaces_original_after_send() {
        let f = fixture();
        f.slack.add_user("U2", "Carol");
        f.slack.set_user_token(true);
        f.slack.set_file("https://files.slack.test/cat.png", vec![1, 2, 3]);

        let original_ts = f.slack.post_text("C", "look");
        let mut source = f.slack.get_message("C", &original_ts).await.unwrap();
        source.user = Some("U2".into());
        source.bot_id = None;
        source.subtype = Some("file_share".into());
        source.files = vec![
            SlackFile {
                id: "F1".into(),
                name: "cat.png".into(),
                filetype: "png".into(),
                url_private: "https://files.slack.test/cat.png".into(),
                permalink: "https://example.slack.com/files/F1".into(),
            },
            SlackFile {
                id: "F2".into(),
                name: "notes.pdf".into(),
                filetype: "pdf".into(),
                url_private: "https://files.slack.test/notes.pdf".into(),
                permalink: "https://example.slack.com/files/F2".into(),
            },
        ];

        let outcome = f.relay.relay_from_slack(&source).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Relayed { reposted: true, .. }));

        let (_, sent) = f.discord.sent().pop().unwrap();
        assert_eq!(sent.content, "look\nhttps://example.slack.com/files/F2");
        assert_eq!(sent.files.len(), 1);
        assert_eq!(sent.files[0].data, vec![1, 2, 3]);

        let mirror = f.discord.all_messages("D").pop().unwrap();
        let repost = f.slack.posts().pop().unwrap();
        let token = CorrelationToken::parse(&repost.text).unwrap().unwrap();
        assert!(token.covers(mirror.timestamp));
        assert_eq!(token.slack_user_id.as_deref(), Some("U2"));
        assert_eq!(repost.username.as_deref(), Some("Carol"));
        assert_eq!(repost.blocks[0], Block::section("look"));
        assert_eq!(
            repost.blocks[1],
            Block::image(mirror.attachments[0].url.clone(), "cat.png", Some("cat.png".into()))
        );
        assert_eq!(repost.blocks[2], Block::remote_file("slackcord:F2"));

        let calls = f.slack.calls();
        let send_at = calls.iter().rposition(|c| c.starts_with("send")).unwrap();
        let delete_at = calls.iter().position(|c| c == &format!("delete C {}", original_ts)).unwrap();
        assert!(send_at < delete_at);
    }

    #[tokio::test]
    async fn test_slack_repost_failure_keeps_original() {
        let f = fixture();
        f.slack.add_user("U2", "Carol");
        f.slack.set_user_token(true);
        f.slack.fail_sends(true);

        let outcome = f.relay.relay_from_slack(&slack_message("U2", "hi")).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Relayed { reposted: false, .. }));
        assert!(f.slack.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_discord_repost_and_mirror() {
        let f = fixture();
        f.identity.link("42", "p-1");
        let mut source = discord_source("hi <@7>");
        source.attachments = vec![DiscordAttachment {
            id: "1".into(),
            url: "https://cdn.discord.test/D/1/pic.png".into(),
            filename: "pic.png".into(),
            size: 10,
        }];
        f.discord.push(source.clone());
        f.discord.add_member("7", "Eve");

        let outcome = f.relay.relay_from_discord(&source).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Relayed { reposted: true, .. }));

        let (_, repost) = f.discord.sent().pop().unwrap();
        assert_eq!(repost.username.as_deref(), Some("Bobby(p-1)"));
        assert_eq!(repost.content, "hi <@7>");
        assert_eq!(repost.files.len(), 1);

        let repost_message = f.discord.all_messages("D").pop().unwrap();
        let post = f.slack.posts().pop().unwrap();
        let token = CorrelationToken::parse(&post.text).unwrap().unwrap();
        assert!(token.covers(repost_message.timestamp));
        assert_eq!(token.discord_user_id.as_deref(), Some("42"));
        assert_eq!(token::visible_text(&post.text), "hi `@Eve`");
        assert_eq!(post.blocks[0], Block::section("hi `@Eve`"));
        assert!(matches!(&post.blocks[1], Block::Image(i) if i.image_url == repost_message.attachments[0].url));

        // The original goes only after the Slack mirror exists.
        assert_eq!(f.discord.deleted(), vec![("D".to_string(), "9000".to_string())]);
        assert!(f.discord.message("D", "9000").is_none());
    }

    #[tokio::test]
    async fn test_discord_slack_failure_removes_repost() {
        let f = fixture();
        let source = discord_source("hi");
        f.discord.push(source.clone());
        f.slack.fail_sends(true);

        assert!(f.relay.relay_from_discord(&source).await.is_err());
        let deleted = f.discord.deleted();
        assert_eq!(deleted.len(), 1);
        assert_ne!(deleted[0].1, "9000");
        assert!(f.discord.message("D", "9000").is_some());
    }

    #[tokio::test]
    async fn test_discord_without_repost_keeps_original() {
        let f = fixture_with(both_ways(), false);
        let source = discord_source("plain");
        f.discord.push(source.clone());

        f.relay.relay_from_discord(&source).await.unwrap();
        assert!(f.discord.sent().is_empty());
        assert!(f.discord.deleted().is_empty());
        let post = f.slack.posts().pop().unwrap();
        let token = CorrelationToken::parse(&post.text).unwrap().unwrap();
        assert!(token.covers(source.timestamp));
        assert_eq!(post.username.as_deref(), Some("Bobby"));
    }

    #[tokio::test]
    async fn test_show_channel_name() {
        let mut setting = both_ways();
        setting.show_channel_name = true;
        let f = fixture_with(setting, false);
        f.discord.add_channel_name("D", "general");
        let source = discord_source("a < b");

        f.relay.relay_from_discord(&source).await.unwrap();
        let post = f.slack.posts().pop().unwrap();
        assert_eq!(token::visible_text(&post.text), "`#general` a &lt; b");
    }

    fn relayed_target(f: &Fixture, owner: &str, content: &str) -> DiscordMessage {
        let mut target = discord_message("D", "8000", 8_000, content);
        target.guild_id = Some("G".into());
        target.webhook_id = Some("W".into());
        target.author.username = webhook_username("Bobby", owner);
        f.discord.push(target.clone());
        f.slack.post_text(
            "C",
            &CorrelationToken::new(target.timestamp, None, Some("42")).append_to(content),
        );
        target
    }

    #[tokio::test]
    async fn test_authorized_edit() {
        let f = fixture();
        f.identity.link("42", "p-1");
        let target = relayed_target(&f, "p-1", "hello world");
        let mut command = discord_source("ss/hello/goodbye/");
        command.referenced = Some(Box::new(target));
        f.discord.push(command.clone());

        let outcome = f.relay.relay_from_discord(&command).await.unwrap();
        assert_eq!(
            outcome,
            RelayOutcome::Edited {
                message_id: "8000".into()
            }
        );
        assert_eq!(f.discord.message("D", "8000").unwrap().content, "goodbye world");
        assert!(f.discord.message("D", "9000").is_none());

        let mirror = f.slack.messages("C").pop().unwrap();
        assert_eq!(token::visible_text(&mirror.text), "goodbye world");
        assert!(CorrelationToken::parse(&mirror.text).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reply_edit_keeps_slack_quote() {
        let f = fixture();
        f.identity.link("42", "p-1");
        let earlier = discord_message("D", "7000", 7_000, "hello there");
        let mut reply = discord_source("hello back");
        reply.referenced = Some(Box::new(earlier));
        f.discord.push(reply.clone());
        f.relay.relay_from_discord(&reply).await.unwrap();

        let repost = f.discord.all_messages("D").pop().unwrap();
        assert_eq!(repost.author.username, "Bobby(p-1)");
        let mut command = discord_source("ss/hello/hi/");
        command.id = "9500".into();
        command.referenced = Some(Box::new(repost.clone()));
        f.discord.push(command.clone());

        let outcome = f.relay.relay_from_discord(&command).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Edited { .. }));
        assert_eq!(
            f.discord.message("D", &repost.id).unwrap().content,
            "> hello there\nhi back\n(RefURI: <https://discord.com/channels/G/D/7000>)"
        );
        let mirror = f.slack.messages("C").pop().unwrap();
        assert_eq!(
            token::visible_text(&mirror.text),
            "&gt; hello there\nhi back\n(RefURI: <https://discord.com/channels/G/D/7000>)"
        );
    }

    #[tokio::test]
    async fn test_unauthorized_edit_does_not_mutate() {
        let f = fixture_with(both_ways(), false);
        f.identity.link("42", "p-1");
        let target = relayed_target(&f, "p-2", "hello world");
        let mut command = discord_source("ss/hello/goodbye/");
        command.referenced = Some(Box::new(target.clone()));

        let err = f
            .relay
            .relay_edit(&command, &target, &f.relay.router.find_slack_channel("D", "G").await.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Unauthorized(_)));
        assert!(f.discord.edits().is_empty());
        assert_eq!(f.discord.message("D", "8000").unwrap().content, "hello world");

        // Through the relay entry point the command is relayed as text.
        let outcome = f.relay.relay_from_discord(&command).await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Relayed { .. }));
        assert!(f.discord.edits().is_empty());
    }
}
