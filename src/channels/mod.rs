pub mod discord;
pub mod dispatch;
pub mod slack;
pub mod webhook;

use crate::error::BridgeError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Discord side
// ---------------------------------------------------------------------------

/// Discord epoch (2015-01-01T00:00:00Z) in unix milliseconds.
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Creation time encoded in a Discord snowflake.
pub fn snowflake_time(id: &str) -> Option<DateTime<Utc>> {
    let id: u64 = id.parse().ok()?;
    let ms = (id >> 22) + DISCORD_EPOCH_MS;
    Utc.timestamp_millis_opt(ms as i64).single()
}

/// Smallest snowflake created at `time`, usable as an `around`/`before` cursor.
pub fn snowflake_at(time: DateTime<Utc>) -> String {
    let ms = (time.timestamp_millis() as u64).saturating_sub(DISCORD_EPOCH_MS);
    (ms << 22).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscordAttachment {
    pub id: String,
    pub url: String,
    pub filename: String,
    pub size: u64,
}

impl DiscordAttachment {
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.filename)
    }

    pub fn is_image(&self) -> bool {
        is_image_name(&self.filename)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscordEmoji {
    /// Custom emoji id; `None` for unicode emoji.
    pub id: Option<String>,
    pub name: String,
    pub animated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscordReaction {
    pub emoji: DiscordEmoji,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscordAuthor {
    pub id: String,
    pub username: String,
    /// Per-guild nickname when known.
    pub nick: Option<String>,
    pub avatar_url: Option<String>,
    pub bot: bool,
}

impl DiscordAuthor {
    pub fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author: DiscordAuthor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<DiscordAttachment>,
    pub reactions: Vec<DiscordReaction>,
    pub webhook_id: Option<String>,
    /// The message this one replies to.
    pub referenced: Option<Box<DiscordMessage>>,
}

/// A file to upload alongside a webhook message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingFile {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl OutgoingFile {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        Self {
            content_type: content_type_for(&filename).to_string(),
            filename,
            data,
        }
    }
}

/// Body of a webhook send or edit. Edits replace the whole attachment set:
/// only `keep_attachments` ids and the new `files` survive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WebhookMessage {
    pub content: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub keep_attachments: Vec<String>,
    pub files: Vec<OutgoingFile>,
}

#[async_trait]
pub trait DiscordTransport: Send + Sync {
    /// Send through the channel webhook. With `wait`, the created message is returned.
    async fn send(
        &self,
        channel: &str,
        message: WebhookMessage,
        wait: bool,
    ) -> Result<Option<DiscordMessage>, BridgeError>;

    /// Edit a message previously sent by the channel webhook.
    async fn edit(
        &self,
        channel: &str,
        message_id: &str,
        message: WebhookMessage,
    ) -> Result<DiscordMessage, BridgeError>;

    async fn get_message(&self, channel: &str, message_id: &str)
        -> Result<DiscordMessage, BridgeError>;

    /// Recent messages, newest first. `around` centers the window on a snowflake.
    async fn list_recent(
        &self,
        channel: &str,
        around: Option<&str>,
        limit: u8,
    ) -> Result<Vec<DiscordMessage>, BridgeError>;

    async fn delete(&self, channel: &str, message_id: &str) -> Result<(), BridgeError>;

    async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, BridgeError>;

    /// Nickname in the guild, falling back to the username.
    async fn member_name(&self, guild: &str, user: &str) -> Result<String, BridgeError>;

    async fn channel_name(&self, channel: &str) -> Result<String, BridgeError>;
}

// ---------------------------------------------------------------------------
// Slack side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TextObject {
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn".into(),
            text: text.into(),
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: "plain_text".into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextElement {
    Mrkdwn { text: String },
    Image { image_url: String, alt_text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionBlock {
    pub text: TextObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub elements: Vec<ContextElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub image_url: String,
    pub alt_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<TextObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBlock {
    pub external_id: String,
    #[serde(default = "remote_source")]
    pub source: String,
}

fn remote_source() -> String {
    "remote".to_string()
}

/// A Slack layout block. Types the bridge does not touch are kept verbatim
/// so an update never drops content it did not understand.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Section(SectionBlock),
    Context(ContextBlock),
    Image(ImageBlock),
    File(FileBlock),
    Divider,
    Raw(Value),
}

impl Block {
    pub fn from_value(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
        // Image and file blocks are rebuilt on every sync, so extra fields Slack
        // adds to them may be dropped. Text-bearing blocks must survive exactly.
        let typed = match kind {
            "section" => serde_json::from_value(value.clone())
                .ok()
                .map(Block::Section)
                .filter(|b| b.to_value() == value),
            "context" => serde_json::from_value(value.clone())
                .ok()
                .map(Block::Context)
                .filter(|b| b.to_value() == value),
            "image" => serde_json::from_value(value.clone()).ok().map(Block::Image),
            "file" => serde_json::from_value(value.clone()).ok().map(Block::File),
            "divider" => Some(Block::Divider),
            _ => None,
        };
        typed.unwrap_or(Block::Raw(value))
    }

    pub fn to_value(&self) -> Value {
        fn tagged<T: Serialize>(kind: &str, block: &T) -> Value {
            let mut value = serde_json::to_value(block).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut value {
                map.insert("type".into(), Value::String(kind.into()));
            }
            value
        }
        match self {
            Block::Section(b) => tagged("section", b),
            Block::Context(b) => tagged("context", b),
            Block::Image(b) => tagged("image", b),
            Block::File(b) => tagged("file", b),
            Block::Divider => serde_json::json!({ "type": "divider" }),
            Block::Raw(v) => v.clone(),
        }
    }

    pub fn section(text: impl Into<String>) -> Self {
        Block::Section(SectionBlock {
            text: TextObject::mrkdwn(text),
        })
    }

    pub fn image(url: impl Into<String>, alt: impl Into<String>, title: Option<String>) -> Self {
        Block::Image(ImageBlock {
            image_url: url.into(),
            alt_text: alt.into(),
            title: title.map(TextObject::plain),
        })
    }

    pub fn remote_file(external_id: impl Into<String>) -> Self {
        Block::File(FileBlock {
            external_id: external_id.into(),
            source: remote_source(),
        })
    }

    pub fn context(block_id: Option<String>, elements: Vec<ContextElement>) -> Self {
        Block::Context(ContextBlock { block_id, elements })
    }

    /// Blocks that render the message text.
    pub fn carries_text(&self) -> bool {
        match self {
            Block::Section(_) => true,
            Block::Raw(v) => matches!(
                v.get("type").and_then(Value::as_str),
                Some("section" | "rich_text")
            ),
            _ => false,
        }
    }
}

impl Serialize for Block {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Block::from_value)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SlackFile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filetype: String,
    #[serde(default)]
    pub url_private: String,
    #[serde(default)]
    pub permalink: String,
}

impl SlackFile {
    pub fn is_image(&self) -> bool {
        matches!(self.filetype.as_str(), "png" | "jpg" | "jpeg" | "gif")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlackMessage {
    pub channel: String,
    pub ts: String,
    pub user: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
    pub text: String,
    pub blocks: Vec<Block>,
    pub files: Vec<SlackFile>,
}

impl SlackMessage {
    /// Slack `ts` ("1700000000.123456") as a point in time.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        slack_ts_time(&self.ts)
    }
}

pub fn slack_ts_time(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: i64 = format!("{:0<6}", frac).get(..6)?.parse().ok()?;
    Utc.timestamp_micros(secs * 1_000_000 + micros).single()
}

/// A message to post on Slack.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlackPost {
    pub channel: String,
    pub text: String,
    pub blocks: Vec<Block>,
    pub username: Option<String>,
    pub icon_url: Option<String>,
    pub icon_emoji: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlackUserProfile {
    pub display_name: String,
    pub real_name: String,
    pub image_url: Option<String>,
}

impl SlackUserProfile {
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.real_name
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlackReaction {
    pub name: String,
    pub count: u64,
}

/// A remote file registration (files.remote.*).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteFile {
    pub external_id: String,
    pub external_url: String,
    pub title: String,
    pub filetype: String,
}

/// A Slack-hosted file whose public link was shared or revoked.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SharedFile {
    pub name: String,
    pub filetype: String,
    pub permalink: String,
    pub permalink_public: String,
}

#[async_trait]
pub trait SlackTransport: Send + Sync {
    /// Post a message, returning its `ts`.
    async fn send(&self, post: SlackPost) -> Result<String, BridgeError>;

    async fn update(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        blocks: &[Block],
    ) -> Result<(), BridgeError>;

    async fn get_message(&self, channel: &str, ts: &str) -> Result<SlackMessage, BridgeError>;

    /// Recent channel history, newest first.
    async fn list_recent(&self, channel: &str, limit: u8) -> Result<Vec<SlackMessage>, BridgeError>;

    /// Delete a message. `as_user` uses the user token (needed for messages
    /// authored by people rather than the bot).
    async fn delete(&self, channel: &str, ts: &str, as_user: bool) -> Result<(), BridgeError>;

    async fn user_profile(&self, user: &str) -> Result<SlackUserProfile, BridgeError>;

    async fn reactions(&self, channel: &str, ts: &str) -> Result<Vec<SlackReaction>, BridgeError>;

    async fn emoji_list(&self) -> Result<HashMap<String, String>, BridgeError>;

    async fn files_remote_add(&self, file: RemoteFile) -> Result<(), BridgeError>;

    async fn files_remote_info(&self, external_id: &str) -> Result<RemoteFile, BridgeError>;

    async fn files_remote_remove(&self, external_id: &str) -> Result<(), BridgeError>;

    async fn share_public(&self, file_id: &str) -> Result<SharedFile, BridgeError>;

    async fn revoke_public(&self, file_id: &str) -> Result<SharedFile, BridgeError>;

    /// Download a private file or custom emoji with bot credentials.
    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>, BridgeError>;

    /// Whether delete-and-repost is possible.
    fn has_user_token(&self) -> bool;

    /// Workspace base url, e.g. `https://example.slack.com/`.
    fn workspace_url(&self) -> String;
}

// ---------------------------------------------------------------------------
// Channel directory (used by the suffix channel map and the configurator)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn slack_channels(&self) -> Result<Vec<ChannelInfo>, BridgeError>;
    async fn create_slack_channel(&self, name: &str) -> Result<ChannelInfo, BridgeError>;
    /// Text channels of a guild.
    async fn discord_channels(&self, guild: &str) -> Result<Vec<ChannelInfo>, BridgeError>;
}

/// Directory backed by the live platform adapters.
pub struct PlatformDirectory {
    pub slack: std::sync::Arc<slack::SlackAdapter>,
    pub discord: std::sync::Arc<discord::DiscordAdapter>,
}

#[async_trait]
impl ChannelDirectory for PlatformDirectory {
    async fn slack_channels(&self) -> Result<Vec<ChannelInfo>, BridgeError> {
        self.slack.list_channels().await
    }

    async fn create_slack_channel(&self, name: &str) -> Result<ChannelInfo, BridgeError> {
        self.slack.create_channel(name).await
    }

    async fn discord_channels(&self, guild: &str) -> Result<Vec<ChannelInfo>, BridgeError> {
        self.discord.text_channels(guild).await
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum EmojiChange {
    Add { name: String, value: String },
    Remove { names: Vec<String> },
    Rename { old_name: String, new_name: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceMember {
    pub user_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceUpdate {
    pub guild_id: String,
    /// `(channel id, channel name)`; `None` when the user left voice.
    pub channel: Option<(String, String)>,
    pub member: VoiceMember,
    pub muted: bool,
    pub deafened: bool,
}

/// Everything the platform listeners hand to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    SlackMessage(SlackMessage),
    SlackReaction {
        channel: String,
        ts: String,
        user: String,
        reaction: String,
        added: bool,
    },
    SlackEmojiChanged(EmojiChange),
    DiscordMessage(DiscordMessage),
    DiscordReaction {
        guild_id: String,
        channel_id: String,
        message_id: String,
    },
    Voice(VoiceUpdate),
}

impl BridgeEvent {
    /// Events touching the same message share a key and must not run concurrently.
    pub fn key(&self) -> Option<String> {
        match self {
            Self::SlackReaction { channel, ts, .. } => Some(format!("slack:{}:{}", channel, ts)),
            Self::DiscordReaction {
                channel_id,
                message_id,
                ..
            } => Some(format!("discord:{}:{}", channel_id, message_id)),
            Self::Voice(update) => Some(format!("voice:{}", update.guild_id)),
            _ => None,
        }
    }

    /// Reaction syncs may race the relay of their message; retry those once.
    pub fn retry_on_failure(&self) -> bool {
        matches!(
            self,
            Self::SlackReaction { .. } | Self::DiscordReaction { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SlackMessage(_) => "slack_message",
            Self::SlackReaction { .. } => "slack_reaction",
            Self::SlackEmojiChanged(_) => "slack_emoji_changed",
            Self::DiscordMessage(_) => "discord_message",
            Self::DiscordReaction { .. } => "discord_reaction",
            Self::Voice(_) => "voice_state",
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Content type from a file name's extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

pub fn is_image_name(filename: &str) -> bool {
    content_type_for(filename).starts_with("image/")
}
