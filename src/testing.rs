//! In-memory platforms for unit tests.

use crate::channels::{
    snowflake_at, Block, ChannelDirectory, ChannelInfo, DiscordAttachment, DiscordAuthor,
    DiscordMessage, DiscordTransport, RemoteFile, SharedFile, SlackMessage, SlackPost,
    SlackReaction, SlackTransport, SlackUserProfile, WebhookMessage,
};
use crate::error::BridgeError;
use crate::identity::{IdentityError, IdentityLinker};
use crate::render::{ReactionRenderer, RenderError};
use crate::settings::{ChannelEntry, GuildTable, SendSetting, SettingsStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn ts_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

pub fn discord_message(channel: &str, id: &str, ms: i64, content: &str) -> DiscordMessage {
    DiscordMessage {
        id: id.into(),
        channel_id: channel.into(),
        guild_id: None,
        author: DiscordAuthor {
            id: "1000".into(),
            username: "someone".into(),
            ..Default::default()
        },
        content: content.into(),
        timestamp: ts_ms(ms),
        attachments: vec![],
        reactions: vec![],
        webhook_id: None,
        referenced: None,
    }
}

pub fn both_ways() -> SendSetting {
    SendSetting {
        slack_to_discord: true,
        discord_to_slack: true,
        ..Default::default()
    }
}

/// A store holding a single exact pair.
pub fn store(guild: &str, slack: &str, discord: &str, setting: SendSetting) -> Arc<SettingsStore> {
    Arc::new(SettingsStore::new(
        PathBuf::from("settings.json"),
        vec![GuildTable {
            guild_id: guild.into(),
            slack_suffix: String::new(),
            discord_suffix: String::new(),
            channels: vec![ChannelEntry {
                comment: String::new(),
                slack: slack.into(),
                discord: discord.into(),
                hook: String::new(),
                setting,
            }],
        }],
    ))
}

// ---------------------------------------------------------------------------
// Slack
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSlack {
    next_ts: AtomicU64,
    user_token: AtomicBool,
    failing_sends: AtomicBool,
    users: Mutex<HashMap<String, SlackUserProfile>>,
    messages: Mutex<HashMap<String, Vec<SlackMessage>>>,
    posts: Mutex<Vec<SlackPost>>,
    updates: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<String>>,
    reactions: Mutex<HashMap<(String, String), Vec<SlackReaction>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    fetched: Mutex<Vec<String>>,
    remote: Mutex<HashMap<String, RemoteFile>>,
    shared: Mutex<HashMap<String, String>>,
    emoji: Mutex<HashMap<String, String>>,
}

impl FakeSlack {
    pub fn add_user(&self, id: &str, name: &str) {
        self.users.lock().unwrap().insert(
            id.into(),
            SlackUserProfile {
                display_name: name.into(),
                real_name: name.into(),
                image_url: None,
            },
        );
    }

    pub fn set_user_token(&self, present: bool) {
        self.user_token.store(present, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.failing_sends.store(fail, Ordering::SeqCst);
    }

    fn ts(&self) -> String {
        let n = self.next_ts.fetch_add(1, Ordering::SeqCst) + 1;
        format!("1800000000.{:06}", n)
    }

    fn store_message(&self, message: SlackMessage) {
        self.messages
            .lock()
            .unwrap()
            .entry(message.channel.clone())
            .or_default()
            .push(message);
    }

    /// A message posted by a person, returning its ts.
    pub fn post_text(&self, channel: &str, text: &str) -> String {
        let ts = self.ts();
        self.store_message(SlackMessage {
            channel: channel.into(),
            ts: ts.clone(),
            text: text.into(),
            ..Default::default()
        });
        ts
    }

    /// Channel history, oldest first.
    pub fn messages(&self, channel: &str) -> Vec<SlackMessage> {
        self.messages
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn posts(&self) -> Vec<SlackPost> {
        self.posts.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_reactions(&self, channel: &str, ts: &str, reactions: &[(&str, u64)]) {
        self.reactions.lock().unwrap().insert(
            (channel.into(), ts.into()),
            reactions
                .iter()
                .map(|(name, count)| SlackReaction {
                    name: name.to_string(),
                    count: *count,
                })
                .collect(),
        );
    }

    pub fn set_file(&self, url: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(url.into(), data);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn remote_files(&self) -> HashMap<String, RemoteFile> {
        self.remote.lock().unwrap().clone()
    }

    pub fn add_shared_file(&self, id: &str, name: &str) {
        self.shared.lock().unwrap().insert(id.into(), name.into());
    }

    fn shared_file(&self, id: &str) -> Result<SharedFile, BridgeError> {
        let name = self
            .shared
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("file {}", id)))?;
        let filetype = name.rsplit_once('.').map(|(_, e)| e.to_string()).unwrap_or_default();
        Ok(SharedFile {
            name,
            filetype,
            permalink: format!("https://example.slack.com/files/{}", id),
            permalink_public: format!("https://slack-files.test/public/{}", id),
        })
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SlackTransport for FakeSlack {
    async fn send(&self, post: SlackPost) -> Result<String, BridgeError> {
        self.log(format!("send {}", post.channel));
        if self.failing_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::slack("send failed"));
        }
        let ts = self.ts();
        self.store_message(SlackMessage {
            channel: post.channel.clone(),
            ts: ts.clone(),
            user: None,
            bot_id: Some("B0".into()),
            subtype: Some("bot_message".into()),
            text: post.text.clone(),
            blocks: post.blocks.clone(),
            files: vec![],
        });
        self.posts.lock().unwrap().push(post);
        Ok(ts)
    }

    async fn update(&self, channel: &str, ts: &str, text: &str, blocks: &[Block]) -> Result<(), BridgeError> {
        self.log(format!("update {} {}", channel, ts));
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .get_mut(channel)
            .and_then(|list| list.iter_mut().find(|m| m.ts == ts))
            .ok_or_else(|| BridgeError::MessageNotFound(format!("{}/{}", channel, ts)))?;
        message.text = text.into();
        message.blocks = blocks.to_vec();
        self.updates.lock().unwrap().push((channel.into(), ts.into()));
        Ok(())
    }

    async fn get_message(&self, channel: &str, ts: &str) -> Result<SlackMessage, BridgeError> {
        self.messages(channel)
            .into_iter()
            .find(|m| m.ts == ts)
            .ok_or_else(|| BridgeError::MessageNotFound(format!("{}/{}", channel, ts)))
    }

    async fn list_recent(&self, channel: &str, limit: u8) -> Result<Vec<SlackMessage>, BridgeError> {
        let mut messages = self.messages(channel);
        messages.reverse();
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn delete(&self, channel: &str, ts: &str, _as_user: bool) -> Result<(), BridgeError> {
        self.log(format!("delete {} {}", channel, ts));
        let mut messages = self.messages.lock().unwrap();
        let list = messages.entry(channel.into()).or_default();
        let before = list.len();
        list.retain(|m| m.ts != ts);
        if list.len() == before {
            return Err(BridgeError::MessageNotFound(format!("{}/{}", channel, ts)));
        }
        self.deleted.lock().unwrap().push((channel.into(), ts.into()));
        Ok(())
    }

    async fn user_profile(&self, user: &str) -> Result<SlackUserProfile, BridgeError> {
        self.users
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("user {}", user)))
    }

    async fn reactions(&self, channel: &str, ts: &str) -> Result<Vec<SlackReaction>, BridgeError> {
        Ok(self
            .reactions
            .lock()
            .unwrap()
            .get(&(channel.to_string(), ts.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn emoji_list(&self) -> Result<HashMap<String, String>, BridgeError> {
        Ok(self.emoji.lock().unwrap().clone())
    }

    async fn files_remote_add(&self, file: RemoteFile) -> Result<(), BridgeError> {
        self.remote.lock().unwrap().insert(file.external_id.clone(), file);
        Ok(())
    }

    async fn files_remote_info(&self, external_id: &str) -> Result<RemoteFile, BridgeError> {
        self.remote
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("remote file {}", external_id)))
    }

    async fn files_remote_remove(&self, external_id: &str) -> Result<(), BridgeError> {
        self.remote
            .lock()
            .unwrap()
            .remove(external_id)
            .map(|_| ())
            .ok_or_else(|| BridgeError::NotFound(format!("remote file {}", external_id)))
    }

    async fn share_public(&self, file_id: &str) -> Result<SharedFile, BridgeError> {
        self.shared_file(file_id)
    }

    async fn revoke_public(&self, file_id: &str) -> Result<SharedFile, BridgeError> {
        self.shared_file(file_id)
    }

    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>, BridgeError> {
        self.fetched.lock().unwrap().push(url.into());
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("file {}", url)))
    }

    fn has_user_token(&self) -> bool {
        self.user_token.load(Ordering::SeqCst)
    }

    fn workspace_url(&self) -> String {
        "https://example.slack.com/".into()
    }
}

// ---------------------------------------------------------------------------
// Discord
// ---------------------------------------------------------------------------

const CLOCK_START_MS: i64 = 1_700_000_000_000;

#[derive(Default)]
pub struct FakeDiscord {
    clock: AtomicU64,
    next_attachment: AtomicU64,
    failing_sends: AtomicBool,
    messages: Mutex<Vec<DiscordMessage>>,
    sent: Mutex<Vec<(String, WebhookMessage)>>,
    edits: Mutex<Vec<(String, WebhookMessage)>>,
    deleted: Mutex<Vec<(String, String)>>,
    members: Mutex<HashMap<String, String>>,
    channel_names: Mutex<HashMap<String, String>>,
}

impl FakeDiscord {
    pub fn push(&self, message: DiscordMessage) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn message(&self, channel: &str, id: &str) -> Option<DiscordMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.channel_id == channel && m.id == id)
            .cloned()
    }

    /// Messages of a channel in the order they were created.
    pub fn all_messages(&self, channel: &str) -> Vec<DiscordMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.channel_id == channel)
            .cloned()
            .collect()
    }

    pub fn sent(&self) -> Vec<(String, WebhookMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(String, WebhookMessage)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn add_member(&self, id: &str, name: &str) {
        self.members.lock().unwrap().insert(id.into(), name.into());
    }

    pub fn add_channel_name(&self, id: &str, name: &str) {
        self.channel_names.lock().unwrap().insert(id.into(), name.into());
    }

    pub fn fail_sends(&self, fail: bool) {
        self.failing_sends.store(fail, Ordering::SeqCst);
    }

    fn upload(&self, channel: &str, message: &WebhookMessage) -> Vec<DiscordAttachment> {
        message
            .files
            .iter()
            .map(|file| {
                let id = (90_000 + self.next_attachment.fetch_add(1, Ordering::SeqCst)).to_string();
                DiscordAttachment {
                    url: format!("https://cdn.discord.test/{}/{}/{}", channel, id, file.filename),
                    id,
                    filename: file.filename.clone(),
                    size: file.data.len() as u64,
                }
            })
            .collect()
    }
}

#[async_trait]
impl DiscordTransport for FakeDiscord {
    async fn send(
        &self,
        channel: &str,
        message: WebhookMessage,
        wait: bool,
    ) -> Result<Option<DiscordMessage>, BridgeError> {
        if self.failing_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::discord("webhook send failed"));
        }
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) as i64;
        let timestamp = ts_ms(CLOCK_START_MS + tick * 1_000);
        let created = DiscordMessage {
            id: snowflake_at(timestamp),
            channel_id: channel.into(),
            guild_id: None,
            author: DiscordAuthor {
                id: "W".into(),
                username: message.username.clone().unwrap_or_default(),
                avatar_url: message.avatar_url.clone(),
                bot: true,
                ..Default::default()
            },
            content: message.content.clone(),
            timestamp,
            attachments: self.upload(channel, &message),
            reactions: vec![],
            webhook_id: Some("W".into()),
            referenced: None,
        };
        self.push(created.clone());
        self.sent.lock().unwrap().push((channel.into(), message));
        Ok(wait.then_some(created))
    }

    async fn edit(
        &self,
        channel: &str,
        message_id: &str,
        message: WebhookMessage,
    ) -> Result<DiscordMessage, BridgeError> {
        let uploaded = self.upload(channel, &message);
        let mut messages = self.messages.lock().unwrap();
        let target = messages
            .iter_mut()
            .find(|m| m.channel_id == channel && m.id == message_id)
            .ok_or_else(|| BridgeError::MessageNotFound(format!("{}/{}", channel, message_id)))?;
        target
            .attachments
            .retain(|a| message.keep_attachments.contains(&a.id));
        target.attachments.extend(uploaded);
        target.content = message.content.clone();
        let edited = target.clone();
        drop(messages);
        self.edits.lock().unwrap().push((message_id.into(), message));
        Ok(edited)
    }

    async fn get_message(&self, channel: &str, message_id: &str) -> Result<DiscordMessage, BridgeError> {
        self.message(channel, message_id)
            .ok_or_else(|| BridgeError::MessageNotFound(format!("{}/{}", channel, message_id)))
    }

    async fn list_recent(
        &self,
        channel: &str,
        _around: Option<&str>,
        limit: u8,
    ) -> Result<Vec<DiscordMessage>, BridgeError> {
        let mut messages = self.all_messages(channel);
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn delete(&self, channel: &str, message_id: &str) -> Result<(), BridgeError> {
        let mut messages = self.messages.lock().unwrap();
        let before = messages.len();
        messages.retain(|m| !(m.channel_id == channel && m.id == message_id));
        if messages.len() == before {
            return Err(BridgeError::MessageNotFound(format!("{}/{}", channel, message_id)));
        }
        self.deleted
            .lock()
            .unwrap()
            .push((channel.into(), message_id.into()));
        Ok(())
    }

    async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, BridgeError> {
        Ok(url.as_bytes().to_vec())
    }

    async fn member_name(&self, _guild: &str, user: &str) -> Result<String, BridgeError> {
        self.members
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("member {}", user)))
    }

    async fn channel_name(&self, channel: &str) -> Result<String, BridgeError> {
        self.channel_names
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("channel {}", channel)))
    }
}

// ---------------------------------------------------------------------------
// Directory, renderer, identity
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDirectory {
    slack: Mutex<Vec<ChannelInfo>>,
    discord: Mutex<HashMap<String, Vec<ChannelInfo>>>,
    created: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn add_slack(&self, id: &str, name: &str) {
        self.slack.lock().unwrap().push(ChannelInfo {
            id: id.into(),
            name: name.into(),
        });
    }

    pub fn add_discord(&self, guild: &str, id: &str, name: &str) {
        self.discord
            .lock()
            .unwrap()
            .entry(guild.into())
            .or_default()
            .push(ChannelInfo {
                id: id.into(),
                name: name.into(),
            });
    }

    /// Number of Slack channel listings.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn slack_id(&self, name: &str) -> Option<String> {
        self.slack
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id.clone())
    }
}

#[async_trait]
impl ChannelDirectory for FakeDirectory {
    async fn slack_channels(&self) -> Result<Vec<ChannelInfo>, BridgeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.slack.lock().unwrap().clone())
    }

    async fn create_slack_channel(&self, name: &str) -> Result<ChannelInfo, BridgeError> {
        let mut slack = self.slack.lock().unwrap();
        let info = ChannelInfo {
            id: format!("CNEW{}", slack.len()),
            name: name.into(),
        };
        slack.push(info.clone());
        self.created.lock().unwrap().push(name.into());
        Ok(info)
    }

    async fn discord_channels(&self, guild: &str) -> Result<Vec<ChannelInfo>, BridgeError> {
        Ok(self
            .discord
            .lock()
            .unwrap()
            .get(guild)
            .cloned()
            .unwrap_or_default())
    }
}

pub enum FakeRenderer {
    Image(Vec<u8>),
    NoReactions,
    Failing,
}

impl FakeRenderer {
    pub fn image(bytes: Vec<u8>) -> Self {
        Self::Image(bytes)
    }

    pub fn no_reactions() -> Self {
        Self::NoReactions
    }

    pub fn failing() -> Self {
        Self::Failing
    }
}

#[async_trait]
impl ReactionRenderer for FakeRenderer {
    async fn render(&self, _channel: &str, _ts: &str) -> Result<Vec<u8>, RenderError> {
        match self {
            Self::Image(bytes) => Ok(bytes.clone()),
            Self::NoReactions => Err(RenderError::NoReactions),
            Self::Failing => Err(RenderError::Join("renderer crashed".into())),
        }
    }
}

/// Unlinked accounts are their own primary id.
#[derive(Default)]
pub struct FakeIdentity {
    links: Mutex<HashMap<String, String>>,
}

impl FakeIdentity {
    pub fn link(&self, discord: &str, primary: &str) {
        self.links.lock().unwrap().insert(discord.into(), primary.into());
    }
}

#[async_trait]
impl IdentityLinker for FakeIdentity {
    async fn resolve_owner_id(&self, discord_user_id: &str) -> Result<String, IdentityError> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .get(discord_user_id)
            .cloned()
            .unwrap_or_else(|| discord_user_id.to_string()))
    }
}
