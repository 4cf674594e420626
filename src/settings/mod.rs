//! Channel pair settings: which Slack channel mirrors which Discord channel,
//! and the per-pair policy flags.

pub mod channel_map;

use async_trait::async_trait;
use channel_map::ChannelMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Wildcard channel value.
pub const ALL: &str = "all";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildTable {
    #[serde(rename = "discord_server")]
    pub guild_id: String,
    #[serde(default)]
    pub slack_suffix: String,
    #[serde(default)]
    pub discord_suffix: String,
    #[serde(rename = "channel", default)]
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntry {
    #[serde(default)]
    pub comment: String,
    pub slack: String,
    pub discord: String,
    #[serde(default)]
    pub hook: String,
    #[serde(default)]
    pub setting: SendSetting,
}

impl ChannelEntry {
    pub fn is_complete_transfer(&self) -> bool {
        self.slack == ALL && self.discord == ALL
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SendSetting {
    #[serde(rename = "slack2discord", default)]
    pub slack_to_discord: bool,
    #[serde(rename = "discord2slack", default)]
    pub discord_to_slack: bool,
    #[serde(rename = "ShowChannelName", default)]
    pub show_channel_name: bool,
    #[serde(rename = "SendVoiceState", default)]
    pub send_voice_state: bool,
    #[serde(rename = "SendMuteState", default)]
    pub send_mute_state: bool,
    #[serde(rename = "CreateSlackChannelOnSend", default)]
    pub create_channel_on_send: bool,
    #[serde(rename = "MuteSlackUsers", default)]
    pub mute_users: Vec<MutedUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutedUser {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "NickName", default)]
    pub nick_name: String,
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// A resolved channel pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub guild_id: String,
    pub slack_channel: String,
    pub discord_channel: String,
    /// Every Discord channel of the guild goes to one Slack channel.
    pub all_in_one: bool,
    pub setting: SendSetting,
}

impl Route {
    pub fn is_muted(&self, user_id: &str) -> bool {
        self.setting.mute_users.iter().any(|u| u.id == user_id)
    }
}

#[async_trait]
pub trait ChannelRouter: Send + Sync {
    async fn find_discord_channel(&self, slack_channel: &str) -> Option<Route>;
    async fn find_slack_channel(&self, discord_channel: &str, guild_id: &str) -> Option<Route>;
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SettingsStore {
    path: PathBuf,
    tables: RwLock<Arc<Vec<GuildTable>>>,
    channel_map: Option<Arc<ChannelMap>>,
}

impl SettingsStore {
    pub fn new(path: PathBuf, tables: Vec<GuildTable>) -> Self {
        Self {
            path,
            tables: RwLock::new(Arc::new(tables)),
            channel_map: None,
        }
    }

    /// Load from disk. A missing file is an empty table list.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let tables = if path.exists() {
            parse(&std::fs::read_to_string(path)?)?
        } else {
            tracing::warn!("Settings file {} not found, starting empty", path.display());
            Vec::new()
        };
        Ok(Self::new(path.to_path_buf(), tables))
    }

    pub fn with_channel_map(mut self, map: Arc<ChannelMap>) -> Self {
        self.channel_map = Some(map);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<Vec<GuildTable>> {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace(&self, tables: Vec<GuildTable>) {
        *self.tables.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(tables);
    }

    /// Validate, persist and swap in new tables.
    pub async fn save(&self, tables: Vec<GuildTable>) -> Result<(), SettingsError> {
        validate(&tables)?;
        let json = to_pretty_json(&tables)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        self.replace(tables);
        tracing::info!("Settings saved to {}", self.path.display());
        Ok(())
    }

    /// Human-readable pair list.
    pub fn describe(&self) -> Vec<String> {
        let mut out = Vec::new();
        for table in self.snapshot().iter() {
            for entry in &table.channels {
                let s = &entry.setting;
                out.push(format!(
                    "guild {}: slack {} {} discord {}{}",
                    table.guild_id,
                    entry.slack,
                    match (s.slack_to_discord, s.discord_to_slack) {
                        (true, true) => "<->",
                        (true, false) => "->",
                        (false, true) => "<-",
                        (false, false) => "x",
                    },
                    entry.discord,
                    if entry.comment.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", entry.comment)
                    }
                ));
            }
        }
        out
    }

    async fn complete_transfer_discord(&self, slack_channel: &str) -> Option<Route> {
        let map = self.channel_map.as_ref()?;
        for table in self.snapshot().iter() {
            let Some(entry) = table.channels.iter().find(|e| e.is_complete_transfer()) else {
                continue;
            };
            map.refresh(&table.guild_id, &table.slack_suffix, &table.discord_suffix)
                .await;
            if let Some(discord) = map.slack_to_discord(&table.guild_id, slack_channel).await {
                return Some(route(table, entry, slack_channel, &discord, false));
            }
        }
        None
    }
}

fn route(table: &GuildTable, entry: &ChannelEntry, slack: &str, discord: &str, all_in_one: bool) -> Route {
    Route {
        guild_id: table.guild_id.clone(),
        slack_channel: slack.to_string(),
        discord_channel: discord.to_string(),
        all_in_one,
        setting: entry.setting.clone(),
    }
}

#[async_trait]
impl ChannelRouter for SettingsStore {
    async fn find_discord_channel(&self, slack_channel: &str) -> Option<Route> {
        let tables = self.snapshot();
        for table in tables.iter() {
            if let Some(entry) = table
                .channels
                .iter()
                .find(|e| e.slack == slack_channel && e.discord != ALL)
            {
                return Some(route(table, entry, &entry.slack, &entry.discord, false));
            }
        }
        self.complete_transfer_discord(slack_channel).await
    }

    async fn find_slack_channel(&self, discord_channel: &str, guild_id: &str) -> Option<Route> {
        let tables = self.snapshot();
        let table = tables.iter().find(|t| t.guild_id == guild_id)?;

        if let Some(entry) = table
            .channels
            .iter()
            .find(|e| e.discord == discord_channel && e.slack != ALL)
        {
            return Some(route(table, entry, &entry.slack, &entry.discord, false));
        }

        let entry = table.channels.iter().find(|e| e.discord == ALL)?;
        if entry.slack != ALL {
            return Some(route(table, entry, &entry.slack, discord_channel, true));
        }

        let map = self.channel_map.as_ref()?;
        map.refresh(&table.guild_id, &table.slack_suffix, &table.discord_suffix)
            .await;
        let slack = map
            .discord_to_slack(guild_id, discord_channel, entry.setting.create_channel_on_send)
            .await?;
        Some(route(table, entry, &slack, discord_channel, false))
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse(raw: &str) -> Result<Vec<GuildTable>, SettingsError> {
    let tables: Vec<GuildTable> = serde_json::from_str(raw)?;
    validate(&tables)?;
    Ok(tables)
}

fn validate(tables: &[GuildTable]) -> Result<(), SettingsError> {
    for (i, table) in tables.iter().enumerate() {
        if table.guild_id.trim().is_empty() {
            return Err(SettingsError::Invalid(format!(
                "table {} has no discord_server",
                i
            )));
        }
        for (j, entry) in table.channels.iter().enumerate() {
            if entry.slack.trim().is_empty() || entry.discord.trim().is_empty() {
                return Err(SettingsError::Invalid(format!(
                    "guild {} channel {} needs both slack and discord",
                    table.guild_id, j
                )));
            }
            if entry.slack == ALL && entry.discord != ALL {
                return Err(SettingsError::Invalid(format!(
                    "guild {} channel {}: slack \"all\" requires discord \"all\"",
                    table.guild_id, j
                )));
            }
        }
    }
    Ok(())
}

/// Pretty JSON with four-space indentation.
pub fn to_pretty_json(tables: &[GuildTable]) -> Result<String, SettingsError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    tables.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| SettingsError::Invalid(e.to_string()))
}
