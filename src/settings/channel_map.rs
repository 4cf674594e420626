//! Parallel channel names: Slack `<prefix><slack_suffix>` pairs with the
//! Discord text channel `<prefix><discord_suffix>`.

use crate::channels::{ChannelDirectory, ChannelInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct GuildMap {
    refreshed: Option<Instant>,
    slack_suffix: String,
    discord_suffix: String,
    slack_to_discord: HashMap<String, String>,
    discord_to_slack: HashMap<String, String>,
    discord_names: HashMap<String, String>,
}

pub struct ChannelMap {
    directory: Arc<dyn ChannelDirectory>,
    interval: Duration,
    guilds: Mutex<HashMap<String, GuildMap>>,
}

impl ChannelMap {
    pub fn new(directory: Arc<dyn ChannelDirectory>, interval: Duration) -> Self {
        Self {
            directory,
            interval,
            guilds: Mutex::new(HashMap::new()),
        }
    }

    /// Re-fetch channel lists for a guild unless done within the interval.
    /// Fetch failures keep the previous map.
    pub async fn refresh(&self, guild: &str, slack_suffix: &str, discord_suffix: &str) {
        let mut guilds = self.guilds.lock().await;
        let entry = guilds.entry(guild.to_string()).or_default();
        let suffixes_changed = entry.slack_suffix != slack_suffix || entry.discord_suffix != discord_suffix;
        if let Some(at) = entry.refreshed {
            if at.elapsed() < self.interval && !suffixes_changed {
                return;
            }
        }

        let slack = match self.directory.slack_channels().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Failed to list Slack channels: {}", e);
                return;
            }
        };
        let discord = match self.directory.discord_channels(guild).await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Failed to list Discord channels for guild {}: {}", guild, e);
                return;
            }
        };

        *entry = build(&slack, &discord, slack_suffix, discord_suffix);
        entry.refreshed = Some(Instant::now());
        tracing::debug!(
            "Channel map for guild {}: {} pairs",
            guild,
            entry.slack_to_discord.len()
        );
    }

    pub async fn slack_to_discord(&self, guild: &str, slack_channel: &str) -> Option<String> {
        let guilds = self.guilds.lock().await;
        guilds.get(guild)?.slack_to_discord.get(slack_channel).cloned()
    }

    /// Slack channel for a Discord channel, creating it when `create` is set
    /// and none exists yet.
    pub async fn discord_to_slack(&self, guild: &str, discord_channel: &str, create: bool) -> Option<String> {
        let mut guilds = self.guilds.lock().await;
        let map = guilds.get_mut(guild)?;
        if let Some(slack) = map.discord_to_slack.get(discord_channel) {
            return Some(slack.clone());
        }
        if !create {
            return None;
        }

        let discord_name = map.discord_names.get(discord_channel)?;
        let prefix = discord_name
            .strip_suffix(map.discord_suffix.as_str())
            .unwrap_or(discord_name);
        let name = format!("{}{}", prefix, map.slack_suffix);
        match self.directory.create_slack_channel(&name).await {
            Ok(created) => {
                tracing::info!("Created Slack channel #{} for Discord {}", created.name, discord_channel);
                map.slack_to_discord
                    .insert(created.id.clone(), discord_channel.to_string());
                map.discord_to_slack
                    .insert(discord_channel.to_string(), created.id.clone());
                Some(created.id)
            }
            Err(e) => {
                tracing::warn!("Failed to create Slack channel #{}: {}", name, e);
                None
            }
        }
    }
}

fn build(slack: &[ChannelInfo], discord: &[ChannelInfo], slack_suffix: &str, discord_suffix: &str) -> GuildMap {
    let discord_by_name: HashMap<&str, &str> = discord
        .iter()
        .map(|c| (c.name.as_str(), c.id.as_str()))
        .collect();

    let mut map = GuildMap {
        slack_suffix: slack_suffix.to_string(),
        discord_suffix: discord_suffix.to_string(),
        discord_names: discord
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect(),
        ..Default::default()
    };
    for channel in slack {
        let Some(prefix) = channel.name.strip_suffix(slack_suffix) else {
            continue;
        };
        let discord_name = format!("{}{}", prefix, discord_suffix);
        if let Some(discord_id) = discord_by_name.get(discord_name.as_str()) {
            map.slack_to_discord
                .insert(channel.id.clone(), discord_id.to_string());
            map.discord_to_slack
                .insert(discord_id.to_string(), channel.id.clone());
        }
    }
    map
}
