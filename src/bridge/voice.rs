//! Discord voice presence shown on Slack.
//!
//! A per-guild roster tracks who sits in which voice channel. Each mapped
//! Slack channel has at most one indicator message listing the occupants;
//! joins pop it up again at the bottom of the channel, other changes edit it
//! in place and an emptied channel removes it.

use crate::channels::{Block, ContextElement, SlackPost, SlackTransport, VoiceMember, VoiceUpdate};
use crate::error::BridgeError;
use crate::settings::ChannelRouter;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

const MEMBERS_PER_BLOCK: usize = 4;
const INDICATOR_NAME: &str = "Discord Watcher";
const INDICATOR_ICON: &str = ":discord:";
const INDICATOR_TEXT: &str = "Discord voice channels";
const MUTED_EMOJI: &str = ":discord_muted:";
const DEAFENED_EMOJI: &str = ":discord_deafened:";
const NOBODY: &str = "nobody is here";

#[derive(Debug, Clone, PartialEq)]
pub struct Occupant {
    pub member: VoiceMember,
    pub muted: bool,
    pub deafened: bool,
}

#[derive(Debug, Clone, Default)]
struct VoiceChannel {
    name: String,
    members: BTreeMap<String, Occupant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    Entered,
    Left,
    StateChanged,
    Emptied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTransition {
    pub channel: String,
    pub event: VoiceEvent,
}

/// Who is in which voice channel, per guild.
#[derive(Debug, Default)]
pub struct VoiceRoster {
    guilds: HashMap<String, BTreeMap<String, VoiceChannel>>,
}

impl VoiceRoster {
    pub fn channel_of(&self, guild: &str, user: &str) -> Option<&str> {
        self.guilds
            .get(guild)?
            .iter()
            .find(|(_, c)| c.members.contains_key(user))
            .map(|(id, _)| id.as_str())
    }

    pub fn occupants(&self, guild: &str, channel: &str) -> Vec<&Occupant> {
        self.guilds
            .get(guild)
            .and_then(|g| g.get(channel))
            .map(|c| c.members.values().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, guild: &str) -> bool {
        self.guilds
            .get(guild)
            .map(|g| g.values().all(|c| c.members.is_empty()))
            .unwrap_or(true)
    }

    /// Record a voice state update. A move yields a transition for both the
    /// old and the new channel.
    pub fn apply(&mut self, update: &VoiceUpdate) -> Vec<VoiceTransition> {
        let user = update.member.user_id.as_str();
        let previous = self.channel_of(&update.guild_id, user).map(str::to_string);
        let guild = self.guilds.entry(update.guild_id.clone()).or_default();
        let mut transitions = Vec::new();

        let leave = |guild: &mut BTreeMap<String, VoiceChannel>, channel: &str| {
            let Some(state) = guild.get_mut(channel) else {
                return None;
            };
            state.members.remove(user);
            let event = if state.members.is_empty() {
                guild.remove(channel);
                VoiceEvent::Emptied
            } else {
                VoiceEvent::Left
            };
            Some(VoiceTransition {
                channel: channel.to_string(),
                event,
            })
        };

        match &update.channel {
            None => {
                if let Some(prev) = previous {
                    transitions.extend(leave(guild, &prev));
                }
            }
            Some((id, name)) => {
                let stayed = previous.as_deref() == Some(id.as_str());
                if let Some(prev) = previous.filter(|p| p != id) {
                    transitions.extend(leave(guild, &prev));
                }
                let channel = guild.entry(id.clone()).or_default();
                channel.name = name.clone();
                channel.members.insert(
                    user.to_string(),
                    Occupant {
                        member: update.member.clone(),
                        muted: update.muted || update.deafened,
                        deafened: update.deafened,
                    },
                );
                transitions.push(VoiceTransition {
                    channel: id.clone(),
                    event: if stayed {
                        VoiceEvent::StateChanged
                    } else {
                        VoiceEvent::Entered
                    },
                });
            }
        }
        transitions
    }

    /// Indicator blocks for one channel: a link line, the members (normal,
    /// then muted, then deafened), four per block, and a divider.
    pub fn channel_blocks(&self, guild: &str, channel: &str) -> Vec<Block> {
        let Some(state) = self.guilds.get(guild).and_then(|g| g.get(channel)) else {
            return vec![nobody_block()];
        };

        let mut blocks = vec![Block::context(
            None,
            vec![ContextElement::Mrkdwn {
                text: format!(
                    "<https://discord.com/channels/{}/{}|{}: >",
                    guild, channel, state.name
                ),
            }],
        )];

        let mut ordered: Vec<&Occupant> = state.members.values().collect();
        ordered.sort_by_key(|o| match (o.deafened, o.muted) {
            (true, _) => 2,
            (false, true) => 1,
            (false, false) => 0,
        });
        for chunk in ordered.chunks(MEMBERS_PER_BLOCK) {
            let elements = chunk
                .iter()
                .flat_map(|o| {
                    let emoji = if o.deafened {
                        DEAFENED_EMOJI
                    } else if o.muted {
                        MUTED_EMOJI
                    } else {
                        ""
                    };
                    let avatar = ContextElement::Image {
                        image_url: o.member.avatar_url.clone().unwrap_or_default(),
                        alt_text: o.member.name.clone(),
                    };
                    let name = ContextElement::Mrkdwn {
                        text: format!("{}{} ", emoji, o.member.name),
                    };
                    [avatar, name]
                })
                .collect();
            blocks.push(Block::context(None, elements));
        }
        blocks.push(Block::Divider);
        blocks
    }

    /// Blocks for every occupied channel of a guild.
    pub fn guild_blocks(&self, guild: &str) -> Vec<Block> {
        let mut blocks = Vec::new();
        if let Some(channels) = self.guilds.get(guild) {
            for (id, channel) in channels {
                if !channel.members.is_empty() {
                    blocks.extend(self.channel_blocks(guild, id));
                }
            }
        }
        if blocks.is_empty() {
            blocks.push(nobody_block());
        }
        blocks
    }
}

fn nobody_block() -> Block {
    Block::context(
        None,
        vec![ContextElement::Mrkdwn {
            text: NOBODY.to_string(),
        }],
    )
}

/// The one voice indicator message per Slack channel.
pub struct SlackIndicator {
    slack: Arc<dyn SlackTransport>,
    last: Mutex<HashMap<String, String>>,
}

impl SlackIndicator {
    pub fn new(slack: Arc<dyn SlackTransport>) -> Self {
        Self {
            slack,
            last: Mutex::new(HashMap::new()),
        }
    }

    fn post(channel: &str, blocks: Vec<Block>) -> SlackPost {
        SlackPost {
            channel: channel.to_string(),
            text: INDICATOR_TEXT.to_string(),
            blocks,
            username: Some(INDICATOR_NAME.to_string()),
            icon_url: None,
            icon_emoji: Some(INDICATOR_ICON.to_string()),
        }
    }

    /// Post a fresh indicator, removing the previous one.
    pub async fn popup(&self, channel: &str, blocks: Vec<Block>) -> Result<(), BridgeError> {
        let mut last = self.last.lock().await;
        if let Some(ts) = last.remove(channel) {
            if let Err(e) = self.slack.delete(channel, &ts, false).await {
                tracing::debug!("Previous voice indicator {} already gone: {}", ts, e);
            }
        }
        let ts = self.slack.send(Self::post(channel, blocks)).await?;
        last.insert(channel.to_string(), ts);
        Ok(())
    }

    /// Edit the indicator in place, posting one if there is none.
    pub async fn update(&self, channel: &str, blocks: Vec<Block>) -> Result<(), BridgeError> {
        let ts = self.last.lock().await.get(channel).cloned();
        let Some(ts) = ts else {
            return self.popup(channel, blocks).await;
        };
        match self
            .slack
            .update(channel, &ts, INDICATOR_TEXT, &blocks)
            .await
        {
            Err(BridgeError::MessageNotFound(_)) => {
                self.last.lock().await.remove(channel);
                self.popup(channel, blocks).await
            }
            other => other,
        }
    }

    pub async fn remove(&self, channel: &str) -> Result<(), BridgeError> {
        let Some(ts) = self.last.lock().await.remove(channel) else {
            return Ok(());
        };
        self.slack.delete(channel, &ts, false).await
    }

    pub async fn current(&self, channel: &str) -> Option<String> {
        self.last.lock().await.get(channel).cloned()
    }
}

/// Applies voice updates to the roster and keeps the indicators current.
pub struct VoiceRelay {
    router: Arc<dyn ChannelRouter>,
    roster: Mutex<VoiceRoster>,
    indicator: SlackIndicator,
}

impl VoiceRelay {
    pub fn new(slack: Arc<dyn SlackTransport>, router: Arc<dyn ChannelRouter>) -> Self {
        Self {
            router,
            roster: Mutex::new(VoiceRoster::default()),
            indicator: SlackIndicator::new(slack),
        }
    }

    /// Returns the Slack channels whose indicator changed.
    pub async fn handle(&self, update: &VoiceUpdate) -> Result<Vec<String>, BridgeError> {
        let mut roster = self.roster.lock().await;
        let transitions = roster.apply(update);
        let guild = update.guild_id.as_str();
        let mut touched = Vec::new();

        for transition in transitions {
            let Some(route) = self.router.find_slack_channel(&transition.channel, guild).await else {
                continue;
            };
            if !route.setting.send_voice_state {
                continue;
            }
            if transition.event == VoiceEvent::StateChanged && !route.setting.send_mute_state {
                continue;
            }

            let slack_channel = route.slack_channel.as_str();
            let blocks = if route.all_in_one {
                roster.guild_blocks(guild)
            } else {
                roster.channel_blocks(guild, &transition.channel)
            };
            match transition.event {
                VoiceEvent::Entered => self.indicator.popup(slack_channel, blocks).await?,
                VoiceEvent::Left | VoiceEvent::StateChanged => {
                    self.indicator.update(slack_channel, blocks).await?
                }
                VoiceEvent::Emptied if route.all_in_one && !roster.is_empty(guild) => {
                    self.indicator.update(slack_channel, blocks).await?
                }
                VoiceEvent::Emptied => self.indicator.remove(slack_channel).await?,
            }
            touched.push(slack_channel.to_string());
        }
        Ok(touched)
    }

    pub fn indicator(&self) -> &SlackIndicator {
        &self.indicator
    }
}
