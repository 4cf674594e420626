//! The bridge: routes platform events to the relay, reaction, voice and
//! publishing components and reports what happened on an activity stream.

pub mod blocks;
pub mod escape;
pub mod finder;
pub mod pattern;
pub mod publish;
pub mod reactions;
pub mod relay;
pub mod token;
pub mod voice;

use crate::channels::dispatch::EventSink;
use crate::channels::{BridgeEvent, DiscordTransport, SlackTransport};
use crate::config::Config;
use crate::error::{BridgeError, Platform};
use crate::identity::IdentityLinker;
use crate::render::{EmojiCatalog, ReactionRenderer};
use crate::settings::ChannelRouter;
use async_trait::async_trait;
use finder::MessageFinder;
use publish::FilePublisher;
use reactions::{ReactionSync, SyncOutcome};
use relay::{DropReason, MessageRelay, RelayOptions, RelayOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use voice::VoiceRelay;

/// Something the bridge did, for the configurator's live view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    Relayed {
        from: Platform,
        channel: String,
        mirror: String,
        reposted: bool,
    },
    Edited {
        channel: String,
        message: String,
    },
    Dropped {
        from: Platform,
        channel: String,
        reason: DropReason,
    },
    ReactionsSynced {
        from: Platform,
        channel: String,
        message: String,
    },
    FilesPublished {
        channel: String,
        message: String,
        count: usize,
        public: bool,
    },
    Voice {
        guild: String,
        slack_channels: Vec<String>,
    },
    EmojiUpdated {
        total: usize,
    },
    Failed {
        event: String,
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub program_name: String,
    pub publish_emoji: Option<String>,
    pub repost_discord: bool,
    pub history_limit: u8,
    pub fallback_window: Duration,
}

impl BridgeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program_name: config.bridge.program_name.clone(),
            publish_emoji: config.slack.file_publish_emoji.clone(),
            repost_discord: config.discord.repost,
            history_limit: config.bridge.history_limit,
            fallback_window: config.bridge.fallback_window(),
        }
    }
}

pub struct Bridge {
    relay: MessageRelay,
    reactions: ReactionSync,
    voice: VoiceRelay,
    publisher: FilePublisher,
    catalog: Arc<EmojiCatalog>,
    publish_emoji: Option<String>,
    activity: broadcast::Sender<Activity>,
}

impl Bridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slack: Arc<dyn SlackTransport>,
        discord: Arc<dyn DiscordTransport>,
        router: Arc<dyn ChannelRouter>,
        renderer: Arc<dyn ReactionRenderer>,
        identity: Arc<dyn IdentityLinker>,
        catalog: Arc<EmojiCatalog>,
        options: BridgeOptions,
        activity: broadcast::Sender<Activity>,
    ) -> Self {
        let finder = MessageFinder::new(
            slack.clone(),
            discord.clone(),
            options.history_limit,
            options.fallback_window,
        );
        Self {
            relay: MessageRelay::new(
                slack.clone(),
                discord.clone(),
                router.clone(),
                identity,
                finder.clone(),
                RelayOptions {
                    program_name: options.program_name.clone(),
                    repost_discord: options.repost_discord,
                },
            ),
            reactions: ReactionSync::new(
                slack.clone(),
                discord,
                router.clone(),
                renderer,
                finder,
                options.program_name.clone(),
            ),
            voice: VoiceRelay::new(slack.clone(), router),
            publisher: FilePublisher::new(slack, options.program_name),
            catalog,
            publish_emoji: options.publish_emoji,
            activity,
        }
    }

    fn report(&self, activity: Activity) {
        // No subscribers is fine.
        let _ = self.activity.send(activity);
    }

    fn report_relay(&self, from: Platform, channel: &str, outcome: RelayOutcome) {
        let activity = match outcome {
            RelayOutcome::Relayed { mirror_id, reposted } => Activity::Relayed {
                from,
                channel: channel.to_string(),
                mirror: mirror_id,
                reposted,
            },
            RelayOutcome::Edited { message_id } => Activity::Edited {
                channel: channel.to_string(),
                message: message_id,
            },
            RelayOutcome::Dropped(reason) => {
                tracing::debug!("Dropped {} message in {}: {:?}", from, channel, reason);
                Activity::Dropped {
                    from,
                    channel: channel.to_string(),
                    reason,
                }
            }
        };
        self.report(activity);
    }

    fn report_sync(&self, from: Platform, channel: &str, message: &str, outcome: SyncOutcome) {
        if outcome == SyncOutcome::Updated {
            self.report(Activity::ReactionsSynced {
                from,
                channel: channel.to_string(),
                message: message.to_string(),
            });
        }
    }

    async fn slack_reaction(
        &self,
        channel: &str,
        ts: &str,
        user: &str,
        reaction: &str,
        added: bool,
    ) -> Result<(), BridgeError> {
        if self.publish_emoji.as_deref() == Some(reaction) {
            let published = if added {
                self.publisher.publish(channel, ts, user).await
            } else {
                self.publisher.revoke(channel, ts, user).await
            };
            match published {
                Ok(0) => {}
                Ok(count) => self.report(Activity::FilesPublished {
                    channel: channel.to_string(),
                    message: ts.to_string(),
                    count,
                    public: added,
                }),
                Err(e) => tracing::warn!("File publishing on {}/{} failed: {}", channel, ts, e),
            }
        }
        let outcome = self.reactions.sync_from_slack(channel, ts).await?;
        self.report_sync(Platform::Slack, channel, ts, outcome);
        Ok(())
    }
}

#[async_trait]
impl EventSink for Bridge {
    async fn handle(&self, event: BridgeEvent) -> Result<(), BridgeError> {
        match event {
            BridgeEvent::SlackMessage(message) => {
                let outcome = self.relay.relay_from_slack(&message).await?;
                self.report_relay(Platform::Slack, &message.channel, outcome);
            }
            BridgeEvent::SlackReaction {
                channel,
                ts,
                user,
                reaction,
                added,
            } => {
                self.slack_reaction(&channel, &ts, &user, &reaction, added)
                    .await?;
            }
            BridgeEvent::SlackEmojiChanged(change) => {
                self.catalog.apply(&change);
                self.report(Activity::EmojiUpdated {
                    total: self.catalog.len(),
                });
            }
            BridgeEvent::DiscordMessage(message) => {
                let outcome = self.relay.relay_from_discord(&message).await?;
                self.report_relay(Platform::Discord, &message.channel_id, outcome);
            }
            BridgeEvent::DiscordReaction {
                guild_id,
                channel_id,
                message_id,
            } => {
                let outcome = self
                    .reactions
                    .sync_from_discord(&guild_id, &channel_id, &message_id)
                    .await?;
                self.report_sync(Platform::Discord, &channel_id, &message_id, outcome);
            }
            BridgeEvent::Voice(update) => {
                let slack_channels = self.voice.handle(&update).await?;
                if !slack_channels.is_empty() {
                    self.report(Activity::Voice {
                        guild: update.guild_id,
                        slack_channels,
                    });
                }
            }
        }
        Ok(())
    }

    fn failed(&self, event: &BridgeEvent, error: &BridgeError) {
        self.report(Activity::Failed {
            event: event.kind().to_string(),
            error: error.to_string(),
        });
    }
}
