use super::dispatch::{Admission, EventQueue};
use super::webhook::{WebhookCache, WebhookClient, WebhookProvisioner};
use super::{
    snowflake_time, BridgeEvent, ChannelInfo, DiscordAttachment, DiscordAuthor, DiscordEmoji,
    DiscordMessage, DiscordReaction, DiscordTransport, VoiceMember, VoiceUpdate, WebhookMessage,
};
use crate::config::DiscordConfig;
use crate::error::{with_deadline, BridgeError, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    ChannelId, ChannelType, Context, CreateWebhook, EventHandler, GatewayIntents, GetMessages,
    GuildId, Http, Message, MessageId, Reaction, ReactionType, Ready, UserId, VoiceState,
};
use std::sync::Arc;
use std::time::Duration;

/// Discord side of the bridge: REST through serenity, message bodies through
/// the per-channel webhook.
pub struct DiscordAdapter {
    token: String,
    http: Arc<Http>,
    webhooks: WebhookCache,
    webhook_client: WebhookClient,
    files: reqwest::Client,
    timeout: Duration,
}

impl DiscordAdapter {
    pub fn new(config: &DiscordConfig, timeout: Duration) -> Result<Self, BridgeError> {
        let http = Arc::new(Http::new(&config.bot_token));
        let files = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::discord(format!("http client: {}", e)))?;
        let provisioner = Arc::new(ChannelWebhooks {
            http: http.clone(),
            name: config.webhook_name.clone(),
        });
        Ok(Self {
            token: config.bot_token.clone(),
            webhooks: WebhookCache::new(provisioner),
            webhook_client: WebhookClient::new(files.clone(), timeout),
            http,
            files,
            timeout,
        })
    }

    /// Connect to the gateway and feed events into `queue`.
    pub async fn start(&self, queue: Arc<EventQueue<BridgeEvent>>) -> Result<(), anyhow::Error> {
        let handler = Handler { queue };
        let mut client = serenity::Client::builder(&self.token, intents())
            .event_handler(handler)
            .await?;

        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                tracing::error!("Discord client error: {}", e);
            }
        });

        tracing::info!("Discord adapter started");
        Ok(())
    }

    /// Text channels of a guild.
    pub async fn text_channels(&self, guild: &str) -> Result<Vec<ChannelInfo>, BridgeError> {
        let guild_id = GuildId::new(parse_snowflake(guild)?);
        let channels = with_deadline(Platform::Discord, self.timeout, async {
            guild_id
                .channels(self.http.as_ref())
                .await
                .map_err(|e| discord_error(e, "list channels", BridgeError::NotFound))
        })
        .await?;
        let mut list: Vec<ChannelInfo> = channels
            .into_values()
            .filter(|c| c.kind == ChannelType::Text)
            .map(|c| ChannelInfo {
                id: c.id.get().to_string(),
                name: c.name,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn execute(&self, channel: &str, message: &WebhookMessage, wait: bool) -> Result<Option<serde_json::Value>, BridgeError> {
        let url = self.webhooks.url(channel).await?;
        match self.webhook_client.execute(&url, message, wait).await {
            // The webhook was removed on the Discord side; register a new one.
            Err(BridgeError::MessageNotFound(_)) => {
                tracing::info!("Webhook of channel {} is gone, re-creating", channel);
                self.webhooks.invalidate(channel).await;
                let url = self.webhooks.url(channel).await?;
                self.webhook_client.execute(&url, message, wait).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl DiscordTransport for DiscordAdapter {
    async fn send(
        &self,
        channel: &str,
        message: WebhookMessage,
        wait: bool,
    ) -> Result<Option<DiscordMessage>, BridgeError> {
        match self.execute(channel, &message, wait).await? {
            Some(body) => Ok(Some(message_from_json(body)?)),
            None => Ok(None),
        }
    }

    async fn edit(
        &self,
        channel: &str,
        message_id: &str,
        message: WebhookMessage,
    ) -> Result<DiscordMessage, BridgeError> {
        let url = self.webhooks.url(channel).await?;
        let body = self.webhook_client.edit(&url, message_id, &message).await?;
        message_from_json(body)
    }

    async fn get_message(&self, channel: &str, message_id: &str) -> Result<DiscordMessage, BridgeError> {
        let channel_id = ChannelId::new(parse_snowflake(channel)?);
        let message_id = MessageId::new(parse_snowflake(message_id)?);
        let message = with_deadline(Platform::Discord, self.timeout, async {
            channel_id
                .message(self.http.as_ref(), message_id)
                .await
                .map_err(|e| discord_error(e, "get message", BridgeError::MessageNotFound))
        })
        .await?;
        Ok(convert_message(&message))
    }

    async fn list_recent(
        &self,
        channel: &str,
        around: Option<&str>,
        limit: u8,
    ) -> Result<Vec<DiscordMessage>, BridgeError> {
        let channel_id = ChannelId::new(parse_snowflake(channel)?);
        let mut query = GetMessages::new().limit(limit.clamp(1, 100));
        if let Some(around) = around {
            query = query.around(MessageId::new(parse_snowflake(around)?));
        }
        let messages = with_deadline(Platform::Discord, self.timeout, async {
            channel_id
                .messages(self.http.as_ref(), query)
                .await
                .map_err(|e| discord_error(e, "list messages", BridgeError::NotFound))
        })
        .await?;
        Ok(messages.iter().map(convert_message).collect())
    }

    async fn delete(&self, channel: &str, message_id: &str) -> Result<(), BridgeError> {
        let channel_id = ChannelId::new(parse_snowflake(channel)?);
        let message_id = MessageId::new(parse_snowflake(message_id)?);
        with_deadline(Platform::Discord, self.timeout, async {
            channel_id
                .delete_message(self.http.as_ref(), message_id)
                .await
                .map_err(|e| discord_error(e, "delete message", BridgeError::MessageNotFound))
        })
        .await
    }

    async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, BridgeError> {
        let resp = self
            .files
            .get(url)
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(Platform::Discord, e, self.timeout))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BridgeError::NotFound(format!("attachment {}", url)));
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| BridgeError::from_reqwest(Platform::Discord, e, self.timeout))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BridgeError::from_reqwest(Platform::Discord, e, self.timeout))?;
        Ok(bytes.to_vec())
    }

    async fn member_name(&self, guild: &str, user: &str) -> Result<String, BridgeError> {
        let guild_id = GuildId::new(parse_snowflake(guild)?);
        let user_id = UserId::new(parse_snowflake(user)?);
        let member = with_deadline(Platform::Discord, self.timeout, async {
            guild_id
                .member(self.http.as_ref(), user_id)
                .await
                .map_err(|e| discord_error(e, "get member", BridgeError::NotFound))
        })
        .await?;
        Ok(member.nick.clone().unwrap_or_else(|| member.user.name.clone()))
    }

    async fn channel_name(&self, channel: &str) -> Result<String, BridgeError> {
        let channel_id = ChannelId::new(parse_snowflake(channel)?);
        let channel = with_deadline(Platform::Discord, self.timeout, async {
            self.http
                .get_channel(channel_id)
                .await
                .map_err(|e| discord_error(e, "get channel", BridgeError::NotFound))
        })
        .await?;
        channel
            .guild()
            .map(|c| c.name)
            .ok_or_else(|| BridgeError::NotFound(format!("{} is not a guild channel", channel_id)))
    }
}

/// Reuses the channel webhook named like the bridge, creating it on first use.
struct ChannelWebhooks {
    http: Arc<Http>,
    name: String,
}

#[async_trait]
impl WebhookProvisioner for ChannelWebhooks {
    async fn find_or_create(&self, channel: &str) -> Result<String, BridgeError> {
        let channel_id = ChannelId::new(parse_snowflake(channel)?);
        let existing = channel_id
            .webhooks(self.http.as_ref())
            .await
            .map_err(|e| discord_error(e, "list webhooks", BridgeError::NotFound))?;
        if let Some(url) = existing
            .iter()
            .filter(|hook| hook.name.as_deref() == Some(self.name.as_str()))
            .find_map(|hook| hook.url().ok())
        {
            return Ok(url);
        }

        let created = channel_id
            .create_webhook(self.http.as_ref(), CreateWebhook::new(&self.name))
            .await
            .map_err(|e| discord_error(e, "create webhook", BridgeError::NotFound))?;
        tracing::info!("Created webhook {:?} in channel {}", self.name, channel);
        created
            .url()
            .map_err(|e| BridgeError::discord(format!("webhook without token: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::GUILD_VOICE_STATES
}

struct Handler {
    queue: Arc<EventQueue<BridgeEvent>>,
}

impl Handler {
    async fn push(&self, event: BridgeEvent) {
        let kind = event.kind();
        if self.queue.push(event).await == Admission::Rejected {
            tracing::debug!("Discord {} event shed", kind);
        }
    }

    async fn reaction_changed(&self, reaction: &Reaction) {
        let Some(guild_id) = reaction.guild_id else {
            return;
        };
        self.push(BridgeEvent::DiscordReaction {
            guild_id: guild_id.get().to_string(),
            channel_id: reaction.channel_id.get().to_string(),
            message_id: reaction.message_id.get().to_string(),
        })
        .await;
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.guild_id.is_none() {
            return;
        }
        self.push(BridgeEvent::DiscordMessage(convert_message(&msg)))
            .await;
    }

    async fn reaction_add(&self, _ctx: Context, reaction: Reaction) {
        self.reaction_changed(&reaction).await;
    }

    async fn reaction_remove(&self, _ctx: Context, reaction: Reaction) {
        self.reaction_changed(&reaction).await;
    }

    async fn reaction_remove_all(&self, ctx: Context, channel_id: ChannelId, message_id: MessageId) {
        let guild_id = match ctx.http.get_channel(channel_id).await {
            Ok(channel) => channel.guild().map(|c| c.guild_id),
            Err(e) => {
                tracing::warn!("Failed to look up channel {}: {}", channel_id, e);
                None
            }
        };
        if let Some(guild_id) = guild_id {
            self.push(BridgeEvent::DiscordReaction {
                guild_id: guild_id.get().to_string(),
                channel_id: channel_id.get().to_string(),
                message_id: message_id.get().to_string(),
            })
            .await;
        }
    }

    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let channel = match new.channel_id {
            Some(channel_id) => {
                let name = channel_id
                    .name(&ctx)
                    .await
                    .unwrap_or_else(|_| channel_id.get().to_string());
                Some((channel_id.get().to_string(), name))
            }
            None => None,
        };

        let member = match &new.member {
            Some(member) => Some(member.clone()),
            None => guild_id.member(&ctx, new.user_id).await.ok(),
        };
        let member = match member {
            Some(member) => VoiceMember {
                user_id: new.user_id.get().to_string(),
                name: member.nick.clone().unwrap_or_else(|| member.user.name.clone()),
                avatar_url: member.user.avatar_url(),
            },
            None => VoiceMember {
                user_id: new.user_id.get().to_string(),
                name: new.user_id.get().to_string(),
                avatar_url: None,
            },
        };

        self.push(BridgeEvent::Voice(VoiceUpdate {
            guild_id: guild_id.get().to_string(),
            channel,
            member,
            muted: new.self_mute || new.mute,
            deafened: new.self_deaf || new.deaf,
        }))
        .await;
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(
            "Discord bot connected as {} ({} guilds)",
            ready.user.name,
            ready.guilds.len()
        );
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Parse a Discord id. Zero is not a valid snowflake.
pub fn parse_snowflake(id: &str) -> Result<u64, BridgeError> {
    id.trim()
        .parse::<u64>()
        .ok()
        .filter(|v| *v != 0)
        .ok_or_else(|| BridgeError::Malformed(format!("not a Discord id: {:?}", id)))
}

fn discord_error(err: serenity::Error, what: &str, missing: fn(String) -> BridgeError) -> BridgeError {
    if let serenity::Error::Http(http_err) = &err {
        if http_err.status_code().map(|s| s.as_u16()) == Some(404) {
            return missing(format!("{}: {}", what, err));
        }
    }
    BridgeError::discord(format!("{}: {}", what, err))
}

fn message_from_json(body: serde_json::Value) -> Result<DiscordMessage, BridgeError> {
    let message: Message = serde_json::from_value(body)
        .map_err(|e| BridgeError::discord(format!("unreadable webhook message: {}", e)))?;
    Ok(convert_message(&message))
}

pub fn convert_emoji(reaction: &ReactionType) -> Option<DiscordEmoji> {
    match reaction {
        ReactionType::Unicode(name) => Some(DiscordEmoji {
            id: None,
            name: name.clone(),
            animated: false,
        }),
        ReactionType::Custom { animated, id, name } => Some(DiscordEmoji {
            id: Some(id.get().to_string()),
            name: name.clone().unwrap_or_default(),
            animated: *animated,
        }),
        _ => None,
    }
}

fn message_time(id: &str, fallback: i64) -> DateTime<Utc> {
    snowflake_time(id)
        .or_else(|| DateTime::from_timestamp(fallback, 0))
        .unwrap_or_default()
}

pub fn convert_message(msg: &Message) -> DiscordMessage {
    let id = msg.id.get().to_string();
    DiscordMessage {
        timestamp: message_time(&id, msg.timestamp.unix_timestamp()),
        id,
        channel_id: msg.channel_id.get().to_string(),
        guild_id: msg.guild_id.map(|g| g.get().to_string()),
        author: DiscordAuthor {
            id: msg.author.id.get().to_string(),
            username: msg.author.name.clone(),
            nick: msg.member.as_ref().and_then(|m| m.nick.clone()),
            avatar_url: msg.author.avatar_url(),
            bot: msg.author.bot,
        },
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| DiscordAttachment {
                id: a.id.get().to_string(),
                url: a.url.clone(),
                filename: a.filename.clone(),
                size: u64::from(a.size),
            })
            .collect(),
        reactions: msg
            .reactions
            .iter()
            .filter_map(|r| {
                convert_emoji(&r.reaction_type).map(|emoji| DiscordReaction {
                    emoji,
                    count: r.count,
                })
            })
            .collect(),
        webhook_id: msg.webhook_id.map(|w| w.get().to_string()),
        referenced: msg
            .referenced_message
            .as_deref()
            .map(|m| Box::new(convert_message(m))),
    }
}
