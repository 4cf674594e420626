//! Reaction mirroring.
//!
//! Slack reactions become a rendered `reactions.gif` attachment on the Discord
//! mirror. Discord reactions become context blocks on the Slack mirror. Both
//! directions re-read the live reaction state on every event, so replaying an
//! event is harmless.

use crate::bridge::blocks;
use crate::bridge::finder::MessageFinder;
use crate::channels::{
    Block, DiscordAttachment, DiscordMessage, DiscordTransport, OutgoingFile, RemoteFile,
    SlackMessage, SlackTransport, WebhookMessage,
};
use crate::error::BridgeError;
use crate::render::{ReactionRenderer, RenderError};
use crate::settings::ChannelRouter;
use std::sync::Arc;

/// File name of the rendered reaction image on Discord.
pub const REACTION_GIF: &str = "reactions.gif";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The mirror was edited.
    Updated,
    /// The mirror already shows the current state.
    Unchanged,
    /// No route, mirroring disabled for this direction, or a counterpart
    /// the channel webhook cannot edit.
    Skipped,
}

#[derive(Clone)]
pub struct ReactionSync {
    slack: Arc<dyn SlackTransport>,
    discord: Arc<dyn DiscordTransport>,
    router: Arc<dyn ChannelRouter>,
    renderer: Arc<dyn ReactionRenderer>,
    finder: MessageFinder,
    program_name: String,
}

impl ReactionSync {
    pub fn new(
        slack: Arc<dyn SlackTransport>,
        discord: Arc<dyn DiscordTransport>,
        router: Arc<dyn ChannelRouter>,
        renderer: Arc<dyn ReactionRenderer>,
        finder: MessageFinder,
        program_name: impl Into<String>,
    ) -> Self {
        Self {
            slack,
            discord,
            router,
            renderer,
            finder,
            program_name: program_name.into(),
        }
    }

    /// Push the reactions of a Slack message onto its Discord mirror.
    pub async fn sync_from_slack(&self, channel: &str, ts: &str) -> Result<SyncOutcome, BridgeError> {
        let Some(route) = self.router.find_discord_channel(channel).await else {
            return Ok(SyncOutcome::Skipped);
        };
        if !route.setting.slack_to_discord {
            return Ok(SyncOutcome::Skipped);
        }

        let mut source = self.slack.get_message(channel, ts).await?;
        source.channel = channel.to_string();
        let mirror = self
            .finder
            .find_from_slack(&source, &route.discord_channel)
            .await?
            .message;
        // Only messages the webhook sent can be edited through it.
        if mirror.webhook_id.is_none() {
            tracing::info!(
                "Discord {} is an original post, not showing reactions of Slack {}/{}",
                mirror.id,
                channel,
                ts
            );
            return Ok(SyncOutcome::Skipped);
        }

        let rendered = match self.renderer.render(channel, ts).await {
            Ok(bytes) => Some(OutgoingFile::new(REACTION_GIF, bytes)),
            Err(RenderError::NoReactions) => None,
            Err(e) => return Err(BridgeError::Render(e.to_string())),
        };

        let kept: Vec<&DiscordAttachment> = mirror
            .attachments
            .iter()
            .filter(|a| a.filename != REACTION_GIF)
            .collect();
        if rendered.is_none() && kept.len() == mirror.attachments.len() {
            return Ok(SyncOutcome::Unchanged);
        }

        // Edits replace the whole attachment set, so everything that stays is
        // uploaded again next to the new image.
        let mut files = Vec::with_capacity(kept.len() + 1);
        for attachment in &kept {
            let data = self.discord.fetch_attachment(&attachment.url).await?;
            files.push(OutgoingFile::new(attachment.filename.clone(), data));
        }
        files.extend(rendered);

        let edited = self
            .discord
            .edit(
                &route.discord_channel,
                &mirror.id,
                WebhookMessage {
                    content: mirror.content.clone(),
                    files,
                    ..Default::default()
                },
            )
            .await?;
        tracing::debug!(
            "Reactions of Slack {}/{} synced to Discord {}",
            channel,
            ts,
            edited.id
        );

        self.remap_blocks(&source, &kept, &edited).await;
        Ok(SyncOutcome::Updated)
    }

    /// Point the Slack message's image and file blocks at the attachments
    /// created by the edit. Failures leave individual blocks stale.
    async fn remap_blocks(&self, source: &SlackMessage, old: &[&DiscordAttachment], edited: &DiscordMessage) {
        let fresh: Vec<&DiscordAttachment> = edited
            .attachments
            .iter()
            .filter(|a| a.filename != REACTION_GIF)
            .collect();

        let mut blocks = source.blocks.clone();
        let mut changed = false;
        for block in blocks.iter_mut() {
            match block {
                Block::Image(image) => {
                    let Some(i) = old.iter().position(|a| a.url == image.image_url) else {
                        continue;
                    };
                    let Some(new) = fresh.get(i).filter(|n| n.filename == old[i].filename) else {
                        continue;
                    };
                    image.image_url = new.url.clone();
                    changed = true;
                }
                Block::File(file) => {
                    let Some(i) = old.iter().position(|a| {
                        file.external_id == self.attachment_external_id(&edited.channel_id, &a.id)
                    }) else {
                        continue;
                    };
                    let Some(new) = fresh.get(i).filter(|n| n.filename == old[i].filename) else {
                        continue;
                    };
                    match self.reregister(&file.external_id, &edited.channel_id, new).await {
                        Ok(external_id) => {
                            file.external_id = external_id;
                            changed = true;
                        }
                        Err(e) => {
                            tracing::warn!("Failed to re-register remote file {}: {}", file.external_id, e)
                        }
                    }
                }
                _ => {}
            }
        }

        if !changed {
            return;
        }
        if let Err(e) = self
            .slack
            .update(&source.channel, &source.ts, &source.text, &blocks)
            .await
        {
            tracing::warn!(
                "Failed to update blocks of Slack {}/{}: {}",
                source.channel,
                source.ts,
                e
            );
        }
    }

    async fn reregister(
        &self,
        old_external_id: &str,
        discord_channel: &str,
        attachment: &DiscordAttachment,
    ) -> Result<String, BridgeError> {
        let info = self.slack.files_remote_info(old_external_id).await?;
        if let Err(e) = self.slack.files_remote_remove(old_external_id).await {
            tracing::warn!("Failed to remove remote file {}: {}", old_external_id, e);
        }
        let external_id = self.attachment_external_id(discord_channel, &attachment.id);
        self.slack
            .files_remote_add(RemoteFile {
                external_id: external_id.clone(),
                external_url: attachment.url.clone(),
                title: info.title,
                filetype: info.filetype,
            })
            .await?;
        Ok(external_id)
    }

    /// `<program>:<discord channel>/<attachment id>`
    pub fn attachment_external_id(&self, discord_channel: &str, attachment_id: &str) -> String {
        format!("{}:{}/{}", self.program_name, discord_channel, attachment_id)
    }

    /// Mirror the reactions of a Discord message onto its Slack counterpart.
    pub async fn sync_from_discord(
        &self,
        guild: &str,
        channel: &str,
        message_id: &str,
    ) -> Result<SyncOutcome, BridgeError> {
        let Some(route) = self.router.find_slack_channel(channel, guild).await else {
            return Ok(SyncOutcome::Skipped);
        };
        if !route.setting.discord_to_slack {
            return Ok(SyncOutcome::Skipped);
        }

        let source = self.discord.get_message(channel, message_id).await?;
        let mirror = self
            .finder
            .find_from_discord(&source, &route.slack_channel)
            .await?
            .message;

        let blocks = blocks::with_reactions(&mirror, &source.reactions);
        if blocks == mirror.blocks {
            return Ok(SyncOutcome::Unchanged);
        }
        self.slack
            .update(&route.slack_channel, &mirror.ts, &mirror.text, &blocks)
            .await?;
        tracing::debug!(
            "Reactions of Discord {}/{} synced to Slack {}",
            channel,
            message_id,
            mirror.ts
        );
        Ok(SyncOutcome::Updated)
    }
}
