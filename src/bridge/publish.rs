//! Public sharing of files attached to reposted Slack messages.
//!
//! Reposts reference the author's files as remote files
//! (`<program>:<file id>`) pointing at the private permalink. When the author
//! reacts with the publish emoji, the registrations are swapped for the public
//! permalink so the Discord side can open them; removing the reaction revokes
//! the public link again.

use crate::bridge::token::CorrelationToken;
use crate::channels::{Block, RemoteFile, SlackTransport};
use crate::error::BridgeError;
use std::sync::Arc;

#[derive(Clone)]
pub struct FilePublisher {
    slack: Arc<dyn SlackTransport>,
    program_name: String,
}

impl FilePublisher {
    pub fn new(slack: Arc<dyn SlackTransport>, program_name: impl Into<String>) -> Self {
        Self {
            slack,
            program_name: program_name.into(),
        }
    }

    /// Returns the number of files switched to their public link.
    pub async fn publish(&self, channel: &str, ts: &str, user: &str) -> Result<usize, BridgeError> {
        self.republish(channel, ts, user, true).await
    }

    /// Returns the number of files switched back to their private link.
    pub async fn revoke(&self, channel: &str, ts: &str, user: &str) -> Result<usize, BridgeError> {
        self.republish(channel, ts, user, false).await
    }

    /// Slack file id behind one of our external ids. Discord attachment
    /// registrations (`<program>:<channel>/<id>`) are not Slack files.
    fn file_id<'a>(&self, external_id: &'a str) -> Option<&'a str> {
        external_id
            .strip_prefix(self.program_name.as_str())?
            .strip_prefix(':')
            .filter(|id| !id.is_empty() && !id.contains('/'))
    }

    async fn republish(&self, channel: &str, ts: &str, user: &str, public: bool) -> Result<usize, BridgeError> {
        let message = self.slack.get_message(channel, ts).await?;
        let owner = CorrelationToken::parse(&message.text)
            .ok()
            .flatten()
            .and_then(|t| t.slack_user_id);
        if owner.as_deref() != Some(user) {
            return Ok(0);
        }

        let mut switched = 0;
        for block in &message.blocks {
            let Block::File(file) = block else { continue };
            let Some(file_id) = self.file_id(&file.external_id) else {
                continue;
            };

            let shared = if public {
                self.slack.share_public(file_id).await
            } else {
                self.slack.revoke_public(file_id).await
            };
            let shared = match shared {
                Ok(shared) => shared,
                Err(e) => {
                    tracing::warn!("Failed to change public link of {}: {}", file_id, e);
                    continue;
                }
            };

            if let Err(e) = self.slack.files_remote_remove(&file.external_id).await {
                tracing::warn!("Failed to remove remote file {}: {}", file.external_id, e);
                continue;
            }
            let external_url = if public {
                shared.permalink_public
            } else {
                shared.permalink
            };
            self.slack
                .files_remote_add(RemoteFile {
                    external_id: file.external_id.clone(),
                    external_url,
                    title: shared.name,
                    filetype: shared.filetype,
                })
                .await?;
            switched += 1;
        }

        if switched > 0 {
            // Re-sending the blocks makes Slack pick up the new registrations.
            self.slack
                .update(channel, ts, &message.text, &message.blocks)
                .await?;
            tracing::info!(
                "{} {} file(s) of {}/{}",
                if public { "Published" } else { "Revoked" },
                switched,
                channel,
                ts
            );
        }
        Ok(switched)
    }
}
