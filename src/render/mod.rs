pub mod gif;

use crate::channels::EmojiChange;
use crate::error::BridgeError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The message has no reactions; the previous image should be removed.
    #[error("no reactions")]
    NoReactions,
    #[error("fetch failed: {0}")]
    Fetch(#[from] BridgeError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("render task failed: {0}")]
    Join(String),
}

/// Turns the live reaction state of a Slack message into an image.
#[async_trait]
pub trait ReactionRenderer: Send + Sync {
    async fn render(&self, channel: &str, ts: &str) -> Result<Vec<u8>, RenderError>;
}

const ALIAS_PREFIX: &str = "alias:";
const MAX_ALIAS_DEPTH: usize = 8;

/// Custom workspace emoji: name to image url, or `alias:<name>`.
#[derive(Debug, Default)]
pub struct EmojiCatalog {
    entries: RwLock<HashMap<String, String>>,
}

impl EmojiCatalog {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn replace_all(&self, entries: HashMap<String, String>) {
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = entries;
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply(&self, change: &EmojiChange) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match change {
            EmojiChange::Add { name, value } => {
                entries.insert(name.clone(), value.clone());
            }
            EmojiChange::Remove { names } => {
                for name in names {
                    entries.remove(name);
                }
            }
            EmojiChange::Rename {
                old_name,
                new_name,
                value,
            } => {
                entries.remove(old_name);
                entries.insert(new_name.clone(), value.clone());
            }
        }
    }

    /// Image url of a custom emoji, following aliases.
    pub fn url(&self, name: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut current = name;
        for _ in 0..MAX_ALIAS_DEPTH {
            let value = entries.get(current)?;
            match value.strip_prefix(ALIAS_PREFIX) {
                Some(target) => current = target,
                None => return Some(value.clone()),
            }
        }
        tracing::warn!("Emoji alias chain too deep for :{}:", name);
        None
    }
}
