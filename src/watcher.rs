use crate::settings::{self, GuildTable, SettingsStore};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Watches the settings file and swaps edited channel tables into the store.
pub struct SettingsWatcher {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    last_hash: u64,
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

impl SettingsWatcher {
    pub fn new(path: PathBuf) -> Self {
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let hash = std::fs::read_to_string(&path)
            .map(|content| content_hash(&content))
            .unwrap_or(0);
        Self {
            path,
            last_mtime: mtime,
            last_hash: hash,
        }
    }

    /// Returns the new tables if the file changed and parses, `None` if
    /// unchanged or invalid.
    pub fn check(&mut self) -> Option<Vec<GuildTable>> {
        // Stage 1: cheap mtime check
        let new_mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        if new_mtime == self.last_mtime {
            return None;
        }
        self.last_mtime = new_mtime;

        // Stage 2: content hash check (catches `touch` without edit, and our own saves)
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to read settings file: {}", e);
                return None;
            }
        };
        let new_hash = content_hash(&content);
        if new_hash == self.last_hash {
            return None;
        }
        self.last_hash = new_hash;

        // Stage 3: parse
        match settings::parse(&content) {
            Ok(tables) => {
                tracing::info!("Settings file changed, reloading...");
                Some(tables)
            }
            Err(e) => {
                tracing::warn!("Settings file changed but failed to parse: {}", e);
                None
            }
        }
    }

    /// Poll every `interval` until the task is aborted.
    pub fn spawn(mut self, store: Arc<SettingsStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Some(tables) = self.check() {
                    store.replace(tables);
                    for line in store.describe() {
                        tracing::info!("  {}", line);
                    }
                }
            }
        })
    }
}
