//! Mapping Discord accounts to a person's primary id, used to authorize edits
//! of messages reposted under that person's name.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("failed to run identity plugin: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("identity plugin exited with {0}")]
    Exit(String),
    #[error("identity plugin returned no id")]
    Empty,
    #[error("identity plugin timed out")]
    Timeout,
}

#[async_trait]
pub trait IdentityLinker: Send + Sync {
    async fn resolve_owner_id(&self, discord_user_id: &str) -> Result<String, IdentityError>;
}

/// Every account is its own primary id.
pub struct DefaultIdentity;

#[async_trait]
impl IdentityLinker for DefaultIdentity {
    async fn resolve_owner_id(&self, discord_user_id: &str) -> Result<String, IdentityError> {
        Ok(discord_user_id.to_string())
    }
}

/// External executable speaking a line protocol on stdin/stdout:
/// `GetPrimaryID\n<id>\n` in, the primary id out.
pub struct PluginIdentity {
    path: PathBuf,
    timeout: Duration,
}

impl PluginIdentity {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }
}

#[async_trait]
impl IdentityLinker for PluginIdentity {
    async fn resolve_owner_id(&self, discord_user_id: &str) -> Result<String, IdentityError> {
        let mut child = tokio::process::Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let request = format!("GetPrimaryID\n{}\n", discord_user_id);
            // A plugin that exits early closes the pipe; its exit status says why.
            if let Err(e) = stdin.write_all(request.as_bytes()).await {
                tracing::debug!("Identity plugin stdin closed: {}", e);
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| IdentityError::Timeout)??;
        if !output.status.success() {
            return Err(IdentityError::Exit(output.status.to_string()));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(id)
    }
}

/// Plugin when configured and present, identity mapping otherwise.
pub fn from_config(plugin: Option<&Path>, timeout: Duration) -> Arc<dyn IdentityLinker> {
    match plugin {
        Some(path) if path.exists() => {
            tracing::info!("Using identity plugin {}", path.display());
            Arc::new(PluginIdentity::new(path.to_path_buf(), timeout))
        }
        Some(path) => {
            tracing::warn!(
                "Identity plugin {} not found, using Discord ids as primary ids",
                path.display()
            );
            Arc::new(DefaultIdentity)
        }
        None => Arc::new(DefaultIdentity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_identity() {
        assert_eq!(DefaultIdentity.resolve_owner_id("42").await.unwrap(), "42");
    }

    #[tokio::test]
    async fn test_missing_plugin_falls_back() {
        let linker = from_config(Some(Path::new("/nonexistent/plugin")), Duration::from_secs(1));
        assert_eq!(linker.resolve_owner_id("7").await.unwrap(), "7");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plugin_protocol() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin");
        std::fs::write(
            &path,
            "#!/bin/sh\nread cmd\nread id\n[ \"$cmd\" = GetPrimaryID ] || exit 3\necho \"primary-$id\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let linker = PluginIdentity::new(path, Duration::from_secs(5));
        assert_eq!(linker.resolve_owner_id("42").await.unwrap(), "primary-42");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plugin_failure() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin");
        std::fs::write(&path, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let linker = PluginIdentity::new(path, Duration::from_secs(5));
        assert!(matches!(
            linker.resolve_owner_id("42").await,
            Err(IdentityError::Exit(_))
        ));
    }
}
