use std::fmt;
use std::time::Duration;

/// Which side of the bridge an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Slack,
    Discord,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slack => f.write_str("slack"),
            Self::Discord => f.write_str("discord"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No counterpart message could be located on the other platform.
    #[error("Message not found: {0}")]
    MessageNotFound(String),
    /// A channel mapping, user, file or emoji asset is missing.
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized edit: {0}")]
    Unauthorized(String),
    #[error("{platform} transport error: {message}")]
    Transport { platform: Platform, message: String },
    #[error("{platform} call timed out after {after:?}")]
    Timeout { platform: Platform, after: Duration },
    #[error("Render error: {0}")]
    Render(String),
    #[error("Malformed input: {0}")]
    Malformed(String),
}

impl BridgeError {
    pub fn slack(message: impl fmt::Display) -> Self {
        Self::Transport {
            platform: Platform::Slack,
            message: message.to_string(),
        }
    }

    pub fn discord(message: impl fmt::Display) -> Self {
        Self::Transport {
            platform: Platform::Discord,
            message: message.to_string(),
        }
    }

    /// Worth one more attempt after a short delay: the counterpart may not be
    /// mirrored yet, or the platform was slow.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MessageNotFound(_) | Self::Timeout { .. })
    }

    /// Map a reqwest failure, keeping timeouts distinguishable.
    pub fn from_reqwest(platform: Platform, err: reqwest::Error, after: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout { platform, after }
        } else {
            Self::Transport {
                platform,
                message: err.to_string(),
            }
        }
    }
}

/// Run a transport future under a deadline.
pub async fn with_deadline<T, F>(platform: Platform, after: Duration, fut: F) -> Result<T, BridgeError>
where
    F: std::future::Future<Output = Result<T, BridgeError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Timeout { platform, after }),
    }
}
