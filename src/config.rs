use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Environment variable not set: ${0}")]
    MissingEnvVar(String),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub slack: SlackConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub web: WebConfig,
}

// ---------------------------------------------------------------------------
// Platforms
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    /// Bot token (xoxb-...), supports ${ENV_VAR} expansion
    pub bot_token: String,
    /// App-level token for Socket Mode (xapp-...)
    pub app_token: String,
    /// User token. When set, Slack originals are replaced by a bot repost
    /// that carries the correlation token.
    #[serde(default)]
    pub user_token: Option<String>,
    /// Reaction name that lets the author publish relayed files
    #[serde(default)]
    pub file_publish_emoji: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
    #[serde(default = "default_webhook_name")]
    pub webhook_name: String,
    /// Delete Discord originals and repost them through the channel webhook
    #[serde(default = "default_true")]
    pub repost: bool,
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Producer waits for space
    #[default]
    Block,
    /// Evict the oldest queued event to admit the new one
    DropOldest,
    /// Reject the new event
    Shed,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
    #[serde(default = "default_program_name")]
    pub program_name: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub admission: AdmissionPolicy,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_transport_timeout_ms")]
    pub transport_timeout_ms: u64,
    #[serde(default = "default_channel_map_refresh_secs")]
    pub channel_map_refresh_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: u8,
    /// Exact-text fallback only accepts candidates this close in time
    #[serde(default = "default_fallback_window_secs")]
    pub fallback_window_secs: u64,
    #[serde(default = "default_settings_poll_secs")]
    pub settings_poll_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            program_name: default_program_name(),
            queue_capacity: default_queue_capacity(),
            admission: AdmissionPolicy::default(),
            max_concurrency: default_max_concurrency(),
            retry_delay_ms: default_retry_delay_ms(),
            transport_timeout_ms: default_transport_timeout_ms(),
            channel_map_refresh_secs: default_channel_map_refresh_secs(),
            history_limit: default_history_limit(),
            fallback_window_secs: default_fallback_window_secs(),
            settings_poll_secs: default_settings_poll_secs(),
        }
    }
}

impl BridgeConfig {
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn channel_map_refresh(&self) -> Duration {
        Duration::from_secs(self.channel_map_refresh_secs)
    }

    pub fn fallback_window(&self) -> Duration {
        Duration::from_secs(self.fallback_window_secs)
    }
}

// ---------------------------------------------------------------------------
// Render / identity
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// Directory of `<name>.png` / `<name>.gif` glyphs for standard emoji
    #[serde(default = "default_emoji_dir")]
    pub emoji_dir: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            emoji_dir: default_emoji_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IdentityConfig {
    /// External identity plugin executable
    #[serde(default)]
    pub plugin: Option<String>,
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_webhook_name() -> String {
    "Slack Synchronizer".to_string()
}

fn default_settings_path() -> String {
    "~/.slackcord/settings.json".to_string()
}

fn default_program_name() -> String {
    "slackcord".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_concurrency() -> usize {
    16
}

fn default_retry_delay_ms() -> u64 {
    1500
}

fn default_transport_timeout_ms() -> u64 {
    15_000
}

fn default_channel_map_refresh_secs() -> u64 {
    20
}

fn default_history_limit() -> u8 {
    100
}

fn default_fallback_window_secs() -> u64 {
    600
}

fn default_settings_poll_secs() -> u64 {
    5
}

fn default_emoji_dir() -> String {
    "~/.slackcord/emoji".to_string()
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    19190
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Expand `~` to home directory in a path string.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${VAR_NAME}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = env_var_pattern();
    let mut result = input.to_string();
    let captures: Vec<(String, String)> = re
        .captures_iter(input)
        .map(|cap| (cap[0].to_string(), cap[1].to_string()))
        .collect();
    for (full_match, var_name) in captures {
        let value = std::env::var(&var_name)
            .map_err(|_| ConfigError::MissingEnvVar(var_name.clone()))?;
        result = result.replace(&full_match, &value);
    }
    Ok(result)
}

fn env_var_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex")
    })
}

/// Default config directory: ~/.slackcord/
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".slackcord")
}

/// Load config from `~/.slackcord/config.toml` (or a custom path).
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => config_dir().join("config.toml"),
    };

    if !config_path.exists() {
        return Err(ConfigError::NotFound(config_path));
    }

    let raw = std::fs::read_to_string(&config_path)?;
    parse_config(&raw)
}

/// Parse a config string (after reading from file).
pub fn parse_config(raw: &str) -> Result<Config, ConfigError> {
    let expanded = expand_env_vars(raw)?;
    let config: Config = toml::from_str(&expanded)?;
    Ok(config)
}

impl Config {
    /// Resolve the channel settings file path.
    pub fn settings_path(&self) -> PathBuf {
        let path = expand_tilde(&self.bridge.settings_path);
        if path.is_absolute() {
            path
        } else {
            config_dir().join(path)
        }
    }

    pub fn emoji_dir(&self) -> PathBuf {
        expand_tilde(&self.render.emoji_dir)
    }

    pub fn identity_plugin(&self) -> Option<PathBuf> {
        self.identity.plugin.as_deref().map(expand_tilde)
    }

    /// Empty user tokens (e.g. an unset optional env var rendered as "")
    /// count as absent.
    pub fn slack_user_token(&self) -> Option<&str> {
        self.slack
            .user_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
