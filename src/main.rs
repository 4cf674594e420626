use clap::{Parser, Subcommand};
use slackcord::bridge::{Activity, Bridge, BridgeOptions};
use slackcord::channels::discord::DiscordAdapter;
use slackcord::channels::dispatch::{Dispatcher, EventQueue, KeyedLock};
use slackcord::channels::slack::SlackAdapter;
use slackcord::channels::{BridgeEvent, ChannelDirectory, PlatformDirectory, SlackTransport};
use slackcord::config::Config;
use slackcord::render::gif::GifRenderer;
use slackcord::render::EmojiCatalog;
use slackcord::settings::channel_map::ChannelMap;
use slackcord::settings::SettingsStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "slackcord",
    version,
    about = "Bidirectional Slack <-> Discord channel bridge"
)]
struct Cli {
    /// Path to config file (default: ~/.slackcord/config.toml)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and an empty channel settings file
    Init,
    /// Load config and settings, then print the resolved channel pairs
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slackcord=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => run_init(cli.config.as_deref()),
        Some(Commands::Check) => run_check(cli.config.as_deref()),
        None => run_main(cli.config.as_deref()).await,
    }
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"[slack]
bot_token = "${SLACK_BOT_TOKEN}"
app_token = "${SLACK_APP_TOKEN}"
# user_token = "${SLACK_USER_TOKEN}"
# file_publish_emoji = "globe_with_meridians"

[discord]
bot_token = "${DISCORD_BOT_TOKEN}"
webhook_name = "Slack Synchronizer"
repost = true

[bridge]
settings_path = "~/.slackcord/settings.json"
program_name = "slackcord"
admission = "block"

[render]
emoji_dir = "~/.slackcord/emoji"

[web]
enabled = true
bind = "127.0.0.1"
port = 19190
"#;

fn run_init(config_override: Option<&Path>) -> anyhow::Result<()> {
    let dir = match config_override {
        Some(p) => p
            .parent()
            .map(|d| d.to_path_buf())
            .unwrap_or_else(slackcord::config::config_dir),
        None => slackcord::config::config_dir(),
    };
    std::fs::create_dir_all(&dir)?;
    std::fs::create_dir_all(dir.join("emoji"))?;

    let config_path = match config_override {
        Some(p) => p.to_path_buf(),
        None => dir.join("config.toml"),
    };
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG)?;
        println!("Created {}", config_path.display());
    } else {
        println!("Config already exists: {}", config_path.display());
    }

    let settings_path = dir.join("settings.json");
    if !settings_path.exists() {
        std::fs::write(&settings_path, "[]\n")?;
        println!("Created {}", settings_path.display());
    }

    println!("slackcord initialized at {}", dir.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

fn run_check(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = slackcord::config::load_config(config_path)?;
    let settings_path = config.settings_path();
    let store = SettingsStore::load(&settings_path)?;

    println!("=== Config ===");
    println!("Settings: {}", settings_path.display());
    println!(
        "Slack user token: {}",
        if config.slack_user_token().is_some() { "set (reposting enabled)" } else { "not set" }
    );
    println!("Discord repost: {}", config.discord.repost);
    println!(
        "Queues: {} events, {:?}, {} workers",
        config.bridge.queue_capacity, config.bridge.admission, config.bridge.max_concurrency
    );
    println!();

    let pairs = store.describe();
    println!("=== Channel pairs ({}) ===", pairs.len());
    for pair in pairs {
        println!("  {}", pair);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

async fn load_emoji(slack: &SlackAdapter) -> HashMap<String, String> {
    match slack.emoji_list().await {
        Ok(emoji) => {
            tracing::info!("Loaded {} custom emoji", emoji.len());
            emoji
        }
        Err(e) => {
            tracing::warn!("Failed to load custom emoji: {}", e);
            HashMap::new()
        }
    }
}

fn queue(name: &'static str, config: &Config) -> Arc<EventQueue<BridgeEvent>> {
    Arc::new(EventQueue::new(
        name,
        config.bridge.queue_capacity,
        config.bridge.admission,
    ))
}

async fn run_main(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = slackcord::config::load_config(config_path)?;
    let timeout = config.bridge.transport_timeout();

    let slack = Arc::new(SlackAdapter::new(config.slack.clone(), timeout)?);
    slack.connect().await?;
    let discord = Arc::new(DiscordAdapter::new(&config.discord, timeout)?);

    let directory: Arc<dyn ChannelDirectory> = Arc::new(PlatformDirectory {
        slack: slack.clone(),
        discord: discord.clone(),
    });
    let channel_map = Arc::new(ChannelMap::new(
        directory.clone(),
        config.bridge.channel_map_refresh(),
    ));
    let settings_path = config.settings_path();
    let settings = Arc::new(SettingsStore::load(&settings_path)?.with_channel_map(channel_map));
    tracing::info!("Settings: {}", settings_path.display());
    for line in settings.describe() {
        tracing::info!("  {}", line);
    }

    let catalog = Arc::new(EmojiCatalog::new(load_emoji(&slack).await));
    let renderer = Arc::new(GifRenderer::new(
        slack.clone(),
        catalog.clone(),
        config.emoji_dir(),
    ));
    let identity = slackcord::identity::from_config(config.identity_plugin().as_deref(), timeout);

    let (activity_tx, _) = tokio::sync::broadcast::channel::<Activity>(256);
    let bridge = Arc::new(Bridge::new(
        slack.clone(),
        discord.clone(),
        settings.clone(),
        renderer,
        identity,
        catalog,
        BridgeOptions::from_config(&config),
        activity_tx.clone(),
    ));

    // One intake queue per platform; reaction keys are shared across both.
    let slack_queue = queue("slack", &config);
    let discord_queue = queue("discord", &config);
    let locks = Arc::new(KeyedLock::default());
    let dispatchers = vec![
        Dispatcher::new(
            "slack",
            slack_queue.clone(),
            bridge.clone(),
            locks.clone(),
            config.bridge.max_concurrency,
            config.bridge.retry_delay(),
        )
        .spawn(),
        Dispatcher::new(
            "discord",
            discord_queue.clone(),
            bridge,
            locks,
            config.bridge.max_concurrency,
            config.bridge.retry_delay(),
        )
        .spawn(),
    ];

    slack.start(slack_queue.clone()).await?;
    discord.start(discord_queue.clone()).await?;

    // Settings hot-reload watcher
    let watcher = slackcord::watcher::SettingsWatcher::new(settings_path).spawn(
        settings.clone(),
        Duration::from_secs(config.bridge.settings_poll_secs.max(1)),
    );

    if config.web.enabled {
        let state = slackcord::web::AppState {
            settings,
            directory,
            activity: activity_tx,
            queues: Arc::new(vec![
                Arc::new(slackcord::web::NamedQueue {
                    name: "slack",
                    queue: slack_queue.clone(),
                }),
                Arc::new(slackcord::web::NamedQueue {
                    name: "discord",
                    queue: discord_queue.clone(),
                }),
            ]),
            started_at: chrono::Utc::now(),
        };
        let web_config = config.web.clone();
        tokio::spawn(async move {
            if let Err(e) = slackcord::web::start_server(&web_config, state).await {
                tracing::error!("Web server error: {}", e);
            }
        });
    }

    tracing::info!("slackcord running. Waiting for events...");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    watcher.abort();
    slack_queue.close();
    discord_queue.close();
    let drain = futures::future::join_all(dispatchers);
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("Dispatchers did not drain in time");
    }
    Ok(())
}
