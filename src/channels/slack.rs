use super::dispatch::{Admission, EventQueue};
use super::{
    Block, BridgeEvent, ChannelInfo, EmojiChange, RemoteFile, SharedFile, SlackFile, SlackMessage,
    SlackPost, SlackReaction, SlackTransport, SlackUserProfile,
};
use crate::config::SlackConfig;
use crate::error::{BridgeError, Platform};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use slack_morphism::prelude::*;
use slack_morphism_hyper::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

const API_BASE: &str = "https://slack.com/api/";
const PROFILE_TTL: Duration = Duration::from_secs(600);

/// State stored in SlackClientEventsUserState for the push events callback.
struct ListenerState {
    queue: Arc<EventQueue<BridgeEvent>>,
}

/// Slack side of the bridge: Socket Mode intake through slack-morphism, Web
/// API calls as plain form/JSON posts.
pub struct SlackAdapter {
    config: SlackConfig,
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    http: reqwest::Client,
    timeout: Duration,
    workspace_url: RwLock<String>,
    profiles: tokio::sync::RwLock<HashMap<String, (Instant, SlackUserProfile)>>,
}

enum Body {
    Form(Vec<(&'static str, String)>),
    Json(JsonValue),
}

impl SlackAdapter {
    pub fn new(config: SlackConfig, timeout: Duration) -> Result<Self, BridgeError> {
        let connector = SlackClientHyperConnector::new();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::slack(format!("http client: {}", e)))?;
        Ok(Self {
            config,
            client: Arc::new(SlackClient::new(connector)),
            http,
            timeout,
            workspace_url: RwLock::new(String::new()),
            profiles: tokio::sync::RwLock::new(HashMap::new()),
        })
    }

    /// Verify the bot token and learn the workspace url.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let auth = self
            .call("auth.test", &self.config.bot_token, Body::Form(vec![]))
            .await?;
        let url = auth.get("url").and_then(JsonValue::as_str).unwrap_or_default();
        *self.workspace_url.write().unwrap_or_else(|e| e.into_inner()) = url.to_string();
        tracing::info!(
            "Slack bot {} connected to {}",
            auth.get("user_id").and_then(JsonValue::as_str).unwrap_or("?"),
            url
        );
        Ok(())
    }

    /// Open the Socket Mode listener and feed events into `queue`.
    pub async fn start(&self, queue: Arc<EventQueue<BridgeEvent>>) -> Result<(), anyhow::Error> {
        let app_token = SlackApiToken::new(SlackApiTokenValue(self.config.app_token.clone()));

        let socket_mode_config = SlackClientSocketModeConfig::new().with_max_connections_count(2);

        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(self.client.clone())
                .with_error_handler(error_handler)
                .with_user_state(Arc::new(ListenerState { queue })),
        );

        let callbacks =
            SlackSocketModeListenerCallbacks::new().with_push_events(push_events_handler);

        let listener =
            SlackClientSocketModeListener::new(&socket_mode_config, listener_env, callbacks);
        listener.listen_for(&app_token).await?;

        tokio::spawn(async move {
            listener.serve().await;
        });

        tracing::info!("Slack adapter started (Socket Mode)");
        Ok(())
    }

    fn user_token(&self) -> Result<&str, BridgeError> {
        self.config
            .user_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| BridgeError::slack("no user token configured"))
    }

    async fn call(&self, method: &str, token: &str, body: Body) -> Result<JsonValue, BridgeError> {
        let request = self
            .http
            .post(format!("{}{}", API_BASE, method))
            .bearer_auth(token);
        let request = match body {
            Body::Form(fields) => request.form(&fields),
            Body::Json(value) => request.json(&value),
        };
        let resp = request
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(Platform::Slack, e, self.timeout))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("?")
                .to_string();
            return Err(BridgeError::slack(format!("{} rate limited, retry after {}s", method, retry_after)));
        }
        let value: JsonValue = resp
            .json()
            .await
            .map_err(|e| BridgeError::from_reqwest(Platform::Slack, e, self.timeout))?;
        api_result(method, value)
    }

    async fn history(&self, channel: &str, fields: Vec<(&'static str, String)>) -> Result<Vec<SlackMessage>, BridgeError> {
        let mut form = vec![("channel", channel.to_string())];
        form.extend(fields);
        let resp = self
            .call("conversations.history", &self.config.bot_token, Body::Form(form))
            .await?;
        let raw: Vec<RawMessage> = serde_json::from_value(resp.get("messages").cloned().unwrap_or(JsonValue::Null))
            .map_err(|e| BridgeError::slack(format!("conversations.history: {}", e)))?;
        Ok(raw.into_iter().map(|m| m.into_message(channel)).collect())
    }

    async fn shared_file(&self, method: &str, file_id: &str) -> Result<SharedFile, BridgeError> {
        let resp = self
            .call(method, self.user_token()?, Body::Form(vec![("file", file_id.to_string())]))
            .await?;
        let file = resp.get("file").cloned().unwrap_or(JsonValue::Null);
        Ok(SharedFile {
            name: str_field(&file, "name"),
            filetype: str_field(&file, "filetype"),
            permalink: str_field(&file, "permalink"),
            permalink_public: str_field(&file, "permalink_public"),
        })
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelInfo>, BridgeError> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut form = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", "1000".to_string()),
            ];
            if !cursor.is_empty() {
                form.push(("cursor", cursor.clone()));
            }
            let resp = self
                .call("conversations.list", &self.config.bot_token, Body::Form(form))
                .await?;
            if let Some(list) = resp.get("channels").and_then(JsonValue::as_array) {
                channels.extend(list.iter().map(channel_info));
            }
            cursor = resp
                .pointer("/response_metadata/next_cursor")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            if cursor.is_empty() {
                return Ok(channels);
            }
        }
    }

    pub async fn create_channel(&self, name: &str) -> Result<ChannelInfo, BridgeError> {
        let resp = self
            .call(
                "conversations.create",
                &self.config.bot_token,
                Body::Form(vec![("name", name.to_string())]),
            )
            .await?;
        let info = channel_info(resp.get("channel").unwrap_or(&JsonValue::Null));
        tracing::info!("Created Slack channel #{} ({})", info.name, info.id);
        Ok(info)
    }
}

#[async_trait]
impl SlackTransport for SlackAdapter {
    async fn send(&self, post: SlackPost) -> Result<String, BridgeError> {
        let resp = self
            .call("chat.postMessage", &self.config.bot_token, Body::Json(post_body(&post)))
            .await?;
        resp.get("ts")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::slack("chat.postMessage returned no ts"))
    }

    async fn update(&self, channel: &str, ts: &str, text: &str, blocks: &[Block]) -> Result<(), BridgeError> {
        self.call(
            "chat.update",
            &self.config.bot_token,
            Body::Json(json!({
                "channel": channel,
                "ts": ts,
                "text": text,
                "blocks": blocks,
            })),
        )
        .await?;
        Ok(())
    }

    async fn get_message(&self, channel: &str, ts: &str) -> Result<SlackMessage, BridgeError> {
        let messages = self
            .history(
                channel,
                vec![
                    ("latest", ts.to_string()),
                    ("inclusive", "true".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        messages
            .into_iter()
            .find(|m| m.ts == ts)
            .ok_or_else(|| BridgeError::MessageNotFound(format!("Slack {}/{}", channel, ts)))
    }

    async fn list_recent(&self, channel: &str, limit: u8) -> Result<Vec<SlackMessage>, BridgeError> {
        self.history(channel, vec![("limit", limit.max(1).to_string())])
            .await
    }

    async fn delete(&self, channel: &str, ts: &str, as_user: bool) -> Result<(), BridgeError> {
        let token = if as_user {
            self.user_token()?
        } else {
            &self.config.bot_token
        };
        let mut form = vec![("channel", channel.to_string()), ("ts", ts.to_string())];
        if as_user {
            form.push(("as_user", "true".to_string()));
        }
        self.call("chat.delete", token, Body::Form(form)).await?;
        Ok(())
    }

    async fn user_profile(&self, user: &str) -> Result<SlackUserProfile, BridgeError> {
        if let Some((at, profile)) = self.profiles.read().await.get(user) {
            if at.elapsed() < PROFILE_TTL {
                return Ok(profile.clone());
            }
        }
        let resp = self
            .call(
                "users.info",
                &self.config.bot_token,
                Body::Form(vec![("user", user.to_string())]),
            )
            .await?;
        let profile = parse_profile(resp.pointer("/user/profile").unwrap_or(&JsonValue::Null));
        self.profiles
            .write()
            .await
            .insert(user.to_string(), (Instant::now(), profile.clone()));
        Ok(profile)
    }

    async fn reactions(&self, channel: &str, ts: &str) -> Result<Vec<SlackReaction>, BridgeError> {
        let resp = self
            .call(
                "reactions.get",
                &self.config.bot_token,
                Body::Form(vec![
                    ("channel", channel.to_string()),
                    ("timestamp", ts.to_string()),
                    ("full", "true".to_string()),
                ]),
            )
            .await?;
        Ok(parse_reactions(&resp))
    }

    async fn emoji_list(&self) -> Result<HashMap<String, String>, BridgeError> {
        let resp = self
            .call("emoji.list", &self.config.bot_token, Body::Form(vec![]))
            .await?;
        serde_json::from_value(resp.get("emoji").cloned().unwrap_or_else(|| json!({})))
            .map_err(|e| BridgeError::slack(format!("emoji.list: {}", e)))
    }

    async fn files_remote_add(&self, file: RemoteFile) -> Result<(), BridgeError> {
        self.call(
            "files.remote.add",
            &self.config.bot_token,
            Body::Form(vec![
                ("external_id", file.external_id),
                ("external_url", file.external_url),
                ("title", file.title),
                ("filetype", file.filetype),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn files_remote_info(&self, external_id: &str) -> Result<RemoteFile, BridgeError> {
        let resp = self
            .call(
                "files.remote.info",
                &self.config.bot_token,
                Body::Form(vec![("external_id", external_id.to_string())]),
            )
            .await?;
        let file = resp.get("file").cloned().unwrap_or(JsonValue::Null);
        Ok(RemoteFile {
            external_id: external_id.to_string(),
            external_url: str_field(&file, "external_url"),
            title: str_field(&file, "title"),
            filetype: str_field(&file, "filetype"),
        })
    }

    async fn files_remote_remove(&self, external_id: &str) -> Result<(), BridgeError> {
        self.call(
            "files.remote.remove",
            &self.config.bot_token,
            Body::Form(vec![("external_id", external_id.to_string())]),
        )
        .await?;
        Ok(())
    }

    async fn share_public(&self, file_id: &str) -> Result<SharedFile, BridgeError> {
        self.shared_file("files.sharedPublicURL", file_id).await
    }

    async fn revoke_public(&self, file_id: &str) -> Result<SharedFile, BridgeError> {
        self.shared_file("files.revokePublicURL", file_id).await
    }

    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>, BridgeError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.config.bot_token)
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(Platform::Slack, e, self.timeout))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BridgeError::NotFound(format!("file {}", url)));
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| BridgeError::from_reqwest(Platform::Slack, e, self.timeout))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BridgeError::from_reqwest(Platform::Slack, e, self.timeout))?;
        Ok(bytes.to_vec())
    }

    fn has_user_token(&self) -> bool {
        self.user_token().is_ok()
    }

    fn workspace_url(&self) -> String {
        self.workspace_url
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Socket Mode callbacks
// ---------------------------------------------------------------------------

async fn push_events_handler(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    let states_r = states.read().await;
    let state = states_r.get_user_state::<Arc<ListenerState>>().cloned();
    drop(states_r);

    let Some(state) = state else {
        return Ok(());
    };
    let body = match serde_json::to_value(&event.event) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Unreadable Slack push event: {}", e);
            return Ok(());
        }
    };
    if let Some(event) = decode_event(&body) {
        let kind = event.kind();
        if state.queue.push(event).await == Admission::Rejected {
            tracing::debug!("Slack {} event shed", kind);
        }
    }
    Ok(())
}

fn error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    _state: SlackClientEventsUserState,
) -> http::StatusCode {
    tracing::error!("Slack Socket Mode error: {:?}", err);
    http::StatusCode::OK
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A message as it appears in push events and conversations.history.
#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    blocks: Option<Vec<Block>>,
    #[serde(default)]
    files: Option<Vec<SlackFile>>,
}

impl RawMessage {
    fn into_message(self, channel: &str) -> SlackMessage {
        SlackMessage {
            channel: self.channel.unwrap_or_else(|| channel.to_string()),
            ts: self.ts,
            user: self.user,
            bot_id: self.bot_id,
            subtype: self.subtype,
            text: self.text.unwrap_or_default(),
            blocks: self.blocks.unwrap_or_default(),
            files: self.files.unwrap_or_default(),
        }
    }
}

/// Translate the inner body of a push event into a bridge event.
pub fn decode_event(body: &JsonValue) -> Option<BridgeEvent> {
    match body.get("type").and_then(JsonValue::as_str)? {
        "message" => {
            let raw: RawMessage = match serde_json::from_value(body.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Unreadable Slack message event: {}", e);
                    return None;
                }
            };
            let channel = raw.channel.clone()?;
            Some(BridgeEvent::SlackMessage(raw.into_message(&channel)))
        }
        kind @ ("reaction_added" | "reaction_removed") => {
            let item = body.get("item")?;
            if item.get("type").and_then(JsonValue::as_str) != Some("message") {
                return None;
            }
            Some(BridgeEvent::SlackReaction {
                channel: item.get("channel")?.as_str()?.to_string(),
                ts: item.get("ts")?.as_str()?.to_string(),
                user: str_field(body, "user"),
                reaction: str_field(body, "reaction"),
                added: kind == "reaction_added",
            })
        }
        "emoji_changed" => decode_emoji_change(body).map(BridgeEvent::SlackEmojiChanged),
        _ => None,
    }
}

fn decode_emoji_change(body: &JsonValue) -> Option<EmojiChange> {
    match body.get("subtype").and_then(JsonValue::as_str)? {
        "add" => Some(EmojiChange::Add {
            name: str_field(body, "name"),
            value: str_field(body, "value"),
        }),
        "remove" => Some(EmojiChange::Remove {
            names: body
                .get("names")
                .and_then(JsonValue::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }),
        "rename" => Some(EmojiChange::Rename {
            old_name: str_field(body, "old_name"),
            new_name: str_field(body, "new_name"),
            value: str_field(body, "value"),
        }),
        _ => None,
    }
}

/// Unwrap the `{ok, error}` envelope of a Web API response.
pub fn api_result(method: &str, value: JsonValue) -> Result<JsonValue, BridgeError> {
    if value.get("ok").and_then(JsonValue::as_bool) == Some(true) {
        return Ok(value);
    }
    let error = value
        .get("error")
        .and_then(JsonValue::as_str)
        .unwrap_or("unknown_error");
    Err(match error {
        "message_not_found" | "thread_not_found" => {
            BridgeError::MessageNotFound(format!("{}: {}", method, error))
        }
        e if e.ends_with("_not_found") => BridgeError::NotFound(format!("{}: {}", method, e)),
        e => BridgeError::slack(format!("{}: {}", method, e)),
    })
}

fn post_body(post: &SlackPost) -> JsonValue {
    let mut body = json!({
        "channel": post.channel,
        "text": post.text,
        "unfurl_links": false,
        "unfurl_media": false,
    });
    if !post.blocks.is_empty() {
        body["blocks"] = json!(post.blocks);
    }
    if let Some(username) = &post.username {
        body["username"] = json!(username);
    }
    if let Some(icon) = &post.icon_url {
        body["icon_url"] = json!(icon);
    }
    if let Some(emoji) = &post.icon_emoji {
        body["icon_emoji"] = json!(emoji);
    }
    body
}

fn parse_profile(profile: &JsonValue) -> SlackUserProfile {
    SlackUserProfile {
        display_name: str_field(profile, "display_name"),
        real_name: str_field(profile, "real_name"),
        image_url: ["image_192", "image_72", "image_48"]
            .iter()
            .find_map(|key| profile.get(*key).and_then(JsonValue::as_str))
            .map(str::to_string),
    }
}

fn parse_reactions(resp: &JsonValue) -> Vec<SlackReaction> {
    resp.pointer("/message/reactions")
        .and_then(JsonValue::as_array)
        .map(|list| {
            list.iter()
                .map(|r| SlackReaction {
                    name: str_field(r, "name"),
                    count: r.get("count").and_then(JsonValue::as_u64).unwrap_or(0),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn channel_info(value: &JsonValue) -> ChannelInfo {
    ChannelInfo {
        id: str_field(value, "id"),
        name: str_field(value, "name"),
    }
}

fn str_field(value: &JsonValue, key: &str) -> String {
    value
        .get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_with_files() {
        let body = json!({
            "type": "message",
            "subtype": "file_share",
            "channel": "C1",
            "user": "U1",
            "text": "look",
            "ts": "1700000000.000100",
            "files": [{
                "id": "F1", "name": "cat.png", "filetype": "png",
                "url_private": "https://files.slack.com/cat.png",
                "permalink": "https://ws.slack.com/files/U1/F1/cat.png"
            }]
        });
        let Some(BridgeEvent::SlackMessage(message)) = decode_event(&body) else {
            panic!("expected a message");
        };
        assert_eq!(message.channel, "C1");
        assert_eq!(message.user.as_deref(), Some("U1"));
        assert_eq!(message.subtype.as_deref(), Some("file_share"));
        assert_eq!(message.files.len(), 1);
        assert!(message.files[0].is_image());
    }

    #[test]
    fn test_decode_reactions() {
        let body = json!({
            "type": "reaction_removed",
            "user": "U2",
            "reaction": "tada",
            "item": {"type": "message", "channel": "C1", "ts": "1.2"}
        });
        assert_eq!(
            decode_event(&body),
            Some(BridgeEvent::SlackReaction {
                channel: "C1".into(),
                ts: "1.2".into(),
                user: "U2".into(),
                reaction: "tada".into(),
                added: false,
            })
        );

        let on_file = json!({
            "type": "reaction_added",
            "user": "U2",
            "reaction": "tada",
            "item": {"type": "file", "file": "F1"}
        });
        assert_eq!(decode_event(&on_file), None);
    }

    #[test]
    fn test_decode_emoji_changes() {
        let add = json!({"type": "emoji_changed", "subtype": "add", "name": "party", "value": "https://e/p.gif"});
        assert_eq!(
            decode_event(&add),
            Some(BridgeEvent::SlackEmojiChanged(EmojiChange::Add {
                name: "party".into(),
                value: "https://e/p.gif".into(),
            }))
        );
        let remove = json!({"type": "emoji_changed", "subtype": "remove", "names": ["a", "b"]});
        assert_eq!(
            decode_event(&remove),
            Some(BridgeEvent::SlackEmojiChanged(EmojiChange::Remove {
                names: vec!["a".into(), "b".into()],
            }))
        );
        let rename = json!({"type": "emoji_changed", "subtype": "rename",
                            "old_name": "a", "new_name": "b", "value": "alias:c"});
        assert!(matches!(
            decode_event(&rename),
            Some(BridgeEvent::SlackEmojiChanged(EmojiChange::Rename { .. }))
        ));
        assert_eq!(decode_event(&json!({"type": "channel_created"})), None);
    }

    #[test]
    fn test_api_envelope() {
        assert!(api_result("chat.update", json!({"ok": true, "ts": "1.0"})).is_ok());
        assert!(matches!(
            api_result("chat.update", json!({"ok": false, "error": "message_not_found"})),
            Err(BridgeError::MessageNotFound(_))
        ));
        assert!(matches!(
            api_result("users.info", json!({"ok": false, "error": "user_not_found"})),
            Err(BridgeError::NotFound(_))
        ));
        let err = api_result("chat.postMessage", json!({"ok": false, "error": "not_in_channel"})).unwrap_err();
        assert_eq!(err.to_string(), "slack transport error: chat.postMessage: not_in_channel");
    }

    #[test]
    fn test_post_body() {
        let post = SlackPost {
            channel: "C1".into(),
            text: "hi".into(),
            blocks: vec![Block::section("hi")],
            username: Some("Bobby".into()),
            icon_url: None,
            icon_emoji: Some(":discord:".into()),
        };
        let body = post_body(&post);
        assert_eq!(body["blocks"][0]["type"], "section");
        assert_eq!(body["username"], "Bobby");
        assert_eq!(body["icon_emoji"], ":discord:");
        assert!(body.get("icon_url").is_none());
        assert_eq!(body["unfurl_links"], false);
    }

    #[test]
    fn test_parse_profile_and_reactions() {
        let profile = parse_profile(&json!({
            "display_name": "", "real_name": "Alice Liddell",
            "image_72": "https://avatars/72.png"
        }));
        assert_eq!(profile.name(), "Alice Liddell");
        assert_eq!(profile.image_url.as_deref(), Some("https://avatars/72.png"));

        let reactions = parse_reactions(&json!({
            "ok": true,
            "message": {"reactions": [{"name": "+1", "count": 3, "users": []}]}
        }));
        assert_eq!(reactions, vec![SlackReaction { name: "+1".into(), count: 3 }]);
        assert!(parse_reactions(&json!({"ok": true, "message": {}})).is_empty());
    }

    #[test]
    fn test_history_message_defaults_channel() {
        let raw: RawMessage = serde_json::from_value(json!({
            "type": "message", "ts": "1.0", "bot_id": "B1", "text": "x",
            "blocks": [{"type": "divider"}]
        }))
        .unwrap();
        let message = raw.into_message("C9");
        assert_eq!(message.channel, "C9");
        assert_eq!(message.bot_id.as_deref(), Some("B1"));
        assert_eq!(message.blocks, vec![Block::Divider]);
    }
}
