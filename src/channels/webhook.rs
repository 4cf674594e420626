//! Per-channel webhook identities and multipart webhook execution.

use super::WebhookMessage;
use crate::error::{BridgeError, Platform};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Looks up or registers the bridge webhook of a channel.
#[async_trait]
pub trait WebhookProvisioner: Send + Sync {
    /// Execute url of the channel webhook, creating one if needed.
    async fn find_or_create(&self, channel: &str) -> Result<String, BridgeError>;
}

/// One webhook per channel, resolved lazily. Resolution for a channel runs
/// under that channel's lock, so concurrent first sends register only once.
pub struct WebhookCache {
    provisioner: Arc<dyn WebhookProvisioner>,
    slots: Mutex<HashMap<String, Arc<Mutex<Option<String>>>>>,
}

impl WebhookCache {
    pub fn new(provisioner: Arc<dyn WebhookProvisioner>) -> Self {
        Self {
            provisioner,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn url(&self, channel: &str) -> Result<String, BridgeError> {
        let slot = self
            .slots
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .clone();

        let mut url = slot.lock().await;
        if let Some(url) = url.as_ref() {
            return Ok(url.clone());
        }
        let resolved = self.provisioner.find_or_create(channel).await?;
        tracing::debug!("Webhook ready for channel {}", channel);
        *url = Some(resolved.clone());
        Ok(resolved)
    }

    /// Forget a webhook that was deleted on the Discord side.
    pub async fn invalidate(&self, channel: &str) {
        let slot = self.slots.lock().await.get(channel).cloned();
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
    }
}

/// Webhook execute/edit over multipart HTTP.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl WebhookClient {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// `POST <url>?wait=<wait>`. With `wait`, returns the created message.
    pub async fn execute(
        &self,
        url: &str,
        message: &WebhookMessage,
        wait: bool,
    ) -> Result<Option<Value>, BridgeError> {
        let form = build_form(message, true)?;
        let resp = self
            .http
            .post(format!("{}?wait={}", url, wait))
            .multipart(form)
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(Platform::Discord, e, self.timeout))?;
        let body = read_response(resp, self.timeout).await?;
        Ok(if wait { Some(body) } else { None })
    }

    /// `PATCH <url>/messages/<id>`. The attachment set is replaced.
    pub async fn edit(&self, url: &str, message_id: &str, message: &WebhookMessage) -> Result<Value, BridgeError> {
        let form = build_form(message, false)?;
        let resp = self
            .http
            .patch(format!("{}/messages/{}", url, message_id))
            .multipart(form)
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(Platform::Discord, e, self.timeout))?;
        read_response(resp, self.timeout).await
    }
}

async fn read_response(resp: reqwest::Response, timeout: Duration) -> Result<Value, BridgeError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let text = resp
        .text()
        .await
        .map_err(|e| BridgeError::from_reqwest(Platform::Discord, e, timeout))?;
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(BridgeError::MessageNotFound(format!("webhook target: {}", text)));
    }
    if !status.is_success() {
        return Err(BridgeError::discord(format!("webhook HTTP {}: {}", status, text)));
    }
    serde_json::from_str(&text).map_err(|e| BridgeError::discord(format!("webhook response: {}", e)))
}

/// The JSON part of a webhook request.
pub fn payload(message: &WebhookMessage, with_identity: bool) -> Value {
    let mut attachments: Vec<Value> = message
        .keep_attachments
        .iter()
        .map(|id| json!({ "id": id }))
        .collect();
    attachments.extend(
        message
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| json!({ "id": i, "filename": f.filename })),
    );

    let mut body = json!({
        "content": message.content,
        "attachments": attachments,
        "allowed_mentions": { "parse": [] },
    });
    if with_identity {
        if let Some(username) = &message.username {
            body["username"] = json!(username);
        }
        if let Some(avatar) = &message.avatar_url {
            body["avatar_url"] = json!(avatar);
        }
    }
    body
}

fn build_form(message: &WebhookMessage, with_identity: bool) -> Result<Form, BridgeError> {
    let mut form = Form::new().text("payload_json", payload(message, with_identity).to_string());
    for (i, file) in message.files.iter().enumerate() {
        let part = Part::bytes(file.data.clone())
            .file_name(file.filename.clone())
            .mime_str(&file.content_type)
            .map_err(|e| BridgeError::Malformed(format!("content type {:?}: {}", file.content_type, e)))?;
        form = form.part(format!("files[{}]", i), part);
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::OutgoingFile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvisioner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WebhookProvisioner for CountingProvisioner {
        async fn find_or_create(&self, channel: &str) -> Result<String, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(format!("https://discord.test/api/webhooks/{}/token", channel))
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_once() {
        let provisioner = Arc::new(CountingProvisioner::default());
        let cache = Arc::new(WebhookCache::new(provisioner.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.url("D1").await.unwrap() })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), "https://discord.test/api/webhooks/D1/token");
        }
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);

        cache.url("D2").await.unwrap();
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 2);

        cache.invalidate("D1").await;
        cache.url("D1").await.unwrap();
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_payload_lists_kept_and_new_attachments() {
        let message = WebhookMessage {
            content: "hi".into(),
            username: Some("alice(42)".into()),
            avatar_url: None,
            keep_attachments: vec!["900".into()],
            files: vec![OutgoingFile::new("reactions.gif", vec![1, 2])],
        };
        let body = payload(&message, true);
        assert_eq!(body["content"], "hi");
        assert_eq!(body["username"], "alice(42)");
        assert!(body.get("avatar_url").is_none());
        assert_eq!(
            body["attachments"],
            json!([{ "id": "900" }, { "id": 0, "filename": "reactions.gif" }])
        );

        // Edits cannot change the webhook identity.
        let body = payload(&message, false);
        assert!(body.get("username").is_none());
    }

    #[test]
    fn test_form_builds() {
        let message = WebhookMessage {
            content: "x".into(),
            files: vec![OutgoingFile::new("a.png", vec![0; 4])],
            ..Default::default()
        };
        assert!(build_form(&message, true).is_ok());
    }
}
