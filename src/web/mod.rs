pub mod api;
pub mod sse;

use crate::bridge::Activity;
use crate::channels::dispatch::EventQueue;
use crate::channels::{BridgeEvent, ChannelDirectory};
use crate::config::WebConfig;
use crate::settings::SettingsStore;
use axum::response::IntoResponse;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared application state for all configurator handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub directory: Arc<dyn ChannelDirectory>,
    pub activity: broadcast::Sender<Activity>,
    pub queues: Arc<Vec<Arc<NamedQueue>>>,
    pub started_at: DateTime<Utc>,
}

/// An intake queue as shown on the status page.
pub struct NamedQueue {
    pub name: &'static str,
    pub queue: Arc<EventQueue<BridgeEvent>>,
}

/// Build the axum router with all API routes and static file serving.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::routes())
        .route("/api/events", axum::routing::get(sse::events_handler))
        .fallback(static_handler)
        .with_state(state)
}

/// Serve embedded static files (SPA fallback).
async fn static_handler(uri: axum::http::Uri) -> impl IntoResponse {
    let path = uri.path().trim_start_matches('/');

    let (content, mime_path) = if path.is_empty() || !path.contains('.') {
        (StaticAssets::get("index.html"), "index.html")
    } else {
        (
            StaticAssets::get(path).or_else(|| StaticAssets::get("index.html")),
            path,
        )
    };

    match content {
        Some(file) => {
            let mime = mime_guess::from_path(mime_path).first_or_octet_stream();
            (
                [(axum::http::header::CONTENT_TYPE, mime.as_ref())],
                file.data.to_vec(),
            )
                .into_response()
        }
        None => (axum::http::StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

#[derive(rust_embed::Embed)]
#[folder = "web/dist/"]
struct StaticAssets;

/// Serve the configurator until the task is dropped.
pub async fn start_server(config: &WebConfig, state: AppState) -> Result<(), anyhow::Error> {
    let addr = format!("{}:{}", config.bind, config.port);

    let app = build_router(state).layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Configurator available at http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AdmissionPolicy;
    use crate::testing::FakeDirectory;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    pub(crate) fn test_state(dir: &std::path::Path) -> (AppState, Arc<FakeDirectory>) {
        let directory = Arc::new(FakeDirectory::default());
        directory.add_slack("C1", "general");
        directory.add_discord("G1", "D1", "general");
        let settings = Arc::new(SettingsStore::new(dir.join("settings.json"), Vec::new()));
        let (activity, _) = broadcast::channel(16);
        let queue = Arc::new(EventQueue::new("slack", 8, AdmissionPolicy::Shed));
        let state = AppState {
            settings,
            directory: directory.clone(),
            activity,
            queues: Arc::new(vec![Arc::new(NamedQueue { name: "slack", queue })]),
            started_at: Utc::now(),
        };
        (state, directory)
    }

    #[tokio::test]
    async fn test_index_served() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path());
        let response = build_router(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "text/html"
        );
    }

    #[tokio::test]
    async fn test_events_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path());
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "text/event-stream"
        );
    }
}
