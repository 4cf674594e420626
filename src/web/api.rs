use super::AppState;
use crate::channels::dispatch::QueueStats;
use crate::channels::ChannelInfo;
use crate::settings::{GuildTable, SettingsError};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings).put(put_settings))
        .route("/slack/channels", get(slack_channels))
        .route("/discord/{guild}/channels", get(discord_channels))
        .route("/status", get(status))
}

async fn get_settings(State(state): State<AppState>) -> Json<Vec<GuildTable>> {
    Json(state.settings.snapshot().as_ref().clone())
}

async fn put_settings(
    State(state): State<AppState>,
    Json(tables): Json<Vec<GuildTable>>,
) -> Result<Response, AppError> {
    match state.settings.save(tables).await {
        Ok(()) => {
            for line in state.settings.describe() {
                tracing::info!("  {}", line);
            }
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(SettingsError::Invalid(reason)) => Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": reason })),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

async fn slack_channels(State(state): State<AppState>) -> Result<Json<Vec<ChannelInfo>>, AppError> {
    let mut channels = state.directory.slack_channels().await?;
    channels.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(channels))
}

async fn discord_channels(
    State(state): State<AppState>,
    Path(guild): Path<String>,
) -> Result<Json<Vec<ChannelInfo>>, AppError> {
    Ok(Json(state.directory.discord_channels(&guild).await?))
}

#[derive(Serialize)]
struct QueueStatus {
    name: &'static str,
    #[serde(flatten)]
    stats: QueueStats,
}

#[derive(Serialize)]
struct Status {
    started_at: DateTime<Utc>,
    pairs: Vec<String>,
    queues: Vec<QueueStatus>,
}

async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        started_at: state.started_at,
        pairs: state.settings.describe(),
        queues: state
            .queues
            .iter()
            .map(|q| QueueStatus {
                name: q.name,
                stats: q.queue.stats(),
            })
            .collect(),
    })
}

/// Unified error type for API handlers.
struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!("Configurator request failed: {}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
