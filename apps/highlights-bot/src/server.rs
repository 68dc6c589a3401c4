use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::bot::BotService;
use crate::highlight::{HighlightError, HighlightRequest, HighlightService};
use crate::telegram::Update;

#[derive(Clone)]
pub struct AppState {
    bot: BotService,
    highlights: HighlightService,
    webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(bot: BotService, highlights: HighlightService, webhook_secret: &str) -> Self {
        Self {
            bot,
            highlights,
            webhook_secret: Arc::from(webhook_secret),
        }
    }

    fn secret_matches(&self, query: &WebhookQuery) -> bool {
        query
            .secret
            .as_deref()
            .is_some_and(|secret| constant_time_eq(secret, &self.webhook_secret))
    }
}

#[derive(Debug, Default, Deserialize)]
struct WebhookQuery {
    secret: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/highlight",
            post(submit_highlight).fallback(webhook_or_not_found),
        )
        .fallback(webhook_or_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

/// A POST carrying the webhook secret is an update, whatever its path.
async fn webhook_or_not_found(
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Response {
    if method == Method::POST && state.secret_matches(&query) {
        return handle_webhook(&state, &body).await;
    }
    ApiError::NotFound.into_response()
}

async fn submit_highlight(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Response {
    if state.secret_matches(&query) {
        return handle_webhook(&state, &body).await;
    }
    match process_highlight(&state, &body).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn process_highlight(state: &AppState, body: &[u8]) -> Result<(), ApiError> {
    let request = parse_json_body::<HighlightRequest>(body)?;
    state
        .highlights
        .submit(request)
        .await
        .map(|_| ())
        .map_err(ApiError::from_highlight)
}

async fn handle_webhook(state: &AppState, body: &[u8]) -> Response {
    let update: Update = match serde_json::from_slice(body) {
        Ok(update) => update,
        Err(error) => {
            tracing::error!(reason = %error, "undecodable webhook update");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook Error").into_response();
        }
    };
    state.bot.handle_update(update).await;
    StatusCode::OK.into_response()
}

fn parse_json_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("Request body missing".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|error| ApiError::BadRequest(format!("Invalid JSON body: {error}")))
}

#[derive(Debug)]
enum ApiError {
    NotFound,
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl ApiError {
    fn from_highlight(error: HighlightError) -> Self {
        let message = error.message().to_string();
        match error {
            HighlightError::MissingFields => Self::BadRequest(message),
            HighlightError::InvalidCode => Self::Forbidden(message),
            other => {
                tracing::error!(code = other.code(), reason = %other, "highlight request failed");
                Self::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Forbidden(message) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
            }
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
        }
    }
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    if left_bytes.len() != right_bytes.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (a, b) in left_bytes.iter().zip(right_bytes.iter()) {
        diff |= *a ^ *b;
    }
    diff == 0
}

#[cfg(test)]
mod tests;
