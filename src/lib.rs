//! Core library for the Clarifia relay.  This module wires together the
//! request/response structures, the shared application state and the HTTP
//! handlers.  The upstream call sits behind [`upstream::CompletionBackend`]
//! so the handler can run against an injected backend in tests.

mod config;
pub mod error;
pub mod prompt;
pub mod rate_limit;
pub mod upstream;

pub use config::{AppConfig, RateLimitConfig};
pub use error::{AnalyzeError, ErrorBody};

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection},
    DefaultBodyLimit, Request, State,
};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as CorsAny, CorsLayer};

use crate::rate_limit::{enforce_rate_limit, FixedWindowLimiter};
use crate::upstream::{extract_raw_text, CompletionBackend, OpenAiClient, UpstreamRequest};

/// Longest accepted document text, counted in characters after trimming.
pub const MAX_TEXT_CHARS: usize = 12_000;

/// Header carrying the application shared secret.
pub const APP_KEY_HEADER: &str = "x-app-key";

/// Body accepted by `POST /analyze`.  `text` is kept as a raw JSON value so a
/// missing, null or non-string field is reported the same way as an empty one.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub text: Option<Value>,
}

impl AnalyzeRequest {
    /// Trimmed text, or `None` when absent, not a string, or blank.
    fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Application state shared across handlers.  Configuration is read once at
/// startup and never consulted from the environment afterwards.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// `None` when no upstream credential is configured.
    pub backend: Option<Arc<dyn CompletionBackend>>,
    pub limiter: Arc<FixedWindowLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig, backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        let limiter = Arc::new(FixedWindowLimiter::new(&config.rate_limit));
        Self {
            config: Arc::new(config),
            backend,
            limiter,
        }
    }
}

/// Build state from an explicit configuration, creating the upstream client
/// when a credential is present.  Missing secrets are only warned about.
pub fn build_state(config: AppConfig) -> Result<AppState, upstream::UpstreamError> {
    if config.app_key.is_none() {
        tracing::warn!("APP_KEY not set; every /analyze request will be rejected as unauthorized");
    }
    let backend: Option<Arc<dyn CompletionBackend>> = match config.openai_api_key.as_deref() {
        Some(key) => Some(Arc::new(OpenAiClient::new(
            &config.openai_base_url,
            key.to_string(),
            config.upstream_timeout_ms,
        )?)),
        None => {
            tracing::warn!("OPENAI_API_KEY not set; /analyze will answer with a misconfiguration error");
            None
        }
    };
    Ok(AppState::new(config, backend))
}

/// Build state from environment variables.  See `AppConfig::from_env` for
/// the variables read.
pub fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    Ok(build_state(config)?)
}

/// Build the Axum router and attach handlers.  `/analyze` runs the app-key
/// check, then the rate limiter, then the handler; `/health` skips both.
pub fn app(state: AppState) -> Router {
    // The last route layer added runs first.
    let analyze = Router::new()
        .route("/analyze", post(analyze_handler))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            enforce_rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            require_app_key,
        ));

    let cors = CorsLayer::new()
        .allow_origin(CorsAny)
        .allow_methods(CorsAny)
        .allow_headers(CorsAny);

    Router::new()
        .route("/health", get(health_handler))
        .merge(analyze)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(CatchPanicLayer::custom(panic_response)),
        )
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(%details, "request handler panicked");
    AnalyzeError::Internal(details).into_response()
}

/// Liveness probe.  Never authenticated, never rate limited.
async fn health_handler() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
}

/// Handler for `POST /analyze`.  Every outcome, success or failure, is a
/// JSON body; failures are rendered from [`AnalyzeError`].
async fn analyze_handler(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let start = Instant::now();
    let outcome = analyze(&state, payload).await;
    let latency_ms = start.elapsed().as_millis();
    match outcome {
        Ok((value, input_chars)) => {
            tracing::info!(status = 200u16, latency_ms, input_chars, "analyze completed");
            (StatusCode::OK, Json(value)).into_response()
        }
        Err(err) => {
            let status = err.status().as_u16();
            if err.status().is_server_error() {
                tracing::warn!(status, latency_ms, error = %err, "analyze failed");
            } else {
                tracing::info!(status, latency_ms, "analyze rejected");
            }
            err.into_response()
        }
    }
}

/// Text validation, upstream call and parsing, in that order.  The app key
/// has already been checked by `require_app_key`.  Each failure
/// short-circuits the remaining steps.
async fn analyze(
    state: &AppState,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<(Value, usize), AnalyzeError> {
    let request = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return Err(map_json_rejection(&state.config, rejection)),
    };
    let text = request.trimmed_text().ok_or_else(AnalyzeError::text_required)?;
    let input_chars = text.chars().count();
    if input_chars > MAX_TEXT_CHARS {
        return Err(AnalyzeError::text_too_long(MAX_TEXT_CHARS));
    }

    let backend = state.backend.as_ref().ok_or(AnalyzeError::Misconfigured)?;
    let upstream_request = UpstreamRequest {
        model: &state.config.model,
        instructions: &state.config.instructions,
        input: text,
        max_output_tokens: state.config.max_output_tokens,
    };
    let output = backend.complete(&upstream_request).await?;
    let raw = extract_raw_text(&output);

    let value = parse_ai_output(&raw)?;
    let missing = prompt::missing_result_fields(&value);
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "AI output is missing expected fields");
    }
    Ok((value, input_chars))
}

/// Parse the model's raw text as JSON.  No structural validation is applied.
pub fn parse_ai_output(raw: &str) -> Result<Value, AnalyzeError> {
    serde_json::from_str::<Value>(raw).map_err(|err| {
        tracing::warn!(error = %err, raw_len = raw.len(), "AI output is not valid JSON");
        AnalyzeError::invalid_ai_output(raw)
    })
}

fn ensure_authorized(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AnalyzeError> {
    let expected = expected.ok_or(AnalyzeError::Unauthorized)?;
    let provided = headers
        .get(APP_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AnalyzeError::Unauthorized)?;
    if provided != expected {
        return Err(AnalyzeError::Unauthorized);
    }
    Ok(())
}

/// Rejects callers without the configured app key before they reach the
/// rate limiter, so unauthenticated traffic never consumes a caller's quota.
async fn require_app_key(
    State(config): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    match ensure_authorized(req.headers(), config.app_key.as_deref()) {
        Ok(()) => next.run(req).await,
        Err(err) => {
            tracing::info!(status = err.status().as_u16(), "analyze rejected");
            err.into_response()
        }
    }
}

fn map_json_rejection(config: &AppConfig, rejection: JsonRejection) -> AnalyzeError {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            tracing::warn!(limit = config.max_body_bytes, "request body exceeded configured limit");
            AnalyzeError::PayloadTooLarge
        }
        other => {
            tracing::debug!(rejection = %other, "unreadable analyze body");
            AnalyzeError::text_required()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers_with_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(APP_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    #[test]
    fn authorization_requires_configured_and_matching_key() {
        assert!(ensure_authorized(&headers_with_key("s3cret"), Some("s3cret")).is_ok());
        assert!(matches!(
            ensure_authorized(&headers_with_key("wrong"), Some("s3cret")),
            Err(AnalyzeError::Unauthorized)
        ));
        assert!(matches!(
            ensure_authorized(&HeaderMap::new(), Some("s3cret")),
            Err(AnalyzeError::Unauthorized)
        ));
        assert!(matches!(
            ensure_authorized(&headers_with_key("s3cret"), None),
            Err(AnalyzeError::Unauthorized)
        ));
    }

    #[test]
    fn trimmed_text_rejects_blank_and_non_string_values() {
        let cases = [json!(""), json!("   \n\t"), json!(42), json!(null)];
        for case in cases {
            let req = AnalyzeRequest { text: Some(case.clone()) };
            assert!(req.trimmed_text().is_none(), "accepted {}", case);
        }
        assert!(AnalyzeRequest::default().trimmed_text().is_none());
        let req = AnalyzeRequest {
            text: Some(json!("  avis d'imposition  ")),
        };
        assert_eq!(req.trimmed_text(), Some("avis d'imposition"));
    }

    #[test]
    fn parse_ai_output_accepts_any_valid_json() {
        assert_eq!(parse_ai_output("{\"summary\":\"ok\"}").unwrap(), json!({"summary": "ok"}));
        assert_eq!(parse_ai_output(" [1] ").unwrap(), json!([1]));
        match parse_ai_output("not json") {
            Err(AnalyzeError::InvalidAiOutput { raw }) => assert_eq!(raw, "not json"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
