//! HTTP API and web UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Single-page chat UI |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/config` | Current responder configuration |
//! | `POST` | `/api/initialize` | (Re)build the responder with new settings |
//! | `POST` | `/api/chat` | Answer a query |
//!
//! # Error Contract
//!
//! Every error response is `{ "error": "<message>" }`. Invalid input
//! (a body that does not deserialize, unknown `service_type`, missing or
//! malformed template, empty query) is `400`; a failing vector store or model backend is `502`.
//!
//! The active responder sits behind an async `RwLock`. `initialize` builds a
//! complete replacement before swapping it in, so a chat request sees either
//! the old or the new configuration, never a mix. Until the first
//! `initialize`, chat builds a responder from the configuration file.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::llm::ServiceType;
use crate::prompt::{TemplateSet, TemplateStore};
use crate::responder::{
    BackendFactory, ConfiguredBackends, Responder, ResponderConfig, ResponderError,
};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    backends: Arc<dyn BackendFactory>,
    templates: Arc<TemplateStore>,
    responder: Arc<RwLock<Option<Arc<Responder>>>>,
}

impl AppState {
    pub fn new(config: Config, backends: Arc<dyn BackendFactory>) -> Self {
        Self {
            config: Arc::new(config),
            backends,
            templates: Arc::new(TemplateStore::new()),
            responder: Arc::new(RwLock::new(None)),
        }
    }

    fn build_responder(&self, config: ResponderConfig) -> Result<Responder, ApiError> {
        let templates = self
            .templates
            .load_set(&config.keyword_prompt_path, &config.context_prompt_path)
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        Responder::with_templates(config, templates, self.backends.as_ref())
            .map_err(|e| ApiError::bad_request(format!("{:#}", e)))
    }

    /// The active responder, building one from the configuration file if
    /// `initialize` has not been called yet.
    async fn responder(&self) -> Result<Arc<Responder>, ApiError> {
        if let Some(responder) = self.responder.read().await.as_ref() {
            return Ok(responder.clone());
        }
        let mut slot = self.responder.write().await;
        if let Some(responder) = slot.as_ref() {
            return Ok(responder.clone());
        }
        let responder = Arc::new(self.build_responder(ResponderConfig::from_config(&self.config))?);
        *slot = Some(responder.clone());
        Ok(responder)
    }
}

/// Build the router. Exposed for embedding and for tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/config", get(handle_config))
        .route("/api/initialize", post(handle_initialize))
        .route("/api/chat", post(handle_chat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `[server].bind` with backends built from the configuration,
/// until ctrl-c.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backends: Arc<dyn BackendFactory> = Arc::new(ConfiguredBackends::new(config));
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), backends));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("Chat UI on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("server stopping");
        })
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<ResponderError> for ApiError {
    fn from(err: ResponderError) -> Self {
        match err {
            ResponderError::EmptyQuery => ApiError::bad_request("query must not be empty"),
            ResponderError::Backend(e) => ApiError::bad_gateway(format!("{:#}", e)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        } else {
            tracing::warn!(status = %self.status, error = %self.message, "request rejected");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

// ============ GET / and /health ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/config ============

async fn handle_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.responder.read().await.as_ref() {
        Some(responder) => Json(serde_json::json!({
            "initialized": true,
            "config": responder.config(),
        })),
        None => Json(serde_json::json!({ "initialized": false })),
    }
}

// ============ POST /api/initialize ============

#[derive(Debug, Default, Deserialize)]
struct InitializeRequest {
    model_name: Option<String>,
    collection_name: Option<String>,
    keyword_prompt_path: Option<PathBuf>,
    context_prompt_path: Option<PathBuf>,
    service_type: Option<String>,
}

#[derive(Serialize)]
struct InitializeResponse<'a> {
    status: &'static str,
    #[serde(flatten)]
    config: &'a ResponderConfig,
}

async fn handle_initialize(
    State(state): State<AppState>,
    body: Result<Json<InitializeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    let mut config = ResponderConfig::from_config(&state.config);

    let model = req.model_name.as_deref().filter(|m| !m.trim().is_empty());
    match req.service_type.as_deref() {
        Some(service) => {
            let service: ServiceType = service
                .parse()
                .map_err(|e: anyhow::Error| ApiError::bad_request(e.to_string()))?;
            config = config.with_service(service, model, &state.config.llm);
        }
        None => {
            if let Some(model) = model {
                config.model_name = model.to_string();
            }
        }
    }

    if let Some(collection) = req.collection_name.filter(|c| !c.trim().is_empty()) {
        config.collection_name = collection;
    }

    let (keyword_path, context_path) = TemplateSet::resolve_paths(
        &state.config.prompts,
        req.keyword_prompt_path.as_deref(),
        req.context_prompt_path.as_deref(),
    );
    config.keyword_prompt_path = keyword_path;
    config.context_prompt_path = context_path;

    let responder = Arc::new(state.build_responder(config)?);
    let body = Json(InitializeResponse {
        status: "initialized",
        config: responder.config(),
    })
    .into_response();

    *state.responder.write().await = Some(responder);
    Ok(body)
}

// ============ POST /api/chat ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    query: String,
    num_chunks: Option<usize>,
    display_context: Option<bool>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = body?;
    if req.query.trim().is_empty() {
        return Err(ApiError::bad_request("No query provided"));
    }

    let responder = state.responder().await?;
    let mut options = responder.default_options();
    if let Some(n) = req.num_chunks {
        if n == 0 {
            return Err(ApiError::bad_request("num_chunks must be >= 1"));
        }
        options.num_chunks = n;
    }
    options.display_context = req
        .display_context
        .unwrap_or(state.config.responder.display_context);

    let answer = responder.respond(&req.query, &options).await?;
    Ok(Json(ChatResponse {
        response: answer.response,
        context: answer.context,
    }))
}
