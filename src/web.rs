use crate::{
    app::{AppError, AppFactory, AppLocal, AppPaths, Message, Reply},
    bridge::{BridgeError, WorkHandle},
    capture::{PageInfo, PushedPage, Trigger},
    lock::FileLock,
};
use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::{fmt::Debug, sync::Arc, time::Duration};
use tokio::{signal, sync::broadcast};

/// How long a client waiting for the next capture event is held.
const EVENT_WAIT: Duration = Duration::from_secs(25);

#[derive(Clone)]
struct SharedState {
    app: Arc<AppLocal>,
}

pub fn router(app: Arc<AppLocal>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/health", get(health))
        .route("/api/events/next", get(next_event))
        .route("/api/message", post(message))
        .route("/api/capture_now", post(capture_now))
        .route("/api/search", post(search))
        .route("/api/stats", get(stats))
        .route("/api/captures/:id", get(get_capture))
        .route("/api/delete_all", post(delete_all))
        .route("/api/purge", post(purge))
        .route("/api/embed_query", post(embed_query))
        .route("/api/analyze_capture", post(analyze_capture))
        .route("/api/surface", post(push_surface).delete(clear_surface))
        .route("/api/surface/navigated", post(navigated))
        .route("/api/surface/focused", post(focused))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(app: AppLocal, addr: &str) -> anyhow::Result<()> {
    let app = Arc::new(app);
    app.start();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("listening on {addr}");

    axum::serve(listener, router(app.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

/// Runs the daemon until Ctrl+C or SIGTERM. Holds the store lock throughout.
pub fn start_daemon(paths: AppPaths, addr: &str) -> anyhow::Result<()> {
    let _lock = FileLock::try_acquire(&paths.base_path)
        .context("another traceback process owns the capture store")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let app = AppFactory::create_local_app(&paths)?;
            start_app(app, addr).await
        })
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::NotFound => axum::http::StatusCode::NOT_FOUND,
            AppError::Base64(_) => {
                log::warn!("{self:?}");
                axum::http::StatusCode::BAD_REQUEST
            }
            AppError::Bridge(BridgeError::Timeout(_) | BridgeError::SandboxUnavailable) => {
                log::warn!("{self:?}");
                axum::http::StatusCode::SERVICE_UNAVAILABLE
            }
            _ => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Long poll: answers with the next capture event, or `null` once
/// [`EVENT_WAIT`] passes without one.
async fn next_event(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    let mut events = state.app.subscribe();
    let event = tokio::time::timeout(EVENT_WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten();

    Json(json!({ "event": event }))
}

async fn message(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<Message>,
) -> Result<Json<Reply>, HttpError> {
    Ok(Json(state.app.handle_message(payload).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CaptureNowRequest {
    #[serde(default)]
    force: bool,
}

async fn capture_now(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<CaptureNowRequest>>,
) -> Result<Json<Reply>, HttpError> {
    let Json(payload) = payload.unwrap_or_default();
    let reply = state
        .app
        .handle_message(Message::CaptureNow {
            force: payload.force,
        })
        .await?;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    semantic: bool,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Reply>, HttpError> {
    let reply = state
        .app
        .handle_message(Message::Search {
            query: payload.query,
            semantic: payload.semantic,
        })
        .await?;
    Ok(Json(reply))
}

async fn stats(State(state): State<Arc<SharedState>>) -> Result<Json<Reply>, HttpError> {
    Ok(Json(state.app.handle_message(Message::GetStats).await?))
}

async fn get_capture(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<u64>,
) -> Result<Json<crate::captures::Capture>, HttpError> {
    let capture = state.app.get_capture(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(capture))
}

async fn delete_all(State(state): State<Arc<SharedState>>) -> Result<Json<Reply>, HttpError> {
    Ok(Json(state.app.handle_message(Message::DeleteAll).await?))
}

#[derive(Debug, Default, Deserialize)]
struct PurgeRequest {
    #[serde(default)]
    days: Option<u32>,
}

async fn purge(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<PurgeRequest>>,
) -> Result<Json<Reply>, HttpError> {
    let Json(payload) = payload.unwrap_or_default();
    let reply = state
        .app
        .handle_message(Message::Purge { days: payload.days })
        .await?;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
struct EmbedQueryRequest {
    text: String,
}

async fn embed_query(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<EmbedQueryRequest>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let vector = state.app.bridge().embed_query(&payload.text).await?;
    Ok(Json(json!({ "vector": vector })))
}

#[derive(Debug, Deserialize)]
struct AnalyzeCaptureRequest {
    id: u64,
    text: String,
}

async fn analyze_capture(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<AnalyzeCaptureRequest>,
) -> Result<Json<WorkHandle>, HttpError> {
    let handle = state.app.bridge().submit(payload.id, payload.text).await?;
    Ok(Json(handle))
}

#[derive(Deserialize)]
struct SurfaceRequest {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    favicon: Option<String>,
    /// base64 encoded PNG
    #[serde(default)]
    screenshot: Option<String>,
    #[serde(default)]
    dom_text: String,
}

impl Debug for SurfaceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SurfaceRequest {{ url: {:?}, title: {:?}, favicon: {:?}, screenshot: [REDACTED], dom_text: {} chars }}",
            self.url,
            self.title,
            self.favicon,
            self.dom_text.chars().count()
        )
    }
}

impl TryFrom<SurfaceRequest> for PushedPage {
    type Error = AppError;

    fn try_from(req: SurfaceRequest) -> Result<Self, Self::Error> {
        let screenshot = req
            .screenshot
            .filter(|s| !s.is_empty())
            .map(|s| STANDARD.decode(s))
            .transpose()?;

        Ok(PushedPage {
            info: PageInfo {
                url: req.url,
                title: req.title,
                favicon: req.favicon,
            },
            screenshot,
            dom_text: req.dom_text,
        })
    }
}

async fn push_surface(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SurfaceRequest>,
) -> Result<Json<serde_json::Value>, HttpError> {
    log::debug!("payload: {payload:?}");
    state.app.surface().update(payload.try_into()?);
    Ok(Json(json!({"success": true})))
}

/// The browser has no focused page any more.
async fn clear_surface(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    state.app.surface().clear();
    Json(json!({"success": true}))
}

async fn notify(
    state: &SharedState,
    trigger: Trigger,
    payload: Option<Json<SurfaceRequest>>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let page: Option<PushedPage> = match payload {
        Some(Json(payload)) => {
            log::debug!("{trigger:?} payload: {payload:?}");
            Some(payload.try_into()?)
        }
        None => None,
    };
    state.app.surface().notify(trigger, page);
    Ok(Json(json!({"success": true})))
}

async fn navigated(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<SurfaceRequest>>,
) -> Result<Json<serde_json::Value>, HttpError> {
    notify(&state, Trigger::Navigated, payload).await
}

async fn focused(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<SurfaceRequest>>,
) -> Result<Json<serde_json::Value>, HttpError> {
    notify(&state, Trigger::Focused, payload).await
}
