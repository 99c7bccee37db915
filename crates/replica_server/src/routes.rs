//! HTTP surface: clone sessions over SSE, durable clone lookups and the
//! preview proxy.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Query, RawQuery, State};
use axum::http::{Extensions, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::engine::{Engine, PreviewPage};
use crate::error::{ServerError, ServerResult};
use crate::events::{event_stream, SessionEvent, SharedReceiver};
use crate::proxy::ProxyResponse;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
}

#[derive(Debug, Deserialize)]
struct CloneRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<usize>,
    page_size: Option<usize>,
}

pub fn build_router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };
    Router::new()
        .route("/", get(root))
        .route("/api/clone", post(start_clone))
        .route("/api/clone/{id}", get(session_status))
        .route("/api/clone/{id}/events", get(session_events))
        .route("/api/clones", get(list_clones))
        .route("/api/clones/{id}", get(get_clone))
        .route("/api/preview/{id}", get(preview))
        .route("/api/sandbox/{id}", delete(delete_sandbox).get(proxy_root))
        .route("/api/sandbox/{id}/", get(proxy_root))
        .route("/api/sandbox/{id}/{*path}", get(proxy_path))
        .with_state(state)
}

/// Serve the API on the configured address until ctrl-c, then tear down
/// every environment.
pub async fn serve(engine: Arc<Engine>) -> ServerResult<()> {
    let bind = engine.config().bind.clone();
    let listener = TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    let sweeper = engine.spawn_sweeper(std::time::Duration::from_secs(60));
    let app = build_router(engine.clone());
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    sweeper.abort();
    engine.shutdown().await;
    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Replica orchestration engine" }))
}

/// Key admission is tracked under: the first forwarded address, else the
/// peer address.
fn client_key(headers: &HeaderMap, extensions: &Extensions) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded.to_string();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn start_clone(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    Json(request): Json<CloneRequest>,
) -> ServerResult<Response> {
    let key = client_key(&headers, &extensions);
    let started = state.engine.start_session(&request.url, &key)?;
    Ok(sse_response(state.engine, started.id, started.receiver))
}

async fn session_status(State(state): State<AppState>, Path(id): Path<String>) -> ServerResult<Response> {
    let info = state
        .engine
        .registry()
        .get(&id)
        .ok_or_else(|| ServerError::NotFound(format!("session {}", id)))?;
    Ok(Json(info).into_response())
}

async fn session_events(State(state): State<AppState>, Path(id): Path<String>) -> ServerResult<Response> {
    let receiver = state.engine.session_events(&id)?;
    Ok(sse_response(state.engine, id, receiver))
}

fn sse_response(engine: Arc<Engine>, id: String, receiver: SharedReceiver) -> Response {
    let timeout = engine.config().pipeline.event_timeout();
    let stream = event_stream(receiver, timeout).map(move |event| {
        if matches!(event, SessionEvent::End) {
            engine.end_session(&id);
        }
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<SseEvent, Infallible>(SseEvent::default().event(event.name()).data(json))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().text("ping"))
        .into_response()
}

async fn list_clones(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ServerResult<Response> {
    let page = state
        .engine
        .list_sessions(query.page.unwrap_or(1), query.page_size.unwrap_or(20))
        .await?;
    Ok(Json(page).into_response())
}

async fn get_clone(State(state): State<AppState>, Path(id): Path<String>) -> ServerResult<Response> {
    let record = state.engine.get_session(&id).await?;
    Ok(Json(record).into_response())
}

async fn preview(State(state): State<AppState>, Path(id): Path<String>) -> ServerResult<Response> {
    Ok(match state.engine.preview(&id).await? {
        PreviewPage::Redirect(location) => Redirect::temporary(&location).into_response(),
        PreviewPage::Source(page) => Html(page).into_response(),
    })
}

async fn delete_sandbox(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let deleted = state.engine.delete_environment(&id).await;
    Json(serde_json::json!({ "id": id, "deleted": deleted }))
}

async fn proxy_root(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    into_response(state.engine.proxy(&id, "", query.as_deref()).await)
}

async fn proxy_path(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    into_response(state.engine.proxy(&id, &path, query.as_deref()).await)
}

fn into_response(proxied: ProxyResponse) -> Response {
    let status = StatusCode::from_u16(proxied.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &proxied.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        builder = builder.header(name, value);
    }
    match builder.body(Body::from(proxied.body)) {
        Ok(response) => response,
        Err(e) => {
            warn!("Failed building proxied response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
