//! HTTP trace service: health, event ingestion and filtered event queries.
//!
//! Handlers are stateless; all state lives in the shared [`EventStore`].

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::models::{Event, SCHEMA_VERSION, now_timestamp};
use crate::storage::{DEFAULT_QUERY_LIMIT, EventQuery, EventStore};

/// Default bind address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8321;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Build the trace service router over a shared store.
pub fn router(store: Arc<EventStore>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/events", get(get_events).post(post_event))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}

/// Serve the trace service on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, store: Arc<EventStore>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "agentmeshd listening");
    }
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received interrupt, shutting down"),
        _ = terminate => info!("received terminate, shutting down"),
    }
}

/// Liveness probe
async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Query parameters for `GET /api/events`
#[derive(Debug, Deserialize)]
struct EventsParams {
    run_id: Option<String>,
    task_id: Option<String>,
    kind: Option<String>,
    limit: Option<String>,
}

/// List events matching all provided filters, in append order.
async fn get_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let limit = match params.limit.as_deref() {
        None => DEFAULT_QUERY_LIMIT,
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid limit"))?,
    };

    let query = EventQuery {
        run_id: params.run_id,
        task_id: params.task_id,
        kind: params.kind,
        limit,
    };

    let events = with_store(&state.store, "query", move |store| store.query(&query)).await?;

    Ok(Json(events))
}

/// Record one event. Missing `ts` / `schema_version` are filled server-side.
async fn post_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid JSON"))?;

    let Value::Object(mut data) = value else {
        return Err(api_error(StatusCode::BAD_REQUEST, "expected JSON object"));
    };

    fill_if_absent(&mut data, "ts", now_timestamp);
    fill_if_absent(&mut data, "schema_version", || SCHEMA_VERSION.to_string());

    let event = Event::from_value(Value::Object(data))
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let event = with_store(&state.store, "append", move |store| {
        store.append(&event).map(|_| event)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(event)))
}

/// Run a store operation on the blocking pool. SQLite calls and the store
/// lock never run on an async worker thread.
async fn with_store<T, F>(store: &Arc<EventStore>, op: &'static str, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&EventStore) -> crate::Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| {
            error!(op, error = %e, "store task failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        })?
        .map_err(|e| {
            error!(op, error = %e, "store operation failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

/// Set `key` when it is missing, null or an empty string.
fn fill_if_absent(data: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> String) {
    let absent = match data.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if absent {
        data.insert(key.to_string(), Value::String(value()));
    }
}
