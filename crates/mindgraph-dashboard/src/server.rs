//! Dashboard HTTP server
//!
//! Strictly read-only: every route is a GET over the store plus the
//! in-memory heartbeat roster.

use crate::state::DashboardState;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use mindgraph_store::MindGraphStore;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct AppState {
    pub store: MindGraphStore,
    pub dashboard: Arc<DashboardState>,
}

type ApiError = (StatusCode, String);

fn internal(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

pub async fn serve(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/api/sessions/:session_id", get(session_detail_handler))
        .route("/api/snapshots/latest", get(latest_snapshot_handler))
        .route("/api/agents", get(agents_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let bind_addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!("dashboard listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct SessionsQuery {
    limit: Option<i64>,
}

async fn sessions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state
        .store
        .list_sessions(query.limit.unwrap_or(50))
        .await
        .map_err(internal)?;
    Ok(Json(sessions))
}

async fn session_detail_handler(
    AxumPath(session_id): AxumPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .store
        .get_session(&session_id)
        .await
        .map_err(internal)?;
    let transcripts = state
        .store
        .latest_transcripts(&session_id, 20)
        .await
        .map_err(internal)?;
    let nodes = state
        .store
        .fetch_recent_nodes(&session_id, 50)
        .await
        .map_err(internal)?;
    let latest_snapshot = state
        .store
        .latest_snapshot(Some(&session_id))
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({
        "session": session,
        "transcripts": transcripts,
        "nodes": nodes,
        "latest_snapshot": latest_snapshot,
    })))
}

async fn latest_snapshot_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.store.latest_snapshot(None).await.map_err(internal)?;
    Ok(Json(snapshot))
}

async fn agents_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.dashboard.heartbeats())
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, ApiError> {
    let sessions = state.store.list_sessions(20).await.map_err(internal)?;
    let selected = sessions.first();
    let (transcripts, nodes, latest_snapshot) = match selected {
        Some(session) => (
            state
                .store
                .latest_transcripts(&session.session_id, 10)
                .await
                .map_err(internal)?,
            state
                .store
                .fetch_recent_nodes(&session.session_id, 20)
                .await
                .map_err(internal)?,
            state
                .store
                .latest_snapshot(Some(&session.session_id))
                .await
                .map_err(internal)?,
        ),
        None => (Vec::new(), Vec::new(), None),
    };

    let session_rows = if sessions.is_empty() {
        "<tr><td colspan=\"4\"><em>No sessions yet.</em></td></tr>".to_string()
    } else {
        sessions
            .iter()
            .map(|s| {
                format!(
                    "<tr><td><a href=\"/api/sessions/{id}\">{id}</a></td><td>{device}</td><td>{status}</td><td>{tail}</td></tr>",
                    id = s.session_id,
                    device = s.device_id,
                    status = s.status,
                    tail = s.current_main_tail_node_id.as_deref().unwrap_or("-"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let transcript_rows = transcripts
        .iter()
        .map(|t| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{:.2}</td></tr>",
                t.transcript_id, t.text, t.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let node_rows = nodes
        .iter()
        .map(|n| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                n.node_id,
                n.branch_type,
                n.branch_slot.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                n.node_text,
                n.override_reason,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let snapshot_line = match &latest_snapshot {
        Some(s) => format!(
            "{} nodes, sha256 <code>{}</code> @ {}",
            s.node_count, s.hash_sha256, s.snapshot_bucket_ts
        ),
        None => "no snapshot yet".to_string(),
    };
    let heartbeat_rows = state
        .dashboard
        .heartbeats()
        .iter()
        .map(|h| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                h.agent_name,
                h.status,
                h.last_processed_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into()),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(Html(format!(
        r#"<!DOCTYPE html><html><head><title>Collective MindGraph</title>
<style>
body {{ font-family: monospace; background: #1a1a2e; color: #eee; padding: 20px; max-width: 1100px; margin: 0 auto; }}
h1 {{ color: #f39c12; }} h2 {{ color: #3498db; }}
a {{ color: #3498db; }} code {{ background: #0f3460; padding: 2px 6px; border-radius: 4px; }}
table {{ border-collapse: collapse; width: 100%; margin: 10px 0; }}
td, th {{ border: 1px solid #0f3460; padding: 6px 10px; text-align: left; }}
th {{ background: #16213e; }}
</style></head><body>
<h1>Collective MindGraph v{version}</h1>
<h2>Sessions</h2>
<table><tr><th>session</th><th>device</th><th>status</th><th>main tail</th></tr>
{session_rows}</table>
<h2>Latest transcripts</h2>
<table><tr><th>transcript</th><th>text</th><th>confidence</th></tr>
{transcript_rows}</table>
<h2>Latest nodes</h2>
<table><tr><th>node</th><th>branch</th><th>slot</th><th>text</th><th>override</th></tr>
{node_rows}</table>
<h2>Latest snapshot</h2>
<p>{snapshot_line}</p>
<h2>Agents</h2>
<table><tr><th>agent</th><th>status</th><th>last processed</th></tr>
{heartbeat_rows}</table>
</body></html>"#,
        version = env!("CARGO_PKG_VERSION"),
    )))
}
