//! Read-only HTTP query surface.
//!
//! Every handler reads published snapshots; none of them touches the live
//! round state. The only write is the shutdown flag.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::connectors::ConnectionSession;
use crate::round::{FinalizedRound, RoundSnapshot};
use crate::utils::{wait_for_shutdown, LogEntry, LogJournal};
use crate::watchers::RoundViews;

/// Default page size for list endpoints.
const DEFAULT_LIMIT: usize = 50;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub views: RoundViews,
    pub session: watch::Receiver<ConnectionSession>,
    pub journal: LogJournal,
    pub shutdown: Arc<watch::Sender<bool>>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self, max: usize) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(max)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: i64,
    pub connection: ConnectionSession,
    pub finalized_rounds: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub games: Vec<FinalizedRound>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub count: usize,
    pub logs: Vec<LogEntry>,
}

/// Builds the query router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/game/current", get(current_round))
        .route("/game/history", get(history))
        .route("/logs", get(logs))
        .route("/shutdown", get(shutdown).post(shutdown))
        .with_state(state)
}

/// Serves the router until shutdown is requested.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "query surface listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown).await })
        .await
}

async fn root() -> &'static str {
    "ok"
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let stopping = *state.shutdown.borrow();
    Json(HealthResponse {
        status: if stopping { "stopping" } else { "ok" }.to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        connection: state.session.borrow().clone(),
        finalized_rounds: state.views.history.borrow().len(),
    })
}

async fn current_round(State(state): State<ApiState>) -> Json<RoundSnapshot> {
    Json(state.views.round.borrow().clone())
}

async fn history(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> Json<HistoryResponse> {
    let games: Vec<FinalizedRound> = {
        let all = state.views.history.borrow();
        all.iter().take(query.resolve(all.len())).cloned().collect()
    };
    Json(HistoryResponse {
        count: games.len(),
        games,
    })
}

async fn logs(State(state): State<ApiState>, Query(query): Query<LimitQuery>) -> Json<LogsResponse> {
    let logs = state.journal.tail(query.resolve(state.journal.capacity()));
    Json(LogsResponse {
        count: logs.len(),
        logs,
    })
}

async fn shutdown(State(state): State<ApiState>) -> (StatusCode, &'static str) {
    warn!("Shutdown requested via HTTP");
    state
        .journal
        .record("SHUTDOWN_REQUESTED", serde_json::json!({ "reason": "manual_request" }));
    state.shutdown.send_replace(true);
    (StatusCode::OK, "Shutting down...\n")
}
