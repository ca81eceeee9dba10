//! Remote-control surface of the agent: a trigger endpoint that kicks a
//! pull cycle in the background and a liveness probe.

use crate::config::{AgentConfig, DownloadMode};
use crate::puller::{run_cycle_with, PullRequest};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Clone)]
pub struct AgentApiContext {
    pub config: Arc<AgentConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PullParams {
    pub limit: Option<usize>,
    pub mode: Option<DownloadMode>,
    #[serde(default)]
    pub lotes: Vec<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub since_days: Option<u64>,
}

impl From<PullParams> for PullRequest {
    fn from(params: PullParams) -> Self {
        PullRequest {
            limit: params.limit,
            mode: params.mode,
            lotes: params.lotes,
            date_from: params.date_from,
            date_to: params.date_to,
            since_days: params.since_days,
        }
    }
}

pub fn router(ctx: AgentApiContext) -> Router {
    Router::new()
        .route(
            "/agent/pull",
            get(trigger_pull_default).post(trigger_pull),
        )
        .route("/agent/status", get(status))
        .with_state(ctx)
}

pub async fn start_agent_api(addr: SocketAddr, ctx: AgentApiContext) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, %err, "cannot bind agent API");
            return;
        }
    };
    info!("Starting agent API at {addr}");
    let _ = axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| info!("Error shutting down agent API: {:?}", e));
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn status() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn trigger_pull_default(
    State(ctx): State<AgentApiContext>,
) -> (StatusCode, Json<Value>) {
    spawn_cycle(ctx, PullRequest::default())
}

async fn trigger_pull(
    State(ctx): State<AgentApiContext>,
    Json(params): Json<PullParams>,
) -> (StatusCode, Json<Value>) {
    spawn_cycle(ctx, params.into())
}

fn spawn_cycle(ctx: AgentApiContext, request: PullRequest) -> (StatusCode, Json<Value>) {
    info!("pull cycle requested remotely");
    tokio::spawn(async move {
        match run_cycle_with(&ctx.config, request).await {
            Ok(summary) => info!(
                offered = summary.offered,
                downloaded = summary.downloaded,
                failed = summary.failed,
                "remote pull cycle finished"
            ),
            Err(err) => error!(%err, "remote pull cycle failed"),
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "started", "msg": "pull cycle running in background"})),
    )
}
