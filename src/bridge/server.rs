//! Serves any [`Agent`] over the agent HTTP contract.
//!
//! Lets a Rust agent be targeted by [`HttpAgent`](super::HttpAgent) or by
//! benchmark images that call an agent directly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::bridge::agent::{ActionRequest, ActionResponse, Agent};

/// HTTP front end for an agent.
#[derive(Clone)]
pub struct AgentServer {
    agent: Arc<dyn Agent>,
}

impl AgentServer {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }

    /// Build the axum router (`POST /action`, `GET /`).
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/action", post(take_action))
            .with_state(self.agent.clone())
    }

    /// Serves on an already bound listener until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, agent = %self.agent.name(), "Agent server listening");
        axum::serve(listener, self.router()).await
    }

    /// Binds `addr` and serves.
    pub async fn bind_and_serve(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }
}

async fn index(State(agent): State<Arc<dyn Agent>>) -> Json<Value> {
    Json(json!({ "agent": agent.name(), "status": "ok" }))
}

async fn take_action(
    State(agent): State<Arc<dyn Agent>>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, (StatusCode, Json<Value>)> {
    match agent.act(&request.input_data).await {
        Ok(action) => Ok(Json(ActionResponse {
            action: Value::String(action),
        })),
        Err(e) => {
            warn!(agent = %agent.name(), error = %e, "Agent failed to act");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": e.to_string() })),
            ))
        }
    }
}
