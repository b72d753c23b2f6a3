//! Per-run HTTP relay the benchmark container talks to.
//!
//! The relay is bound to an OS-assigned port before the container starts, and its
//! address is injected as `AGENT_URL`. It never calls the agent itself: every
//! request becomes a [`ChannelEvent`] for the bridge loop, and `/action` holds
//! the container's request open until the bridge replies.
//!
//! Routes:
//! - `POST /action`: `{"input_data": {...}}` (or a bare object) → parsed action
//! - `POST /finish`: completion signal, optional JSON body
//! - `GET /`: liveness

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::channel::{ChannelEvent, PendingObservation, RelayReply};
use crate::error::BridgeError;

type HandlerError = (StatusCode, Json<Value>);

#[derive(Clone)]
struct RelayState {
    events: mpsc::Sender<ChannelEvent>,
    outstanding: Arc<AtomicBool>,
}

/// Clears the outstanding flag when the `/action` handler finishes.
struct OutstandingGuard(Arc<AtomicBool>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A running relay for one benchmark run.
pub struct RelayServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RelayServer {
    /// Binds on `bind_host` with an OS-assigned port and starts serving.
    pub async fn bind(
        bind_host: &str,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind((bind_host, 0))
            .await
            .map_err(|e| BridgeError::RelayBind {
                addr: format!("{bind_host}:0"),
                reason: e.to_string(),
            })?;
        let addr = listener.local_addr().map_err(|e| BridgeError::RelayBind {
            addr: format!("{bind_host}:0"),
            reason: e.to_string(),
        })?;

        let state = RelayState {
            events,
            outstanding: Arc::new(AtomicBool::new(false)),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                warn!(error = %e, "Relay server stopped with error");
            }
        });

        info!(%addr, "Relay listening");
        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// URL the container uses to reach this relay.
    pub fn agent_url(&self, advertise_host: &str) -> String {
        format!("http://{}:{}", advertise_host, self.port())
    }

    /// Stops accepting requests and waits briefly for in-flight ones.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(Duration::from_secs(2), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
        debug!(addr = %self.addr, "Relay shut down");
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/action", post(relay_action))
        .route("/finish", post(relay_finish))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

fn error_body(status: StatusCode, detail: impl Into<String>) -> HandlerError {
    (status, Json(json!({ "detail": detail.into() })))
}

/// Unwraps the `input_data` envelope; bare objects pass through.
fn unwrap_input_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("input_data") => {
            map.remove("input_data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

async fn relay_action(
    State(state): State<RelayState>,
    body: Bytes,
) -> Result<Json<Value>, HandlerError> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))?;

    if state.outstanding.swap(true, Ordering::SeqCst) {
        return Err(error_body(
            StatusCode::CONFLICT,
            "an observation is already awaiting an action",
        ));
    }
    let _guard = OutstandingGuard(state.outstanding.clone());

    let (pending, reply) = PendingObservation::new(unwrap_input_data(body));
    if state
        .events
        .send(ChannelEvent::Observation(pending))
        .await
        .is_err()
    {
        return Err(error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "run is no longer accepting observations",
        ));
    }

    match reply.await {
        Ok(RelayReply::Action(action)) => Ok(Json(action)),
        Ok(RelayReply::Rejected(reason)) => Err(error_body(StatusCode::SERVICE_UNAVAILABLE, reason)),
        Err(_) => Err(error_body(
            StatusCode::BAD_GATEWAY,
            "bridge dropped the observation",
        )),
    }
}

async fn relay_finish(State(state): State<RelayState>, body: Bytes) -> StatusCode {
    let payload = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<Value>(&body).ok()
    };

    match state.events.send(ChannelEvent::Finished(payload)).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::GONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::InteractionChannel;

    #[test]
    fn test_unwrap_input_data() {
        assert_eq!(
            unwrap_input_data(json!({"input_data": {"q": 1}})),
            json!({"q": 1})
        );
        assert_eq!(unwrap_input_data(json!({"q": 1})), json!({"q": 1}));
    }

    #[tokio::test]
    async fn test_relay_forwards_observation_and_reply() {
        let mut channel = InteractionChannel::new();
        let relay = RelayServer::bind("127.0.0.1", channel.sender()).await.unwrap();
        let url = format!("{}/action", relay.agent_url("127.0.0.1"));

        let request = tokio::spawn(async move {
            reqwest::Client::new()
                .post(url)
                .json(&json!({"input_data": {"turn": 0}}))
                .send()
                .await
                .unwrap()
        });

        match channel.next_event().await {
            Some(ChannelEvent::Observation(pending)) => {
                assert_eq!(pending.state(), &json!({"turn": 0}));
                pending.respond(json!({"action": "go"}));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let response = request.await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"action": "go"}));

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_outstanding_action_is_rejected() {
        let mut channel = InteractionChannel::new();
        let relay = RelayServer::bind("127.0.0.1", channel.sender()).await.unwrap();
        let url = format!("{}/action", relay.agent_url("127.0.0.1"));
        let client = reqwest::Client::new();

        let first = {
            let client = client.clone();
            let url = url.clone();
            tokio::spawn(async move { client.post(url).json(&json!({"n": 1})).send().await.unwrap() })
        };

        // Hold the first observation unanswered.
        let pending = match channel.next_event().await {
            Some(ChannelEvent::Observation(p)) => p,
            other => panic!("unexpected event: {other:?}"),
        };

        let second = client.post(&url).json(&json!({"n": 2})).send().await.unwrap();
        assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

        pending.reject("step limit reached");
        let first = first.await.unwrap();
        assert_eq!(first.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_finish_emits_event() {
        let mut channel = InteractionChannel::new();
        let relay = RelayServer::bind("127.0.0.1", channel.sender()).await.unwrap();

        let status = reqwest::Client::new()
            .post(format!("{}/finish", relay.agent_url("127.0.0.1")))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::OK);
        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Finished(None))
        ));

        relay.shutdown().await;
    }
}
