//! Event channel between the container-facing relay and the bridge loop.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

const CHANNEL_CAPACITY: usize = 8;

/// Something the container side did.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The benchmark posted a new state and is waiting for an action.
    Observation(PendingObservation),
    /// The benchmark signalled completion, optionally with a final payload.
    Finished(Option<Value>),
    /// The container exited with the given code.
    Exited(i64),
}

/// Reply delivered to a waiting container request.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayReply {
    Action(Value),
    Rejected(String),
}

/// An observation waiting for exactly one reply.
#[derive(Debug)]
pub struct PendingObservation {
    state: Value,
    reply: oneshot::Sender<RelayReply>,
}

impl PendingObservation {
    pub fn new(state: Value) -> (Self, oneshot::Receiver<RelayReply>) {
        let (reply, rx) = oneshot::channel();
        (Self { state, reply }, rx)
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Sends the action back. Returns false if the container stopped waiting.
    pub fn respond(self, action: Value) -> bool {
        self.reply.send(RelayReply::Action(action)).is_ok()
    }

    /// Fails the waiting request with a reason.
    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.reply.send(RelayReply::Rejected(reason.into()));
    }
}

/// Receiving end owned by the bridge for one run.
#[derive(Debug)]
pub struct InteractionChannel {
    tx: mpsc::Sender<ChannelEvent>,
    rx: mpsc::Receiver<ChannelEvent>,
}

impl Default for InteractionChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self { tx, rx }
    }

    /// A sender for the relay or the container exit watcher.
    pub fn sender(&self) -> mpsc::Sender<ChannelEvent> {
        self.tx.clone()
    }

    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pending_observation_round_trip() {
        let (pending, rx) = PendingObservation::new(json!({"turn": 1}));
        assert_eq!(pending.state(), &json!({"turn": 1}));
        assert!(pending.respond(json!({"action": "a"})));
        assert_eq!(rx.await.unwrap(), RelayReply::Action(json!({"action": "a"})));
    }

    #[tokio::test]
    async fn test_respond_after_requester_left() {
        let (pending, rx) = PendingObservation::new(json!({}));
        drop(rx);
        assert!(!pending.respond(json!({})));
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let mut channel = InteractionChannel::new();
        let tx = channel.sender();
        tx.send(ChannelEvent::Finished(None)).await.unwrap();
        tx.send(ChannelEvent::Exited(0)).await.unwrap();

        assert!(matches!(channel.next_event().await, Some(ChannelEvent::Finished(None))));
        assert!(matches!(channel.next_event().await, Some(ChannelEvent::Exited(0))));
    }
}
