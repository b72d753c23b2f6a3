//! The interaction loop for one run.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::bridge::adapter::BenchmarkAdapter;
use crate::bridge::agent::Agent;
use crate::bridge::channel::{ChannelEvent, InteractionChannel, PendingObservation};
use crate::bridge::state::{BridgePhase, InteractionState};
use crate::error::{AgentError, BridgeError};

/// Why the interaction loop ended.
#[derive(Debug)]
pub enum Termination {
    /// The benchmark finished: explicit signal or container exit.
    Completed { exit_code: Option<i64> },
    StepLimitExceeded { max_steps: usize },
    Timeout,
    AgentFailure(AgentError),
    ProtocolFailure(BridgeError),
}

impl Termination {
    pub fn is_completed(&self) -> bool {
        matches!(self, Termination::Completed { .. })
    }
}

/// Final state and termination reason of a run's interaction.
#[derive(Debug)]
pub struct BridgeOutcome {
    pub state: InteractionState,
    pub termination: Termination,
}

/// Drives observation → agent → action turns strictly sequentially.
pub struct AgentBridge {
    run_id: String,
    agent: Arc<dyn Agent>,
    adapter: Arc<dyn BenchmarkAdapter>,
    max_steps: usize,
}

impl AgentBridge {
    pub fn new(
        run_id: impl Into<String>,
        agent: Arc<dyn Agent>,
        adapter: Arc<dyn BenchmarkAdapter>,
        max_steps: usize,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            agent,
            adapter,
            max_steps,
        }
    }

    /// Runs until the benchmark finishes, a limit is hit, or a turn fails.
    ///
    /// Every exit path leaves `state` in a terminal phase. A still-waiting
    /// container request is always answered or dropped before returning.
    pub async fn run(&self, channel: &mut InteractionChannel, deadline: Instant) -> BridgeOutcome {
        let mut state = InteractionState::new();

        let termination = loop {
            let event = match timeout_at(deadline, channel.next_event()).await {
                Err(_) => break Termination::Timeout,
                Ok(None) => break Termination::Completed { exit_code: None },
                Ok(Some(event)) => event,
            };

            let pending = match event {
                ChannelEvent::Finished(_) => {
                    debug!(run_id = %self.run_id, "Benchmark signalled completion");
                    break Termination::Completed { exit_code: None };
                }
                ChannelEvent::Exited(code) => {
                    debug!(run_id = %self.run_id, exit_code = code, "Container exited");
                    break Termination::Completed {
                        exit_code: Some(code),
                    };
                }
                ChannelEvent::Observation(pending) => pending,
            };

            if state.step_count() >= self.max_steps {
                warn!(run_id = %self.run_id, max_steps = self.max_steps, "Step limit reached");
                pending.reject(format!("step limit of {} reached", self.max_steps));
                break Termination::StepLimitExceeded {
                    max_steps: self.max_steps,
                };
            }

            match self.turn(&mut state, pending, deadline).await {
                Ok(()) => state.next_turn(),
                Err(termination) => break termination,
            }
        };

        let phase = match &termination {
            Termination::StepLimitExceeded { .. } => BridgePhase::StepLimitExceeded,
            Termination::Timeout => BridgePhase::Timeout,
            _ => BridgePhase::Terminal,
        };
        state.finish(phase);

        info!(
            run_id = %self.run_id,
            steps = state.step_count(),
            phase = %state.phase(),
            "Interaction finished"
        );

        BridgeOutcome { state, termination }
    }

    /// One full observation/action pair.
    async fn turn(
        &self,
        state: &mut InteractionState,
        pending: PendingObservation,
        deadline: Instant,
    ) -> Result<(), Termination> {
        state.receive_observation(pending.state().clone());

        let env_info = match self.adapter.prepare_environment(pending.state()) {
            Ok(env_info) => env_info,
            Err(e) => {
                pending.reject(e.to_string());
                return Err(Termination::ProtocolFailure(e));
            }
        };

        state.await_action();
        let raw_action = match timeout_at(deadline, self.agent.act(&env_info)).await {
            Err(_) => {
                pending.reject("run timed out waiting for the agent");
                return Err(Termination::Timeout);
            }
            Ok(Err(e)) => {
                warn!(run_id = %self.run_id, step = state.step_count(), error = %e, "Agent call failed");
                pending.reject(e.to_string());
                return Err(Termination::AgentFailure(e));
            }
            Ok(Ok(raw)) => raw,
        };

        let action = match self.adapter.parse_action(&raw_action) {
            Ok(parsed) => with_raw_prediction(parsed, &raw_action),
            Err(e) => {
                pending.reject(e.to_string());
                return Err(Termination::ProtocolFailure(e));
            }
        };

        state.relay_action(action.clone());
        if !pending.respond(action) {
            // The container gave up on the request; it is exiting.
            debug!(run_id = %self.run_id, "Container stopped waiting for the action");
            return Err(Termination::Completed { exit_code: None });
        }

        debug!(run_id = %self.run_id, step = state.step_count(), "Action relayed");
        Ok(())
    }
}

fn with_raw_prediction(parsed: Value, raw: &str) -> Value {
    match parsed {
        Value::Object(mut map) => {
            map.entry("raw_prediction")
                .or_insert_with(|| Value::String(raw.to_string()));
            Value::Object(map)
        }
        other => other,
    }
}
