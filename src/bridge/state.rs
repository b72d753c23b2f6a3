//! Interaction state for one benchmark run.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the bridge is in the observation/action cycle.
///
/// ```text
/// AwaitingObservation → ObservationReceived → AwaitingAction → ActionRelayed
///        ↑                                                          │
///        └──────────────────────────────────────────────────────────┘
/// any non-terminal phase → Terminal | StepLimitExceeded | Timeout
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgePhase {
    AwaitingObservation,
    ObservationReceived,
    AwaitingAction,
    ActionRelayed,
    Terminal,
    StepLimitExceeded,
    Timeout,
}

impl BridgePhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BridgePhase::Terminal | BridgePhase::StepLimitExceeded | BridgePhase::Timeout
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: BridgePhase) -> bool {
        use BridgePhase::*;

        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        matches!(
            (self, next),
            (AwaitingObservation, ObservationReceived)
                | (ObservationReceived, AwaitingAction)
                | (AwaitingAction, ActionRelayed)
                | (ActionRelayed, AwaitingObservation)
        )
    }
}

impl fmt::Display for BridgePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgePhase::AwaitingObservation => "awaiting_observation",
            BridgePhase::ObservationReceived => "observation_received",
            BridgePhase::AwaitingAction => "awaiting_action",
            BridgePhase::ActionRelayed => "action_relayed",
            BridgePhase::Terminal => "terminal",
            BridgePhase::StepLimitExceeded => "step_limit_exceeded",
            BridgePhase::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// One completed observation/action pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub observation: Value,
    pub action: Value,
}

/// Ordered history and current phase of a run's interaction.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionState {
    turns: Vec<Turn>,
    phase: BridgePhase,
    step_count: usize,
    #[serde(skip)]
    pending: Option<Value>,
}

impl Default for InteractionState {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionState {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            phase: BridgePhase::AwaitingObservation,
            step_count: 0,
            pending: None,
        }
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    fn advance(&mut self, next: BridgePhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal bridge transition {} -> {}",
            self.phase,
            next
        );
        self.phase = next;
    }

    pub(crate) fn receive_observation(&mut self, observation: Value) {
        self.advance(BridgePhase::ObservationReceived);
        self.pending = Some(observation);
    }

    pub(crate) fn await_action(&mut self) {
        self.advance(BridgePhase::AwaitingAction);
    }

    /// Completes the pair and bumps `step_count`.
    pub(crate) fn relay_action(&mut self, action: Value) {
        self.advance(BridgePhase::ActionRelayed);
        let observation = self.pending.take().unwrap_or(Value::Null);
        self.turns.push(Turn { observation, action });
        self.step_count += 1;
    }

    pub(crate) fn next_turn(&mut self) {
        self.advance(BridgePhase::AwaitingObservation);
    }

    /// Moves into a terminal phase. No-op if already terminal.
    pub(crate) fn finish(&mut self, phase: BridgePhase) {
        debug_assert!(phase.is_terminal());
        if !self.is_terminal() {
            self.phase = phase;
            self.pending = None;
        }
    }
}
