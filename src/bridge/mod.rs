//! Agent bridge: the turn-based loop between a benchmark container and an agent.
//!
//! ```text
//! container ──POST /action──▶ RelayServer ──ChannelEvent──▶ AgentBridge ──act()──▶ Agent
//!     ▲                                                         │
//!     └──────────────── parsed action (HTTP 200) ◀──────────────┘
//! ```
//!
//! The relay is per run and only translates HTTP into [`ChannelEvent`]s; the
//! [`AgentBridge`] owns the [`InteractionState`] and enforces the step limit and
//! the run deadline.

pub mod adapter;
pub mod agent;
pub mod channel;
pub mod relay;
pub mod server;
pub mod session;
pub mod state;

pub use adapter::{BenchmarkAdapter, PassthroughAdapter};
pub use agent::{ActionRequest, ActionResponse, Agent, HttpAgent};
pub use channel::{ChannelEvent, InteractionChannel, PendingObservation, RelayReply};
pub use relay::RelayServer;
pub use server::AgentServer;
pub use session::{AgentBridge, BridgeOutcome, Termination};
pub use state::{BridgePhase, InteractionState, Turn};
