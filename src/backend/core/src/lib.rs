//! # EdgeSwarm Core
//!
//! Auction-based dispatch of inference workloads across a fleet of
//! heterogeneous edge devices.
//!
//! ## Architecture
//!
//! - **Coordinator**: registry of live workers plus the auction engine
//!   that turns each prompt into exactly one dispatch decision
//! - **Agent**: the device-side worker: control connection, status
//!   heartbeat, bid pricing and the execute listener
//! - **Bandit**: ridge-regression + lower-confidence-bound scorer each
//!   worker uses to price its own bids
//! - **Protocol**: typed wire messages over a concatenated-JSON framing
//! - **Vision**: the image classification pipeline (preprocess,
//!   external inference, postprocess)
//! - **Telemetry**: structured logging infrastructure

pub mod agent;
pub mod bandit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod telemetry;
pub mod vision;

pub use error::{ErrorCode, ErrorSeverity, Result, SwarmError};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::agent::{Agent, AgentOptions, AgentState, DeviceFlags, Executor};
    pub use crate::bandit::{BidScorer, CompositeModel, LatencyModel, Observation};
    pub use crate::config::{Config, CoordinatorConfig, ScoringMode};
    pub use crate::coordinator::{Coordinator, Registry, WorkerEntry};
    pub use crate::error::{ErrorCode, ErrorSeverity, Result, SwarmError};
    pub use crate::protocol::{
        status, JsonFrameCodec, MessageType, MetricSnapshot, WireMessage,
    };
}
