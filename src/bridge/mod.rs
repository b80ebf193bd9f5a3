//! Bridge to the CAD host.
//!
//! The bridge carries JSON commands from tool calls to the host plugin over
//! a local TCP link and carries results back. When the host is unreachable
//! it either simulates results or refuses commands, depending on the mode.
//!
//! # Components
//!
//! - [`codec`]: command/result envelopes and stream framing
//! - [`ConnectionManager`]: socket lifecycle and request/response correlation
//! - [`ModeSelector`]: Live / Simulated / Degraded state machine
//! - [`Dispatcher`]: reference resolution, routing, retry, store effects
//! - [`MockExecutor`]: deterministic stand-in for the host
//! - [`Session`]: the owned context tying all of the above together
//! - [`HealthMonitor`]: periodic health checks and re-probes

pub mod codec;
mod commands;
mod connection;
mod dispatcher;
mod error;
mod health;
mod mode;
mod session;
mod simulator;

pub use codec::{CommandEnvelope, Framing, ResultEnvelope, Status, MAX_FRAME_LEN};
pub use commands::{CategorySource, CommandSpec, Effect, Reference};
pub use connection::{ConnectionManager, ConnectionSnapshot, ConnectionState};
pub use dispatcher::Dispatcher;
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use health::HealthMonitor;
pub use mode::{Mode, ModePolicy, ModeSelector, ModeTransition};
pub use session::{BridgeStatus, Session};
pub use simulator::MockExecutor;

pub(crate) use error::error_chain;
