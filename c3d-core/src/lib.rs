//! Executable model of the C3D three-level cache-coherence protocol.
//!
//! See the module docs for the layer each one implements: [`message`] and
//! [`network`] are the wire format and delivery model; [`directory`],
//! [`dc`], and [`llc`] are the three controllers; [`env`] is the single
//! global step selector that drives them; [`invariant`] and [`trace`] back
//! the model-checking harness.

pub mod config;
pub mod dc;
pub mod directory;
pub mod env;
pub mod error;
pub mod invariant;
pub mod llc;
pub mod message;
pub mod network;
pub mod trace;
pub mod types;

pub use config::{Config, ConfigError};
pub use env::{Rule, System};
pub use error::{ProtocolViolation, StepOutcome, StepResult};
pub use message::{Message, MessageType, VirtualChannel};
pub use network::Network;
pub use types::{Level, Node, SocketId, Value, ValueDomain};
