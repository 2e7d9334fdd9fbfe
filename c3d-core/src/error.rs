//! Fatal/non-fatal outcome taxonomy: §7 of the spec.
//!
//! The teacher's own `net::channel::Error` (a bare enum with no `Display` or
//! `std::error::Error` impl) is the shape this is grounded on, upgraded with
//! `thiserror` the way the rest of the retrieval pack does it.

use crate::message::MessageType;
use crate::types::Node;
use thiserror::Error;

/// A fatal protocol violation (§7, case 2). Each variant names the state,
/// the event, and the offending node, per the spec's diagnostic requirement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("{node}: unhandled message {msg_type} while in state {state}")]
    UnhandledMessage {
        node: Node,
        state: String,
        msg_type: MessageType,
    },

    #[error("{node}: unhandled state tag {state}")]
    UnhandledState { node: Node, state: String },

    #[error("mailbox for {node} is at capacity ({capacity}); send of {msg_type} rejected")]
    MailboxOverflow {
        node: Node,
        capacity: usize,
        msg_type: MessageType,
    },

    #[error("invariant violated: {description}")]
    InvariantBroken { description: String },

    #[error(
        "SC-per-location violated at {node}: observed {observed:?}, expected {expected:?}"
    )]
    SequentialConsistency {
        node: Node,
        observed: crate::types::Value,
        expected: crate::types::Value,
    },

    #[error("{node}: assertion failure — {description}")]
    Assertion { node: Node, description: String },
}

/// The result of attempting a single step (an environment event, a
/// replacement, or a message delivery).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step was applied; the controller's state changed (or a
    /// legitimately idempotent no-op handler ran).
    Applied,
    /// The step could not legally be absorbed right now. For a message
    /// delivery this means the message stays in the mailbox — the VC
    /// stalling discipline of §4.1. For an environment rule it means the
    /// rule was not enabled (e.g. a read in a state that enables it is
    /// simply not offered as a candidate, but explicit callers may still
    /// probe and get this back).
    Stalled,
}

pub type StepResult = Result<StepOutcome, ProtocolViolation>;
