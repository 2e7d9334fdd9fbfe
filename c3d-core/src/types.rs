//! Shared data-model primitives: §3 of the spec.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of a fixed finite set of sockets. The model is parameterised over the
/// socket count; three is the minimum witness that exercises SWMR races.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SocketId(pub u8);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Which controller within a socket a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Llc,
    Dc,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Llc => write!(f, "LLC"),
            Level::Dc => write!(f, "DC"),
        }
    }
}

/// Either the directory or a socket. This is the addressing unit for
/// mailboxes: every node owns exactly one bounded, unordered mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Node {
    Dir,
    Sock(SocketId),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Dir => write!(f, "DIR"),
            Node::Sock(s) => write!(f, "{s}"),
        }
    }
}

/// An opaque symbolic value from a small finite domain. Equality is the only
/// operation the protocol performs on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(pub u8);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The cardinality of the value domain; values are drawn from `0..size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueDomain {
    size: u8,
}

impl ValueDomain {
    pub fn new(size: u8) -> Self {
        assert!(size >= 1, "value domain must contain at least one value");
        ValueDomain { size }
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn contains(&self, v: Value) -> bool {
        v.0 < self.size
    }

    pub fn values(&self) -> impl Iterator<Item = Value> {
        (0..self.size).map(Value)
    }
}
