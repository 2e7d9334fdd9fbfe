//! Counterexample capture: §6 of the spec ("trace output").

use crate::dc::DcState;
use crate::directory::DirectoryState;
use crate::env::Rule;
use crate::llc::LlcState;
use crate::types::{SocketId, Value};
use serde::{Deserialize, Serialize};

/// A full snapshot of every state variable, taken after a step has been
/// applied. Cheap enough to clone at every step for a model of this size;
/// the counterexample trace is just a `Vec` of these plus the rule that
/// produced each one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub directory: DirectorySnapshot,
    pub sockets: Vec<SocketSnapshot>,
    pub last_written: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub tag: String,
    pub owner: Option<SocketId>,
    pub sharers: Vec<SocketId>,
    pub acks_needed: usize,
    pub data: Option<Value>,
}

impl From<&DirectoryState> for DirectorySnapshot {
    fn from(d: &DirectoryState) -> Self {
        DirectorySnapshot {
            tag: d.tag.to_string(),
            owner: d.owner,
            sharers: d.sharers.iter().copied().collect(),
            acks_needed: d.acks_needed,
            data: d.data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketSnapshot {
    pub socket: SocketId,
    pub llc_tag: String,
    pub llc_data: Option<Value>,
    pub dc_tag: String,
    pub dc_data: Option<Value>,
}

impl SocketSnapshot {
    pub fn new(socket: SocketId, llc: &LlcState, dc: &DcState) -> Self {
        SocketSnapshot {
            socket,
            llc_tag: llc.tag.to_string(),
            llc_data: llc.data,
            dc_tag: dc.tag.to_string(),
            dc_data: dc.data,
        }
    }
}

/// One fired rule plus the snapshot taken immediately after it was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub rule: Rule,
    pub snapshot: Snapshot,
}

/// The sequence of rules fired since the system was created, sufficient for
/// a human to reconstruct a counterexample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    steps: Vec<Step>,
}

impl Trace {
    pub fn new() -> Self {
        Trace { steps: Vec::new() }
    }

    pub fn push(&mut self, rule: Rule, snapshot: Snapshot) {
        self.steps.push(Step { rule, snapshot });
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }
}
