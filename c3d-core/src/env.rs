//! The environment driver: §5 and §6 of the spec.
//!
//! A single global step selector nondeterministically chooses one enabled
//! rule — a processor event, a replacement, or a single-message delivery —
//! and applies it as one atomic step. [`System`] owns every controller's
//! state and is the only thing callers (randomized explorer, BFS explorer,
//! tests) drive.

use crate::config::Config;
use crate::dc::{DcController, DcState, DcTag};
use crate::directory::{DirTag, DirectoryController, DirectoryState};
use crate::error::{ProtocolViolation, StepOutcome, StepResult};
use crate::invariant::{self, DirectoryRef, SocketSnapshotRef};
use crate::llc::{LlcController, LlcState, LlcTag, ProcessorOutcome};
use crate::network::Network;
use crate::trace::{DirectorySnapshot, Snapshot, SocketSnapshot, Trace};
use crate::types::{Level, Node, SocketId, Value};
use serde::{Deserialize, Serialize};

/// The command surface from §6: the only external actions the harness may
/// inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    Read(SocketId),
    Write(SocketId, Value),
    LlcReplace(SocketId),
    DcReplace(SocketId),
    DirectoryReplaceS(SocketId),
    DirectoryReplaceM,
    NetworkReceive(Node, usize),
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rule::Read(s) => write!(f, "read({s})"),
            Rule::Write(s, v) => write!(f, "write({s}, {v})"),
            Rule::LlcReplace(s) => write!(f, "llc-replace({s})"),
            Rule::DcReplace(s) => write!(f, "dc-replace({s})"),
            Rule::DirectoryReplaceS(s) => write!(f, "directory-replace(S, {s})"),
            Rule::DirectoryReplaceM => write!(f, "directory-replace(M)"),
            Rule::NetworkReceive(n, i) => write!(f, "receive({n}, #{i})"),
        }
    }
}

pub struct System {
    pub config: Config,
    pub network: Network,
    dir_ctl: DirectoryController,
    pub dir: DirectoryState,
    dc_ctl: Vec<DcController>,
    pub dcs: Vec<DcState>,
    llc_ctl: Vec<LlcController>,
    pub llcs: Vec<LlcState>,
    pub last_written: Option<Value>,
    pub trace: Trace,
}

impl System {
    pub fn new(config: Config, initial_data: Value) -> Self {
        let n = config.num_sockets;
        let dir_ctl = DirectoryController::new(n, config.strict_upgrade_assertion);
        let dc_ctl = (0..n).map(|i| DcController::new(SocketId(i))).collect();
        let llc_ctl = (0..n).map(|i| LlcController::new(SocketId(i))).collect();
        System {
            network: Network::with_default_capacity(n),
            dir_ctl,
            dir: DirectoryState::new(initial_data),
            dc_ctl,
            dcs: (0..n).map(|_| DcState::new()).collect(),
            llc_ctl,
            llcs: (0..n).map(|_| LlcState::new()).collect(),
            last_written: None,
            config,
            trace: Trace::new(),
        }
    }

    fn sockets(&self) -> impl Iterator<Item = SocketId> {
        (0..self.config.num_sockets).map(SocketId)
    }

    /// Every rule currently enabled, per §5's scheduling model. The caller
    /// (an explorer) picks among these however it likes — uniformly at
    /// random, or exhaustively for bounded BFS.
    pub fn enabled_rules(&self) -> Vec<Rule> {
        let mut rules = Vec::new();

        for s in self.sockets() {
            let llc = &self.llcs[s.0 as usize];
            match llc.tag {
                LlcTag::I | LlcTag::S | LlcTag::M => rules.push(Rule::Read(s)),
                _ => {}
            }
            match llc.tag {
                LlcTag::I | LlcTag::S => {
                    for v in self.value_domain() {
                        rules.push(Rule::Write(s, v));
                    }
                }
                LlcTag::M => {
                    for v in self.value_domain() {
                        rules.push(Rule::Write(s, v));
                    }
                }
                _ => {}
            }
            if matches!(llc.tag, LlcTag::S | LlcTag::M) {
                rules.push(Rule::LlcReplace(s));
            }
            if self.dcs[s.0 as usize].tag == DcTag::S {
                rules.push(Rule::DcReplace(s));
            }
            if self.dir.tag == DirTag::S && self.dir.sharers.contains(&s) {
                rules.push(Rule::DirectoryReplaceS(s));
            }
        }
        if self.dir.tag == DirTag::M {
            rules.push(Rule::DirectoryReplaceM);
        }
        for (node, idx) in self.network.candidates() {
            rules.push(Rule::NetworkReceive(node, idx));
        }
        rules
    }

    fn value_domain(&self) -> impl Iterator<Item = Value> {
        (0..self.config.value_domain_size).map(Value)
    }

    /// Applies one rule as a single atomic step, recording a trace entry iff
    /// the step was actually applied (a stall leaves no mark — nothing
    /// happened).
    pub fn apply(&mut self, rule: Rule) -> StepResult {
        let outcome = self.apply_inner(rule)?;
        if outcome == StepOutcome::Applied {
            let snapshot = self.snapshot();
            self.check_invariants()?;
            self.trace.push(rule, snapshot);
        }
        Ok(outcome)
    }

    fn apply_inner(&mut self, rule: Rule) -> StepResult {
        match rule {
            Rule::Read(s) => {
                let llc = &mut self.llcs[s.0 as usize];
                match self.llc_ctl[s.0 as usize].read(llc, &mut self.network)? {
                    ProcessorOutcome::Completed { observed } => {
                        let v = observed.expect("S/M read always has data");
                        invariant::check_sc(Node::Sock(s), v, self.last_written)?;
                        Ok(StepOutcome::Applied)
                    }
                    ProcessorOutcome::Issued => Ok(StepOutcome::Applied),
                }
            }
            Rule::Write(s, v) => {
                let llc = &mut self.llcs[s.0 as usize];
                match self.llc_ctl[s.0 as usize].write(llc, &mut self.network, v)? {
                    ProcessorOutcome::Completed { .. } => {
                        self.last_written = Some(v);
                        Ok(StepOutcome::Applied)
                    }
                    ProcessorOutcome::Issued => Ok(StepOutcome::Applied),
                }
            }
            Rule::LlcReplace(s) => {
                let llc = &mut self.llcs[s.0 as usize];
                self.llc_ctl[s.0 as usize].replace(llc, &mut self.network)
            }
            Rule::DcReplace(s) => {
                let dc = &mut self.dcs[s.0 as usize];
                self.dc_ctl[s.0 as usize].replace(dc)
            }
            Rule::DirectoryReplaceS(victim) => {
                self.dir_ctl.replace_s(&mut self.dir, &mut self.network, victim)
            }
            Rule::DirectoryReplaceM => self.dir_ctl.replace_m(&mut self.dir, &mut self.network),
            Rule::NetworkReceive(node, idx) => self.deliver(node, idx),
        }
    }

    fn deliver(&mut self, node: Node, idx: usize) -> StepResult {
        let msg = match self.network.peek(node, idx) {
            Some(m) => m.clone(),
            None => return Ok(StepOutcome::Stalled),
        };

        match (node, msg.dest_level) {
            (Node::Dir, None) => {
                let outcome = self.dir_ctl.on_message(&mut self.dir, &mut self.network, &msg)?;
                if outcome == StepOutcome::Applied {
                    self.network.take(node, idx);
                }
                Ok(outcome)
            }
            (Node::Sock(s), Some(Level::Dc)) => {
                let from_local_llc = msg.src == Node::Sock(s) && msg.src_level == Some(Level::Llc);
                let dc = &mut self.dcs[s.0 as usize];
                let outcome = if from_local_llc {
                    self.dc_ctl[s.0 as usize].on_llc_message(dc, &mut self.network, &msg)?
                } else {
                    self.dc_ctl[s.0 as usize].on_network_message(dc, &mut self.network, &msg)?
                };
                if outcome == StepOutcome::Applied {
                    self.network.take(node, idx);
                }
                Ok(outcome)
            }
            (Node::Sock(s), Some(Level::Llc)) => {
                let prior_tag = self.llcs[s.0 as usize].tag;
                let llc = &mut self.llcs[s.0 as usize];
                let (outcome, value) = self.llc_ctl[s.0 as usize].on_message(llc, &mut self.network, &msg)?;
                if outcome == StepOutcome::Applied {
                    self.network.take(node, idx);
                    if let Some(v) = value {
                        match prior_tag {
                            LlcTag::Is => invariant::check_sc(Node::Sock(s), v, self.last_written)?,
                            LlcTag::Im | LlcTag::ImS | LlcTag::Sm => self.last_written = Some(v),
                            _ => {}
                        }
                    }
                }
                Ok(outcome)
            }
            _ => Err(ProtocolViolation::Assertion {
                node,
                description: format!("message {msg} has an addressing shape the environment cannot route"),
            }),
        }
    }

    fn check_invariants(&self) -> Result<(), ProtocolViolation> {
        let dir_ref = DirectoryRef {
            tag: self.dir.tag,
            owner: self.dir.owner,
            sharers: &self.dir.sharers,
        };
        let sockets: Vec<SocketSnapshotRef> = self
            .sockets()
            .map(|s| SocketSnapshotRef {
                socket: s,
                llc_tag: self.llcs[s.0 as usize].tag,
                llc_data: self.llcs[s.0 as usize].data,
                dc_tag: self.dcs[s.0 as usize].tag,
                dc_data: self.dcs[s.0 as usize].data,
            })
            .collect();
        invariant::check_quiescent(&dir_ref, &sockets, &self.network)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            directory: DirectorySnapshot::from(&self.dir),
            sockets: self
                .sockets()
                .map(|s| SocketSnapshot::new(s, &self.llcs[s.0 as usize], &self.dcs[s.0 as usize]))
                .collect(),
            last_written: self.last_written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(num_sockets: u8) -> System {
        System::new(
            Config::new(num_sockets, 2, false).unwrap(),
            Value(0),
        )
    }

    fn run_until_quiescent(sys: &mut System, rules: &[Rule]) {
        for &rule in rules {
            loop {
                match sys.apply(rule).unwrap() {
                    StepOutcome::Applied => break,
                    StepOutcome::Stalled => panic!("rule {rule} stalled when expected to apply"),
                }
            }
            while let Some(&(node, idx)) = sys.network.candidates().first() {
                match sys.apply(Rule::NetworkReceive(node, idx)) {
                    Ok(_) => {}
                    Err(e) => panic!("unexpected violation draining network: {e}"),
                }
                if sys.network.is_empty() {
                    break;
                }
            }
        }
    }

    #[test]
    fn clean_read_scenario() {
        let mut sys = fresh(3);
        run_until_quiescent(&mut sys, &[Rule::Read(SocketId(0))]);
        assert_eq!(sys.dir.tag, DirTag::S);
        assert!(sys.dir.sharers.contains(&SocketId(0)));
        assert_eq!(sys.llcs[0].tag, LlcTag::S);
        assert_eq!(sys.llcs[0].data, sys.dir.data);
    }

    #[test]
    fn write_after_clean_read_elsewhere() {
        let mut sys = fresh(3);
        run_until_quiescent(&mut sys, &[Rule::Read(SocketId(0))]);
        run_until_quiescent(&mut sys, &[Rule::Write(SocketId(1), Value(1))]);
        assert_eq!(sys.llcs[1].tag, LlcTag::M);
        assert_eq!(sys.llcs[1].data, Some(Value(1)));
        assert_eq!(sys.llcs[0].tag, LlcTag::I);
        assert_eq!(sys.dir.tag, DirTag::M);
        assert_eq!(sys.dir.owner, Some(SocketId(1)));
        assert!(sys.dir.sharers.is_empty());
    }
}
