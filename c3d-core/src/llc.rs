//! The LLC controller: §4.4 of the spec.
//!
//! One instance per socket. The processor-facing endpoint: issues reads,
//! writes, and replacements, and is the only controller that ever completes
//! a processor-visible event.

use crate::error::{ProtocolViolation, StepOutcome, StepResult};
use crate::message::{Message, MessageType, VirtualChannel};
use crate::network::Network;
use crate::types::{Level, Node, SocketId, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlcTag {
    I,
    Is,
    IsI,
    Im,
    ImS,
    S,
    Sm,
    M,
    Mi,
    Ms,
}

impl fmt::Display for LlcTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LlcTag::I => "I",
            LlcTag::Is => "IS",
            LlcTag::IsI => "IS_I",
            LlcTag::Im => "IM",
            LlcTag::ImS => "IM_S",
            LlcTag::S => "S",
            LlcTag::Sm => "SM",
            LlcTag::M => "M",
            LlcTag::Mi => "MI",
            LlcTag::Ms => "MS",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct LlcState {
    pub tag: LlcTag,
    pub data: Option<Value>,
    pub pending_write: Option<Value>,
}

impl LlcState {
    pub fn new() -> Self {
        LlcState {
            tag: LlcTag::I,
            data: None,
            pending_write: None,
        }
    }
}

impl Default for LlcState {
    fn default() -> Self {
        LlcState::new()
    }
}

/// Outcome of a processor-visible event, returned to the environment driver
/// so it can check SC-per-location against the auxiliary last-written value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorOutcome {
    /// A read or write completed immediately (hit).
    Completed { observed: Option<Value> },
    /// The event issued a miss and will complete asynchronously.
    Issued,
}

pub struct LlcController {
    pub socket: SocketId,
}

impl LlcController {
    pub fn new(socket: SocketId) -> Self {
        LlcController { socket }
    }

    fn node(&self) -> Node {
        Node::Sock(self.socket)
    }

    fn unhandled(&self, state: LlcTag, msg_type: MessageType) -> ProtocolViolation {
        ProtocolViolation::UnhandledMessage {
            node: self.node(),
            state: state.to_string(),
            msg_type,
        }
    }

    fn to_dc(&self, msg_type: MessageType, vc: VirtualChannel, data: Option<Value>) -> Message {
        Message::to_socket(msg_type, self.socket, Level::Dc, self.node(), Some(Level::Llc), vc, data)
    }

    /// INV-ACK, DATA-ACK, and DOWNGRADE-ACK all travel straight back to the
    /// directory rather than through the local DC — the DC has already
    /// either disengaged (dropped its copy and moved on) or was never
    /// consulted for these, per §4.2/§4.4's explicit "to directory" wording.
    fn to_dir(&self, msg_type: MessageType, vc: VirtualChannel, data: Option<Value>) -> Message {
        Message::to_dir(msg_type, self.node(), Some(Level::Llc), vc, data)
    }

    /// Processor read. Any state other than `I`/`S`/`M` is a bug: a read can
    /// only be offered as an enabled environment rule in those states.
    pub fn read(&self, llc: &mut LlcState, net: &mut Network) -> Result<ProcessorOutcome, ProtocolViolation> {
        match llc.tag {
            LlcTag::I => {
                net.send(self.to_dc(MessageType::Gets, VirtualChannel::Req, None))?;
                llc.tag = LlcTag::Is;
                Ok(ProcessorOutcome::Issued)
            }
            LlcTag::S | LlcTag::M => Ok(ProcessorOutcome::Completed { observed: llc.data }),
            other => Err(ProtocolViolation::Assertion {
                node: self.node(),
                description: format!("read is not a legal event in state {other}"),
            }),
        }
    }

    /// Processor write(v).
    pub fn write(
        &self,
        llc: &mut LlcState,
        net: &mut Network,
        v: Value,
    ) -> Result<ProcessorOutcome, ProtocolViolation> {
        match llc.tag {
            LlcTag::I => {
                net.send(self.to_dc(MessageType::Getx, VirtualChannel::Req, None))?;
                llc.pending_write = Some(v);
                llc.tag = LlcTag::Im;
                Ok(ProcessorOutcome::Issued)
            }
            LlcTag::S => {
                net.send(self.to_dc(MessageType::Upgrade, VirtualChannel::Req, None))?;
                llc.pending_write = Some(v);
                llc.tag = LlcTag::Sm;
                Ok(ProcessorOutcome::Issued)
            }
            LlcTag::M => {
                llc.data = Some(v);
                Ok(ProcessorOutcome::Completed { observed: Some(v) })
            }
            other => Err(ProtocolViolation::Assertion {
                node: self.node(),
                description: format!("write is not a legal event in state {other}"),
            }),
        }
    }

    /// Processor replacement (eviction).
    pub fn replace(&self, llc: &mut LlcState, net: &mut Network) -> StepResult {
        match llc.tag {
            LlcTag::S => {
                llc.data = None;
                llc.tag = LlcTag::I;
                Ok(StepOutcome::Applied)
            }
            LlcTag::M => {
                net.send(self.to_dc(MessageType::Putx, VirtualChannel::Req, llc.data))?;
                llc.data = None;
                llc.tag = LlcTag::Mi;
                Ok(StepOutcome::Applied)
            }
            _ => Ok(StepOutcome::Stalled),
        }
    }

    /// A message arriving at this LLC (always from its local DC).
    pub fn on_message(
        &self,
        llc: &mut LlcState,
        net: &mut Network,
        msg: &Message,
    ) -> Result<(StepOutcome, Option<Value>), ProtocolViolation> {
        use LlcTag::*;
        use MessageType::*;

        match (llc.tag, msg.msg_type) {
            (Is, Data) => {
                let observed = msg.data;
                llc.data = msg.data;
                llc.tag = S;
                Ok((StepOutcome::Applied, observed))
            }
            (Is, Inv) | (Is, PutAck) => {
                net.send(self.to_dir(InvAck, VirtualChannel::Unb, None))?;
                llc.tag = IsI;
                Ok((StepOutcome::Applied, None))
            }
            (IsI, Data) => {
                // Discarded: the line was invalidated before this DATA
                // arrived, so nothing observes it and SC is unaffected.
                llc.tag = I;
                Ok((StepOutcome::Applied, None))
            }
            (Im, Data) => {
                let v = llc.pending_write.take().expect("IM always has a pending write");
                llc.data = Some(v);
                net.send(self.to_dir(DataAck, VirtualChannel::Unb, None))?;
                llc.tag = M;
                Ok((StepOutcome::Applied, Some(v)))
            }
            (Im, Downgrade) => {
                net.send(self.to_dir(DowngradeAck, VirtualChannel::Unb, None))?;
                llc.tag = ImS;
                Ok((StepOutcome::Applied, None))
            }
            (Im, Inv) | (Im, PutAck) => {
                net.send(self.to_dir(InvAck, VirtualChannel::Unb, None))?;
                Ok((StepOutcome::Applied, None))
            }
            (ImS, Data) => {
                let v = llc.pending_write.take().expect("IM_S always has a pending write");
                llc.data = Some(v);
                net.send(self.to_dc(Putx, VirtualChannel::Res, Some(v)))?;
                llc.tag = Ms;
                Ok((StepOutcome::Applied, Some(v)))
            }
            (Sm, Data) => {
                let v = llc.pending_write.take().expect("SM always has a pending write");
                llc.data = Some(v);
                net.send(self.to_dir(DataAck, VirtualChannel::Unb, None))?;
                llc.tag = M;
                Ok((StepOutcome::Applied, Some(v)))
            }
            (Sm, UpgradeAck) => {
                let v = llc.pending_write.take().expect("SM always has a pending write");
                llc.data = Some(v);
                net.send(self.to_dir(DataAck, VirtualChannel::Unb, None))?;
                llc.tag = M;
                Ok((StepOutcome::Applied, Some(v)))
            }
            (Sm, Inv) => {
                net.send(self.to_dir(InvAck, VirtualChannel::Unb, None))?;
                llc.tag = Im;
                Ok((StepOutcome::Applied, None))
            }
            (S, Inv) => {
                net.send(self.to_dir(InvAck, VirtualChannel::Unb, None))?;
                llc.data = None;
                llc.tag = I;
                Ok((StepOutcome::Applied, None))
            }
            // Supplement: an LLC that's already replaced itself down to `I`
            // can still receive a stray INV from a directory-initiated
            // invalidation that raced the silent replacement.
            (I, Inv) => {
                net.send(self.to_dir(InvAck, VirtualChannel::Unb, None))?;
                Ok((StepOutcome::Applied, None))
            }
            (M, Downgrade) => {
                net.send(self.to_dc(Putx, VirtualChannel::Res, llc.data))?;
                net.send(self.to_dir(DowngradeAck, VirtualChannel::Unb, None))?;
                llc.tag = Ms;
                Ok((StepOutcome::Applied, None))
            }
            (M, Inv) => {
                net.send(self.to_dir(Putx, VirtualChannel::Res, llc.data))?;
                llc.data = None;
                llc.tag = I;
                Ok((StepOutcome::Applied, None))
            }
            (Mi, Inv) | (Mi, PutAck) => {
                llc.tag = I;
                Ok((StepOutcome::Applied, None))
            }
            (Mi, Downgrade) => {
                net.send(self.to_dir(DowngradeAck, VirtualChannel::Unb, None))?;
                Ok((StepOutcome::Applied, None))
            }
            (Ms, PutAck) => {
                llc.tag = S;
                Ok((StepOutcome::Applied, None))
            }
            (Ms, Inv) => {
                net.send(self.to_dir(InvAck, VirtualChannel::Unb, None))?;
                llc.data = None;
                llc.tag = Mi;
                Ok((StepOutcome::Applied, None))
            }
            (tag, other) => Err(self.unhandled(tag, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    #[test]
    fn read_in_i_issues_gets() {
        let ctl = LlcController::new(SocketId(0));
        let mut llc = LlcState::new();
        let mut net = Network::with_default_capacity(3);
        let outcome = ctl.read(&mut llc, &mut net).unwrap();
        assert_eq!(outcome, ProcessorOutcome::Issued);
        assert_eq!(llc.tag, LlcTag::Is);
    }

    #[test]
    fn read_in_m_completes_immediately() {
        let ctl = LlcController::new(SocketId(0));
        let mut llc = LlcState {
            tag: LlcTag::M,
            data: Some(Value(3)),
            pending_write: None,
        };
        let mut net = Network::with_default_capacity(3);
        let outcome = ctl.read(&mut llc, &mut net).unwrap();
        assert_eq!(outcome, ProcessorOutcome::Completed { observed: Some(Value(3)) });
    }

    #[test]
    fn write_in_m_commits_directly() {
        let ctl = LlcController::new(SocketId(0));
        let mut llc = LlcState {
            tag: LlcTag::M,
            data: Some(Value(1)),
            pending_write: None,
        };
        let mut net = Network::with_default_capacity(3);
        ctl.write(&mut llc, &mut net, Value(9)).unwrap();
        assert_eq!(llc.data, Some(Value(9)));
    }

    #[test]
    fn replace_in_m_sends_putx() {
        let ctl = LlcController::new(SocketId(0));
        let mut llc = LlcState {
            tag: LlcTag::M,
            data: Some(Value(4)),
            pending_write: None,
        };
        let mut net = Network::with_default_capacity(3);
        ctl.replace(&mut llc, &mut net).unwrap();
        assert_eq!(llc.tag, LlcTag::Mi);
        assert!(llc.data.is_none());
        assert_eq!(net.len(), 1);
    }

    #[test]
    fn is_i_discards_late_data() {
        let ctl = LlcController::new(SocketId(0));
        let mut llc = LlcState {
            tag: LlcTag::IsI,
            data: None,
            pending_write: None,
        };
        let mut net = Network::with_default_capacity(3);
        let msg = Message::to_socket(
            MessageType::Data,
            SocketId(0),
            Level::Llc,
            Node::Sock(SocketId(0)),
            Some(Level::Dc),
            VirtualChannel::Res,
            Some(Value(2)),
        );
        let (outcome, observed) = ctl.on_message(&mut llc, &mut net, &msg).unwrap();
        assert_eq!(outcome, StepOutcome::Applied);
        assert!(observed.is_none());
        assert_eq!(llc.tag, LlcTag::I);
    }
}
