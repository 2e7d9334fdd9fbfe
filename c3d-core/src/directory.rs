//! The directory controller: §4.2 of the spec.
//!
//! One instance, colocated with memory. Owns the authoritative data value
//! while the line is in `I`/`S`, and tracks who owns it while in `M`.

use crate::error::{ProtocolViolation, StepOutcome, StepResult};
use crate::message::{Message, MessageType, VirtualChannel};
use crate::network::Network;
use crate::types::{Level, Node, SocketId, Value};
use indexmap::IndexSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirTag {
    I,
    ImIa,
    ImDa,
    S,
    SmIa,
    SmDa,
    SmUIa,
    M,
    MmP,
    MmDa,
    Ms2,
    Ms1,
    Mi,
}

impl fmt::Display for DirTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DirTag::I => "I",
            DirTag::ImIa => "IM_IA",
            DirTag::ImDa => "IM_DA",
            DirTag::S => "S",
            DirTag::SmIa => "SM_IA",
            DirTag::SmDa => "SM_DA",
            DirTag::SmUIa => "SM_U_IA",
            DirTag::M => "M",
            DirTag::MmP => "MM_P",
            DirTag::MmDa => "MM_DA",
            DirTag::Ms2 => "MS2",
            DirTag::Ms1 => "MS1",
            DirTag::Mi => "MI",
        };
        write!(f, "{s}")
    }
}

/// Directory state: (state tag, owner, sharer set, outstanding-ack counter,
/// data value), per §3. `downgrade_target` is extra bookkeeping used only by
/// the `MS2`/`MS1` pair, where the directory is waiting on two distinct
/// signals (a DOWNGRADE-ACK and a PUTX) from the *old* owner while `owner`
/// itself has already been repurposed to mean "who to grant data to next",
/// per the spec's own note in the `M` on GETS handler. `pending_evictions`
/// tracks INV-ACKs the directory owes itself while stable in `S`, from
/// `directory-replace(S)` invalidations it issued without leaving `S` — the
/// supplement §6 names but §4.2 never gives a transient state of its own.
#[derive(Debug, Clone)]
pub struct DirectoryState {
    pub tag: DirTag,
    pub owner: Option<SocketId>,
    pub sharers: IndexSet<SocketId>,
    pub acks_needed: usize,
    pub data: Option<Value>,
    pub downgrade_target: Option<SocketId>,
    pub pending_evictions: usize,
}

impl DirectoryState {
    pub fn new(initial_data: Value) -> Self {
        DirectoryState {
            tag: DirTag::I,
            owner: None,
            sharers: IndexSet::new(),
            acks_needed: 0,
            data: Some(initial_data),
            downgrade_target: None,
            pending_evictions: 0,
        }
    }
}

/// The directory controller. `strict_upgrade_assertion` selects between the
/// two behaviors discussed in the spec's §9 Open Question: when `true`, an
/// `S`-on-GETX where the requester is the sole sharer is treated as an
/// assertion failure (reproducing the source model exactly); when `false`
/// (the default, and the production choice SPEC_FULL.md calls for) it takes
/// the fast upgrade path instead.
pub struct DirectoryController {
    pub num_sockets: u8,
    pub strict_upgrade_assertion: bool,
}

impl DirectoryController {
    pub fn new(num_sockets: u8, strict_upgrade_assertion: bool) -> Self {
        DirectoryController {
            num_sockets,
            strict_upgrade_assertion,
        }
    }

    fn node(&self) -> Node {
        Node::Dir
    }

    fn all_sockets(&self) -> impl Iterator<Item = SocketId> + '_ {
        (0..self.num_sockets).map(SocketId)
    }

    fn unhandled(&self, state: DirTag, msg_type: MessageType) -> ProtocolViolation {
        ProtocolViolation::UnhandledMessage {
            node: self.node(),
            state: state.to_string(),
            msg_type,
        }
    }

    /// Pure fan-out helper (§9's `BroadcastToSockets` /
    /// `SelectiveBroadcastToSockets`): sends INV on REQ to every socket DC
    /// in `targets`. Atomic with respect to the step via `Network::send_all`
    /// — either every send lands or none do.
    fn invalidate(
        &self,
        net: &mut Network,
        targets: impl IntoIterator<Item = SocketId>,
    ) -> Result<usize, ProtocolViolation> {
        let msgs: Vec<Message> = targets
            .into_iter()
            .map(|s| {
                Message::to_socket(
                    MessageType::Inv,
                    s,
                    Level::Dc,
                    Node::Dir,
                    None,
                    VirtualChannel::Req,
                    None,
                )
            })
            .collect();
        let count = msgs.len();
        net.send_all(msgs)?;
        Ok(count)
    }

    /// DOWNGRADE and PUT-ACK are addressed straight to the owner's LLC: the
    /// DC's own state machine has no arm for either (its own handlers only
    /// ever originate an INV-ACK directly, or forward INV/DATA it is already
    /// tracking), so these two acks skip it entirely.
    fn send_downgrade(&self, net: &mut Network, to: SocketId) -> Result<(), ProtocolViolation> {
        net.send(Message::to_socket(
            MessageType::Downgrade,
            to,
            Level::Llc,
            Node::Dir,
            None,
            VirtualChannel::Req,
            None,
        ))
    }

    fn grant_data(&self, net: &mut Network, to: SocketId, data: Value) -> Result<(), ProtocolViolation> {
        net.send(Message::to_socket(
            MessageType::Data,
            to,
            Level::Dc,
            Node::Dir,
            None,
            VirtualChannel::Res,
            Some(data),
        ))
    }

    fn grant_upgrade_ack(&self, net: &mut Network, to: SocketId) -> Result<(), ProtocolViolation> {
        net.send(Message::to_socket(
            MessageType::UpgradeAck,
            to,
            Level::Dc,
            Node::Dir,
            None,
            VirtualChannel::Res,
            None,
        ))
    }

    fn put_ack(&self, net: &mut Network, to: SocketId) -> Result<(), ProtocolViolation> {
        net.send(Message::to_socket(
            MessageType::PutAck,
            to,
            Level::Llc,
            Node::Dir,
            None,
            VirtualChannel::Unb,
            None,
        ))
    }

    /// Begins an ownership transfer to `requester` after invalidating
    /// `targets`. If `targets` is empty (no other sharer needs evicting —
    /// including the §9 fast-upgrade path), the grant is issued immediately
    /// instead of waiting in the collecting state, since no INV-ACK would
    /// ever arrive to trigger it.
    fn begin_transfer(
        &self,
        dir: &mut DirectoryState,
        net: &mut Network,
        requester: SocketId,
        targets: IndexSet<SocketId>,
        via_upgrade: bool,
        collecting_tag: DirTag,
        done_tag: DirTag,
    ) -> Result<(), ProtocolViolation> {
        let acks = self.invalidate(net, targets)?;
        dir.owner = Some(requester);
        dir.sharers.clear();
        dir.acks_needed = acks;

        if dir.acks_needed == 0 {
            if via_upgrade {
                self.grant_upgrade_ack(net, requester)?;
            } else {
                self.grant_data(net, requester, dir.data.expect("I/S directory always has data"))?;
            }
            dir.tag = done_tag;
        } else {
            dir.tag = collecting_tag;
        }
        Ok(())
    }

    /// Directory-replace(S): unilaterally evicts one current sharer. Sends
    /// INV the same way a GETX-triggered invalidation would, but the
    /// directory itself stays in `S` with no grant pending — this supplement
    /// (§6 lists `directory-replace(S)` as a command but §4.2 never spells
    /// out its body) reuses the existing sharer-bookkeeping pattern: sharers
    /// are dropped from the set immediately, matching how `S` on GETX
    /// already clears sharers before any INV-ACK is even sent. The INV still
    /// generates a real INV-ACK from the victim's LLC (`S` on INV acks
    /// directly to the directory), so `pending_evictions` is bumped to
    /// account for it — `(S, InvAck)` below drains it without disturbing the
    /// stable state.
    pub fn replace_s(
        &self,
        dir: &mut DirectoryState,
        net: &mut Network,
        victim: SocketId,
    ) -> StepResult {
        if dir.tag != DirTag::S || !dir.sharers.contains(&victim) {
            return Ok(StepOutcome::Stalled);
        }
        self.invalidate(net, [victim])?;
        dir.sharers.shift_remove(&victim);
        dir.pending_evictions += 1;
        Ok(StepOutcome::Applied)
    }

    /// Directory-replace(M): unilaterally recalls the current owner. Unlike
    /// an ordinary LLC-replace(M) — where the owner's own `replace` call
    /// drives it to `MI` first, so its eventual PUTX lands on the stable
    /// `M`-on-PUTX handler as a solicited writeback — this INV is unsolicited
    /// and the owner's LLC (`M` on INV) ships the PUTX straight to the
    /// directory and moves to `I` with no ack of its own pending. Reusing
    /// the stable `M`-on-PUTX handler here would fire a PUT-ACK at an LLC
    /// that has no `(I, PutAck)` arm and isn't expecting one. Moving the
    /// directory to `MI` up front instead routes that PUTX through the
    /// existing drain handler, which absorbs the data and returns to `I`
    /// without acking anyone.
    pub fn replace_m(&self, dir: &mut DirectoryState, net: &mut Network) -> StepResult {
        let owner = match (dir.tag, dir.owner) {
            (DirTag::M, Some(o)) => o,
            _ => return Ok(StepOutcome::Stalled),
        };
        self.invalidate(net, [owner])?;
        dir.tag = DirTag::Mi;
        Ok(StepOutcome::Applied)
    }

    /// Processes one message addressed to the directory.
    pub fn on_message(
        &self,
        dir: &mut DirectoryState,
        net: &mut Network,
        msg: &Message,
    ) -> StepResult {
        let requester = match msg.src {
            Node::Sock(s) => s,
            Node::Dir => {
                return Err(ProtocolViolation::Assertion {
                    node: self.node(),
                    description: "directory cannot receive a message from itself".into(),
                })
            }
        };

        use DirTag::*;
        use MessageType::*;

        match (dir.tag, msg.msg_type) {
            // ---------------------------------------------------------- I
            (I, Gets) => {
                // Scenario 1 ("Clean read") requires the directory to begin
                // tracking sharers from the very first reader, so a later
                // GETX knows to invalidate it.
                self.grant_data(net, requester, dir.data.expect("I directory has data"))?;
                dir.sharers.insert(requester);
                dir.tag = S;
                Ok(StepOutcome::Applied)
            }
            (I, Getx) | (I, Upgrade) => {
                let targets: Vec<SocketId> =
                    self.all_sockets().filter(|&s| s != requester).collect();
                self.begin_transfer(dir, net, requester, targets.into_iter().collect(), false, ImIa, ImDa)?;
                Ok(StepOutcome::Applied)
            }

            // ---------------------------------------------------------- S
            (S, Gets) => {
                dir.sharers.insert(requester);
                self.grant_data(net, requester, dir.data.expect("S directory has data"))?;
                Ok(StepOutcome::Applied)
            }
            (S, InvAck) => {
                // The only source of an INV while stable in `S` is our own
                // directory-replace(S); this just drains the ack it owes.
                dir.pending_evictions = dir
                    .pending_evictions
                    .checked_sub(1)
                    .expect("INV-ACK received in S with no outstanding eviction");
                Ok(StepOutcome::Applied)
            }
            (S, Getx) => {
                let is_sharer = dir.sharers.contains(&requester);
                let lone_sharer = is_sharer && dir.sharers.len() == 1;
                if lone_sharer {
                    if self.strict_upgrade_assertion {
                        return Err(ProtocolViolation::Assertion {
                            node: self.node(),
                            description: format!(
                                "S on GETX with sole sharer {requester} equal to requester is unreachable under well-formed traces (should have been an UPGRADE)"
                            ),
                        });
                    }
                    // Fast path (§9 Open Question, production choice): the
                    // requester already holds the data, so this behaves
                    // exactly like a pure UPGRADE.
                    self.begin_transfer(
                        dir,
                        net,
                        requester,
                        IndexSet::new(),
                        true,
                        SmUIa,
                        SmDa,
                    )?;
                } else {
                    let targets: IndexSet<SocketId> = dir
                        .sharers
                        .iter()
                        .copied()
                        .filter(|&s| s != requester)
                        .collect();
                    self.begin_transfer(dir, net, requester, targets, false, SmIa, SmDa)?;
                }
                Ok(StepOutcome::Applied)
            }
            (S, Upgrade) => {
                let via_upgrade = dir.sharers.contains(&requester);
                let targets: IndexSet<SocketId> = dir
                    .sharers
                    .iter()
                    .copied()
                    .filter(|&s| s != requester)
                    .collect();
                let collecting = if via_upgrade { SmUIa } else { SmIa };
                self.begin_transfer(dir, net, requester, targets, via_upgrade, collecting, SmDa)?;
                Ok(StepOutcome::Applied)
            }

            // ---------------------------------------------------------- M
            (M, Gets) => {
                let owner = dir.owner.expect("M directory always has an owner");
                dir.sharers.insert(owner);
                dir.sharers.insert(requester);
                dir.downgrade_target = Some(owner);
                dir.owner = Some(requester); // repurposed: "who to grant data to"
                self.send_downgrade(net, owner)?;
                dir.tag = Ms2;
                Ok(StepOutcome::Applied)
            }
            (M, Getx) | (M, Upgrade) => {
                let owner = dir.owner.expect("M directory always has an owner");
                self.invalidate(net, [owner])?;
                dir.sharers.clear();
                dir.owner = Some(requester);
                dir.tag = MmP;
                Ok(StepOutcome::Applied)
            }
            (M, Putx) => {
                dir.data = msg.data;
                self.put_ack(net, requester)?;
                dir.owner = None;
                dir.tag = I;
                Ok(StepOutcome::Applied)
            }

            // ------------------------------------------------- IM_IA/SM_IA/SM_U_IA
            (ImIa, InvAck) | (SmIa, InvAck) | (SmUIa, InvAck) => {
                dir.acks_needed = dir
                    .acks_needed
                    .checked_sub(1)
                    .expect("ack counter must not underflow");
                if dir.acks_needed == 0 {
                    let owner = dir.owner.expect("collecting states always have a pending owner");
                    if dir.tag == SmUIa {
                        self.grant_upgrade_ack(net, owner)?;
                    } else {
                        self.grant_data(net, owner, dir.data.expect("I/S directory always has data"))?;
                    }
                    dir.tag = if dir.tag == ImIa { ImDa } else { SmDa };
                }
                Ok(StepOutcome::Applied)
            }
            (ImIa, Gets) | (ImIa, Getx) | (ImIa, Upgrade) => Ok(StepOutcome::Stalled),
            (SmIa, Gets) | (SmIa, Getx) | (SmIa, Upgrade) => Ok(StepOutcome::Stalled),
            (SmUIa, Gets) | (SmUIa, Getx) | (SmUIa, Upgrade) => Ok(StepOutcome::Stalled),

            // ------------------------------------------------------- *_DA
            (ImDa, DataAck) | (SmDa, DataAck) => {
                dir.tag = M;
                Ok(StepOutcome::Applied)
            }
            (ImDa, Putx) | (SmDa, Putx) => {
                // Early-eviction race: the new owner's DATA-ACK is still in
                // flight but a later Replacement(M) at that same socket
                // produced a PUTX that overtook it in the unordered network.
                dir.data = msg.data;
                self.put_ack(net, requester)?;
                dir.owner = None;
                dir.tag = Mi;
                Ok(StepOutcome::Applied)
            }
            (ImDa, Gets) | (ImDa, Getx) | (ImDa, Upgrade) => Ok(StepOutcome::Stalled),
            (SmDa, Gets) | (SmDa, Getx) | (SmDa, Upgrade) => Ok(StepOutcome::Stalled),

            // -------------------------------------------------------- MM_P
            (MmP, Putx) => {
                let owner = dir.owner.expect("MM_P always has a pending owner");
                dir.data = msg.data;
                self.grant_data(net, owner, msg.data.expect("PUTX always carries data"))?;
                dir.tag = MmDa;
                Ok(StepOutcome::Applied)
            }
            (MmP, Gets) | (MmP, Getx) | (MmP, Upgrade) => Ok(StepOutcome::Stalled),

            // ------------------------------------------------------- MM_DA
            (MmDa, DataAck) => {
                dir.tag = M;
                Ok(StepOutcome::Applied)
            }
            (MmDa, Putx) => {
                dir.data = msg.data;
                self.put_ack(net, requester)?;
                dir.owner = None;
                dir.tag = Mi;
                Ok(StepOutcome::Applied)
            }
            (MmDa, Gets) | (MmDa, Getx) | (MmDa, Upgrade) => Ok(StepOutcome::Stalled),

            // --------------------------------------------------------- MS2
            (Ms2, DowngradeAck) => {
                dir.tag = Ms1;
                Ok(StepOutcome::Applied)
            }
            (Ms2, Putx) => {
                dir.data = msg.data;
                dir.tag = Ms1;
                Ok(StepOutcome::Applied)
            }
            (Ms2, Gets) | (Ms2, Getx) | (Ms2, Upgrade) => Ok(StepOutcome::Stalled),

            // --------------------------------------------------------- MS1
            (Ms1, DowngradeAck) | (Ms1, Putx) => {
                if msg.msg_type == Putx {
                    dir.data = msg.data;
                }
                let pending = dir.owner.expect("MS1 always has a pending grant target");
                let victim = dir
                    .downgrade_target
                    .expect("MS1 always remembers the downgraded owner");
                self.grant_data(net, pending, dir.data.expect("MS1 always has data by exit"))?;
                self.put_ack(net, victim)?;
                dir.owner = None;
                dir.downgrade_target = None;
                dir.tag = S;
                Ok(StepOutcome::Applied)
            }
            (Ms1, Gets) | (Ms1, Getx) | (Ms1, Upgrade) => Ok(StepOutcome::Stalled),

            // ---------------------------------------------------------- MI
            (Mi, Putx) => {
                // Captures data for the directory-replace(M) path, where MI
                // is entered directly from M with no prior PUTX to have
                // already recorded it; idempotent for the early-eviction
                // races that enter MI already holding the right value.
                dir.data = msg.data;
                dir.owner = None;
                dir.downgrade_target = None;
                dir.tag = I;
                Ok(StepOutcome::Applied)
            }
            (Mi, DataAck) | (Mi, InvAck) => {
                dir.owner = None;
                dir.downgrade_target = None;
                dir.tag = I;
                Ok(StepOutcome::Applied)
            }
            (Mi, Gets) | (Mi, Getx) | (Mi, Upgrade) => Ok(StepOutcome::Stalled),

            // everything else is a genuine protocol violation
            (tag, other) => Err(self.unhandled(tag, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    fn dir_with_data(v: u8) -> DirectoryState {
        DirectoryState::new(Value(v))
    }

    #[test]
    fn clean_read_tracks_sharer() {
        let ctl = DirectoryController::new(3, false);
        let mut dir = dir_with_data(7);
        let mut net = Network::with_default_capacity(3);
        let msg = Message::to_dir(
            MessageType::Gets,
            Node::Sock(SocketId(0)),
            Some(Level::Dc),
            VirtualChannel::Req,
            None,
        );
        ctl.on_message(&mut dir, &mut net, &msg).unwrap();
        assert_eq!(dir.tag, DirTag::S);
        assert!(dir.sharers.contains(&SocketId(0)));
    }

    #[test]
    fn getx_from_i_needs_n_minus_one_acks() {
        let ctl = DirectoryController::new(3, false);
        let mut dir = dir_with_data(1);
        let mut net = Network::with_default_capacity(3);
        let msg = Message::to_dir(
            MessageType::Getx,
            Node::Sock(SocketId(0)),
            Some(Level::Dc),
            VirtualChannel::Req,
            None,
        );
        ctl.on_message(&mut dir, &mut net, &msg).unwrap();
        assert_eq!(dir.tag, DirTag::ImIa);
        assert_eq!(dir.acks_needed, 2);
        assert_eq!(net.len(), 2);
    }

    #[test]
    fn sole_sharer_getx_fast_paths_to_sm_da() {
        let ctl = DirectoryController::new(3, false);
        let mut dir = dir_with_data(1);
        dir.tag = DirTag::S;
        dir.sharers.insert(SocketId(0));
        let mut net = Network::with_default_capacity(3);
        let msg = Message::to_dir(
            MessageType::Getx,
            Node::Sock(SocketId(0)),
            Some(Level::Dc),
            VirtualChannel::Req,
            None,
        );
        ctl.on_message(&mut dir, &mut net, &msg).unwrap();
        assert_eq!(dir.tag, DirTag::SmDa);
        assert_eq!(dir.owner, Some(SocketId(0)));
    }

    #[test]
    fn strict_mode_asserts_on_sole_sharer_getx() {
        let ctl = DirectoryController::new(3, true);
        let mut dir = dir_with_data(1);
        dir.tag = DirTag::S;
        dir.sharers.insert(SocketId(0));
        let mut net = Network::with_default_capacity(3);
        let msg = Message::to_dir(
            MessageType::Getx,
            Node::Sock(SocketId(0)),
            Some(Level::Dc),
            VirtualChannel::Req,
            None,
        );
        assert!(ctl.on_message(&mut dir, &mut net, &msg).is_err());
    }

    #[test]
    fn unhandled_pair_is_reported() {
        let ctl = DirectoryController::new(3, false);
        let mut dir = dir_with_data(1);
        let mut net = Network::with_default_capacity(3);
        let msg = Message::to_dir(
            MessageType::Downgrade,
            Node::Sock(SocketId(0)),
            Some(Level::Dc),
            VirtualChannel::Req,
            None,
        );
        assert!(ctl.on_message(&mut dir, &mut net, &msg).is_err());
    }
}
