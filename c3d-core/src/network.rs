//! Per-destination bounded mailboxes and nondeterministic delivery: §4.1.

use crate::error::ProtocolViolation;
use crate::message::Message;
use crate::types::{Node, SocketId};
use std::collections::HashMap;

/// A bounded, unordered mailbox per node. Messages are delivered in an
/// arbitrary order subject only to one-receive-per-step; we model "multiset,
/// arbitrary order" with a plain `Vec` and `swap_remove`, which makes no
/// promise about ordering beyond what's already unspecified by the model.
#[derive(Debug, Clone)]
pub struct Network {
    capacity: usize,
    mailboxes: HashMap<Node, Vec<Message>>,
}

impl Network {
    /// `capacity` is the spec's "at least twice the socket count plus one"
    /// (§3 Network). Callers needing a different bound for stress-testing
    /// the overflow path may pass a smaller value explicitly.
    pub fn new(num_sockets: u8, capacity: usize) -> Self {
        let mut mailboxes = HashMap::new();
        mailboxes.insert(Node::Dir, Vec::new());
        for i in 0..num_sockets {
            mailboxes.insert(Node::Sock(SocketId(i)), Vec::new());
        }
        Network { capacity, mailboxes }
    }

    pub fn with_default_capacity(num_sockets: u8) -> Self {
        Network::new(num_sockets, 2 * num_sockets as usize + 1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `msg` to its destination's mailbox. Fails if that mailbox is
    /// already at capacity — the Send precondition from §4.1/§9, whose
    /// violation is always a design bug in the caller, never recoverable.
    pub fn send(&mut self, msg: Message) -> Result<(), ProtocolViolation> {
        let dest = msg.dest;
        let box_ = self
            .mailboxes
            .get_mut(&dest)
            .expect("destination node must have a registered mailbox");
        if box_.len() >= self.capacity {
            return Err(ProtocolViolation::MailboxOverflow {
                node: dest,
                capacity: self.capacity,
                msg_type: msg.msg_type,
            });
        }
        box_.push(msg);
        Ok(())
    }

    /// Sends every message in `msgs`, atomically: if any send would overflow
    /// capacity, none of them are applied. This backs the broadcast
    /// primitives of §9 ("must be atomic with respect to the step").
    pub fn send_all(&mut self, msgs: Vec<Message>) -> Result<(), ProtocolViolation> {
        for msg in &msgs {
            let box_ = self
                .mailboxes
                .get(&msg.dest)
                .expect("destination node must have a registered mailbox");
            if box_.len() >= self.capacity {
                return Err(ProtocolViolation::MailboxOverflow {
                    node: msg.dest,
                    capacity: self.capacity,
                    msg_type: msg.msg_type,
                });
            }
        }
        for msg in msgs {
            self.mailboxes.get_mut(&msg.dest).unwrap().push(msg);
        }
        Ok(())
    }

    /// All `(node, index)` pairs currently available for delivery — the
    /// candidate set the environment driver's "receive one message" rule
    /// picks from nondeterministically.
    pub fn candidates(&self) -> Vec<(Node, usize)> {
        let mut out = Vec::new();
        for (node, box_) in &self.mailboxes {
            for i in 0..box_.len() {
                out.push((*node, i));
            }
        }
        out
    }

    pub fn peek(&self, node: Node, index: usize) -> Option<&Message> {
        self.mailboxes.get(&node)?.get(index)
    }

    /// Removes and returns the message at `(node, index)`. Panics if absent
    /// — callers always derive `(node, index)` from [`Network::candidates`]
    /// taken in the same step, so this should never be reached with a stale
    /// index (delivery is atomic per step: nothing else mutates the network
    /// between the candidate scan and the consuming `take`).
    pub fn take(&mut self, node: Node, index: usize) -> Message {
        let box_ = self.mailboxes.get_mut(&node).expect("unknown node");
        box_.swap_remove(index)
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.mailboxes.values().map(Vec::len).sum()
    }

    pub fn messages_for(&self, node: Node) -> &[Message] {
        self.mailboxes.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, VirtualChannel};
    use crate::types::Level;

    #[test]
    fn overflow_is_rejected() {
        let mut net = Network::new(3, 1);
        let msg = Message::to_socket(
            MessageType::Inv,
            SocketId(0),
            Level::Dc,
            Node::Dir,
            None,
            VirtualChannel::Req,
            None,
        );
        net.send(msg.clone()).unwrap();
        assert!(net.send(msg).is_err());
    }

    #[test]
    fn take_removes_exactly_one() {
        let mut net = Network::with_default_capacity(3);
        let msg = Message::to_dir(
            MessageType::Gets,
            Node::Sock(SocketId(0)),
            Some(Level::Dc),
            VirtualChannel::Req,
            None,
        );
        net.send(msg).unwrap();
        assert_eq!(net.len(), 1);
        let (node, idx) = net.candidates()[0];
        net.take(node, idx);
        assert!(net.is_empty());
    }
}
