//! Envelope format and virtual-channel discipline: §3 and §4.1 of the spec.

use crate::types::{Level, Node, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical message class with a priority. The ordering is a hard contract:
/// no controller may originate a message on a channel lower than or equal to
/// one on which it is currently blocked waiting for progress. Declaration
/// order doubles as priority order (REQ < RES < UNB), so `derive(Ord)` gives
/// the right relation for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VirtualChannel {
    Req,
    Res,
    Unb,
}

impl fmt::Display for VirtualChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualChannel::Req => write!(f, "REQ"),
            VirtualChannel::Res => write!(f, "RES"),
            VirtualChannel::Unb => write!(f, "UNB"),
        }
    }
}

/// The full message type enumeration from §3. `Load`/`Store` are processor
/// events (§4.4) rather than inter-controller traffic and never appear on a
/// [`crate::network::Network`] mailbox; they are included here only to keep
/// this enum a faithful transcription of the data model. `Replacement` is
/// reserved for the same reason: cache replacement is a silent local state
/// transition (§4.3/§4.4), never a wire message, so this variant is never
/// constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Data,
    DataAck,
    Downgrade,
    DowngradeAck,
    Gets,
    Getx,
    Upgrade,
    UpgradeAck,
    Inv,
    InvAck,
    Putx,
    PutAck,
    Replacement,
    Load,
    Store,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Data => "DATA",
            MessageType::DataAck => "DATA-ACK",
            MessageType::Downgrade => "DOWNGRADE",
            MessageType::DowngradeAck => "DOWNGRADE-ACK",
            MessageType::Gets => "GETS",
            MessageType::Getx => "GETX",
            MessageType::Upgrade => "UPGRADE",
            MessageType::UpgradeAck => "UPGRADE-ACK",
            MessageType::Inv => "INV",
            MessageType::InvAck => "INV-ACK",
            MessageType::Putx => "PUTX",
            MessageType::PutAck => "PUT-ACK",
            MessageType::Replacement => "REPLACEMENT",
            MessageType::Load => "LOAD",
            MessageType::Store => "STORE",
        };
        write!(f, "{s}")
    }
}

/// A record addressed to a destination node (and, if that node is a socket,
/// a destination level), carrying an optional data value. Per §9, undefined
/// fields are a modelling convenience; here the destination/source level is
/// simply `None` whenever the corresponding node is the directory, since the
/// directory has no levels — the "Directory addressing" invariant in §8
/// therefore cannot be violated by construction; see [`crate::invariant`]
/// for the (trivially-true, but still reported) runtime check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub dest: Node,
    pub dest_level: Option<Level>,
    pub src: Node,
    pub src_level: Option<Level>,
    pub vc: VirtualChannel,
    pub data: Option<Value>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        msg_type: MessageType,
        dest: Node,
        dest_level: Option<Level>,
        src: Node,
        src_level: Option<Level>,
        vc: VirtualChannel,
        data: Option<Value>,
    ) -> Self {
        debug_assert_eq!(
            dest == Node::Dir,
            dest_level.is_none(),
            "destination level must be undefined iff addressed to the directory"
        );
        debug_assert_eq!(
            src == Node::Dir,
            src_level.is_none(),
            "source level must be undefined iff originated at the directory"
        );
        Message {
            msg_type,
            dest,
            dest_level,
            src,
            src_level,
            vc,
            data,
        }
    }

    /// Builds a message destined for the directory.
    pub fn to_dir(
        msg_type: MessageType,
        src: Node,
        src_level: Option<Level>,
        vc: VirtualChannel,
        data: Option<Value>,
    ) -> Self {
        Message::new(msg_type, Node::Dir, None, src, src_level, vc, data)
    }

    /// Builds a message destined for a specific socket/level.
    pub fn to_socket(
        msg_type: MessageType,
        dest: crate::types::SocketId,
        dest_level: Level,
        src: Node,
        src_level: Option<Level>,
        vc: VirtualChannel,
        data: Option<Value>,
    ) -> Self {
        Message::new(
            msg_type,
            Node::Sock(dest),
            Some(dest_level),
            src,
            src_level,
            vc,
            data,
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} -> {}{}",
            self.msg_type,
            self.vc,
            self.src,
            self.dest,
            match self.dest_level {
                Some(l) => format!(".{l}"),
                None => String::new(),
            }
        )
    }
}
