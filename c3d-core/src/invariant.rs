//! Runtime invariant checks: §8 of the spec.
//!
//! Several of these ("directory addressing") are structurally unviolable
//! given [`crate::message::Message`]'s shape — the destination level is
//! `None` iff the destination is the directory, enforced at construction.
//! They're still checked here so the harness can report pass/fail on every
//! invariant named in §8, not just the ones the type system happens to rule
//! out.

use crate::dc::DcTag;
use crate::directory::DirTag;
use crate::error::ProtocolViolation;
use crate::llc::LlcTag;
use crate::network::Network;
use crate::types::{Node, SocketId, Value};

pub struct SocketSnapshotRef {
    pub socket: SocketId,
    pub llc_tag: LlcTag,
    pub llc_data: Option<Value>,
    pub dc_tag: DcTag,
    pub dc_data: Option<Value>,
}

pub struct DirectoryRef<'a> {
    pub tag: DirTag,
    pub owner: Option<SocketId>,
    pub sharers: &'a indexmap::IndexSet<SocketId>,
}

/// Checks every quiescent-state invariant from §8 except SC-per-location
/// (which is checked at read-completion time via [`check_sc`]). Returns the
/// first violation found; the harness treats any violation as fatal so
/// there is no value in collecting more than one.
pub fn check_quiescent(
    dir: &DirectoryRef,
    sockets: &[SocketSnapshotRef],
    net: &Network,
) -> Result<(), ProtocolViolation> {
    // SWMR: at most one socket in M, and if one is in M no other is in M or S.
    let in_m: Vec<SocketId> = sockets
        .iter()
        .filter(|s| s.llc_tag == LlcTag::M)
        .map(|s| s.socket)
        .collect();
    if in_m.len() > 1 {
        return Err(ProtocolViolation::InvariantBroken {
            description: format!("SWMR violated: sockets {in_m:?} all hold LLC M simultaneously"),
        });
    }
    if let Some(&owner) = in_m.first() {
        for s in sockets {
            if s.socket != owner && matches!(s.llc_tag, LlcTag::M | LlcTag::S) {
                return Err(ProtocolViolation::InvariantBroken {
                    description: format!(
                        "SWMR violated: {} holds LLC M while {} holds LLC {:?}",
                        owner, s.socket, s.llc_tag
                    ),
                });
            }
        }
    }

    // Sharer-set cleanliness.
    if matches!(dir.tag, DirTag::M | DirTag::I) && !dir.sharers.is_empty() {
        return Err(ProtocolViolation::InvariantBroken {
            description: format!(
                "sharer-set cleanliness violated: directory in {} with non-empty sharers {:?}",
                dir.tag, dir.sharers
            ),
        });
    }

    // Owner cleanliness.
    if matches!(dir.tag, DirTag::S | DirTag::I) && dir.owner.is_some() {
        return Err(ProtocolViolation::InvariantBroken {
            description: format!(
                "owner cleanliness violated: directory in {} with owner {:?}",
                dir.tag, dir.owner
            ),
        });
    }

    // No data in I, at LLC and at DC.
    for s in sockets {
        if s.llc_tag == LlcTag::I && s.llc_data.is_some() {
            return Err(ProtocolViolation::InvariantBroken {
                description: format!("{} LLC in I but data is defined", s.socket),
            });
        }
        if s.dc_tag == DcTag::I && s.dc_data.is_some() {
            return Err(ProtocolViolation::InvariantBroken {
                description: format!("{} DC in I but data is defined", s.socket),
            });
        }
    }

    // Directory addressing: every in-flight message to the directory has an
    // undefined destination level. Structurally guaranteed by `Message`, but
    // checked here for completeness.
    for node in [Node::Dir] {
        for msg in net.messages_for(node) {
            if msg.dest == Node::Dir && msg.dest_level.is_some() {
                return Err(ProtocolViolation::InvariantBroken {
                    description: format!("message {msg} addressed to directory carries a destination level"),
                });
            }
        }
    }

    Ok(())
}

/// SC-per-location: a read completion must observe the most recently
/// committed write. Called at the moment an LLC read (or the data half of a
/// read miss) completes.
pub fn check_sc(node: Node, observed: Value, last_written: Option<Value>) -> Result<(), ProtocolViolation> {
    if let Some(expected) = last_written {
        if observed != expected {
            return Err(ProtocolViolation::SequentialConsistency {
                node,
                observed,
                expected,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexSet;

    #[test]
    fn swmr_violation_is_detected() {
        let sharers = IndexSet::new();
        let dir = DirectoryRef {
            tag: DirTag::I,
            owner: None,
            sharers: &sharers,
        };
        let sockets = vec![
            SocketSnapshotRef {
                socket: SocketId(0),
                llc_tag: LlcTag::M,
                llc_data: Some(Value(1)),
                dc_tag: DcTag::M,
                dc_data: Some(Value(1)),
            },
            SocketSnapshotRef {
                socket: SocketId(1),
                llc_tag: LlcTag::S,
                llc_data: Some(Value(1)),
                dc_tag: DcTag::S,
                dc_data: Some(Value(1)),
            },
        ];
        let net = Network::with_default_capacity(2);
        assert!(check_quiescent(&dir, &sockets, &net).is_err());
    }

    #[test]
    fn sc_mismatch_is_detected() {
        let result = check_sc(Node::Sock(SocketId(0)), Value(2), Some(Value(1)));
        assert!(result.is_err());
    }

    #[test]
    fn sc_with_no_prior_write_always_passes() {
        assert!(check_sc(Node::Sock(SocketId(0)), Value(9), None).is_ok());
    }
}
