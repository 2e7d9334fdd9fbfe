//! Exploration strategies for the model-checking harness: a randomized
//! walk for quick smoke runs, and a bounded exhaustive BFS with symmetry
//! reduction over sharer-set permutations for exhaustive small
//! configurations. Neither exists in the source model — §9's note that
//! "verification harnesses should enumerate all interleavings up to
//! symmetry" (spec §5) is the license to add them.

use c3d_core::dc::DcTag;
use c3d_core::directory::DirTag;
use c3d_core::env::Rule;
use c3d_core::llc::LlcTag;
use c3d_core::types::{Node, SocketId, Value};
use c3d_core::{ProtocolViolation, StepOutcome, System};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};

#[derive(Debug)]
pub struct RandomWalkReport {
    pub steps_taken: usize,
    pub violation: Option<ProtocolViolation>,
}

/// Drives `sys` for up to `steps` rule applications, picking uniformly among
/// the enabled rules at each step. Stops early on the first violation.
pub fn randomized_walk(sys: &mut System, steps: usize, seed: u64) -> RandomWalkReport {
    let mut rng = StdRng::seed_from_u64(seed);
    for i in 0..steps {
        let enabled = sys.enabled_rules();
        let Some(&rule) = enabled.choose(&mut rng) else {
            return RandomWalkReport {
                steps_taken: i,
                violation: None,
            };
        };
        if let Err(violation) = sys.apply(rule) {
            return RandomWalkReport {
                steps_taken: i + 1,
                violation: Some(violation),
            };
        }
    }
    RandomWalkReport {
        steps_taken: steps,
        violation: None,
    }
}

#[derive(Debug)]
pub struct BfsReport {
    pub states_visited: usize,
    pub max_depth_reached: usize,
    pub violation: Option<(ProtocolViolation, Vec<Rule>)>,
    pub truncated: bool,
}

/// Exhaustively enumerates reachable states up to `max_depth`, deduplicating
/// by a canonical signature that's invariant under socket relabeling (§9:
/// sockets are interchangeable, so e.g. sharers {A,B} and {B,A} after
/// swapping A/B's entire histories are the same state for checking
/// purposes). `max_states` bounds the search so a misconfigured run fails
/// fast instead of exhausting memory.
pub fn bounded_bfs(initial: System, max_depth: usize, max_states: usize) -> BfsReport {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(System, Vec<Rule>)> = VecDeque::new();
    visited.insert(canonical_key(&initial));
    queue.push_back((initial, Vec::new()));

    let mut states_visited = 0usize;
    let mut max_depth_reached = 0usize;

    while let Some((sys, path)) = queue.pop_front() {
        states_visited += 1;
        max_depth_reached = max_depth_reached.max(path.len());
        if states_visited > max_states {
            return BfsReport {
                states_visited,
                max_depth_reached,
                violation: None,
                truncated: true,
            };
        }
        if path.len() >= max_depth {
            continue;
        }

        for rule in sys.enabled_rules() {
            let mut next = clone_system(&sys);
            match next.apply(rule) {
                Ok(StepOutcome::Stalled) => continue,
                Ok(StepOutcome::Applied) => {
                    let key = canonical_key(&next);
                    if visited.insert(key) {
                        let mut next_path = path.clone();
                        next_path.push(rule);
                        queue.push_back((next, next_path));
                    }
                }
                Err(violation) => {
                    let mut next_path = path.clone();
                    next_path.push(rule);
                    return BfsReport {
                        states_visited,
                        max_depth_reached,
                        violation: Some((violation, next_path)),
                        truncated: false,
                    };
                }
            }
        }
    }

    BfsReport {
        states_visited,
        max_depth_reached,
        violation: None,
        truncated: false,
    }
}

/// `System` has no `Clone` of its own (its controllers are stateless
/// dispatchers, cheap to rebuild) — BFS needs independent copies per branch,
/// so this rebuilds one from the same config and replays nothing: it copies
/// the mutable state fields directly instead of re-deriving controllers.
fn clone_system(sys: &System) -> System {
    let mut next = System::new(sys.config, sys.dir.data.unwrap_or(Value(0)));
    next.dir = sys.dir.clone();
    next.dcs = sys.dcs.clone();
    next.llcs = sys.llcs.clone();
    next.network = sys.network.clone();
    next.last_written = sys.last_written;
    next
}

/// A canonical string signature for `sys`, invariant under any permutation
/// of socket labels. Tries every permutation (cheap for the small socket
/// counts this model targets) and keeps the lexicographically smallest
/// rendering.
fn canonical_key(sys: &System) -> String {
    let n = sys.config.num_sockets as usize;
    let mut perm: Vec<u8> = (0..sys.config.num_sockets).collect();
    let mut best: Option<String> = None;

    permute(&mut perm, 0, &mut |p| {
        let key = render_with_permutation(sys, p, n);
        if best.as_ref().map(|b| &key < b).unwrap_or(true) {
            best = Some(key);
        }
    });

    best.expect("at least the identity permutation is always tried")
}

fn permute(arr: &mut Vec<u8>, k: usize, visit: &mut impl FnMut(&[u8])) {
    if k == arr.len() {
        visit(arr);
        return;
    }
    for i in k..arr.len() {
        arr.swap(k, i);
        permute(arr, k + 1, visit);
        arr.swap(k, i);
    }
}

fn remap_socket(perm: &[u8], s: SocketId) -> SocketId {
    SocketId(perm[s.0 as usize])
}

fn remap_node(perm: &[u8], node: Node) -> Node {
    match node {
        Node::Dir => Node::Dir,
        Node::Sock(s) => Node::Sock(remap_socket(perm, s)),
    }
}

fn render_with_permutation(sys: &System, perm: &[u8], n: usize) -> String {
    let mut out = String::new();

    let mut sharers: Vec<SocketId> = sys.dir.sharers.iter().map(|&s| remap_socket(perm, s)).collect();
    sharers.sort();
    let owner = sys.dir.owner.map(|s| remap_socket(perm, s));
    out.push_str(&format!(
        "DIR({:?},{:?},{:?},{},{:?})",
        sys.dir.tag, owner, sharers, sys.dir.acks_needed, sys.dir.data
    ));

    let mut per_socket: Vec<(SocketId, LlcTag, Option<Value>, DcTag, Option<Value>)> = (0..n)
        .map(|old| {
            let old_id = SocketId(old as u8);
            (
                remap_socket(perm, old_id),
                sys.llcs[old].tag,
                sys.llcs[old].data,
                sys.dcs[old].tag,
                sys.dcs[old].data,
            )
        })
        .collect();
    per_socket.sort_by_key(|t| t.0);
    for (id, llc_tag, llc_data, dc_tag, dc_data) in per_socket {
        out.push_str(&format!(
            "|S{:?}:LLC({:?},{:?})DC({:?},{:?})",
            id, llc_tag, llc_data, dc_tag, dc_data
        ));
    }

    let mut messages: Vec<String> = Vec::new();
    for old in 0..n {
        for msg in sys.network.messages_for(Node::Sock(SocketId(old as u8))) {
            messages.push(format!(
                "{:?}@{:?}.{:?}<-{:?}.{:?}[{:?}]={:?}",
                msg.msg_type,
                remap_node(perm, msg.dest),
                msg.dest_level,
                remap_node(perm, msg.src),
                msg.src_level,
                msg.vc,
                msg.data
            ));
        }
    }
    for msg in sys.network.messages_for(Node::Dir) {
        messages.push(format!(
            "{:?}@{:?}.{:?}<-{:?}.{:?}[{:?}]={:?}",
            msg.msg_type,
            remap_node(perm, msg.dest),
            msg.dest_level,
            remap_node(perm, msg.src),
            msg.src_level,
            msg.vc,
            msg.data
        ));
    }
    messages.sort();
    out.push('|');
    out.push_str(&messages.join(","));

    out
}
