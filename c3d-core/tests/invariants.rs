//! Property-based check that no reachable sequence of environment rules
//! breaks any §8 invariant, for small configurations reachable within a
//! short random walk.

use c3d_core::env::Rule;
use c3d_core::{Config, SocketId, StepOutcome, System, Value};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Action {
    Read(u8),
    Write(u8, u8),
    LlcReplace(u8),
    DcReplace(u8),
    DirReplaceS(u8),
    DirReplaceM,
    Receive(usize),
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..3).prop_map(Action::Read),
        (0u8..3, 0u8..2).prop_map(|(s, v)| Action::Write(s, v)),
        (0u8..3).prop_map(Action::LlcReplace),
        (0u8..3).prop_map(Action::DcReplace),
        (0u8..3).prop_map(Action::DirReplaceS),
        Just(Action::DirReplaceM),
        (0usize..16).prop_map(Action::Receive),
    ]
}

/// Maps an `Action` onto a concrete enabled `Rule`, or `None` if nothing
/// matching is currently enabled — most actions simply won't apply most of
/// the time, which is expected and fine; the point is to hit the ones that
/// do across many random walks.
fn resolve(sys: &System, action: Action) -> Option<Rule> {
    let enabled = sys.enabled_rules();
    let candidate = match action {
        Action::Read(s) => Rule::Read(SocketId(s % sys.config.num_sockets)),
        Action::Write(s, v) => Rule::Write(SocketId(s % sys.config.num_sockets), Value(v % sys.config.value_domain_size)),
        Action::LlcReplace(s) => Rule::LlcReplace(SocketId(s % sys.config.num_sockets)),
        Action::DcReplace(s) => Rule::DcReplace(SocketId(s % sys.config.num_sockets)),
        Action::DirReplaceS(s) => Rule::DirectoryReplaceS(SocketId(s % sys.config.num_sockets)),
        Action::DirReplaceM => Rule::DirectoryReplaceM,
        Action::Receive(i) => {
            let candidates = sys.network.candidates();
            if candidates.is_empty() {
                return None;
            }
            let (node, idx) = candidates[i % candidates.len()];
            Rule::NetworkReceive(node, idx)
        }
    };
    if enabled.contains(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn random_walks_never_violate_invariants(actions in prop::collection::vec(action_strategy(), 1..60)) {
        let mut sys = System::new(Config::new(3, 2, false).unwrap(), Value(0));
        for action in actions {
            if let Some(rule) = resolve(&sys, action) {
                let outcome = sys.apply(rule);
                prop_assert!(outcome.is_ok(), "rule {:?} produced a protocol violation: {:?}", rule, outcome);
                // Only processor/replacement rules are guaranteed to apply
                // once enabled; a candidate message delivery may legitimately
                // stall under the VC discipline.
                if let (Ok(o), false) = (&outcome, matches!(rule, Rule::NetworkReceive(..))) {
                    prop_assert_ne!(*o, StepOutcome::Stalled, "rule {:?} was enabled but reported stalled", rule);
                }
            }
        }
    }
}
