// verify/checks.rs - Well-Formedness Checks

use super::algo::{
    fork_branches, reachable_from, reaches_any, region_until_merge, shortest_path, tarjan_scc,
};
use super::report::{CheckResult, Priority, Report, Violation};
use crate::cfg::{Cfg, CfgNodeKind, EdgeKind, MessageAction, NodeId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Run every check against a CFG.
///
/// The verifier is total: it never fails on any well-typed CFG, including
/// hand-built ones, and it is deterministic: checks run in a fixed order
/// and iterate nodes in insertion order.
pub fn verify(cfg: &Cfg) -> Report {
    let checks = vec![
        deadlock_freedom(cfg),
        liveness(cfg),
        parallel_deadlock(cfg),
        race_freedom(cfg),
        progress(cfg),
        choice_determinism(cfg),
        choice_mergeability(cfg),
        connectedness(cfg),
        recursion_scoping(cfg),
        recursion_parallel_boundary(cfg),
        fork_join_pairing(cfg),
        edge_integrity(cfg),
        branch_merge_pairing(cfg),
        multicast(cfg),
        self_communication(cfg),
        empty_choice_branch(cfg),
        empty_recursion(cfg),
        choice_merge_convergence(cfg),
        reachability(cfg),
        dangling_merge(cfg),
    ];

    let failed: Vec<&str> = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name)
        .collect();
    debug!(protocol = %cfg.protocol, failed = ?failed, "verification finished");

    Report {
        protocol: cfg.protocol.clone(),
        checks,
    }
}

// ---- P0: safety and projection-critical -----------------------------------

/// No strongly connected component of the sequence/branch/fork subgraph
/// traps execution: a cycle that excludes continue edges has no way out.
fn deadlock_freedom(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    let kinds = [EdgeKind::Sequence, EdgeKind::Branch, EdgeKind::Fork];
    for component in tarjan_scc(cfg, &kinds) {
        let cyclic = component.len() > 1
            || cfg
                .outgoing(&component[0])
                .any(|e| kinds.contains(&e.kind) && e.to == component[0]);
        if !cyclic {
            continue;
        }
        let members: BTreeSet<&NodeId> = component.iter().collect();
        let has_terminal = component.iter().any(|n| cfg.is_terminal(n));
        let has_escape = component.iter().any(|n| {
            cfg.outgoing(n)
                .any(|e| kinds.contains(&e.kind) && !members.contains(&e.to))
        });
        if !has_terminal && !has_escape {
            violations.push(Violation::new(
                "structural cycle with no escape to a terminal",
                component.clone(),
            ));
        }
    }
    CheckResult::new("deadlock-freedom", Priority::P0, violations)
}

/// Every node has a path to a terminal. Nodes trapped in a never-exiting
/// recursion fail here; that is a report, not a structural error.
fn liveness(cfg: &Cfg) -> CheckResult {
    let live = reaches_any(cfg, &cfg.terminals);
    let mut violations = Vec::new();
    for node in cfg.nodes() {
        if !live.contains(&node.id) {
            let mut violation = Violation::new(
                format!("node {} has no path to a terminal", node.id),
                vec![node.id.clone()],
            );
            if let Some(path) = shortest_path(cfg, &cfg.initial, &node.id) {
                violation = violation.with_witness(path);
            }
            violations.push(violation);
        }
    }
    CheckResult::new("liveness", Priority::P0, violations)
}

/// A role that sends in two branches of the same parallel serialises
/// itself across supposedly concurrent flows.
fn parallel_deadlock(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for (fork, branches) in fork_branches(cfg) {
        let sender_sets: Vec<BTreeSet<&str>> = branches
            .iter()
            .map(|region| {
                region
                    .iter()
                    .filter_map(|n| cfg.node(n).and_then(|n| n.message()))
                    .map(|m| m.sender.as_str())
                    .collect()
            })
            .collect();
        let mut flagged = BTreeSet::new();
        for (i, left) in sender_sets.iter().enumerate() {
            for right in sender_sets.iter().skip(i + 1) {
                for role in left.intersection(right) {
                    if flagged.insert(role.to_string()) {
                        violations.push(Violation::new(
                            format!("role {} sends in more than one branch of {}", role, fork),
                            vec![fork.clone()],
                        ));
                    }
                }
            }
        }
    }
    CheckResult::new("parallel-deadlock", Priority::P0, violations)
}

/// Linearity: two concurrent branches must not put the same
/// (sender, receiver, label) on the wire.
fn race_freedom(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for (fork, branches) in fork_branches(cfg) {
        let channel_sets: Vec<BTreeSet<(String, String, String)>> = branches
            .iter()
            .map(|region| {
                region
                    .iter()
                    .filter_map(|n| cfg.node(n).and_then(|n| n.message()))
                    .flat_map(|m| {
                        m.receivers
                            .iter()
                            .map(move |r| (m.sender.clone(), r.clone(), m.label.clone()))
                    })
                    .collect()
            })
            .collect();
        for (i, left) in channel_sets.iter().enumerate() {
            for right in channel_sets.iter().skip(i + 1) {
                for (sender, receiver, label) in left.intersection(right) {
                    violations.push(Violation::new(
                        format!(
                            "message {}({} to {}) races with itself across branches of {}",
                            label, sender, receiver, fork
                        ),
                        vec![fork.clone()],
                    ));
                }
            }
        }
    }
    CheckResult::new("race-freedom", Priority::P0, violations)
}

/// Every non-terminal node can take a step.
fn progress(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for node in cfg.nodes() {
        if !node.is_terminal() && cfg.outgoing(&node.id).next().is_none() {
            violations.push(Violation::new(
                format!("non-terminal node {} has no outgoing edge", node.id),
                vec![node.id.clone()],
            ));
        }
    }
    CheckResult::new("progress", Priority::P0, violations)
}

/// The first message of each branch must be distinguishable, both overall
/// and from the viewpoint of every non-decider role that observes the
/// choice.
fn choice_determinism(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for (branch_node, decider, branches) in choices(cfg) {
        // Overall first labels, pairwise across branches.
        let firsts: Vec<BTreeSet<String>> = branches
            .iter()
            .map(|b| {
                first_messages(cfg, &b.entry, &b.region, None)
                    .into_iter()
                    .map(|m| m.label)
                    .collect()
            })
            .collect();
        for (i, left) in firsts.iter().enumerate() {
            for (j, right) in firsts.iter().enumerate().skip(i + 1) {
                for label in left.intersection(right) {
                    violations.push(Violation::new(
                        format!(
                            "branches {} and {} of choice at {} both start with label '{}'",
                            i, j, decider, label
                        ),
                        vec![branch_node.clone()],
                    ));
                }
            }
        }

        // Per-role view: the first label each non-decider role receives.
        for role in cfg.roles.clone() {
            if role == decider {
                continue;
            }
            let views: Vec<BTreeSet<String>> = branches
                .iter()
                .map(|b| {
                    first_messages(cfg, &b.entry, &b.region, Some(&role))
                        .into_iter()
                        .map(|m| m.label)
                        .collect()
                })
                .collect();
            for (i, left) in views.iter().enumerate() {
                for (j, right) in views.iter().enumerate().skip(i + 1) {
                    for label in left.intersection(right) {
                        violations.push(Violation::new(
                            format!(
                                "role {} cannot tell branches {} and {} of choice at {} apart: both deliver '{}' first",
                                role, i, j, decider, label
                            ),
                            vec![branch_node.clone()],
                        ));
                    }
                }
            }
        }
    }
    // A choice may produce the same finding through both lenses; report once.
    violations.dedup_by(|a, b| a.message == b.message);
    CheckResult::new("choice-determinism", Priority::P0, violations)
}

/// A non-decider role must be able to behave consistently whichever branch
/// is taken: roles absent from some branches must open every branch they
/// appear in with a receive, and roles whose first involvement is a send
/// must behave identically across branches.
fn choice_mergeability(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for (branch_node, decider, branches) in choices(cfg) {
        for role in cfg.roles.clone() {
            if role == decider {
                continue;
            }
            let involvements: Vec<Option<Involvement>> = branches
                .iter()
                .map(|b| first_involvement(cfg, &b.entry, &b.region, &role))
                .collect();
            let participating: Vec<&Involvement> =
                involvements.iter().flatten().collect();
            if participating.is_empty() {
                continue;
            }

            let partial = participating.len() < branches.len();
            if partial {
                for involvement in &participating {
                    if involvement.sends {
                        violations.push(Violation::new(
                            format!(
                                "role {} is absent from some branches of choice at {} but initiates with a send in another",
                                role, decider
                            ),
                            vec![branch_node.clone()],
                        ));
                    }
                }
                continue;
            }

            let any_sends = participating.iter().any(|i| i.sends);
            if any_sends {
                let head = participating[0];
                let uniform = participating.iter().all(|i| {
                    i.sends == head.sends && i.peer == head.peer && i.label == head.label
                });
                if !uniform {
                    violations.push(Violation::new(
                        format!(
                            "role {} acts before learning the outcome of choice at {} and its behaviour differs across branches",
                            role, decider
                        ),
                        vec![branch_node.clone()],
                    ));
                }
            }
        }
    }
    violations.dedup_by(|a, b| a.message == b.message);
    CheckResult::new("choice-mergeability", Priority::P0, violations)
}

/// Declared roles and participating roles must coincide.
fn connectedness(cfg: &Cfg) -> CheckResult {
    let declared: BTreeSet<&str> = cfg.roles.iter().map(String::as_str).collect();
    let participating = cfg.participating_roles();
    let used: BTreeSet<&str> = participating.iter().map(String::as_str).collect();

    let mut violations = Vec::new();
    for role in declared.difference(&used) {
        violations.push(Violation::new(
            format!("declared role {} never participates", role),
            vec![],
        ));
    }
    for role in used.difference(&declared) {
        violations.push(Violation::new(
            format!("role {} participates but is not declared", role),
            vec![],
        ));
    }
    CheckResult::new("connectedness", Priority::P0, violations)
}

// ---- P1: well-formedness ---------------------------------------------------

/// Continue edges may only target recursive nodes; label scoping is
/// enforced during construction, the target kind is re-checked here.
fn recursion_scoping(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for edge in cfg.edges() {
        if edge.kind == EdgeKind::Continue {
            let target_ok = cfg
                .node(&edge.to)
                .is_some_and(|n| matches!(n.kind, CfgNodeKind::Recursive { .. }));
            if !target_ok {
                violations.push(Violation::new(
                    format!("continue edge from {} targets non-recursive node {}", edge.from, edge.to),
                    vec![edge.from.clone(), edge.to.clone()],
                ));
            }
        }
    }
    CheckResult::new("recursion-scoping", Priority::P1, violations)
}

/// A continue edge and its recursive node must sit in the same branch of
/// every parallel.
fn recursion_parallel_boundary(cfg: &Cfg) -> CheckResult {
    let forks = fork_branches(cfg);
    let context = |node: &NodeId| -> Vec<(NodeId, usize)> {
        let mut ctx = Vec::new();
        for (fork, branches) in &forks {
            for (index, region) in branches.iter().enumerate() {
                if region.contains(node) {
                    ctx.push((fork.clone(), index));
                }
            }
        }
        ctx
    };

    let mut violations = Vec::new();
    for edge in cfg.edges() {
        if edge.kind == EdgeKind::Continue && context(&edge.from) != context(&edge.to) {
            violations.push(Violation::new(
                format!(
                    "continue edge {} -> {} crosses a parallel branch boundary",
                    edge.from, edge.to
                ),
                vec![edge.from.clone(), edge.to.clone()],
            ));
        }
    }
    CheckResult::new("recursion-parallel-boundary", Priority::P1, violations)
}

/// parallel_id pairs forks and joins bijectively.
fn fork_join_pairing(cfg: &Cfg) -> CheckResult {
    let mut forks: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
    let mut joins: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
    for node in cfg.nodes() {
        match &node.kind {
            CfgNodeKind::Fork { parallel_id } => {
                forks.entry(parallel_id).or_default().push(node.id.clone())
            }
            CfgNodeKind::Join { parallel_id } => {
                joins.entry(parallel_id).or_default().push(node.id.clone())
            }
            _ => {}
        }
    }

    let mut violations = Vec::new();
    let ids: BTreeSet<&str> = forks.keys().chain(joins.keys()).copied().collect();
    for id in ids {
        let fork_count = forks.get(id).map_or(0, Vec::len);
        let join_count = joins.get(id).map_or(0, Vec::len);
        if fork_count != 1 || join_count != 1 {
            let mut nodes = forks.get(id).cloned().unwrap_or_default();
            nodes.extend(joins.get(id).cloned().unwrap_or_default());
            violations.push(Violation::new(
                format!(
                    "parallel id {} has {} fork(s) and {} join(s)",
                    id, fork_count, join_count
                ),
                nodes,
            ));
        }
    }
    CheckResult::new("fork-join-pairing", Priority::P1, violations)
}

/// Edges resolve, there is exactly one initial and at least one terminal,
/// the initial has no predecessor and terminals have no successor.
fn edge_integrity(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for edge in cfg.edges() {
        for endpoint in [&edge.from, &edge.to] {
            if cfg.node(endpoint).is_none() {
                violations.push(Violation::new(
                    format!("edge references unknown node {}", endpoint),
                    vec![endpoint.clone()],
                ));
            }
        }
    }

    let initials: Vec<NodeId> = cfg
        .nodes()
        .iter()
        .filter(|n| matches!(n.kind, CfgNodeKind::Initial))
        .map(|n| n.id.clone())
        .collect();
    if initials.len() != 1 {
        violations.push(Violation::new(
            format!("expected exactly one initial node, found {}", initials.len()),
            initials,
        ));
    } else if cfg.incoming(&cfg.initial).next().is_some() {
        violations.push(Violation::new(
            "initial node has a predecessor",
            vec![cfg.initial.clone()],
        ));
    }

    if cfg.terminals.is_empty() {
        violations.push(Violation::new("no terminal node", vec![]));
    }
    for terminal in &cfg.terminals {
        if cfg.outgoing(terminal).next().is_some() {
            violations.push(Violation::new(
                format!("terminal node {} has a successor", terminal),
                vec![terminal.clone()],
            ));
        }
    }
    CheckResult::new("edge-integrity", Priority::P1, violations)
}

/// Each choice's non-diverting branches resolve to exactly one merge, and
/// no two choices claim the same merge.
fn branch_merge_pairing(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    let mut claimed: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    for (branch_node, _, branches) in choices(cfg) {
        let merges: BTreeSet<NodeId> =
            branches.iter().filter_map(|b| b.merge.clone()).collect();
        if merges.len() > 1 {
            violations.push(Violation::new(
                format!("choice {} resolves to multiple merges", branch_node),
                merges.iter().cloned().collect(),
            ));
        }
        if let Some(merge) = merges.into_iter().next() {
            if let Some(previous) = claimed.insert(merge.clone(), branch_node.clone()) {
                violations.push(Violation::new(
                    format!(
                        "merge {} is claimed by both {} and {}",
                        merge, previous, branch_node
                    ),
                    vec![merge],
                ));
            }
        }
    }
    CheckResult::new("branch-merge-pairing", Priority::P1, violations)
}

// ---- P2: suspicious but legal ----------------------------------------------

fn multicast(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for (node, message) in cfg.messages() {
        if message.receivers.len() > 1 {
            violations.push(Violation::new(
                format!(
                    "message {} multicasts to {} receivers",
                    message.label,
                    message.receivers.len()
                ),
                vec![node.clone()],
            ));
        }
    }
    CheckResult::new("multicast", Priority::P2, violations)
}

fn self_communication(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for (node, message) in cfg.messages() {
        if message.receivers.contains(&message.sender) {
            violations.push(Violation::new(
                format!("role {} sends {} to itself", message.sender, message.label),
                vec![node.clone()],
            ));
        }
    }
    CheckResult::new("self-communication", Priority::P2, violations)
}

/// A branch edge straight into a merge: the branch does nothing.
fn empty_choice_branch(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for edge in cfg.edges() {
        if edge.kind == EdgeKind::Branch
            && cfg
                .node(&edge.to)
                .is_some_and(|n| matches!(n.kind, CfgNodeKind::Merge))
        {
            violations.push(Violation::new(
                format!("choice {} has an empty branch", edge.from),
                vec![edge.from.clone(), edge.to.clone()],
            ));
        }
    }
    CheckResult::new("empty-choice-branch", Priority::P2, violations)
}

/// A rec block no continue ever returns to is just sequencing.
fn empty_recursion(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for node in cfg.nodes() {
        if let CfgNodeKind::Recursive { label } = &node.kind {
            let continued = cfg
                .incoming(&node.id)
                .any(|e| e.kind == EdgeKind::Continue);
            if !continued {
                violations.push(Violation::new(
                    format!("rec {} is never continued", label),
                    vec![node.id.clone()],
                ));
            }
        }
    }
    CheckResult::new("empty-recursion", Priority::P2, violations)
}

// ---- P3: structural ---------------------------------------------------------

/// Branch exits converge on the single merge of their choice; branches that
/// divert through a continue are exempt.
fn choice_merge_convergence(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for (branch_node, _, branches) in choices(cfg) {
        let distinct: BTreeSet<NodeId> =
            branches.iter().filter_map(|b| b.merge.clone()).collect();
        if distinct.len() > 1 {
            violations.push(Violation::new(
                format!("branches of {} do not converge on one merge", branch_node),
                distinct.into_iter().collect(),
            ));
        }
    }
    CheckResult::new("choice-merge-convergence", Priority::P3, violations)
}

/// Every node is reachable from the initial.
fn reachability(cfg: &Cfg) -> CheckResult {
    let reachable = reachable_from(cfg, &cfg.initial);
    let mut violations = Vec::new();
    for node in cfg.nodes() {
        if !reachable.contains(&node.id) {
            violations.push(Violation::new(
                format!("node {} is unreachable from the initial node", node.id),
                vec![node.id.clone()],
            ));
        }
    }
    CheckResult::new("reachability", Priority::P3, violations)
}

/// A merge no edge ever reaches. A single predecessor is legitimate (the
/// other branches may all divert through a continue) but zero means the
/// choice lost its merge entirely.
fn dangling_merge(cfg: &Cfg) -> CheckResult {
    let mut violations = Vec::new();
    for node in cfg.nodes() {
        if matches!(node.kind, CfgNodeKind::Merge) && cfg.incoming(&node.id).next().is_none() {
            violations.push(Violation::new(
                format!("merge {} has no predecessor", node.id),
                vec![node.id.clone()],
            ));
        }
    }
    CheckResult::new("dangling-merge", Priority::P3, violations)
}

// ---- shared helpers ---------------------------------------------------------

struct ChoiceBranch {
    entry: NodeId,
    region: BTreeSet<NodeId>,
    merge: Option<NodeId>,
}

/// All choices in the graph as (branch node, decider, branches in edge
/// order).
fn choices(cfg: &Cfg) -> Vec<(NodeId, String, Vec<ChoiceBranch>)> {
    let mut result = Vec::new();
    for node in cfg.nodes() {
        if let CfgNodeKind::Branch { decider } = &node.kind {
            let branches: Vec<ChoiceBranch> = cfg
                .outgoing(&node.id)
                .filter(|e| e.kind == EdgeKind::Branch)
                .map(|e| {
                    let (region, merge) = region_until_merge(cfg, &e.to);
                    ChoiceBranch {
                        entry: e.to.clone(),
                        region,
                        merge,
                    }
                })
                .collect();
            result.push((node.id.clone(), decider.clone(), branches));
        }
    }
    result
}

/// First message(s) reachable from `start` within the branch region, one
/// per path; with a viewer, only messages that role receives count. The
/// region bound keeps the search from wandering past the merge into the
/// choice's shared continuation.
fn first_messages(
    cfg: &Cfg,
    start: &NodeId,
    region: &BTreeSet<NodeId>,
    viewer: Option<&str>,
) -> Vec<MessageAction> {
    let mut found = Vec::new();
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start.clone()]);
    seen.insert(start.clone());
    while let Some(node) = queue.pop_front() {
        if !region.contains(&node) {
            continue;
        }
        if let Some(message) = cfg.node(&node).and_then(|n| n.message()) {
            let visible = match viewer {
                None => true,
                Some(role) => message.receivers.iter().any(|r| r == role),
            };
            if visible {
                found.push(message.clone());
                continue;
            }
        }
        for next in cfg.successors(&node) {
            if seen.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }
    found
}

struct Involvement {
    sends: bool,
    peer: String,
    label: String,
}

/// The first message along any path from `start` in which `role` takes
/// part, searched only within the branch region.
fn first_involvement(
    cfg: &Cfg,
    start: &NodeId,
    region: &BTreeSet<NodeId>,
    role: &str,
) -> Option<Involvement> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start.clone()]);
    seen.insert(start.clone());
    while let Some(node) = queue.pop_front() {
        if !region.contains(&node) {
            continue;
        }
        if let Some(message) = cfg.node(&node).and_then(|n| n.message()) {
            if message.sender == role {
                return Some(Involvement {
                    sends: true,
                    peer: message.receivers.first().cloned().unwrap_or_default(),
                    label: message.label.clone(),
                });
            }
            if message.receivers.iter().any(|r| r == role) {
                return Some(Involvement {
                    sends: false,
                    peer: message.sender.clone(),
                    label: message.label.clone(),
                });
            }
        }
        for next in cfg.successors(&node) {
            if seen.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build;
    use crate::parser::parse;

    fn report_of(source: &str) -> Report {
        verify(&build(&parse(source).unwrap().protocols[0]).unwrap())
    }

    #[test]
    fn test_clean_protocol_passes_everything() {
        let report = report_of(
            "global protocol RR(role C, role S) {
                 Req(Int) from C to S;
                 Resp(String) from S to C;
             }",
        );
        assert!(report.passed_strict(), "failures: {:?}", report.failures().collect::<Vec<_>>());
        assert_eq!(report.checks.len(), 20);
    }

    #[test]
    fn test_verify_is_deterministic() {
        let source = "global protocol P(role S, role C) {
             choice at S { accept() from S to C; } or { accept() from S to C; }
         }";
        let first = serde_json::to_string(&report_of(source)).unwrap();
        let second = serde_json::to_string(&report_of(source)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_branch_labels_fail_determinism() {
        // Both branches open with 'accept'.
        let report = report_of(
            "global protocol P(role S, role C) {
                 choice at S { accept() from S to C; } or { accept() from S to C; }
             }",
        );
        let check = report.check("choice-determinism").unwrap();
        assert!(!check.passed);
        assert!(check.violations[0].message.contains("accept"));
        assert!(!report.projectable());
    }

    #[test]
    fn test_distinct_branch_labels_pass_determinism() {
        let report = report_of(
            "global protocol P(role S, role C) {
                 choice at S { Yes() from S to C; } or { No() from S to C; }
             }",
        );
        assert!(report.check("choice-determinism").unwrap().passed);
    }

    #[test]
    fn test_unused_role_fails_connectedness() {
        let report = report_of(
            "global protocol P(role A, role B, role Ghost) {
                 M() from A to B;
             }",
        );
        let check = report.check("connectedness").unwrap();
        assert!(!check.passed);
        assert!(check.violations[0].message.contains("Ghost"));
    }

    #[test]
    fn test_same_sender_in_both_par_branches_flagged() {
        let report = report_of(
            "global protocol P(role A, role B, role C) {
                 par { M1() from A to B; } and { M2() from A to C; }
             }",
        );
        assert!(!report.check("parallel-deadlock").unwrap().passed);
    }

    #[test]
    fn test_race_on_same_channel_flagged() {
        let report = report_of(
            "global protocol P(role A, role B, role C) {
                 par { M() from A to B; } and { M() from A to B; }
             }",
        );
        let check = report.check("race-freedom").unwrap();
        assert!(!check.passed);
        assert!(check.violations[0].message.contains("M"));
    }

    #[test]
    fn test_disjoint_channels_pass_race_freedom() {
        let report = report_of(
            "global protocol P(role A, role B, role C, role D) {
                 par { M1() from A to B; } and { M2() from C to D; }
             }",
        );
        assert!(report.check("race-freedom").unwrap().passed);
        assert!(report.check("parallel-deadlock").unwrap().passed);
    }

    #[test]
    fn test_infinite_recursion_fails_liveness_only() {
        let report = report_of(
            "global protocol P(role A, role B) {
                 rec X { M() from A to B; continue X; }
             }",
        );
        assert!(!report.check("liveness").unwrap().passed);
        assert!(report.check("deadlock-freedom").unwrap().passed);
        // The terminal exists but nothing reaches it.
        assert!(!report.check("reachability").unwrap().passed);
    }

    #[test]
    fn test_streaming_recursion_passes() {
        let report = report_of(
            "global protocol Stream(role C, role S) {
                 rec Loop {
                     choice at C {
                         More() from C to S;
                         Data(String) from S to C;
                         continue Loop;
                     } or {
                         Done() from C to S;
                     }
                 }
             }",
        );
        assert!(report.passed(), "failures: {:?}", report.failures().collect::<Vec<_>>());
    }

    #[test]
    fn test_multicast_and_self_send_warn() {
        let report = report_of(
            "global protocol P(role A, role B, role C) {
                 Notify() from A to B, C;
                 Echo() from A to A;
             }",
        );
        assert!(!report.check("multicast").unwrap().passed);
        assert!(!report.check("self-communication").unwrap().passed);
        // Warnings only fail strict mode.
        assert!(!report.passed_strict());
    }

    #[test]
    fn test_empty_branch_warns() {
        let report = report_of(
            "global protocol P(role S, role C) {
                 choice at S { Yes() from S to C; } or { }
             }",
        );
        assert!(!report.check("empty-choice-branch").unwrap().passed);
    }

    #[test]
    fn test_never_continued_rec_warns() {
        let report = report_of(
            "global protocol P(role A, role B) {
                 rec X { M() from A to B; }
             }",
        );
        assert!(!report.check("empty-recursion").unwrap().passed);
    }

    #[test]
    fn test_partial_role_with_send_fails_mergeability() {
        // B hears about the choice only in the first branch, and there it
        // speaks first: it cannot know whether to send.
        let report = report_of(
            "global protocol P(role S, role C, role B) {
                 choice at S {
                     Go() from S to C;
                     Note() from B to C;
                 } or {
                     Stop() from S to C;
                 }
             }",
        );
        assert!(!report.check("choice-mergeability").unwrap().passed);
    }

    #[test]
    fn test_receiving_role_passes_mergeability() {
        let report = report_of(
            "global protocol P(role S, role C) {
                 choice at S { Yes() from S to C; } or { No() from S to C; }
             }",
        );
        assert!(report.check("choice-mergeability").unwrap().passed);
    }
}
