// export/local_text.rs - CFSM to Local Scribble Text

use crate::project::{Cfsm, CfsmAction, StateId, Transition};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Pretty-print a CFSM as a grammar-faithful local Scribble protocol:
///
/// ```text
/// local protocol Purchase_B at B(role B, role S, role CA) {
///     Order(String) to S;
///     Invoice(Int) from S;
/// }
/// ```
///
/// Cycles are rebuilt as `rec`/`continue` blocks; states where several
/// transitions leave become `choice at R` blocks, with the decider taken
/// from choice actions, from the common sending peer, or from the machine's
/// own role when it is the one picking.
pub fn cfsm_to_local_scribble(cfsm: &Cfsm) -> String {
    let writer = Writer {
        cfsm,
        headers: assign_loop_labels(cfsm),
    };

    let mut out = String::new();
    let roles = cfsm
        .roles
        .iter()
        .map(|r| format!("role {}", r))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!(
        "local protocol {}_{} at {}({}) {{\n",
        cfsm.protocol, cfsm.role, cfsm.role, roles
    ));
    writer.write_state(
        &cfsm.initial,
        None,
        &mut out,
        1,
        &mut Vec::new(),
        &mut Vec::new(),
    );
    out.push_str("}\n");
    out
}

/// DFS back-edge targets, labelled `Loop1, Loop2, ...` in discovery order.
fn assign_loop_labels(cfsm: &Cfsm) -> BTreeMap<StateId, String> {
    fn visit(
        cfsm: &Cfsm,
        state: &StateId,
        on_stack: &mut BTreeSet<StateId>,
        done: &mut BTreeSet<StateId>,
        headers: &mut Vec<StateId>,
    ) {
        on_stack.insert(state.clone());
        for transition in cfsm.transitions_from(state) {
            if on_stack.contains(&transition.to) {
                if !headers.contains(&transition.to) {
                    headers.push(transition.to.clone());
                }
            } else if !done.contains(&transition.to) {
                visit(cfsm, &transition.to, on_stack, done, headers);
            }
        }
        on_stack.remove(state);
        done.insert(state.clone());
    }

    let mut headers = Vec::new();
    visit(
        cfsm,
        &cfsm.initial,
        &mut BTreeSet::new(),
        &mut BTreeSet::new(),
        &mut headers,
    );
    headers
        .into_iter()
        .enumerate()
        .map(|(i, state)| (state, format!("Loop{}", i + 1)))
        .collect()
}

struct Writer<'a> {
    cfsm: &'a Cfsm,
    headers: BTreeMap<StateId, String>,
}

impl Writer<'_> {
    fn write_state(
        &self,
        state: &StateId,
        stop: Option<&StateId>,
        out: &mut String,
        indent: usize,
        open_loops: &mut Vec<StateId>,
        path: &mut Vec<StateId>,
    ) {
        if stop == Some(state) {
            return;
        }
        if let Some(label) = self.headers.get(state) {
            if open_loops.contains(state) {
                push_line(out, indent, &format!("continue {};", label));
                return;
            }
            push_line(out, indent, &format!("rec {} {{", label));
            open_loops.push(state.clone());
            self.write_transitions(state, stop, out, indent + 1, open_loops, path);
            open_loops.pop();
            push_line(out, indent, "}");
            return;
        }
        if path.contains(state) {
            // Unlabelled cycle: cannot happen for projector output.
            push_line(out, indent, &format!("// cycle back to {}", state));
            return;
        }
        self.write_transitions(state, stop, out, indent, open_loops, path);
    }

    fn write_transitions(
        &self,
        state: &StateId,
        stop: Option<&StateId>,
        out: &mut String,
        indent: usize,
        open_loops: &mut Vec<StateId>,
        path: &mut Vec<StateId>,
    ) {
        let transitions: Vec<&Transition> = self.cfsm.transitions_from(state).collect();
        match transitions.len() {
            0 => {}
            1 => {
                let transition = transitions[0];
                self.write_action(&transition.action, out, indent);
                path.push(state.clone());
                self.write_state(&transition.to, stop, out, indent, open_loops, path);
                path.pop();
            }
            _ => {
                let decider = self.decider_of(&transitions);
                let targets: Vec<StateId> =
                    transitions.iter().map(|t| t.to.clone()).collect();
                let join = common_continuation(self.cfsm, &targets);

                for (index, transition) in transitions.iter().enumerate() {
                    if index == 0 {
                        push_line(out, indent, &format!("choice at {} {{", decider));
                    } else {
                        push_line(out, indent, "} or {");
                    }
                    self.write_action(&transition.action, out, indent + 1);
                    path.push(state.clone());
                    self.write_state(
                        &transition.to,
                        join.as_ref().or(stop),
                        out,
                        indent + 1,
                        open_loops,
                        path,
                    );
                    path.pop();
                }
                push_line(out, indent, "}");

                if let Some(join) = join {
                    path.push(state.clone());
                    self.write_state(&join, stop, out, indent, open_loops, path);
                    path.pop();
                }
            }
        }
    }

    fn write_action(&self, action: &CfsmAction, out: &mut String, indent: usize) {
        match action {
            CfsmAction::Send { to, label, payload } => {
                push_line(
                    out,
                    indent,
                    &format!("{}({}) to {};", label, payload.join(", "), to),
                );
            }
            CfsmAction::Receive {
                from,
                label,
                payload,
            } => {
                push_line(
                    out,
                    indent,
                    &format!("{}({}) from {};", label, payload.join(", "), from),
                );
            }
            CfsmAction::SubProtocolCall {
                protocol,
                arguments,
                ..
            } => {
                push_line(
                    out,
                    indent,
                    &format!("do {}({});", protocol, arguments.join(", ")),
                );
            }
            // Silent actions leave no text.
            CfsmAction::Tau | CfsmAction::Choice { .. } => {}
        }
    }

    fn decider_of(&self, transitions: &[&Transition]) -> String {
        if let Some(decider) = transitions.iter().find_map(|t| match &t.action {
            CfsmAction::Choice { decider } => Some(decider.clone()),
            _ => None,
        }) {
            return decider;
        }
        let peers: BTreeSet<&String> = transitions
            .iter()
            .filter_map(|t| match &t.action {
                CfsmAction::Receive { from, .. } => Some(from),
                _ => None,
            })
            .collect();
        if peers.len() == 1 && transitions.iter().all(|t| {
            matches!(t.action, CfsmAction::Receive { .. })
        }) {
            return (*peers.iter().next().expect("single peer")).clone();
        }
        self.cfsm.role.clone()
    }
}

fn push_line(out: &mut String, indent: usize, line: &str) {
    for _ in 0..indent {
        out.push_str("    ");
    }
    out.push_str(line);
    out.push('\n');
}

fn reachable(cfsm: &Cfsm, from: &StateId) -> BTreeSet<StateId> {
    let mut seen = BTreeSet::from([from.clone()]);
    let mut queue = VecDeque::from([from.clone()]);
    while let Some(state) = queue.pop_front() {
        for transition in cfsm.transitions_from(&state) {
            if seen.insert(transition.to.clone()) {
                queue.push_back(transition.to.clone());
            }
        }
    }
    seen
}

/// The state where all branches reconverge: reachable from every branch
/// target, not itself a branch target, closest first in BFS order.
fn common_continuation(cfsm: &Cfsm, targets: &[StateId]) -> Option<StateId> {
    // Confluence merging can leave every branch pointing at one state; that
    // state is the continuation itself.
    if targets.windows(2).all(|w| w[0] == w[1]) {
        return targets.first().cloned();
    }
    let sets: Vec<BTreeSet<StateId>> = targets.iter().map(|t| reachable(cfsm, t)).collect();
    let candidates: BTreeSet<&StateId> = sets[0]
        .iter()
        .filter(|s| sets.iter().all(|set| set.contains(*s)) && !targets.contains(*s))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let mut seen = BTreeSet::from([targets[0].clone()]);
    let mut queue = VecDeque::from([targets[0].clone()]);
    while let Some(state) = queue.pop_front() {
        if candidates.contains(&state) {
            return Some(state);
        }
        for transition in cfsm.transitions_from(&state) {
            if seen.insert(transition.to.clone()) {
                queue.push_back(transition.to.clone());
            }
        }
    }
    None
}
