// project/projector.rs - Endpoint Projection

use super::cfsm::{Cfsm, CfsmAction, StateId, Transition};
use crate::cfg::{Cfg, CfgAction, CfgNodeKind, EdgeKind, NodeId};
use crate::registry::ProtocolRegistry;
use crate::verify::{region_until_join, verify};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Errors on the projection boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// The CFG fails a check projection depends on
    #[error("projection of {protocol} is undefined: {reason}")]
    Undefined { protocol: String, reason: String },

    #[error("role {role} is not declared by protocol {protocol}")]
    UnknownRole { protocol: String, role: String },

    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
}

/// Project one role's view of a CFG.
///
/// `do` actions keep a positional role list; use [`Projector`] with a
/// registry to resolve formal → actual mappings at the call sites.
pub fn project(cfg: &Cfg, role: &str) -> Result<Cfsm, ProjectionError> {
    Projector::new(cfg).project(role)
}

/// Project every declared role.
pub fn project_all(cfg: &Cfg) -> Result<BTreeMap<String, Cfsm>, ProjectionError> {
    let projector = Projector::new(cfg);
    cfg.roles
        .iter()
        .map(|role| Ok((role.clone(), projector.project(role)?)))
        .collect()
}

/// Endpoint projector for one CFG, following the standard projection
/// rules: senders get sends, receivers get receives, bystanders get tau;
/// the decider's choice becomes an internal choice, observers distinguish
/// branches by their first receive; a parallel becomes the interleaving
/// product of the branch views; recursion survives as graph cycles.
/// Tau-reachable states are collapsed afterwards so the machine stays
/// minimal without changing its observable actions.
pub struct Projector<'a> {
    cfg: &'a Cfg,
    registry: Option<&'a ProtocolRegistry>,
}

impl<'a> Projector<'a> {
    pub fn new(cfg: &'a Cfg) -> Self {
        Self {
            cfg,
            registry: None,
        }
    }

    /// Resolve role mappings at `do` sites against a registry.
    pub fn with_registry(mut self, registry: &'a ProtocolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn project(&self, role: &str) -> Result<Cfsm, ProjectionError> {
        if !self.cfg.roles.iter().any(|r| r == role) {
            return Err(ProjectionError::UnknownRole {
                protocol: self.cfg.protocol.clone(),
                role: role.to_string(),
            });
        }

        let report = verify(self.cfg);
        if !report.projectable() {
            let reason: Vec<&str> = report
                .checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.name)
                .collect();
            return Err(ProjectionError::Undefined {
                protocol: self.cfg.protocol.clone(),
                reason: reason.join(", "),
            });
        }

        let mut lts = self.region_lts(role, &self.cfg.initial, None)?;
        lts.eliminate_tau();
        lts.prune_unreachable();
        lts.merge_confluent();
        let cfsm = lts.into_cfsm(self.cfg, role);

        debug!(
            protocol = %self.cfg.protocol,
            role,
            states = cfsm.states.len(),
            transitions = cfsm.transitions.len(),
            "projected CFSM"
        );
        Ok(cfsm)
    }

    /// Build the raw LTS of the region from `entry` up to (exclusive of)
    /// `boundary`. Fork regions are replaced by the interleaving product of
    /// their branch LTSs.
    fn region_lts(
        &self,
        role: &str,
        entry: &NodeId,
        boundary: Option<&NodeId>,
    ) -> Result<Lts, ProjectionError> {
        let mut lts = Lts::new(entry.as_str());
        let mut queue = VecDeque::from([entry.clone()]);
        let mut seen = BTreeSet::from([entry.clone()]);

        while let Some(node_id) = queue.pop_front() {
            if Some(&node_id) == boundary {
                lts.finals.insert(node_id.as_str().to_string());
                continue;
            }
            let Some(node) = self.cfg.node(&node_id) else {
                continue;
            };

            match &node.kind {
                CfgNodeKind::Terminal => {
                    lts.finals.insert(node_id.as_str().to_string());
                }

                CfgNodeKind::Fork { .. } => {
                    let branch_entries: Vec<NodeId> = self
                        .cfg
                        .outgoing(&node_id)
                        .filter(|e| e.kind == EdgeKind::Fork)
                        .map(|e| e.to.clone())
                        .collect();
                    let join = branch_entries
                        .first()
                        .and_then(|b| region_until_join(self.cfg, b).1)
                        .ok_or_else(|| ProjectionError::Undefined {
                            protocol: self.cfg.protocol.clone(),
                            reason: format!("fork {} has no matching join", node_id),
                        })?;

                    let mut branch_ltss = Vec::new();
                    for branch in &branch_entries {
                        branch_ltss.push(self.region_lts(role, branch, Some(&join))?);
                    }
                    let product = interleaving_product(&branch_ltss, node_id.as_str());

                    lts.add(
                        node_id.as_str(),
                        CfsmAction::Tau,
                        &product.initial.clone(),
                    );
                    for final_state in &product.finals {
                        lts.add(final_state, CfsmAction::Tau, join.as_str());
                    }
                    lts.absorb(product);

                    if seen.insert(join.clone()) {
                        queue.push_back(join);
                    }
                }

                _ => {
                    for edge in self.cfg.outgoing(&node_id) {
                        self.add_node_transitions(&mut lts, role, node, &edge.to)?;
                        if seen.insert(edge.to.clone()) {
                            queue.push_back(edge.to.clone());
                        }
                    }
                }
            }
        }

        Ok(lts)
    }

    /// Transitions for leaving `node` towards `target`, from `role`'s point
    /// of view. A multicast send becomes a chain of sends in declared
    /// receiver order.
    fn add_node_transitions(
        &self,
        lts: &mut Lts,
        role: &str,
        node: &crate::cfg::CfgNode,
        target: &NodeId,
    ) -> Result<(), ProjectionError> {
        let from = node.id.as_str();
        let to = target.as_str();

        match &node.kind {
            CfgNodeKind::Action {
                action: CfgAction::Message(m),
            } => {
                if m.sender == role {
                    let mut current = from.to_string();
                    for (index, receiver) in m.receivers.iter().enumerate() {
                        let next = if index + 1 == m.receivers.len() {
                            to.to_string()
                        } else {
                            format!("{}+mc{}", from, index)
                        };
                        lts.add(
                            &current,
                            CfsmAction::Send {
                                to: receiver.clone(),
                                label: m.label.clone(),
                                payload: m.payload.clone(),
                            },
                            &next,
                        );
                        current = next;
                    }
                } else if m.receivers.iter().any(|r| r == role) {
                    lts.add(
                        from,
                        CfsmAction::Receive {
                            from: m.sender.clone(),
                            label: m.label.clone(),
                            payload: m.payload.clone(),
                        },
                        to,
                    );
                } else {
                    lts.add(from, CfsmAction::Tau, to);
                }
            }

            CfgNodeKind::Action {
                action: CfgAction::SubProtocolCall(call),
            } => {
                if call.arguments.iter().any(|a| a == role) {
                    let role_mapping = match self.registry {
                        Some(registry) => registry.role_mapping(&call.target, &call.arguments)?,
                        None => BTreeMap::new(),
                    };
                    lts.add(
                        from,
                        CfsmAction::SubProtocolCall {
                            protocol: call.target.clone(),
                            arguments: call.arguments.clone(),
                            role_mapping,
                            // Patched to the transition target after
                            // renaming; see Lts::into_cfsm.
                            return_state: StateId(to.to_string()),
                        },
                        to,
                    );
                } else {
                    lts.add(from, CfsmAction::Tau, to);
                }
            }

            CfgNodeKind::Branch { decider } => {
                let action = if decider == role {
                    CfsmAction::Choice {
                        decider: decider.clone(),
                    }
                } else {
                    CfsmAction::Tau
                };
                lts.add(from, action, to);
            }

            // Initial, merge, join, recursive: silent control points.
            _ => {
                lts.add(from, CfsmAction::Tau, to);
            }
        }
        Ok(())
    }
}

// ---- the working LTS --------------------------------------------------------

/// Intermediate labelled transition system over string state names.
struct Lts {
    initial: String,
    finals: BTreeSet<String>,
    transitions: Vec<(String, CfsmAction, String)>,
}

impl Lts {
    fn new(initial: &str) -> Self {
        Self {
            initial: initial.to_string(),
            finals: BTreeSet::new(),
            transitions: Vec::new(),
        }
    }

    fn add(&mut self, from: &str, action: CfsmAction, to: &str) {
        let entry = (from.to_string(), action, to.to_string());
        if !self.transitions.contains(&entry) {
            self.transitions.push(entry);
        }
    }

    fn absorb(&mut self, other: Lts) {
        for (from, action, to) in other.transitions {
            let entry = (from, action, to);
            if !self.transitions.contains(&entry) {
                self.transitions.push(entry);
            }
        }
    }

    fn states(&self) -> BTreeSet<String> {
        let mut states = BTreeSet::new();
        states.insert(self.initial.clone());
        for (from, _, to) in &self.transitions {
            states.insert(from.clone());
            states.insert(to.clone());
        }
        states.extend(self.finals.iter().cloned());
        states
    }

    fn tau_closure(&self, start: &str) -> BTreeSet<String> {
        let mut closure = BTreeSet::from([start.to_string()]);
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(state) = queue.pop_front() {
            for (from, action, to) in &self.transitions {
                if from == &state
                    && matches!(action, CfsmAction::Tau)
                    && closure.insert(to.clone())
                {
                    queue.push_back(to.clone());
                }
            }
        }
        closure
    }

    /// Classic epsilon elimination: each state inherits the non-tau
    /// transitions and the finality of its tau-closure, then tau edges are
    /// dropped. The observable action set of every surviving state is
    /// unchanged.
    fn eliminate_tau(&mut self) {
        let states = self.states();
        let mut new_transitions = Vec::new();
        let mut new_finals = BTreeSet::new();

        for state in &states {
            let closure = self.tau_closure(state);
            if closure.iter().any(|s| self.finals.contains(s)) {
                new_finals.insert(state.clone());
            }
            for (from, action, to) in &self.transitions {
                if closure.contains(from) && !matches!(action, CfsmAction::Tau) {
                    let entry = (state.clone(), action.clone(), to.clone());
                    if !new_transitions.contains(&entry) {
                        new_transitions.push(entry);
                    }
                }
            }
        }

        self.transitions = new_transitions;
        self.finals = new_finals;
    }

    fn prune_unreachable(&mut self) {
        let mut reachable = BTreeSet::from([self.initial.clone()]);
        let mut queue = VecDeque::from([self.initial.clone()]);
        while let Some(state) = queue.pop_front() {
            for (from, _, to) in &self.transitions {
                if from == &state && reachable.insert(to.clone()) {
                    queue.push_back(to.clone());
                }
            }
        }
        self.transitions
            .retain(|(from, _, _)| reachable.contains(from));
        self.finals.retain(|s| reachable.contains(s));
    }

    /// Merge states with identical outgoing behaviour and finality until a
    /// fixpoint. This folds the tails of interleaving diamonds and maps
    /// unrolled recursion entries back onto a single state.
    fn merge_confluent(&mut self) {
        loop {
            let mut signatures: BTreeMap<(bool, Vec<(CfsmAction, String)>), Vec<String>> =
                BTreeMap::new();
            for state in self.states() {
                let mut outgoing: Vec<(CfsmAction, String)> = self
                    .transitions
                    .iter()
                    .filter(|(from, _, _)| from == &state)
                    .map(|(_, action, to)| (action.clone(), to.clone()))
                    .collect();
                outgoing.sort();
                outgoing.dedup();
                signatures
                    .entry((self.finals.contains(&state), outgoing))
                    .or_default()
                    .push(state);
            }

            let mut rename: BTreeMap<String, String> = BTreeMap::new();
            for group in signatures.values() {
                if group.len() > 1 {
                    let representative = group.iter().min().expect("non-empty group").clone();
                    for state in group {
                        if state != &representative {
                            rename.insert(state.clone(), representative.clone());
                        }
                    }
                }
            }
            if rename.is_empty() {
                return;
            }

            let map = |s: &String| rename.get(s).unwrap_or(s).clone();
            self.initial = map(&self.initial);
            self.finals = self.finals.iter().map(map).collect();
            let mut merged = Vec::new();
            for (from, action, to) in &self.transitions {
                let entry = (map(from), action.clone(), map(to));
                if !merged.contains(&entry) {
                    merged.push(entry);
                }
            }
            self.transitions = merged;
        }
    }

    /// Deterministic renaming to `s0, s1, ...` in BFS order from the
    /// initial state, successors visited in sorted action order.
    fn into_cfsm(self, cfg: &Cfg, role: &str) -> Cfsm {
        let mut names: BTreeMap<String, StateId> = BTreeMap::new();
        let mut order = 0u32;
        let mut name = |state: &String, names: &mut BTreeMap<String, StateId>, order: &mut u32| {
            if !names.contains_key(state) {
                names.insert(state.clone(), StateId(format!("s{}", order)));
                *order += 1;
            }
        };

        name(&self.initial, &mut names, &mut order);
        let mut queue = VecDeque::from([self.initial.clone()]);
        let mut visited = BTreeSet::from([self.initial.clone()]);
        while let Some(state) = queue.pop_front() {
            let mut outgoing: Vec<&(String, CfsmAction, String)> = self
                .transitions
                .iter()
                .filter(|(from, _, _)| from == &state)
                .collect();
            outgoing.sort_by(|a, b| (&a.1, &a.2).cmp(&(&b.1, &b.2)));
            for (_, _, to) in outgoing {
                name(to, &mut names, &mut order);
                if visited.insert(to.clone()) {
                    queue.push_back(to.clone());
                }
            }
        }

        let mut cfsm = Cfsm::new(
            cfg.protocol.clone(),
            role,
            cfg.roles.clone(),
            names[&self.initial].clone(),
        );
        for state in self.finals {
            if let Some(renamed) = names.get(&state) {
                cfsm.mark_terminal(renamed.clone());
            }
        }

        let mut transitions: Vec<Transition> = self
            .transitions
            .iter()
            .map(|(from, action, to)| {
                let to_state = names[to].clone();
                let action = match action {
                    CfsmAction::SubProtocolCall {
                        protocol,
                        arguments,
                        role_mapping,
                        ..
                    } => CfsmAction::SubProtocolCall {
                        protocol: protocol.clone(),
                        arguments: arguments.clone(),
                        role_mapping: role_mapping.clone(),
                        return_state: to_state.clone(),
                    },
                    other => other.clone(),
                };
                Transition {
                    from: names[from].clone(),
                    action,
                    to: to_state,
                }
            })
            .collect();
        transitions.sort_by(|a, b| (&a.from, &a.action, &a.to).cmp(&(&b.from, &b.action, &b.to)));
        for transition in transitions {
            cfsm.add_transition(transition.from, transition.action, transition.to);
        }
        cfsm
    }
}

/// The asynchronous interleaving product of branch LTSs: states are tuples
/// of component states, each transition advances exactly one component,
/// and a tuple is final when every component is.
fn interleaving_product(branches: &[Lts], tag: &str) -> Lts {
    let tuple_id = |parts: &[String]| format!("{}({})", tag, parts.join("|"));

    let initial: Vec<String> = branches.iter().map(|b| b.initial.clone()).collect();
    let mut product = Lts::new(&tuple_id(&initial));

    let mut queue = VecDeque::from([initial.clone()]);
    let mut seen = BTreeSet::from([initial]);
    while let Some(tuple) = queue.pop_front() {
        let id = tuple_id(&tuple);
        if tuple
            .iter()
            .zip(branches)
            .all(|(state, branch)| branch.finals.contains(state))
        {
            product.finals.insert(id.clone());
        }
        for (index, branch) in branches.iter().enumerate() {
            for (from, action, to) in &branch.transitions {
                if from == &tuple[index] {
                    let mut next = tuple.clone();
                    next[index] = to.clone();
                    product.add(&id, action.clone(), &tuple_id(&next));
                    if seen.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
        }
    }
    product
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build;
    use crate::parser::parse;

    fn cfg_of(source: &str) -> Cfg {
        build(&parse(source).unwrap().protocols[0]).unwrap()
    }

    fn actions_from<'a>(cfsm: &'a Cfsm, state: &'a StateId) -> Vec<String> {
        cfsm.transitions_from(state)
            .map(|t| t.action.to_string())
            .collect()
    }

    #[test]
    fn test_request_response_projections() {
        // Request/response, both endpoints.
        let cfg = cfg_of(
            "global protocol RR(role C, role S) {
                 Req(Int) from C to S;
                 Resp(String) from S to C;
             }",
        );

        let client = project(&cfg, "C").unwrap();
        assert_eq!(client.initial, "s0".into());
        assert_eq!(actions_from(&client, &"s0".into()), vec!["!S Req"]);
        assert_eq!(actions_from(&client, &"s1".into()), vec!["?S Resp"]);
        assert!(client.is_terminal(&"s2".into()));
        assert_eq!(client.states.len(), 3);

        let server = project(&cfg, "S").unwrap();
        assert_eq!(actions_from(&server, &"s0".into()), vec!["?C Req"]);
        assert_eq!(actions_from(&server, &"s1".into()), vec!["!C Resp"]);
        assert!(server.is_terminal(&"s2".into()));
    }

    #[test]
    fn test_tau_elimination_collapses_unobserved_middle() {
        // B does not see the credit check.
        let cfg = cfg_of(
            "global protocol Purchase(role B, role S, role CA) {
                 Order(String) from B to S;
                 CheckCredit(Int) from S to CA;
                 Approved() from CA to S;
                 Invoice(Int) from S to B;
             }",
        );

        let buyer = project(&cfg, "B").unwrap();
        assert_eq!(buyer.states.len(), 3);
        assert_eq!(actions_from(&buyer, &"s0".into()), vec!["!S Order"]);
        assert_eq!(actions_from(&buyer, &"s1".into()), vec!["?S Invoice"]);
        assert!(buyer.transitions.iter().all(|t| t.action != CfsmAction::Tau));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let cfg = cfg_of("global protocol P(role A, role B) { M() from A to B; }");
        assert!(matches!(
            project(&cfg, "Z"),
            Err(ProjectionError::UnknownRole { .. })
        ));
    }

    #[test]
    fn test_undefined_on_nondeterministic_choice() {
        let cfg = cfg_of(
            "global protocol P(role S, role C) {
                 choice at S { accept() from S to C; } or { accept() from S to C; }
             }",
        );
        let err = project(&cfg, "C").unwrap_err();
        match err {
            ProjectionError::Undefined { reason, .. } => {
                assert!(reason.contains("choice-determinism"));
            }
            other => panic!("Expected Undefined, got {:?}", other),
        }
    }

    #[test]
    fn test_choice_projects_internal_and_external() {
        let cfg = cfg_of(
            "global protocol P(role S, role C) {
                 choice at S { Yes() from S to C; } or { No() from S to C; }
             }",
        );

        // The decider sees an internal choice, one transition per branch.
        let decider = project(&cfg, "S").unwrap();
        let choices: Vec<_> = decider
            .transitions_from(&decider.initial)
            .filter(|t| matches!(t.action, CfsmAction::Choice { .. }))
            .collect();
        assert_eq!(choices.len(), 2);

        // The observer sees an external choice: two receives side by side.
        let observer = project(&cfg, "C").unwrap();
        let mut labels = actions_from(&observer, &observer.initial.clone());
        labels.sort();
        assert_eq!(labels, vec!["?S No", "?S Yes"]);
    }

    #[test]
    fn test_parallel_diamond_for_shared_sender() {
        // A sends in both branches, so its local view is
        // the interleaving diamond with both orders.
        let cfg = cfg_of(
            "global protocol P(role A, role B, role C) {
                 par { M1() from A to B; } and { M2() from A to C; }
             }",
        );
        let a = project(&cfg, "A").unwrap();

        let first: Vec<String> = actions_from(&a, &a.initial.clone());
        assert_eq!(first.len(), 2, "both orders must be offered: {:?}", first);
        assert!(first.contains(&"!B M1".to_string()));
        assert!(first.contains(&"!C M2".to_string()));

        // Either order reaches the terminal in two communication steps.
        for transition in a.transitions_from(&a.initial.clone()) {
            let mid = &transition.to;
            let rest: Vec<String> = actions_from(&a, mid);
            assert_eq!(rest.len(), 1);
            let end = &a.transitions_from(mid).next().unwrap().to;
            assert!(a.is_terminal(end));
        }
    }

    #[test]
    fn test_parallel_single_branch_role_is_sequential() {
        let cfg = cfg_of(
            "global protocol P(role A, role B, role C) {
                 par { M1() from B to A; } and { M2() from C to A; }
             }",
        );
        let b = project(&cfg, "B").unwrap();
        // B only appears in the first branch: a single send, then done.
        assert_eq!(b.states.len(), 2);
        assert_eq!(actions_from(&b, &b.initial.clone()), vec!["!A M1"]);
    }

    #[test]
    fn test_recursion_becomes_cycle() {
        // The streaming loop from C's side.
        let cfg = cfg_of(
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

        let c = project(&cfg, "C").unwrap();
        // Initial state offers the internal choice.
        let branches: Vec<_> = c.transitions_from(&c.initial).collect();
        assert_eq!(branches.len(), 2);

        // Following More leads back to the initial state.
        let more_target = c
            .transitions
            .iter()
            .find(|t| t.action.to_string() == "!S More")
            .map(|t| t.to.clone())
            .unwrap();
        let back = c
            .transitions_from(&more_target)
            .next()
            .expect("receive after More");
        assert_eq!(back.action.to_string(), "?S Data");
        assert_eq!(back.to, c.initial);

        // Following Done reaches the terminal.
        let done_target = c
            .transitions
            .iter()
            .find(|t| t.action.to_string() == "!S Done")
            .map(|t| t.to.clone())
            .unwrap();
        assert!(c.is_terminal(&done_target));
    }

    #[test]
    fn test_multicast_sender_chains_sends() {
        let cfg = cfg_of(
            "global protocol P(role A, role B, role C) {
                 Notify(Int) from A to B, C;
             }",
        );
        let a = project(&cfg, "A").unwrap();
        assert_eq!(actions_from(&a, &a.initial.clone()), vec!["!B Notify"]);
        let mid = a.transitions_from(&a.initial).next().unwrap().to.clone();
        assert_eq!(actions_from(&a, &mid), vec!["!C Notify"]);

        let c = project(&cfg, "C").unwrap();
        assert_eq!(actions_from(&c, &c.initial.clone()), vec!["?A Notify"]);
    }

    #[test]
    fn test_do_site_keeps_mapping_with_registry() {
        let module = parse(
            "global protocol Outer(role A, role B) {
                 Start() from A to B;
                 do Inner(A, B);
             }
             global protocol Inner(role P, role Q) {
                 Ping() from P to Q;
             }",
        )
        .unwrap();
        let registry = ProtocolRegistry::from_module(&module).unwrap();
        let cfg = registry.cfg("Outer").unwrap();

        let a = Projector::new(&cfg)
            .with_registry(&registry)
            .project("A")
            .unwrap();
        let call = a
            .transitions
            .iter()
            .find_map(|t| match &t.action {
                CfsmAction::SubProtocolCall {
                    protocol,
                    role_mapping,
                    return_state,
                    ..
                } => Some((protocol.clone(), role_mapping.clone(), return_state.clone(), t.to.clone())),
                _ => None,
            })
            .expect("sub-protocol call transition");
        assert_eq!(call.0, "Inner");
        assert_eq!(call.1["P"], "A");
        assert_eq!(call.1["Q"], "B");
        assert_eq!(call.2, call.3);
    }

    #[test]
    fn test_project_all_covers_roles() {
        let cfg = cfg_of(
            "global protocol RR(role C, role S) {
                 Req(Int) from C to S;
                 Resp(String) from S to C;
             }",
        );
        let all = project_all(&cfg).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("C") && all.contains_key("S"));
    }

    #[test]
    fn test_actions_only_involve_projected_role() {
        // Every transition is a send, receive, choice or call that
        // involves the projected role, or nothing at all after merging.
        let cfg = cfg_of(
            "global protocol P(role B, role S, role CA) {
                 Order(String) from B to S;
                 CheckCredit(Int) from S to CA;
                 Approved() from CA to S;
                 Invoice(Int) from S to B;
             }",
        );
        for role in ["B", "S", "CA"] {
            let cfsm = project(&cfg, role).unwrap();
            for transition in &cfsm.transitions {
                match &transition.action {
                    CfsmAction::Send { .. } | CfsmAction::Receive { .. } => {}
                    CfsmAction::Tau => panic!("tau survived merging"),
                    other => panic!("unexpected action {:?}", other),
                }
            }
        }
    }
}
