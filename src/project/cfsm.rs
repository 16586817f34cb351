// project/cfsm.rs - Communicating Finite State Machines

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stable identity of a CFSM state. States are pure control locations;
/// behaviour lives on transitions only.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct StateId(pub(crate) String);

impl StateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        StateId(s.to_string())
    }
}

/// The action labelling a transition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CfsmAction {
    /// Asynchronous send; never blocks
    Send {
        to: String,
        label: String,
        payload: Vec<String>,
    },

    /// Receive; enabled only when the head of the sender's queue matches
    Receive {
        from: String,
        label: String,
        payload: Vec<String>,
    },

    /// Silent internal step
    Tau,

    /// Internal choice of the deciding role; one transition per branch
    Choice { decider: String },

    /// Enter a sub-protocol's projection for this role
    SubProtocolCall {
        protocol: String,
        arguments: Vec<String>,
        role_mapping: BTreeMap<String, String>,
        return_state: StateId,
    },
}

impl CfsmAction {
    pub fn is_communication(&self) -> bool {
        matches!(self, CfsmAction::Send { .. } | CfsmAction::Receive { .. })
    }
}

impl fmt::Display for CfsmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfsmAction::Send { to, label, .. } => write!(f, "!{} {}", to, label),
            CfsmAction::Receive { from, label, .. } => write!(f, "?{} {}", from, label),
            CfsmAction::Tau => write!(f, "tau"),
            CfsmAction::Choice { decider } => write!(f, "choice@{}", decider),
            CfsmAction::SubProtocolCall { protocol, .. } => write!(f, "do {}", protocol),
        }
    }
}

/// A labelled transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StateId,
    pub action: CfsmAction,
    pub to: StateId,
}

/// One role's local view of a global protocol: `(Q, q0, A, ->, Q_f)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cfsm {
    /// Protocol this machine was projected from
    pub protocol: String,

    /// The role whose view this is
    pub role: String,

    /// All declared roles of the protocol
    pub roles: Vec<String>,

    pub states: Vec<StateId>,
    pub initial: StateId,
    pub terminals: BTreeSet<StateId>,
    pub transitions: Vec<Transition>,
}

impl Cfsm {
    pub fn new(
        protocol: impl Into<String>,
        role: impl Into<String>,
        roles: Vec<String>,
        initial: StateId,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            role: role.into(),
            roles,
            states: vec![initial.clone()],
            initial,
            terminals: BTreeSet::new(),
            transitions: Vec::new(),
        }
    }

    pub fn add_state(&mut self, state: StateId) {
        if !self.states.contains(&state) {
            self.states.push(state);
        }
    }

    pub fn mark_terminal(&mut self, state: StateId) {
        self.add_state(state.clone());
        self.terminals.insert(state);
    }

    pub fn add_transition(&mut self, from: StateId, action: CfsmAction, to: StateId) {
        self.add_state(from.clone());
        self.add_state(to.clone());
        self.transitions.push(Transition { from, action, to });
    }

    pub fn transitions_from<'a>(
        &'a self,
        state: &'a StateId,
    ) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| &t.from == state)
    }

    pub fn is_terminal(&self, state: &StateId) -> bool {
        self.terminals.contains(state)
    }

    /// Peers this machine communicates with.
    pub fn peers(&self) -> BTreeSet<String> {
        let mut peers = BTreeSet::new();
        for transition in &self.transitions {
            match &transition.action {
                CfsmAction::Send { to, .. } => {
                    peers.insert(to.clone());
                }
                CfsmAction::Receive { from, .. } => {
                    peers.insert(from.clone());
                }
                _ => {}
            }
        }
        peers
    }

    /// Substitute role names throughout: the machine's own role, the role
    /// list, and every action. Used when entering a sub-protocol through a
    /// formal → actual mapping.
    pub fn rename_roles(&self, mapping: &BTreeMap<String, String>) -> Cfsm {
        let rename = |name: &str| -> String {
            mapping
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string())
        };

        let transitions = self
            .transitions
            .iter()
            .map(|t| Transition {
                from: t.from.clone(),
                to: t.to.clone(),
                action: match &t.action {
                    CfsmAction::Send { to, label, payload } => CfsmAction::Send {
                        to: rename(to),
                        label: label.clone(),
                        payload: payload.clone(),
                    },
                    CfsmAction::Receive {
                        from,
                        label,
                        payload,
                    } => CfsmAction::Receive {
                        from: rename(from),
                        label: label.clone(),
                        payload: payload.clone(),
                    },
                    CfsmAction::Tau => CfsmAction::Tau,
                    CfsmAction::Choice { decider } => CfsmAction::Choice {
                        decider: rename(decider),
                    },
                    CfsmAction::SubProtocolCall {
                        protocol,
                        arguments,
                        role_mapping,
                        return_state,
                    } => CfsmAction::SubProtocolCall {
                        protocol: protocol.clone(),
                        arguments: arguments.iter().map(|a| rename(a)).collect(),
                        role_mapping: role_mapping
                            .iter()
                            .map(|(formal, actual)| (formal.clone(), rename(actual)))
                            .collect(),
                        return_state: return_state.clone(),
                    },
                },
            })
            .collect();

        Cfsm {
            protocol: self.protocol.clone(),
            role: rename(&self.role),
            roles: self.roles.iter().map(|r| rename(r)).collect(),
            states: self.states.clone(),
            initial: self.initial.clone(),
            terminals: self.terminals.clone(),
            transitions,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("CFSM serialisation cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(to: &str, label: &str) -> CfsmAction {
        CfsmAction::Send {
            to: to.into(),
            label: label.into(),
            payload: vec![],
        }
    }

    #[test]
    fn test_states_registered_on_use() {
        let mut cfsm = Cfsm::new("P", "A", vec!["A".into(), "B".into()], "s0".into());
        cfsm.add_transition("s0".into(), send("B", "M"), "s1".into());
        cfsm.mark_terminal("s1".into());

        assert_eq!(cfsm.states.len(), 2);
        assert!(cfsm.is_terminal(&"s1".into()));
        assert_eq!(cfsm.transitions_from(&"s0".into()).count(), 1);
        assert_eq!(cfsm.peers(), BTreeSet::from(["B".to_string()]));
    }

    #[test]
    fn test_rename_roles_substitutes_actions() {
        let mut cfsm = Cfsm::new("Sub", "P", vec!["P".into(), "Q".into()], "s0".into());
        cfsm.add_transition("s0".into(), send("Q", "Ping"), "s1".into());

        let mapping = BTreeMap::from([
            ("P".to_string(), "A".to_string()),
            ("Q".to_string(), "B".to_string()),
        ]);
        let renamed = cfsm.rename_roles(&mapping);

        assert_eq!(renamed.role, "A");
        assert_eq!(renamed.roles, vec!["A", "B"]);
        assert!(matches!(
            &renamed.transitions[0].action,
            CfsmAction::Send { to, .. } if to == "B"
        ));
    }

    #[test]
    fn test_action_display() {
        assert_eq!(send("B", "M").to_string(), "!B M");
        assert_eq!(CfsmAction::Tau.to_string(), "tau");
    }
}
