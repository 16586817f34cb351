// cfg/graph.rs - Control Flow Graph Representation

use crate::parser::Span;
use serde::Serialize;
use std::collections::HashMap;

/// Stable, opaque identity of a CFG node.
///
/// Ids are plain strings so a CFG serialises to JSON without indirection
/// and back-edges are just `(from, to, kind)` tuples.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    serde::Deserialize,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct NodeId(pub(crate) String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// The action carried by an `action` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CfgAction {
    /// A message transfer between roles
    Message(MessageAction),

    /// A deferred `do P(args)` call; expansion happens at projection or
    /// simulation time
    SubProtocolCall(SubProtocolAction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageAction {
    pub label: String,
    pub payload: Vec<String>,
    pub sender: String,
    pub receivers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubProtocolAction {
    pub target: String,
    pub arguments: Vec<String>,
}

/// Node kinds. Control nodes are explicit; only `action` nodes carry
/// behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CfgNodeKind {
    Initial,
    Terminal,
    Action { action: CfgAction },
    Branch { decider: String },
    Merge,
    Fork { parallel_id: String },
    Join { parallel_id: String },
    Recursive { label: String },
}

impl CfgNodeKind {
    /// Short id prefix used when generating node identities.
    fn id_prefix(&self) -> &'static str {
        match self {
            CfgNodeKind::Initial => "initial",
            CfgNodeKind::Terminal => "terminal",
            CfgNodeKind::Action {
                action: CfgAction::Message(_),
            } => "msg",
            CfgNodeKind::Action {
                action: CfgAction::SubProtocolCall(_),
            } => "call",
            CfgNodeKind::Branch { .. } => "branch",
            CfgNodeKind::Merge => "merge",
            CfgNodeKind::Fork { .. } => "fork",
            CfgNodeKind::Join { .. } => "join",
            CfgNodeKind::Recursive { .. } => "rec",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CfgNode {
    pub id: NodeId,

    #[serde(flatten)]
    pub kind: CfgNodeKind,

    /// Source span of the interaction this node was lowered from, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl CfgNode {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, CfgNodeKind::Terminal)
    }

    pub fn message(&self) -> Option<&MessageAction> {
        match &self.kind {
            CfgNodeKind::Action {
                action: CfgAction::Message(m),
            } => Some(m),
            _ => None,
        }
    }

    pub fn sub_protocol(&self) -> Option<&SubProtocolAction> {
        match &self.kind {
            CfgNodeKind::Action {
                action: CfgAction::SubProtocolCall(c),
            } => Some(c),
            _ => None,
        }
    }
}

/// Edge kinds mirror how control leaves the source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Sequence,
    Branch,
    Fork,
    Continue,
}

#[derive(Debug, Clone, Serialize)]
pub struct CfgEdge {
    pub from: NodeId,
    pub to: NodeId,

    #[serde(rename = "type")]
    pub kind: EdgeKind,
}

/// A control flow graph for one global protocol.
///
/// Nodes live in an insertion-ordered table indexed by id; edges are
/// `(from, to, kind)` tuples. This gives true back-edges (continue,
/// recursion) and cheap structural traversal, which the tree-shaped AST
/// cannot represent.
#[derive(Debug, Clone, Serialize)]
pub struct Cfg {
    /// Name of the protocol this CFG was built from
    pub protocol: String,

    /// Declared roles of the protocol, in declaration order
    pub roles: Vec<String>,

    nodes: Vec<CfgNode>,
    edges: Vec<CfgEdge>,

    pub initial: NodeId,
    pub terminals: Vec<NodeId>,

    #[serde(skip)]
    index: HashMap<NodeId, usize>,

    #[serde(skip)]
    next_id: u32,
}

impl Cfg {
    pub fn new(protocol: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            protocol: protocol.into(),
            roles,
            nodes: Vec::new(),
            edges: Vec::new(),
            initial: NodeId("initial0".into()),
            terminals: Vec::new(),
            index: HashMap::new(),
            next_id: 0,
        }
    }

    /// Insert a node, generating its id.
    pub fn add_node(&mut self, kind: CfgNodeKind, span: Option<Span>) -> NodeId {
        let id = NodeId(format!("{}{}", kind.id_prefix(), self.next_id));
        self.next_id += 1;

        if matches!(kind, CfgNodeKind::Initial) {
            self.initial = id.clone();
        }
        if matches!(kind, CfgNodeKind::Terminal) {
            self.terminals.push(id.clone());
        }

        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(CfgNode {
            id: id.clone(),
            kind,
            span,
        });
        id
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.edges.push(CfgEdge { from, to, kind });
    }

    pub fn node(&self, id: &NodeId) -> Option<&CfgNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[CfgNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[CfgEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn outgoing(&self, id: &NodeId) -> impl Iterator<Item = &CfgEdge> {
        self.edges.iter().filter(move |e| &e.from == id)
    }

    pub fn incoming(&self, id: &NodeId) -> impl Iterator<Item = &CfgEdge> {
        self.edges.iter().filter(move |e| &e.to == id)
    }

    pub fn successors(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.outgoing(id).map(|e| &e.to)
    }

    pub fn is_terminal(&self, id: &NodeId) -> bool {
        self.terminals.contains(id)
    }

    /// All message actions in the graph, with their node ids.
    pub fn messages(&self) -> impl Iterator<Item = (&NodeId, &MessageAction)> {
        self.nodes
            .iter()
            .filter_map(|n| n.message().map(|m| (&n.id, m)))
    }

    /// Roles that actually occur in the graph: message senders and
    /// receivers, choice deciders, and `do` role arguments.
    pub fn participating_roles(&self) -> Vec<String> {
        let mut roles = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        let mut push = |roles: &mut Vec<String>, name: &str| {
            if seen.insert(name.to_string()) {
                roles.push(name.to_string());
            }
        };
        for node in &self.nodes {
            match &node.kind {
                CfgNodeKind::Action {
                    action: CfgAction::Message(m),
                } => {
                    push(&mut roles, &m.sender);
                    for r in &m.receivers {
                        push(&mut roles, r);
                    }
                }
                CfgNodeKind::Action {
                    action: CfgAction::SubProtocolCall(c),
                } => {
                    for r in &c.arguments {
                        push(&mut roles, r);
                    }
                }
                CfgNodeKind::Branch { decider } => push(&mut roles, decider),
                _ => {}
            }
        }
        roles
    }

    /// JSON serialisation in the `{nodes, edges, initial, terminals}` shape.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("CFG serialisation cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_table_roundtrip() {
        let mut cfg = Cfg::new("P", vec!["A".into(), "B".into()]);
        let initial = cfg.add_node(CfgNodeKind::Initial, None);
        let action = cfg.add_node(
            CfgNodeKind::Action {
                action: CfgAction::Message(MessageAction {
                    label: "Ping".into(),
                    payload: vec![],
                    sender: "A".into(),
                    receivers: vec!["B".into()],
                }),
            },
            None,
        );
        let terminal = cfg.add_node(CfgNodeKind::Terminal, None);
        cfg.add_edge(initial.clone(), action.clone(), EdgeKind::Sequence);
        cfg.add_edge(action.clone(), terminal.clone(), EdgeKind::Sequence);

        assert_eq!(cfg.initial, initial);
        assert_eq!(cfg.terminals, vec![terminal.clone()]);
        assert_eq!(cfg.successors(&initial).collect::<Vec<_>>(), vec![&action]);
        assert_eq!(cfg.node(&action).unwrap().message().unwrap().label, "Ping");
    }

    #[test]
    fn test_json_shape() {
        let mut cfg = Cfg::new("P", vec!["A".into()]);
        let initial = cfg.add_node(CfgNodeKind::Initial, None);
        let terminal = cfg.add_node(CfgNodeKind::Terminal, None);
        cfg.add_edge(initial, terminal, EdgeKind::Sequence);

        let json = cfg.to_json();
        assert_eq!(json["nodes"][0]["type"], "initial");
        assert_eq!(json["edges"][0]["type"], "sequence");
        assert!(json["initial"].is_string());
        assert!(json["terminals"].is_array());
    }

    #[test]
    fn test_participating_roles_deduped() {
        let mut cfg = Cfg::new("P", vec!["A".into(), "B".into()]);
        cfg.add_node(
            CfgNodeKind::Action {
                action: CfgAction::Message(MessageAction {
                    label: "M".into(),
                    payload: vec![],
                    sender: "A".into(),
                    receivers: vec!["B".into()],
                }),
            },
            None,
        );
        cfg.add_node(CfgNodeKind::Branch { decider: "A".into() }, None);
        assert_eq!(cfg.participating_roles(), vec!["A", "B"]);
    }
}
