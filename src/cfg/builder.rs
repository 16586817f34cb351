// cfg/builder.rs - AST to CFG Lowering

use super::graph::{
    Cfg, CfgAction, CfgNodeKind, EdgeKind, MessageAction, NodeId, SubProtocolAction,
};
use crate::parser::{GlobalProtocol, Interaction, Position};
use tracing::debug;

/// Structural errors raised while lowering a protocol body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CfgError {
    #[error("continue at {line}:{column} targets undefined recursion label '{label}'")]
    UndefinedContinueLabel {
        label: String,
        line: u32,
        column: u32,
    },

    #[error("continue '{label}' at {line}:{column} crosses a parallel branch boundary")]
    ContinueAcrossParallel {
        label: String,
        line: u32,
        column: u32,
    },

    #[error("unreachable interaction at {line}:{column}: every path already continued")]
    UnreachableCode { line: u32, column: u32 },
}

impl CfgError {
    fn at(position: Position, make: impl FnOnce(u32, u32) -> CfgError) -> CfgError {
        make(position.line, position.column)
    }
}

/// Build the CFG of one global protocol.
///
/// Lowering is compositional: each interaction consumes the set of dangling
/// `(node, edge-kind)` exits produced so far and yields the exits of its own
/// subgraph. A `continue` yields no exits, so paths that do not continue
/// fall through to the enclosing construct's exit.
pub fn build(protocol: &GlobalProtocol) -> Result<Cfg, CfgError> {
    let mut builder = Builder {
        cfg: Cfg::new(protocol.name.clone(), protocol.role_names()),
        rec_env: Vec::new(),
        par_context: Vec::new(),
        par_counter: 0,
    };

    let initial = builder.cfg.add_node(CfgNodeKind::Initial, None);
    let exits = builder.sequence(&protocol.body, vec![(initial, EdgeKind::Sequence)])?;

    let terminal = builder.cfg.add_node(CfgNodeKind::Terminal, None);
    if exits.is_empty() {
        // Every path loops forever; the terminal stays unreachable and the
        // verifier's liveness check reports it.
        debug!(protocol = %protocol.name, "protocol has no falling-through path");
    }
    builder.connect(exits, &terminal);

    debug!(
        protocol = %protocol.name,
        nodes = builder.cfg.node_count(),
        edges = builder.cfg.edges().len(),
        "built CFG"
    );
    Ok(builder.cfg)
}

/// A recursion label in scope, with the parallel context it was opened in.
struct RecBinding {
    label: String,
    node: NodeId,
    par_context: Vec<(String, usize)>,
}

/// Dangling exits: nodes whose next sequential edge is not yet wired, with
/// the kind that edge must carry.
type Exits = Vec<(NodeId, EdgeKind)>;

struct Builder {
    cfg: Cfg,
    rec_env: Vec<RecBinding>,

    /// Stack of `(parallel_id, branch_index)` for the branch currently
    /// being lowered
    par_context: Vec<(String, usize)>,
    par_counter: u32,
}

impl Builder {
    fn connect(&mut self, exits: Exits, target: &NodeId) {
        for (node, kind) in exits {
            self.cfg.add_edge(node, target.clone(), kind);
        }
    }

    fn sequence(&mut self, body: &[Interaction], mut exits: Exits) -> Result<Exits, CfgError> {
        for interaction in body {
            if exits.is_empty() {
                return Err(CfgError::at(interaction.span().start, |line, column| {
                    CfgError::UnreachableCode { line, column }
                }));
            }
            exits = self.interaction(interaction, exits)?;
        }
        Ok(exits)
    }

    fn interaction(&mut self, interaction: &Interaction, exits: Exits) -> Result<Exits, CfgError> {
        match interaction {
            Interaction::Message(m) => {
                let node = self.cfg.add_node(
                    CfgNodeKind::Action {
                        action: CfgAction::Message(MessageAction {
                            label: m.label.clone(),
                            payload: m.payload.clone(),
                            sender: m.sender.clone(),
                            receivers: m.receivers.clone(),
                        }),
                    },
                    Some(m.span),
                );
                self.connect(exits, &node);
                Ok(vec![(node, EdgeKind::Sequence)])
            }

            Interaction::Do {
                target,
                arguments,
                span,
            } => {
                let node = self.cfg.add_node(
                    CfgNodeKind::Action {
                        action: CfgAction::SubProtocolCall(SubProtocolAction {
                            target: target.clone(),
                            arguments: arguments.clone(),
                        }),
                    },
                    Some(*span),
                );
                self.connect(exits, &node);
                Ok(vec![(node, EdgeKind::Sequence)])
            }

            Interaction::Choice {
                decider,
                branches,
                span,
            } => {
                let branch_node = self.cfg.add_node(
                    CfgNodeKind::Branch {
                        decider: decider.clone(),
                    },
                    Some(*span),
                );
                self.connect(exits, &branch_node);

                let mut branch_exits = Vec::new();
                for body in branches {
                    let outs =
                        self.sequence(body, vec![(branch_node.clone(), EdgeKind::Branch)])?;
                    branch_exits.extend(outs);
                }

                let merge = self.cfg.add_node(CfgNodeKind::Merge, Some(*span));
                self.connect(branch_exits, &merge);
                Ok(vec![(merge, EdgeKind::Sequence)])
            }

            Interaction::Parallel { branches, span } => {
                let parallel_id = format!("par{}", self.par_counter);
                self.par_counter += 1;

                let fork = self.cfg.add_node(
                    CfgNodeKind::Fork {
                        parallel_id: parallel_id.clone(),
                    },
                    Some(*span),
                );
                self.connect(exits, &fork);

                let mut branch_exits = Vec::new();
                for (index, body) in branches.iter().enumerate() {
                    self.par_context.push((parallel_id.clone(), index));
                    let outs = self.sequence(body, vec![(fork.clone(), EdgeKind::Fork)]);
                    self.par_context.pop();
                    branch_exits.extend(outs?);
                }

                let join = self.cfg.add_node(
                    CfgNodeKind::Join {
                        parallel_id: parallel_id.clone(),
                    },
                    Some(*span),
                );
                self.connect(branch_exits, &join);
                Ok(vec![(join, EdgeKind::Sequence)])
            }

            Interaction::Recursion { label, body, span } => {
                let rec = self.cfg.add_node(
                    CfgNodeKind::Recursive {
                        label: label.clone(),
                    },
                    Some(*span),
                );
                self.connect(exits, &rec);

                self.rec_env.push(RecBinding {
                    label: label.clone(),
                    node: rec.clone(),
                    par_context: self.par_context.clone(),
                });
                // The body's fall-through exits become OUR exits: a path
                // that never continues leaves the rec block entirely.
                let outs = self.sequence(body, vec![(rec, EdgeKind::Sequence)]);
                self.rec_env.pop();
                outs
            }

            Interaction::Continue { label, span } => {
                let binding = self
                    .rec_env
                    .iter()
                    .rev()
                    .find(|b| &b.label == label)
                    .ok_or_else(|| {
                        CfgError::at(span.start, |line, column| {
                            CfgError::UndefinedContinueLabel {
                                label: label.clone(),
                                line,
                                column,
                            }
                        })
                    })?;

                if binding.par_context != self.par_context {
                    return Err(CfgError::at(span.start, |line, column| {
                        CfgError::ContinueAcrossParallel {
                            label: label.clone(),
                            line,
                            column,
                        }
                    }));
                }

                let target = binding.node.clone();
                for (node, _) in exits {
                    self.cfg.add_edge(node, target.clone(), EdgeKind::Continue);
                }
                // No sequential successor on this path.
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::graph::CfgNodeKind;
    use crate::parser::parse;

    fn build_one(source: &str) -> Result<Cfg, CfgError> {
        let module = parse(source).unwrap();
        build(&module.protocols[0])
    }

    #[test]
    fn test_empty_body_initial_to_terminal() {
        let cfg = build_one("global protocol P(role A, role B) { }").unwrap();
        assert_eq!(cfg.node_count(), 2);
        let edge = &cfg.edges()[0];
        assert_eq!(edge.from, cfg.initial);
        assert_eq!(edge.to, cfg.terminals[0]);
        assert_eq!(edge.kind, EdgeKind::Sequence);
    }

    #[test]
    fn test_sequence_threads_exits() {
        let cfg = build_one(
            "global protocol RR(role C, role S) {
                 Req(Int) from C to S;
                 Resp(String) from S to C;
             }",
        )
        .unwrap();

        // initial -> Req -> Resp -> terminal
        assert_eq!(cfg.node_count(), 4);
        let req = cfg.successors(&cfg.initial).next().unwrap().clone();
        assert_eq!(cfg.node(&req).unwrap().message().unwrap().label, "Req");
        let resp = cfg.successors(&req).next().unwrap().clone();
        assert_eq!(cfg.node(&resp).unwrap().message().unwrap().label, "Resp");
        assert!(cfg.is_terminal(cfg.successors(&resp).next().unwrap()));
    }

    #[test]
    fn test_choice_branch_and_merge() {
        let cfg = build_one(
            "global protocol P(role S, role C) {
                 choice at S {
                     Yes() from S to C;
                 } or {
                     No() from S to C;
                 }
                 Bye() from S to C;
             }",
        )
        .unwrap();

        let branch = cfg
            .nodes()
            .iter()
            .find(|n| matches!(n.kind, CfgNodeKind::Branch { .. }))
            .unwrap();
        let branch_edges: Vec<_> = cfg
            .outgoing(&branch.id)
            .filter(|e| e.kind == EdgeKind::Branch)
            .collect();
        assert_eq!(branch_edges.len(), 2);

        let merge = cfg
            .nodes()
            .iter()
            .find(|n| matches!(n.kind, CfgNodeKind::Merge))
            .unwrap();
        assert_eq!(cfg.incoming(&merge.id).count(), 2);
        // Merge flows on to Bye
        let bye = cfg.successors(&merge.id).next().unwrap();
        assert_eq!(cfg.node(bye).unwrap().message().unwrap().label, "Bye");
    }

    #[test]
    fn test_parallel_fork_join_share_id() {
        let cfg = build_one(
            "global protocol P(role A, role B, role C) {
                 par { M1() from A to B; } and { M2() from A to C; }
             }",
        )
        .unwrap();

        let fork = cfg
            .nodes()
            .iter()
            .find_map(|n| match &n.kind {
                CfgNodeKind::Fork { parallel_id } => Some((n.id.clone(), parallel_id.clone())),
                _ => None,
            })
            .unwrap();
        let join = cfg
            .nodes()
            .iter()
            .find_map(|n| match &n.kind {
                CfgNodeKind::Join { parallel_id } => Some((n.id.clone(), parallel_id.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(fork.1, join.1);
        assert_eq!(
            cfg.outgoing(&fork.0)
                .filter(|e| e.kind == EdgeKind::Fork)
                .count(),
            2
        );
        assert_eq!(cfg.incoming(&join.0).count(), 2);
    }

    #[test]
    fn test_streaming_recursion_shape() {
        // The streaming shape: continue edge back to the rec node from the first
        // branch, fall-through from the second branch to the terminal.
        let cfg = build_one(
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
        )
        .unwrap();

        let rec = cfg
            .nodes()
            .iter()
            .find(|n| matches!(n.kind, CfgNodeKind::Recursive { .. }))
            .unwrap();

        let continue_edges: Vec<_> = cfg
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::Continue)
            .collect();
        assert_eq!(continue_edges.len(), 1);
        assert_eq!(continue_edges[0].to, rec.id);
        // The continue edge's source is the Data action node.
        assert_eq!(
            cfg.node(&continue_edges[0].from)
                .unwrap()
                .message()
                .unwrap()
                .label,
            "Data"
        );

        // The merge only collects the Done branch and falls through to the
        // terminal: no continue means leave the rec block.
        let merge = cfg
            .nodes()
            .iter()
            .find(|n| matches!(n.kind, CfgNodeKind::Merge))
            .unwrap();
        assert_eq!(cfg.incoming(&merge.id).count(), 1);
        assert!(cfg.is_terminal(cfg.successors(&merge.id).next().unwrap()));
    }

    #[test]
    fn test_rec_empty_body_falls_through() {
        let cfg = build_one("global protocol P(role A, role B) { rec X { } }").unwrap();
        let rec = cfg
            .nodes()
            .iter()
            .find(|n| matches!(n.kind, CfgNodeKind::Recursive { .. }))
            .unwrap();
        assert!(cfg.is_terminal(cfg.successors(&rec.id).next().unwrap()));
    }

    #[test]
    fn test_undefined_continue_label() {
        let err = build_one(
            "global protocol P(role A, role B) {
                 rec X { continue Y; }
             }",
        )
        .unwrap_err();
        assert!(matches!(err, CfgError::UndefinedContinueLabel { ref label, .. } if label == "Y"));
    }

    #[test]
    fn test_continue_across_parallel_rejected() {
        let err = build_one(
            "global protocol P(role A, role B, role C) {
                 rec X {
                     par {
                         M1() from A to B;
                         continue X;
                     } and {
                         M2() from A to C;
                     }
                 }
             }",
        )
        .unwrap_err();
        assert!(matches!(err, CfgError::ContinueAcrossParallel { .. }));
    }

    #[test]
    fn test_continue_within_same_parallel_branch_allowed() {
        let cfg = build_one(
            "global protocol P(role A, role B, role C) {
                 par {
                     rec X {
                         M1() from A to B;
                         continue X;
                     }
                 } and {
                     M2() from A to C;
                 }
             }",
        )
        .unwrap();
        assert_eq!(
            cfg.edges()
                .iter()
                .filter(|e| e.kind == EdgeKind::Continue)
                .count(),
            1
        );
    }

    #[test]
    fn test_unreachable_after_continue() {
        let err = build_one(
            "global protocol P(role A, role B) {
                 rec X {
                     M() from A to B;
                     continue X;
                     Late() from A to B;
                 }
             }",
        )
        .unwrap_err();
        assert!(matches!(err, CfgError::UnreachableCode { .. }));
    }

    #[test]
    fn test_do_action_node() {
        let cfg = build_one(
            "global protocol P(role A, role B) {
                 do Sub(A, B);
             }",
        )
        .unwrap();
        let call = cfg
            .nodes()
            .iter()
            .find_map(|n| n.sub_protocol())
            .unwrap();
        assert_eq!(call.target, "Sub");
        assert_eq!(call.arguments, vec!["A", "B"]);
    }
}
