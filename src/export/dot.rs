// export/dot.rs - CFG to Graphviz DOT

use crate::cfg::{Cfg, CfgAction, CfgNodeKind, EdgeKind};

/// Render a CFG as a Graphviz `digraph`.
///
/// Node shapes encode the node type (doublecircle terminals, boxes for
/// actions, diamonds for branch/merge, black bars for fork/join); edge
/// styles encode the edge kind (dashed branch, bold fork, dotted
/// continue).
pub fn cfg_to_dot(cfg: &Cfg) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", escape(&cfg.protocol)));
    out.push_str("  rankdir=TB;\n");
    out.push_str("  node [fontname=\"Helvetica\"];\n\n");

    for node in cfg.nodes() {
        let attrs = match &node.kind {
            CfgNodeKind::Initial => {
                "shape=circle, style=filled, fillcolor=black, label=\"\", width=0.25".to_string()
            }
            CfgNodeKind::Terminal => {
                "shape=doublecircle, style=filled, fillcolor=black, label=\"\", width=0.2"
                    .to_string()
            }
            CfgNodeKind::Action {
                action: CfgAction::Message(m),
            } => {
                let payload = if m.payload.is_empty() {
                    String::new()
                } else {
                    format!("({})", m.payload.join(", "))
                };
                format!(
                    "shape=box, label=\"{}{}\\n{} -> {}\"",
                    escape(&m.label),
                    escape(&payload),
                    escape(&m.sender),
                    escape(&m.receivers.join(", "))
                )
            }
            CfgNodeKind::Action {
                action: CfgAction::SubProtocolCall(c),
            } => format!(
                "shape=box, style=dashed, label=\"do {}({})\"",
                escape(&c.target),
                escape(&c.arguments.join(", "))
            ),
            CfgNodeKind::Branch { decider } => format!(
                "shape=diamond, label=\"choice at {}\"",
                escape(decider)
            ),
            CfgNodeKind::Merge => "shape=diamond, style=filled, fillcolor=lightgrey, label=\"\""
                .to_string(),
            CfgNodeKind::Fork { parallel_id } => format!(
                "shape=box, style=filled, fillcolor=black, height=0.1, label=\"\", xlabel=\"{}\"",
                escape(parallel_id)
            ),
            CfgNodeKind::Join { parallel_id } => format!(
                "shape=box, style=filled, fillcolor=black, height=0.1, label=\"\", xlabel=\"{}\"",
                escape(parallel_id)
            ),
            CfgNodeKind::Recursive { label } => {
                format!("shape=ellipse, label=\"rec {}\"", escape(label))
            }
        };
        out.push_str(&format!("  \"{}\" [{}];\n", escape(node.id.as_str()), attrs));
    }

    out.push('\n');
    for edge in cfg.edges() {
        let style = match edge.kind {
            EdgeKind::Sequence => "",
            EdgeKind::Branch => " [style=dashed]",
            EdgeKind::Fork => " [style=bold]",
            EdgeKind::Continue => " [style=dotted, constraint=false]",
        };
        out.push_str(&format!(
            "  \"{}\" -> \"{}\"{};\n",
            escape(edge.from.as_str()),
            escape(edge.to.as_str()),
            style
        ));
    }

    out.push_str("}\n");
    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
