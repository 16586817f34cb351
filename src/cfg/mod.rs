// cfg/mod.rs - Control Flow Graphs

//! Lowering of global protocols to control flow graphs.
//!
//! A CFG makes communication order explicit: every interaction becomes an
//! `action` node, control constructs become `branch`/`merge`,
//! `fork`/`join` and `recursive` nodes, and `continue` becomes a true
//! back-edge. Later stages (verifier, projector, simulators) only ever see
//! the graph, never the AST.

mod builder;
mod graph;

pub use builder::{build, CfgError};
pub use graph::{
    Cfg, CfgAction, CfgEdge, CfgNode, CfgNodeKind, EdgeKind, MessageAction, NodeId,
    SubProtocolAction,
};
