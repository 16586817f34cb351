// verify/algo.rs - Graph Algorithms over CFGs

use crate::cfg::{Cfg, CfgNodeKind, EdgeKind, NodeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// All nodes reachable from `start`, following every edge kind.
pub fn reachable_from(cfg: &Cfg, start: &NodeId) -> BTreeSet<NodeId> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start.clone()]);
    seen.insert(start.clone());
    while let Some(node) = queue.pop_front() {
        for next in cfg.successors(&node) {
            if seen.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }
    seen
}

/// All nodes with a path to any node in `targets` (reverse BFS).
pub fn reaches_any(cfg: &Cfg, targets: &[NodeId]) -> BTreeSet<NodeId> {
    let mut seen: BTreeSet<NodeId> = targets.iter().cloned().collect();
    let mut queue: VecDeque<NodeId> = targets.iter().cloned().collect();
    while let Some(node) = queue.pop_front() {
        for edge in cfg.incoming(&node) {
            if seen.insert(edge.from.clone()) {
                queue.push_back(edge.from.clone());
            }
        }
    }
    seen
}

/// Shortest path (by edge count) from `from` to `to`, inclusive of both.
pub fn shortest_path(cfg: &Cfg, from: &NodeId, to: &NodeId) -> Option<Vec<NodeId>> {
    if from == to {
        return Some(vec![from.clone()]);
    }
    let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
    let mut queue = VecDeque::from([from.clone()]);
    while let Some(node) = queue.pop_front() {
        for next in cfg.successors(&node) {
            if next != from && !parent.contains_key(next) {
                parent.insert(next.clone(), node.clone());
                if next == to {
                    let mut path = vec![to.clone()];
                    let mut cursor = to;
                    while let Some(prev) = parent.get(cursor) {
                        path.push(prev.clone());
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next.clone());
            }
        }
    }
    None
}

/// Tarjan's strongly connected components over the subgraph formed by the
/// given edge kinds. Components are returned in discovery order; singleton
/// components without a self-loop are included (callers filter).
pub fn tarjan_scc(cfg: &Cfg, kinds: &[EdgeKind]) -> Vec<Vec<NodeId>> {
    struct State<'a> {
        cfg: &'a Cfg,
        kinds: &'a [EdgeKind],
        index: u32,
        indices: HashMap<NodeId, u32>,
        lowlinks: HashMap<NodeId, u32>,
        on_stack: BTreeSet<NodeId>,
        stack: Vec<NodeId>,
        components: Vec<Vec<NodeId>>,
    }

    impl State<'_> {
        fn successors(&self, node: &NodeId) -> Vec<NodeId> {
            self.cfg
                .outgoing(node)
                .filter(|e| self.kinds.contains(&e.kind))
                .map(|e| e.to.clone())
                .collect()
        }

        fn connect(&mut self, node: &NodeId) {
            self.indices.insert(node.clone(), self.index);
            self.lowlinks.insert(node.clone(), self.index);
            self.index += 1;
            self.stack.push(node.clone());
            self.on_stack.insert(node.clone());

            for next in self.successors(node) {
                if !self.indices.contains_key(&next) {
                    self.connect(&next);
                    let low = self.lowlinks[&next].min(self.lowlinks[node]);
                    self.lowlinks.insert(node.clone(), low);
                } else if self.on_stack.contains(&next) {
                    let low = self.indices[&next].min(self.lowlinks[node]);
                    self.lowlinks.insert(node.clone(), low);
                }
            }

            if self.lowlinks[node] == self.indices[node] {
                let mut component = Vec::new();
                loop {
                    let popped = self.stack.pop().expect("Tarjan stack underflow");
                    self.on_stack.remove(&popped);
                    let done = popped == *node;
                    component.push(popped);
                    if done {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    let mut state = State {
        cfg,
        kinds,
        index: 0,
        indices: HashMap::new(),
        lowlinks: HashMap::new(),
        on_stack: BTreeSet::new(),
        stack: Vec::new(),
        components: Vec::new(),
    };
    for node in cfg.nodes() {
        if !state.indices.contains_key(&node.id) {
            state.connect(&node.id);
        }
    }
    state.components
}

/// Walk one branch of a `branch` node: the region of nodes on paths from
/// `start` until the merge that closes this choice, plus that merge if any
/// path reaches it. Inner choices are depth-balanced; `continue` edges are
/// not followed (a diverting path simply contributes no merge).
pub fn region_until_merge(cfg: &Cfg, start: &NodeId) -> (BTreeSet<NodeId>, Option<NodeId>) {
    region_until(cfg, start, RegionDelimiter::Merge)
}

/// Walk one branch of a `fork` node up to the join that closes it.
pub fn region_until_join(cfg: &Cfg, start: &NodeId) -> (BTreeSet<NodeId>, Option<NodeId>) {
    region_until(cfg, start, RegionDelimiter::Join)
}

enum RegionDelimiter {
    Merge,
    Join,
}

fn region_until(
    cfg: &Cfg,
    start: &NodeId,
    delimiter: RegionDelimiter,
) -> (BTreeSet<NodeId>, Option<NodeId>) {
    let mut region = BTreeSet::new();
    let mut closer = None;
    let mut seen: BTreeSet<(NodeId, i32)> = BTreeSet::new();
    let mut queue: VecDeque<(NodeId, i32)> = VecDeque::from([(start.clone(), 0)]);

    while let Some((node, depth)) = queue.pop_front() {
        if !seen.insert((node.clone(), depth)) {
            continue;
        }
        let Some(entry) = cfg.node(&node) else {
            continue;
        };

        let mut next_depth = depth;
        match (&delimiter, &entry.kind) {
            (RegionDelimiter::Merge, CfgNodeKind::Merge) => {
                if depth == 0 {
                    closer.get_or_insert(node.clone());
                    continue;
                }
                next_depth -= 1;
            }
            (RegionDelimiter::Merge, CfgNodeKind::Branch { .. }) => next_depth += 1,
            (RegionDelimiter::Join, CfgNodeKind::Join { .. }) => {
                if depth == 0 {
                    closer.get_or_insert(node.clone());
                    continue;
                }
                next_depth -= 1;
            }
            (RegionDelimiter::Join, CfgNodeKind::Fork { .. }) => next_depth += 1,
            _ => {}
        }

        region.insert(node.clone());
        for edge in cfg.outgoing(&node) {
            if edge.kind != EdgeKind::Continue {
                queue.push_back((edge.to.clone(), next_depth));
            }
        }
    }

    (region, closer)
}

/// For every fork, the per-branch node regions, keyed by fork node id.
/// Branches appear in fork-edge insertion order.
pub fn fork_branches(cfg: &Cfg) -> BTreeMap<NodeId, Vec<BTreeSet<NodeId>>> {
    let mut result = BTreeMap::new();
    for node in cfg.nodes() {
        if matches!(node.kind, CfgNodeKind::Fork { .. }) {
            let branches: Vec<BTreeSet<NodeId>> = cfg
                .outgoing(&node.id)
                .filter(|e| e.kind == EdgeKind::Fork)
                .map(|e| region_until_join(cfg, &e.to).0)
                .collect();
            result.insert(node.id.clone(), branches);
        }
    }
    result
}
