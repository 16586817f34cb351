// runtime/cfg_simulator.rs - Orchestrated CFG Simulator

use super::call_stack::{CallFrame, CallStackConfig, CallStackManager};
use super::event::{ChoiceOption, TraceEvent, TraceRecorder};
use super::SimulationError;
use crate::cfg::{Cfg, CfgAction, CfgNodeKind, EdgeKind, NodeId, SubProtocolAction};
use crate::registry::{ProtocolRegistry, RegistryError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// How choice points are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceStrategy {
    /// Always take the first branch; deterministic
    #[default]
    First,
    /// Uniformly random branch
    Random,
    /// Yield a choice point and wait for [`CfgSimulator::choose`]
    Manual,
}

/// Configuration of the orchestrated simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgSimulatorConfig {
    pub choice_strategy: ChoiceStrategy,

    /// Keep the full event trace in memory
    pub record_trace: bool,

    /// Number of upcoming labels shown per branch at a choice point
    pub preview_limit: usize,

    /// Observable steps before the run halts with `reached_max_steps`
    pub max_steps: u64,

    /// Seed for the random strategy; random but reproducible when set
    pub seed: Option<u64>,

    /// Limits of this simulator's own call stack
    pub call_stack: CallStackConfig,
}

impl Default for CfgSimulatorConfig {
    fn default() -> Self {
        Self {
            choice_strategy: ChoiceStrategy::First,
            record_trace: true,
            preview_limit: 3,
            max_steps: 1000,
            seed: None,
            call_stack: CallStackConfig::default(),
        }
    }
}

/// What one `step` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CfgStepOutcome {
    /// An atomic message event
    Message {
        from: String,
        to: Vec<String>,
        label: String,
    },
    /// A choice was resolved by the first/random strategy
    ChoiceMade { node: String, index: usize },
    /// Manual strategy: execution paused at a choice point
    AwaitingChoice {
        node: String,
        options: Vec<ChoiceOption>,
    },
    /// A sub-protocol ran to completion
    SubProtocol { protocol: String },
    Completed,
    MaxStepsReached,
}

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: bool,
    pub reached_max_steps: bool,
    pub awaiting_choice: bool,
    pub total_steps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Running,
    AwaitingChoice,
    Completed,
    MaxSteps,
    Halted,
}

/// One active parallel region: a cursor per branch, advanced round-robin.
#[derive(Debug)]
struct ParFrame {
    parallel_id: String,
    join: NodeId,

    /// Current node per branch; `None` once the branch reached the join
    branches: Vec<Option<NodeId>>,
    active: usize,
}

impl ParFrame {
    fn unfinished(&self) -> usize {
        self.branches.iter().filter(|b| b.is_some()).count()
    }

    /// Rotate to the next unfinished branch, if any.
    fn rotate(&mut self) {
        if self.unfinished() == 0 {
            return;
        }
        loop {
            self.active = (self.active + 1) % self.branches.len();
            if self.branches[self.active].is_some() {
                return;
            }
        }
    }
}

/// Synchronous walk of a global CFG.
///
/// A single coordinator realises the total-order choreography view: send
/// and receive collapse into one atomic `message` event. Each `step`
/// advances until one observable event fires (a message, a choice
/// resolution, a completed sub-protocol) or a manual choice point is
/// reached; structural nodes are traversed transparently.
pub struct CfgSimulator {
    cfg: Arc<Cfg>,
    config: CfgSimulatorConfig,
    registry: Option<Arc<ProtocolRegistry>>,

    current: NodeId,
    par_stack: Vec<ParFrame>,
    status: Status,
    steps: u64,
    pending_choice: Option<(NodeId, Vec<ChoiceOption>)>,

    /// Recursion nodes with an active frame
    rec_entered: BTreeSet<NodeId>,

    /// Whether the last traversed edge was a continue back-edge
    arrived_via_continue: bool,

    stack: CallStackManager,
    recorder: TraceRecorder,
    rng: StdRng,
}

const MAX_STRUCTURAL_HOPS: u32 = 1024;

impl CfgSimulator {
    pub fn new(cfg: impl Into<Arc<Cfg>>, config: CfgSimulatorConfig) -> Self {
        let cfg = cfg.into();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            current: cfg.initial.clone(),
            stack: CallStackManager::new(config.call_stack.clone()),
            recorder: TraceRecorder::new(config.record_trace),
            rng,
            cfg,
            config,
            registry: None,
            par_stack: Vec::new(),
            status: Status::Running,
            steps: 0,
            pending_choice: None,
            rec_entered: BTreeSet::new(),
            arrived_via_continue: false,
        }
    }

    /// Attach a registry so `do` statements can be resolved and executed.
    pub fn with_registry(mut self, registry: Arc<ProtocolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn current_node(&self) -> NodeId {
        match self.par_stack.last() {
            Some(frame) => frame.branches[frame.active]
                .clone()
                .unwrap_or_else(|| frame.join.clone()),
            None => self.current.clone(),
        }
    }

    pub fn total_steps(&self) -> u64 {
        self.steps
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    pub fn trace(&self) -> &super::Trace {
        self.recorder.trace()
    }

    pub fn into_trace(self) -> super::Trace {
        self.recorder.into_trace()
    }

    /// Discard all run state and return to the initial node.
    pub fn reset(&mut self) {
        self.current = self.cfg.initial.clone();
        self.par_stack.clear();
        self.status = Status::Running;
        self.steps = 0;
        self.pending_choice = None;
        self.rec_entered.clear();
        self.arrived_via_continue = false;
        self.stack.reset();
        self.recorder = TraceRecorder::new(self.config.record_trace);
        self.drain_stack_events();
    }

    /// Advance until one observable event fires or a manual choice point is
    /// reached.
    pub fn step(&mut self) -> Result<CfgStepOutcome, SimulationError> {
        match self.status {
            Status::Completed | Status::Halted => return Err(SimulationError::AlreadyCompleted),
            Status::MaxSteps => return Ok(CfgStepOutcome::MaxStepsReached),
            Status::AwaitingChoice => {
                let (node, options) = self.pending_choice.clone().expect("pending choice");
                return Ok(CfgStepOutcome::AwaitingChoice {
                    node: node.to_string(),
                    options,
                });
            }
            Status::Running => {}
        }

        if self.steps >= self.config.max_steps {
            self.status = Status::MaxSteps;
            self.recorder.finish(false, self.steps);
            debug!(protocol = %self.cfg.protocol, steps = self.steps, "max steps reached");
            return Ok(CfgStepOutcome::MaxStepsReached);
        }

        self.steps += 1;
        self.recorder.record(TraceEvent::StepStart {
            step: self.steps,
            role: None,
        });

        let mut hops = 0u32;
        loop {
            hops += 1;
            if hops > MAX_STRUCTURAL_HOPS {
                let node = self.current_node();
                return self.halt(SimulationError::StructuralLoop {
                    node: node.to_string(),
                });
            }

            let node_id = self.current_node();
            let Some(node) = self.cfg.node(&node_id) else {
                return self.halt(SimulationError::InvalidNode {
                    node: node_id.to_string(),
                });
            };
            let kind = node.kind.clone();
            self.recorder.record(TraceEvent::NodeEnter {
                node: node_id.to_string(),
            });

            match kind {
                CfgNodeKind::Terminal => {
                    self.status = Status::Completed;
                    self.pop_recursion_frames();
                    self.recorder.record(TraceEvent::Complete {
                        steps: self.steps,
                        role: None,
                    });
                    self.recorder.finish(true, self.steps);
                    self.end_step();
                    return Ok(CfgStepOutcome::Completed);
                }

                CfgNodeKind::Initial | CfgNodeKind::Merge => {
                    self.advance(&node_id)?;
                }

                CfgNodeKind::Recursive { label } => {
                    if self.arrived_via_continue {
                        let iteration = match self.stack.record_continue() {
                            Ok(n) => n,
                            Err(e) => return self.halt(e.into()),
                        };
                        self.recorder.record(TraceEvent::RecursionContinue {
                            node: node_id.to_string(),
                            label: label.clone(),
                            iteration,
                        });
                    } else {
                        self.recorder.record(TraceEvent::RecursionEnter {
                            node: node_id.to_string(),
                            label: label.clone(),
                        });
                        if self.rec_entered.insert(node_id.clone()) {
                            self.stack
                                .push(CallFrame::recursion(
                                    self.cfg.protocol.clone(),
                                    node_id.as_str(),
                                ))
                                .map_err(SimulationError::from)
                                .or_else(|e| self.halt(e))?;
                            self.drain_stack_events();
                        }
                    }
                    self.advance(&node_id)?;
                }

                CfgNodeKind::Branch { .. } => {
                    let options = self.branch_options(&node_id);
                    if options.is_empty() {
                        // Every branch diverted into a continue edge; the
                        // node degenerates to a structural hop.
                        self.advance(&node_id)?;
                        continue;
                    }
                    self.recorder.record(TraceEvent::ChoicePoint {
                        node: node_id.to_string(),
                        options: options.clone(),
                    });

                    let index = match self.config.choice_strategy {
                        ChoiceStrategy::Manual => {
                            self.status = Status::AwaitingChoice;
                            self.pending_choice = Some((node_id.clone(), options.clone()));
                            return Ok(CfgStepOutcome::AwaitingChoice {
                                node: node_id.to_string(),
                                options,
                            });
                        }
                        ChoiceStrategy::First => 0,
                        ChoiceStrategy::Random => self.rng.random_range(0..options.len()),
                    };
                    self.select_branch(&node_id, &options, index);
                    self.end_step();
                    return Ok(CfgStepOutcome::ChoiceMade {
                        node: node_id.to_string(),
                        index,
                    });
                }

                CfgNodeKind::Fork { parallel_id } => {
                    self.enter_fork(&node_id, &parallel_id)?;
                }

                CfgNodeKind::Join { parallel_id } => {
                    self.reach_join(&node_id, &parallel_id)?;
                }

                CfgNodeKind::Action {
                    action: CfgAction::Message(message),
                } => {
                    self.recorder.record(TraceEvent::Message {
                        id: Uuid::new_v4(),
                        from: message.sender.clone(),
                        to: message.receivers.clone(),
                        label: message.label.clone(),
                        payload: if message.payload.is_empty() {
                            None
                        } else {
                            Some(message.payload.join(", "))
                        },
                    });
                    self.stack.step(node_id.as_str());
                    self.drain_stack_events();
                    self.advance(&node_id)?;
                    self.rotate_parallel();
                    self.end_step();
                    return Ok(CfgStepOutcome::Message {
                        from: message.sender,
                        to: message.receivers,
                        label: message.label,
                    });
                }

                CfgNodeKind::Action {
                    action: CfgAction::SubProtocolCall(call),
                } => {
                    let protocol = call.target.clone();
                    self.run_subprotocol(&node_id, &call)?;
                    self.rotate_parallel();
                    self.end_step();
                    return Ok(CfgStepOutcome::SubProtocol { protocol });
                }
            }
        }
    }

    /// Resolve a pending manual choice point.
    pub fn choose(&mut self, index: usize) -> Result<(), SimulationError> {
        if self.status != Status::AwaitingChoice {
            return Err(SimulationError::NotAtChoice);
        }
        let (node, options) = self.pending_choice.clone().expect("pending choice");
        if index >= options.len() {
            return Err(SimulationError::InvalidChoice {
                index,
                available: options.len(),
            });
        }
        self.pending_choice = None;
        self.status = Status::Running;
        self.select_branch(&node, &options, index);
        self.end_step();
        Ok(())
    }

    /// Step until completion, a bounded halt, or a manual choice point.
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        loop {
            match self.step()? {
                CfgStepOutcome::Completed
                | CfgStepOutcome::MaxStepsReached
                | CfgStepOutcome::AwaitingChoice { .. } => break,
                _ => {}
            }
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            completed: self.status == Status::Completed,
            reached_max_steps: self.status == Status::MaxSteps,
            awaiting_choice: self.status == Status::AwaitingChoice,
            total_steps: self.steps,
        }
    }

    // ---- internals --------------------------------------------------------

    fn halt<T>(&mut self, error: SimulationError) -> Result<T, SimulationError> {
        self.status = Status::Halted;
        self.recorder.record(TraceEvent::Error {
            message: error.to_string(),
            role: None,
        });
        self.recorder.finish(false, self.steps);
        Err(error)
    }

    fn end_step(&mut self) {
        self.recorder.record(TraceEvent::StepEnd {
            step: self.steps,
            role: None,
        });
    }

    fn set_position(&mut self, node: NodeId) {
        match self.par_stack.last_mut() {
            Some(frame) => frame.branches[frame.active] = Some(node),
            None => self.current = node,
        }
    }

    /// Move past `node` along its first outgoing edge.
    fn advance(&mut self, node: &NodeId) -> Result<(), SimulationError> {
        self.recorder.record(TraceEvent::NodeExit {
            node: node.to_string(),
        });
        let Some((to, kind)) = self
            .cfg
            .outgoing(node)
            .next()
            .map(|e| (e.to.clone(), e.kind))
        else {
            return self.halt(SimulationError::NoOutgoingEdges {
                node: node.to_string(),
            });
        };
        self.arrived_via_continue = kind == EdgeKind::Continue;
        self.set_position(to);
        Ok(())
    }

    fn rotate_parallel(&mut self) {
        if let Some(frame) = self.par_stack.last_mut() {
            frame.rotate();
        }
    }

    fn enter_fork(&mut self, node: &NodeId, parallel_id: &str) -> Result<(), SimulationError> {
        let branches: Vec<Option<NodeId>> = self
            .cfg
            .outgoing(node)
            .filter(|e| e.kind == EdgeKind::Fork)
            .map(|e| Some(e.to.clone()))
            .collect();
        let join = branches
            .first()
            .and_then(|b| b.as_ref())
            .and_then(|b| crate::verify::region_until_join(&self.cfg, b).1);
        let Some(join) = join else {
            return self.halt(SimulationError::NoOutgoingEdges {
                node: node.to_string(),
            });
        };

        self.recorder.record(TraceEvent::Fork {
            node: node.to_string(),
            parallel_id: parallel_id.to_string(),
        });
        self.recorder.record(TraceEvent::NodeExit {
            node: node.to_string(),
        });
        self.par_stack.push(ParFrame {
            parallel_id: parallel_id.to_string(),
            join,
            branches,
            active: 0,
        });
        Ok(())
    }

    fn reach_join(&mut self, node: &NodeId, parallel_id: &str) -> Result<(), SimulationError> {
        let matches_top = self
            .par_stack
            .last()
            .is_some_and(|frame| &frame.join == node);
        if !matches_top {
            // A join of an already-popped frame: plain structural node.
            return self.advance(node);
        }

        let frame = self.par_stack.last_mut().expect("active parallel frame");
        frame.branches[frame.active] = None;
        if frame.unfinished() > 0 {
            frame.rotate();
            return Ok(());
        }

        self.par_stack.pop();
        self.recorder.record(TraceEvent::Join {
            node: node.to_string(),
            parallel_id: parallel_id.to_string(),
        });
        // Execution resumes at the join inside the enclosing context.
        self.set_position(node.clone());
        self.advance(node)
    }

    fn select_branch(&mut self, node: &NodeId, options: &[ChoiceOption], index: usize) {
        self.recorder.record(TraceEvent::ChoiceSelected {
            node: node.to_string(),
            index,
            label: options[index].label.clone(),
        });
        self.recorder.record(TraceEvent::NodeExit {
            node: node.to_string(),
        });
        self.arrived_via_continue = false;
        self.set_position(NodeId::from(options[index].target.as_str()));
        self.rotate_parallel();
    }

    fn branch_options(&self, node: &NodeId) -> Vec<ChoiceOption> {
        self.cfg
            .outgoing(node)
            .filter(|e| e.kind == EdgeKind::Branch)
            .enumerate()
            .map(|(index, edge)| {
                let preview = self.preview(&edge.to);
                ChoiceOption {
                    index,
                    label: preview.first().cloned(),
                    target: edge.to.to_string(),
                    preview,
                }
            })
            .collect()
    }

    /// Up to `preview_limit` upcoming message labels along a branch. A UX
    /// affordance for manual choices; never affects state.
    fn preview(&self, start: &NodeId) -> Vec<String> {
        let mut labels = Vec::new();
        let mut seen = BTreeSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(node) = queue.pop_front() {
            if labels.len() >= self.config.preview_limit {
                break;
            }
            if let Some(message) = self.cfg.node(&node).and_then(|n| n.message()) {
                labels.push(message.label.clone());
            }
            for next in self.cfg.successors(&node) {
                if seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
        labels
    }

    fn run_subprotocol(
        &mut self,
        node: &NodeId,
        call: &SubProtocolAction,
    ) -> Result<(), SimulationError> {
        let Some(registry) = self.registry.clone() else {
            return self.halt(SimulationError::SubProtocolNotFound {
                protocol: call.target.clone(),
            });
        };

        let sub_cfg = match registry.cfg(&call.target) {
            Ok(cfg) => cfg,
            Err(RegistryError::ProtocolNotFound { name }) => {
                return self.halt(SimulationError::SubProtocolNotFound { protocol: name });
            }
            Err(other) => return self.halt(other.into()),
        };
        let mapping = match registry.role_mapping(&call.target, &call.arguments) {
            Ok(mapping) => mapping,
            Err(e) => return self.halt(e.into()),
        };

        let Some(exit) = self.cfg.outgoing(node).next().map(|e| e.to.clone()) else {
            return self.halt(SimulationError::NoOutgoingEdges {
                node: node.to_string(),
            });
        };

        if let Err(e) = self.stack.push(CallFrame::subprotocol(
            call.target.clone(),
            node.as_str(),
            exit.as_str(),
            mapping.clone(),
        )) {
            return self.halt(e.into());
        }
        self.drain_stack_events();
        self.recorder.record(TraceEvent::SubProtocolEnter {
            protocol: call.target.clone(),
        });
        debug!(protocol = %call.target, "entering sub-protocol");

        // The nested run borrows our stack so depth accumulates across
        // nested calls; a manual strategy degrades to first because nested
        // choice points cannot reach the outer caller.
        let nested_config = CfgSimulatorConfig {
            choice_strategy: match self.config.choice_strategy {
                ChoiceStrategy::Manual => ChoiceStrategy::First,
                other => other,
            },
            ..self.config.clone()
        };
        let mut nested = CfgSimulator::new(sub_cfg, nested_config).with_registry(registry);
        nested.stack = std::mem::take(&mut self.stack);
        let result = nested.run();
        self.stack = std::mem::take(&mut nested.stack);

        let summary = match result {
            Ok(summary) => summary,
            Err(e) => return self.halt(e),
        };
        self.recorder.merge(nested.into_trace(), &mapping);
        if !summary.completed {
            return self.halt(SimulationError::ReachedMaxSteps {
                protocol: call.target.clone(),
                steps: summary.total_steps,
            });
        }

        if let Err(e) = self.stack.pop() {
            return self.halt(e.into());
        }
        self.drain_stack_events();
        self.recorder.record(TraceEvent::SubProtocolExit {
            protocol: call.target.clone(),
        });
        self.recorder.record(TraceEvent::NodeExit {
            node: node.to_string(),
        });
        self.set_position(exit);
        Ok(())
    }

    fn pop_recursion_frames(&mut self) {
        while let Some(frame) = self.stack.top() {
            if frame.kind != super::FrameKind::Recursion {
                break;
            }
            let entry = frame.entry.clone();
            if let Some(node) = self.cfg.node(&NodeId::from(entry.as_str())) {
                if let CfgNodeKind::Recursive { label } = &node.kind {
                    self.recorder.record(TraceEvent::RecursionExit {
                        node: entry.clone(),
                        label: label.clone(),
                    });
                }
            }
            let _ = self.stack.pop();
        }
        self.drain_stack_events();
    }

    fn drain_stack_events(&mut self) {
        for event in self.stack.take_events() {
            self.recorder.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build;
    use crate::parser::parse;

    fn cfg_of(source: &str) -> Cfg {
        build(&parse(source).unwrap().protocols[0]).unwrap()
    }

    fn message_labels(sim: &CfgSimulator) -> Vec<String> {
        sim.trace()
            .events
            .iter()
            .filter_map(|e| match &e.event {
                TraceEvent::Message { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_linear_run_to_completion() {
        let cfg = cfg_of(
            "global protocol RR(role C, role S) {
                 Req(Int) from C to S;
                 Resp(String) from S to C;
             }",
        );
        let mut sim = CfgSimulator::new(cfg, CfgSimulatorConfig::default());

        let summary = sim.run().unwrap();
        assert!(summary.completed);
        assert!(!summary.reached_max_steps);
        assert_eq!(message_labels(&sim), vec!["Req", "Resp"]);
        assert!(sim
            .trace()
            .events
            .iter()
            .any(|e| matches!(e.event, TraceEvent::Complete { .. })));
    }

    #[test]
    fn test_step_after_completion_is_error() {
        let cfg = cfg_of("global protocol P(role A, role B) { M() from A to B; }");
        let mut sim = CfgSimulator::new(cfg, CfgSimulatorConfig::default());
        sim.run().unwrap();
        assert!(matches!(sim.step(), Err(SimulationError::AlreadyCompleted)));
    }

    #[test]
    fn test_first_strategy_is_deterministic() {
        let source = "global protocol P(role S, role C) {
             choice at S { Yes() from S to C; } or { No() from S to C; }
         }";
        let run = || {
            let mut sim = CfgSimulator::new(cfg_of(source), CfgSimulatorConfig::default());
            sim.run().unwrap();
            message_labels(&sim)
        };
        assert_eq!(run(), vec!["Yes"]);
        assert_eq!(run(), run());
    }

    #[test]
    fn test_seeded_random_strategy_reproducible() {
        let source = "global protocol P(role S, role C) {
             choice at S { Yes() from S to C; } or { No() from S to C; }
         }";
        let run = |seed| {
            let config = CfgSimulatorConfig {
                choice_strategy: ChoiceStrategy::Random,
                seed: Some(seed),
                ..Default::default()
            };
            let mut sim = CfgSimulator::new(cfg_of(source), config);
            sim.run().unwrap();
            message_labels(&sim)
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_manual_choice_flow() {
        let cfg = cfg_of(
            "global protocol P(role S, role C) {
                 choice at S { Yes() from S to C; } or { No() from S to C; }
             }",
        );
        let config = CfgSimulatorConfig {
            choice_strategy: ChoiceStrategy::Manual,
            ..Default::default()
        };
        let mut sim = CfgSimulator::new(cfg, config);

        let outcome = sim.step().unwrap();
        let options = match outcome {
            CfgStepOutcome::AwaitingChoice { options, .. } => options,
            other => panic!("Expected choice point, got {:?}", other),
        };
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].label.as_deref(), Some("Yes"));
        assert_eq!(options[1].label.as_deref(), Some("No"));

        // Bad selections are rejected without corrupting the state.
        assert!(matches!(
            sim.choose(5),
            Err(SimulationError::InvalidChoice { available: 2, .. })
        ));
        sim.choose(1).unwrap();
        let summary = sim.run().unwrap();
        assert!(summary.completed);
        assert_eq!(message_labels(&sim), vec!["No"]);
    }

    #[test]
    fn test_choose_outside_choice_rejected() {
        let cfg = cfg_of("global protocol P(role A, role B) { M() from A to B; }");
        let mut sim = CfgSimulator::new(cfg, CfgSimulatorConfig::default());
        assert!(matches!(sim.choose(0), Err(SimulationError::NotAtChoice)));
    }

    #[test]
    fn test_streaming_recursion_halts_at_max_steps() {
        // The first strategy always picks More, so the run
        // loops until the step budget is spent.
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
        let config = CfgSimulatorConfig {
            max_steps: 5,
            ..Default::default()
        };
        let mut sim = CfgSimulator::new(cfg, config);

        let summary = sim.run().unwrap();
        assert!(summary.reached_max_steps);
        assert!(!summary.completed);
        assert_eq!(summary.total_steps, 5);
        // Only More/Data traffic, never Done.
        assert!(message_labels(&sim).iter().all(|l| l != "Done"));
        assert!(sim
            .trace()
            .events
            .iter()
            .any(|e| matches!(e.event, TraceEvent::RecursionContinue { .. })));
    }

    #[test]
    fn test_parallel_round_robin_interleaves() {
        let cfg = cfg_of(
            "global protocol P(role A, role B, role C, role D) {
                 par { M1() from A to B; M2() from A to B; }
                 and { N1() from C to D; N2() from C to D; }
             }",
        );
        let mut sim = CfgSimulator::new(cfg, CfgSimulatorConfig::default());
        let summary = sim.run().unwrap();
        assert!(summary.completed);
        // One action per branch in turn.
        assert_eq!(message_labels(&sim), vec!["M1", "N1", "M2", "N2"]);
        let forks = sim
            .trace()
            .events
            .iter()
            .filter(|e| matches!(e.event, TraceEvent::Fork { .. }))
            .count();
        let joins = sim
            .trace()
            .events
            .iter()
            .filter(|e| matches!(e.event, TraceEvent::Join { .. }))
            .count();
        assert_eq!((forks, joins), (1, 1));
    }

    #[test]
    fn test_nested_parallel_completes() {
        let cfg = cfg_of(
            "global protocol P(role A, role B, role C, role D) {
                 par {
                     par { M1() from A to B; } and { M2() from C to D; }
                 } and {
                     N() from A to D;
                 }
             }",
        );
        let mut sim = CfgSimulator::new(cfg, CfgSimulatorConfig::default());
        let summary = sim.run().unwrap();
        assert!(summary.completed);
        let mut labels = message_labels(&sim);
        labels.sort();
        assert_eq!(labels, vec!["M1", "M2", "N"]);
    }

    #[test]
    fn test_subprotocol_requires_registry() {
        let cfg = cfg_of("global protocol P(role A, role B) { do Sub(A, B); }");
        let mut sim = CfgSimulator::new(cfg, CfgSimulatorConfig::default());
        assert!(matches!(
            sim.run(),
            Err(SimulationError::SubProtocolNotFound { .. })
        ));
    }

    #[test]
    fn test_subprotocol_runs_inline_with_renamed_roles() {
        let module = parse(
            "global protocol Outer(role A, role B) {
                 Start() from A to B;
                 do Inner(B, A);
                 End() from A to B;
             }
             global protocol Inner(role P, role Q) {
                 Ping() from P to Q;
             }",
        )
        .unwrap();
        let registry = Arc::new(ProtocolRegistry::from_module(&module).unwrap());
        let cfg = registry.cfg("Outer").unwrap();
        let mut sim =
            CfgSimulator::new(cfg, CfgSimulatorConfig::default()).with_registry(registry);

        let summary = sim.run().unwrap();
        assert!(summary.completed);
        assert_eq!(message_labels(&sim), vec!["Start", "Ping", "End"]);

        // Inner's Ping goes P -> Q, mapped to the actual roles B -> A.
        let ping = sim
            .trace()
            .events
            .iter()
            .find_map(|e| match &e.event {
                TraceEvent::Message { from, to, label, .. } if label == "Ping" => {
                    Some((from.clone(), to.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(ping.0, "B");
        assert_eq!(ping.1, vec!["A"]);

        let enters = sim
            .trace()
            .events
            .iter()
            .filter(|e| matches!(e.event, TraceEvent::SubProtocolEnter { .. }))
            .count();
        assert_eq!(enters, 1);
    }

    #[test]
    fn test_reset_allows_fresh_run() {
        let cfg = cfg_of("global protocol P(role A, role B) { M() from A to B; }");
        let mut sim = CfgSimulator::new(cfg, CfgSimulatorConfig::default());
        sim.run().unwrap();
        sim.reset();
        assert!(!sim.is_completed());
        let summary = sim.run().unwrap();
        assert!(summary.completed);
        assert_eq!(message_labels(&sim), vec!["M"]);
    }
}
