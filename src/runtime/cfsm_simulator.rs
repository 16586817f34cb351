// runtime/cfsm_simulator.rs - Local Asynchronous CFSM Simulator

use super::call_stack::{CallFrame, CallStackConfig, CallStackManager};
use super::event::{TraceEvent, TraceRecorder};
use super::message::{Message, MessageBuffer, MessageClock};
use super::{RoleSnapshot, SimulationError};
use crate::project::{Cfsm, CfsmAction, Projector, StateId, Transition};
use crate::registry::ProtocolRegistry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// How the next enabled transition is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionStrategy {
    #[default]
    First,
    Random,
}

/// Configuration of one role's simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfsmSimulatorConfig {
    /// Per-sender queue bound; 0 = unbounded
    pub max_buffer_size: usize,

    pub record_trace: bool,
    pub transition_strategy: TransitionStrategy,

    /// Check the FIFO property on every receive
    pub verify_fifo: bool,

    /// Local step budget for standalone runs
    pub max_steps: u64,

    /// Seed for the random strategy
    pub seed: Option<u64>,

    /// Limits of this simulator's own call stack
    pub call_stack: CallStackConfig,
}

impl Default for CfsmSimulatorConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 0,
            record_trace: true,
            transition_strategy: TransitionStrategy::First,
            verify_fifo: true,
            max_steps: 10_000,
            seed: None,
            call_stack: CallStackConfig::default(),
        }
    }
}

/// What one local step did.
#[derive(Debug, Clone, PartialEq)]
pub enum CfsmStepOutcome {
    Sent { to: String, label: String },
    Received { from: String, label: String },
    Tau,
    Choice,
    SubProtocolEntered { protocol: String },
    /// The machine is in its terminal state
    Completed,
    /// Non-terminal with no enabled transition
    Deadlock,
    MaxStepsReached,
}

/// Final state of a standalone local run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalRunSummary {
    pub completed: bool,
    pub deadlocked: bool,
    pub reached_max_steps: bool,
    pub total_steps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Running,
    Completed,
    Deadlocked,
    Halted,
}

/// One machine on the execution stack: the root CFSM, or a sub-protocol
/// projection entered through a `do`.
struct ActiveMachine {
    cfsm: Arc<Cfsm>,
    state: StateId,
}

/// Asynchronous execution of one role's CFSM.
///
/// The configuration is `(q, sigma)`: the current control state plus one
/// FIFO queue per sending peer. Sends never block; a receive is enabled
/// only when the head of the matching queue carries the right label; tau,
/// choices and sub-protocol calls are always enabled.
pub struct CfsmSimulator {
    role: String,
    machines: Vec<ActiveMachine>,
    buffers: MessageBuffer,
    outbox: VecDeque<Message>,
    clock: MessageClock,
    registry: Option<Arc<ProtocolRegistry>>,

    config: CfsmSimulatorConfig,
    status: Status,
    steps: u64,
    stack: CallStackManager,
    recorder: TraceRecorder,
    rng: StdRng,
}

impl CfsmSimulator {
    pub fn new(cfsm: impl Into<Arc<Cfsm>>, config: CfsmSimulatorConfig) -> Self {
        let cfsm = cfsm.into();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            role: cfsm.role.clone(),
            machines: vec![ActiveMachine {
                state: cfsm.initial.clone(),
                cfsm,
            }],
            buffers: MessageBuffer::bounded(config.max_buffer_size),
            outbox: VecDeque::new(),
            clock: MessageClock::new(),
            registry: None,
            stack: CallStackManager::new(config.call_stack.clone()),
            recorder: TraceRecorder::new(config.record_trace),
            rng,
            config,
            status: Status::Running,
            steps: 0,
        }
    }

    /// Attach a registry so `do` transitions can enter sub-protocol
    /// projections.
    pub fn with_registry(mut self, registry: Arc<ProtocolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share a clock with other simulators of the same run; the distributed
    /// coordinator uses this so timestamps are ordered across senders.
    pub fn with_clock(mut self, clock: MessageClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn state(&self) -> &StateId {
        &self.machines.last().expect("root machine").state
    }

    /// Terminal means: back on the root machine, in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.machines.len() == 1
            && self.machines[0].cfsm.is_terminal(&self.machines[0].state)
    }

    pub fn total_steps(&self) -> u64 {
        self.steps
    }

    pub fn trace(&self) -> &super::Trace {
        self.recorder.trace()
    }

    pub fn into_trace(self) -> super::Trace {
        self.recorder.into_trace()
    }

    pub fn events(&self) -> &[super::TracedEvent] {
        &self.recorder.trace().events
    }

    /// Currently enabled transitions of the active machine.
    pub fn enabled(&self) -> Vec<Transition> {
        let machine = self.machines.last().expect("root machine");
        machine
            .cfsm
            .transitions_from(&machine.state)
            .filter(|t| match &t.action {
                CfsmAction::Receive { from, label, .. } => self
                    .buffers
                    .head(from)
                    .is_some_and(|head| &head.label == label),
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled().len()
    }

    /// Deliver an incoming message into its sender's queue. A delivery can
    /// unblock a locally deadlocked machine.
    pub fn deliver(&mut self, message: Message) -> Result<usize, SimulationError> {
        if self.status == Status::Deadlocked {
            self.status = Status::Running;
        }
        let from = message.sender.clone();
        let label = message.label.clone();
        let depth = self.buffers.deliver(message).map_err(|e| {
            self.recorder.record(TraceEvent::Error {
                message: e.to_string(),
                role: Some(self.role.clone()),
            });
            SimulationError::from(e)
        })?;
        self.recorder.record(TraceEvent::BufferEnqueue {
            role: self.role.clone(),
            from,
            label,
            depth,
        });
        Ok(depth)
    }

    /// Messages produced since the last drain, in send order.
    pub fn take_outbox(&mut self) -> Vec<Message> {
        self.outbox.drain(..).collect()
    }

    pub fn snapshot(&self) -> RoleSnapshot {
        RoleSnapshot {
            state: self.state().to_string(),
            terminal: self.is_terminal(),
            enabled: self.enabled_count(),
            buffers: self.buffers.snapshot(),
        }
    }

    /// Fire exactly one enabled transition.
    pub fn step(&mut self) -> Result<CfsmStepOutcome, SimulationError> {
        match self.status {
            Status::Completed => return Ok(CfsmStepOutcome::Completed),
            Status::Deadlocked => return Ok(CfsmStepOutcome::Deadlock),
            Status::Halted => return Err(SimulationError::AlreadyCompleted),
            Status::Running => {}
        }

        if self.is_terminal() {
            self.complete();
            return Ok(CfsmStepOutcome::Completed);
        }
        if self.steps >= self.config.max_steps {
            self.recorder.finish(false, self.steps);
            return Ok(CfsmStepOutcome::MaxStepsReached);
        }

        let enabled = self.enabled();
        if enabled.is_empty() {
            self.status = Status::Deadlocked;
            self.recorder.record(TraceEvent::Deadlock {
                role: Some(self.role.clone()),
                snapshot: Some(BTreeMap::from([(self.role.clone(), self.snapshot())])),
            });
            self.recorder.finish(false, self.steps);
            debug!(role = %self.role, state = %self.state(), "local deadlock");
            return Ok(CfsmStepOutcome::Deadlock);
        }

        self.steps += 1;
        self.recorder.record(TraceEvent::StepStart {
            step: self.steps,
            role: Some(self.role.clone()),
        });

        let index = match self.config.transition_strategy {
            TransitionStrategy::First => 0,
            TransitionStrategy::Random => self.rng.random_range(0..enabled.len()),
        };
        let transition = enabled[index].clone();
        let outcome = self.fire(&transition)?;

        self.unwind_finished_machines();
        if self.is_terminal() {
            self.complete();
        }

        self.recorder.record(TraceEvent::StepEnd {
            step: self.steps,
            role: Some(self.role.clone()),
        });
        Ok(outcome)
    }

    /// Step until terminal, deadlock, or the step budget runs out.
    pub fn run(&mut self) -> Result<LocalRunSummary, SimulationError> {
        loop {
            match self.step()? {
                CfsmStepOutcome::Completed
                | CfsmStepOutcome::Deadlock
                | CfsmStepOutcome::MaxStepsReached => break,
                _ => {}
            }
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> LocalRunSummary {
        LocalRunSummary {
            completed: self.status == Status::Completed,
            deadlocked: self.status == Status::Deadlocked,
            reached_max_steps: self.status == Status::Running
                && self.steps >= self.config.max_steps,
            total_steps: self.steps,
        }
    }

    // ---- internals --------------------------------------------------------

    fn complete(&mut self) {
        if self.status != Status::Completed {
            self.status = Status::Completed;
            self.recorder.record(TraceEvent::Complete {
                steps: self.steps,
                role: Some(self.role.clone()),
            });
            self.recorder.finish(true, self.steps);
        }
    }

    fn halt<T>(&mut self, error: SimulationError) -> Result<T, SimulationError> {
        self.status = Status::Halted;
        self.recorder.record(TraceEvent::Error {
            message: error.to_string(),
            role: Some(self.role.clone()),
        });
        self.recorder.finish(false, self.steps);
        Err(error)
    }

    fn set_state(&mut self, state: StateId) {
        self.machines.last_mut().expect("root machine").state = state;
    }

    fn record_fired(&mut self, transition: &Transition) {
        self.recorder.record(TraceEvent::TransitionFired {
            role: self.role.clone(),
            from: transition.from.to_string(),
            to: transition.to.to_string(),
            action: transition.action.to_string(),
        });
        self.stack.step(transition.to.as_str());
        for event in self.stack.take_events() {
            self.recorder.record(event);
        }
    }

    fn fire(&mut self, transition: &Transition) -> Result<CfsmStepOutcome, SimulationError> {
        match transition.action.clone() {
            CfsmAction::Send { to, label, payload } => {
                let message = Message::new(
                    self.role.clone(),
                    to.clone(),
                    label.clone(),
                    if payload.is_empty() {
                        None
                    } else {
                        Some(payload.join(", "))
                    },
                    self.clock.next(),
                );
                self.recorder.record(TraceEvent::Send {
                    role: self.role.clone(),
                    to: to.clone(),
                    label: label.clone(),
                    timestamp: message.timestamp,
                });
                self.outbox.push_back(message);
                self.record_fired(transition);
                self.set_state(transition.to.clone());
                Ok(CfsmStepOutcome::Sent { to, label })
            }

            CfsmAction::Receive { from, label, .. } => {
                if self.config.verify_fifo && !self.buffers.head_is_oldest(&from) {
                    let queue = self
                        .buffers
                        .snapshot()
                        .remove(&from)
                        .unwrap_or_default();
                    return self.halt(SimulationError::FifoViolation {
                        role: self.role.clone(),
                        sender: from,
                        queue,
                    });
                }
                let message = self
                    .buffers
                    .pop(&from)
                    .expect("enabled receive has a queued message");
                self.recorder.record(TraceEvent::BufferDequeue {
                    role: self.role.clone(),
                    from: from.clone(),
                    label: label.clone(),
                    depth: self.buffers.depth(&from),
                });
                self.recorder.record(TraceEvent::Receive {
                    role: self.role.clone(),
                    from: from.clone(),
                    label: label.clone(),
                    timestamp: message.timestamp,
                });
                self.record_fired(transition);
                self.set_state(transition.to.clone());
                Ok(CfsmStepOutcome::Received { from, label })
            }

            CfsmAction::Tau => {
                self.recorder.record(TraceEvent::Tau {
                    role: self.role.clone(),
                    state: transition.from.to_string(),
                });
                self.record_fired(transition);
                self.set_state(transition.to.clone());
                Ok(CfsmStepOutcome::Tau)
            }

            CfsmAction::Choice { decider } => {
                self.recorder.record(TraceEvent::Choice {
                    role: self.role.clone(),
                    state: transition.from.to_string(),
                    decider,
                });
                self.record_fired(transition);
                self.set_state(transition.to.clone());
                Ok(CfsmStepOutcome::Choice)
            }

            CfsmAction::SubProtocolCall {
                protocol,
                arguments,
                role_mapping,
                return_state: _,
            } => {
                let Some(registry) = self.registry.clone() else {
                    return self.halt(SimulationError::SubProtocolNotFound { protocol });
                };
                let mapping = if role_mapping.is_empty() {
                    match registry.role_mapping(&protocol, &arguments) {
                        Ok(mapping) => mapping,
                        Err(e) => return self.halt(e.into()),
                    }
                } else {
                    role_mapping
                };

                // Our formal identity inside the callee.
                let Some(formal) = mapping
                    .iter()
                    .find(|(_, actual)| actual.as_str() == self.role)
                    .map(|(formal, _)| formal.clone())
                else {
                    return self.halt(SimulationError::UnknownRole {
                        role: self.role.clone(),
                    });
                };

                let sub_cfg = match registry.cfg(&protocol) {
                    Ok(cfg) => cfg,
                    Err(e) => return self.halt(e.into()),
                };
                let projection = Projector::new(&sub_cfg)
                    .with_registry(&registry)
                    .project(&formal);
                let sub_cfsm = match projection {
                    Ok(cfsm) => cfsm.rename_roles(&mapping),
                    Err(e) => return self.halt(e.into()),
                };

                if let Err(e) = self.stack.push(CallFrame::subprotocol(
                    protocol.clone(),
                    transition.from.as_str(),
                    transition.to.as_str(),
                    mapping,
                )) {
                    return self.halt(e.into());
                }
                self.recorder.record(TraceEvent::SubProtocolEnter {
                    protocol: protocol.clone(),
                });
                self.record_fired(transition);
                debug!(role = %self.role, protocol = %protocol, "entering sub-protocol projection");

                let initial = sub_cfsm.initial.clone();
                self.machines.push(ActiveMachine {
                    cfsm: Arc::new(sub_cfsm),
                    state: initial,
                });
                Ok(CfsmStepOutcome::SubProtocolEntered { protocol })
            }
        }
    }

    /// Pop sub-machines that reached their terminal state and resume the
    /// caller at the recorded return state.
    fn unwind_finished_machines(&mut self) {
        while self.machines.len() > 1 {
            let top = self.machines.last().expect("active machine");
            if !top.cfsm.is_terminal(&top.state) {
                return;
            }
            let protocol = top.cfsm.protocol.clone();
            self.machines.pop();
            match self.stack.pop() {
                Ok(frame) => {
                    self.machines.last_mut().expect("caller machine").state =
                        StateId::from(frame.exit.as_str());
                }
                Err(_) => return,
            }
            for event in self.stack.take_events() {
                self.recorder.record(event);
            }
            self.recorder
                .record(TraceEvent::SubProtocolExit { protocol });
        }
    }
}
