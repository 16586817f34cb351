// runtime/distributed.rs - Distributed Simulator

use super::cfsm_simulator::{CfsmSimulator, CfsmSimulatorConfig, CfsmStepOutcome};
use super::call_stack::CallStackConfig;
use super::event::{RoleSnapshot, TraceEvent, TraceRecorder};
use super::message::{Message, MessageClock};
use super::SimulationError;
use crate::project::Cfsm;
use crate::registry::ProtocolRegistry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// How the coordinator picks the next role to step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// Cycle through roles in name order
    #[default]
    RoundRobin,
    /// Least-scheduled enabled role first
    Fair,
    /// Uniformly random enabled role
    Random,
}

/// How drained messages are handed to receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryModel {
    /// Deliver in production order
    #[default]
    Fifo,
    /// Interleave deliveries to different receivers randomly; order within
    /// one (sender, receiver) pair is still preserved, so the FIFO
    /// property holds under both models
    Unordered,
}

/// Configuration of the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    pub scheduling_strategy: SchedulingStrategy,
    pub delivery_model: DeliveryModel,

    /// Global step budget before a bounded halt
    pub max_global_steps: u64,

    pub record_trace: bool,

    /// Per-sender queue bound forwarded to every role; 0 = unbounded
    pub max_buffer_size: usize,

    /// FIFO verification forwarded to every role
    pub verify_fifo: bool,

    /// Seed for the random strategies
    pub seed: Option<u64>,

    /// Call-stack limits forwarded to every role
    pub call_stack: CallStackConfig,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            scheduling_strategy: SchedulingStrategy::RoundRobin,
            delivery_model: DeliveryModel::Fifo,
            max_global_steps: 10_000,
            record_trace: true,
            max_buffer_size: 0,
            verify_fifo: true,
            seed: None,
            call_stack: CallStackConfig::default(),
        }
    }
}

/// What one global step did.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalOutcome {
    Stepped {
        role: String,
        outcome: CfsmStepOutcome,
    },
    Completed,
    Deadlock,
    MaxStepsReached,
}

/// Final state of a distributed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalRunSummary {
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
    MaxSteps,
    Halted,
}

/// Coordinator over one CFSM simulator per role.
///
/// The coordinator exclusively owns the role map for the duration of the
/// run: it schedules one local step at a time, drains the stepped role's
/// outbox, delivers into receiver buffers, and declares global deadlock
/// when no role can move but some are not terminal.
pub struct DistributedSimulator {
    sims: BTreeMap<String, CfsmSimulator>,
    order: Vec<String>,

    config: DistributedConfig,
    status: Status,
    steps: u64,
    rr_next: usize,
    scheduled: BTreeMap<String, u64>,

    /// Per-role count of events already copied into the global trace
    watermarks: BTreeMap<String, usize>,

    recorder: TraceRecorder,
    rng: StdRng,
}

impl DistributedSimulator {
    pub fn new(cfsms: BTreeMap<String, Cfsm>, config: DistributedConfig) -> Self {
        let clock = MessageClock::new();
        let local_config = CfsmSimulatorConfig {
            max_buffer_size: config.max_buffer_size,
            record_trace: config.record_trace,
            verify_fifo: config.verify_fifo,
            max_steps: u64::MAX,
            seed: config.seed,
            call_stack: config.call_stack.clone(),
            ..Default::default()
        };

        let sims: BTreeMap<String, CfsmSimulator> = cfsms
            .into_iter()
            .map(|(role, cfsm)| {
                let sim = CfsmSimulator::new(cfsm, local_config.clone())
                    .with_clock(clock.clone());
                (role, sim)
            })
            .collect();

        let order: Vec<String> = sims.keys().cloned().collect();
        let scheduled = order.iter().map(|r| (r.clone(), 0)).collect();
        let watermarks = order.iter().map(|r| (r.clone(), 0)).collect();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            sims,
            order,
            recorder: TraceRecorder::new(config.record_trace),
            config,
            status: Status::Running,
            steps: 0,
            rr_next: 0,
            scheduled,
            watermarks,
            rng,
        }
    }

    /// Forward a registry to every role simulator for `do` transitions.
    pub fn with_registry(mut self, registry: Arc<ProtocolRegistry>) -> Self {
        self.sims = self
            .sims
            .into_iter()
            .map(|(role, sim)| (role, sim.with_registry(registry.clone())))
            .collect();
        self
    }

    pub fn roles(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub fn simulator(&self, role: &str) -> Option<&CfsmSimulator> {
        self.sims.get(role)
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

    /// Per-role state snapshot.
    pub fn snapshot(&self) -> BTreeMap<String, RoleSnapshot> {
        self.sims
            .iter()
            .map(|(role, sim)| (role.clone(), sim.snapshot()))
            .collect()
    }

    fn all_terminal(&self) -> bool {
        self.sims.values().all(CfsmSimulator::is_terminal)
    }

    fn enabled_roles(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|role| {
                let sim = &self.sims[*role];
                !sim.is_terminal() && sim.enabled_count() > 0
            })
            .cloned()
            .collect()
    }

    /// Schedule one role, delegate one local step, deliver its output.
    pub fn step(&mut self) -> Result<GlobalOutcome, SimulationError> {
        match self.status {
            Status::Completed => return Ok(GlobalOutcome::Completed),
            Status::Deadlocked => return Ok(GlobalOutcome::Deadlock),
            Status::MaxSteps => return Ok(GlobalOutcome::MaxStepsReached),
            Status::Halted => return Err(SimulationError::AlreadyCompleted),
            Status::Running => {}
        }

        if self.all_terminal() {
            return Ok(self.complete());
        }
        if self.steps >= self.config.max_global_steps {
            self.status = Status::MaxSteps;
            self.recorder.finish(false, self.steps);
            debug!(steps = self.steps, "max global steps reached");
            return Ok(GlobalOutcome::MaxStepsReached);
        }

        let enabled = self.enabled_roles();
        if enabled.is_empty() {
            return Ok(self.declare_deadlock());
        }

        let role = match self.config.scheduling_strategy {
            SchedulingStrategy::RoundRobin => {
                let start = self.rr_next;
                let mut chosen = enabled[0].clone();
                for offset in 0..self.order.len() {
                    let candidate = &self.order[(start + offset) % self.order.len()];
                    if enabled.contains(candidate) {
                        chosen = candidate.clone();
                        self.rr_next = (self.order.iter().position(|r| r == &chosen).unwrap()
                            + 1)
                            % self.order.len();
                        break;
                    }
                }
                chosen
            }
            SchedulingStrategy::Fair => enabled
                .iter()
                .min_by_key(|role| self.scheduled[*role])
                .expect("non-empty enabled set")
                .clone(),
            SchedulingStrategy::Random => {
                enabled[self.rng.random_range(0..enabled.len())].clone()
            }
        };

        let outcome = self.delegate(&role)?;
        if self.all_terminal() {
            self.complete();
        }
        Ok(GlobalOutcome::Stepped { role, outcome })
    }

    /// Drive one specific role, bypassing the scheduling strategy. Useful
    /// for scripted schedules, including deliberately unfair ones.
    pub fn step_role(&mut self, role: &str) -> Result<CfsmStepOutcome, SimulationError> {
        if !self.sims.contains_key(role) {
            return Err(SimulationError::UnknownRole {
                role: role.to_string(),
            });
        }
        let outcome = self.delegate(role)?;
        if self.all_terminal() {
            self.complete();
        }
        Ok(outcome)
    }

    /// Step until every role is terminal, global deadlock, or the step
    /// budget runs out.
    pub fn run(&mut self) -> Result<GlobalRunSummary, SimulationError> {
        loop {
            match self.step()? {
                GlobalOutcome::Completed
                | GlobalOutcome::Deadlock
                | GlobalOutcome::MaxStepsReached => break,
                GlobalOutcome::Stepped { .. } => {}
            }
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> GlobalRunSummary {
        GlobalRunSummary {
            completed: self.status == Status::Completed,
            deadlocked: self.status == Status::Deadlocked,
            reached_max_steps: self.status == Status::MaxSteps,
            total_steps: self.steps,
        }
    }

    // ---- internals --------------------------------------------------------

    fn complete(&mut self) -> GlobalOutcome {
        if self.status != Status::Completed {
            self.status = Status::Completed;
            self.recorder.record(TraceEvent::Complete {
                steps: self.steps,
                role: None,
            });
            self.recorder.finish(true, self.steps);
            debug!(steps = self.steps, "distributed run complete");
        }
        GlobalOutcome::Completed
    }

    fn declare_deadlock(&mut self) -> GlobalOutcome {
        self.status = Status::Deadlocked;
        self.recorder.record(TraceEvent::Deadlock {
            role: None,
            snapshot: Some(self.snapshot()),
        });
        self.recorder.finish(false, self.steps);
        debug!(steps = self.steps, "global deadlock");
        GlobalOutcome::Deadlock
    }

    fn delegate(&mut self, role: &str) -> Result<CfsmStepOutcome, SimulationError> {
        self.steps += 1;
        *self.scheduled.get_mut(role).expect("known role") += 1;

        let sim = self.sims.get_mut(role).expect("known role");
        let result = sim.step();
        let outbox = sim.take_outbox();
        self.aggregate(role);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.status = Status::Halted;
                self.recorder.finish(false, self.steps);
                return Err(e);
            }
        };

        self.deliver_batch(outbox)?;
        Ok(outcome)
    }

    /// Deliver a drained batch. All messages come from one sender, so
    /// preserving order within each receiver group keeps per-pair FIFO
    /// under either model.
    fn deliver_batch(&mut self, messages: Vec<Message>) -> Result<(), SimulationError> {
        let ordered: Vec<Message> = match self.config.delivery_model {
            DeliveryModel::Fifo => messages,
            DeliveryModel::Unordered => {
                let mut groups: BTreeMap<String, std::collections::VecDeque<Message>> =
                    BTreeMap::new();
                for message in messages {
                    groups
                        .entry(message.receiver.clone())
                        .or_default()
                        .push_back(message);
                }
                let mut interleaved = Vec::new();
                while !groups.is_empty() {
                    let keys: Vec<String> = groups.keys().cloned().collect();
                    let key = &keys[self.rng.random_range(0..keys.len())];
                    let queue = groups.get_mut(key).expect("chosen group");
                    if let Some(message) = queue.pop_front() {
                        interleaved.push(message);
                    }
                    if queue.is_empty() {
                        groups.remove(key);
                    }
                }
                interleaved
            }
        };

        for message in ordered {
            let receiver = message.receiver.clone();
            let Some(sim) = self.sims.get_mut(&receiver) else {
                self.status = Status::Halted;
                return Err(SimulationError::UnknownRole { role: receiver });
            };
            let result = sim.deliver(message);
            self.aggregate(&receiver);
            if let Err(e) = result {
                self.status = Status::Halted;
                self.recorder.finish(false, self.steps);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Copy a role's fresh events into the global trace.
    fn aggregate(&mut self, role: &str) {
        if !self.config.record_trace {
            return;
        }
        let sim = &self.sims[role];
        let events = sim.events();
        let watermark = self.watermarks.get_mut(role).expect("known role");
        for entry in &events[*watermark..] {
            self.recorder.record(entry.event.clone());
        }
        *watermark = events.len();
    }
}
