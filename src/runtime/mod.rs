// runtime/mod.rs - Simulation Runtimes

//! The three operational semantics over one event vocabulary.
//!
//! - [`CfgSimulator`]: a single coordinator walks the global CFG; send and
//!   receive collapse into one atomic `message` event. The teaching view.
//! - [`CfsmSimulator`]: one role executes its projected CFSM against
//!   per-sender FIFO buffers; sends never block, receives wait for a
//!   matching head-of-queue.
//! - [`DistributedSimulator`]: one CFSM simulator per role, a coordinator
//!   that schedules, delivers, and detects global deadlock.
//!
//! All runtimes are single-threaded and cooperative: every `step` fires at
//! most one observable event and returns. Bounded halts (step caps, buffer
//! bounds, stack limits) are distinct from protocol violations.

mod call_stack;
mod cfg_simulator;
mod cfsm_simulator;
mod distributed;
mod event;
mod message;

pub use call_stack::{CallFrame, CallStackConfig, CallStackError, CallStackManager, FrameKind};
pub use cfg_simulator::{
    CfgSimulator, CfgSimulatorConfig, CfgStepOutcome, ChoiceStrategy, RunSummary,
};
pub use cfsm_simulator::{
    CfsmSimulator, CfsmSimulatorConfig, CfsmStepOutcome, LocalRunSummary, TransitionStrategy,
};
pub use distributed::{
    DeliveryModel, DistributedConfig, DistributedSimulator, GlobalOutcome, GlobalRunSummary,
    SchedulingStrategy,
};
pub use event::{
    rename_event_roles, ChoiceOption, RoleSnapshot, Trace, TraceEvent, TraceRecorder, TracedEvent,
};
pub use message::{BufferOverflow, Message, MessageBuffer, MessageClock};

use crate::project::ProjectionError;
use crate::registry::RegistryError;

/// Runtime failures on the simulator boundary.
///
/// Simulators return these on the step that produced them and stay in a
/// well-defined halted state so callers can inspect the final
/// configuration. Bounded halts carried inside [`CallStackError`] and
/// [`BufferOverflow`] mean "stopped early", not "the protocol is wrong".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("simulation already completed")]
    AlreadyCompleted,

    #[error("current node {node} does not exist in the CFG")]
    InvalidNode { node: String },

    #[error("node {node} has no outgoing edges")]
    NoOutgoingEdges { node: String },

    #[error("invalid choice index {index}: {available} branches available")]
    InvalidChoice { index: usize, available: usize },

    #[error("not at a choice point")]
    NotAtChoice,

    #[error("sub-protocol not found: {protocol}")]
    SubProtocolNotFound { protocol: String },

    #[error("structural cycle detected at node {node}")]
    StructuralLoop { node: String },

    /// A nested sub-protocol run spent its whole step budget
    #[error("sub-protocol {protocol} did not complete within {steps} steps")]
    ReachedMaxSteps { protocol: String, steps: u64 },

    #[error("no simulator for role {role}")]
    UnknownRole { role: String },

    /// The head of a queue was not the oldest message in it. A well-formed
    /// coordinator cannot produce this; it is a bug in the environment.
    #[error("FIFO violation at {role}: queue from {sender} is {queue:?}")]
    FifoViolation {
        role: String,
        sender: String,
        queue: Vec<(String, u64)>,
    },

    #[error(transparent)]
    BufferOverflow(#[from] BufferOverflow),

    #[error(transparent)]
    CallStack(#[from] CallStackError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}
