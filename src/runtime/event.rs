// runtime/event.rs - Simulation Trace Events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One option offered at a choice point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub index: usize,

    /// First message label of the branch, when the branch has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Branch entry node
    pub target: String,

    /// Up to `preview_limit` upcoming message labels along the branch
    pub preview: Vec<String>,
}

/// Per-role state snapshot attached to deadlock reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub state: String,
    pub terminal: bool,
    pub enabled: usize,

    /// Buffer contents as `(label, timestamp)` per sender
    pub buffers: BTreeMap<String, Vec<(String, u64)>>,
}

/// Every event the simulators can emit, in one tagged stream.
///
/// The CFG simulator uses the orchestration events (node, message, choice,
/// fork, recursion, sub-protocol); CFSM simulators use the local-execution
/// events (transition, send, receive, buffer); the call-stack manager
/// contributes frame events; the distributed coordinator aggregates all of
/// them and adds global deadlock/completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TraceEvent {
    StepStart {
        step: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    StepEnd {
        step: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    // -- orchestrated walk ---------------------------------------------
    NodeEnter {
        node: String,
    },
    NodeExit {
        node: String,
    },
    /// Atomic send-and-receive of the orchestrated semantics
    Message {
        id: Uuid,
        from: String,
        to: Vec<String>,
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<String>,
    },
    ChoicePoint {
        node: String,
        options: Vec<ChoiceOption>,
    },
    ChoiceSelected {
        node: String,
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Fork {
        node: String,
        parallel_id: String,
    },
    Join {
        node: String,
        parallel_id: String,
    },
    RecursionEnter {
        node: String,
        label: String,
    },
    RecursionContinue {
        node: String,
        label: String,
        iteration: u64,
    },
    RecursionExit {
        node: String,
        label: String,
    },
    SubProtocolEnter {
        protocol: String,
    },
    SubProtocolExit {
        protocol: String,
    },

    // -- local asynchronous execution ----------------------------------
    TransitionFired {
        role: String,
        from: String,
        to: String,
        action: String,
    },
    Send {
        role: String,
        to: String,
        label: String,
        timestamp: u64,
    },
    Receive {
        role: String,
        from: String,
        label: String,
        timestamp: u64,
    },
    Tau {
        role: String,
        state: String,
    },
    Choice {
        role: String,
        state: String,
        decider: String,
    },
    BufferEnqueue {
        role: String,
        from: String,
        label: String,
        depth: usize,
    },
    BufferDequeue {
        role: String,
        from: String,
        label: String,
        depth: usize,
    },

    // -- call stack ----------------------------------------------------
    FramePush {
        kind: String,
        protocol: String,
        depth: usize,
    },
    FramePop {
        protocol: String,
        depth: usize,
        duration_micros: u64,
    },
    FrameStep {
        node: String,
        steps: u64,
    },
    StackReset,

    // -- outcomes ------------------------------------------------------
    Complete {
        steps: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    Deadlock {
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        snapshot: Option<BTreeMap<String, RoleSnapshot>>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
}

/// An event with its position in the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracedEvent {
    /// Monotone event sequence number within the run
    pub timestamp: u64,

    #[serde(flatten)]
    pub event: TraceEvent,
}

/// An append-only execution trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub started_at: DateTime<Utc>,
    pub events: Vec<TracedEvent>,
    pub completed: bool,
    pub total_steps: u64,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            events: Vec::new(),
            completed: false,
            total_steps: 0,
        }
    }
}

impl Trace {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("trace serialisation cannot fail")
    }
}

/// Records events into a [`Trace`] when recording is enabled; events are
/// always forwarded to `tracing` for live observation either way.
#[derive(Debug, Clone)]
pub struct TraceRecorder {
    trace: Trace,
    record: bool,
    next_seq: u64,
}

impl TraceRecorder {
    pub fn new(record: bool) -> Self {
        Self {
            trace: Trace::default(),
            record,
            next_seq: 0,
        }
    }

    pub fn record(&mut self, event: TraceEvent) {
        tracing::trace!(?event, "simulation event");
        if self.record {
            self.trace.events.push(TracedEvent {
                timestamp: self.next_seq,
                event,
            });
        }
        self.next_seq += 1;
    }

    pub fn finish(&mut self, completed: bool, total_steps: u64) {
        self.trace.completed = completed;
        self.trace.total_steps = total_steps;
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }

    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace.events.iter().map(|e| &e.event)
    }

    pub fn len(&self) -> usize {
        self.trace.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.events.is_empty()
    }

    /// Append another trace's events, renumbering them after ours and
    /// applying a role renaming (used when a sub-protocol run is merged
    /// into its caller with formal roles mapped to actuals).
    pub fn merge(&mut self, other: Trace, mapping: &BTreeMap<String, String>) {
        for entry in other.events {
            self.record(rename_event_roles(entry.event, mapping));
        }
    }
}

fn rename(name: String, mapping: &BTreeMap<String, String>) -> String {
    mapping.get(&name).cloned().unwrap_or(name)
}

/// Substitute role names in an event.
pub fn rename_event_roles(event: TraceEvent, mapping: &BTreeMap<String, String>) -> TraceEvent {
    if mapping.is_empty() {
        return event;
    }
    match event {
        TraceEvent::Message {
            id,
            from,
            to,
            label,
            payload,
        } => TraceEvent::Message {
            id,
            from: rename(from, mapping),
            to: to.into_iter().map(|r| rename(r, mapping)).collect(),
            label,
            payload,
        },
        TraceEvent::Send {
            role,
            to,
            label,
            timestamp,
        } => TraceEvent::Send {
            role: rename(role, mapping),
            to: rename(to, mapping),
            label,
            timestamp,
        },
        TraceEvent::Receive {
            role,
            from,
            label,
            timestamp,
        } => TraceEvent::Receive {
            role: rename(role, mapping),
            from: rename(from, mapping),
            label,
            timestamp,
        },
        TraceEvent::Choice {
            role,
            state,
            decider,
        } => TraceEvent::Choice {
            role: rename(role, mapping),
            state,
            decider: rename(decider, mapping),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_kebab_tagged() {
        let event = TraceEvent::ChoicePoint {
            node: "branch3".into(),
            options: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "choice-point");
    }

    #[test]
    fn test_traced_event_flattens() {
        let mut recorder = TraceRecorder::new(true);
        recorder.record(TraceEvent::StackReset);
        let json = recorder.trace().to_json();
        assert_eq!(json["events"][0]["type"], "stack-reset");
        assert_eq!(json["events"][0]["timestamp"], 0);
    }

    #[test]
    fn test_recorder_respects_flag() {
        let mut recorder = TraceRecorder::new(false);
        recorder.record(TraceEvent::StackReset);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_merge_renames_roles() {
        let mut inner = TraceRecorder::new(true);
        inner.record(TraceEvent::Send {
            role: "P".into(),
            to: "Q".into(),
            label: "Ping".into(),
            timestamp: 0,
        });

        let mapping = BTreeMap::from([
            ("P".to_string(), "A".to_string()),
            ("Q".to_string(), "B".to_string()),
        ]);
        let mut outer = TraceRecorder::new(true);
        outer.merge(inner.into_trace(), &mapping);

        match outer.events().next().unwrap() {
            TraceEvent::Send { role, to, .. } => {
                assert_eq!(role, "A");
                assert_eq!(to, "B");
            }
            other => panic!("Expected send, got {:?}", other),
        }
    }
}
