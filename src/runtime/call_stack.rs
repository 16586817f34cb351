// runtime/call_stack.rs - Call-Stack Manager

use super::event::TraceEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// What a frame was pushed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Recursion,
    Subprotocol,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Recursion => "recursion",
            FrameKind::Subprotocol => "subprotocol",
        }
    }
}

/// One active frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub kind: FrameKind,
    pub protocol: String,

    /// Node or state id where the frame was entered
    pub entry: String,

    /// Node or state id execution resumes at on pop
    pub exit: String,

    /// Formal → actual role mapping for sub-protocol frames
    pub role_mapping: BTreeMap<String, String>,

    pub steps: u64,
    pub iterations: u64,

    started: Instant,
}

impl CallFrame {
    pub fn recursion(protocol: impl Into<String>, entry: impl Into<String>) -> Self {
        let entry = entry.into();
        Self {
            kind: FrameKind::Recursion,
            protocol: protocol.into(),
            exit: entry.clone(),
            entry,
            role_mapping: BTreeMap::new(),
            steps: 0,
            iterations: 0,
            started: Instant::now(),
        }
    }

    pub fn subprotocol(
        protocol: impl Into<String>,
        entry: impl Into<String>,
        exit: impl Into<String>,
        role_mapping: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind: FrameKind::Subprotocol,
            protocol: protocol.into(),
            entry: entry.into(),
            exit: exit.into(),
            role_mapping,
            steps: 0,
            iterations: 0,
            started: Instant::now(),
        }
    }
}

/// Call-stack failures. Overflow and underflow are fatal; the iteration
/// limit is a bounded halt, distinct from a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallStackError {
    #[error("call stack overflow: depth limit {max_depth} reached entering {protocol}")]
    Overflow { protocol: String, max_depth: usize },

    #[error("pop on empty call stack")]
    Underflow,

    #[error("recursion iteration limit {max_iterations} reached in {protocol}")]
    IterationLimit {
        protocol: String,
        max_iterations: u64,
    },
}

/// Limits and switches for one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStackConfig {
    /// Maximum simultaneous frames; exceeding it is fatal
    pub max_depth: usize,

    /// Maximum `continue`s through one recursion frame
    pub max_iterations: u64,

    /// Emit frame events into the host trace
    pub emit_events: bool,
}

impl Default for CallStackConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_iterations: 1000,
            emit_events: true,
        }
    }
}

/// Bounded stack of active protocol frames.
///
/// Every simulator instance owns exactly one manager; nested sub-protocol
/// runs borrow the caller's so depth accumulates across nesting, but two
/// simulators never share one.
#[derive(Debug)]
pub struct CallStackManager {
    frames: Vec<CallFrame>,
    config: CallStackConfig,
    events: Vec<TraceEvent>,
}

impl Default for CallStackManager {
    fn default() -> Self {
        Self::new(CallStackConfig::default())
    }
}

impl CallStackManager {
    pub fn new(config: CallStackConfig) -> Self {
        Self {
            frames: Vec::new(),
            config,
            events: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    pub fn config(&self) -> &CallStackConfig {
        &self.config
    }

    pub fn push(&mut self, frame: CallFrame) -> Result<(), CallStackError> {
        if self.frames.len() >= self.config.max_depth {
            return Err(CallStackError::Overflow {
                protocol: frame.protocol,
                max_depth: self.config.max_depth,
            });
        }
        self.emit(TraceEvent::FramePush {
            kind: frame.kind.as_str().to_string(),
            protocol: frame.protocol.clone(),
            depth: self.frames.len() + 1,
        });
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<CallFrame, CallStackError> {
        let frame = self.frames.pop().ok_or(CallStackError::Underflow)?;
        self.emit(TraceEvent::FramePop {
            protocol: frame.protocol.clone(),
            depth: self.frames.len(),
            duration_micros: frame.started.elapsed().as_micros() as u64,
        });
        Ok(frame)
    }

    /// Count one executed step against the current frame. A no-op outside
    /// any frame.
    pub fn step(&mut self, node: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.steps += 1;
            let steps = frame.steps;
            self.emit(TraceEvent::FrameStep {
                node: node.to_string(),
                steps,
            });
        }
    }

    /// Count a `continue` against the innermost recursion frame and check
    /// the iteration limit.
    pub fn record_continue(&mut self) -> Result<u64, CallStackError> {
        let max_iterations = self.config.max_iterations;
        let Some(frame) = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.kind == FrameKind::Recursion)
        else {
            return Ok(0);
        };
        frame.iterations += 1;
        if frame.iterations > max_iterations {
            return Err(CallStackError::IterationLimit {
                protocol: frame.protocol.clone(),
                max_iterations,
            });
        }
        Ok(frame.iterations)
    }

    pub fn reset(&mut self) {
        self.frames.clear();
        self.emit(TraceEvent::StackReset);
    }

    /// Drain events accumulated since the last call, for the host trace.
    pub fn take_events(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: TraceEvent) {
        if self.config.emit_events {
            self.events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_and_events() {
        let mut stack = CallStackManager::default();
        stack
            .push(CallFrame::subprotocol("Sub", "n1", "n2", BTreeMap::new()))
            .unwrap();
        assert_eq!(stack.depth(), 1);

        let frame = stack.pop().unwrap();
        assert_eq!(frame.protocol, "Sub");
        assert_eq!(stack.depth(), 0);

        let events = stack.take_events();
        assert!(matches!(events[0], TraceEvent::FramePush { .. }));
        assert!(matches!(events[1], TraceEvent::FramePop { .. }));
    }

    #[test]
    fn test_depth_limit_is_fatal() {
        let mut stack = CallStackManager::new(CallStackConfig {
            max_depth: 2,
            ..Default::default()
        });
        stack.push(CallFrame::recursion("P", "r1")).unwrap();
        stack.push(CallFrame::recursion("P", "r2")).unwrap();
        assert!(matches!(
            stack.push(CallFrame::recursion("P", "r3")),
            Err(CallStackError::Overflow { max_depth: 2, .. })
        ));
    }

    #[test]
    fn test_pop_empty_is_fatal() {
        let mut stack = CallStackManager::default();
        assert_eq!(stack.pop(), Err(CallStackError::Underflow));
    }

    #[test]
    fn test_iteration_limit() {
        let mut stack = CallStackManager::new(CallStackConfig {
            max_iterations: 2,
            ..Default::default()
        });
        stack.push(CallFrame::recursion("P", "rec1")).unwrap();
        assert_eq!(stack.record_continue().unwrap(), 1);
        assert_eq!(stack.record_continue().unwrap(), 2);
        assert!(matches!(
            stack.record_continue(),
            Err(CallStackError::IterationLimit { max_iterations: 2, .. })
        ));
    }

    #[test]
    fn test_step_counts_against_top_frame() {
        let mut stack = CallStackManager::default();
        stack.step("n0"); // no frame: ignored
        stack.push(CallFrame::recursion("P", "rec1")).unwrap();
        stack.step("n1");
        stack.step("n2");
        assert_eq!(stack.top().unwrap().steps, 2);
    }

    #[test]
    fn test_reset_clears_frames() {
        let mut stack = CallStackManager::default();
        stack.push(CallFrame::recursion("P", "rec1")).unwrap();
        stack.reset();
        assert_eq!(stack.depth(), 0);
        assert!(stack
            .take_events()
            .iter()
            .any(|e| matches!(e, TraceEvent::StackReset)));
    }
}
