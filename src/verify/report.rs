// verify/report.rs - Verification Report Types

use crate::cfg::NodeId;
use serde::Serialize;

/// Check priority.
///
/// P0 are safety and projection-critical checks; P1 are well-formedness
/// errors; P2 are suspicious-but-legal warnings; P3 are structural
/// findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

/// A single finding of one check.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub message: String,

    /// Offending node id(s)
    pub nodes: Vec<NodeId>,

    /// Shortest witness path from the initial node, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<Vec<NodeId>>,
}

impl Violation {
    pub fn new(message: impl Into<String>, nodes: Vec<NodeId>) -> Self {
        Self {
            message: message.into(),
            nodes,
            witness: None,
        }
    }

    pub fn with_witness(mut self, witness: Vec<NodeId>) -> Self {
        self.witness = Some(witness);
        self
    }
}

/// Outcome of one named check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub priority: Priority,
    pub passed: bool,
    pub violations: Vec<Violation>,
}

impl CheckResult {
    pub fn new(name: &'static str, priority: Priority, violations: Vec<Violation>) -> Self {
        Self {
            name,
            priority,
            passed: violations.is_empty(),
            violations,
        }
    }
}

/// The full verification report for one CFG.
///
/// `verify` is a pure function of the CFG, so repeated runs produce
/// identical reports, check for check and violation for violation.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub protocol: String,
    pub checks: Vec<CheckResult>,
}

impl Report {
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Failed checks at the given priority.
    pub fn failed_at(&self, priority: Priority) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(move |c| c.priority == priority && !c.passed)
    }

    /// True when no P0, P1 or P3 check failed. P2 findings are warnings.
    pub fn passed(&self) -> bool {
        self.checks
            .iter()
            .all(|c| c.passed || c.priority == Priority::P2)
    }

    /// Strict mode: P2 warnings count as failures too.
    pub fn passed_strict(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// True when the checks projection is defined over have passed.
    ///
    /// Projection requires a choice-deterministic, choice-mergeable,
    /// connected CFG. Other P0 findings (a role sending in two parallel
    /// branches, say) flag behavioural trouble but do not make the local
    /// views ill-defined.
    pub fn projectable(&self) -> bool {
        const GATES: [&str; 3] = [
            "choice-determinism",
            "choice-mergeability",
            "connectedness",
        ];
        self.checks
            .iter()
            .filter(|c| GATES.contains(&c.name))
            .all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.priority != Priority::P2)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.priority == Priority::P2)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("report serialisation cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &'static str, priority: Priority, failed: bool) -> CheckResult {
        let violations = if failed {
            vec![Violation::new("boom", vec![])]
        } else {
            vec![]
        };
        CheckResult::new(name, priority, violations)
    }

    #[test]
    fn test_warnings_do_not_fail_default_mode() {
        let report = Report {
            protocol: "P".into(),
            checks: vec![
                result("a", Priority::P0, false),
                result("b", Priority::P2, true),
            ],
        };
        assert!(report.passed());
        assert!(!report.passed_strict());
        assert!(report.projectable());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_p0_failure_blocks_projection() {
        let report = Report {
            protocol: "P".into(),
            checks: vec![result("a", Priority::P0, true)],
        };
        assert!(!report.passed());
        assert!(!report.projectable());
    }
}
