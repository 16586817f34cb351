// verify/mod.rs - CFG Verification

//! Structural and behavioural well-formedness checks over CFGs.
//!
//! [`verify`] runs twenty named checks grouped by priority: P0 safety and
//! projection-critical, P1 well-formedness, P2 suspicious-but-legal, P3
//! structural. It returns a [`Report`]; verification never mutates the
//! graph and never fails; a malformed CFG produces failing checks, not a
//! panic.

mod algo;
mod checks;
mod report;

pub use algo::{
    fork_branches, reachable_from, reaches_any, region_until_join, region_until_merge,
    shortest_path, tarjan_scc,
};
pub use checks::verify;
pub use report::{CheckResult, Priority, Report, Violation};
