//! Structural invariants checked at runtime
//!
//! Library code states its invariants with [`check_invariant!`]. A violated
//! invariant never takes the process down: it is logged at error level and
//! reported back to the caller as `false`, which decides how to degrade
//! (a controller drops to `Error`, for instance).
//!
//! Every check is also recorded on the current thread so a test can prove
//! that a scenario exercised, and upheld, the invariants it cares about:
//!
//! ```rust,ignore
//! use lenscore::invariants::{reset_checks, require_checked};
//!
//! #[tokio::test]
//! async fn preview_then_close() {
//!     reset_checks();
//!     // ... drive the orchestrator ...
//!     require_checked("preview then close", &["A device has at most one open session"]);
//! }
//! ```
//!
//! The record is thread-local, so drive such tests on a current-thread runtime.

use std::cell::RefCell;
use std::collections::BTreeMap;

thread_local! {
    static CHECKS: RefCell<BTreeMap<&'static str, CheckRecord>> = RefCell::new(BTreeMap::new());
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckRecord {
    pub held: u32,
    pub violated: u32,
}

/// Evaluate an invariant, record the outcome and yield whether it held.
#[macro_export]
macro_rules! check_invariant {
    ($condition:expr, $invariant:expr, $site:expr) => {
        $crate::invariants::record_check($condition, $invariant, $site)
    };
}

#[doc(hidden)]
pub fn record_check(held: bool, invariant: &'static str, site: &str) -> bool {
    CHECKS.with(|checks| {
        let mut checks = checks.borrow_mut();
        let record = checks.entry(invariant).or_default();
        if held {
            record.held += 1;
        } else {
            record.violated += 1;
        }
    });
    if !held {
        log::error!("Invariant violated at {}: {}", site, invariant);
    }
    held
}

/// What this thread has recorded for `invariant` so far.
pub fn check_record(invariant: &str) -> Option<CheckRecord> {
    CHECKS.with(|checks| checks.borrow().get(invariant).copied())
}

/// Panics unless every invariant in `required` was checked at least once
/// on this thread and never violated.
pub fn require_checked(scenario: &str, required: &[&str]) {
    let mut problems = Vec::new();
    for invariant in required {
        match check_record(invariant) {
            None => problems.push(format!("never checked: {}", invariant)),
            Some(record) if record.violated > 0 => problems.push(format!(
                "violated {} time(s): {}",
                record.violated, invariant
            )),
            Some(_) => {}
        }
    }
    assert!(
        problems.is_empty(),
        "scenario '{}' did not uphold its invariants:\n  {}",
        scenario,
        problems.join("\n  ")
    );
}

pub fn reset_checks() {
    CHECKS.with(|checks| checks.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held_check_satisfies_requirement() {
        reset_checks();
        assert!(crate::check_invariant!(1 + 1 == 2, "Arithmetic holds", "invariants::tests"));
        require_checked("arithmetic", &["Arithmetic holds"]);
        assert_eq!(
            check_record("Arithmetic holds"),
            Some(CheckRecord { held: 1, violated: 0 })
        );
    }

    #[test]
    #[should_panic(expected = "never checked: Nobody checked this")]
    fn test_unchecked_invariant_fails_requirement() {
        reset_checks();
        require_checked("never checked", &["Nobody checked this"]);
    }

    #[test]
    fn test_violation_is_reported_not_raised() {
        reset_checks();
        assert!(!crate::check_invariant!(false, "Always false", "invariants::tests"));
        assert_eq!(check_record("Always false").map(|r| r.violated), Some(1));
    }

    #[test]
    #[should_panic(expected = "violated 1 time(s): Always false")]
    fn test_violation_fails_requirement() {
        reset_checks();
        crate::check_invariant!(false, "Always false", "invariants::tests");
        require_checked("violated", &["Always false"]);
    }
}
