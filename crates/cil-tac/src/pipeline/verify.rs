//! Structural checks on a finished method body
//!
//! These catch bookkeeping mistakes in the rewriting passes rather than
//! problems in the input: every branch lands inside the body and the scope
//! table still describes a properly nested forest.

use std::ops::Range;

use serde::Serialize;

use crate::ir::MethodTac;

/// A structural defect in a compiled method body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum VerifyError {
    #[error("Statement {stmt} branches to {target}, past the end of the body")]
    DanglingTarget { stmt: usize, target: usize },

    #[error("Scope {scope} has an empty {region} region")]
    EmptyRegion { scope: usize, region: &'static str },

    #[error("Scope {scope} {region} region ends at {end}, past the body length {len}")]
    RegionOutOfRange { scope: usize, region: &'static str, end: usize, len: usize },

    #[error("Scope {scope} protects part of its own handler")]
    TryOverlapsHandler { scope: usize },

    /// Two regions overlap without one containing the other
    #[error("Regions of scopes {first} and {second} cross")]
    CrossingScopes { first: usize, second: usize },

    #[error("Statement {stmt} is a leave in a body whose leaves were lowered")]
    LeaveAfterLowering { stmt: usize },
}

fn regions(scope: &crate::ir::EhScope) -> Vec<(&'static str, Range<usize>)> {
    let mut regions = vec![("try", scope.try_range()), ("handler", scope.handler_range())];
    if let Some(filter) = scope.filter_range() {
        regions.push(("filter", filter));
    }
    regions
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn contains(outer: &Range<usize>, inner: &Range<usize>) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

/// Check a composed method body, reporting the first defect found
pub fn verify_method(tac: &MethodTac) -> Result<(), VerifyError> {
    let len = tac.len();

    for (stmt, s) in tac.stmts.iter().enumerate() {
        if let Some(target) = s.target() {
            if target >= len {
                return Err(VerifyError::DanglingTarget { stmt, target });
            }
        }
        if tac.leaves_lowered && matches!(s, crate::ir::Stmt::Leave(_)) {
            return Err(VerifyError::LeaveAfterLowering { stmt });
        }
    }

    for (scope, s) in tac.scopes.iter().enumerate() {
        let own = regions(s);
        for &(region, ref range) in &own {
            if range.is_empty() {
                return Err(VerifyError::EmptyRegion { scope, region });
            }
            if range.end > len {
                return Err(VerifyError::RegionOutOfRange { scope, region, end: range.end, len });
            }
        }
        let try_range = s.try_range();
        if own.iter().skip(1).any(|(_, r)| overlaps(&try_range, r)) {
            return Err(VerifyError::TryOverlapsHandler { scope });
        }
    }

    for (first, a) in tac.scopes.iter().enumerate() {
        for (second, b) in tac.scopes.iter().enumerate().skip(first + 1) {
            for (_, ra) in regions(a) {
                for (_, rb) in regions(b) {
                    if overlaps(&ra, &rb) && !contains(&ra, &rb) && !contains(&rb, &ra) {
                        return Err(VerifyError::CrossingScopes { first, second });
                    }
                }
            }
        }
    }

    Ok(())
}
