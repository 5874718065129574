//! Leave lowering

use crate::ir::{MethodTac, Stmt};

/// Rewrite every remaining `leave` into a plain jump to the same target.
///
/// Returns the number of rewritten statements.
pub fn lower_leaves(tac: &mut MethodTac) -> usize {
    let mut lowered = 0;
    for stmt in &mut tac.stmts {
        if let Stmt::Leave(target) = *stmt {
            *stmt = Stmt::Goto(target);
            lowered += 1;
        }
    }
    tac.leaves_lowered = true;
    lowered
}
