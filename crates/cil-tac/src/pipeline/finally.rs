//! Finally inlining
//!
//! A `leave` out of a protected region runs the region's finally handler
//! before reaching its target. The IR has no structured exits, so the
//! handler body is copied once per such exit, right after the scope, and
//! the `leave` is pointed at its copy. Inside a copy, every `endfinally`
//! owned by the handler becomes a jump to the original `leave` target; the
//! original handler stays in place for the exceptional path.
//!
//! Scopes are processed outermost first. Each step is computed against the
//! current body and then applied in one pass: statement targets and scope
//! locations at or after the insertion point shift by the inserted length.

use std::ops::Range;

use log::debug;

use crate::ir::{EhScope, MethodTac, ScopeKind, Stmt};

/// Duplication of one finally handler
#[derive(Debug)]
struct Plan {
    /// Index of the scope being inlined
    scope: usize,
    /// Insertion point: one past the end of the scope
    at: usize,
    /// Handler statement range
    handler: Range<usize>,
    /// Exiting `leave` statements with their original targets
    exits: Vec<(usize, usize)>,
    /// Whether each handler statement is an `endfinally` of this handler
    owned: Vec<bool>,
    /// Scopes lying entirely inside the handler
    nested: Vec<usize>,
}

impl Plan {
    fn handler_len(&self) -> usize {
        self.handler.len()
    }

    /// Statements inserted in total
    fn grow(&self) -> usize {
        self.exits.len() * self.handler_len()
    }

    /// Start of the copy for exit `j`
    fn copy_start(&self, j: usize) -> usize {
        self.at + j * self.handler_len()
    }

    /// Position of an existing statement index after insertion
    fn shift(&self, index: usize) -> usize {
        if index >= self.at {
            index + self.grow()
        } else {
            index
        }
    }
}

/// Inline every finally handler at its exits.
///
/// Returns the number of handler copies inserted.
pub fn inline_finally(tac: &mut MethodTac) -> usize {
    let mut processed = vec![false; tac.scopes.len()];
    let mut copies = 0;

    while let Some(index) = next_scope(&tac.scopes, &processed) {
        processed[index] = true;
        let plan = plan(tac, index);
        if plan.exits.is_empty() {
            continue;
        }
        debug!(
            "{}: inlining {} at {} exit(s), {} statements each",
            tac.name,
            tac.scopes[index],
            plan.exits.len(),
            plan.handler_len()
        );
        copies += plan.exits.len();
        apply(tac, &mut processed, &plan);
    }
    copies
}

/// Outermost unprocessed finally scope, leftmost among equals
fn next_scope(scopes: &[EhScope], processed: &[bool]) -> Option<usize> {
    let pending: Vec<usize> = (0..scopes.len()).filter(|&i| !processed[i] && scopes[i].is_finally()).collect();
    pending
        .iter()
        .copied()
        .filter(|&i| !pending.iter().any(|&o| o != i && scopes[i].is_nested_in(&scopes[o])))
        .min_by(|&a, &b| scopes[a].transform_order(&scopes[b]))
}

fn plan(tac: &MethodTac, index: usize) -> Plan {
    let scope = &tac.scopes[index];
    let handler = scope.handler_range();

    let exits = tac.stmts[scope.try_range()]
        .iter()
        .enumerate()
        .filter_map(|(i, stmt)| match stmt {
            Stmt::Leave(target) if !scope.in_try(*target) => Some((scope.try_begin + i, *target)),
            _ => None,
        })
        .collect();

    // An endfinally inside a nested finally or fault handler belongs to that handler
    let owned = handler
        .clone()
        .map(|i| {
            tac.stmts[i] == Stmt::EndFinally
                && !tac.scopes.iter().enumerate().any(|(g, other)| {
                    g != index
                        && matches!(other.kind, ScopeKind::Finally | ScopeKind::Fault)
                        && other.handler_range().contains(&i)
                        && other.handler_begin >= handler.start
                        && other.handler_end <= handler.end
                })
        })
        .collect();

    let nested = tac
        .scopes
        .iter()
        .enumerate()
        .filter(|(g, other)| {
            *g != index
                && other.try_begin.min(other.handler_side_begin()) >= handler.start
                && other.end() <= handler.end
        })
        .map(|(g, _)| g)
        .collect();

    Plan { scope: index, at: scope.end(), handler, exits, owned, nested }
}

fn apply(tac: &mut MethodTac, processed: &mut Vec<bool>, plan: &Plan) {
    let anchor = tac.scopes[plan.scope].clone();
    let body: Vec<Stmt> = tac.stmts[plan.handler.clone()].to_vec();
    let nested: Vec<EhScope> = plan.nested.iter().map(|&g| tac.scopes[g].clone()).collect();

    for stmt in &mut tac.stmts {
        if let Some(target) = stmt.target_mut() {
            *target = plan.shift(*target);
        }
    }
    for (i, scope) in tac.scopes.iter_mut().enumerate() {
        shift_scope(scope, plan, &anchor, i == plan.scope);
    }

    let mut inserted = Vec::with_capacity(plan.grow());
    for (j, &(_, exit_target)) in plan.exits.iter().enumerate() {
        let start = plan.copy_start(j);
        for (pos, stmt) in body.iter().enumerate() {
            let mut copy = stmt.clone();
            if plan.owned[pos] {
                copy = Stmt::Goto(plan.shift(exit_target));
            } else if let Some(target) = copy.target_mut() {
                *target = if plan.handler.contains(target) {
                    *target - plan.handler.start + start
                } else {
                    plan.shift(*target)
                };
            }
            inserted.push(copy);
        }
    }
    tac.stmts.splice(plan.at..plan.at, inserted);

    for (j, &(leave, _)) in plan.exits.iter().enumerate() {
        tac.stmts[leave] = Stmt::Leave(plan.copy_start(j));
    }

    for (scope, &g) in nested.iter().zip(&plan.nested) {
        for j in 0..plan.exits.len() {
            let offset = plan.copy_start(j) - plan.handler.start;
            tac.scopes.push(offset_scope(scope, offset));
            processed.push(processed[g]);
        }
    }
}

/// Move a scope's boundaries to account for the statements inserted at
/// `plan.at`.
///
/// A range ending exactly at the insertion point grows over the copies when
/// it encloses the inlined scope.
fn shift_scope(scope: &mut EhScope, plan: &Plan, anchor: &EhScope, is_anchor: bool) {
    let grow = plan.grow();
    let shift_begin = |b: usize| if b >= plan.at { b + grow } else { b };
    let shift_end = |start: usize, e: usize| {
        if e > plan.at || (e == plan.at && !is_anchor && start <= anchor.try_begin) {
            e + grow
        } else {
            e
        }
    };

    let (tb, te, hb, he) = (scope.try_begin, scope.try_end, scope.handler_begin, scope.handler_end);
    if let ScopeKind::Filter { filter_begin } = &mut scope.kind {
        *filter_begin = shift_begin(*filter_begin);
    }
    scope.try_begin = shift_begin(tb);
    scope.try_end = shift_end(tb, te);
    scope.handler_begin = shift_begin(hb);
    scope.handler_end = shift_end(hb, he);
}

fn offset_scope(scope: &EhScope, offset: usize) -> EhScope {
    let kind = match scope.kind {
        ScopeKind::Filter { filter_begin } => ScopeKind::Filter { filter_begin: filter_begin + offset },
        ref other => other.clone(),
    };
    EhScope {
        kind,
        try_begin: scope.try_begin + offset,
        try_end: scope.try_end + offset,
        handler_begin: scope.handler_begin + offset,
        handler_end: scope.handler_end + offset,
    }
}
