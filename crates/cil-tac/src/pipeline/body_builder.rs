//! Stack-merge fixpoint driver
//!
//! Translates every block of a method until the entry stack of each block
//! agrees with the exit stacks of its predecessors, then composes the block
//! statements into one method body.
//!
//! Where predecessors leave different values in the same stack slot, the
//! slot is replaced by a merge variable. Merge variables are allocated once
//! per (block, slot) and never change identity; only their type may widen.
//! Each predecessor later assigns its own value to the merge variable just
//! before its terminating branch.

use std::collections::VecDeque;

use cil_bytecode::InstructionStream;
use log::{debug, trace, warn};

use super::translate::{translate_block, BlockOutput, TranslationContext};
use crate::analysis::{BlockId, ControlFlowGraph};
use crate::error::CompileError;
use crate::ir::{Constant, EhScope, Expr, MethodTac, ScopeKind, Stmt, Value, Variables};
use crate::metadata::TacType;

#[derive(Debug, Default)]
struct BlockState {
    /// Entry stack used for the current translation
    entry: Option<Vec<Value>>,
    /// Merge variable per stack slot, once one was needed
    merges: Vec<Option<u32>>,
    output: Option<BlockOutput>,
    /// Temporaries owned by this block, reused across translations
    temps: Vec<u32>,
    visits: usize,
}

/// Worklist driver over the blocks of one method
pub struct BodyBuilder<'a> {
    cx: &'a TranslationContext<'a>,
    stream: &'a InstructionStream,
    cfg: &'a ControlFlowGraph,
    max_visits: usize,
    vars: Variables,
    states: Vec<BlockState>,
}

impl<'a> BodyBuilder<'a> {
    /// Create a driver; `vars` holds the declared locals and parameters
    pub fn new(
        cx: &'a TranslationContext<'a>,
        stream: &'a InstructionStream,
        cfg: &'a ControlFlowGraph,
        vars: Variables,
        max_visits: usize,
    ) -> Self {
        let states = (0..cfg.block_count()).map(|_| BlockState::default()).collect();
        BodyBuilder { cx, stream, cfg, max_visits, vars, states }
    }

    /// Run the worklist to a fixpoint.
    ///
    /// Returns the number of block translations performed; calling it again
    /// on a converged builder performs none.
    pub fn converge(&mut self) -> Result<usize, CompileError> {
        let cfg = self.cfg;
        let mut queued = vec![false; cfg.block_count()];
        let mut worklist = VecDeque::new();
        for &(id, _) in &cfg.roots {
            if !queued[id.index()] {
                queued[id.index()] = true;
                worklist.push_back(id);
            }
        }

        let mut translations = 0;
        loop {
            while let Some(id) = worklist.pop_front() {
                queued[id.index()] = false;
                let Some(exit_changed) = self.visit(id)? else {
                    continue;
                };
                translations += 1;
                if exit_changed {
                    for &succ in cfg.successors(id) {
                        if !queued[succ.index()] {
                            queued[succ.index()] = true;
                            worklist.push_back(succ);
                        }
                    }
                }
            }

            // Blocks no root reaches start from an empty stack
            match self.states.iter().position(|s| s.output.is_none()) {
                Some(b) => worklist.push_back(BlockId(b as u32)),
                None => break,
            }
        }

        debug!(
            "fixpoint reached after {} block translations ({} blocks, {} merge variables)",
            translations,
            cfg.block_count(),
            self.vars.merges.len()
        );
        Ok(translations)
    }

    /// Translate `id` if its candidate entry stack changed.
    ///
    /// Returns `None` when the block was up to date, otherwise whether its
    /// exit stack changed.
    fn visit(&mut self, id: BlockId) -> Result<Option<bool>, CompileError> {
        let cfg = self.cfg;
        let block = cfg.block(id);
        let (entry, widened) = self.candidate_entry(id)?;

        let state = &mut self.states[id.index()];
        if state.output.is_some() && !widened && state.entry.as_ref() == Some(&entry) {
            return Ok(None);
        }
        if state.visits == self.max_visits {
            return Err(CompileError::FixpointDiverged { entry: block.entry, visits: state.visits });
        }
        state.visits += 1;

        trace!("translating {} [{}..={}] with entry depth {}", id, block.entry, block.exit, entry.len());
        let output =
            translate_block(self.cx, self.stream.as_slice(), block, entry.clone(), &mut self.vars, &mut state.temps)?;

        let exit_changed = match &state.output {
            Some(old) => old.exit_stack != output.exit_stack || old.exit_types != output.exit_types,
            None => true,
        };
        state.entry = Some(entry);
        state.output = Some(output);
        Ok(Some(exit_changed))
    }

    /// Compute the entry stack from the translated predecessors.
    ///
    /// Also reports whether an existing merge variable's type widened.
    fn candidate_entry(&mut self, id: BlockId) -> Result<(Vec<Value>, bool), CompileError> {
        let cfg = self.cfg;
        let mut inputs: Vec<Vec<Value>> = Vec::new();
        // Roots are entered with an empty stack; a caught exception is
        // pushed by the translator itself
        if cfg.root_kind(id).is_some() {
            inputs.push(Vec::new());
        }
        for &pred in cfg.predecessors(id) {
            if let Some(out) = &self.states[pred.index()].output {
                inputs.push(out.exit_stack.clone());
            }
        }

        let Some(depth) = inputs.first().map(Vec::len) else {
            return Ok((Vec::new(), false));
        };
        if let Some(bad) = inputs.iter().find(|i| i.len() != depth) {
            return Err(CompileError::StackMismatch { entry: cfg.block(id).entry, expected: depth, found: bad.len() });
        }

        let state = &mut self.states[id.index()];
        if state.merges.len() < depth {
            state.merges.resize(depth, None);
        }

        let mut entry = Vec::with_capacity(depth);
        let mut widened = false;
        for slot in 0..depth {
            let first = &inputs[0][slot];
            match state.merges[slot] {
                Some(m) => {
                    let merged = Value::Merge(m);
                    let current = &self.vars.merges[m as usize];
                    let ty = inputs
                        .iter()
                        .map(|i| &i[slot])
                        .filter(|v| **v != merged)
                        .fold(current.clone(), |acc, v| acc.lub(&self.vars.type_of(v)));
                    if ty != *current {
                        trace!("{}: merge m{} widens from {} to {}", id, m, current, ty);
                        self.vars.merges[m as usize] = ty;
                        widened = true;
                    }
                    entry.push(merged);
                }
                None if inputs.iter().all(|i| i[slot] == *first) => entry.push(first.clone()),
                None => {
                    let ty = inputs[1..]
                        .iter()
                        .fold(self.vars.type_of(first), |acc, i| acc.lub(&self.vars.type_of(&i[slot])));
                    let m = self.vars.new_merge(ty);
                    trace!("{}: stack slot {} merged into m{}", id, slot, m);
                    state.merges[slot] = Some(m);
                    entry.push(Value::Merge(m));
                }
            }
        }
        Ok((entry, widened))
    }

    /// Compose the translated blocks into a method body.
    ///
    /// `scopes` are in instruction coordinates and come back in statement
    /// coordinates.
    pub fn finish(self, name: String, scopes: &[EhScope]) -> MethodTac {
        let BodyBuilder { cfg, stream, mut vars, states, .. } = self;

        // Merge assignments owed by each predecessor
        let mut moves: Vec<Vec<(u32, Value)>> = vec![Vec::new(); states.len()];
        for (b, state) in states.iter().enumerate() {
            for &pred in cfg.predecessors(BlockId(b as u32)) {
                let Some(out) = &states[pred.index()].output else {
                    continue;
                };
                for (slot, merge) in state.merges.iter().enumerate() {
                    if let (Some(m), Some(value)) = (merge, out.exit_stack.get(slot)) {
                        if *value != Value::Merge(*m) {
                            moves[pred.index()].push((*m, value.clone()));
                        }
                    }
                }
            }
        }

        let mut diagnostics = Vec::new();
        let mut starts = Vec::with_capacity(states.len());
        let mut stmts = Vec::new();
        for (b, state) in states.into_iter().enumerate() {
            starts.push(stmts.len());
            let Some(output) = state.output else {
                continue;
            };
            for diagnostic in &output.diagnostics {
                warn!("{}: {}", name, diagnostic);
            }
            diagnostics.extend(output.diagnostics);
            let mut block_stmts = output.stmts;
            insert_moves(&mut block_stmts, &moves[b], &mut vars);
            stmts.extend(block_stmts);
        }

        let total = stmts.len();
        let to_stmt = |instr: usize| -> usize {
            if instr >= stream.len() {
                return total;
            }
            cfg.block_at(instr).map_or(total, |b| starts[b.index()])
        };
        for stmt in &mut stmts {
            if let Some(target) = stmt.target_mut() {
                *target = to_stmt(*target);
            }
        }
        let scopes = scopes
            .iter()
            .map(|s| EhScope {
                kind: match s.kind {
                    ScopeKind::Filter { filter_begin } => ScopeKind::Filter { filter_begin: to_stmt(filter_begin) },
                    ref other => other.clone(),
                },
                try_begin: to_stmt(s.try_begin),
                try_end: to_stmt(s.try_end),
                handler_begin: to_stmt(s.handler_begin),
                handler_end: to_stmt(s.handler_end),
            })
            .collect();

        MethodTac { name, stmts, scopes, vars, diagnostics, leaves_lowered: false }
    }
}

/// Insert merge assignments before the first branch of a block, or at its end.
///
/// The assignments run in parallel: when one of them reads a merge variable
/// another one writes, all values are staged through temporaries first.
/// Branch conditions after the insertion point keep reading the values from
/// before the assignments.
fn insert_moves(stmts: &mut Vec<Stmt>, moves: &[(u32, Value)], vars: &mut Variables) {
    if moves.is_empty() {
        return;
    }
    let at = stmts.iter().position(Stmt::is_branch).unwrap_or(stmts.len());
    let assigned: Vec<Value> = moves.iter().map(|(m, _)| Value::Merge(*m)).collect();

    let mut saved: Vec<(Value, Value)> = Vec::new();
    let mut prologue = Vec::new();
    for stmt in &mut stmts[at..] {
        if let Stmt::If { cond, .. } = stmt {
            for operand in [&mut cond.left, &mut cond.right] {
                if !assigned.contains(operand) {
                    continue;
                }
                let copy = match saved.iter().find(|(old, _)| old == operand) {
                    Some((_, copy)) => copy.clone(),
                    None => {
                        let copy = Value::Temp(vars.new_temp(vars.type_of(operand)));
                        prologue.push(Stmt::assign(copy.clone(), Expr::Value(operand.clone())));
                        saved.push((operand.clone(), copy.clone()));
                        copy
                    }
                };
                *operand = copy;
            }
        }
    }

    let mut assigns = Vec::with_capacity(moves.len() * 2);
    let hazard = moves.iter().any(|(_, v)| assigned.contains(v));
    if hazard {
        let mut staged = Vec::with_capacity(moves.len());
        for (m, value) in moves {
            let ty = vars.merges[*m as usize].clone();
            let t = Value::Temp(vars.new_temp(ty.clone()));
            assigns.push(Stmt::assign(t.clone(), Expr::Value(retype_null(value, &ty))));
            staged.push((*m, t));
        }
        for (m, t) in staged {
            assigns.push(Stmt::assign(Value::Merge(m), Expr::Value(t)));
        }
    } else {
        for (m, value) in moves {
            let ty = &vars.merges[*m as usize];
            assigns.push(Stmt::assign(Value::Merge(*m), Expr::Value(retype_null(value, ty))));
        }
    }

    stmts.splice(at..at, prologue.into_iter().chain(assigns));
}

fn retype_null(value: &Value, ty: &TacType) -> Value {
    match value {
        Value::Const(Constant::Null(_)) => Value::Const(Constant::Null(ty.clone())),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cil_bytecode::{Opcode as Op, Operand};

    use crate::analysis::build_cfg;
    use crate::metadata::{GenericContext, MetadataRegistry, MetadataTable};

    fn compile(ops: Vec<(Op, Operand)>, locals: Vec<TacType>, params: Vec<TacType>) -> Result<MethodTac, CompileError> {
        let table = MetadataTable::new();
        let registry = MetadataRegistry::new();
        let generics = GenericContext::default();
        let cx = TranslationContext {
            resolver: &table,
            registry: &registry,
            generics: &generics,
            return_type: TacType::Void,
            scopes: &[],
            inline_array_initializers: true,
        };
        let stream = InstructionStream::from_ops(ops);
        let cfg = build_cfg(&stream, &[])?;
        let mut builder = BodyBuilder::new(&cx, &stream, &cfg, Variables::new(locals, params), 16);
        builder.converge()?;
        assert_eq!(builder.converge()?, 0);
        Ok(builder.finish("test".into(), &[]))
    }

    fn diamond() -> Vec<(Op, Operand)> {
        vec![
            (Op::Ldarg0, Operand::None),
            (Op::Brtrue, Operand::Target(4)),
            (Op::LdcI4_1, Operand::None),
            (Op::Br, Operand::Target(5)),
            (Op::LdcI4_2, Operand::None),
            (Op::Stloc0, Operand::None),
            (Op::Ret, Operand::None),
        ]
    }

    #[test]
    fn test_diamond_merges_constants() {
        let tac = compile(diamond(), vec![TacType::I4], vec![TacType::I4]).unwrap();
        let text: Vec<String> = tac.stmts.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            text,
            vec!["if a0 != 0 goto 3", "m0 = 1", "goto 4", "m0 = 2", "l0 = m0", "return"]
        );
        assert_eq!(tac.vars.merges, vec![TacType::I4]);
    }

    #[test]
    fn test_agreeing_predecessors_need_no_merge() {
        let tac = compile(
            vec![
                (Op::Ldarg0, Operand::None),
                (Op::LdcI4_7, Operand::None),
                (Op::Ldarg0, Operand::None),
                (Op::Brtrue, Operand::Target(6)),
                (Op::Nop, Operand::None),
                (Op::Br, Operand::Target(6)),
                (Op::Stloc0, Operand::None),
                (Op::Pop, Operand::None),
                (Op::Ret, Operand::None),
            ],
            vec![TacType::I4],
            vec![TacType::I4],
        )
        .unwrap();
        assert!(tac.vars.merges.is_empty());
        assert!(tac.stmts.contains(&Stmt::assign(Value::Local(0), Expr::Value(Value::Const(Constant::I4(7))))));
    }

    #[test]
    fn test_stack_depth_mismatch() {
        let err = compile(
            vec![
                (Op::Ldarg0, Operand::None),
                (Op::Brtrue, Operand::Target(3)),
                (Op::LdcI4_1, Operand::None),
                (Op::Ret, Operand::None),
            ],
            vec![],
            vec![TacType::I4],
        )
        .unwrap_err();
        assert_eq!(err, CompileError::StackMismatch { entry: 3, expected: 0, found: 1 });
    }

    #[test]
    fn test_reference_merge_takes_common_type() {
        let tac = compile(
            vec![
                (Op::Ldarg0, Operand::None),
                (Op::Brtrue, Operand::Target(4)),
                (Op::Ldnull, Operand::None),
                (Op::Br, Operand::Target(5)),
                (Op::Ldarg1, Operand::None),
                (Op::Stloc0, Operand::None),
                (Op::Ret, Operand::None),
            ],
            vec![TacType::String],
            vec![TacType::I4, TacType::String],
        )
        .unwrap();
        assert_eq!(tac.vars.merges, vec![TacType::String]);
        assert!(tac.stmts.contains(&Stmt::assign(
            Value::Merge(0),
            Expr::Value(Value::Const(Constant::Null(TacType::String)))
        )));
    }

    #[test]
    fn test_unreachable_block_is_translated() {
        let tac = compile(
            vec![
                (Op::Ret, Operand::None),
                (Op::LdcI4_0, Operand::None),
                (Op::Stloc0, Operand::None),
                (Op::Ret, Operand::None),
            ],
            vec![TacType::I4],
            vec![],
        )
        .unwrap();
        assert_eq!(tac.len(), 3);
    }

    #[test]
    fn test_insert_moves_stages_swaps() {
        let mut vars = Variables::default();
        vars.new_merge(TacType::I4);
        vars.new_merge(TacType::I4);
        let mut stmts = vec![Stmt::Goto(0)];
        insert_moves(&mut stmts, &[(0, Value::Merge(1)), (1, Value::Merge(0))], &mut vars);
        let text: Vec<String> = stmts.iter().map(|s| s.to_string()).collect();
        assert_eq!(text, vec!["t0 = m1", "t1 = m0", "m0 = t0", "m1 = t1", "goto 0"]);
    }
}
