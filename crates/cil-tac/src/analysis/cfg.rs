//! Control-flow graph construction over the instruction stream
//!
//! Splits the instructions into basic blocks at leaders and connects them.
//! Exception region boundaries are leaders too, so every scope endpoint maps
//! onto a block boundary. Blocks that start a handler or filter are flow
//! roots: they are entered by the runtime, not by a normal edge.

use std::fmt;
use std::ops::Range;

use cil_bytecode::{FlowControl, InstructionStream};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::CompileError;
use crate::ir::{EhScope, ScopeKind};
use crate::metadata::TacType;

/// Unique identifier for a basic block; blocks are numbered in code order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Why a block is entered without a normal predecessor edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Method entry
    Entry,
    /// Handler of the scope at this index
    Handler(usize),
    /// Filter block of the scope at this index
    Filter(usize),
    /// Target of a `leave`; always entered with an empty stack
    LeaveTarget,
}

/// A basic block
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Index of the first instruction
    pub entry: usize,
    /// Index of the last instruction
    pub exit: usize,
    /// Branch targets first, fallthrough last
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
    /// Exception type on the stack on entry, for catch and filter blocks
    pub incoming_exception: Option<TacType>,
}

impl BasicBlock {
    /// Instruction indices covered by the block
    pub fn instrs(&self) -> Range<usize> {
        self.entry..self.exit + 1
    }
}

/// Control-flow graph of one method
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    /// Blocks entered from outside normal flow, in discovery order
    pub roots: Vec<(BlockId, RootKind)>,
    entry_to_block: FxHashMap<usize, BlockId>,
}

impl ControlFlowGraph {
    /// Get a block by ID
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Block starting at instruction `entry`
    pub fn block_at(&self, entry: usize) -> Option<BlockId> {
        self.entry_to_block.get(&entry).copied()
    }

    /// Successor block IDs
    pub fn successors(&self, id: BlockId) -> &[BlockId] {
        &self.blocks[id.index()].successors
    }

    /// Predecessor block IDs
    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        &self.blocks[id.index()].predecessors
    }

    /// Root kind of a block, if it is a flow root
    pub fn root_kind(&self, id: BlockId) -> Option<RootKind> {
        self.roots.iter().find(|(b, _)| *b == id).map(|(_, k)| *k)
    }

    /// Number of blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Build the control-flow graph.
///
/// `scopes` are in instruction coordinates.
pub fn build_cfg(
    stream: &InstructionStream,
    scopes: &[EhScope],
) -> Result<ControlFlowGraph, CompileError> {
    if stream.is_empty() {
        return Ok(ControlFlowGraph::default());
    }

    let len = stream.len();
    let leaders = collect_leaders(stream, scopes)?;

    let mut blocks: Vec<BasicBlock> = Vec::with_capacity(leaders.len());
    let mut entry_to_block = FxHashMap::default();
    for (i, &entry) in leaders.iter().enumerate() {
        let exit = leaders.get(i + 1).map_or(len, |&next| next) - 1;
        let id = BlockId(i as u32);
        entry_to_block.insert(entry, id);
        blocks.push(BasicBlock {
            id,
            entry,
            exit,
            successors: Vec::new(),
            predecessors: Vec::new(),
            incoming_exception: None,
        });
    }

    // Edges
    for b in 0..blocks.len() {
        let last = &stream[blocks[b].exit];
        let flow = last.opcode.flow();
        let mut targets: Vec<usize> = match flow {
            FlowControl::Branch | FlowControl::CondBranch | FlowControl::Switch => last.targets(),
            _ => Vec::new(),
        };
        if flow.falls_through() {
            targets.push(last.index + 1);
        }

        let mut successors = Vec::with_capacity(targets.len());
        for target in targets {
            let succ = entry_to_block
                .get(&target)
                .copied()
                .ok_or(CompileError::DanglingTarget { index: last.index, target })?;
            if !successors.contains(&succ) {
                successors.push(succ);
            }
        }
        blocks[b].successors = successors;
    }

    for b in 0..blocks.len() {
        let succs = blocks[b].successors.clone();
        for s in succs {
            blocks[s.index()].predecessors.push(BlockId(b as u32));
        }
    }

    // Roots
    let mut roots: Vec<(BlockId, RootKind)> = vec![(BlockId(0), RootKind::Entry)];
    let add_root = |roots: &mut Vec<(BlockId, RootKind)>, entry: usize, kind: RootKind| {
        if let Some(&id) = entry_to_block.get(&entry) {
            if !roots.iter().any(|(b, _)| *b == id) {
                roots.push((id, kind));
            }
        }
    };
    for (i, scope) in scopes.iter().enumerate() {
        if let ScopeKind::Filter { filter_begin } = scope.kind {
            add_root(&mut roots, filter_begin, RootKind::Filter(i));
        }
        add_root(&mut roots, scope.handler_begin, RootKind::Handler(i));
    }
    for instr in stream {
        if instr.opcode.flow() == FlowControl::Leave {
            if let Some(target) = instr.target() {
                add_root(&mut roots, target, RootKind::LeaveTarget);
            }
        }
    }

    for &(id, kind) in &roots {
        blocks[id.index()].incoming_exception = match kind {
            RootKind::Filter(_) => Some(TacType::Object),
            RootKind::Handler(i) => match &scopes[i].kind {
                ScopeKind::Catch(t) => Some(t.clone()),
                ScopeKind::Filter { .. } => Some(TacType::Object),
                ScopeKind::Finally | ScopeKind::Fault => None,
            },
            RootKind::Entry | RootKind::LeaveTarget => None,
        };
    }

    Ok(ControlFlowGraph { blocks, roots, entry_to_block })
}

/// Collect all instruction indices that start a basic block, sorted
fn collect_leaders(stream: &InstructionStream, scopes: &[EhScope]) -> Result<Vec<usize>, CompileError> {
    let len = stream.len();
    let mut leaders = FxHashSet::default();
    leaders.insert(0);

    for instr in stream {
        for target in instr.targets() {
            if target >= len {
                return Err(CompileError::DanglingTarget { index: instr.index, target });
            }
            leaders.insert(target);
        }
        if instr.opcode.flow().ends_block() {
            leaders.insert(instr.index + 1);
        }
    }

    for scope in scopes {
        leaders.extend([scope.try_begin, scope.try_end, scope.handler_begin, scope.handler_end]);
        if let ScopeKind::Filter { filter_begin } = scope.kind {
            leaders.insert(filter_begin);
        }
    }

    // Falling off the last instruction is checked when edges are built
    leaders.retain(|&l| l < len);
    let mut sorted: Vec<usize> = leaders.into_iter().collect();
    sorted.sort_unstable();
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cil_bytecode::{Opcode, Operand};

    fn stream(ops: Vec<(Opcode, Operand)>) -> InstructionStream {
        InstructionStream::from_ops(ops)
    }

    fn op(o: Opcode) -> (Opcode, Operand) {
        (o, Operand::None)
    }

    #[test]
    fn test_linear_code() {
        let s = stream(vec![(Opcode::LdcI4, Operand::Int32(1)), op(Opcode::Pop), op(Opcode::Ret)]);
        let cfg = build_cfg(&s, &[]).unwrap();
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.block(BlockId(0)).instrs(), 0..3);
        assert!(cfg.successors(BlockId(0)).is_empty());
        assert_eq!(cfg.roots, vec![(BlockId(0), RootKind::Entry)]);
    }

    #[test]
    fn test_conditional_branch_target_first() {
        // 0 ldarg.0; 1 brtrue 4; 2 ldc.i4.0; 3 ret; 4 ldc.i4.1; 5 ret
        let s = stream(vec![
            op(Opcode::Ldarg0),
            (Opcode::Brtrue, Operand::Target(4)),
            op(Opcode::LdcI4_0),
            op(Opcode::Ret),
            op(Opcode::LdcI4_1),
            op(Opcode::Ret),
        ]);
        let cfg = build_cfg(&s, &[]).unwrap();
        assert_eq!(cfg.block_count(), 3);
        let b4 = cfg.block_at(4).unwrap();
        let b2 = cfg.block_at(2).unwrap();
        assert_eq!(cfg.successors(BlockId(0)), &[b4, b2]);
        assert_eq!(cfg.predecessors(b4), &[BlockId(0)]);
    }

    #[test]
    fn test_loop_back_edge() {
        // 0 nop; 1 ldarg.0; 2 brtrue 1; 3 ret
        let s = stream(vec![
            op(Opcode::Nop),
            op(Opcode::Ldarg0),
            (Opcode::Brtrue, Operand::Target(1)),
            op(Opcode::Ret),
        ]);
        let cfg = build_cfg(&s, &[]).unwrap();
        let header = cfg.block_at(1).unwrap();
        assert_eq!(cfg.predecessors(header), &[BlockId(0), header]);
    }

    #[test]
    fn test_switch_edges_deduplicated() {
        // 0 ldarg.0; 1 switch (3, 3, 4); 2 nop; 3 nop; 4 ret
        let s = stream(vec![
            op(Opcode::Ldarg0),
            (Opcode::Switch, Operand::Switch(vec![3, 3, 4])),
            op(Opcode::Nop),
            op(Opcode::Nop),
            op(Opcode::Ret),
        ]);
        let cfg = build_cfg(&s, &[]).unwrap();
        let succ: Vec<usize> = cfg.successors(BlockId(0)).iter().map(|b| cfg.block(*b).entry).collect();
        assert_eq!(succ, vec![3, 4, 2]);
    }

    #[test]
    fn test_handler_roots() {
        // try { 0 nop; 1 leave 4 } catch { 2 pop; 3 leave 4 } 4 ret
        let s = stream(vec![
            op(Opcode::Nop),
            (Opcode::Leave, Operand::Target(4)),
            op(Opcode::Pop),
            (Opcode::Leave, Operand::Target(4)),
            op(Opcode::Ret),
        ]);
        let ex = TacType::class("System.Exception");
        let scopes = vec![EhScope::new(ScopeKind::Catch(ex.clone()), 0..2, 2..4)];
        let cfg = build_cfg(&s, &scopes).unwrap();

        let handler = cfg.block_at(2).unwrap();
        let exit = cfg.block_at(4).unwrap();
        assert_eq!(cfg.root_kind(handler), Some(RootKind::Handler(0)));
        assert_eq!(cfg.root_kind(exit), Some(RootKind::LeaveTarget));
        assert_eq!(cfg.block(handler).incoming_exception, Some(ex));
        assert!(cfg.successors(BlockId(0)).is_empty());
        assert!(cfg.predecessors(exit).is_empty());
    }

    #[test]
    fn test_dangling_target() {
        let s = stream(vec![(Opcode::Br, Operand::Target(9)), op(Opcode::Ret)]);
        assert_eq!(
            build_cfg(&s, &[]).unwrap_err(),
            CompileError::DanglingTarget { index: 0, target: 9 }
        );
    }

    #[test]
    fn test_fall_off_end() {
        let s = stream(vec![op(Opcode::Nop)]);
        assert_eq!(
            build_cfg(&s, &[]).unwrap_err(),
            CompileError::DanglingTarget { index: 0, target: 1 }
        );
    }

    #[test]
    fn test_empty_method() {
        let cfg = build_cfg(&InstructionStream::default(), &[]).unwrap();
        assert_eq!(cfg.block_count(), 0);
        assert!(cfg.roots.is_empty());
    }
}
