//! Control-flow and stack analysis over decoded instructions

pub mod cfg;
pub mod stack;

pub use cfg::{build_cfg, BasicBlock, BlockId, ControlFlowGraph, RootKind};
pub use stack::EvalStack;
