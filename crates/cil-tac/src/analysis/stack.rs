//! Evaluation stack used while replaying a block

use crate::error::CompileError;
use crate::ir::Value;

/// Symbolic evaluation stack.
///
/// Holds only [`Value`]s: anything more complex is materialized into a
/// temporary before it is pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalStack {
    slots: Vec<Value>,
}

impl EvalStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stack from an entry snapshot, bottom first
    pub fn from_snapshot(slots: Vec<Value>) -> Self {
        EvalStack { slots }
    }

    /// Push a value
    pub fn push(&mut self, value: Value) {
        self.slots.push(value);
    }

    /// Pop the top value, failing with the opcode and position on underflow
    pub fn pop(&mut self, opcode: &'static str, index: usize) -> Result<Value, CompileError> {
        self.slots.pop().ok_or(CompileError::StackUnderflow { opcode, index })
    }

    /// Pop `n` values, returned bottom first
    pub fn pop_n(&mut self, n: usize, opcode: &'static str, index: usize) -> Result<Vec<Value>, CompileError> {
        if self.slots.len() < n {
            return Err(CompileError::StackUnderflow { opcode, index });
        }
        Ok(self.slots.split_off(self.slots.len() - n))
    }

    /// Top value without popping
    pub fn peek(&self) -> Option<&Value> {
        self.slots.last()
    }

    /// Current depth
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Whether the stack is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Copy of the current contents, bottom first
    pub fn snapshot(&self) -> Vec<Value> {
        self.slots.clone()
    }

    /// Drop all values
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Whether any slot holds `value`
    pub fn contains(&self, value: &Value) -> bool {
        self.slots.contains(value)
    }

    /// Replace every slot holding `value` with `replacement`.
    ///
    /// Used before a store to a local or parameter that is still on the
    /// stack, so the stale read keeps its old contents.
    pub fn replace(&mut self, value: &Value, replacement: &Value) {
        for slot in &mut self.slots {
            if slot == value {
                *slot = replacement.clone();
            }
        }
    }
}
