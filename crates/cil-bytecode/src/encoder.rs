//! CIL assembler
//!
//! [`IlWriter`] emits opcodes and operands into a byte buffer. Branches refer
//! to [`Label`]s which are patched with real displacements in [`IlWriter::finish`].

use serde::Serialize;
use thiserror::Error;

use crate::instruction::Token;
use crate::opcode::{Opcode, OperandKind};

/// Errors raised while assembling a method body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A branch refers to a label that was never marked
    #[error("Label {0} is referenced but never marked")]
    UnboundLabel(u32),

    /// A label was marked twice
    #[error("Label {0} is marked more than once")]
    ReboundLabel(u32),

    /// A short branch displacement does not fit in a signed byte
    #[error("Short branch at offset {offset} cannot reach displacement {displacement}")]
    ShortBranchOutOfRange {
        /// Offset of the branch instruction
        offset: u32,
        /// Required displacement
        displacement: i64,
    },

    /// The emit call does not match the opcode's operand shape
    #[error("Opcode {opcode} at offset {offset} expects a {expected:?} operand")]
    OperandMismatch {
        /// Mnemonic of the opcode
        opcode: &'static str,
        /// Offset of the instruction
        offset: u32,
        /// The operand shape the opcode actually takes
        expected: OperandKind,
    },
}

/// Forward-referenceable code position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Label(u32);

impl Label {
    /// Label number in definition order
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Pending displacement patch
struct Fixup {
    /// Where the displacement bytes live
    at: usize,
    /// 1 for short branches, 4 otherwise
    width: usize,
    /// Offset the displacement is relative to
    base: u32,
    /// Offset of the instruction, for error reporting
    instr_offset: u32,
    label: Label,
}

/// Assembled method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    /// Encoded instruction bytes
    pub code: Vec<u8>,
    labels: Vec<u32>,
}

impl Assembled {
    /// Byte offset a label was bound to
    pub fn offset(&self, label: Label) -> u32 {
        self.labels[label.0 as usize]
    }
}

/// Method body assembler
#[derive(Default)]
pub struct IlWriter {
    buffer: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    error: Option<EncodeError>,
}

impl IlWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current byte offset
    pub fn offset(&self) -> u32 {
        self.buffer.len() as u32
    }

    // ===== Labels =====

    /// Allocate a new unbound label
    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind a label to the current offset
    pub fn mark_label(&mut self, label: Label) {
        let offset = self.offset();
        if self.labels[label.0 as usize].is_some() {
            self.fail(EncodeError::ReboundLabel(label.0));
        } else {
            self.labels[label.0 as usize] = Some(offset);
        }
    }

    // ===== Emission =====

    /// Emit an opcode without operand
    pub fn emit(&mut self, op: Opcode) -> &mut Self {
        self.expect(op, &[OperandKind::None]);
        self.emit_opcode(op);
        self
    }

    /// Emit an integer immediate (`ldc.i4`, `ldc.i4.s`)
    pub fn emit_i32(&mut self, op: Opcode, value: i32) -> &mut Self {
        self.expect(op, &[OperandKind::Int32, OperandKind::ShortInt]);
        self.emit_opcode(op);
        if op.operand_kind() == OperandKind::ShortInt {
            self.buffer.push(value as i8 as u8);
        } else {
            self.buffer.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    /// Emit `ldc.i8`
    pub fn emit_i64(&mut self, value: i64) -> &mut Self {
        self.emit_opcode(Opcode::LdcI8);
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emit `ldc.r4`
    pub fn emit_f32(&mut self, value: f32) -> &mut Self {
        self.emit_opcode(Opcode::LdcR4);
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emit `ldc.r8`
    pub fn emit_f64(&mut self, value: f64) -> &mut Self {
        self.emit_opcode(Opcode::LdcR8);
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emit a local or argument access
    pub fn emit_var(&mut self, op: Opcode, index: u16) -> &mut Self {
        self.expect(op, &[OperandKind::Var, OperandKind::ShortVar]);
        self.emit_opcode(op);
        if op.operand_kind() == OperandKind::ShortVar {
            self.buffer.push(index as u8);
        } else {
            self.buffer.extend_from_slice(&index.to_le_bytes());
        }
        self
    }

    /// Emit an opcode with a metadata token
    pub fn emit_token(&mut self, op: Opcode, token: Token) -> &mut Self {
        self.expect(op, &[OperandKind::Token]);
        self.emit_opcode(op);
        self.buffer.extend_from_slice(&token.0.to_le_bytes());
        self
    }

    /// Emit a byte-immediate prefix (`unaligned.`, `no.`)
    pub fn emit_byte(&mut self, op: Opcode, value: u8) -> &mut Self {
        self.expect(op, &[OperandKind::Byte]);
        self.emit_opcode(op);
        self.buffer.push(value);
        self
    }

    /// Emit a branch or leave to `label`
    pub fn emit_branch(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.expect(op, &[OperandKind::Branch, OperandKind::ShortBranch]);
        let instr_offset = self.offset();
        self.emit_opcode(op);
        let width = if op.operand_kind() == OperandKind::ShortBranch { 1 } else { 4 };
        let at = self.buffer.len();
        self.buffer.resize(at + width, 0);
        self.fixups.push(Fixup { at, width, base: self.offset(), instr_offset, label });
        self
    }

    /// Emit a `switch` over `labels`
    pub fn emit_switch(&mut self, labels: &[Label]) -> &mut Self {
        let instr_offset = self.offset();
        self.emit_opcode(Opcode::Switch);
        self.buffer.extend_from_slice(&(labels.len() as u32).to_le_bytes());
        let table = self.buffer.len();
        let base = (table + 4 * labels.len()) as u32;
        self.buffer.resize(base as usize, 0);
        for (i, &label) in labels.iter().enumerate() {
            self.fixups.push(Fixup { at: table + 4 * i, width: 4, base, instr_offset, label });
        }
        self
    }

    // ===== Shorthands =====

    /// Load an int32 constant using the shortest encoding
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        match value {
            -1 => self.emit(Opcode::LdcI4M1),
            0 => self.emit(Opcode::LdcI4_0),
            1 => self.emit(Opcode::LdcI4_1),
            2 => self.emit(Opcode::LdcI4_2),
            3 => self.emit(Opcode::LdcI4_3),
            4 => self.emit(Opcode::LdcI4_4),
            5 => self.emit(Opcode::LdcI4_5),
            6 => self.emit(Opcode::LdcI4_6),
            7 => self.emit(Opcode::LdcI4_7),
            8 => self.emit(Opcode::LdcI4_8),
            v if i8::try_from(v).is_ok() => self.emit_i32(Opcode::LdcI4S, v),
            v => self.emit_i32(Opcode::LdcI4, v),
        }
    }

    /// Load a local using the shortest encoding
    pub fn ldloc(&mut self, index: u16) -> &mut Self {
        match index {
            0 => self.emit(Opcode::Ldloc0),
            1 => self.emit(Opcode::Ldloc1),
            2 => self.emit(Opcode::Ldloc2),
            3 => self.emit(Opcode::Ldloc3),
            i if i <= 0xFF => self.emit_var(Opcode::LdlocS, i),
            i => self.emit_var(Opcode::Ldloc, i),
        }
    }

    /// Store to a local using the shortest encoding
    pub fn stloc(&mut self, index: u16) -> &mut Self {
        match index {
            0 => self.emit(Opcode::Stloc0),
            1 => self.emit(Opcode::Stloc1),
            2 => self.emit(Opcode::Stloc2),
            3 => self.emit(Opcode::Stloc3),
            i if i <= 0xFF => self.emit_var(Opcode::StlocS, i),
            i => self.emit_var(Opcode::Stloc, i),
        }
    }

    /// Load an argument using the shortest encoding
    pub fn ldarg(&mut self, index: u16) -> &mut Self {
        match index {
            0 => self.emit(Opcode::Ldarg0),
            1 => self.emit(Opcode::Ldarg1),
            2 => self.emit(Opcode::Ldarg2),
            3 => self.emit(Opcode::Ldarg3),
            i if i <= 0xFF => self.emit_var(Opcode::LdargS, i),
            i => self.emit_var(Opcode::Ldarg, i),
        }
    }

    /// Patch all branches and return the encoded body
    pub fn finish(mut self) -> Result<Assembled, EncodeError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        let mut labels = Vec::with_capacity(self.labels.len());
        for (i, bound) in self.labels.iter().enumerate() {
            // Unreferenced unbound labels are harmless; report only used ones
            let referenced = self.fixups.iter().any(|f| f.label.0 as usize == i);
            match bound {
                Some(offset) => labels.push(*offset),
                None if referenced => return Err(EncodeError::UnboundLabel(i as u32)),
                None => labels.push(u32::MAX),
            }
        }

        for fixup in &self.fixups {
            let target = labels[fixup.label.0 as usize] as i64;
            let displacement = target - fixup.base as i64;
            if fixup.width == 1 {
                let byte = i8::try_from(displacement).map_err(|_| EncodeError::ShortBranchOutOfRange {
                    offset: fixup.instr_offset,
                    displacement,
                })?;
                self.buffer[fixup.at] = byte as u8;
            } else {
                let bytes = (displacement as i32).to_le_bytes();
                self.buffer[fixup.at..fixup.at + 4].copy_from_slice(&bytes);
            }
        }

        Ok(Assembled { code: self.buffer, labels })
    }

    fn emit_opcode(&mut self, op: Opcode) {
        let (prefix, byte) = op.encoding();
        if let Some(p) = prefix {
            self.buffer.push(p);
        }
        self.buffer.push(byte);
    }

    fn expect(&mut self, op: Opcode, allowed: &[OperandKind]) {
        let kind = op.operand_kind();
        if !allowed.contains(&kind) {
            self.fail(EncodeError::OperandMismatch {
                opcode: op.name(),
                offset: self.offset(),
                expected: kind,
            });
        }
    }

    fn fail(&mut self, err: EncodeError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_short_branch() {
        let mut w = IlWriter::new();
        let end = w.define_label();
        w.emit_branch(Opcode::BrS, end);
        w.emit(Opcode::Nop);
        w.mark_label(end);
        w.emit(Opcode::Ret);
        let asm = w.finish().unwrap();
        assert_eq!(asm.code, vec![0x2B, 0x01, 0x00, 0x2A]);
        assert_eq!(asm.offset(end), 3);
    }

    #[test]
    fn test_backward_long_branch() {
        let mut w = IlWriter::new();
        let top = w.define_label();
        w.mark_label(top);
        w.emit(Opcode::Nop);
        w.emit_branch(Opcode::Br, top);
        let asm = w.finish().unwrap();
        assert_eq!(asm.code, vec![0x00, 0x38, 0xFA, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_switch_relative_to_end() {
        let mut w = IlWriter::new();
        let a = w.define_label();
        let b = w.define_label();
        w.emit_switch(&[a, b]);
        w.mark_label(a);
        w.emit(Opcode::Nop);
        w.mark_label(b);
        w.emit(Opcode::Ret);
        let asm = w.finish().unwrap();
        assert_eq!(asm.code.len(), 15);
        assert_eq!(&asm.code[5..9], &0i32.to_le_bytes());
        assert_eq!(&asm.code[9..13], &1i32.to_le_bytes());
    }

    #[test]
    fn test_shorthand_encodings() {
        let mut w = IlWriter::new();
        w.ldc_i4(3).ldc_i4(-100).ldc_i4(1000).ldloc(2).stloc(300).ldarg(9);
        let asm = w.finish().unwrap();
        assert_eq!(
            asm.code,
            vec![0x19, 0x1F, 0x9C, 0x20, 0xE8, 0x03, 0, 0, 0x08, 0xFE, 0x0E, 0x2C, 0x01, 0x0E, 9]
        );
    }

    #[test]
    fn test_unbound_label() {
        let mut w = IlWriter::new();
        let l = w.define_label();
        w.emit_branch(Opcode::Br, l);
        assert_eq!(w.finish().unwrap_err(), EncodeError::UnboundLabel(0));
    }

    #[test]
    fn test_short_branch_out_of_range() {
        let mut w = IlWriter::new();
        let l = w.define_label();
        w.emit_branch(Opcode::BrS, l);
        for _ in 0..200 {
            w.emit(Opcode::Nop);
        }
        w.mark_label(l);
        assert!(matches!(
            w.finish().unwrap_err(),
            EncodeError::ShortBranchOutOfRange { offset: 0, displacement: 200 }
        ));
    }

    #[test]
    fn test_operand_mismatch() {
        let mut w = IlWriter::new();
        w.emit(Opcode::Call);
        assert!(matches!(w.finish().unwrap_err(), EncodeError::OperandMismatch { opcode: "call", .. }));
    }
}
