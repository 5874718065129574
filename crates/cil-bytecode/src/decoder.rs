//! CIL instruction decoder
//!
//! Decodes a raw method body into an [`InstructionStream`]. Branch
//! displacements are resolved to instruction indices in a second pass, so a
//! displacement that does not land on an instruction boundary is rejected
//! here rather than surfacing later as a dangling target.

use rustc_hash::FxHashMap;

use crate::instruction::{Instruction, InstructionStream, Operand, Token};
use crate::opcode::{Opcode, OperandKind, EXTENDED_PREFIX};

/// Error during bytecode decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Unknown one-byte opcode
    #[error("Invalid opcode byte {byte:#04x} at offset {offset}")]
    InvalidOpcode {
        /// The opcode byte
        byte: u8,
        /// Offset in the body
        offset: u32,
    },

    /// Unknown second byte after the `0xFE` prefix
    #[error("Invalid extended opcode 0xfe {byte:#04x} at offset {offset}")]
    InvalidExtendedOpcode {
        /// The second opcode byte
        byte: u8,
        /// Offset in the body
        offset: u32,
    },

    /// Body ends in the middle of an instruction
    #[error("Unexpected end of bytecode in instruction at offset {0}")]
    UnexpectedEnd(u32),

    /// Branch displacement that does not land on an instruction
    #[error("Branch at offset {offset} targets {target}, which is not an instruction boundary")]
    DanglingTarget {
        /// Offset of the branch instruction
        offset: u32,
        /// Computed absolute target offset
        target: i64,
    },

    /// Exception clause boundary that does not land on an instruction
    #[error("Exception clause {clause} has boundary {offset} which is not an instruction boundary")]
    DanglingClauseBoundary {
        /// Clause position in the declared clause list
        clause: usize,
        /// The offending byte offset
        offset: u32,
    },
}

/// Operand as read from the byte stream, before target resolution
enum RawOperand {
    Resolved(Operand),
    Branch(i64),
    Switch(Vec<i64>),
}

/// Decode all instructions in a method body
pub fn decode_method(code: &[u8]) -> Result<InstructionStream, DecodeError> {
    let mut raw = Vec::new();
    let mut pos = 0usize;

    while pos < code.len() {
        let offset = pos as u32;
        let byte = code[pos];
        pos += 1;

        let opcode = if byte == EXTENDED_PREFIX {
            let second = read_u8(code, &mut pos, offset)?;
            Opcode::from_extended(second)
                .ok_or(DecodeError::InvalidExtendedOpcode { byte: second, offset })?
        } else {
            Opcode::from_byte(byte).ok_or(DecodeError::InvalidOpcode { byte, offset })?
        };

        let operand = decode_operand(opcode, code, &mut pos, offset)?;
        let size = pos as u32 - offset;
        raw.push((offset, size, opcode, operand));
    }

    let offset_to_index: FxHashMap<u32, usize> = raw
        .iter()
        .enumerate()
        .map(|(index, (offset, ..))| (*offset, index))
        .collect();

    let resolve = |from: u32, target: i64| -> Result<usize, DecodeError> {
        u32::try_from(target)
            .ok()
            .and_then(|t| offset_to_index.get(&t).copied())
            .ok_or(DecodeError::DanglingTarget { offset: from, target })
    };

    let mut instrs = Vec::with_capacity(raw.len());
    for (index, (offset, size, opcode, operand)) in raw.into_iter().enumerate() {
        let operand = match operand {
            RawOperand::Resolved(op) => op,
            RawOperand::Branch(target) => Operand::Target(resolve(offset, target)?),
            RawOperand::Switch(targets) => Operand::Switch(
                targets
                    .into_iter()
                    .map(|t| resolve(offset, t))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        instrs.push(Instruction { index, offset, size, opcode, operand });
    }

    Ok(InstructionStream::new(instrs))
}

fn decode_operand(
    opcode: Opcode,
    code: &[u8],
    pos: &mut usize,
    offset: u32,
) -> Result<RawOperand, DecodeError> {
    let operand = match opcode.operand_kind() {
        OperandKind::None => Operand::None,
        OperandKind::ShortInt => Operand::Int32(read_u8(code, pos, offset)? as i8 as i32),
        OperandKind::Int32 => Operand::Int32(read_i32(code, pos, offset)?),
        OperandKind::Int64 => Operand::Int64(i64::from_le_bytes(read_array(code, pos, offset)?)),
        OperandKind::Float32 => Operand::Float32(f32::from_le_bytes(read_array(code, pos, offset)?)),
        OperandKind::Float64 => Operand::Float64(f64::from_le_bytes(read_array(code, pos, offset)?)),
        OperandKind::ShortVar => Operand::Var(read_u8(code, pos, offset)? as u16),
        OperandKind::Var => Operand::Var(u16::from_le_bytes(read_array(code, pos, offset)?)),
        OperandKind::Token => Operand::Token(Token(read_i32(code, pos, offset)? as u32)),
        OperandKind::Byte => Operand::Byte(read_u8(code, pos, offset)?),
        OperandKind::ShortBranch => {
            let disp = read_u8(code, pos, offset)? as i8 as i64;
            return Ok(RawOperand::Branch(*pos as i64 + disp));
        }
        OperandKind::Branch => {
            let disp = read_i32(code, pos, offset)? as i64;
            return Ok(RawOperand::Branch(*pos as i64 + disp));
        }
        OperandKind::Switch => {
            let count = read_i32(code, pos, offset)? as u32 as usize;
            if code.len().saturating_sub(*pos) < count.saturating_mul(4) {
                return Err(DecodeError::UnexpectedEnd(offset));
            }
            let mut disps = Vec::with_capacity(count);
            for _ in 0..count {
                disps.push(read_i32(code, pos, offset)? as i64);
            }
            // Displacements are relative to the end of the whole switch instruction
            let base = *pos as i64;
            return Ok(RawOperand::Switch(disps.into_iter().map(|d| base + d).collect()));
        }
    };
    Ok(RawOperand::Resolved(operand))
}

fn read_u8(code: &[u8], pos: &mut usize, offset: u32) -> Result<u8, DecodeError> {
    let v = *code.get(*pos).ok_or(DecodeError::UnexpectedEnd(offset))?;
    *pos += 1;
    Ok(v)
}

fn read_i32(code: &[u8], pos: &mut usize, offset: u32) -> Result<i32, DecodeError> {
    Ok(i32::from_le_bytes(read_array(code, pos, offset)?))
}

fn read_array<const N: usize>(code: &[u8], pos: &mut usize, offset: u32) -> Result<[u8; N], DecodeError> {
    let bytes = code
        .get(*pos..*pos + N)
        .ok_or(DecodeError::UnexpectedEnd(offset))?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    *pos += N;
    Ok(out)
}
