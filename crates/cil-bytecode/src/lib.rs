//! CIL bytecode definitions
//!
//! This crate provides the ECMA-335 opcode table, the index-addressed
//! instruction stream, the decoder from raw method bodies, exception clause
//! resolution and an assembler for building method bodies.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod clause;
pub mod decoder;
pub mod encoder;
pub mod instruction;
pub mod opcode;

pub use clause::{resolve_clauses, EhClause, EhClauseKind, RawClauseKind, RawEhClause};
pub use decoder::{decode_method, DecodeError};
pub use encoder::{Assembled, EncodeError, IlWriter, Label};
pub use instruction::{Instruction, InstructionStream, Operand, Token};
pub use opcode::{FlowControl, Opcode, OperandKind, EXTENDED_PREFIX};
