//! Decoded instructions and the index-addressed instruction stream
//!
//! Instructions live in a plain vector; neighbours are found by index and
//! branch operands hold the index of their target instruction.

use serde::{Deserialize, Serialize};

use crate::opcode::Opcode;

/// Metadata token: table id in the high byte, row number in the low 24 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(pub u32);

impl Token {
    /// `TypeRef` table
    pub const TYPE_REF: u8 = 0x01;
    /// `TypeDef` table
    pub const TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const FIELD: u8 = 0x04;
    /// `MethodDef` table
    pub const METHOD_DEF: u8 = 0x06;
    /// `MemberRef` table (field or method reference)
    pub const MEMBER_REF: u8 = 0x0A;
    /// `StandAloneSig` table
    pub const STANDALONE_SIG: u8 = 0x11;
    /// `TypeSpec` table
    pub const TYPE_SPEC: u8 = 0x1B;
    /// `MethodSpec` table
    pub const METHOD_SPEC: u8 = 0x2B;
    /// User string heap
    pub const USER_STRING: u8 = 0x70;

    /// Build a token from table id and row
    pub fn new(table: u8, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Table id
    pub fn table(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Row number within the table
    pub fn row(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Whether the token names a type
    pub fn is_type(self) -> bool {
        matches!(self.table(), Self::TYPE_REF | Self::TYPE_DEF | Self::TYPE_SPEC)
    }

    /// Whether the token names a method (MemberRef may also be a field)
    pub fn is_method(self) -> bool {
        matches!(self.table(), Self::METHOD_DEF | Self::METHOD_SPEC)
    }

    /// Whether the token names a field (MemberRef may also be a method)
    pub fn is_field(self) -> bool {
        self.table() == Self::FIELD
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Inline operand of a decoded instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// No operand
    None,
    /// Integer immediate (`ldc.i4*`, sign-extended short forms)
    Int32(i32),
    /// `ldc.i8` immediate
    Int64(i64),
    /// `ldc.r4` immediate
    Float32(f32),
    /// `ldc.r8` immediate
    Float64(f64),
    /// Local or argument index (short forms widened)
    Var(u16),
    /// Metadata token
    Token(Token),
    /// Branch target as an instruction index
    Target(usize),
    /// Switch arm targets as instruction indices
    Switch(Vec<usize>),
    /// Byte immediate (`unaligned.`, `no.`)
    Byte(u8),
}

/// A decoded instruction with a resolved operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Position in the stream
    pub index: usize,
    /// Byte offset in the method body
    pub offset: u32,
    /// Encoded size in bytes
    pub size: u32,
    /// The opcode
    pub opcode: Opcode,
    /// Decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// Branch target index for single-target branches
    pub fn target(&self) -> Option<usize> {
        match self.operand {
            Operand::Target(t) => Some(t),
            _ => None,
        }
    }

    /// All branch targets (one for branches and leave, N for switch)
    pub fn targets(&self) -> Vec<usize> {
        match &self.operand {
            Operand::Target(t) => vec![*t],
            Operand::Switch(ts) => ts.clone(),
            _ => Vec::new(),
        }
    }

    /// Metadata token operand
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(t) => Some(t),
            _ => None,
        }
    }

    /// Byte offset of the following instruction
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, " {}", v),
            Operand::Int64(v) => write!(f, " {}", v),
            Operand::Float32(v) => write!(f, " {}", v),
            Operand::Float64(v) => write!(f, " {}", v),
            Operand::Var(v) => write!(f, " {}", v),
            Operand::Token(t) => write!(f, " {}", t),
            Operand::Target(t) => write!(f, " #{}", t),
            Operand::Switch(ts) => {
                write!(f, " (")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "#{}", t)?;
                }
                write!(f, ")")
            }
            Operand::Byte(b) => write!(f, " {}", b),
        }
    }
}

/// The decoded instructions of one method body, addressed by index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionStream {
    instrs: Vec<Instruction>,
    code_size: u32,
}

impl InstructionStream {
    /// Wrap already-resolved instructions.
    ///
    /// Indices are rewritten to be dense; offsets and sizes are kept.
    pub fn new(mut instrs: Vec<Instruction>) -> Self {
        for (i, instr) in instrs.iter_mut().enumerate() {
            instr.index = i;
        }
        let code_size = instrs.last().map(|i| i.next_offset()).unwrap_or(0);
        InstructionStream { instrs, code_size }
    }

    /// Build a stream from opcode/operand pairs, synthesizing byte offsets
    /// from the encoded sizes. Branch operands must already be indices.
    pub fn from_ops(ops: Vec<(Opcode, Operand)>) -> Self {
        let mut offset = 0u32;
        let instrs = ops
            .into_iter()
            .enumerate()
            .map(|(index, (opcode, operand))| {
                let size = match &operand {
                    Operand::Switch(ts) => 1 + 4 + 4 * ts.len(),
                    _ => opcode.encoded_size().unwrap_or(1),
                } as u32;
                let instr = Instruction { index, offset, size, opcode, operand };
                offset += size;
                instr
            })
            .collect();
        InstructionStream::new(instrs)
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// Whether the stream is empty
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Total byte size of the method body
    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    /// Instruction at `index`
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instrs.get(index)
    }

    /// Instructions as a slice
    pub fn as_slice(&self) -> &[Instruction] {
        &self.instrs
    }

    /// All instructions in order
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instrs.iter()
    }

    /// Index of the instruction starting at byte `offset`.
    ///
    /// The end of the body maps to `len()` so that exclusive region ends
    /// can be resolved.
    pub fn index_of_offset(&self, offset: u32) -> Option<usize> {
        if offset == self.code_size {
            return Some(self.instrs.len());
        }
        self.instrs.binary_search_by_key(&offset, |i| i.offset).ok()
    }
}

impl std::ops::Index<usize> for InstructionStream {
    type Output = Instruction;

    fn index(&self, index: usize) -> &Instruction {
        &self.instrs[index]
    }
}

impl<'a> IntoIterator for &'a InstructionStream {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instrs.iter()
    }
}
