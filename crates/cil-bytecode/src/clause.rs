//! Exception handling clauses
//!
//! Method headers declare clauses in byte offsets and lengths. Once the body
//! is decoded they are resolved to half-open instruction index ranges.

use serde::{Deserialize, Serialize};

use crate::decoder::DecodeError;
use crate::instruction::{InstructionStream, Token};

/// Clause kind as declared in the method header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawClauseKind {
    /// Typed catch handler
    Catch(Token),
    /// Filter handler; the filter block starts at `filter_offset`
    Filter {
        /// Byte offset of the filter block
        filter_offset: u32,
    },
    /// Finally handler
    Finally,
    /// Fault handler
    Fault,
}

/// Exception clause in byte offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEhClause {
    /// Clause kind
    pub kind: RawClauseKind,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region in bytes
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler in bytes
    pub handler_length: u32,
}

impl RawEhClause {
    /// Build a clause from start/end offsets
    pub fn new(kind: RawClauseKind, try_start: u32, try_end: u32, handler_start: u32, handler_end: u32) -> Self {
        RawEhClause {
            kind,
            try_offset: try_start,
            try_length: try_end.saturating_sub(try_start),
            handler_offset: handler_start,
            handler_length: handler_end.saturating_sub(handler_start),
        }
    }

    /// End of the protected region (exclusive)
    pub fn try_end(&self) -> u32 {
        self.try_offset + self.try_length
    }

    /// End of the handler (exclusive)
    pub fn handler_end(&self) -> u32 {
        self.handler_offset + self.handler_length
    }
}

/// Clause kind with filter entry resolved to an instruction index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EhClauseKind {
    /// Typed catch handler
    Catch(Token),
    /// Filter handler
    Filter {
        /// Index of the first filter instruction
        filter_start: usize,
    },
    /// Finally handler
    Finally,
    /// Fault handler
    Fault,
}

/// Exception clause in instruction indices; all ranges are half-open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EhClause {
    /// Clause kind
    pub kind: EhClauseKind,
    /// First instruction of the protected region
    pub try_start: usize,
    /// One past the last protected instruction
    pub try_end: usize,
    /// First handler instruction
    pub handler_start: usize,
    /// One past the last handler instruction
    pub handler_end: usize,
}

/// Resolve header clauses against a decoded body
pub fn resolve_clauses(stream: &InstructionStream, raw: &[RawEhClause]) -> Result<Vec<EhClause>, DecodeError> {
    raw.iter()
        .enumerate()
        .map(|(clause, c)| {
            let index = |offset: u32| {
                stream
                    .index_of_offset(offset)
                    .ok_or(DecodeError::DanglingClauseBoundary { clause, offset })
            };
            let kind = match c.kind {
                RawClauseKind::Catch(token) => EhClauseKind::Catch(token),
                RawClauseKind::Filter { filter_offset } => EhClauseKind::Filter {
                    filter_start: index(filter_offset)?,
                },
                RawClauseKind::Finally => EhClauseKind::Finally,
                RawClauseKind::Fault => EhClauseKind::Fault,
            };
            Ok(EhClause {
                kind,
                try_start: index(c.try_offset)?,
                try_end: index(c.try_end())?,
                handler_start: index(c.handler_offset)?,
                handler_end: index(c.handler_end())?,
            })
        })
        .collect()
}
