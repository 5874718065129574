//! CIL opcodes
//!
//! The complete ECMA-335 instruction set: one-byte opcodes and the
//! `0xFE`-prefixed two-byte opcodes. Each opcode knows its mnemonic, the
//! shape of its inline operand and how it affects control flow.

use serde::{Deserialize, Serialize};

/// First byte of every two-byte opcode
pub const EXTENDED_PREFIX: u8 = 0xFE;

/// Shape of the inline operand that follows an opcode in the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// No operand
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`)
    ShortInt,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float immediate
    Float32,
    /// 64-bit float immediate
    Float64,
    /// Unsigned 8-bit local/argument index
    ShortVar,
    /// Unsigned 16-bit local/argument index
    Var,
    /// Signed 8-bit branch displacement
    ShortBranch,
    /// Signed 32-bit branch displacement
    Branch,
    /// `u32` count followed by that many `i32` displacements
    Switch,
    /// Metadata token
    Token,
    /// Unsigned 8-bit immediate (`unaligned.`, `no.`)
    Byte,
}

impl OperandKind {
    /// Encoded size of the operand in bytes (switch tables are variable)
    pub fn size(self) -> Option<usize> {
        match self {
            OperandKind::None => Some(0),
            OperandKind::ShortInt | OperandKind::ShortVar | OperandKind::ShortBranch
            | OperandKind::Byte => Some(1),
            OperandKind::Var => Some(2),
            OperandKind::Int32 | OperandKind::Float32 | OperandKind::Branch
            | OperandKind::Token => Some(4),
            OperandKind::Int64 | OperandKind::Float64 => Some(8),
            OperandKind::Switch => None,
        }
    }
}

/// How an instruction transfers control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowControl {
    /// Falls through to the next instruction
    Next,
    /// Call; execution continues at the next instruction
    Call,
    /// Unconditional branch
    Branch,
    /// Conditional branch (target or fallthrough)
    CondBranch,
    /// Multi-way branch
    Switch,
    /// Method return
    Return,
    /// Raises or re-raises an exception
    Throw,
    /// Structured exit from a protected region
    Leave,
    /// End of a finally/fault handler or a filter
    EndHandler,
    /// Prefix applying to the following instruction
    Meta,
}

impl FlowControl {
    /// Whether the instruction following this one starts a new basic block
    pub fn ends_block(self) -> bool {
        matches!(
            self,
            FlowControl::Branch
                | FlowControl::CondBranch
                | FlowControl::Switch
                | FlowControl::Return
                | FlowControl::Throw
                | FlowControl::Leave
                | FlowControl::EndHandler
        )
    }

    /// Whether execution can continue at the next instruction
    pub fn falls_through(self) -> bool {
        matches!(
            self,
            FlowControl::Next | FlowControl::Call | FlowControl::CondBranch
                | FlowControl::Switch | FlowControl::Meta
        )
    }
}

macro_rules! define_opcodes {
    (
        short { $( $s_name:ident = $s_byte:literal, $s_text:literal, $s_kind:ident; )* }
        extended { $( $e_name:ident = $e_byte:literal, $e_text:literal, $e_kind:ident; )* }
    ) => {
        /// CIL opcode enumeration
        ///
        /// Variants are named after the ECMA-335 mnemonics with dots removed
        /// (`ldc.i4.s` is `LdcI4S`, `bne.un` is `BneUn`).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Opcode {
            $( #[doc = $s_text] $s_name, )*
            $( #[doc = $e_text] $e_name, )*
        }

        impl Opcode {
            /// Decode a one-byte opcode
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $s_byte => Some(Opcode::$s_name), )*
                    _ => None,
                }
            }

            /// Decode the second byte of a `0xFE`-prefixed opcode
            pub fn from_extended(byte: u8) -> Option<Self> {
                match byte {
                    $( $e_byte => Some(Opcode::$e_name), )*
                    _ => None,
                }
            }

            /// Byte encoding: `(None, b)` for one-byte opcodes, `(Some(0xFE), b)` otherwise
            pub fn encoding(self) -> (Option<u8>, u8) {
                match self {
                    $( Opcode::$s_name => (None, $s_byte), )*
                    $( Opcode::$e_name => (Some(EXTENDED_PREFIX), $e_byte), )*
                }
            }

            /// ECMA-335 mnemonic
            pub fn name(self) -> &'static str {
                match self {
                    $( Opcode::$s_name => $s_text, )*
                    $( Opcode::$e_name => $e_text, )*
                }
            }

            /// Shape of the inline operand
            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $( Opcode::$s_name => OperandKind::$s_kind, )*
                    $( Opcode::$e_name => OperandKind::$e_kind, )*
                }
            }
        }
    };
}

define_opcodes! {
    short {
        Nop = 0x00, "nop", None;
        Break = 0x01, "break", None;
        Ldarg0 = 0x02, "ldarg.0", None;
        Ldarg1 = 0x03, "ldarg.1", None;
        Ldarg2 = 0x04, "ldarg.2", None;
        Ldarg3 = 0x05, "ldarg.3", None;
        Ldloc0 = 0x06, "ldloc.0", None;
        Ldloc1 = 0x07, "ldloc.1", None;
        Ldloc2 = 0x08, "ldloc.2", None;
        Ldloc3 = 0x09, "ldloc.3", None;
        Stloc0 = 0x0A, "stloc.0", None;
        Stloc1 = 0x0B, "stloc.1", None;
        Stloc2 = 0x0C, "stloc.2", None;
        Stloc3 = 0x0D, "stloc.3", None;
        LdargS = 0x0E, "ldarg.s", ShortVar;
        LdargaS = 0x0F, "ldarga.s", ShortVar;
        StargS = 0x10, "starg.s", ShortVar;
        LdlocS = 0x11, "ldloc.s", ShortVar;
        LdlocaS = 0x12, "ldloca.s", ShortVar;
        StlocS = 0x13, "stloc.s", ShortVar;
        Ldnull = 0x14, "ldnull", None;
        LdcI4M1 = 0x15, "ldc.i4.m1", None;
        LdcI4_0 = 0x16, "ldc.i4.0", None;
        LdcI4_1 = 0x17, "ldc.i4.1", None;
        LdcI4_2 = 0x18, "ldc.i4.2", None;
        LdcI4_3 = 0x19, "ldc.i4.3", None;
        LdcI4_4 = 0x1A, "ldc.i4.4", None;
        LdcI4_5 = 0x1B, "ldc.i4.5", None;
        LdcI4_6 = 0x1C, "ldc.i4.6", None;
        LdcI4_7 = 0x1D, "ldc.i4.7", None;
        LdcI4_8 = 0x1E, "ldc.i4.8", None;
        LdcI4S = 0x1F, "ldc.i4.s", ShortInt;
        LdcI4 = 0x20, "ldc.i4", Int32;
        LdcI8 = 0x21, "ldc.i8", Int64;
        LdcR4 = 0x22, "ldc.r4", Float32;
        LdcR8 = 0x23, "ldc.r8", Float64;
        Dup = 0x25, "dup", None;
        Pop = 0x26, "pop", None;
        Jmp = 0x27, "jmp", Token;
        Call = 0x28, "call", Token;
        Calli = 0x29, "calli", Token;
        Ret = 0x2A, "ret", None;
        BrS = 0x2B, "br.s", ShortBranch;
        BrfalseS = 0x2C, "brfalse.s", ShortBranch;
        BrtrueS = 0x2D, "brtrue.s", ShortBranch;
        BeqS = 0x2E, "beq.s", ShortBranch;
        BgeS = 0x2F, "bge.s", ShortBranch;
        BgtS = 0x30, "bgt.s", ShortBranch;
        BleS = 0x31, "ble.s", ShortBranch;
        BltS = 0x32, "blt.s", ShortBranch;
        BneUnS = 0x33, "bne.un.s", ShortBranch;
        BgeUnS = 0x34, "bge.un.s", ShortBranch;
        BgtUnS = 0x35, "bgt.un.s", ShortBranch;
        BleUnS = 0x36, "ble.un.s", ShortBranch;
        BltUnS = 0x37, "blt.un.s", ShortBranch;
        Br = 0x38, "br", Branch;
        Brfalse = 0x39, "brfalse", Branch;
        Brtrue = 0x3A, "brtrue", Branch;
        Beq = 0x3B, "beq", Branch;
        Bge = 0x3C, "bge", Branch;
        Bgt = 0x3D, "bgt", Branch;
        Ble = 0x3E, "ble", Branch;
        Blt = 0x3F, "blt", Branch;
        BneUn = 0x40, "bne.un", Branch;
        BgeUn = 0x41, "bge.un", Branch;
        BgtUn = 0x42, "bgt.un", Branch;
        BleUn = 0x43, "ble.un", Branch;
        BltUn = 0x44, "blt.un", Branch;
        Switch = 0x45, "switch", Switch;
        LdindI1 = 0x46, "ldind.i1", None;
        LdindU1 = 0x47, "ldind.u1", None;
        LdindI2 = 0x48, "ldind.i2", None;
        LdindU2 = 0x49, "ldind.u2", None;
        LdindI4 = 0x4A, "ldind.i4", None;
        LdindU4 = 0x4B, "ldind.u4", None;
        LdindI8 = 0x4C, "ldind.i8", None;
        LdindI = 0x4D, "ldind.i", None;
        LdindR4 = 0x4E, "ldind.r4", None;
        LdindR8 = 0x4F, "ldind.r8", None;
        LdindRef = 0x50, "ldind.ref", None;
        StindRef = 0x51, "stind.ref", None;
        StindI1 = 0x52, "stind.i1", None;
        StindI2 = 0x53, "stind.i2", None;
        StindI4 = 0x54, "stind.i4", None;
        StindI8 = 0x55, "stind.i8", None;
        StindR4 = 0x56, "stind.r4", None;
        StindR8 = 0x57, "stind.r8", None;
        Add = 0x58, "add", None;
        Sub = 0x59, "sub", None;
        Mul = 0x5A, "mul", None;
        Div = 0x5B, "div", None;
        DivUn = 0x5C, "div.un", None;
        Rem = 0x5D, "rem", None;
        RemUn = 0x5E, "rem.un", None;
        And = 0x5F, "and", None;
        Or = 0x60, "or", None;
        Xor = 0x61, "xor", None;
        Shl = 0x62, "shl", None;
        Shr = 0x63, "shr", None;
        ShrUn = 0x64, "shr.un", None;
        Neg = 0x65, "neg", None;
        Not = 0x66, "not", None;
        ConvI1 = 0x67, "conv.i1", None;
        ConvI2 = 0x68, "conv.i2", None;
        ConvI4 = 0x69, "conv.i4", None;
        ConvI8 = 0x6A, "conv.i8", None;
        ConvR4 = 0x6B, "conv.r4", None;
        ConvR8 = 0x6C, "conv.r8", None;
        ConvU4 = 0x6D, "conv.u4", None;
        ConvU8 = 0x6E, "conv.u8", None;
        Callvirt = 0x6F, "callvirt", Token;
        Cpobj = 0x70, "cpobj", Token;
        Ldobj = 0x71, "ldobj", Token;
        Ldstr = 0x72, "ldstr", Token;
        Newobj = 0x73, "newobj", Token;
        Castclass = 0x74, "castclass", Token;
        Isinst = 0x75, "isinst", Token;
        ConvRUn = 0x76, "conv.r.un", None;
        Unbox = 0x79, "unbox", Token;
        Throw = 0x7A, "throw", None;
        Ldfld = 0x7B, "ldfld", Token;
        Ldflda = 0x7C, "ldflda", Token;
        Stfld = 0x7D, "stfld", Token;
        Ldsfld = 0x7E, "ldsfld", Token;
        Ldsflda = 0x7F, "ldsflda", Token;
        Stsfld = 0x80, "stsfld", Token;
        Stobj = 0x81, "stobj", Token;
        ConvOvfI1Un = 0x82, "conv.ovf.i1.un", None;
        ConvOvfI2Un = 0x83, "conv.ovf.i2.un", None;
        ConvOvfI4Un = 0x84, "conv.ovf.i4.un", None;
        ConvOvfI8Un = 0x85, "conv.ovf.i8.un", None;
        ConvOvfU1Un = 0x86, "conv.ovf.u1.un", None;
        ConvOvfU2Un = 0x87, "conv.ovf.u2.un", None;
        ConvOvfU4Un = 0x88, "conv.ovf.u4.un", None;
        ConvOvfU8Un = 0x89, "conv.ovf.u8.un", None;
        ConvOvfIUn = 0x8A, "conv.ovf.i.un", None;
        ConvOvfUUn = 0x8B, "conv.ovf.u.un", None;
        Box = 0x8C, "box", Token;
        Newarr = 0x8D, "newarr", Token;
        Ldlen = 0x8E, "ldlen", None;
        Ldelema = 0x8F, "ldelema", Token;
        LdelemI1 = 0x90, "ldelem.i1", None;
        LdelemU1 = 0x91, "ldelem.u1", None;
        LdelemI2 = 0x92, "ldelem.i2", None;
        LdelemU2 = 0x93, "ldelem.u2", None;
        LdelemI4 = 0x94, "ldelem.i4", None;
        LdelemU4 = 0x95, "ldelem.u4", None;
        LdelemI8 = 0x96, "ldelem.i8", None;
        LdelemI = 0x97, "ldelem.i", None;
        LdelemR4 = 0x98, "ldelem.r4", None;
        LdelemR8 = 0x99, "ldelem.r8", None;
        LdelemRef = 0x9A, "ldelem.ref", None;
        StelemI = 0x9B, "stelem.i", None;
        StelemI1 = 0x9C, "stelem.i1", None;
        StelemI2 = 0x9D, "stelem.i2", None;
        StelemI4 = 0x9E, "stelem.i4", None;
        StelemI8 = 0x9F, "stelem.i8", None;
        StelemR4 = 0xA0, "stelem.r4", None;
        StelemR8 = 0xA1, "stelem.r8", None;
        StelemRef = 0xA2, "stelem.ref", None;
        Ldelem = 0xA3, "ldelem", Token;
        Stelem = 0xA4, "stelem", Token;
        UnboxAny = 0xA5, "unbox.any", Token;
        ConvOvfI1 = 0xB3, "conv.ovf.i1", None;
        ConvOvfU1 = 0xB4, "conv.ovf.u1", None;
        ConvOvfI2 = 0xB5, "conv.ovf.i2", None;
        ConvOvfU2 = 0xB6, "conv.ovf.u2", None;
        ConvOvfI4 = 0xB7, "conv.ovf.i4", None;
        ConvOvfU4 = 0xB8, "conv.ovf.u4", None;
        ConvOvfI8 = 0xB9, "conv.ovf.i8", None;
        ConvOvfU8 = 0xBA, "conv.ovf.u8", None;
        Refanyval = 0xC2, "refanyval", Token;
        Ckfinite = 0xC3, "ckfinite", None;
        Mkrefany = 0xC6, "mkrefany", Token;
        Ldtoken = 0xD0, "ldtoken", Token;
        ConvU2 = 0xD1, "conv.u2", None;
        ConvU1 = 0xD2, "conv.u1", None;
        ConvI = 0xD3, "conv.i", None;
        ConvOvfI = 0xD4, "conv.ovf.i", None;
        ConvOvfU = 0xD5, "conv.ovf.u", None;
        AddOvf = 0xD6, "add.ovf", None;
        AddOvfUn = 0xD7, "add.ovf.un", None;
        MulOvf = 0xD8, "mul.ovf", None;
        MulOvfUn = 0xD9, "mul.ovf.un", None;
        SubOvf = 0xDA, "sub.ovf", None;
        SubOvfUn = 0xDB, "sub.ovf.un", None;
        Endfinally = 0xDC, "endfinally", None;
        Leave = 0xDD, "leave", Branch;
        LeaveS = 0xDE, "leave.s", ShortBranch;
        StindI = 0xDF, "stind.i", None;
        ConvU = 0xE0, "conv.u", None;
    }
    extended {
        Arglist = 0x00, "arglist", None;
        Ceq = 0x01, "ceq", None;
        Cgt = 0x02, "cgt", None;
        CgtUn = 0x03, "cgt.un", None;
        Clt = 0x04, "clt", None;
        CltUn = 0x05, "clt.un", None;
        Ldftn = 0x06, "ldftn", Token;
        Ldvirtftn = 0x07, "ldvirtftn", Token;
        Ldarg = 0x09, "ldarg", Var;
        Ldarga = 0x0A, "ldarga", Var;
        Starg = 0x0B, "starg", Var;
        Ldloc = 0x0C, "ldloc", Var;
        Ldloca = 0x0D, "ldloca", Var;
        Stloc = 0x0E, "stloc", Var;
        Localloc = 0x0F, "localloc", None;
        Endfilter = 0x11, "endfilter", None;
        Unaligned = 0x12, "unaligned.", Byte;
        Volatile = 0x13, "volatile.", None;
        Tail = 0x14, "tail.", None;
        Initobj = 0x15, "initobj", Token;
        Constrained = 0x16, "constrained.", Token;
        Cpblk = 0x17, "cpblk", None;
        Initblk = 0x18, "initblk", None;
        No = 0x19, "no.", Byte;
        Rethrow = 0x1A, "rethrow", None;
        Sizeof = 0x1C, "sizeof", Token;
        Refanytype = 0x1D, "refanytype", None;
        Readonly = 0x1E, "readonly.", None;
    }
}

impl Opcode {
    /// Control-flow behavior of this opcode
    pub fn flow(self) -> FlowControl {
        use Opcode::*;
        match self {
            Br | BrS => FlowControl::Branch,
            Brfalse | BrfalseS | Brtrue | BrtrueS
            | Beq | BeqS | Bge | BgeS | Bgt | BgtS | Ble | BleS | Blt | BltS
            | BneUn | BneUnS | BgeUn | BgeUnS | BgtUn | BgtUnS
            | BleUn | BleUnS | BltUn | BltUnS => FlowControl::CondBranch,
            Switch => FlowControl::Switch,
            Ret => FlowControl::Return,
            Throw | Rethrow => FlowControl::Throw,
            Leave | LeaveS => FlowControl::Leave,
            Endfinally | Endfilter => FlowControl::EndHandler,
            Call | Callvirt | Calli | Newobj | Jmp => FlowControl::Call,
            Unaligned | Volatile | Tail | Constrained | No | Readonly => FlowControl::Meta,
            _ => FlowControl::Next,
        }
    }

    /// Whether this opcode carries a branch displacement
    pub fn is_branch(self) -> bool {
        matches!(self.operand_kind(), OperandKind::Branch | OperandKind::ShortBranch)
    }

    /// Whether this opcode is a prefix for the following instruction
    pub fn is_prefix(self) -> bool {
        self.flow() == FlowControl::Meta
    }

    /// The long-form equivalent of a short branch or variable opcode
    pub fn long_form(self) -> Self {
        use Opcode::*;
        match self {
            BrS => Br,
            BrfalseS => Brfalse,
            BrtrueS => Brtrue,
            BeqS => Beq,
            BgeS => Bge,
            BgtS => Bgt,
            BleS => Ble,
            BltS => Blt,
            BneUnS => BneUn,
            BgeUnS => BgeUn,
            BgtUnS => BgtUn,
            BleUnS => BleUn,
            BltUnS => BltUn,
            LeaveS => Leave,
            LdargS => Ldarg,
            LdargaS => Ldarga,
            StargS => Starg,
            LdlocS => Ldloc,
            LdlocaS => Ldloca,
            StlocS => Stloc,
            other => other,
        }
    }

    /// Encoded size of opcode plus operand, `None` for `switch`
    pub fn encoded_size(self) -> Option<usize> {
        let opcode_len = if self.encoding().0.is_some() { 2 } else { 1 };
        self.operand_kind().size().map(|n| n + opcode_len)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_byte_roundtrip() {
        for byte in 0u8..=0xE0 {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.encoding(), (None, byte), "{}", op);
            }
        }
    }

    #[test]
    fn test_extended_roundtrip() {
        for byte in 0u8..=0x1E {
            if let Some(op) = Opcode::from_extended(byte) {
                assert_eq!(op.encoding(), (Some(EXTENDED_PREFIX), byte), "{}", op);
            }
        }
    }

    #[test]
    fn test_gaps_are_invalid() {
        assert_eq!(Opcode::from_byte(0x24), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
        assert_eq!(Opcode::from_extended(0x08), None);
        assert_eq!(Opcode::from_extended(0x1B), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(Opcode::LdcI4S.name(), "ldc.i4.s");
        assert_eq!(Opcode::BneUnS.name(), "bne.un.s");
        assert_eq!(Opcode::Constrained.name(), "constrained.");
        assert_eq!(Opcode::Cpblk.to_string(), "cpblk");
    }

    #[test]
    fn test_flow_classification() {
        assert_eq!(Opcode::Br.flow(), FlowControl::Branch);
        assert_eq!(Opcode::BltUnS.flow(), FlowControl::CondBranch);
        assert_eq!(Opcode::LeaveS.flow(), FlowControl::Leave);
        assert_eq!(Opcode::Endfinally.flow(), FlowControl::EndHandler);
        assert_eq!(Opcode::Rethrow.flow(), FlowControl::Throw);
        assert_eq!(Opcode::Volatile.flow(), FlowControl::Meta);
        assert_eq!(Opcode::Add.flow(), FlowControl::Next);
        assert!(Opcode::Switch.flow().ends_block());
        assert!(Opcode::Switch.flow().falls_through());
        assert!(!Opcode::Ret.flow().falls_through());
    }

    #[test]
    fn test_encoded_sizes() {
        assert_eq!(Opcode::Nop.encoded_size(), Some(1));
        assert_eq!(Opcode::LdcI4.encoded_size(), Some(5));
        assert_eq!(Opcode::LdcR8.encoded_size(), Some(9));
        assert_eq!(Opcode::Ldloc.encoded_size(), Some(4));
        assert_eq!(Opcode::Ceq.encoded_size(), Some(2));
        assert_eq!(Opcode::Switch.encoded_size(), None);
    }

    #[test]
    fn test_long_form() {
        assert_eq!(Opcode::BrS.long_form(), Opcode::Br);
        assert_eq!(Opcode::LeaveS.long_form(), Opcode::Leave);
        assert_eq!(Opcode::StlocS.long_form(), Opcode::Stloc);
        assert_eq!(Opcode::Add.long_form(), Opcode::Add);
    }
}
