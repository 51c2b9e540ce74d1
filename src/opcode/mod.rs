//! This module contains the definition of the NeoVM opcode set, along with
//! the metadata the decoder and the interpreter need about each opcode.

#[macro_use]
pub mod macros;

use std::fmt::{Display, Formatter};

use self::OperandSize::{Fixed, Prefixed};

/// The layout of the operand that follows an opcode byte in a script.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OperandSize {
    /// The operand is always exactly this many bytes.
    Fixed(usize),

    /// The operand is preceded by a little-endian length prefix of this many
    /// bytes, which gives the length of the operand that follows.
    Prefixed(usize),
}

opcodes! {
    PushInt8 = 0x00, "PUSHINT8", Fixed(1);
    PushInt16 = 0x01, "PUSHINT16", Fixed(2);
    PushInt32 = 0x02, "PUSHINT32", Fixed(4);
    PushInt64 = 0x03, "PUSHINT64", Fixed(8);
    PushInt128 = 0x04, "PUSHINT128", Fixed(16);
    PushInt256 = 0x05, "PUSHINT256", Fixed(32);
    PushT = 0x08, "PUSHT", Fixed(0);
    PushF = 0x09, "PUSHF", Fixed(0);
    PushA = 0x0A, "PUSHA", Fixed(4);
    PushNull = 0x0B, "PUSHNULL", Fixed(0);
    PushData1 = 0x0C, "PUSHDATA1", Prefixed(1);
    PushData2 = 0x0D, "PUSHDATA2", Prefixed(2);
    PushData4 = 0x0E, "PUSHDATA4", Prefixed(4);
    PushM1 = 0x0F, "PUSHM1", Fixed(0);
    Push0 = 0x10, "PUSH0", Fixed(0);
    Push1 = 0x11, "PUSH1", Fixed(0);
    Push2 = 0x12, "PUSH2", Fixed(0);
    Push3 = 0x13, "PUSH3", Fixed(0);
    Push4 = 0x14, "PUSH4", Fixed(0);
    Push5 = 0x15, "PUSH5", Fixed(0);
    Push6 = 0x16, "PUSH6", Fixed(0);
    Push7 = 0x17, "PUSH7", Fixed(0);
    Push8 = 0x18, "PUSH8", Fixed(0);
    Push9 = 0x19, "PUSH9", Fixed(0);
    Push10 = 0x1A, "PUSH10", Fixed(0);
    Push11 = 0x1B, "PUSH11", Fixed(0);
    Push12 = 0x1C, "PUSH12", Fixed(0);
    Push13 = 0x1D, "PUSH13", Fixed(0);
    Push14 = 0x1E, "PUSH14", Fixed(0);
    Push15 = 0x1F, "PUSH15", Fixed(0);
    Push16 = 0x20, "PUSH16", Fixed(0);
    Nop = 0x21, "NOP", Fixed(0);
    Jmp = 0x22, "JMP", Fixed(1);
    JmpL = 0x23, "JMP_L", Fixed(4);
    JmpIf = 0x24, "JMPIF", Fixed(1);
    JmpIfL = 0x25, "JMPIF_L", Fixed(4);
    JmpIfNot = 0x26, "JMPIFNOT", Fixed(1);
    JmpIfNotL = 0x27, "JMPIFNOT_L", Fixed(4);
    JmpEq = 0x28, "JMPEQ", Fixed(1);
    JmpEqL = 0x29, "JMPEQ_L", Fixed(4);
    JmpNe = 0x2A, "JMPNE", Fixed(1);
    JmpNeL = 0x2B, "JMPNE_L", Fixed(4);
    JmpGt = 0x2C, "JMPGT", Fixed(1);
    JmpGtL = 0x2D, "JMPGT_L", Fixed(4);
    JmpGe = 0x2E, "JMPGE", Fixed(1);
    JmpGeL = 0x2F, "JMPGE_L", Fixed(4);
    JmpLt = 0x30, "JMPLT", Fixed(1);
    JmpLtL = 0x31, "JMPLT_L", Fixed(4);
    JmpLe = 0x32, "JMPLE", Fixed(1);
    JmpLeL = 0x33, "JMPLE_L", Fixed(4);
    Call = 0x34, "CALL", Fixed(1);
    CallL = 0x35, "CALL_L", Fixed(4);
    CallA = 0x36, "CALLA", Fixed(0);
    CallT = 0x37, "CALLT", Fixed(2);
    Abort = 0x38, "ABORT", Fixed(0);
    Assert = 0x39, "ASSERT", Fixed(0);
    Throw = 0x3A, "THROW", Fixed(0);
    Try = 0x3B, "TRY", Fixed(2);
    TryL = 0x3C, "TRY_L", Fixed(8);
    EndTry = 0x3D, "ENDTRY", Fixed(1);
    EndTryL = 0x3E, "ENDTRY_L", Fixed(4);
    EndFinally = 0x3F, "ENDFINALLY", Fixed(0);
    Ret = 0x40, "RET", Fixed(0);
    Syscall = 0x41, "SYSCALL", Fixed(4);
    Depth = 0x43, "DEPTH", Fixed(0);
    Drop = 0x45, "DROP", Fixed(0);
    Nip = 0x46, "NIP", Fixed(0);
    XDrop = 0x48, "XDROP", Fixed(0);
    Clear = 0x49, "CLEAR", Fixed(0);
    Dup = 0x4A, "DUP", Fixed(0);
    Over = 0x4B, "OVER", Fixed(0);
    Pick = 0x4D, "PICK", Fixed(0);
    Tuck = 0x4E, "TUCK", Fixed(0);
    Swap = 0x50, "SWAP", Fixed(0);
    Rot = 0x51, "ROT", Fixed(0);
    Roll = 0x52, "ROLL", Fixed(0);
    Reverse3 = 0x53, "REVERSE3", Fixed(0);
    Reverse4 = 0x54, "REVERSE4", Fixed(0);
    ReverseN = 0x55, "REVERSEN", Fixed(0);
    InitSSlot = 0x56, "INITSSLOT", Fixed(1);
    InitSlot = 0x57, "INITSLOT", Fixed(2);
    LdSFld0 = 0x58, "LDSFLD0", Fixed(0);
    LdSFld1 = 0x59, "LDSFLD1", Fixed(0);
    LdSFld2 = 0x5A, "LDSFLD2", Fixed(0);
    LdSFld3 = 0x5B, "LDSFLD3", Fixed(0);
    LdSFld4 = 0x5C, "LDSFLD4", Fixed(0);
    LdSFld5 = 0x5D, "LDSFLD5", Fixed(0);
    LdSFld6 = 0x5E, "LDSFLD6", Fixed(0);
    LdSFld = 0x5F, "LDSFLD", Fixed(1);
    StSFld0 = 0x60, "STSFLD0", Fixed(0);
    StSFld1 = 0x61, "STSFLD1", Fixed(0);
    StSFld2 = 0x62, "STSFLD2", Fixed(0);
    StSFld3 = 0x63, "STSFLD3", Fixed(0);
    StSFld4 = 0x64, "STSFLD4", Fixed(0);
    StSFld5 = 0x65, "STSFLD5", Fixed(0);
    StSFld6 = 0x66, "STSFLD6", Fixed(0);
    StSFld = 0x67, "STSFLD", Fixed(1);
    LdLoc0 = 0x68, "LDLOC0", Fixed(0);
    LdLoc1 = 0x69, "LDLOC1", Fixed(0);
    LdLoc2 = 0x6A, "LDLOC2", Fixed(0);
    LdLoc3 = 0x6B, "LDLOC3", Fixed(0);
    LdLoc4 = 0x6C, "LDLOC4", Fixed(0);
    LdLoc5 = 0x6D, "LDLOC5", Fixed(0);
    LdLoc6 = 0x6E, "LDLOC6", Fixed(0);
    LdLoc = 0x6F, "LDLOC", Fixed(1);
    StLoc0 = 0x70, "STLOC0", Fixed(0);
    StLoc1 = 0x71, "STLOC1", Fixed(0);
    StLoc2 = 0x72, "STLOC2", Fixed(0);
    StLoc3 = 0x73, "STLOC3", Fixed(0);
    StLoc4 = 0x74, "STLOC4", Fixed(0);
    StLoc5 = 0x75, "STLOC5", Fixed(0);
    StLoc6 = 0x76, "STLOC6", Fixed(0);
    StLoc = 0x77, "STLOC", Fixed(1);
    LdArg0 = 0x78, "LDARG0", Fixed(0);
    LdArg1 = 0x79, "LDARG1", Fixed(0);
    LdArg2 = 0x7A, "LDARG2", Fixed(0);
    LdArg3 = 0x7B, "LDARG3", Fixed(0);
    LdArg4 = 0x7C, "LDARG4", Fixed(0);
    LdArg5 = 0x7D, "LDARG5", Fixed(0);
    LdArg6 = 0x7E, "LDARG6", Fixed(0);
    LdArg = 0x7F, "LDARG", Fixed(1);
    StArg0 = 0x80, "STARG0", Fixed(0);
    StArg1 = 0x81, "STARG1", Fixed(0);
    StArg2 = 0x82, "STARG2", Fixed(0);
    StArg3 = 0x83, "STARG3", Fixed(0);
    StArg4 = 0x84, "STARG4", Fixed(0);
    StArg5 = 0x85, "STARG5", Fixed(0);
    StArg6 = 0x86, "STARG6", Fixed(0);
    StArg = 0x87, "STARG", Fixed(1);
    NewBuffer = 0x88, "NEWBUFFER", Fixed(0);
    Memcpy = 0x89, "MEMCPY", Fixed(0);
    Cat = 0x8B, "CAT", Fixed(0);
    Substr = 0x8C, "SUBSTR", Fixed(0);
    Left = 0x8D, "LEFT", Fixed(0);
    Right = 0x8E, "RIGHT", Fixed(0);
    Invert = 0x90, "INVERT", Fixed(0);
    And = 0x91, "AND", Fixed(0);
    Or = 0x92, "OR", Fixed(0);
    Xor = 0x93, "XOR", Fixed(0);
    Equal = 0x97, "EQUAL", Fixed(0);
    NotEqual = 0x98, "NOTEQUAL", Fixed(0);
    Sign = 0x99, "SIGN", Fixed(0);
    Abs = 0x9A, "ABS", Fixed(0);
    Negate = 0x9B, "NEGATE", Fixed(0);
    Inc = 0x9C, "INC", Fixed(0);
    Dec = 0x9D, "DEC", Fixed(0);
    Add = 0x9E, "ADD", Fixed(0);
    Sub = 0x9F, "SUB", Fixed(0);
    Mul = 0xA0, "MUL", Fixed(0);
    Div = 0xA1, "DIV", Fixed(0);
    Mod = 0xA2, "MOD", Fixed(0);
    Pow = 0xA3, "POW", Fixed(0);
    Sqrt = 0xA4, "SQRT", Fixed(0);
    ModMul = 0xA5, "MODMUL", Fixed(0);
    ModPow = 0xA6, "MODPOW", Fixed(0);
    Shl = 0xA8, "SHL", Fixed(0);
    Shr = 0xA9, "SHR", Fixed(0);
    Not = 0xAA, "NOT", Fixed(0);
    BoolAnd = 0xAB, "BOOLAND", Fixed(0);
    BoolOr = 0xAC, "BOOLOR", Fixed(0);
    Nz = 0xB1, "NZ", Fixed(0);
    NumEqual = 0xB3, "NUMEQUAL", Fixed(0);
    NumNotEqual = 0xB4, "NUMNOTEQUAL", Fixed(0);
    Lt = 0xB5, "LT", Fixed(0);
    Le = 0xB6, "LE", Fixed(0);
    Gt = 0xB7, "GT", Fixed(0);
    Ge = 0xB8, "GE", Fixed(0);
    Min = 0xB9, "MIN", Fixed(0);
    Max = 0xBA, "MAX", Fixed(0);
    Within = 0xBB, "WITHIN", Fixed(0);
    PackMap = 0xBE, "PACKMAP", Fixed(0);
    PackStruct = 0xBF, "PACKSTRUCT", Fixed(0);
    Pack = 0xC0, "PACK", Fixed(0);
    Unpack = 0xC1, "UNPACK", Fixed(0);
    NewArray0 = 0xC2, "NEWARRAY0", Fixed(0);
    NewArray = 0xC3, "NEWARRAY", Fixed(0);
    NewArrayT = 0xC4, "NEWARRAY_T", Fixed(1);
    NewStruct0 = 0xC5, "NEWSTRUCT0", Fixed(0);
    NewStruct = 0xC6, "NEWSTRUCT", Fixed(0);
    NewMap = 0xC8, "NEWMAP", Fixed(0);
    Size = 0xCA, "SIZE", Fixed(0);
    HasKey = 0xCB, "HASKEY", Fixed(0);
    Keys = 0xCC, "KEYS", Fixed(0);
    Values = 0xCD, "VALUES", Fixed(0);
    PickItem = 0xCE, "PICKITEM", Fixed(0);
    Append = 0xCF, "APPEND", Fixed(0);
    SetItem = 0xD0, "SETITEM", Fixed(0);
    ReverseItems = 0xD1, "REVERSEITEMS", Fixed(0);
    Remove = 0xD2, "REMOVE", Fixed(0);
    ClearItems = 0xD3, "CLEARITEMS", Fixed(0);
    PopItem = 0xD4, "POPITEM", Fixed(0);
    IsNull = 0xD8, "ISNULL", Fixed(0);
    IsType = 0xD9, "ISTYPE", Fixed(1);
    Convert = 0xDB, "CONVERT", Fixed(1);
    AbortMsg = 0xE0, "ABORTMSG", Fixed(0);
    AssertMsg = 0xE1, "ASSERTMSG", Fixed(0);}

impl OpCode {
    /// Gets the byte that encodes this opcode.
    #[must_use]
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Checks if the opcode ends a basic block.
    ///
    /// These are the instructions that transfer control anywhere other than
    /// the next instruction, or that end execution of the current frame.
    #[must_use]
    pub fn is_block_terminator(self) -> bool {
        self.is_jump()
            || self.is_call()
            || matches!(
                self,
                Self::Abort
                    | Self::AbortMsg
                    | Self::Throw
                    | Self::Try
                    | Self::TryL
                    | Self::EndTry
                    | Self::EndTryL
                    | Self::EndFinally
                    | Self::Ret
            )
    }

    /// Checks if the opcode is one of the conditional or unconditional jumps.
    #[must_use]
    pub fn is_jump(self) -> bool {
        (Self::Jmp.byte()..=Self::JmpLeL.byte()).contains(&self.byte())
    }

    /// Checks if the opcode is a jump taken only when a condition holds.
    #[must_use]
    pub fn is_conditional_jump(self) -> bool {
        self.is_jump() && !matches!(self, Self::Jmp | Self::JmpL)
    }

    /// Checks if the opcode invokes another routine within the script or in
    /// another contract.
    #[must_use]
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::CallL | Self::CallA | Self::CallT)
    }

    /// Checks if the opcode loads from the static field slot.
    #[must_use]
    pub fn is_static_field_load(self) -> bool {
        (Self::LdSFld0.byte()..=Self::LdSFld.byte()).contains(&self.byte())
    }

    /// Checks if the opcode stores into the static field slot.
    #[must_use]
    pub fn is_static_field_store(self) -> bool {
        (Self::StSFld0.byte()..=Self::StSFld.byte()).contains(&self.byte())
    }

    /// Checks if the opcode pushes a constant that is fully determined by the
    /// instruction itself.
    #[must_use]
    pub fn is_constant_push(self) -> bool {
        self.byte() <= Self::Push16.byte() && self != Self::PushA
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        value.byte()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::disassembly::Error,
        opcode::{OpCode, OperandSize},
    };

    #[test]
    fn every_opcode_decodes_from_its_own_byte() -> anyhow::Result<()> {
        for opcode in OpCode::ALL {
            assert_eq!(OpCode::try_from(opcode.byte())?, *opcode);
        }

        Ok(())
    }

    #[test]
    fn unassigned_bytes_are_rejected() {
        for byte in [0x06u8, 0x42, 0x44, 0x8a, 0xff] {
            assert_eq!(
                OpCode::try_from(byte),
                Err(Error::UnknownOpcode { byte })
            );
        }
    }

    #[test]
    fn reports_operand_layouts() {
        assert_eq!(OpCode::PushInt64.operand_size(), OperandSize::Fixed(8));
        assert_eq!(OpCode::PushData2.operand_size(), OperandSize::Prefixed(2));
        assert_eq!(OpCode::TryL.operand_size(), OperandSize::Fixed(8));
        assert_eq!(OpCode::Dup.operand_size(), OperandSize::Fixed(0));
    }

    #[test]
    fn classifies_terminators() {
        assert!(OpCode::Ret.is_block_terminator());
        assert!(OpCode::JmpIfNotL.is_block_terminator());
        assert!(OpCode::CallT.is_block_terminator());
        assert!(OpCode::EndFinally.is_block_terminator());
        assert!(!OpCode::Syscall.is_block_terminator());
        assert!(!OpCode::Assert.is_block_terminator());
        assert!(!OpCode::Nop.is_block_terminator());
    }

    #[test]
    fn classifies_static_field_access() {
        assert!(OpCode::LdSFld0.is_static_field_load());
        assert!(OpCode::LdSFld.is_static_field_load());
        assert!(!OpCode::StSFld0.is_static_field_load());
        assert!(OpCode::StSFld6.is_static_field_store());
        assert!(!OpCode::LdLoc0.is_static_field_store());
    }

    #[test]
    fn displays_mnemonics() {
        assert_eq!(OpCode::JmpIfNotL.to_string(), "JMPIFNOT_L");
        assert_eq!(OpCode::NewArrayT.to_string(), "NEWARRAY_T");
    }
}
