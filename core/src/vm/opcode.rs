//! Instruction set of the target machine.
//!
//! # Instruction Format
//!
//! Instructions are variable length:
//! ```text
//! ┌────────────┐
//! │   Opcode   │                              opcode < HAVE_ARGUMENT   (1 byte)
//! └────────────┘
//! ┌────────────┬─────────────────────────┐
//! │   Opcode   │  Operand (u16, LE)      │    opcode >= HAVE_ARGUMENT  (3 bytes)
//! └────────────┴─────────────────────────┘
//! ┌────────────┬─────────────┬────────────┬─────────────┐
//! │ EXTENDED   │ high u16 LE │   Opcode   │ low u16 LE  │  operand >= 65536 (6 bytes)
//! └────────────┴─────────────┴────────────┴─────────────┘
//! ```
//!
//! # Branches
//!
//! Absolute branches carry the byte offset of their target. Relative branches
//! carry the distance from the end of the branch instruction to the target and
//! can only jump forward.
//!
//! # Stack Discipline
//!
//! Stack effect notation: `[..., operand1, operand2] -> [..., result]`

use core::fmt;

/// Opcodes at or above this value carry an operand.
pub const HAVE_ARGUMENT: u8 = 90;

/// Operands below this limit fit the narrow 2-byte encoding.
pub const NARROW_OPERAND_LIMIT: u32 = 1 << 16;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    // ========================================================================
    // Stack manipulation (no operand)
    // ========================================================================
    /// Stack: [..., a] -> [...]
    PopTop = 1,
    /// Stack: [..., a, b] -> [..., b, a]
    RotTwo = 2,
    /// Stack: [..., a] -> [..., a, a]
    DupTop = 4,
    Nop = 9,

    // ========================================================================
    // Arithmetic and logic (no operand)
    // ========================================================================
    /// Stack: [..., a: Int] -> [..., -a]
    UnaryNegative = 11,
    /// Stack: [..., a] -> [..., !truthy(a)]
    UnaryNot = 12,
    BinaryMultiply = 20,
    /// Floor modulo; fails on a zero divisor.
    BinaryModulo = 22,
    /// Int addition or Str concatenation.
    BinaryAdd = 23,
    BinarySubtract = 24,
    /// Floor division; fails on a zero divisor.
    BinaryFloorDivide = 26,

    // ========================================================================
    // Iteration, blocks and frame exit (no operand)
    // ========================================================================
    /// Stack: [..., n: Int] -> [..., iter(0..n)]
    GetIter = 68,
    /// Unwind to the innermost loop block and jump to its exit.
    BreakLoop = 80,
    /// Stack: [..., retval] -> frame exits
    ReturnValue = 83,
    /// Suspend the frame, reporting TOS. On resumption the sent value replaces it.
    /// Stack: [..., value] -> [..., sent]
    YieldValue = 86,
    /// Pop the innermost loop block.
    PopBlock = 87,

    // ========================================================================
    // Operand-carrying instructions (>= HAVE_ARGUMENT)
    // ========================================================================
    /// Relative. Stack: [..., iter] -> [..., iter, next] or, when exhausted,
    /// [...] and jump.
    ForIter = 93,
    /// Operand: constant index | Stack: [...] -> [..., value]
    LoadConst = 100,
    /// Operand: [`CompareOp`] | Stack: [..., a, b] -> [..., result: Bool]
    CompareOp = 107,
    /// Relative unconditional jump.
    JumpForward = 110,
    /// Absolute. Jump keeping TOS if falsy, otherwise pop and fall through.
    JumpIfFalseOrPop = 111,
    /// Absolute. Jump keeping TOS if truthy, otherwise pop and fall through.
    JumpIfTrueOrPop = 112,
    /// Absolute unconditional jump.
    JumpAbsolute = 113,
    /// Absolute. Stack: [..., cond] -> [...]
    PopJumpIfFalse = 114,
    /// Absolute. Stack: [..., cond] -> [...]
    PopJumpIfTrue = 115,
    /// Relative. Push a loop block whose exit is the branch target.
    SetupLoop = 120,
    /// Operand: local slot | Stack: [...] -> [..., value]
    LoadFast = 124,
    /// Operand: local slot | Stack: [..., value] -> [...]
    StoreFast = 125,
    /// Operand: 1 | Stack: [..., value] -> raises value
    RaiseVarargs = 130,
    /// Operand: free variable index | Stack: [...] -> [..., value]
    LoadDeref = 136,
    /// Wide argument prefix carrying bits 16..32 of the next operand.
    ExtendedArg = 144,
}
static_assertions::assert_eq_size!(Opcode, u8);

/// How a branch operand encodes its destination.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BranchKind {
    /// Operand is the target's byte offset.
    Absolute,
    /// Operand is the distance from the end of the branch to the target.
    Relative,
}

/// Static metadata for one opcode.
#[derive(Clone, Copy, Debug)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    pub name: &'static str,
    pub branch: Option<BranchKind>,
}

impl Opcode {
    pub const ALL: [Opcode; 31] = [
        Opcode::PopTop,
        Opcode::RotTwo,
        Opcode::DupTop,
        Opcode::Nop,
        Opcode::UnaryNegative,
        Opcode::UnaryNot,
        Opcode::BinaryMultiply,
        Opcode::BinaryModulo,
        Opcode::BinaryAdd,
        Opcode::BinarySubtract,
        Opcode::BinaryFloorDivide,
        Opcode::GetIter,
        Opcode::BreakLoop,
        Opcode::ReturnValue,
        Opcode::YieldValue,
        Opcode::PopBlock,
        Opcode::ForIter,
        Opcode::LoadConst,
        Opcode::CompareOp,
        Opcode::JumpForward,
        Opcode::JumpIfFalseOrPop,
        Opcode::JumpIfTrueOrPop,
        Opcode::JumpAbsolute,
        Opcode::PopJumpIfFalse,
        Opcode::PopJumpIfTrue,
        Opcode::SetupLoop,
        Opcode::LoadFast,
        Opcode::StoreFast,
        Opcode::RaiseVarargs,
        Opcode::LoadDeref,
        Opcode::ExtendedArg,
    ];

    /// Decode an opcode byte.
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        OPCODE_TABLE[byte as usize].map(|info| info.opcode)
    }

    /// Whether this opcode is followed by a 2-byte operand.
    #[inline]
    pub const fn has_operand(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    #[inline]
    pub fn branch_kind(self) -> Option<BranchKind> {
        OPCODE_TABLE[self as usize].and_then(|info| info.branch)
    }

    #[inline]
    pub fn is_branch(self) -> bool {
        self.branch_kind().is_some()
    }

    pub fn name(self) -> &'static str {
        OPCODE_TABLE[self as usize].map_or("<unknown>", |info| info.name)
    }

    const fn describe(self) -> OpcodeInfo {
        use BranchKind::*;
        let (name, branch) = match self {
            Opcode::PopTop => ("POP_TOP", None),
            Opcode::RotTwo => ("ROT_TWO", None),
            Opcode::DupTop => ("DUP_TOP", None),
            Opcode::Nop => ("NOP", None),
            Opcode::UnaryNegative => ("UNARY_NEGATIVE", None),
            Opcode::UnaryNot => ("UNARY_NOT", None),
            Opcode::BinaryMultiply => ("BINARY_MULTIPLY", None),
            Opcode::BinaryModulo => ("BINARY_MODULO", None),
            Opcode::BinaryAdd => ("BINARY_ADD", None),
            Opcode::BinarySubtract => ("BINARY_SUBTRACT", None),
            Opcode::BinaryFloorDivide => ("BINARY_FLOOR_DIVIDE", None),
            Opcode::GetIter => ("GET_ITER", None),
            Opcode::BreakLoop => ("BREAK_LOOP", None),
            Opcode::ReturnValue => ("RETURN_VALUE", None),
            Opcode::YieldValue => ("YIELD_VALUE", None),
            Opcode::PopBlock => ("POP_BLOCK", None),
            Opcode::ForIter => ("FOR_ITER", Some(Relative)),
            Opcode::LoadConst => ("LOAD_CONST", None),
            Opcode::CompareOp => ("COMPARE_OP", None),
            Opcode::JumpForward => ("JUMP_FORWARD", Some(Relative)),
            Opcode::JumpIfFalseOrPop => ("JUMP_IF_FALSE_OR_POP", Some(Absolute)),
            Opcode::JumpIfTrueOrPop => ("JUMP_IF_TRUE_OR_POP", Some(Absolute)),
            Opcode::JumpAbsolute => ("JUMP_ABSOLUTE", Some(Absolute)),
            Opcode::PopJumpIfFalse => ("POP_JUMP_IF_FALSE", Some(Absolute)),
            Opcode::PopJumpIfTrue => ("POP_JUMP_IF_TRUE", Some(Absolute)),
            Opcode::SetupLoop => ("SETUP_LOOP", Some(Relative)),
            Opcode::LoadFast => ("LOAD_FAST", None),
            Opcode::StoreFast => ("STORE_FAST", None),
            Opcode::RaiseVarargs => ("RAISE_VARARGS", None),
            Opcode::LoadDeref => ("LOAD_DEREF", None),
            Opcode::ExtendedArg => ("EXTENDED_ARG", None),
        };
        OpcodeInfo {
            opcode: self,
            name,
            branch,
        }
    }
}

/// Opcode metadata indexed by opcode byte. Built at compile time, never mutated.
pub static OPCODE_TABLE: [Option<OpcodeInfo>; 256] = build_opcode_table();

const fn build_opcode_table() -> [Option<OpcodeInfo>; 256] {
    let mut table = [None; 256];
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let opcode = Opcode::ALL[i];
        table[opcode as usize] = Some(opcode.describe());
        i += 1;
    }
    table
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison selected by the `COMPARE_OP` operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompareOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

impl CompareOp {
    pub fn from_operand(operand: u32) -> Option<CompareOp> {
        Some(match operand {
            0 => CompareOp::Lt,
            1 => CompareOp::Le,
            2 => CompareOp::Eq,
            3 => CompareOp::Ne,
            4 => CompareOp::Gt,
            5 => CompareOp::Ge,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

// ============================================================================
// Raw decoding
// ============================================================================

/// One instruction read straight from a byte stream, with any
/// `EXTENDED_ARG` prefix folded into the operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RawInstruction {
    /// Offset of the first byte (the prefix, when present).
    pub offset: usize,
    pub opcode: Opcode,
    pub operand: Option<u32>,
    /// Encoded size in bytes, prefix included.
    pub size: usize,
}

impl RawInstruction {
    /// Byte offset of the branch destination, if this is a branch.
    pub fn branch_destination(&self) -> Option<usize> {
        let operand = self.operand? as usize;
        match self.opcode.branch_kind()? {
            BranchKind::Absolute => Some(operand),
            BranchKind::Relative => (self.offset + self.size).checked_add(operand),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidInstruction {
    UnknownOpcode { offset: usize, byte: u8 },
    Truncated { offset: usize },
    /// An `EXTENDED_ARG` followed by something that cannot take it.
    DanglingPrefix { offset: usize },
}

impl InvalidInstruction {
    pub fn offset(&self) -> usize {
        match *self {
            InvalidInstruction::UnknownOpcode { offset, .. }
            | InvalidInstruction::Truncated { offset }
            | InvalidInstruction::DanglingPrefix { offset } => offset,
        }
    }
}

impl fmt::Display for InvalidInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidInstruction::UnknownOpcode { offset, byte } => {
                write!(f, "invalid opcode 0x{:02X} at offset {}", byte, offset)
            }
            InvalidInstruction::Truncated { offset } => {
                write!(f, "truncated instruction at offset {}", offset)
            }
            InvalidInstruction::DanglingPrefix { offset } => {
                write!(f, "EXTENDED_ARG at offset {} is not followed by an operand-carrying instruction", offset)
            }
        }
    }
}

impl core::error::Error for InvalidInstruction {}

/// Read the instruction starting at `offset`.
pub fn read_instruction(code: &[u8], offset: usize) -> Result<RawInstruction, InvalidInstruction> {
    let mut pos = offset;
    let mut high: Option<u32> = None;
    loop {
        let byte = *code
            .get(pos)
            .ok_or(InvalidInstruction::Truncated { offset })?;
        let opcode =
            Opcode::from_byte(byte).ok_or(InvalidInstruction::UnknownOpcode { offset: pos, byte })?;

        if !opcode.has_operand() {
            if high.is_some() {
                return Err(InvalidInstruction::DanglingPrefix { offset });
            }
            return Ok(RawInstruction {
                offset,
                opcode,
                operand: None,
                size: pos + 1 - offset,
            });
        }

        let bytes = code
            .get(pos + 1..pos + 3)
            .ok_or(InvalidInstruction::Truncated { offset })?;
        let low = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
        pos += 3;

        if opcode == Opcode::ExtendedArg {
            // One prefix already covers the full u32 range.
            if high.is_some() {
                return Err(InvalidInstruction::DanglingPrefix { offset });
            }
            high = Some(low << 16);
            continue;
        }

        return Ok(RawInstruction {
            offset,
            opcode,
            operand: Some(high.unwrap_or(0) | low),
            size: pos - offset,
        });
    }
}

/// Iterator over the raw instructions of a byte stream.
pub struct RawInstructions<'a> {
    code: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RawInstructions<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        RawInstructions {
            code,
            offset: 0,
            failed: false,
        }
    }
}

impl Iterator for RawInstructions<'_> {
    type Item = Result<RawInstruction, InvalidInstruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.code.len() {
            return None;
        }
        let result = read_instruction(self.code, self.offset);
        match &result {
            Ok(raw) => self.offset += raw.size,
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_covers_every_opcode() {
        for opcode in Opcode::ALL {
            assert_eq!(Opcode::from_byte(opcode as u8), Some(opcode));
        }
        assert_eq!(Opcode::from_byte(0), None);
        assert_eq!(Opcode::from_byte(255), None);
    }

    #[test]
    fn test_operand_threshold() {
        assert!(!Opcode::ReturnValue.has_operand());
        assert!(!Opcode::PopBlock.has_operand());
        assert!(Opcode::ForIter.has_operand());
        assert!(Opcode::ExtendedArg.has_operand());
    }

    #[test]
    fn test_branch_classes() {
        assert_eq!(Opcode::JumpAbsolute.branch_kind(), Some(BranchKind::Absolute));
        assert_eq!(Opcode::PopJumpIfFalse.branch_kind(), Some(BranchKind::Absolute));
        assert_eq!(Opcode::JumpForward.branch_kind(), Some(BranchKind::Relative));
        assert_eq!(Opcode::SetupLoop.branch_kind(), Some(BranchKind::Relative));
        assert_eq!(Opcode::LoadConst.branch_kind(), None);
        assert!(!Opcode::ExtendedArg.is_branch());
    }

    #[test]
    fn test_read_wide_operand() {
        // EXTENDED_ARG 0x0001; LOAD_CONST 0x0002 -> 0x0001_0002
        let code = [144, 0x01, 0x00, 100, 0x02, 0x00, 83];
        let raw = read_instruction(&code, 0).unwrap();
        assert_eq!(raw.opcode, Opcode::LoadConst);
        assert_eq!(raw.operand, Some(0x0001_0002));
        assert_eq!(raw.size, 6);

        let all: Vec<_> = RawInstructions::new(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].offset, 6);
    }

    #[test]
    fn test_read_errors() {
        assert_eq!(
            read_instruction(&[100, 0x01], 0),
            Err(InvalidInstruction::Truncated { offset: 0 })
        );
        assert_eq!(
            read_instruction(&[83, 0xEE], 1),
            Err(InvalidInstruction::UnknownOpcode { offset: 1, byte: 0xEE })
        );
        assert_eq!(
            read_instruction(&[144, 0, 0, 83], 0),
            Err(InvalidInstruction::DanglingPrefix { offset: 0 })
        );
    }

    #[test]
    fn test_relative_destination() {
        let code = [9, 110, 4, 0];
        let raw = read_instruction(&code, 1).unwrap();
        assert_eq!(raw.branch_destination(), Some(8));
    }
}
