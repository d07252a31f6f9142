//! Instrumentation errors.
//!
//! Two classes share one type:
//!
//! - **Malformed input**: the unit handed to the engine is structurally
//!   invalid. Fatal to the run; retrying cannot help.
//! - **Internal invariant violations**: the engine produced something it
//!   cannot encode. These indicate a defect in the engine and carry the
//!   instruction index and operand needed to diagnose it.
//!
//! See [`InstrumentError::is_internal`].

use thiserror::Error;

use crate::vm::{InvalidInstruction, Opcode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    // ========================================================================
    // Malformed input
    // ========================================================================
    #[error("malformed unit: {0}")]
    InvalidInstruction(#[from] InvalidInstruction),

    #[error("malformed unit: {opcode} at offset {offset} jumps to {target}, which is not an instruction boundary")]
    MisalignedBranchTarget {
        offset: usize,
        opcode: Opcode,
        target: usize,
    },

    #[error("malformed unit: line table starts line {line} at offset {offset}, which is not an instruction boundary")]
    MisalignedLineStart { offset: usize, line: u32 },

    #[error("malformed unit: LOAD_CONST at offset {offset} references constant {index}, pool has {len}")]
    MissingConstant {
        offset: usize,
        index: u32,
        len: usize,
    },

    #[error("malformed unit: {opcode} at offset {offset} references slot {index}, unit has {len}")]
    MissingSlot {
        offset: usize,
        opcode: Opcode,
        index: u32,
        len: usize,
    },

    #[error("malformed unit: '{name}' already suspends")]
    AlreadySuspending { name: alloc::string::String },

    #[error("malformed unit: line {line} at offset {offset} does not follow line {previous}")]
    NonMonotonicLines {
        offset: usize,
        line: u32,
        previous: u32,
    },

    #[error("malformed unit: stack underflow at instruction {index}")]
    StackUnderflow { index: usize },

    #[error("too many constants in constant pool (limit: 4294967295)")]
    TooManyConstants,

    #[error("label {label} was referenced but never placed")]
    UnresolvedLabel { label: u32 },

    // ========================================================================
    // Internal invariant violations
    // ========================================================================
    #[error("internal: relocation did not converge after {passes} passes (limit {limit})")]
    RelocationDiverged { passes: usize, limit: usize },

    #[error("internal: operand {operand} of instruction {index} exceeds the widest encoding")]
    OperandOverflow { index: usize, operand: u64 },

    #[error("internal: relative branch at instruction {index} (offset {offset}) targets earlier offset {target}")]
    BackwardRelativeBranch {
        index: usize,
        offset: usize,
        target: usize,
    },

    #[error("internal: branch at instruction {index} has no resolved target")]
    UnresolvedBranch { index: usize },

    #[error("internal: {opcode} at instruction {index} has no operand")]
    MissingOperand { index: usize, opcode: Opcode },

    #[error("internal: instruction {index} laid out at offset {expected} but encoded at {actual}")]
    StaleLayout {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

impl InstrumentError {
    /// Whether this error indicates a defect in the engine rather than bad input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            InstrumentError::RelocationDiverged { .. }
                | InstrumentError::OperandOverflow { .. }
                | InstrumentError::BackwardRelativeBranch { .. }
                | InstrumentError::UnresolvedBranch { .. }
                | InstrumentError::MissingOperand { .. }
                | InstrumentError::StaleLayout { .. }
        )
    }
}
