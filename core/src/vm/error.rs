//! Execution errors of the reference interpreter.
//!
//! # Error Categories
//!
//! - **Runtime errors**: failures raised by the unit's own logic (division by
//!   zero, a raised value, ...). These are what an instrumented unit must
//!   propagate unchanged, so every one records the source line it came from.
//!
//! - **Resource exceeded errors**: the unit used more stack than it declared.
//!
//! - **Invalid bytecode**: the instruction stream cannot be executed at all.
//!
//! - **Exhausted**: a finished generator was resumed again.

use core::fmt;

use crate::String;
use crate::vm::{InvalidInstruction, Opcode, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionError {
    Runtime(RuntimeError),
    ResourceExceeded(ResourceExceededError),
    /// The stream holds something the machine cannot execute.
    InvalidBytecode(InvalidInstruction),
    /// An instruction's operand or input is outside what it accepts.
    BadOperand {
        offset: usize,
        opcode: Opcode,
        operand: Option<u32>,
    },
    /// An instruction needed more values than the stack holds.
    StackUnderflow { offset: usize, opcode: Opcode },
    /// A generator that already completed or failed was resumed.
    Exhausted,
}

/// A failure raised by the executing unit's own logic.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Source line of the failing instruction.
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    DivisionByZero,
    Overflow,
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    UnboundLocal { name: String },
    ArityMismatch { expected: usize, given: usize },
    ClosureMismatch { expected: usize, given: usize },
    /// `RAISE_VARARGS` raised this value.
    Raised(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceExceededError {
    StackOverflow { depth: usize, max_depth: usize },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Runtime(e) => write!(f, "{}", e),
            ExecutionError::ResourceExceeded(e) => write!(f, "{}", e),
            ExecutionError::InvalidBytecode(e) => write!(f, "Invalid bytecode: {}", e),
            ExecutionError::BadOperand {
                offset,
                opcode,
                operand,
            } => {
                write!(f, "Bad operand for {} at offset {}", opcode, offset)?;
                if let Some(operand) = operand {
                    write!(f, " (operand {})", operand)?;
                }
                Ok(())
            }
            ExecutionError::StackUnderflow { offset, opcode } => {
                write!(f, "Stack underflow in {} at offset {}", opcode, offset)
            }
            ExecutionError::Exhausted => write!(f, "Generator already exhausted"),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RuntimeErrorKind::DivisionByZero => write!(f, "Division by zero")?,
            RuntimeErrorKind::Overflow => write!(f, "Integer overflow")?,
            RuntimeErrorKind::TypeMismatch { op, left, right } => {
                write!(f, "Unsupported operand types for {}: {} and {}", op, left, right)?
            }
            RuntimeErrorKind::UnboundLocal { name } => {
                write!(f, "Local variable '{}' referenced before assignment", name)?
            }
            RuntimeErrorKind::ArityMismatch { expected, given } => {
                write!(f, "Expected {} arguments, got {}", expected, given)?
            }
            RuntimeErrorKind::ClosureMismatch { expected, given } => {
                write!(f, "Expected {} closure bindings, got {}", expected, given)?
            }
            RuntimeErrorKind::Raised(value) => write!(f, "Raised {}", value)?,
        }
        write!(f, " at line {}", self.line)
    }
}

impl fmt::Display for ResourceExceededError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceExceededError::StackOverflow { depth, max_depth } => {
                write!(
                    f,
                    "Operand stack overflow: depth {} exceeds maximum of {}",
                    depth, max_depth
                )
            }
        }
    }
}

impl From<RuntimeError> for ExecutionError {
    fn from(e: RuntimeError) -> Self {
        ExecutionError::Runtime(e)
    }
}

impl From<ResourceExceededError> for ExecutionError {
    fn from(e: ResourceExceededError) -> Self {
        ExecutionError::ResourceExceeded(e)
    }
}

impl From<InvalidInstruction> for ExecutionError {
    fn from(e: InvalidInstruction) -> Self {
        ExecutionError::InvalidBytecode(e)
    }
}

impl core::error::Error for ExecutionError {}

impl core::error::Error for RuntimeError {}

impl core::error::Error for ResourceExceededError {}
