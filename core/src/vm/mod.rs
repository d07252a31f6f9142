//! The target machine: instruction set, executable units and a reference
//! interpreter with cooperative suspension.

mod code;
mod error;
mod opcode;
mod runtime;
mod stack;
mod value;

pub use code::{CodeFlags, CodeUnit, Constant};
pub use error::{ExecutionError, ResourceExceededError, RuntimeError, RuntimeErrorKind};
pub use opcode::{
    BranchKind, CompareOp, HAVE_ARGUMENT, InvalidInstruction, NARROW_OPERAND_LIMIT, OPCODE_TABLE,
    Opcode, OpcodeInfo, RawInstruction, RawInstructions, read_instruction,
};
pub use runtime::{Function, Generator, GeneratorState, Invocation};
pub use value::Value;

pub(crate) use stack::Stack;
