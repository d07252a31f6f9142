//! Bytecode instrumentation.
//!
//! Instrumenting a unit runs a fixed pipeline:
//!
//! ```text
//! decode -> insert_suspension_points -> relocate -> encode_line_table
//!                                                 -> encode
//!                                                 -> assemble
//! ```
//!
//! [`yieldify`] runs the whole thing. The stages are public so they can be
//! exercised on their own.

mod assemble;
mod builder;
mod constants;
mod decode;
mod encode;
mod error;
mod insert;
mod instruction;
mod line_table;
mod relocate;

pub use assemble::{InstrumentOptions, yieldify, yieldify_with};
pub use builder::{CodeBuilder, Label};
pub use constants::ConstantPool;
pub use decode::decode;
pub use encode::{
    EncodedInstruction, MAX_INSTRUCTION_SIZE, encode, encode_instruction, encoded_size,
};
pub use error::InstrumentError;
pub use insert::insert_suspension_points;
pub use instruction::{InsnId, Instruction, InstructionSeq};
pub use line_table::encode_line_table;
pub use relocate::{Layout, relocate};
