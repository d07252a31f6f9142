//! Byte encoder.

use smallvec::SmallVec;

use crate::Vec;
use crate::bytecode::{InstructionSeq, InstrumentError};
use crate::vm::{NARROW_OPERAND_LIMIT, Opcode};

/// Longest encoding: `EXTENDED_ARG hi hi OP lo lo`.
pub const MAX_INSTRUCTION_SIZE: usize = 6;

/// Encoded bytes of one instruction.
pub type EncodedInstruction = SmallVec<[u8; MAX_INSTRUCTION_SIZE]>;

/// Size class of an instruction: 1, 3 or 6 bytes.
#[inline]
pub fn encoded_size(opcode: Opcode, operand: Option<u32>) -> usize {
    if !opcode.has_operand() {
        return 1;
    }
    match operand {
        Some(operand) if operand >= NARROW_OPERAND_LIMIT => 6,
        _ => 3,
    }
}

/// Serialize one instruction.
///
/// `index` only labels errors.
pub fn encode_instruction(
    index: usize,
    opcode: Opcode,
    operand: Option<u32>,
) -> Result<EncodedInstruction, InstrumentError> {
    let mut bytes = EncodedInstruction::new();
    if !opcode.has_operand() {
        bytes.push(opcode as u8);
        return Ok(bytes);
    }

    let operand = operand.ok_or(InstrumentError::MissingOperand { index, opcode })?;
    if operand >= NARROW_OPERAND_LIMIT {
        let high = ((operand >> 16) as u16).to_le_bytes();
        bytes.push(Opcode::ExtendedArg as u8);
        bytes.extend_from_slice(&high);
    }
    let low = (operand as u16).to_le_bytes();
    bytes.push(opcode as u8);
    bytes.extend_from_slice(&low);
    Ok(bytes)
}

/// Serialize a relocated sequence.
///
/// Every record must sit at the offset relocation assigned it; a mismatch
/// means the layout is stale and is reported rather than emitted.
pub fn encode(seq: &InstructionSeq) -> Result<Vec<u8>, InstrumentError> {
    let mut out = Vec::new();
    for (index, insn) in seq.iter().enumerate() {
        if insn.byte_offset() != out.len() {
            return Err(InstrumentError::StaleLayout {
                index,
                expected: insn.byte_offset(),
                actual: out.len(),
            });
        }
        out.extend_from_slice(&encode_instruction(index, insn.opcode(), insn.operand())?);
    }
    Ok(out)
}
