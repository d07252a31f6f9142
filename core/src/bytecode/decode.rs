//! Decoder: raw bytes to linked instruction records.

use hashbrown::HashMap;
use tracing::debug;

use crate::bytecode::{Instruction, InstructionSeq, InstrumentError, InsnId};
use crate::vm::{CodeUnit, Opcode};

/// Decode a unit's body into an [`InstructionSeq`].
///
/// Every branch gets a direct link to the record it lands on, every record
/// that some branch lands on is flagged, and every record that begins a
/// source line carries that line. Operand references into the constant pool,
/// local slots and free variables are checked along the way.
pub fn decode(unit: &CodeUnit) -> Result<InstructionSeq, InstrumentError> {
    let mut seq = InstructionSeq::new();
    let mut by_offset: HashMap<usize, InsnId> = HashMap::new();
    // (branch id, branch offset, destination offset)
    let mut branches: crate::Vec<(InsnId, usize, usize)> = crate::Vec::new();

    for raw in unit.instructions() {
        let raw = raw?;
        check_references(unit, raw.offset, raw.opcode, raw.operand)?;

        let mut insn = Instruction::raw(raw.opcode, raw.operand);
        insn.byte_offset = raw.offset;
        let id = seq.push(insn);
        by_offset.insert(raw.offset, id);

        if raw.opcode.is_branch() {
            let destination = raw
                .branch_destination()
                .ok_or(InstrumentError::MisalignedBranchTarget {
                    offset: raw.offset,
                    opcode: raw.opcode,
                    target: usize::MAX,
                })?;
            branches.push((id, raw.offset, destination));
        }
    }

    for (offset, line) in unit.line_starts() {
        if offset >= unit.code.len() {
            // Trailing entries past the last instruction carry no record.
            continue;
        }
        let id = by_offset
            .get(&offset)
            .ok_or(InstrumentError::MisalignedLineStart { offset, line })?;
        seq.get_mut(*id).source_line = Some(line);
    }

    // The target flag is derived here, so every linked destination carries it.
    for &(id, offset, destination) in &branches {
        let target = *by_offset
            .get(&destination)
            .ok_or(InstrumentError::MisalignedBranchTarget {
                offset,
                opcode: seq.get(id).opcode,
                target: destination,
            })?;
        seq.get_mut(target).is_branch_target = true;
        seq.get_mut(id).target = Some(target);
    }

    debug!(
        unit = %unit.name,
        instructions = seq.len(),
        branches = branches.len(),
        "decoded unit"
    );
    Ok(seq)
}

fn check_references(
    unit: &CodeUnit,
    offset: usize,
    opcode: Opcode,
    operand: Option<u32>,
) -> Result<(), InstrumentError> {
    let Some(index) = operand else {
        return Ok(());
    };
    let len = match opcode {
        Opcode::LoadConst => {
            if index as usize >= unit.constants.len() {
                return Err(InstrumentError::MissingConstant {
                    offset,
                    index,
                    len: unit.constants.len(),
                });
            }
            return Ok(());
        }
        Opcode::LoadFast | Opcode::StoreFast => unit.slot_count(),
        Opcode::LoadDeref => unit.free_vars.len(),
        _ => return Ok(()),
    };
    if index as usize >= len {
        return Err(InstrumentError::MissingSlot {
            offset,
            opcode,
            index,
            len,
        });
    }
    Ok(())
}
