//! Offset and branch relocation.
//!
//! Inserting instructions moves every later byte offset, and a branch
//! operand that grows past the narrow range widens its own instruction,
//! which moves everything after it again. Relocation therefore iterates:
//!
//! 1. reset every branch operand to 0 so the narrowest encoding is tried first;
//! 2. lay out offsets from the current sizes;
//! 3. recompute every branch operand from its target's offset;
//! 4. if any branch changed size class, go back to 2.
//!
//! Sizes only grow once the reset is done: absolute operands are offsets,
//! which never shrink, and relative branches only jump forward over
//! instructions that never shrink. Each branch grows at most once, so the
//! loop settles after at most `branches + 1` passes.

use tracing::{debug, trace};

use crate::bytecode::{InstructionSeq, InstrumentError};
use crate::vm::BranchKind;

/// Result of a converged relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Total encoded size in bytes.
    pub code_size: usize,
    /// Operand-recomputation passes, the final no-change pass included.
    pub passes: usize,
}

/// Assign final offsets and branch operands to every record.
pub fn relocate(seq: &mut InstructionSeq) -> Result<Layout, InstrumentError> {
    reset_branch_operands(seq);
    let mut code_size = assign_offsets(seq);

    let limit = seq.len() + 1;
    let mut passes = 0;
    loop {
        if passes == limit {
            return Err(InstrumentError::RelocationDiverged { passes, limit });
        }
        passes += 1;

        let resized = recompute_branch_operands(seq)?;
        trace!(pass = passes, resized, code_size, "relocation pass");
        if resized == 0 {
            break;
        }
        code_size = assign_offsets(seq);
    }

    debug!(code_size, passes, "relocated");
    Ok(Layout { code_size, passes })
}

fn reset_branch_operands(seq: &mut InstructionSeq) {
    for &id in seq.ids().to_vec().iter() {
        let insn = seq.get_mut(id);
        if insn.is_branch() {
            insn.operand = Some(0);
        }
    }
}

/// Lay out offsets from the current sizes; returns the total size.
fn assign_offsets(seq: &mut InstructionSeq) -> usize {
    let mut offset = 0;
    for &id in seq.ids().to_vec().iter() {
        let insn = seq.get_mut(id);
        insn.byte_offset = offset;
        offset += insn.size();
    }
    offset
}

/// Recompute every branch operand from its target's current offset.
///
/// A relative operand is measured from the end of the branch as currently
/// laid out; if that changes the branch's size, the next pass measures it
/// again. Returns how many branches changed size class.
fn recompute_branch_operands(seq: &mut InstructionSeq) -> Result<usize, InstrumentError> {
    let mut resized = 0;
    let ids = seq.ids().to_vec();

    for (index, &id) in ids.iter().enumerate() {
        let insn = seq.get(id);
        let Some(kind) = insn.opcode().branch_kind() else {
            continue;
        };
        let target = insn
            .target()
            .ok_or(InstrumentError::UnresolvedBranch { index })?;
        let target_offset = seq.get(target).byte_offset();
        let offset = insn.byte_offset();
        let size = insn.size();

        let operand = match kind {
            BranchKind::Absolute => target_offset,
            BranchKind::Relative => target_offset.checked_sub(offset + size).ok_or(
                InstrumentError::BackwardRelativeBranch {
                    index,
                    offset,
                    target: target_offset,
                },
            )?,
        };
        let operand: u32 = operand
            .try_into()
            .map_err(|_| InstrumentError::OperandOverflow {
                index,
                operand: operand as u64,
            })?;

        let insn = seq.get_mut(id);
        insn.operand = Some(operand);
        if insn.size() != size {
            resized += 1;
        }
    }
    Ok(resized)
}
