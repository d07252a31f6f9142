//! Inserter: places a suspension point at every statement boundary.

use tracing::debug;

use crate::Vec;
use crate::bytecode::{ConstantPool, Instruction, InstructionSeq, InstrumentError};
use crate::vm::{Constant, Opcode};

/// Insert `LOAD_CONST marker; YIELD_VALUE; POP_TOP` in front of every record
/// that begins a source line, except the first record of the unit.
///
/// The triple goes after the last instruction of the previous statement, so
/// marker `k` is reported once statement `k` has finished. The record that
/// begins the line keeps its line and stays the branch target: a jump into
/// the line skips the marker, and the triple never becomes a target itself.
///
/// Markers count up from `first_marker` without gaps. Returns how many
/// suspension points were inserted.
pub fn insert_suspension_points(
    seq: &mut InstructionSeq,
    pool: &mut ConstantPool,
    first_marker: i64,
) -> Result<usize, InstrumentError> {
    let mut order = Vec::with_capacity(seq.len());
    let mut marker = first_marker;
    let mut points = 0;

    for (position, &id) in seq.ids().to_vec().iter().enumerate() {
        if position != 0 && seq.get(id).source_line.is_some() {
            let index = pool.intern(Constant::Int(marker))?;
            order.push(seq.alloc(Instruction::with_operand(Opcode::LoadConst, index)));
            order.push(seq.alloc(Instruction::simple(Opcode::YieldValue)));
            order.push(seq.alloc(Instruction::simple(Opcode::PopTop)));
            marker += 1;
            points += 1;
        }
        order.push(id);
    }

    seq.set_order(order);
    debug!(points, constants = pool.len(), "inserted suspension points");
    Ok(points)
}
