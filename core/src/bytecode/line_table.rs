//! Debug table encoder.
//!
//! The table is a flat list of `(byte_delta, line_delta)` byte pairs,
//! accumulated from `(0, first_line)`. Both deltas are unsigned and capped
//! at 255; a larger gap is split across several pairs. A byte delta is
//! spread as `(255, 0)` chunks followed by the remainder, a line delta as
//! `(byte_delta, 255)` followed by `(0, 255)` chunks and the remainder.
//! [`CodeUnit::line_starts`](crate::vm::CodeUnit::line_starts) reads the
//! table back.

use tracing::debug;

use crate::Vec;
use crate::bytecode::{InstructionSeq, InstrumentError};

const DELTA_CAP: usize = 255;

/// Encode the line table of a relocated sequence.
///
/// Lines must strictly increase in offset order. A line-starting record at
/// offset 0 on `first_line` needs no entry.
pub fn encode_line_table(
    seq: &InstructionSeq,
    first_line: u32,
) -> Result<Vec<u8>, InstrumentError> {
    let mut table = Vec::new();
    let mut last_offset = 0usize;
    let mut last_line = first_line;

    for insn in seq.iter() {
        let Some(line) = insn.source_line() else {
            continue;
        };
        let offset = insn.byte_offset();
        if offset == 0 && line == first_line {
            continue;
        }
        if line <= last_line {
            return Err(InstrumentError::NonMonotonicLines {
                offset,
                line,
                previous: last_line,
            });
        }

        push_delta(&mut table, offset - last_offset, (line - last_line) as usize);
        last_offset = offset;
        last_line = line;
    }

    debug!(entries = table.len() / 2, "encoded line table");
    Ok(table)
}

fn push_delta(table: &mut Vec<u8>, mut byte_delta: usize, mut line_delta: usize) {
    while byte_delta > DELTA_CAP {
        table.extend_from_slice(&[DELTA_CAP as u8, 0]);
        byte_delta -= DELTA_CAP;
    }
    while line_delta > DELTA_CAP {
        table.extend_from_slice(&[byte_delta as u8, DELTA_CAP as u8]);
        byte_delta = 0;
        line_delta -= DELTA_CAP;
    }
    table.extend_from_slice(&[byte_delta as u8, line_delta as u8]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, encode, relocate};
    use crate::vm::{CodeFlags, CodeUnit, Opcode};
    use crate::vec;
    use pretty_assertions::assert_eq;

    /// `nops[i]` NOPs on line `lines[i]`, then a RETURN_VALUE.
    fn seq_with_lines(blocks: &[(usize, u32)]) -> InstructionSeq {
        let mut seq = InstructionSeq::new();
        for &(nops, line) in blocks {
            for i in 0..nops {
                let id = seq.push(Instruction::simple(Opcode::Nop));
                if i == 0 {
                    seq.get_mut(id).source_line = Some(line);
                }
            }
        }
        seq.push(Instruction::simple(Opcode::ReturnValue));
        seq
    }

    fn unit_for(seq: &mut InstructionSeq, first_line: u32) -> CodeUnit {
        relocate(seq).unwrap();
        CodeUnit {
            name: "lines".into(),
            arg_count: 0,
            local_names: vec![],
            stack_size: 1,
            flags: CodeFlags::NONE,
            code: encode(seq).unwrap(),
            constants: vec![],
            free_vars: vec![],
            first_line,
            line_table: encode_line_table(seq, first_line).unwrap(),
        }
    }

    fn expected_starts(seq: &InstructionSeq) -> Vec<(usize, u32)> {
        seq.iter()
            .filter_map(|insn| insn.source_line().map(|line| (insn.byte_offset(), line)))
            .collect()
    }

    #[test]
    fn test_simple_table() {
        let mut seq = seq_with_lines(&[(2, 10), (3, 11), (1, 14)]);
        let unit = unit_for(&mut seq, 10);
        assert_eq!(unit.line_table, vec![2, 1, 3, 3]);
        assert_eq!(unit.line_starts(), expected_starts(&seq));
        assert_eq!(unit.line_for_offset(0), 10);
        assert_eq!(unit.line_for_offset(4), 11);
        assert_eq!(unit.line_for_offset(6), 14);
    }

    #[test]
    fn test_first_record_below_header() {
        // The body starts one line after the header.
        let mut seq = seq_with_lines(&[(1, 2), (1, 3)]);
        let unit = unit_for(&mut seq, 1);
        assert_eq!(unit.line_table, vec![0, 1, 1, 1]);
        assert_eq!(unit.line_starts(), expected_starts(&seq));
    }

    #[test]
    fn test_wide_byte_delta() {
        let mut seq = seq_with_lines(&[(600, 1), (1, 2)]);
        let unit = unit_for(&mut seq, 1);
        assert_eq!(unit.line_table, vec![255, 0, 255, 0, 90, 1]);
        assert_eq!(unit.line_starts(), expected_starts(&seq));
        assert_eq!(unit.line_for_offset(599), 1);
        assert_eq!(unit.line_for_offset(600), 2);
    }

    #[test]
    fn test_wide_line_delta() {
        let mut seq = seq_with_lines(&[(4, 1), (1, 600)]);
        let unit = unit_for(&mut seq, 1);
        assert_eq!(unit.line_table, vec![4, 255, 0, 255, 0, 89]);
        assert_eq!(unit.line_starts(), expected_starts(&seq));
        assert_eq!(unit.line_for_offset(3), 1);
        assert_eq!(unit.line_for_offset(4), 600);
    }

    #[test]
    fn test_never_emits_zero_pair() {
        let mut seq = seq_with_lines(&[(1, 7)]);
        let unit = unit_for(&mut seq, 7);
        assert!(unit.line_table.is_empty());
        assert_eq!(unit.line_starts(), vec![(0, 7)]);
    }

    #[test]
    fn test_non_monotonic_lines() {
        let mut seq = seq_with_lines(&[(1, 5), (1, 4)]);
        relocate(&mut seq).unwrap();
        assert_eq!(
            encode_line_table(&seq, 1).unwrap_err(),
            InstrumentError::NonMonotonicLines {
                offset: 1,
                line: 4,
                previous: 5
            }
        );
    }
}
