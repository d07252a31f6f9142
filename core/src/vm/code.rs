use core::fmt;
use core::ops::BitOr;

use hashbrown::HashMap;

use crate::{String, Vec, format};
use crate::vm::opcode::{RawInstructions, read_instruction};

/// Code unit flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CodeFlags(u32);

impl CodeFlags {
    pub const NONE: CodeFlags = CodeFlags(0);
    /// Invoking the unit yields a resumable computation instead of running it.
    pub const GENERATOR: CodeFlags = CodeFlags(0x20);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        CodeFlags(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: CodeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CodeFlags {
    type Output = CodeFlags;

    #[inline]
    fn bitor(self, rhs: CodeFlags) -> CodeFlags {
        CodeFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for CodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodeFlags({:#010x})", self.0)
    }
}

/// Entry of a constant pool.
///
/// Equality is typed: `Int(1)` and `Bool(true)` are different constants.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Constant::Int(value)
    }
}

/// A compiled, self-contained executable unit.
#[derive(Clone, PartialEq)]
pub struct CodeUnit {
    pub name: String,
    /// Number of positional arguments; they occupy the first local slots.
    pub arg_count: usize,
    /// Names of all local slots (arguments first).
    pub local_names: Vec<String>,
    /// Maximum operand stack depth.
    pub stack_size: usize,
    pub flags: CodeFlags,
    /// Encoded instruction stream.
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    /// Names bound in an enclosing scope, read with `LOAD_DEREF`.
    pub free_vars: Vec<String>,
    /// Line of the unit's header; line deltas accumulate from here.
    pub first_line: u32,
    /// Delta-encoded `(byte_delta, line_delta)` pairs.
    pub line_table: Vec<u8>,
}

impl CodeUnit {
    #[inline]
    pub fn local_count(&self) -> usize {
        self.local_names.len()
    }

    /// Local slots a frame allocates. Arguments always get a slot, even when
    /// `local_names` is shorter than `arg_count`.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.local_count().max(self.arg_count)
    }

    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    pub fn instructions(&self) -> RawInstructions<'_> {
        RawInstructions::new(&self.code)
    }

    /// Offsets that begin a new source line, with that line, in offset order.
    ///
    /// An offset is reported when a non-zero byte delta is about to be applied
    /// and the accumulated line differs from the last one reported; the final
    /// accumulated line is reported at the final offset. Offset 0 therefore
    /// always starts a line.
    pub fn line_starts(&self) -> Vec<(usize, u32)> {
        let mut starts = Vec::new();
        let mut last_line = None;
        let mut line = self.first_line;
        let mut offset = 0usize;

        for pair in self.line_table.chunks_exact(2) {
            let (byte_delta, line_delta) = (pair[0], pair[1]);
            if byte_delta != 0 {
                if last_line != Some(line) {
                    starts.push((offset, line));
                    last_line = Some(line);
                }
                offset += byte_delta as usize;
            }
            line += line_delta as u32;
        }
        if last_line != Some(line) {
            starts.push((offset, line));
        }
        starts
    }

    /// Source line of the instruction at `offset`.
    pub fn line_for_offset(&self, offset: usize) -> u32 {
        let mut line = self.first_line;
        let mut addr = 0usize;
        for pair in self.line_table.chunks_exact(2) {
            addr += pair[0] as usize;
            if addr > offset {
                break;
            }
            line += pair[1] as u32;
        }
        line
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Code {{")?;
        writeln!(f, "  name: {}", self.name)?;
        writeln!(f, "  arg_count: {}", self.arg_count)?;
        writeln!(f, "  locals: {:?}", self.local_names)?;
        if !self.free_vars.is_empty() {
            writeln!(f, "  free_vars: {:?}", self.free_vars)?;
        }
        writeln!(f, "  stack_size: {}", self.stack_size)?;
        writeln!(f, "  flags: {:?}", self.flags)?;

        if !self.constants.is_empty() {
            writeln!(f, "  constants: [")?;
            for (i, constant) in self.constants.iter().enumerate() {
                writeln!(f, "    [{}] = {:?}", i, constant)?;
            }
            writeln!(f, "  ]")?;
        } else {
            writeln!(f, "  constants: []")?;
        }

        // First pass: collect branch destinations so they can be labelled.
        let mut destinations: Vec<usize> = self
            .instructions()
            .filter_map(|raw| raw.ok().and_then(|raw| raw.branch_destination()))
            .collect();
        destinations.sort_unstable();
        destinations.dedup();
        let label_map: HashMap<usize, usize> = destinations
            .into_iter()
            .enumerate()
            .map(|(i, offset)| (offset, i))
            .collect();
        let line_starts: HashMap<usize, u32> = self.line_starts().into_iter().collect();

        // Second pass: print instructions with labels.
        writeln!(f, "  instructions:")?;
        let mut offset = 0;
        while offset < self.code.len() {
            let raw = match read_instruction(&self.code, offset) {
                Ok(raw) => raw,
                Err(e) => {
                    writeln!(f, "    <{}>", e)?;
                    break;
                }
            };
            let line = line_starts
                .get(&offset)
                .map(|line| format!("{}", line))
                .unwrap_or_default();
            let label = label_map
                .get(&offset)
                .map(|l| format!("L{}:", l))
                .unwrap_or_default();
            write!(f, "    {:>4} {:5} {:>4}  {}", line, offset, label, raw.opcode)?;
            if let Some(operand) = raw.operand {
                write!(f, " {}", operand)?;
            }
            if let Some(dest) = raw.branch_destination() {
                match label_map.get(&dest) {
                    Some(l) => write!(f, " (to L{})", l)?,
                    None => write!(f, " (to @{})", dest)?,
                }
            }
            writeln!(f)?;
            offset += raw.size;
        }

        write!(f, "}}")
    }
}
