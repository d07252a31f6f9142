//! Label-based assembler for authoring code units by hand.
//!
//! The builder produces the same instruction records the decoder does and
//! lays them out with the same relocation, line table and byte encoding
//! passes, so anything it emits is valid input for instrumentation.
//!
//! ```ignore
//! let mut b = CodeBuilder::new("countdown", 1);
//! let n = b.arg("n");
//! let (top, done) = (b.label(), b.label());
//! b.line(2);
//! b.bind(top);
//! b.emit_arg(Opcode::LoadFast, n);
//! b.jump(Opcode::PopJumpIfFalse, done);
//! // ...
//! b.jump(Opcode::JumpAbsolute, top);
//! b.bind(done);
//! b.load_const(Constant::None)?;
//! b.emit(Opcode::ReturnValue);
//! let unit = b.finish()?;
//! ```

use hashbrown::HashMap;
use tracing::debug;

use crate::bytecode::{
    ConstantPool, InsnId, Instruction, InstructionSeq, InstrumentError, encode,
    encode_line_table, relocate,
};
use crate::vm::{CodeFlags, CodeUnit, Constant, Opcode};
use crate::{String, ToString, Vec, vec};

/// A forward or backward jump destination, bound to the next emitted
/// instruction by [`CodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

pub struct CodeBuilder {
    name: String,
    first_line: u32,
    arg_count: usize,
    local_names: Vec<String>,
    free_vars: Vec<String>,
    pool: ConstantPool,
    seq: InstructionSeq,
    /// Instruction each label is bound to, once known.
    labels: Vec<Option<InsnId>>,
    /// Labels waiting for the next emitted instruction.
    unplaced: Vec<Label>,
    /// Line given to the next emitted instruction.
    pending_line: Option<u32>,
    jumps: Vec<(InsnId, Label)>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>, first_line: u32) -> Self {
        CodeBuilder {
            name: name.into(),
            first_line,
            arg_count: 0,
            local_names: Vec::new(),
            free_vars: Vec::new(),
            pool: ConstantPool::new(),
            seq: InstructionSeq::new(),
            labels: Vec::new(),
            unplaced: Vec::new(),
            pending_line: None,
            jumps: Vec::new(),
        }
    }

    /// Declare the next positional argument. Arguments come before locals.
    pub fn arg(&mut self, name: &str) -> u32 {
        debug_assert_eq!(
            self.arg_count,
            self.local_names.len(),
            "arguments must be declared before locals"
        );
        self.arg_count += 1;
        self.local(name)
    }

    /// Declare a local slot and return its index.
    pub fn local(&mut self, name: &str) -> u32 {
        self.local_names.push(name.to_string());
        (self.local_names.len() - 1) as u32
    }

    /// Declare a variable bound in an enclosing scope.
    pub fn free_var(&mut self, name: &str) -> u32 {
        self.free_vars.push(name.to_string());
        (self.free_vars.len() - 1) as u32
    }

    /// Start source line `line` at the next emitted instruction.
    pub fn line(&mut self, line: u32) {
        self.pending_line = Some(line);
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Bind `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) {
        self.unplaced.push(label);
    }

    pub fn emit(&mut self, opcode: Opcode) -> InsnId {
        self.push(Instruction::simple(opcode))
    }

    pub fn emit_arg(&mut self, opcode: Opcode, operand: u32) -> InsnId {
        debug_assert!(!opcode.is_branch(), "use jump() for {}", opcode);
        self.push(Instruction::with_operand(opcode, operand))
    }

    /// Emit `LOAD_CONST`, interning `value` in the constant pool.
    pub fn load_const(&mut self, value: Constant) -> Result<InsnId, InstrumentError> {
        let index = self.pool.intern(value)?;
        Ok(self.emit_arg(Opcode::LoadConst, index))
    }

    /// Emit a branch to `label`.
    pub fn jump(&mut self, opcode: Opcode, label: Label) -> InsnId {
        debug_assert!(opcode.is_branch(), "{} is not a branch", opcode);
        let id = self.push(Instruction::raw(opcode, Some(0)));
        self.jumps.push((id, label));
        id
    }

    fn push(&mut self, mut insn: Instruction) -> InsnId {
        insn.source_line = self.pending_line.take();
        let id = self.seq.push(insn);
        for label in self.unplaced.drain(..) {
            self.labels[label.0 as usize] = Some(id);
        }
        id
    }

    /// Resolve labels, lay out the body and compute the stack bound.
    pub fn finish(mut self) -> Result<CodeUnit, InstrumentError> {
        if let Some(label) = self.unplaced.first() {
            return Err(InstrumentError::UnresolvedLabel { label: label.0 });
        }
        for &(id, label) in &self.jumps {
            let target = self.labels[label.0 as usize]
                .ok_or(InstrumentError::UnresolvedLabel { label: label.0 })?;
            self.seq.get_mut(target).is_branch_target = true;
            self.seq.get_mut(id).target = Some(target);
        }

        let layout = relocate(&mut self.seq)?;
        let line_table = encode_line_table(&self.seq, self.first_line)?;
        let code = encode(&self.seq)?;
        let stack_size = max_stack_depth(&self.seq)?;
        let flags = if self.seq.iter().any(|insn| insn.opcode() == Opcode::YieldValue) {
            CodeFlags::GENERATOR
        } else {
            CodeFlags::NONE
        };

        debug!(
            unit = %self.name,
            code_size = layout.code_size,
            stack_size,
            "assembled unit"
        );
        Ok(CodeUnit {
            name: self.name,
            arg_count: self.arg_count,
            local_names: self.local_names,
            stack_size,
            flags,
            code,
            constants: self.pool.into_vec(),
            free_vars: self.free_vars,
            first_line: self.first_line,
            line_table,
        })
    }
}

/// `(popped, pushed)` by `opcode` on the fall-through path, or on the jump
/// path when `jump` is set.
fn stack_effect(opcode: Opcode, operand: Option<u32>, jump: bool) -> (usize, usize) {
    use Opcode::*;
    match opcode {
        Nop | BreakLoop | PopBlock | SetupLoop | JumpForward | JumpAbsolute | ExtendedArg => {
            (0, 0)
        }
        RotTwo => (2, 2),
        UnaryNegative | UnaryNot | GetIter => (1, 1),
        PopTop | ReturnValue | StoreFast | PopJumpIfFalse | PopJumpIfTrue => (1, 0),
        DupTop => (1, 2),
        BinaryMultiply | BinaryModulo | BinaryAdd | BinarySubtract | BinaryFloorDivide
        | CompareOp => (2, 1),
        YieldValue => (1, 1),
        LoadConst | LoadFast | LoadDeref => (0, 1),
        ForIter if jump => (1, 0),
        ForIter => (1, 2),
        JumpIfFalseOrPop | JumpIfTrueOrPop if jump => (1, 1),
        JumpIfFalseOrPop | JumpIfTrueOrPop => (1, 0),
        RaiseVarargs => (operand.unwrap_or(0) as usize, 0),
    }
}

/// Whether execution can continue with the next instruction.
fn falls_through(opcode: Opcode) -> bool {
    !matches!(
        opcode,
        Opcode::ReturnValue
            | Opcode::RaiseVarargs
            | Opcode::JumpForward
            | Opcode::JumpAbsolute
            | Opcode::BreakLoop
    )
}

/// Deepest operand stack reachable from the entry point.
///
/// `BREAK_LOOP` leaves through its loop's exit, which the matching
/// `SETUP_LOOP` already reaches with the depth it restores, so it is
/// treated as a dead end here.
fn max_stack_depth(seq: &InstructionSeq) -> Result<usize, InstrumentError> {
    let positions: HashMap<InsnId, usize> = seq
        .ids()
        .iter()
        .enumerate()
        .map(|(position, &id)| (id, position))
        .collect();
    let ids = seq.ids();
    let mut depths: Vec<Option<usize>> = vec![None; ids.len()];
    let mut worklist = Vec::new();
    let mut max_depth = 0;

    if !ids.is_empty() {
        depths[0] = Some(0);
        worklist.push(0usize);
    }

    while let Some(index) = worklist.pop() {
        let Some(depth) = depths[index] else {
            continue;
        };
        let insn = seq.get(ids[index]);
        let opcode = insn.opcode();

        let mut successors = Vec::with_capacity(2);
        if falls_through(opcode) && index + 1 < ids.len() {
            successors.push((index + 1, stack_effect(opcode, insn.operand(), false)));
        }
        if let Some(target) = insn.target() {
            let position = *positions
                .get(&target)
                .ok_or(InstrumentError::UnresolvedBranch { index })?;
            successors.push((position, stack_effect(opcode, insn.operand(), true)));
        }
        if successors.is_empty() {
            let (popped, _) = stack_effect(opcode, insn.operand(), false);
            if depth < popped {
                return Err(InstrumentError::StackUnderflow { index });
            }
        }

        for (next, (popped, pushed)) in successors {
            let after = depth
                .checked_sub(popped)
                .ok_or(InstrumentError::StackUnderflow { index })?
                + pushed;
            max_depth = max_depth.max(after);
            if depths[next].is_none() {
                depths[next] = Some(after);
                worklist.push(next);
            }
        }
    }
    Ok(max_depth)
}
