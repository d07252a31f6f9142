//! Mutable instruction records and the arena that owns them.
//!
//! Branches refer to their destination by [`InsnId`], an index into the
//! arena, rather than by byte offset. Ids stay valid while records are
//! inserted or moved, so relocation only has to re-derive offsets and
//! operands from the ids.

use core::fmt;

use crate::Vec;
use crate::bytecode::encode::encoded_size;
use crate::vm::Opcode;

/// Stable handle of an instruction record inside an [`InstructionSeq`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct InsnId(u32);

impl InsnId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One decoded operation plus its position metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct Instruction {
    pub(crate) opcode: Opcode,
    /// Present exactly when `opcode.has_operand()`. For branches this is
    /// derived from `target` during relocation.
    pub(crate) operand: Option<u32>,
    /// Destination of a branch.
    pub(crate) target: Option<InsnId>,
    /// Offset of the first byte in the current layout. Only meaningful after
    /// decoding or relocation.
    pub(crate) byte_offset: usize,
    /// Set on instructions that begin a new source line.
    pub(crate) source_line: Option<u32>,
    /// Set when some branch lands here.
    pub(crate) is_branch_target: bool,
}

impl Instruction {
    /// An instruction without operand.
    pub fn simple(opcode: Opcode) -> Self {
        debug_assert!(!opcode.has_operand(), "{} takes an operand", opcode);
        Self::raw(opcode, None)
    }

    /// An instruction with an operand.
    pub fn with_operand(opcode: Opcode, operand: u32) -> Self {
        debug_assert!(opcode.has_operand(), "{} takes no operand", opcode);
        Self::raw(opcode, Some(operand))
    }

    /// A branch to `target`. The operand starts at its narrowest value and
    /// is filled in by relocation.
    pub fn branch(opcode: Opcode, target: InsnId) -> Self {
        debug_assert!(opcode.is_branch(), "{} is not a branch", opcode);
        let mut insn = Self::raw(opcode, Some(0));
        insn.target = Some(target);
        insn
    }

    pub(crate) fn raw(opcode: Opcode, operand: Option<u32>) -> Self {
        Instruction {
            opcode,
            operand,
            target: None,
            byte_offset: 0,
            source_line: None,
            is_branch_target: false,
        }
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[inline]
    pub fn operand(&self) -> Option<u32> {
        self.operand
    }

    #[inline]
    pub fn target(&self) -> Option<InsnId> {
        self.target
    }

    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    #[inline]
    pub fn source_line(&self) -> Option<u32> {
        self.source_line
    }

    #[inline]
    pub fn is_branch_target(&self) -> bool {
        self.is_branch_target
    }

    #[inline]
    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    /// Encoded size under the current operand.
    #[inline]
    pub fn size(&self) -> usize {
        encoded_size(self.opcode, self.operand)
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} {}", self.byte_offset, self.opcode)?;
        if let Some(operand) = self.operand {
            write!(f, " {}", operand)?;
        }
        if let Some(target) = self.target {
            write!(f, " (to #{})", target.0)?;
        }
        if let Some(line) = self.source_line {
            write!(f, " [line {}]", line)?;
        }
        if self.is_branch_target {
            write!(f, " [target]")?;
        }
        Ok(())
    }
}

/// An ordered instruction sequence backed by an arena of records.
///
/// `order` lists the program order; records never move inside the arena,
/// so an [`InsnId`] handed out once stays valid for the life of the sequence.
#[derive(Clone, Default)]
pub struct InstructionSeq {
    arena: Vec<Instruction>,
    order: Vec<InsnId>,
}

impl InstructionSeq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record at the end of the program order.
    pub fn push(&mut self, insn: Instruction) -> InsnId {
        let id = self.alloc(insn);
        self.order.push(id);
        id
    }

    /// Add a record to the arena without placing it in the program order.
    pub(crate) fn alloc(&mut self, insn: Instruction) -> InsnId {
        let id = InsnId(self.arena.len() as u32);
        self.arena.push(insn);
        id
    }

    /// Replace the program order. Every id must come from this sequence.
    pub(crate) fn set_order(&mut self, order: Vec<InsnId>) {
        debug_assert!(order.iter().all(|id| id.index() < self.arena.len()));
        self.order = order;
    }

    #[inline]
    pub fn get(&self, id: InsnId) -> &Instruction {
        &self.arena[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: InsnId) -> &mut Instruction {
        &mut self.arena[id.index()]
    }

    /// Ids in program order.
    #[inline]
    pub fn ids(&self) -> &[InsnId] {
        &self.order
    }

    /// Records in program order.
    pub fn iter(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.order.iter().map(|id| &self.arena[id.index()])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn branch_count(&self) -> usize {
        self.iter().filter(|insn| insn.is_branch()).count()
    }

    /// Position of `id` in program order.
    pub fn position(&self, id: InsnId) -> Option<usize> {
        self.order.iter().position(|&other| other == id)
    }
}

impl fmt::Debug for InstructionSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.order.iter().map(|id| (id.0, self.get(*id))))
            .finish()
    }
}
