//! A single block's worth of IL: a flat, straight-line instruction list plus
//! the slot table it was built against.
//!
//! Grounded in `il_code_block`/`code_block.c`: `inst_list`/`inst_count`/
//! `inst_alloc` becomes a plain `Vec<Instruction>` (amortized-doubling
//! growth instead of the source's realloc-by-one, which is a performance
//! detail the source itself doesn't rely on for correctness), and
//! `slots[MAX_SLOTS]` becomes [`SlotTable`].

use crate::error::JitError;
use crate::il::{Instruction, Opcode, Slot};

/// One basic block of IL, as produced by [`crate::il::IlBuilder`].
#[derive(Clone, Debug, Default)]
pub struct IlBlock {
    insts: Vec<Instruction>,
    slots: crate::il::SlotTable,
}

impl IlBlock {
    /// An empty block with no instructions or slots.
    pub fn new() -> Self {
        IlBlock {
            insts: Vec::new(),
            slots: crate::il::SlotTable::new(),
        }
    }

    /// Append an instruction to the end of the block.
    pub fn push(&mut self, inst: Instruction) {
        self.insts.push(inst);
    }

    /// Remove the instruction at `idx`, shifting everything after it down by
    /// one.
    pub fn strike(&mut self, idx: usize) {
        self.insts.remove(idx);
    }

    /// Insert an instruction at `idx`, shifting everything at and after it
    /// up by one. `idx == len()` is equivalent to [`Self::push`].
    pub fn insert(&mut self, idx: usize, inst: Instruction) {
        self.insts.insert(idx, inst);
    }

    /// The instructions making up this block, in order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.insts
    }

    /// Mutable access to the instructions, for optimizer passes.
    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.insts
    }

    /// Number of instructions currently in the block.
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    /// Whether the block has no instructions.
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// The slot table this block has been building against.
    pub fn slots(&self) -> &crate::il::SlotTable {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut crate::il::SlotTable {
        &mut self.slots
    }

    /// The last instruction, which a well-formed block always ends on a
    /// control-transferring [`Opcode::Jump`].
    pub fn last_opcode(&self) -> Option<Opcode> {
        self.insts.last().map(Instruction::opcode)
    }

    /// Starting from instruction `base`, the index of the last instruction
    /// that references `slot` (reads or writes it), stopping early at a
    /// `DISCARD_SLOT` for that slot. Returns `base` if nothing references
    /// it past that point.
    pub fn slot_lifespan(&self, slot: Slot, base: usize) -> usize {
        let mut last_ref = base;
        for (idx, inst) in self.insts.iter().enumerate().skip(base) {
            if let Instruction::DiscardSlot(d) = inst {
                if d.slot == slot {
                    break;
                }
            }
            if inst.is_read_slot(slot) || inst.is_write_slot(slot) {
                last_ref = idx;
            }
        }
        last_ref
    }

    /// Verify the block ends in a `Jump`, per the native dispatch loop's
    /// requirement that every compiled block transfers control explicitly.
    pub fn verify_ends_in_jump(&self) -> Result<(), JitError> {
        match self.last_opcode() {
            Some(Opcode::Jump) => Ok(()),
            _ => Err(JitError::integrity(
                "IL block does not end in a JUMP instruction",
            )),
        }
    }
}
