//! Insert `DISCARD_SLOT` markers after each slot's last reference.
//!
//! Ported from `jit_optimize_discard` (`optimize.c`): for every slot, scan
//! backward from the end of the block for the last instruction that reads
//! or writes it, and insert a `DISCARD_SLOT` immediately after. Tells the
//! backend it no longer needs to keep that slot's register or stack
//! location live past that point. Runs last, after [`crate::optimize::dce`]
//! has removed anything whose last reference would otherwise be a dead
//! write.

use crate::il::instr::OneSlotImmed;
use crate::il::{IlBlock, Instruction, Slot};

/// Insert a `DISCARD_SLOT` right after each slot's final reference.
pub fn run(block: &mut IlBlock) {
    let n_slots = block.slots().len();
    for slot_no in 0..n_slots {
        let slot = Slot::from_u32(slot_no as u32);
        let mut found = None;
        for (idx, inst) in block.instructions().iter().enumerate().rev() {
            if inst.is_read_slot(slot) || inst.is_write_slot(slot) {
                found = Some(idx);
                break;
            }
        }
        if let Some(idx) = found {
            block.insert(idx + 1, Instruction::DiscardSlot(OneSlotImmed { slot }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{IlBuilder, SlotType};

    #[test]
    fn inserts_one_discard_per_slot() {
        let mut b = IlBuilder::new();
        let a = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(a, 0).unwrap();
        b.set_slot(h, 0).unwrap();
        b.jump(a, h).unwrap();
        let mut block = b.finish();
        let before = block.len();

        run(&mut block);

        let discards = block
            .instructions()
            .iter()
            .filter(|i| matches!(i, Instruction::DiscardSlot(_)))
            .count();
        assert_eq!(discards, 2);
        assert_eq!(block.len(), before + 2);
    }
}
