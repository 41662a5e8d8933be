//! Debug-only sanity checking for a finished IL block, ported from
//! `jit_sanity_checks` (`jit_il.c`, `#ifdef INVARIANTS`).
//!
//! Walks the instruction list once, tracking which slots have been written
//! so far: a read of a never-written slot, or a second write to an
//! already-written slot (without an intervening `DISCARD_SLOT`), is an
//! integrity violation. Compiled out in release builds unless the
//! `integrity-checks` feature forces it on, matching the source's
//! `#ifdef INVARIANTS` gate.

use crate::error::JitError;
use crate::il::{IlBlock, Instruction};

fn checks_enabled() -> bool {
    cfg!(debug_assertions) || cfg!(feature = "integrity-checks")
}

/// Run the read-before-write / double-write integrity check over `block`.
/// A no-op (always `Ok`) unless debug assertions or `integrity-checks` are
/// active.
pub fn verify_block(block: &IlBlock) -> Result<(), JitError> {
    if !checks_enabled() {
        return Ok(());
    }

    let mut written = vec![false; block.slots().len()];

    for (idx, inst) in block.instructions().iter().enumerate() {
        for slot in inst.read_slots().into_iter().flatten() {
            if !written[slot.index()] {
                return Err(JitError::integrity(format!(
                    "instruction {} ({:?}) reads uninitialized slot {:?}",
                    idx,
                    inst.opcode(),
                    slot
                )));
            }
        }

        if let Instruction::DiscardSlot(d) = inst {
            written[d.slot.index()] = false;
        }

        for slot in inst.write_slots().into_iter().flatten() {
            if written[slot.index()] {
                return Err(JitError::integrity(format!(
                    "instruction {} ({:?}) overwrites live slot {:?}",
                    idx,
                    inst.opcode(),
                    slot
                )));
            }
            written[slot.index()] = true;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{IlBuilder, SlotType};

    #[test]
    fn catches_read_before_write() {
        let mut b = IlBuilder::new();
        let a = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.jump(a, h).unwrap();
        let block = b.finish();
        assert!(verify_block(&block).is_err());
    }

    #[test]
    fn accepts_well_formed_block() {
        let mut b = IlBuilder::new();
        let a = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(a, 0).unwrap();
        b.set_slot(h, 0).unwrap();
        b.jump(a, h).unwrap();
        let block = b.finish();
        assert!(verify_block(&block).is_ok());
    }

    #[test]
    fn discard_then_rewrite_is_fine() {
        let mut b = IlBuilder::new();
        let s = b.alloc_slot(SlotType::General).unwrap();
        let a = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(s, 1).unwrap();
        b.discard_slot(s).unwrap();
        b.set_slot(s, 2).unwrap();
        b.set_slot(a, 0).unwrap();
        b.set_slot(h, 0).unwrap();
        b.jump(a, h).unwrap();
        let block = b.finish();
        assert!(verify_block(&block).is_ok());
    }
}
