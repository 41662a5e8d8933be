//! IL-to-IL optimization passes, run after an [`crate::il::IlBlock`] is
//! built and before it is handed to a backend.
//!
//! Ported from `jit_optimize` (`optimize.c`). The three passes run in a
//! fixed order, each depending on cleanup done by the one before it:
//! removing no-op `AND`s can expose dead writes, and dead-write elimination
//! changes where each slot's true last reference falls.

mod dce;
mod discard;
mod noop;

#[cfg(feature = "determinism-pass")]
pub mod determ;

use crate::il::IlBlock;

/// Run every mandatory optimization pass over `block`, in source order.
pub fn run(block: &mut IlBlock) {
    noop::run(block);
    dce::run(block);
    discard::run(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{Instruction, SlotType};

    #[test]
    fn pipeline_strikes_noop_and_dead_write_then_discards() {
        use crate::il::IlBuilder;

        let mut b = IlBuilder::new();
        let dead = b.alloc_slot(SlotType::General).unwrap();
        let r = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(dead, 7).unwrap();
        b.set_slot(r, 1).unwrap();
        b.and(r, r).unwrap();
        b.set_slot(h, 0).unwrap();
        b.jump(r, h).unwrap();
        let mut block = b.finish();

        run(&mut block);

        assert!(!block
            .instructions()
            .iter()
            .any(|i| matches!(i, Instruction::And(_))));
        let discards = block
            .instructions()
            .iter()
            .filter(|i| matches!(i, Instruction::DiscardSlot(_)))
            .count();
        assert_eq!(discards, 2);
    }
}
