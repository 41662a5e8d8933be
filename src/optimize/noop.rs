//! Remove instructions that provably do nothing.
//!
//! Ported from `jit_optimize_nop` (`optimize.c`): the only pattern
//! recognized is `AND(s, s)`, which the SH-4 decoder emits when lowering
//! `TST Rn, Rn` (AND a register against itself purely to feed the
//! following `SLOT_TO_BOOL_INV`/flag check).

use crate::il::{IlBlock, Instruction};

/// Strike every `AND` instruction whose source and destination slot are the
/// same.
pub fn run(block: &mut IlBlock) {
    let mut idx = 0;
    while idx < block.len() {
        let is_noop = matches!(
            block.instructions()[idx],
            Instruction::And(i) if i.slot_src == i.slot_dst
        );
        if is_noop {
            block.strike(idx);
            continue;
        }
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{IlBuilder, SlotType};

    #[test]
    fn strikes_self_and() {
        let mut b = IlBuilder::new();
        let r = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
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
    }
}
