//! Dead-write elimination.
//!
//! Ported from `jit_optimize_dead_write`/`check_for_reads_after`
//! (`optimize.c`): an instruction that writes to one or more slots is dead
//! if none of those slots is read before being overwritten again (or the
//! block ends). Runs after [`crate::optimize::noop`], since removing a
//! no-op `AND` can make a preceding write dead.

use crate::il::IlBlock;

/// Strike every instruction whose writes are all dead.
pub fn run(block: &mut IlBlock) {
    let mut idx = 0;
    while idx < block.len() {
        let writes_anything = block.instructions()[idx]
            .write_slots()
            .iter()
            .any(Option::is_some);
        if !writes_anything {
            idx += 1;
            continue;
        }

        if reads_survive(block, idx) {
            idx += 1;
        } else {
            block.strike(idx);
        }
    }
}

fn reads_survive(block: &IlBlock, inst_idx: usize) -> bool {
    let mut pending: Vec<_> = block.instructions()[inst_idx]
        .write_slots()
        .into_iter()
        .flatten()
        .collect();

    for check in block.instructions().iter().skip(inst_idx + 1) {
        let mut still_pending = Vec::with_capacity(pending.len());
        for slot in pending {
            if check.is_read_slot(slot) {
                return true;
            }
            if !check.is_write_slot(slot) {
                still_pending.push(slot);
            }
        }
        pending = still_pending;
        if pending.is_empty() {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{IlBuilder, SlotType};

    #[test]
    fn strikes_unread_write() {
        let mut b = IlBuilder::new();
        let dead = b.alloc_slot(SlotType::General).unwrap();
        let a = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(dead, 42).unwrap();
        b.set_slot(a, 0).unwrap();
        b.set_slot(h, 0).unwrap();
        b.jump(a, h).unwrap();
        let mut block = b.finish();

        run(&mut block);

        assert_eq!(block.len(), 3);
    }

    #[test]
    fn keeps_write_that_is_read() {
        let mut b = IlBuilder::new();
        let a = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(a, 0).unwrap();
        b.set_slot(h, 0).unwrap();
        b.jump(a, h).unwrap();
        let mut block = b.finish();
        let before = block.len();

        run(&mut block);

        assert_eq!(block.len(), before);
    }
}
