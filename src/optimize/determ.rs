//! Advisory known-bits data-flow pass ("determinism pass").
//!
//! Ported from `jit_determ_pass`/`update_state` (`jit_determ.c`). For each
//! slot this tracks a `(known_val, known_bits)` pair — a bit set in
//! `known_bits` means the corresponding bit of `known_val` is known good —
//! purely so a downstream peephole stage (not implemented by this crate)
//! could fold comparisons against already-known values.
//!
//! This pass is gated behind the `determinism-pass` feature and is
//! advisory-only: it never rewrites the block, only computes a snapshot the
//! caller may consult. The source's propagation loop carries a bug — the
//! per-instruction `state_prev` pointer is reassigned through a dead local
//! instead of being threaded to the next iteration, so each instruction's
//! state is computed from a fresh (all-unknown) slot table rather than from
//! its predecessor's. The "SUPPLEMENT" note in `DESIGN.md` treats this as
//! pinned historical behavior, not something to silently fix: no guest code
//! can observe it (nothing downstream consumes this pass yet), but
//! "fixing" it would change what this advisory pass reports without any
//! spec basis for picking a direction.

use crate::il::{IlBlock, Instruction};

/// Per-slot known-bits state: a 1 bit in `known_bits` means the matching
/// bit of `known_val` is guaranteed accurate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetermSlot {
    pub known_val: u32,
    pub known_bits: u32,
}

/// Known-bits state across every slot in a block, snapshotted after one
/// instruction.
#[derive(Clone, Debug, Default)]
pub struct DetermState {
    slots: Vec<DetermSlot>,
}

impl DetermState {
    fn new(n_slots: usize) -> Self {
        DetermState {
            slots: vec![DetermSlot::default(); n_slots],
        }
    }

    pub fn slot(&self, idx: usize) -> DetermSlot {
        self.slots[idx]
    }
}

/// Compute one [`DetermState`] per instruction in `block`.
///
/// Matches the source's actual (buggy) propagation: every entry is derived
/// from a fresh all-unknown state, not from its predecessor.
pub fn run(block: &IlBlock) -> Vec<DetermState> {
    let n_slots = block.slots().len();
    block
        .instructions()
        .iter()
        .map(|inst| {
            let mut state = DetermState::new(n_slots);
            update_state(&mut state, inst);
            state
        })
        .collect()
}

const ALL_KNOWN: u32 = 0xffff_ffff;

fn update_state(state: &mut DetermState, inst: &Instruction) {
    match inst {
        Instruction::SetSlot(i) => {
            state.slots[i.slot.index()] = DetermSlot {
                known_val: i.new_val,
                known_bits: ALL_KNOWN,
            };
        }
        Instruction::Read16ConstAddr(i) => {
            state.slots[i.slot.index()] = DetermSlot {
                known_val: 0,
                known_bits: 0xffff_0000,
            };
        }
        Instruction::SignExtend16(i) => {
            let s = &mut state.slots[i.slot.index()];
            if s.known_bits & (1 << 16) != 0 {
                s.known_bits |= 0xffff_0000;
                if s.known_val & (1 << 16) != 0 {
                    s.known_val |= 0xffff_0000;
                } else {
                    s.known_val &= 0xffff;
                }
            } else {
                s.known_val &= 0xffff;
                s.known_bits &= 0xffff;
            }
        }
        Instruction::Read32ConstAddr(i) => {
            state.slots[i.slot.index()] = DetermSlot::default();
        }
        Instruction::Read32Slot(i) => {
            state.slots[i.dst_slot.index()] = DetermSlot::default();
        }
        Instruction::LoadSlot16(i) => {
            state.slots[i.slot.index()] = DetermSlot {
                known_val: 0,
                known_bits: 0xffff_0000,
            };
        }
        Instruction::Add(i) => {
            let src = state.slots[i.slot_src.index()];
            let dst = state.slots[i.slot_dst.index()];
            let out = if src.known_bits == ALL_KNOWN && dst.known_bits == ALL_KNOWN {
                DetermSlot {
                    known_val: dst.known_val.wrapping_add(src.known_val),
                    known_bits: ALL_KNOWN,
                }
            } else if i.slot_src == i.slot_dst {
                DetermSlot {
                    known_val: dst.known_val << 1,
                    known_bits: (dst.known_bits << 1) | 1,
                }
            } else {
                DetermSlot::default()
            };
            state.slots[i.slot_dst.index()] = out;
        }
        Instruction::Sub(i) => {
            let src = state.slots[i.slot_src.index()];
            let dst = state.slots[i.slot_dst.index()];
            let out = if src.known_bits == ALL_KNOWN && dst.known_bits == ALL_KNOWN {
                DetermSlot {
                    known_val: dst.known_val.wrapping_sub(src.known_val),
                    known_bits: ALL_KNOWN,
                }
            } else if i.slot_src == i.slot_dst {
                DetermSlot {
                    known_val: 0,
                    known_bits: ALL_KNOWN,
                }
            } else {
                DetermSlot::default()
            };
            state.slots[i.slot_dst.index()] = out;
        }
        Instruction::AddConst32(i) => {
            let dst = state.slots[i.slot.index()];
            state.slots[i.slot.index()] = if dst.known_bits == ALL_KNOWN {
                DetermSlot {
                    known_val: dst.known_val.wrapping_add(i.const32),
                    known_bits: ALL_KNOWN,
                }
            } else {
                DetermSlot::default()
            };
        }
        Instruction::DiscardSlot(i) => {
            state.slots[i.slot.index()] = DetermSlot::default();
        }
        Instruction::Xor(i) => {
            if i.slot_src == i.slot_dst {
                state.slots[i.slot_dst.index()] = DetermSlot {
                    known_val: 0,
                    known_bits: ALL_KNOWN,
                };
            } else {
                let src = state.slots[i.slot_src.index()];
                let dst = &mut state.slots[i.slot_dst.index()];
                dst.known_bits &= src.known_bits;
                dst.known_val ^= src.known_val;
            }
        }
        Instruction::XorConst32(i) => {
            state.slots[i.slot.index()].known_val ^= i.const32;
        }
        Instruction::Mov(i) => {
            let src_bits = state.slots[i.slot_src.index()].known_bits;
            state.slots[i.slot_dst.index()].known_bits = src_bits;
        }
        Instruction::And(i) => {
            let src = state.slots[i.slot_src.index()];
            let zero_bits = (!src.known_val) & src.known_bits;
            let one_bits = src.known_val & src.known_bits;
            let known_bits = zero_bits | one_bits;
            let known_val = (!zero_bits | one_bits) & known_bits;
            state.slots[i.slot_dst.index()] = DetermSlot {
                known_val,
                known_bits,
            };
        }
        Instruction::AndConst32(i) => {
            let dst = state.slots[i.slot.index()];
            let zero_bits = !i.const32 | ((!dst.known_val) & dst.known_bits);
            let one_bits = i.const32 & dst.known_val & dst.known_bits;
            let known_bits = zero_bits | one_bits;
            let known_val = (!zero_bits | one_bits) & known_bits;
            state.slots[i.slot.index()] = DetermSlot {
                known_val,
                known_bits,
            };
        }
        Instruction::Or(i) => {
            let src = state.slots[i.slot_src.index()];
            let dst = state.slots[i.slot_dst.index()];
            let zero_bits = (!src.known_val & src.known_bits) & (!dst.known_val & dst.known_bits);
            let one_bits = (src.known_val & src.known_bits) | (dst.known_val & dst.known_bits);
            let known_bits = zero_bits | one_bits;
            let known_val = (!zero_bits | one_bits) & known_bits;
            state.slots[i.slot_dst.index()] = DetermSlot {
                known_val,
                known_bits,
            };
        }
        Instruction::OrConst32(i) => {
            let dst = state.slots[i.slot.index()];
            let zero_bits = !i.const32 & (!dst.known_val & dst.known_bits);
            let one_bits = i.const32 | (dst.known_val & dst.known_bits);
            let known_bits = zero_bits | one_bits;
            let known_val = (!zero_bits | one_bits) & known_bits;
            state.slots[i.slot.index()] = DetermSlot {
                known_val,
                known_bits,
            };
        }
        Instruction::SlotToBoolInv(i) => {
            let s = &mut state.slots[i.slot.index()];
            if s.known_bits == ALL_KNOWN {
                s.known_val = (s.known_val != 0) as u32;
            } else {
                s.known_bits = 0;
            }
        }
        Instruction::Not(i) => {
            state.slots[i.slot.index()].known_val = !state.slots[i.slot.index()].known_val;
        }
        Instruction::Shll(i) => {
            let s = &mut state.slots[i.slot.index()];
            s.known_val <<= i.shift_amt.min(31);
            s.known_bits = if i.shift_amt >= 32 {
                ALL_KNOWN
            } else {
                s.known_bits | ((1u32 << i.shift_amt) - 1)
            };
        }
        Instruction::Shar(i) => {
            let s = &mut state.slots[i.slot.index()];
            s.known_val = ((s.known_val as i32) >> i.shift_amt.min(31)) as u32;
            s.known_bits = if i.shift_amt >= 32 {
                ALL_KNOWN
            } else {
                s.known_bits | !((1u32 << (31 - i.shift_amt)) - 1)
            };
        }
        Instruction::Shlr(i) => {
            let s = &mut state.slots[i.slot.index()];
            s.known_val >>= i.shift_amt.min(31);
            s.known_bits = if i.shift_amt >= 32 {
                ALL_KNOWN
            } else {
                s.known_bits | !((1u32 << (31 - i.shift_amt)) - 1)
            };
        }
        Instruction::SetGtUnsigned(i) => {
            let lhs = state.slots[i.slot_lhs.index()];
            let rhs = state.slots[i.slot_rhs.index()];
            set_flag(
                &mut state.slots[i.slot_dst.index()],
                lhs.known_bits == ALL_KNOWN
                    && rhs.known_bits == ALL_KNOWN
                    && lhs.known_val > rhs.known_val,
            );
        }
        Instruction::SetGtSigned(i) => {
            let lhs = state.slots[i.slot_lhs.index()];
            let rhs = state.slots[i.slot_rhs.index()];
            set_flag(
                &mut state.slots[i.slot_dst.index()],
                lhs.known_bits == ALL_KNOWN
                    && rhs.known_bits == ALL_KNOWN
                    && (lhs.known_val as i32) > (rhs.known_val as i32),
            );
        }
        Instruction::SetGtSignedConst(i) => {
            let lhs = state.slots[i.slot_lhs.index()];
            set_flag(
                &mut state.slots[i.slot_dst.index()],
                lhs.known_bits == ALL_KNOWN && (lhs.known_val as i32) > i.imm_rhs,
            );
        }
        Instruction::SetEq(i) => {
            let lhs = state.slots[i.slot_lhs.index()];
            let rhs = state.slots[i.slot_rhs.index()];
            set_flag(
                &mut state.slots[i.slot_dst.index()],
                lhs.known_bits == ALL_KNOWN
                    && rhs.known_bits == ALL_KNOWN
                    && lhs.known_val == rhs.known_val,
            );
        }
        Instruction::SetGeUnsigned(i) => {
            let lhs = state.slots[i.slot_lhs.index()];
            let rhs = state.slots[i.slot_rhs.index()];
            set_flag(
                &mut state.slots[i.slot_dst.index()],
                lhs.known_bits == ALL_KNOWN
                    && rhs.known_bits == ALL_KNOWN
                    && lhs.known_val >= rhs.known_val,
            );
        }
        Instruction::SetGeSigned(i) => {
            let lhs = state.slots[i.slot_lhs.index()];
            let rhs = state.slots[i.slot_rhs.index()];
            set_flag(
                &mut state.slots[i.slot_dst.index()],
                lhs.known_bits == ALL_KNOWN
                    && rhs.known_bits == ALL_KNOWN
                    && (lhs.known_val as i32) >= (rhs.known_val as i32),
            );
        }
        Instruction::SetGeSignedConst(i) => {
            let lhs = state.slots[i.slot_lhs.index()];
            set_flag(
                &mut state.slots[i.slot_dst.index()],
                lhs.known_bits == ALL_KNOWN && (lhs.known_val as i32) >= i.imm_rhs,
            );
        }
        Instruction::MulU32(i) => {
            state.slots[i.slot_dst.index()] = DetermSlot::default();
        }
        // CALL_FUNC/FALLBACK/JUMP/LOAD_SLOT and anything else: the source
        // treats these as "anything could have happened" and resets the
        // whole state.
        _ => *state = DetermState::new(state.slots.len()),
    }
}

fn set_flag(dst: &mut DetermSlot, known_true: bool) {
    if known_true {
        dst.known_bits |= 1;
        dst.known_val |= 1;
    } else {
        dst.known_bits &= !1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{IlBuilder, SlotType};

    #[test]
    fn set_slot_is_fully_known() {
        let mut b = IlBuilder::new();
        let s = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(s, 0x1234).unwrap();
        b.set_slot(h, 0).unwrap();
        b.jump(s, h).unwrap();
        let block = b.finish();

        let states = run(&block);
        let after_set = states[0].slot(s.index());
        assert_eq!(after_set.known_bits, ALL_KNOWN);
        assert_eq!(after_set.known_val, 0x1234);
    }

    #[test]
    fn propagation_does_not_carry_across_instructions() {
        let mut b = IlBuilder::new();
        let s = b.alloc_slot(SlotType::General).unwrap();
        let h = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(s, 5).unwrap();
        b.not(s).unwrap();
        b.set_slot(h, 0).unwrap();
        b.jump(s, h).unwrap();
        let block = b.finish();

        let states = run(&block);
        // each state is computed fresh, so the NOT at index 1 operates on
        // an all-unknown slot rather than the value set at index 0.
        assert_eq!(states[1].slot(s.index()).known_bits, 0);
    }
}
