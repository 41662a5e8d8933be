//! The IL interpreter backend: the fallback path used when
//! [`crate::config::JitConfig::use_native_backend`] is off, or while a block
//! compiles for the first time under the native backend.
//!
//! Ported from `jit_intp/code_block_intp.c`'s `code_block_intp_exec`: a flat
//! dispatch loop over a copied instruction list and a heap-allocated slot
//! array. The source's slot array is `uint32_t[]`; this one is `u64` per
//! slot so it can also hold the `SET_SLOT_HOST_PTR`/`LOAD_SLOT_OFFSET`
//! family's raw host pointers without a second, differently-typed array.

use std::ffi::c_void;

use crate::error::JitError;
use crate::il::{IlBlock, Instruction};

/// Where a block's trailing `JUMP` sends control next: a guest address plus
/// the fingerprint [`crate::dispatch_meta::DispatchMeta::hash`] would derive
/// for it, precomputed by the block itself so the dispatch loop doesn't have
/// to call back into the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JumpTarget {
    pub addr: u32,
    pub hash: u32,
}

/// A compiled block ready for repeated interpretation. Owns its own copy of
/// the instruction list (never the [`IlBlock`] it was built from), matching
/// `code_block_intp_compile`'s `memcpy` into freshly `malloc`'d storage.
pub struct InterpBlock {
    instructions: Vec<Instruction>,
    n_slots: usize,
}

impl InterpBlock {
    /// Deep-copy `block`'s instructions, failing if it doesn't end in a
    /// `JUMP` (every compiled block must transfer control explicitly).
    pub fn compile(block: &IlBlock) -> Result<Self, JitError> {
        block.verify_ends_in_jump()?;
        Ok(InterpBlock {
            instructions: block.instructions().to_vec(),
            n_slots: block.slots().len(),
        })
    }

    /// The block's cycle cost as charged against [`crate::clock::CycleClock`]
    /// by [`crate::jit::JitState::entry`]. No per-opcode SH-4 timing model is
    /// in scope here (that's guest-ISA-specific and out of this crate's
    /// remit), so every IL instruction but its trailing `JUMP` counts for one
    /// cycle — the same approximation the native backend's lowering pass
    /// uses to fill in a compiled block's own cycle count.
    pub fn cycle_count(&self) -> u32 {
        (self.instructions.len().saturating_sub(1)) as u32
    }

    /// Run the block to completion, returning where it jumps to. `cpu` is
    /// the opaque CPU-state pointer forwarded untouched to `FALLBACK` and
    /// `CALL_FUNC`/`CALL_FUNC_IMM32` callbacks.
    ///
    /// # Safety
    /// `cpu` must be the same pointer the embedder's [`crate::dispatch_meta::DispatchMeta`]
    /// decoded this block against, and every raw pointer captured in a
    /// `LOAD_SLOT`/`STORE_SLOT`/`SET_SLOT_HOST_PTR` instruction must still be
    /// valid.
    pub unsafe fn exec(&self, cpu: *mut c_void) -> JumpTarget {
        let mut slots: Vec<u64> = vec![0; self.n_slots];

        for inst in &self.instructions {
            if let Some(target) = exec_one(inst, &mut slots, cpu) {
                return target;
            }
        }

        JitError::integrity(format!(
            "{}-instruction interpreted block fell off the end without a JUMP",
            self.instructions.len()
        ))
        .abort()
    }
}

#[inline]
fn get_u32(slots: &[u64], s: crate::il::Slot) -> u32 {
    slots[s.index()] as u32
}

#[inline]
fn set_u32(slots: &mut [u64], s: crate::il::Slot, v: u32) {
    slots[s.index()] = v as u64;
}

#[inline]
fn get_f32(slots: &[u64], s: crate::il::Slot) -> f32 {
    f32::from_bits(slots[s.index()] as u32)
}

#[inline]
fn set_f32(slots: &mut [u64], s: crate::il::Slot, v: f32) {
    slots[s.index()] = v.to_bits() as u64;
}

/// Execute one instruction, returning `Some(target)` only for the
/// block-ending `JUMP`.
///
/// # Safety
/// Same contract as [`InterpBlock::exec`].
unsafe fn exec_one(inst: &Instruction, slots: &mut [u64], cpu: *mut c_void) -> Option<JumpTarget> {
    use Instruction as I;
    match inst {
        I::Fallback(i) => (i.fallback_fn)(cpu, i.inst),
        I::Jump(i) => {
            return Some(JumpTarget {
                addr: get_u32(slots, i.jmp_addr_slot),
                hash: get_u32(slots, i.jmp_hash_slot),
            })
        }
        I::Cset(i) => {
            if (get_u32(slots, i.flag_slot) & 1) == i.t_flag as u32 {
                set_u32(slots, i.dst_slot, i.src_val);
            }
        }
        I::SetSlot(i) => set_u32(slots, i.slot, i.new_val),
        I::SetSlotHostPtr(i) => slots[i.slot.index()] = i.ptr.as_ptr() as u64,
        I::CallFunc(i) => (i.func)(cpu, get_u32(slots, i.slot)),
        I::CallFuncImm32(i) => (i.func)(cpu, i.imm32),
        I::Read16ConstAddr(i) => set_u32(slots, i.slot, i.map.as_ref().read16(i.addr) as u32),
        I::SignExtend8(i) => set_u32(slots, i.slot, (get_u32(slots, i.slot) as i8) as i32 as u32),
        I::SignExtend16(i) => set_u32(slots, i.slot, (get_u32(slots, i.slot) as i16) as i32 as u32),
        I::Read32ConstAddr(i) => set_u32(slots, i.slot, i.map.as_ref().read32(i.addr)),
        I::Read8Slot(i) => {
            let addr = get_u32(slots, i.addr_slot);
            set_u32(slots, i.dst_slot, i.map.as_ref().read8(addr) as u32);
        }
        I::Read16Slot(i) => {
            let addr = get_u32(slots, i.addr_slot);
            set_u32(slots, i.dst_slot, i.map.as_ref().read16(addr) as u32);
        }
        I::Read32Slot(i) => {
            let addr = get_u32(slots, i.addr_slot);
            set_u32(slots, i.dst_slot, i.map.as_ref().read32(addr));
        }
        I::ReadFloatSlot(i) => {
            let addr = get_u32(slots, i.addr_slot);
            set_f32(slots, i.dst_slot, i.map.as_ref().read_float(addr));
        }
        I::Write8Slot(i) => {
            let addr = get_u32(slots, i.addr_slot);
            i.map.as_ref().write8(addr, get_u32(slots, i.src_slot) as u8);
        }
        I::Write16Slot(i) => {
            let addr = get_u32(slots, i.addr_slot);
            i.map.as_ref().write16(addr, get_u32(slots, i.src_slot) as u16);
        }
        I::Write32Slot(i) => {
            let addr = get_u32(slots, i.addr_slot);
            i.map.as_ref().write32(addr, get_u32(slots, i.src_slot));
        }
        I::WriteFloatSlot(i) => {
            let addr = get_u32(slots, i.addr_slot);
            i.map.as_ref().write_float(addr, get_f32(slots, i.src_slot));
        }
        I::LoadSlot16(i) => set_u32(slots, i.slot, *i.src.as_ref() as u32),
        I::LoadSlot(i) => set_u32(slots, i.slot, *i.src.as_ref()),
        I::LoadSlotOffset(i) => {
            let base = slots[i.slot_base.index()] as *const u8;
            let val = *(base.add(i.index as usize) as *const u32);
            set_u32(slots, i.slot_dst, val);
        }
        I::LoadFloatSlot(i) => set_f32(slots, i.slot, *i.src.as_ref()),
        I::LoadFloatSlotOffset(i) => {
            let base = slots[i.slot_base.index()] as *const u8;
            let val = *(base.add(i.index as usize) as *const f32);
            set_f32(slots, i.slot_dst, val);
        }
        I::StoreSlot(i) => *i.dst.as_ptr() = get_u32(slots, i.slot),
        I::StoreSlotOffset(i) => {
            let base = slots[i.slot_base.index()] as *mut u8;
            *(base.add(i.index as usize) as *mut u32) = get_u32(slots, i.slot_src);
        }
        I::StoreFloatSlot(i) => *i.dst.as_ptr() = get_f32(slots, i.slot),
        I::StoreFloatSlotOffset(i) => {
            let base = slots[i.slot_base.index()] as *mut u8;
            *(base.add(i.index as usize) as *mut f32) = get_f32(slots, i.slot_src);
        }
        I::Add(i) => set_u32(slots, i.slot_dst, get_u32(slots, i.slot_dst).wrapping_add(get_u32(slots, i.slot_src))),
        I::Sub(i) => set_u32(slots, i.slot_dst, get_u32(slots, i.slot_dst).wrapping_sub(get_u32(slots, i.slot_src))),
        I::AddFloat(i) => set_f32(slots, i.slot_dst, get_f32(slots, i.slot_dst) + get_f32(slots, i.slot_src)),
        I::SubFloat(i) => set_f32(slots, i.slot_dst, get_f32(slots, i.slot_dst) - get_f32(slots, i.slot_src)),
        I::AddConst32(i) => set_u32(slots, i.slot, get_u32(slots, i.slot).wrapping_add(i.const32)),
        I::Xor(i) => set_u32(slots, i.slot_dst, get_u32(slots, i.slot_dst) ^ get_u32(slots, i.slot_src)),
        I::XorConst32(i) => set_u32(slots, i.slot, get_u32(slots, i.slot) ^ i.const32),
        I::Mov(i) => set_u32(slots, i.slot_dst, get_u32(slots, i.slot_src)),
        I::MovFloat(i) => set_f32(slots, i.slot_dst, get_f32(slots, i.slot_src)),
        I::And(i) => set_u32(slots, i.slot_dst, get_u32(slots, i.slot_dst) & get_u32(slots, i.slot_src)),
        I::AndConst32(i) => set_u32(slots, i.slot, get_u32(slots, i.slot) & i.const32),
        I::Or(i) => set_u32(slots, i.slot_dst, get_u32(slots, i.slot_dst) | get_u32(slots, i.slot_src)),
        I::OrConst32(i) => set_u32(slots, i.slot, get_u32(slots, i.slot) | i.const32),
        I::SlotToBoolInv(i) => {
            let v = get_u32(slots, i.slot);
            set_u32(slots, i.slot, if v == 0 { 1 } else { 0 });
        }
        I::Not(i) => set_u32(slots, i.slot, !get_u32(slots, i.slot)),
        I::Shll(i) => set_u32(slots, i.slot, get_u32(slots, i.slot) << i.shift_amt),
        I::Shar(i) => set_u32(slots, i.slot, ((get_u32(slots, i.slot) as i32) >> i.shift_amt) as u32),
        I::Shlr(i) => set_u32(slots, i.slot, get_u32(slots, i.slot) >> i.shift_amt),
        I::Shad(i) => {
            let amt = get_u32(slots, i.slot_shift_amt) as i32;
            let val = get_u32(slots, i.slot_val);
            let result = if amt >= 0 {
                val << amt
            } else {
                ((val as i32) >> (-amt)) as u32
            };
            set_u32(slots, i.slot_val, result);
        }
        I::SetGtUnsigned(i) => {
            if get_u32(slots, i.slot_lhs) > get_u32(slots, i.slot_rhs) {
                slots[i.slot_dst.index()] |= 1;
            }
        }
        I::SetGtSigned(i) => {
            if (get_u32(slots, i.slot_lhs) as i32) > (get_u32(slots, i.slot_rhs) as i32) {
                slots[i.slot_dst.index()] |= 1;
            }
        }
        I::SetGtSignedConst(i) => {
            if (get_u32(slots, i.slot_lhs) as i32) > i.imm_rhs {
                slots[i.slot_dst.index()] |= 1;
            }
        }
        I::SetEq(i) => {
            if get_u32(slots, i.slot_lhs) == get_u32(slots, i.slot_rhs) {
                slots[i.slot_dst.index()] |= 1;
            }
        }
        I::SetGeUnsigned(i) => {
            if get_u32(slots, i.slot_lhs) >= get_u32(slots, i.slot_rhs) {
                slots[i.slot_dst.index()] |= 1;
            }
        }
        // The source's SET_GE_SIGNED case writes through
        // `set_ge_unsigned.slot_dst` instead of `set_ge_signed.slot_dst`
        // (code_block_intp.c:259) — a copy-paste artifact that is inert
        // because both fields share one offset in the `union jit_immed`.
        // There is no union here to alias through, so this just targets
        // `slot_dst` directly; behavior is identical to the source either
        // way.
        I::SetGeSigned(i) => {
            if (get_u32(slots, i.slot_lhs) as i32) >= (get_u32(slots, i.slot_rhs) as i32) {
                slots[i.slot_dst.index()] |= 1;
            }
        }
        I::SetGeSignedConst(i) => {
            if (get_u32(slots, i.slot_lhs) as i32) >= i.imm_rhs {
                slots[i.slot_dst.index()] |= 1;
            }
        }
        I::SetGtFloat(i) => {
            if get_f32(slots, i.slot_lhs) > get_f32(slots, i.slot_rhs) {
                slots[i.slot_dst.index()] |= 1;
            }
        }
        I::MulU32(i) => {
            let v = get_u32(slots, i.slot_lhs).wrapping_mul(get_u32(slots, i.slot_rhs));
            set_u32(slots, i.slot_dst, v);
        }
        I::MulFloat(i) => set_f32(slots, i.slot_dst, get_f32(slots, i.slot_dst) * get_f32(slots, i.slot_lhs)),
        I::ClearFloat(i) => set_f32(slots, i.slot, 0.0),
        I::DiscardSlot(_) => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::IlBuilder;

    #[test]
    fn straight_line_add_then_jump() {
        let mut b = IlBuilder::new();
        let a = b.alloc_slot(crate::il::SlotType::General).unwrap();
        let c = b.alloc_slot(crate::il::SlotType::General).unwrap();
        let hash = b.alloc_slot(crate::il::SlotType::General).unwrap();
        b.set_slot(a, 10).unwrap();
        b.set_slot(c, 32).unwrap();
        b.add(c, a).unwrap();
        b.set_slot(hash, 0).unwrap();
        b.jump(a, hash).unwrap();
        let block = b.finish();

        let interp = InterpBlock::compile(&block).unwrap();
        let target = unsafe { interp.exec(std::ptr::null_mut()) };
        assert_eq!(target.addr, 42);
    }

    #[test]
    fn shad_picks_direction_from_sign() {
        let mut b = IlBuilder::new();
        let val = b.alloc_slot(crate::il::SlotType::General).unwrap();
        let amt = b.alloc_slot(crate::il::SlotType::General).unwrap();
        let hash = b.alloc_slot(crate::il::SlotType::General).unwrap();
        b.set_slot(val, 1).unwrap();
        b.set_slot(amt, 4).unwrap();
        b.shad(val, amt).unwrap();
        b.set_slot(hash, 0).unwrap();
        b.jump(val, hash).unwrap();
        let block = b.finish();

        let interp = InterpBlock::compile(&block).unwrap();
        let target = unsafe { interp.exec(std::ptr::null_mut()) };
        assert_eq!(target.addr, 16);
    }

    #[test]
    fn compile_rejects_block_without_trailing_jump() {
        let mut b = IlBuilder::new();
        let s = b.alloc_slot(crate::il::SlotType::General).unwrap();
        b.set_slot(s, 0).unwrap();
        let block = b.finish();
        assert!(InterpBlock::compile(&block).is_err());
    }
}
