//! The IL builder: one checked method per opcode, mirroring the `jit_*`
//! function family in `jit_il.c`.
//!
//! Every builder method here corresponds to exactly one `jit_*` function in
//! the source. Where the source calls `check_slot` before filling in the
//! immediate and raises `ERROR_INTEGRITY` on mismatch, the builder method
//! returns `Err(JitError::Integrity(..))` instead — there is still no
//! recovery (callers are expected to propagate straight into
//! [`JitError::abort`]), but the `Result` lets `#[cfg(test)]` code assert on
//! which check tripped.

use crate::error::JitError;
use crate::il::instr::*;
use crate::il::{IlBlock, Instruction, Slot, SlotType};

/// Incrementally constructs one [`IlBlock`].
#[derive(Debug, Default)]
pub struct IlBuilder {
    block: IlBlock,
}

impl IlBuilder {
    /// A builder over a fresh, empty block.
    pub fn new() -> Self {
        IlBuilder {
            block: IlBlock::new(),
        }
    }

    /// Allocate a new slot of the given type.
    pub fn alloc_slot(&mut self, ty: SlotType) -> Result<Slot, JitError> {
        self.block.slots_mut().alloc(ty)
    }

    /// Consume the builder, returning the finished block.
    pub fn finish(self) -> IlBlock {
        self.block
    }

    /// Borrow the block built so far (for the optimizer or tests to inspect
    /// mid-construction).
    pub fn block(&self) -> &IlBlock {
        &self.block
    }

    fn check_slot(&self, slot: Slot, expected: SlotType) -> Result<(), JitError> {
        if slot.index() >= self.block.slots().len() {
            return Err(JitError::integrity(format!(
                "slot {:?} referenced before being allocated",
                slot
            )));
        }
        let actual = self.block.slots().type_of(slot);
        if actual != expected {
            return Err(JitError::integrity(format!(
                "slot {:?} used as {:?} but was allocated as {:?}",
                slot, expected, actual
            )));
        }
        Ok(())
    }

    fn gen(&self, slot: Slot) -> Result<(), JitError> {
        self.check_slot(slot, SlotType::General)
    }

    fn float(&self, slot: Slot) -> Result<(), JitError> {
        self.check_slot(slot, SlotType::Float)
    }

    fn host_ptr(&self, slot: Slot) -> Result<(), JitError> {
        self.check_slot(slot, SlotType::HostPtr)
    }

    pub fn fallback(&mut self, fallback_fn: FallbackFn, inst: GuestInst) {
        self.block
            .push(Instruction::Fallback(FallbackImmed { fallback_fn, inst }));
    }

    pub fn jump(&mut self, jmp_addr_slot: Slot, jmp_hash_slot: Slot) -> Result<(), JitError> {
        self.gen(jmp_addr_slot)?;
        self.gen(jmp_hash_slot)?;
        self.block.push(Instruction::Jump(JumpImmed {
            jmp_addr_slot,
            jmp_hash_slot,
        }));
        Ok(())
    }

    pub fn cset(
        &mut self,
        flag_slot: Slot,
        t_flag: bool,
        src_val: u32,
        dst_slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(flag_slot)?;
        self.gen(dst_slot)?;
        self.block.push(Instruction::Cset(CsetImmed {
            flag_slot,
            t_flag,
            src_val,
            dst_slot,
        }));
        Ok(())
    }

    pub fn set_slot(&mut self, slot: Slot, new_val: u32) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::SetSlot(SetSlotImmed { slot, new_val }));
        Ok(())
    }

    pub fn set_slot_host_ptr(
        &mut self,
        slot: Slot,
        ptr: std::ptr::NonNull<()>,
    ) -> Result<(), JitError> {
        self.host_ptr(slot)?;
        self.block
            .push(Instruction::SetSlotHostPtr(SetSlotHostPtrImmed {
                slot,
                ptr,
            }));
        Ok(())
    }

    pub fn call_func(&mut self, func: CallFn, slot: Slot) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::CallFunc(CallFuncImmed { func, slot }));
        Ok(())
    }

    pub fn call_func_imm32(&mut self, func: CallFn, imm32: u32) {
        self.block
            .push(Instruction::CallFuncImm32(CallFuncImm32Immed {
                func,
                imm32,
            }));
    }

    pub fn read_16_constaddr(
        &mut self,
        map: MapPtr,
        addr: u32,
        slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::Read16ConstAddr(ReadConstAddrImmed {
                map,
                addr,
                slot,
            }));
        Ok(())
    }

    pub fn sign_extend_8(&mut self, slot: Slot) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::SignExtend8(SignExtendImmed { slot }));
        Ok(())
    }

    pub fn sign_extend_16(&mut self, slot: Slot) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::SignExtend16(SignExtendImmed { slot }));
        Ok(())
    }

    pub fn read_32_constaddr(
        &mut self,
        map: MapPtr,
        addr: u32,
        slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::Read32ConstAddr(ReadConstAddrImmed {
                map,
                addr,
                slot,
            }));
        Ok(())
    }

    pub fn read_8_slot(
        &mut self,
        map: MapPtr,
        addr_slot: Slot,
        dst_slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(addr_slot)?;
        self.gen(dst_slot)?;
        self.block.push(Instruction::Read8Slot(ReadSlotImmed {
            map,
            addr_slot,
            dst_slot,
        }));
        Ok(())
    }

    pub fn read_16_slot(
        &mut self,
        map: MapPtr,
        addr_slot: Slot,
        dst_slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(addr_slot)?;
        self.gen(dst_slot)?;
        self.block.push(Instruction::Read16Slot(ReadSlotImmed {
            map,
            addr_slot,
            dst_slot,
        }));
        Ok(())
    }

    pub fn read_32_slot(
        &mut self,
        map: MapPtr,
        addr_slot: Slot,
        dst_slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(addr_slot)?;
        self.gen(dst_slot)?;
        self.block.push(Instruction::Read32Slot(ReadSlotImmed {
            map,
            addr_slot,
            dst_slot,
        }));
        Ok(())
    }

    pub fn read_float_slot(
        &mut self,
        map: MapPtr,
        addr_slot: Slot,
        dst_slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(addr_slot)?;
        self.float(dst_slot)?;
        self.block
            .push(Instruction::ReadFloatSlot(ReadSlotImmed {
                map,
                addr_slot,
                dst_slot,
            }));
        Ok(())
    }

    pub fn write_8_slot(
        &mut self,
        map: MapPtr,
        src_slot: Slot,
        addr_slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(src_slot)?;
        self.gen(addr_slot)?;
        self.block.push(Instruction::Write8Slot(WriteSlotImmed {
            map,
            src_slot,
            addr_slot,
        }));
        Ok(())
    }

    pub fn write_16_slot(
        &mut self,
        map: MapPtr,
        src_slot: Slot,
        addr_slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(src_slot)?;
        self.gen(addr_slot)?;
        self.block.push(Instruction::Write16Slot(WriteSlotImmed {
            map,
            src_slot,
            addr_slot,
        }));
        Ok(())
    }

    pub fn write_32_slot(
        &mut self,
        map: MapPtr,
        src_slot: Slot,
        addr_slot: Slot,
    ) -> Result<(), JitError> {
        self.gen(src_slot)?;
        self.gen(addr_slot)?;
        self.block.push(Instruction::Write32Slot(WriteSlotImmed {
            map,
            src_slot,
            addr_slot,
        }));
        Ok(())
    }

    pub fn write_float_slot(
        &mut self,
        map: MapPtr,
        src_slot: Slot,
        addr_slot: Slot,
    ) -> Result<(), JitError> {
        self.float(src_slot)?;
        self.gen(addr_slot)?;
        self.block
            .push(Instruction::WriteFloatSlot(WriteSlotImmed {
                map,
                src_slot,
                addr_slot,
            }));
        Ok(())
    }

    pub fn load_slot16(&mut self, slot: Slot, src: std::ptr::NonNull<u16>) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::LoadSlot16(LoadSlot16Immed { src, slot }));
        Ok(())
    }

    pub fn load_slot(&mut self, slot: Slot, src: std::ptr::NonNull<u32>) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::LoadSlot(LoadSlotImmed { src, slot }));
        Ok(())
    }

    pub fn load_slot_offset(
        &mut self,
        slot_base: Slot,
        index: u32,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.host_ptr(slot_base)?;
        self.gen(slot_dst)?;
        self.block
            .push(Instruction::LoadSlotOffset(LoadSlotOffsetImmed {
                slot_base,
                index,
                slot_dst,
            }));
        Ok(())
    }

    pub fn load_float_slot(
        &mut self,
        slot: Slot,
        src: std::ptr::NonNull<f32>,
    ) -> Result<(), JitError> {
        self.float(slot)?;
        self.block
            .push(Instruction::LoadFloatSlot(LoadFloatSlotImmed {
                src,
                slot,
            }));
        Ok(())
    }

    pub fn load_float_slot_offset(
        &mut self,
        slot_base: Slot,
        index: u32,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.host_ptr(slot_base)?;
        self.float(slot_dst)?;
        self.block
            .push(Instruction::LoadFloatSlotOffset(LoadFloatSlotOffsetImmed {
                slot_base,
                index,
                slot_dst,
            }));
        Ok(())
    }

    pub fn store_slot(&mut self, slot: Slot, dst: std::ptr::NonNull<u32>) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::StoreSlot(StoreSlotImmed { dst, slot }));
        Ok(())
    }

    pub fn store_slot_offset(
        &mut self,
        slot_src: Slot,
        slot_base: Slot,
        index: u32,
    ) -> Result<(), JitError> {
        self.gen(slot_src)?;
        self.host_ptr(slot_base)?;
        self.block
            .push(Instruction::StoreSlotOffset(StoreSlotOffsetImmed {
                slot_src,
                slot_base,
                index,
            }));
        Ok(())
    }

    pub fn store_float_slot(
        &mut self,
        slot: Slot,
        dst: std::ptr::NonNull<f32>,
    ) -> Result<(), JitError> {
        self.float(slot)?;
        self.block
            .push(Instruction::StoreFloatSlot(StoreFloatSlotImmed {
                dst,
                slot,
            }));
        Ok(())
    }

    pub fn store_float_slot_offset(
        &mut self,
        slot_src: Slot,
        slot_base: Slot,
        index: u32,
    ) -> Result<(), JitError> {
        self.float(slot_src)?;
        self.host_ptr(slot_base)?;
        self.block
            .push(Instruction::StoreFloatSlotOffset(
                StoreFloatSlotOffsetImmed {
                    slot_src,
                    slot_base,
                    index,
                },
            ));
        Ok(())
    }

    pub fn add(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.gen(slot_src)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::Add(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn sub(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.gen(slot_src)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::Sub(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn sub_float(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.float(slot_src)?;
        self.float(slot_dst)?;
        self.block.push(Instruction::SubFloat(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn add_float(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.float(slot_src)?;
        self.float(slot_dst)?;
        self.block.push(Instruction::AddFloat(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn add_const32(&mut self, slot_dst: Slot, const32: u32) -> Result<(), JitError> {
        self.gen(slot_dst)?;
        self.block.push(Instruction::AddConst32(Const32Immed {
            slot: slot_dst,
            const32,
        }));
        Ok(())
    }

    pub fn discard_slot(&mut self, slot: Slot) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::DiscardSlot(OneSlotImmed { slot }));
        Ok(())
    }

    pub fn xor(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.gen(slot_src)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::Xor(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn xor_const32(&mut self, slot: Slot, const32: u32) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::XorConst32(Const32Immed { slot, const32 }));
        Ok(())
    }

    pub fn mov(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.gen(slot_src)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::Mov(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn mov_float(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.float(slot_src)?;
        self.float(slot_dst)?;
        self.block.push(Instruction::MovFloat(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn and(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.gen(slot_src)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::And(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn and_const32(&mut self, slot: Slot, const32: u32) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::AndConst32(Const32Immed { slot, const32 }));
        Ok(())
    }

    pub fn or(&mut self, slot_src: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.gen(slot_src)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::Or(TwoSlotImmed {
            slot_src,
            slot_dst,
        }));
        Ok(())
    }

    pub fn or_const32(&mut self, slot: Slot, const32: u32) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::OrConst32(Const32Immed { slot, const32 }));
        Ok(())
    }

    pub fn slot_to_bool_inv(&mut self, slot: Slot) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::SlotToBoolInv(OneSlotImmed { slot }));
        Ok(())
    }

    pub fn not(&mut self, slot: Slot) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block.push(Instruction::Not(OneSlotImmed { slot }));
        Ok(())
    }

    pub fn shll(&mut self, slot: Slot, shift_amt: u32) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::Shll(ShiftImmed { slot, shift_amt }));
        Ok(())
    }

    pub fn shar(&mut self, slot: Slot, shift_amt: u32) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::Shar(ShiftImmed { slot, shift_amt }));
        Ok(())
    }

    pub fn shlr(&mut self, slot: Slot, shift_amt: u32) -> Result<(), JitError> {
        self.gen(slot)?;
        self.block
            .push(Instruction::Shlr(ShiftImmed { slot, shift_amt }));
        Ok(())
    }

    pub fn shad(&mut self, slot_val: Slot, slot_shift_amt: Slot) -> Result<(), JitError> {
        self.gen(slot_val)?;
        self.gen(slot_shift_amt)?;
        self.block.push(Instruction::Shad(ShadImmed {
            slot_val,
            slot_shift_amt,
        }));
        Ok(())
    }

    pub fn set_gt_unsigned(
        &mut self,
        slot_lhs: Slot,
        slot_rhs: Slot,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot_lhs)?;
        self.gen(slot_rhs)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::SetGtUnsigned(SetCmpImmed {
            slot_lhs,
            slot_rhs,
            slot_dst,
        }));
        Ok(())
    }

    pub fn set_gt_signed(
        &mut self,
        slot_lhs: Slot,
        slot_rhs: Slot,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot_lhs)?;
        self.gen(slot_rhs)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::SetGtSigned(SetCmpImmed {
            slot_lhs,
            slot_rhs,
            slot_dst,
        }));
        Ok(())
    }

    pub fn set_gt_signed_const(
        &mut self,
        slot_lhs: Slot,
        imm_rhs: i32,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot_lhs)?;
        self.gen(slot_dst)?;
        self.block
            .push(Instruction::SetGtSignedConst(SetCmpConstImmed {
                slot_lhs,
                imm_rhs,
                slot_dst,
            }));
        Ok(())
    }

    pub fn set_eq(
        &mut self,
        slot_lhs: Slot,
        slot_rhs: Slot,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot_lhs)?;
        self.gen(slot_rhs)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::SetEq(SetCmpImmed {
            slot_lhs,
            slot_rhs,
            slot_dst,
        }));
        Ok(())
    }

    pub fn set_ge_unsigned(
        &mut self,
        slot_lhs: Slot,
        slot_rhs: Slot,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot_lhs)?;
        self.gen(slot_rhs)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::SetGeUnsigned(SetCmpImmed {
            slot_lhs,
            slot_rhs,
            slot_dst,
        }));
        Ok(())
    }

    pub fn set_ge_signed(
        &mut self,
        slot_lhs: Slot,
        slot_rhs: Slot,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot_lhs)?;
        self.gen(slot_rhs)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::SetGeSigned(SetCmpImmed {
            slot_lhs,
            slot_rhs,
            slot_dst,
        }));
        Ok(())
    }

    pub fn set_ge_signed_const(
        &mut self,
        slot_lhs: Slot,
        imm_rhs: i32,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot_lhs)?;
        self.gen(slot_dst)?;
        self.block
            .push(Instruction::SetGeSignedConst(SetCmpConstImmed {
                slot_lhs,
                imm_rhs,
                slot_dst,
            }));
        Ok(())
    }

    pub fn set_gt_float(
        &mut self,
        slot_lhs: Slot,
        slot_rhs: Slot,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.float(slot_lhs)?;
        self.float(slot_rhs)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::SetGtFloat(SetCmpImmed {
            slot_lhs,
            slot_rhs,
            slot_dst,
        }));
        Ok(())
    }

    pub fn mul_u32(
        &mut self,
        slot_lhs: Slot,
        slot_rhs: Slot,
        slot_dst: Slot,
    ) -> Result<(), JitError> {
        self.gen(slot_lhs)?;
        self.gen(slot_rhs)?;
        self.gen(slot_dst)?;
        self.block.push(Instruction::MulU32(SetCmpImmed {
            slot_lhs,
            slot_rhs,
            slot_dst,
        }));
        Ok(())
    }

    pub fn mul_float(&mut self, slot_lhs: Slot, slot_dst: Slot) -> Result<(), JitError> {
        self.float(slot_lhs)?;
        self.float(slot_dst)?;
        self.block
            .push(Instruction::MulFloat(MulFloatImmed { slot_lhs, slot_dst }));
        Ok(())
    }

    pub fn clear_float(&mut self, slot: Slot) -> Result<(), JitError> {
        self.float(slot)?;
        self.block
            .push(Instruction::ClearFloat(OneSlotImmed { slot }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_use_before_alloc() {
        let mut b = IlBuilder::new();
        let bogus = Slot::from_u32(0);
        assert!(b.set_slot(bogus, 1).is_err());
    }

    #[test]
    fn rejects_wrong_slot_type() {
        let mut b = IlBuilder::new();
        let float_slot = b.alloc_slot(SlotType::Float).unwrap();
        assert!(b.set_slot(float_slot, 1).is_err());
    }

    #[test]
    fn builds_a_minimal_block() {
        let mut b = IlBuilder::new();
        let addr = b.alloc_slot(SlotType::General).unwrap();
        let hash = b.alloc_slot(SlotType::General).unwrap();
        b.set_slot(addr, 0x8c010000).unwrap();
        b.set_slot(hash, 0).unwrap();
        b.jump(addr, hash).unwrap();

        let block = b.finish();
        assert_eq!(block.len(), 3);
        assert!(block.verify_ends_in_jump().is_ok());
    }
}
