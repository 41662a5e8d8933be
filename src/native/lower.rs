//! IL-to-x86-64 lowering: one emit function per opcode, assembling straight
//! into an [`Assembler`] buffer.
//!
//! Ported from the per-opcode `case` arms of `code_block_x86_64_compile`.
//! Every IL block is a single basic block that ends in exactly one `JUMP`
//! (checked by [`crate::il::IlBlock::verify_ends_in_jump`] before lowering
//! ever starts), so unlike the interpreter there is no per-instruction
//! dispatch overhead to hide: the whole block lowers to one straight run of
//! machine code, with the sole internal branch being `SHAD`'s
//! runtime-chosen shift direction.
//!
//! Values never stay resident in a register across two IL instructions.
//! Every operand is reloaded from the slot array and every result is
//! written straight back, the way a first lowering pass (before a
//! register-allocation pass coalesces redundant loads) would look. This is
//! a deliberate simplification of the source's persistent cross-instruction
//! register allocator — see `DESIGN.md`.

use crate::dispatch_meta::GuestMemoryMap;
use crate::error::JitError;
use crate::il::instr::{GuestInst, Instruction, MapPtr};
use crate::il::Slot;
use crate::native::abi::{CallingConvention, GpReg, XmmReg};
use crate::native::emit::{Assembler, Cond};
use crate::native::regset::{RegisterHint, RegisterSet};

/// Width of a guest-memory access, used by the `ReadSlot`/`WriteSlot`
/// family to pick the right load/store encoding and shim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Width {
    W8,
    W16,
    W32,
    F32,
}

/// `extern "C"` shims a compiled block calls out to when a guest-memory
/// access can't be resolved to a direct RAM pointer at compile time (an
/// MMIO region, or a region whose `is_ram()` this build doesn't special
/// case). Each reconstructs the trait object from a stable pointer into the
/// block's constant pool rather than from raw split fat-pointer words, so
/// there's no reliance on `dyn Trait`'s pointer layout.
unsafe extern "C" fn shim_read8(map: *const MapPtr, addr: u32) -> u8 {
    (*map).as_ref().read8(addr)
}
unsafe extern "C" fn shim_read16(map: *const MapPtr, addr: u32) -> u16 {
    (*map).as_ref().read16(addr)
}
unsafe extern "C" fn shim_read32(map: *const MapPtr, addr: u32) -> u32 {
    (*map).as_ref().read32(addr)
}
unsafe extern "C" fn shim_read_float(map: *const MapPtr, addr: u32) -> f32 {
    (*map).as_ref().read_float(addr)
}
unsafe extern "C" fn shim_write8(map: *const MapPtr, addr: u32, val: u8) {
    (*map).as_ref().write8(addr, val)
}
unsafe extern "C" fn shim_write16(map: *const MapPtr, addr: u32, val: u16) {
    (*map).as_ref().write16(addr, val)
}
unsafe extern "C" fn shim_write32(map: *const MapPtr, addr: u32, val: u32) {
    (*map).as_ref().write32(addr, val)
}
unsafe extern "C" fn shim_write_float(map: *const MapPtr, addr: u32, val: f32) {
    (*map).as_ref().write_float(addr, val)
}

/// Per-block lowering state: the assembler, the two register pools, the
/// fixed registers holding the slot-array base and the opaque CPU pointer,
/// the selected ABI, and the constant pool keeping every baked `MapPtr`
/// alive for the block's lifetime.
pub struct Lowering<'a> {
    asm: Assembler,
    gp: RegisterSet<GpReg>,
    abi: &'a dyn CallingConvention,
    slots_base: GpReg,
    cpu_reg: GpReg,
    /// Boxed `MapPtr`s referenced by absolute address from emitted code;
    /// owned here so the pointer stays valid until the block is released.
    pub const_pool: Vec<Box<MapPtr>>,
}

impl<'a> Lowering<'a> {
    pub fn new(abi: &'a dyn CallingConvention, slots_base: GpReg, cpu_reg: GpReg) -> Self {
        Lowering {
            asm: Assembler::new(),
            gp: scratch_pool(slots_base, cpu_reg),
            abi,
            slots_base,
            cpu_reg,
            const_pool: Vec::new(),
        }
    }

    /// Emit the block prologue. When `dirty` is `true` the
    /// block makes at least one call, so `slots_base`/`cpu_reg` are drawn
    /// from the callee-saved pool and must be pushed before being clobbered
    /// with the incoming arguments; a "pure" block (`dirty == false`) reuses
    /// the ABI's own argument registers directly and skips the prologue
    /// entirely, exposing its post-prologue entry as the block's native
    /// entry point.
    pub fn emit_prologue(&mut self, dirty: bool) {
        if !dirty {
            return;
        }
        for &r in self.abi.nonvolatile_gp() {
            self.asm.push_r64(r);
        }
        let arg0 = self.abi.int_args()[0];
        let arg1 = self.abi.int_args()[1];
        if self.slots_base != arg0 {
            self.asm.mov_r64_r64(arg0, self.slots_base);
        }
        if self.cpu_reg != arg1 {
            self.asm.mov_r64_r64(arg1, self.cpu_reg);
        }
    }

    /// Emit the fixed cycle-check tail followed by the
    /// epilogue. `clock_ptr` is the address of the embedder's
    /// [`crate::clock::CycleClock`] triple, baked in as a 64-bit immediate
    /// the same way every other host pointer in this backend is (see the
    /// module doc on why no RIP-relative addressing is needed).
    ///
    /// Unlike the source, the branch between "still has budget, chain to
    /// the next block" and "expired, return to the scheduler" is not
    /// emitted here: this backend always returns to its Rust caller after
    /// updating `countdown`, and [`crate::jit::JitState::entry`] decides
    /// whether to keep chaining by reading [`crate::clock::CycleClock::expired`]
    /// in software. See `DESIGN.md` for why the asm-level dispatch tail is
    /// not reproduced byte-for-byte.
    pub fn emit_cycle_tail(&mut self, dirty: bool, clock_ptr: u64, cycle_count: u32) {
        let clock = self.scratch();
        self.asm.mov_imm64_r64(clock_ptr, clock);
        let cnt = self.scratch();
        self.asm.mov_m64_r64(clock, 8, cnt);
        self.asm.sub_imm32_r64(cycle_count, cnt);
        self.asm.mov_r64_m64(cnt, clock, 8);
        self.release_scratch(clock);
        self.release_scratch(cnt);

        if dirty {
            for &r in self.abi.nonvolatile_gp().iter().rev() {
                self.asm.pop_r64(r);
            }
        }
        self.asm.ret();
    }

    fn scratch(&mut self) -> GpReg {
        let idx = self
            .gp
            .pick_unused(RegisterHint::Function)
            .expect("scratch pool exhausted within a single instruction");
        self.gp.acquire(idx, Slot::from_u32(0));
        self.gp.reg(idx)
    }

    fn release_scratch(&mut self, reg: GpReg) {
        for idx in 0..self.gp.len() {
            if self.gp.reg(idx) == reg {
                self.gp.discard(idx);
                return;
            }
        }
    }

    fn slot_disp(slot: Slot) -> i32 {
        (slot.index() as i32) * 8
    }

    fn load_slot32(&mut self, slot: Slot, dst: GpReg) {
        let base = self.slots_base;
        self.asm.mov_m32_r32(base, Self::slot_disp(slot), dst);
    }

    fn store_slot32(&mut self, src: GpReg, slot: Slot) {
        let base = self.slots_base;
        self.asm.mov_r32_m32(src, base, Self::slot_disp(slot));
    }

    fn bake_map(&mut self, map: MapPtr) -> *const MapPtr {
        let boxed = Box::new(map);
        let ptr = Box::as_ref(&boxed) as *const MapPtr;
        self.const_pool.push(boxed);
        ptr
    }

    /// Lower one instruction. Returns `Ok(true)` if this was the block's
    /// terminal `JUMP` (nothing may follow it).
    pub fn lower(&mut self, inst: &Instruction) -> Result<bool, JitError> {
        use Instruction as I;
        match inst {
            I::Fallback(i) => {
                self.emit_fallback(i.fallback_fn as usize as u64, i.inst);
                Ok(false)
            }
            I::Jump(i) => {
                self.emit_jump(i.jmp_addr_slot, i.jmp_hash_slot);
                Ok(true)
            }
            I::Cset(i) => {
                self.emit_cset(i.flag_slot, i.t_flag, i.src_val, i.dst_slot);
                Ok(false)
            }
            I::SetSlot(i) => {
                let tmp = self.scratch();
                self.asm.mov_imm32_r32(i.new_val, tmp);
                self.store_slot32(tmp, i.slot);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::SetSlotHostPtr(i) => {
                let tmp = self.scratch();
                self.asm.mov_imm64_r64(i.ptr.as_ptr() as u64, tmp);
                let base = self.slots_base;
                self.asm.mov_r64_m64(tmp, base, Self::slot_disp(i.slot));
                self.release_scratch(tmp);
                Ok(false)
            }
            I::CallFunc(i) => {
                let arg = self.scratch();
                self.load_slot32(i.slot, arg);
                self.emit_call(i.func as usize as u64, arg);
                self.release_scratch(arg);
                Ok(false)
            }
            I::CallFuncImm32(i) => {
                let arg = self.scratch();
                self.asm.mov_imm32_r32(i.imm32, arg);
                self.emit_call(i.func as usize as u64, arg);
                self.release_scratch(arg);
                Ok(false)
            }
            I::Read16ConstAddr(i) => {
                self.emit_read_const_addr(i.map, i.addr, i.slot, Width::W16)?;
                Ok(false)
            }
            I::Read32ConstAddr(i) => {
                self.emit_read_const_addr(i.map, i.addr, i.slot, Width::W32)?;
                Ok(false)
            }
            I::SignExtend8(i) => {
                self.emit_sign_extend(i.slot, Width::W8);
                Ok(false)
            }
            I::SignExtend16(i) => {
                self.emit_sign_extend(i.slot, Width::W16);
                Ok(false)
            }
            I::Read8Slot(i) => {
                self.emit_read_slot(i.map, i.addr_slot, i.dst_slot, Width::W8)?;
                Ok(false)
            }
            I::Read16Slot(i) => {
                self.emit_read_slot(i.map, i.addr_slot, i.dst_slot, Width::W16)?;
                Ok(false)
            }
            I::Read32Slot(i) => {
                self.emit_read_slot(i.map, i.addr_slot, i.dst_slot, Width::W32)?;
                Ok(false)
            }
            I::ReadFloatSlot(i) => {
                self.emit_read_slot(i.map, i.addr_slot, i.dst_slot, Width::F32)?;
                Ok(false)
            }
            I::Write8Slot(i) => {
                self.emit_write_slot(i.map, i.src_slot, i.addr_slot, Width::W8)?;
                Ok(false)
            }
            I::Write16Slot(i) => {
                self.emit_write_slot(i.map, i.src_slot, i.addr_slot, Width::W16)?;
                Ok(false)
            }
            I::Write32Slot(i) => {
                self.emit_write_slot(i.map, i.src_slot, i.addr_slot, Width::W32)?;
                Ok(false)
            }
            I::WriteFloatSlot(i) => {
                self.emit_write_slot(i.map, i.src_slot, i.addr_slot, Width::F32)?;
                Ok(false)
            }
            I::LoadSlot16(i) => {
                let tmp = self.scratch();
                self.asm.mov_imm64_r64(i.src.as_ptr() as u64, tmp);
                self.asm.movzx_m16_r32(tmp, 0, tmp);
                self.store_slot32(tmp, i.slot);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::LoadSlot(i) => {
                let ptr = self.scratch();
                let val = self.scratch();
                self.asm.mov_imm64_r64(i.src.as_ptr() as u64, ptr);
                self.asm.mov_m32_r32(ptr, 0, val);
                self.store_slot32(val, i.slot);
                self.release_scratch(ptr);
                self.release_scratch(val);
                Ok(false)
            }
            I::LoadSlotOffset(i) => {
                let base = self.scratch();
                let host_base = self.slots_base;
                self.asm.mov_m64_r64(host_base, Self::slot_disp(i.slot_base), base);
                self.asm.mov_m32_r32(base, i.index as i32, base);
                self.store_slot32(base, i.slot_dst);
                self.release_scratch(base);
                Ok(false)
            }
            I::LoadFloatSlot(i) => {
                let ptr = self.scratch();
                self.asm.mov_imm64_r64(i.src.as_ptr() as u64, ptr);
                let xmm = XmmReg(0);
                self.asm.movss_m32_xmm(ptr, 0, xmm);
                let base = self.slots_base;
                self.asm.movss_xmm_m32(xmm, base, Self::slot_disp(i.slot));
                self.release_scratch(ptr);
                Ok(false)
            }
            I::LoadFloatSlotOffset(i) => {
                let base = self.scratch();
                let host_base = self.slots_base;
                self.asm.mov_m64_r64(host_base, Self::slot_disp(i.slot_base), base);
                let xmm = XmmReg(0);
                self.asm.movss_m32_xmm(base, i.index as i32, xmm);
                self.asm.movss_xmm_m32(xmm, host_base, Self::slot_disp(i.slot_dst));
                self.release_scratch(base);
                Ok(false)
            }
            I::StoreSlot(i) => {
                let ptr = self.scratch();
                let val = self.scratch();
                self.load_slot32(i.slot, val);
                self.asm.mov_imm64_r64(i.dst.as_ptr() as u64, ptr);
                self.asm.mov_r32_m32(val, ptr, 0);
                self.release_scratch(ptr);
                self.release_scratch(val);
                Ok(false)
            }
            I::StoreSlotOffset(i) => {
                let base = self.scratch();
                let val = self.scratch();
                let host_base = self.slots_base;
                self.asm.mov_m64_r64(host_base, Self::slot_disp(i.slot_base), base);
                self.load_slot32(i.slot_src, val);
                self.asm.mov_r32_m32(val, base, i.index as i32);
                self.release_scratch(base);
                self.release_scratch(val);
                Ok(false)
            }
            I::StoreFloatSlot(i) => {
                let ptr = self.scratch();
                self.asm.mov_imm64_r64(i.dst.as_ptr() as u64, ptr);
                let base = self.slots_base;
                let xmm = XmmReg(0);
                self.asm.movss_m32_xmm(base, Self::slot_disp(i.slot), xmm);
                self.asm.movss_xmm_m32(xmm, ptr, 0);
                self.release_scratch(ptr);
                Ok(false)
            }
            I::StoreFloatSlotOffset(i) => {
                let base = self.scratch();
                let host_base = self.slots_base;
                self.asm.mov_m64_r64(host_base, Self::slot_disp(i.slot_base), base);
                let xmm = XmmReg(0);
                self.asm.movss_m32_xmm(host_base, Self::slot_disp(i.slot_src), xmm);
                self.asm.movss_xmm_m32(xmm, base, i.index as i32);
                self.release_scratch(base);
                Ok(false)
            }
            I::Add(i) => {
                self.emit_alu32(i.slot_src, i.slot_dst, Assembler::add_r32_r32);
                Ok(false)
            }
            I::Sub(i) => {
                self.emit_alu32(i.slot_src, i.slot_dst, Assembler::sub_r32_r32);
                Ok(false)
            }
            I::Xor(i) => {
                self.emit_alu32(i.slot_src, i.slot_dst, Assembler::xor_r32_r32);
                Ok(false)
            }
            I::And(i) => {
                self.emit_alu32(i.slot_src, i.slot_dst, Assembler::and_r32_r32);
                Ok(false)
            }
            I::Or(i) => {
                self.emit_alu32(i.slot_src, i.slot_dst, Assembler::or_r32_r32);
                Ok(false)
            }
            I::Mov(i) => {
                let tmp = self.scratch();
                self.load_slot32(i.slot_src, tmp);
                self.store_slot32(tmp, i.slot_dst);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::MovFloat(i) => {
                let xmm = XmmReg(0);
                let base = self.slots_base;
                self.asm.movss_m32_xmm(base, Self::slot_disp(i.slot_src), xmm);
                self.asm.movss_xmm_m32(xmm, base, Self::slot_disp(i.slot_dst));
                Ok(false)
            }
            I::SubFloat(i) => {
                self.emit_alu_float(i.slot_src, i.slot_dst, Assembler::subss_xmm_xmm);
                Ok(false)
            }
            I::AddFloat(i) => {
                self.emit_alu_float(i.slot_src, i.slot_dst, Assembler::addss_xmm_xmm);
                Ok(false)
            }
            I::MulFloat(i) => {
                self.emit_alu_float(i.slot_lhs, i.slot_dst, Assembler::mulss_xmm_xmm);
                Ok(false)
            }
            I::AddConst32(i) => {
                let tmp = self.scratch();
                self.load_slot32(i.slot, tmp);
                self.asm.add_imm32_r32(i.const32, tmp);
                self.store_slot32(tmp, i.slot);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::XorConst32(i) => {
                let tmp = self.scratch();
                self.load_slot32(i.slot, tmp);
                self.asm.xor_imm32_r32(i.const32, tmp);
                self.store_slot32(tmp, i.slot);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::AndConst32(i) => {
                let tmp = self.scratch();
                self.load_slot32(i.slot, tmp);
                self.asm.and_imm32_r32(i.const32, tmp);
                self.store_slot32(tmp, i.slot);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::OrConst32(i) => {
                let tmp = self.scratch();
                self.load_slot32(i.slot, tmp);
                self.asm.or_imm32_r32(i.const32, tmp);
                self.store_slot32(tmp, i.slot);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::SlotToBoolInv(i) => {
                let tmp = self.scratch();
                self.load_slot32(i.slot, tmp);
                self.asm.test_r32_r32(tmp, tmp);
                self.asm.setcc_r32(Cond::Eq, tmp);
                self.store_slot32(tmp, i.slot);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::Not(i) => {
                let tmp = self.scratch();
                self.load_slot32(i.slot, tmp);
                self.asm.not_r32(tmp);
                self.store_slot32(tmp, i.slot);
                self.release_scratch(tmp);
                Ok(false)
            }
            I::Shll(i) => {
                self.emit_shift_imm(i.slot, i.shift_amt, Assembler::shl_imm8_r32);
                Ok(false)
            }
            I::Shlr(i) => {
                self.emit_shift_imm(i.slot, i.shift_amt, Assembler::shr_imm8_r32);
                Ok(false)
            }
            I::Shar(i) => {
                self.emit_shift_imm(i.slot, i.shift_amt, Assembler::sar_imm8_r32);
                Ok(false)
            }
            I::Shad(i) => {
                self.emit_shad(i.slot_val, i.slot_shift_amt)?;
                Ok(false)
            }
            I::SetGtUnsigned(i) => {
                self.emit_cmp(i.slot_lhs, i.slot_rhs, i.slot_dst, Cond::Above);
                Ok(false)
            }
            I::SetGtSigned(i) => {
                self.emit_cmp(i.slot_lhs, i.slot_rhs, i.slot_dst, Cond::Greater);
                Ok(false)
            }
            I::SetGtSignedConst(i) => {
                self.emit_cmp_const(i.slot_lhs, i.imm_rhs, i.slot_dst, Cond::Greater);
                Ok(false)
            }
            I::SetEq(i) => {
                self.emit_cmp(i.slot_lhs, i.slot_rhs, i.slot_dst, Cond::Eq);
                Ok(false)
            }
            I::SetGeUnsigned(i) => {
                self.emit_cmp(i.slot_lhs, i.slot_rhs, i.slot_dst, Cond::AboveEq);
                Ok(false)
            }
            I::SetGeSigned(i) => {
                self.emit_cmp(i.slot_lhs, i.slot_rhs, i.slot_dst, Cond::GreaterEq);
                Ok(false)
            }
            I::SetGeSignedConst(i) => {
                self.emit_cmp_const(i.slot_lhs, i.imm_rhs, i.slot_dst, Cond::GreaterEq);
                Ok(false)
            }
            I::SetGtFloat(i) => {
                let base = self.slots_base;
                let xmm_a = XmmReg(0);
                let xmm_b = XmmReg(1);
                self.asm.movss_m32_xmm(base, Self::slot_disp(i.slot_lhs), xmm_a);
                self.asm.movss_m32_xmm(base, Self::slot_disp(i.slot_rhs), xmm_b);
                self.asm.comiss_xmm_xmm(xmm_b, xmm_a);
                let dst = self.scratch();
                self.asm.setcc_r32(Cond::Above, dst);
                self.store_slot32(dst, i.slot_dst);
                self.release_scratch(dst);
                Ok(false)
            }
            I::MulU32(i) => {
                let lhs = self.scratch();
                let rhs = self.scratch();
                self.load_slot32(i.slot_lhs, lhs);
                self.load_slot32(i.slot_rhs, rhs);
                self.asm.imul_r32_r32(rhs, lhs);
                self.store_slot32(lhs, i.slot_dst);
                self.release_scratch(lhs);
                self.release_scratch(rhs);
                Ok(false)
            }
            I::ClearFloat(i) => {
                let xmm = XmmReg(0);
                self.asm.xorps_clear(xmm);
                let base = self.slots_base;
                self.asm.movss_xmm_m32(xmm, base, Self::slot_disp(i.slot));
                Ok(false)
            }
            I::DiscardSlot(_) => Ok(false),
        }
    }

    fn emit_alu32(&mut self, src: Slot, dst: Slot, op: fn(&mut Assembler, GpReg, GpReg)) {
        let a = self.scratch();
        let b = self.scratch();
        self.load_slot32(src, a);
        self.load_slot32(dst, b);
        op(&mut self.asm, a, b);
        self.store_slot32(b, dst);
        self.release_scratch(a);
        self.release_scratch(b);
    }

    fn emit_alu_float(&mut self, src: Slot, dst: Slot, op: fn(&mut Assembler, XmmReg, XmmReg)) {
        let base = self.slots_base;
        let xmm_src = XmmReg(0);
        let xmm_dst = XmmReg(1);
        self.asm.movss_m32_xmm(base, Self::slot_disp(src), xmm_src);
        self.asm.movss_m32_xmm(base, Self::slot_disp(dst), xmm_dst);
        op(&mut self.asm, xmm_src, xmm_dst);
        self.asm.movss_xmm_m32(xmm_dst, base, Self::slot_disp(dst));
    }

    fn emit_shift_imm(&mut self, slot: Slot, amt: u32, op: fn(&mut Assembler, u8, GpReg)) {
        let tmp = self.scratch();
        self.load_slot32(slot, tmp);
        op(&mut self.asm, (amt & 0x1f) as u8, tmp);
        self.store_slot32(tmp, slot);
        self.release_scratch(tmp);
    }

    /// `SHAD`: shift left when the (signed) shift amount is non-negative,
    /// otherwise shift right arithmetically by its magnitude. Mirrors
    /// `jit_il.c`'s `SHAD` case and [`crate::interp::exec_one`]'s `Shad` arm.
    fn emit_shad(&mut self, slot_val: Slot, slot_shift_amt: Slot) -> Result<(), JitError> {
        // The variable-count shift opcodes take their count from CL
        // implicitly, so the shift amount must live in RCX specifically
        // rather than in whatever the pool hands out.
        let val = self.scratch();
        let amt = self.scratch_fixed(GpReg::Rcx);
        self.load_slot32(slot_val, val);
        self.load_slot32(slot_shift_amt, amt);

        let negative = self.asm.new_label();
        let done = self.asm.new_label();
        self.asm.test_r32_r32(amt, amt);
        self.asm.jcc_rel8(Cond::Sign, negative)?;
        self.asm.shl_cl_r32(val);
        self.asm.jmp_rel8(done)?;
        self.asm.bind_label(negative)?;
        self.asm.neg_r32(amt);
        self.asm.sar_cl_r32(val);
        self.asm.bind_label(done)?;

        self.store_slot32(val, slot_val);
        self.release_scratch(val);
        self.release_scratch(amt);
        Ok(())
    }

    /// Acquire a specific physical register from the scratch pool (for the
    /// variable-shift opcodes, which hardcode `CL` as the count operand).
    fn scratch_fixed(&mut self, reg: GpReg) -> GpReg {
        for idx in 0..self.gp.len() {
            if self.gp.reg(idx) == reg {
                self.gp.acquire(idx, Slot::from_u32(0));
                return reg;
            }
        }
        panic!("register {:?} is not part of the scratch pool", reg);
    }

    fn emit_cmp(&mut self, lhs: Slot, rhs: Slot, dst: Slot, cond: Cond) {
        let a = self.scratch();
        let b = self.scratch();
        self.load_slot32(lhs, a);
        self.load_slot32(rhs, b);
        self.asm.cmp_r32_r32(a, b);
        self.asm.setcc_r32(cond, a);
        self.store_slot32(a, dst);
        self.release_scratch(a);
        self.release_scratch(b);
    }

    fn emit_cmp_const(&mut self, lhs: Slot, imm: i32, dst: Slot, cond: Cond) {
        let a = self.scratch();
        self.load_slot32(lhs, a);
        self.asm.cmp_imm32_r32(imm as u32, a);
        self.asm.setcc_r32(cond, a);
        self.store_slot32(a, dst);
        self.release_scratch(a);
    }

    fn emit_cset(&mut self, flag_slot: Slot, t_flag: bool, src_val: u32, dst_slot: Slot) {
        let flag = self.scratch();
        self.load_slot32(flag_slot, flag);
        self.asm.and_imm32_r32(1, flag);
        self.asm.cmp_imm32_r32(t_flag as u32, flag);
        let skip = self.asm.new_label();
        // SAFETY (of intent, not memory): jcc target is always bound before
        // `finish()`, right below.
        self.asm.jcc_rel8(Cond::NotEq, skip).expect("cset label");
        let val = self.scratch();
        self.asm.mov_imm32_r32(src_val, val);
        self.store_slot32(val, dst_slot);
        self.release_scratch(val);
        self.asm.bind_label(skip).expect("cset label");
        self.release_scratch(flag);
    }

    fn emit_jump(&mut self, addr_slot: Slot, hash_slot: Slot) {
        let base = self.slots_base;
        let rax = GpReg::Rax;
        let rcx = GpReg::Rcx;
        self.asm.mov_m32_r32(base, Self::slot_disp(addr_slot), rax);
        self.asm.mov_m32_r32(base, Self::slot_disp(hash_slot), rcx);
        self.asm.shl_imm8_r64(32, rcx);
        self.asm.or_r64_r64(rcx, rax);
    }

    fn emit_sign_extend(&mut self, slot: Slot, width: Width) {
        let tmp = self.scratch();
        self.load_slot32(slot, tmp);
        match width {
            Width::W8 => self.asm.movsx_r8_r32(tmp, tmp),
            Width::W16 => self.asm.movsx_r16_r32(tmp, tmp),
            _ => unreachable!("sign extend is only defined for 8/16-bit widths"),
        }
        self.store_slot32(tmp, slot);
        self.release_scratch(tmp);
    }

    /// Reserve the ABI's shadow space (0 for System V, 32 for Microsoft
    /// x64) below `RSP` before a `call`, per spec.md §4.6.5. Both ABIs'
    /// shadow-space sizes are already multiples of 16, so this never
    /// disturbs the 16-byte alignment a dirty block's prologue already
    /// established at every call site.
    fn open_call_frame(&mut self) {
        let bytes = self.abi.shadow_space();
        if bytes != 0 {
            self.asm.sub_imm32_r64(bytes as u32, GpReg::Rsp);
        }
    }

    /// Undo [`Self::open_call_frame`] once the call returns.
    fn close_call_frame(&mut self) {
        let bytes = self.abi.shadow_space();
        if bytes != 0 {
            self.asm.add_imm32_r64(bytes as u32, GpReg::Rsp);
        }
    }

    fn emit_fallback(&mut self, func: u64, guest_inst: GuestInst) {
        let arg0 = self.abi.int_args()[0];
        let arg1 = self.abi.int_args()[1];
        let cpu = self.cpu_reg;
        self.asm.mov_r64_r64(cpu, arg0);
        self.asm.mov_imm32_r32(guest_inst as u32, arg1);
        let target = self.scratch();
        self.asm.mov_imm64_r64(func, target);
        self.open_call_frame();
        self.asm.call_r64(target);
        self.close_call_frame();
        self.release_scratch(target);
    }

    fn emit_call(&mut self, func: u64, value_reg: GpReg) {
        let arg0 = self.abi.int_args()[0];
        let arg1 = self.abi.int_args()[1];
        let cpu = self.cpu_reg;
        self.asm.mov_r64_r64(cpu, arg0);
        if value_reg != arg1 {
            self.asm.mov_r32_r32(value_reg, arg1);
        }
        let target = self.scratch();
        self.asm.mov_imm64_r64(func, target);
        self.open_call_frame();
        self.asm.call_r64(target);
        self.close_call_frame();
        self.release_scratch(target);
    }

    fn emit_read_const_addr(&mut self, map: MapPtr, addr: u32, slot: Slot, width: Width) -> Result<(), JitError> {
        let map_ref = unsafe { map.as_ref() };
        if map_ref.is_ram() {
            if let Some(ram_base) = map_ref.ram_base() {
                let host_addr = unsafe { ram_base.add(((addr & map_ref.mask()) as usize)) } as u64;
                let ptr = self.scratch();
                self.asm.mov_imm64_r64(host_addr, ptr);
                let dst = self.scratch();
                match width {
                    Width::W16 => self.asm.movzx_m16_r32(ptr, 0, dst),
                    Width::W32 => self.asm.mov_m32_r32(ptr, 0, dst),
                    _ => unreachable!("ReadConstAddr is only 16/32-bit"),
                }
                self.store_slot32(dst, slot);
                self.release_scratch(ptr);
                self.release_scratch(dst);
                return Ok(());
            }
        }
        let map_ptr = self.bake_map(map);
        let shim = match width {
            Width::W16 => shim_read16 as usize as u64,
            Width::W32 => shim_read32 as usize as u64,
            _ => unreachable!("ReadConstAddr is only 16/32-bit"),
        };
        let arg0 = self.abi.int_args()[0];
        let arg1 = self.abi.int_args()[1];
        self.asm.mov_imm64_r64(map_ptr as u64, arg0);
        self.asm.mov_imm32_r32(addr, arg1);
        let target = self.scratch();
        self.asm.mov_imm64_r64(shim, target);
        self.open_call_frame();
        self.asm.call_r64(target);
        self.close_call_frame();
        self.release_scratch(target);
        let ret = self.abi.ret_reg();
        self.store_slot32(ret, slot);
        Ok(())
    }

    fn emit_read_slot(&mut self, map: MapPtr, addr_slot: Slot, dst_slot: Slot, width: Width) -> Result<(), JitError> {
        let map_ref = unsafe { map.as_ref() };
        if map_ref.is_ram() {
            if let Some(ram_base) = map_ref.ram_base() {
                let mask = map_ref.mask();
                let addr = self.scratch();
                self.load_slot32(addr_slot, addr);
                self.asm.and_imm32_r32(mask, addr);
                let base = self.scratch();
                self.asm.mov_imm64_r64(ram_base as u64, base);
                self.asm.add_r64_r64(addr, base);
                match width {
                    Width::W8 => self.asm.movzx_m8_r32(base, 0, addr),
                    Width::W16 => self.asm.movzx_m16_r32(base, 0, addr),
                    Width::W32 => self.asm.mov_m32_r32(base, 0, addr),
                    Width::F32 => {
                        let xmm = XmmReg(0);
                        self.asm.movss_m32_xmm(base, 0, xmm);
                        let host = self.slots_base;
                        self.asm.movss_xmm_m32(xmm, host, Self::slot_disp(dst_slot));
                        self.release_scratch(addr);
                        self.release_scratch(base);
                        return Ok(());
                    }
                }
                self.store_slot32(addr, dst_slot);
                self.release_scratch(addr);
                self.release_scratch(base);
                return Ok(());
            }
        }
        let map_ptr = self.bake_map(map);
        let shim = match width {
            Width::W8 => shim_read8 as usize as u64,
            Width::W16 => shim_read16 as usize as u64,
            Width::W32 => shim_read32 as usize as u64,
            Width::F32 => shim_read_float as usize as u64,
        };
        let arg0 = self.abi.int_args()[0];
        let arg1 = self.abi.int_args()[1];
        self.asm.mov_imm64_r64(map_ptr as u64, arg0);
        self.load_slot32(addr_slot, arg1);
        let target = self.scratch();
        self.asm.mov_imm64_r64(shim, target);
        self.open_call_frame();
        self.asm.call_r64(target);
        self.close_call_frame();
        self.release_scratch(target);
        if width == Width::F32 {
            let base = self.slots_base;
            let xmm_ret = XmmReg(0);
            self.asm.movss_xmm_m32(xmm_ret, base, Self::slot_disp(dst_slot));
        } else {
            let ret = self.abi.ret_reg();
            self.store_slot32(ret, dst_slot);
        }
        Ok(())
    }

    fn emit_write_slot(&mut self, map: MapPtr, src_slot: Slot, addr_slot: Slot, width: Width) -> Result<(), JitError> {
        let map_ref = unsafe { map.as_ref() };
        if map_ref.is_ram() {
            if let Some(ram_base) = map_ref.ram_base() {
                let mask = map_ref.mask();
                let addr = self.scratch();
                self.load_slot32(addr_slot, addr);
                self.asm.and_imm32_r32(mask, addr);
                let base = self.scratch();
                self.asm.mov_imm64_r64(ram_base as u64, base);
                self.asm.add_r64_r64(addr, base);
                if width == Width::F32 {
                    let host = self.slots_base;
                    let xmm = XmmReg(0);
                    self.asm.movss_m32_xmm(host, Self::slot_disp(src_slot), xmm);
                    self.asm.movss_xmm_m32(xmm, base, 0);
                } else {
                    let val = addr;
                    self.load_slot32(src_slot, val);
                    match width {
                        Width::W8 => self.asm.mov_r8_m8(val, base, 0),
                        Width::W16 => self.asm.mov_r16_m16(val, base, 0),
                        Width::W32 => self.asm.mov_r32_m32(val, base, 0),
                        Width::F32 => unreachable!(),
                    }
                }
                self.release_scratch(addr);
                self.release_scratch(base);
                return Ok(());
            }
        }
        let map_ptr = self.bake_map(map);
        let shim = match width {
            Width::W8 => shim_write8 as usize as u64,
            Width::W16 => shim_write16 as usize as u64,
            Width::W32 => shim_write32 as usize as u64,
            Width::F32 => shim_write_float as usize as u64,
        };
        let arg0 = self.abi.int_args()[0];
        let arg1 = self.abi.int_args()[1];
        let arg2 = self.abi.int_args()[2];
        self.asm.mov_imm64_r64(map_ptr as u64, arg0);
        self.load_slot32(addr_slot, arg1);
        if width == Width::F32 {
            let base = self.slots_base;
            let xmm_arg = self.abi.xmm_args()[0];
            self.asm.movss_m32_xmm(base, Self::slot_disp(src_slot), xmm_arg);
        } else {
            self.load_slot32(src_slot, arg2);
        }
        let target = self.scratch();
        self.asm.mov_imm64_r64(shim, target);
        self.open_call_frame();
        self.asm.call_r64(target);
        self.close_call_frame();
        self.release_scratch(target);
        Ok(())
    }

    /// Hand the finished byte sequence to the caller, along with the
    /// constant pool that must outlive the compiled block.
    pub fn finish(self) -> Result<(Vec<u8>, Vec<Box<MapPtr>>), JitError> {
        let code = self.asm.finish()?;
        Ok((code, self.const_pool))
    }
}

/// Build the scratch register pool: every encodable general-purpose
/// register except `RSP`/`RBP` (frame pointers) and the two fixed roles
/// (`slots_base`, `cpu_reg`), and deliberately excluding `RSI`/`RDI` too —
/// keeping 8-bit operand encoding (`SignExtend8`/byte memory accesses)
/// unambiguous never requires threading a REX prefix through just to avoid
/// hitting `AH`/`BH`/`CH`/`DH`.
fn scratch_pool(slots_base: GpReg, cpu_reg: GpReg) -> RegisterSet<GpReg> {
    use crate::native::regset::{flags, RegDescriptor};
    let all = [
        GpReg::Rax,
        GpReg::Rcx,
        GpReg::Rdx,
        GpReg::Rbx,
        GpReg::R8,
        GpReg::R9,
        GpReg::R10,
        GpReg::R11,
        GpReg::R12,
        GpReg::R13,
        GpReg::R14,
        GpReg::R15,
    ];
    let descriptors = all
        .iter()
        .map(|&reg| RegDescriptor {
            reg,
            locked: reg == slots_base || reg == cpu_reg,
            prio: 0,
            flags: if reg.needs_rex_bit() { flags::REX } else { 0 },
        })
        .collect();
    RegisterSet::new(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::abi::{MicrosoftX64, SystemV};

    /// System V never reserves shadow space, so `open_call_frame`/
    /// `close_call_frame` emit nothing around a call site.
    #[test]
    fn system_v_opens_no_shadow_space() {
        let mut lowering = Lowering::new(&SystemV, GpReg::Rbx, GpReg::R12);
        lowering.open_call_frame();
        lowering.close_call_frame();
        let (code, _) = lowering.finish().unwrap();
        assert!(code.is_empty());
    }

    /// Microsoft x64 reserves 32 bytes below `RSP` before every call and
    /// gives it back after, per spec.md §4.6.5.
    #[test]
    fn microsoft_x64_opens_and_closes_a_32_byte_shadow_region() {
        let mut lowering = Lowering::new(&MicrosoftX64, GpReg::Rbx, GpReg::R12);
        lowering.open_call_frame();
        lowering.close_call_frame();
        let (code, _) = lowering.finish().unwrap();

        // sub $32, %rsp ; add $32, %rsp, both REX.W + opcode 0x81 with a
        // /5 (sub) or /0 (add) ModRM targeting RSP, 32-bit immediate each.
        assert_eq!(code.len(), 14);
        assert_eq!(&code[0..3], &[0x48, 0x81, 0xec], "sub imm32, %rsp");
        assert_eq!(&code[3..7], &32u32.to_le_bytes());
        assert_eq!(&code[7..10], &[0x48, 0x81, 0xc4], "add imm32, %rsp");
        assert_eq!(&code[10..14], &32u32.to_le_bytes());
    }

    /// Every shim/fallback call site opens and closes the shadow region
    /// around its `call`, not just the two explicit unit tests above:
    /// compiling a block with a `FALLBACK` under the Microsoft ABI must
    /// show the `sub rsp, 32` / `add rsp, 32` pair bracketing the `call`
    /// opcode (`0xff /2`) somewhere in the emitted bytes.
    #[test]
    fn fallback_lowering_brackets_its_call_with_shadow_space_under_microsoft_abi() {
        use crate::il::IlBuilder;

        unsafe extern "C" fn noop_fallback(_cpu: *mut std::ffi::c_void, _inst: u16) {}

        let mut b = IlBuilder::new();
        let pc = b.alloc_slot(crate::il::SlotType::General).unwrap();
        let hash = b.alloc_slot(crate::il::SlotType::General).unwrap();
        b.fallback(noop_fallback, 0);
        b.set_slot(pc, 0x1000).unwrap();
        b.set_slot(hash, 0).unwrap();
        b.jump(pc, hash).unwrap();
        let il = b.finish();

        let mut lowering = Lowering::new(&MicrosoftX64, GpReg::Rbx, GpReg::R12);
        lowering.emit_prologue(true);
        for inst in il.instructions() {
            lowering.lower(inst).unwrap();
        }
        let (code, _) = lowering.finish().unwrap();

        let sub_rsp_32 = [0x48u8, 0x81, 0xec, 32, 0, 0, 0];
        let add_rsp_32 = [0x48u8, 0x81, 0xc4, 32, 0, 0, 0];
        let sub_at = code.windows(7).position(|w| w == sub_rsp_32);
        let add_at = code.windows(7).position(|w| w == add_rsp_32);
        assert!(sub_at.is_some(), "no shadow-space reservation before the fallback call");
        assert!(add_at.is_some(), "no shadow-space release after the fallback call");
        assert!(sub_at.unwrap() < add_at.unwrap());
    }
}
