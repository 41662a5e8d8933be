//! The streaming x86-64 assembler: raw byte emission, REX-prefix folding,
//! ModR/M-SIB construction, and label patching for 8-bit relative jumps.
//!
//! Ported from the opcode-emission half of `emit_x86_64.c`. The source
//! writes directly into the exec-memory region and patches displacement
//! bytes by walking back through already-written memory; this keeps the
//! same two-pass idea (emit with a placeholder displacement, patch once the
//! target is known) but builds into a plain `Vec<u8>` first and copies into
//! exec memory only once the whole block is assembled (see
//! [`crate::native::block`]), since growing a `Vec` is far simpler to get
//! right than growing a live exec-memory allocation mid-assembly.

use crate::error::JitError;
use crate::native::abi::{GpReg, XmmReg};

/// A forward or backward jump target within one [`Assembler`]'s buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

pub struct Assembler {
    buf: Vec<u8>,
    labels: Vec<Option<usize>>,
    /// `(byte offset of the rel8 placeholder, target label)`, for jumps
    /// emitted before their target was bound.
    pending: Vec<(usize, Label)>,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            buf: Vec::new(),
            labels: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn push_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub fn push_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_i32(&mut self, v: i32) {
        self.push_u32(v as u32);
    }

    /// A fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current write position, resolving any jumps
    /// emitted before the target was known (`forward-register` case).
    /// Mirrors the source's two-pass patching, split across `new_label`
    /// instead of a single backpatch list scanned at the very end.
    pub fn bind_label(&mut self, label: Label) -> Result<(), JitError> {
        let here = self.buf.len();
        self.labels[label.0] = Some(here);

        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].1 == label {
                let (site, _) = self.pending.remove(i);
                self.patch_rel8(site, here)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Emit an 8-bit relative jump/branch opcode (already written by the
    /// caller) followed by a placeholder displacement byte targeting
    /// `label`. If `label` is already bound (a backward jump), the
    /// displacement is computed and written immediately
    /// (`backward-backpatch`); otherwise it's queued for
    /// [`Self::bind_label`].
    pub fn rel8(&mut self, label: Label) -> Result<(), JitError> {
        let site = self.buf.len();
        self.buf.push(0);
        match self.labels[label.0] {
            Some(target) => self.patch_rel8(site, target),
            None => {
                self.pending.push((site, label));
                Ok(())
            }
        }
    }

    fn patch_rel8(&mut self, site: usize, target: usize) -> Result<(), JitError> {
        let disp = target as isize - (site as isize + 1);
        if disp < i8::MIN as isize || disp > i8::MAX as isize {
            return Err(JitError::Overflow {
                what: "8-bit relative jump",
                detail: format!("displacement {} does not fit in i8", disp),
            });
        }
        self.buf[site] = disp as i8 as u8;
        Ok(())
    }

    /// Finish assembly, failing if any label was emitted against but never
    /// bound.
    pub fn finish(self) -> Result<Vec<u8>, JitError> {
        if let Some((_, label)) = self.pending.first() {
            return Err(JitError::integrity(format!(
                "label {:?} referenced but never bound",
                label
            )));
        }
        Ok(self.buf)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

/// REX prefix byte: `0100WRXB`. `w` selects the 64-bit operand size; `r`
/// extends ModR/M.reg; `x` extends SIB.index; `b` extends ModR/M.rm or
/// SIB.base or the opcode's embedded register.
pub fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | (w as u8) << 3 | (r as u8) << 2 | (x as u8) << 1 | (b as u8)
}

/// Emit a REX prefix only if one of its bits would be set, matching the
/// source's habit of never emitting a bare `0x40` when plain 32-bit
/// operands on the low eight registers need no prefix at all.
pub fn rex_if_needed(asm: &mut Assembler, w: bool, r: bool, x: bool, b: bool) {
    if w || r || x || b {
        asm.push_u8(rex(w, r, x, b));
    }
}

/// ModR/M byte for register-direct addressing (`mod == 0b11`).
pub fn modrm_reg(reg: u8, rm: u8) -> u8 {
    0xc0 | (reg & 7) << 3 | (rm & 7)
}

/// ModR/M byte for `[rm]` indirect addressing with no displacement
/// (`mod == 0b00`).
pub fn modrm_indirect(reg: u8, rm: u8) -> u8 {
    (reg & 7) << 3 | (rm & 7)
}

/// ModR/M byte selecting a SIB byte (`rm == 0b100`) with an 8-bit
/// displacement (`mod == 0b01`).
pub fn modrm_sib_disp8(reg: u8) -> u8 {
    0x40 | (reg & 7) << 3 | 0b100
}

/// SIB byte: scale/index/base.
pub fn sib(scale: u8, index: u8, base: u8) -> u8 {
    debug_assert!(scale <= 3);
    (scale & 3) << 6 | (index & 7) << 3 | (base & 7)
}

pub trait Operand: Copy {
    fn low_bits(self) -> u8;
    fn needs_rex_bit(self) -> bool;
}

impl Operand for GpReg {
    fn low_bits(self) -> u8 {
        GpReg::low_bits(self)
    }
    fn needs_rex_bit(self) -> bool {
        GpReg::needs_rex_bit(self)
    }
}

impl Operand for XmmReg {
    fn low_bits(self) -> u8 {
        XmmReg::low_bits(self)
    }
    fn needs_rex_bit(self) -> bool {
        XmmReg::needs_rex_bit(self)
    }
}

/// Condition codes used by the block-ending conditional moves and
/// comparisons, mirroring the `x86asm_set<cc>`/`x86asm_j<cc>` family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Eq,
    NotEq,
    Above,
    AboveEq,
    Below,
    BelowEq,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Sign,
    NotSign,
}

impl Cond {
    fn cc(self) -> u8 {
        match self {
            Cond::Eq => 0x4,
            Cond::NotEq => 0x5,
            Cond::Below => 0x2,
            Cond::BelowEq => 0x6,
            Cond::AboveEq => 0x3,
            Cond::Above => 0x7,
            Cond::Sign => 0x8,
            Cond::NotSign => 0x9,
            Cond::Less => 0xc,
            Cond::GreaterEq => 0xd,
            Cond::LessEq => 0xe,
            Cond::Greater => 0xf,
        }
    }
}

/// Instruction emission: one method per mnemonic the lowering pass needs,
/// named after the source's `x86asm_*` functions with the Rust-ier
/// `mnemonic_operands` ordering (destination last, matching AT&T order as
/// the source does).
impl Assembler {
    /// `mov <disp>(%base), %dst` (32-bit).
    pub fn mov_m32_r32(&mut self, base: GpReg, disp: i32, dst: GpReg) {
        rex_if_needed(self, false, dst.needs_rex_bit(), false, base.needs_rex_bit());
        self.push_u8(0x8b);
        self.modrm_disp(dst.low_bits(), base, disp);
    }

    /// `mov %src, <disp>(%base)` (32-bit).
    pub fn mov_r32_m32(&mut self, src: GpReg, base: GpReg, disp: i32) {
        rex_if_needed(self, false, src.needs_rex_bit(), false, base.needs_rex_bit());
        self.push_u8(0x89);
        self.modrm_disp(src.low_bits(), base, disp);
    }

    /// `mov <disp>(%base), %dst` (64-bit).
    pub fn mov_m64_r64(&mut self, base: GpReg, disp: i32, dst: GpReg) {
        self.push_u8(rex(true, dst.needs_rex_bit(), false, base.needs_rex_bit()));
        self.push_u8(0x8b);
        self.modrm_disp(dst.low_bits(), base, disp);
    }

    /// `mov %src, <disp>(%base)` (64-bit).
    pub fn mov_r64_m64(&mut self, src: GpReg, base: GpReg, disp: i32) {
        self.push_u8(rex(true, src.needs_rex_bit(), false, base.needs_rex_bit()));
        self.push_u8(0x89);
        self.modrm_disp(src.low_bits(), base, disp);
    }

    /// Disp-addressed ModR/M, choosing the no-displacement, 8-bit, or 32-bit
    /// disp form and inserting a SIB byte whenever `base` is `RSP`/`R12`
    /// (required: those codes select SIB addressing instead of direct
    /// `[base]`).
    fn modrm_disp(&mut self, reg: u8, base: GpReg, disp: i32) {
        let needs_sib = base.low_bits() == GpReg::Rsp.low_bits();
        let force_disp8 = base.low_bits() == GpReg::Rbp.low_bits() && disp == 0;
        if disp == 0 && !force_disp8 {
            self.push_u8(modrm_indirect(reg, if needs_sib { 0b100 } else { base.low_bits() }));
            if needs_sib {
                self.push_u8(sib(0, 0b100, base.low_bits()));
            }
        } else if (i8::MIN as i32..=i8::MAX as i32).contains(&disp) {
            self.push_u8(0x40 | (reg & 7) << 3 | if needs_sib { 0b100 } else { base.low_bits() & 7 });
            if needs_sib {
                self.push_u8(sib(0, 0b100, base.low_bits()));
            }
            self.push_u8(disp as i8 as u8);
        } else {
            self.push_u8(0x80 | (reg & 7) << 3 | if needs_sib { 0b100 } else { base.low_bits() & 7 });
            if needs_sib {
                self.push_u8(sib(0, 0b100, base.low_bits()));
            }
            self.push_i32(disp);
        }
    }

    pub fn mov_imm32_r32(&mut self, imm: u32, dst: GpReg) {
        rex_if_needed(self, false, false, false, dst.needs_rex_bit());
        self.push_u8(0xb8 | dst.low_bits());
        self.push_u32(imm);
    }

    pub fn mov_imm64_r64(&mut self, imm: u64, dst: GpReg) {
        self.push_u8(rex(true, false, false, dst.needs_rex_bit()));
        self.push_u8(0xb8 | dst.low_bits());
        self.push_u64(imm);
    }

    pub fn mov_r32_r32(&mut self, src: GpReg, dst: GpReg) {
        rex_if_needed(self, false, src.needs_rex_bit(), false, dst.needs_rex_bit());
        self.push_u8(0x89);
        self.push_u8(modrm_reg(src.low_bits(), dst.low_bits()));
    }

    pub fn mov_r64_r64(&mut self, src: GpReg, dst: GpReg) {
        self.push_u8(rex(true, src.needs_rex_bit(), false, dst.needs_rex_bit()));
        self.push_u8(0x89);
        self.push_u8(modrm_reg(src.low_bits(), dst.low_bits()));
    }

    fn alu_rr(&mut self, opcode: u8, src: GpReg, dst: GpReg) {
        rex_if_needed(self, false, src.needs_rex_bit(), false, dst.needs_rex_bit());
        self.push_u8(opcode);
        self.push_u8(modrm_reg(src.low_bits(), dst.low_bits()));
    }

    pub fn add_r32_r32(&mut self, src: GpReg, dst: GpReg) {
        self.alu_rr(0x01, src, dst);
    }
    pub fn sub_r32_r32(&mut self, src: GpReg, dst: GpReg) {
        self.alu_rr(0x29, src, dst);
    }
    pub fn xor_r32_r32(&mut self, src: GpReg, dst: GpReg) {
        self.alu_rr(0x31, src, dst);
    }
    pub fn and_r32_r32(&mut self, src: GpReg, dst: GpReg) {
        self.alu_rr(0x21, src, dst);
    }
    pub fn or_r32_r32(&mut self, src: GpReg, dst: GpReg) {
        self.alu_rr(0x09, src, dst);
    }
    pub fn cmp_r32_r32(&mut self, lhs: GpReg, rhs: GpReg) {
        self.alu_rr(0x39, rhs, lhs);
    }
    pub fn test_r32_r32(&mut self, a: GpReg, b: GpReg) {
        self.alu_rr(0x85, a, b);
    }

    /// `<op> $imm32, %dst`, using the `/digit` ALU-immediate group (opcode
    /// `0x81`) with `ext` selecting add(0)/or(1)/and(4)/sub(5)/xor(6)/cmp(7).
    fn alu_imm32(&mut self, ext: u8, imm: u32, dst: GpReg) {
        rex_if_needed(self, false, false, false, dst.needs_rex_bit());
        self.push_u8(0x81);
        self.push_u8(modrm_reg(ext, dst.low_bits()));
        self.push_u32(imm);
    }
    pub fn add_imm32_r32(&mut self, imm: u32, dst: GpReg) {
        self.alu_imm32(0, imm, dst);
    }
    pub fn or_imm32_r32(&mut self, imm: u32, dst: GpReg) {
        self.alu_imm32(1, imm, dst);
    }
    pub fn and_imm32_r32(&mut self, imm: u32, dst: GpReg) {
        self.alu_imm32(4, imm, dst);
    }
    pub fn sub_imm32_r32(&mut self, imm: u32, dst: GpReg) {
        self.alu_imm32(5, imm, dst);
    }
    pub fn xor_imm32_r32(&mut self, imm: u32, dst: GpReg) {
        self.alu_imm32(6, imm, dst);
    }
    pub fn cmp_imm32_r32(&mut self, imm: u32, dst: GpReg) {
        self.alu_imm32(7, imm, dst);
    }

    pub fn not_r32(&mut self, reg: GpReg) {
        rex_if_needed(self, false, false, false, reg.needs_rex_bit());
        self.push_u8(0xf7);
        self.push_u8(modrm_reg(2, reg.low_bits()));
    }

    pub fn neg_r32(&mut self, reg: GpReg) {
        rex_if_needed(self, false, false, false, reg.needs_rex_bit());
        self.push_u8(0xf7);
        self.push_u8(modrm_reg(3, reg.low_bits()));
    }

    /// `imul %src, %dst` (two-operand form, `dst *= src`).
    pub fn imul_r32_r32(&mut self, src: GpReg, dst: GpReg) {
        rex_if_needed(self, false, dst.needs_rex_bit(), false, src.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(0xaf);
        self.push_u8(modrm_reg(dst.low_bits(), src.low_bits()));
    }

    fn shift_group(&mut self, ext: u8, reg: GpReg, imm8: u8) {
        rex_if_needed(self, false, false, false, reg.needs_rex_bit());
        self.push_u8(0xc1);
        self.push_u8(modrm_reg(ext, reg.low_bits()));
        self.push_u8(imm8);
    }
    pub fn shl_imm8_r32(&mut self, imm8: u8, reg: GpReg) {
        self.shift_group(4, reg, imm8);
    }
    pub fn shr_imm8_r32(&mut self, imm8: u8, reg: GpReg) {
        self.shift_group(5, reg, imm8);
    }
    pub fn sar_imm8_r32(&mut self, imm8: u8, reg: GpReg) {
        self.shift_group(7, reg, imm8);
    }

    /// `<op> %cl, %reg`, variable shift count taken from `CL`. Used for
    /// `SHAD`'s runtime-chosen direction, where the shift count isn't known
    /// until the block executes.
    fn shift_cl(&mut self, ext: u8, reg: GpReg) {
        rex_if_needed(self, false, false, false, reg.needs_rex_bit());
        self.push_u8(0xd3);
        self.push_u8(modrm_reg(ext, reg.low_bits()));
    }
    pub fn shl_cl_r32(&mut self, reg: GpReg) {
        self.shift_cl(4, reg);
    }
    pub fn sar_cl_r32(&mut self, reg: GpReg) {
        self.shift_cl(7, reg);
    }

    /// `set<cc> %dst8` then zero-extend into the full 32-bit register,
    /// matching `x86asm_setnzl_reg32` generalized to every condition this
    /// backend needs.
    pub fn setcc_r32(&mut self, cond: Cond, dst: GpReg) {
        // xor dst,dst first so the high bytes are known-zero without
        // depending on a REX-gated 8-bit register encoding for SPL/BPL/etc.
        self.xor_r32_r32(dst, dst);
        rex_if_needed(self, false, false, false, dst.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(0x90 | cond.cc());
        self.push_u8(modrm_reg(0, dst.low_bits()));
    }

    pub fn jcc_rel8(&mut self, cond: Cond, label: Label) -> Result<(), JitError> {
        self.push_u8(0x70 | cond.cc());
        self.rel8(label)
    }

    pub fn jmp_rel8(&mut self, label: Label) -> Result<(), JitError> {
        self.push_u8(0xeb);
        self.rel8(label)
    }

    pub fn push_r64(&mut self, reg: GpReg) {
        rex_if_needed(self, false, false, false, reg.needs_rex_bit());
        self.push_u8(0x50 | reg.low_bits());
    }
    pub fn pop_r64(&mut self, reg: GpReg) {
        rex_if_needed(self, false, false, false, reg.needs_rex_bit());
        self.push_u8(0x58 | reg.low_bits());
    }

    /// `call %reg` (indirect, through a register holding a host function
    /// pointer). Used for `CALL_FUNC`/`FALLBACK`'s call-out to a fixed
    /// `extern "C"` shim.
    pub fn call_r64(&mut self, reg: GpReg) {
        rex_if_needed(self, false, false, false, reg.needs_rex_bit());
        self.push_u8(0xff);
        self.push_u8(modrm_reg(2, reg.low_bits()));
    }

    pub fn ret(&mut self) {
        self.push_u8(0xc3);
    }

    // --- SSE scalar single-precision float ops, all register-direct ---

    fn sse_rr(&mut self, prefix: u8, opcode: u8, src: XmmReg, dst: XmmReg) {
        self.push_u8(prefix);
        rex_if_needed(self, false, dst.needs_rex_bit(), false, src.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(opcode);
        self.push_u8(modrm_reg(dst.low_bits(), src.low_bits()));
    }
    pub fn movss_xmm_xmm(&mut self, src: XmmReg, dst: XmmReg) {
        self.sse_rr(0xf3, 0x10, src, dst);
    }
    pub fn addss_xmm_xmm(&mut self, src: XmmReg, dst: XmmReg) {
        self.sse_rr(0xf3, 0x58, src, dst);
    }
    pub fn subss_xmm_xmm(&mut self, src: XmmReg, dst: XmmReg) {
        self.sse_rr(0xf3, 0x5c, src, dst);
    }
    pub fn mulss_xmm_xmm(&mut self, src: XmmReg, dst: XmmReg) {
        self.sse_rr(0xf3, 0x59, src, dst);
    }
    /// `comiss %src, %dst`, setting `ZF`/`PF`/`CF` for an unordered-aware
    /// unsigned-style compare (`JA`/`JBE` read off the result correctly).
    pub fn comiss_xmm_xmm(&mut self, src: XmmReg, dst: XmmReg) {
        rex_if_needed(self, false, dst.needs_rex_bit(), false, src.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(0x2f);
        self.push_u8(modrm_reg(dst.low_bits(), src.low_bits()));
    }
    /// `xorps %reg, %reg`, the standard way to zero an XMM register.
    pub fn xorps_clear(&mut self, reg: XmmReg) {
        rex_if_needed(self, false, reg.needs_rex_bit(), false, reg.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(0x57);
        self.push_u8(modrm_reg(reg.low_bits(), reg.low_bits()));
    }

    fn sse_mem(&mut self, prefix: u8, opcode: u8, reg: XmmReg, base: GpReg, disp: i32, store: bool) {
        let _ = store;
        self.push_u8(prefix);
        rex_if_needed(self, false, reg.needs_rex_bit(), false, base.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(opcode);
        self.modrm_disp(reg.low_bits(), base, disp);
    }
    /// `movss <disp>(%base), %dst`.
    pub fn movss_m32_xmm(&mut self, base: GpReg, disp: i32, dst: XmmReg) {
        self.sse_mem(0xf3, 0x10, dst, base, disp, false);
    }
    /// `movss %src, <disp>(%base)`.
    pub fn movss_xmm_m32(&mut self, src: XmmReg, base: GpReg, disp: i32) {
        self.sse_mem(0xf3, 0x11, src, base, disp, true);
    }

    // --- 64-bit ALU, widening loads/narrowing stores ---

    pub fn add_r64_r64(&mut self, src: GpReg, dst: GpReg) {
        self.push_u8(rex(true, src.needs_rex_bit(), false, dst.needs_rex_bit()));
        self.push_u8(0x01);
        self.push_u8(modrm_reg(src.low_bits(), dst.low_bits()));
    }

    pub fn or_r64_r64(&mut self, src: GpReg, dst: GpReg) {
        self.push_u8(rex(true, src.needs_rex_bit(), false, dst.needs_rex_bit()));
        self.push_u8(0x09);
        self.push_u8(modrm_reg(src.low_bits(), dst.low_bits()));
    }

    pub fn shl_imm8_r64(&mut self, imm8: u8, reg: GpReg) {
        self.push_u8(rex(true, false, false, reg.needs_rex_bit()));
        self.push_u8(0xc1);
        self.push_u8(modrm_reg(4, reg.low_bits()));
        self.push_u8(imm8);
    }

    /// `sub $imm32, %dst` (64-bit, sign-extended immediate). Used by the
    /// cycle-check tail to decrement a 64-bit countdown by a block's cycle
    /// count without needing a second register to hold it.
    pub fn sub_imm32_r64(&mut self, imm: u32, dst: GpReg) {
        self.push_u8(rex(true, false, false, dst.needs_rex_bit()));
        self.push_u8(0x81);
        self.push_u8(modrm_reg(5, dst.low_bits()));
        self.push_u32(imm);
    }

    /// `add $imm32, %dst` (64-bit, sign-extended immediate). Used to open
    /// and close the ABI's shadow-space reservation around a `call`.
    pub fn add_imm32_r64(&mut self, imm: u32, dst: GpReg) {
        self.push_u8(rex(true, false, false, dst.needs_rex_bit()));
        self.push_u8(0x81);
        self.push_u8(modrm_reg(0, dst.low_bits()));
        self.push_u32(imm);
    }

    /// `movzx <disp>(%base), %dst` from an 8-bit memory operand.
    pub fn movzx_m8_r32(&mut self, base: GpReg, disp: i32, dst: GpReg) {
        rex_if_needed(self, false, dst.needs_rex_bit(), false, base.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(0xb6);
        self.modrm_disp(dst.low_bits(), base, disp);
    }

    /// `movzx <disp>(%base), %dst` from a 16-bit memory operand.
    pub fn movzx_m16_r32(&mut self, base: GpReg, disp: i32, dst: GpReg) {
        rex_if_needed(self, false, dst.needs_rex_bit(), false, base.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(0xb7);
        self.modrm_disp(dst.low_bits(), base, disp);
    }

    /// `movsx %src8, %dst32` (register-direct; `src` must be one of the
    /// registers always encodable as an 8-bit operand without ambiguity —
    /// the source's low byte is accessed directly).
    pub fn movsx_r8_r32(&mut self, src: GpReg, dst: GpReg) {
        rex_if_needed(self, false, dst.needs_rex_bit(), false, src.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(0xbe);
        self.push_u8(modrm_reg(dst.low_bits(), src.low_bits()));
    }

    /// `movsx %src16, %dst32`.
    pub fn movsx_r16_r32(&mut self, src: GpReg, dst: GpReg) {
        rex_if_needed(self, false, dst.needs_rex_bit(), false, src.needs_rex_bit());
        self.push_u8(0x0f);
        self.push_u8(0xbf);
        self.push_u8(modrm_reg(dst.low_bits(), src.low_bits()));
    }

    /// `mov %src8, <disp>(%base)`, storing the low byte of `src`.
    pub fn mov_r8_m8(&mut self, src: GpReg, base: GpReg, disp: i32) {
        rex_if_needed(self, false, src.needs_rex_bit(), false, base.needs_rex_bit());
        self.push_u8(0x88);
        self.modrm_disp(src.low_bits(), base, disp);
    }

    /// `mov %src16, <disp>(%base)`, storing the low 16 bits of `src` (needs
    /// the `0x66` operand-size override prefix).
    pub fn mov_r16_m16(&mut self, src: GpReg, base: GpReg, disp: i32) {
        self.push_u8(0x66);
        rex_if_needed(self, false, src.needs_rex_bit(), false, base.needs_rex_bit());
        self.push_u8(0x89);
        self.modrm_disp(src.low_bits(), base, disp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rex_is_only_emitted_when_a_bit_is_set() {
        let mut asm = Assembler::new();
        rex_if_needed(&mut asm, false, false, false, false);
        assert_eq!(asm.len(), 0);
        rex_if_needed(&mut asm, true, false, false, false);
        assert_eq!(asm.len(), 1);
    }

    #[test]
    fn backward_jump_patches_immediately() {
        let mut asm = Assembler::new();
        let top = asm.new_label();
        asm.bind_label(top).unwrap();
        asm.push_u8(0x90); // nop, so the jump isn't to itself
        asm.push_u8(0xeb); // jmp rel8
        asm.rel8(top).unwrap();
        let code = asm.finish().unwrap();
        // displacement = top(0) - (site(2) + 1) = -3
        assert_eq!(code[2] as i8, -3);
    }

    #[test]
    fn forward_jump_is_patched_on_bind() {
        let mut asm = Assembler::new();
        let end = asm.new_label();
        asm.push_u8(0xeb); // jmp rel8
        asm.rel8(end).unwrap();
        asm.push_u8(0x90);
        asm.bind_label(end).unwrap();
        let code = asm.finish().unwrap();
        // displacement = end(2) - (site(1)+1) = 1
        assert_eq!(code[1] as i8, 1);
    }

    #[test]
    fn unbound_label_fails_to_finish() {
        let mut asm = Assembler::new();
        let l = asm.new_label();
        asm.push_u8(0xeb);
        asm.rel8(l).unwrap();
        assert!(asm.finish().is_err());
    }

    #[test]
    fn modrm_reg_direct_sets_top_two_bits() {
        assert_eq!(modrm_reg(GpReg::Rax.low_bits(), GpReg::Rcx.low_bits()) & 0xc0, 0xc0);
    }

    #[test]
    fn comiss_encodes_as_np_0f_2f_with_no_stray_prefix() {
        let mut asm = Assembler::new();
        asm.comiss_xmm_xmm(XmmReg(1), XmmReg(0));
        let code = asm.finish().unwrap();
        assert_eq!(code, vec![0x0f, 0x2f, 0xc1]);
    }

    #[test]
    fn comiss_with_extended_registers_puts_rex_before_both_0f_bytes() {
        let mut asm = Assembler::new();
        asm.comiss_xmm_xmm(XmmReg(9), XmmReg(8));
        let code = asm.finish().unwrap();
        assert_eq!(code[0] & 0xf0, 0x40, "REX must come first, not sandwiched between the two 0f-escape bytes");
        assert_eq!(&code[1..3], &[0x0f, 0x2f]);
    }
}
