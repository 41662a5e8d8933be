//! Calling-convention surface the code generator needs: argument/return
//! register assignment, the volatile/non-volatile split, and shadow-space
//! bookkeeping.
//!
//! Ported from `x86_64/abi.h`'s `#ifdef ABI_UNIX`/`ABI_MICROSOFT` macro
//! pair. The source picks one convention at compile time; this crate keeps
//! both reachable at runtime behind the [`CallingConvention`] trait so
//! [`crate::config::JitConfig::abi`] can select either one, the way
//! `wasmtime`'s `Target`/`CallConv` split lets one binary target more than
//! one ABI.

/// A general-purpose x86-64 register, by its 4-bit encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GpReg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl GpReg {
    /// The 4-bit ModR/M-SIB encoding; bit 3 of this is the REX.B/R/X
    /// extension bit.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether encoding this register (as a ModR/M reg or r/m field, or a
    /// SIB base/index) requires a REX prefix byte to exist at all, even if
    /// no other REX bit is set (`SPL`/`BPL`/`SIL`/`DIL` 8-bit access is the
    /// classic case; this backend never emits 8-bit GP operands so it
    /// doesn't come up, but R8-R15 always need one).
    pub fn needs_rex_bit(self) -> bool {
        self.code() >= 8
    }

    /// The low 3 bits used in the ModR/M/SIB byte itself.
    pub fn low_bits(self) -> u8 {
        self.code() & 0x7
    }
}

/// An SSE register, by its 4-bit encoding (`XMM0`-`XMM15`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XmmReg(pub u8);

impl XmmReg {
    pub const XMM0: XmmReg = XmmReg(0);

    pub fn code(self) -> u8 {
        self.0
    }

    pub fn needs_rex_bit(self) -> bool {
        self.0 >= 8
    }

    pub fn low_bits(self) -> u8 {
        self.0 & 0x7
    }
}

/// The contract both ABIs implement: where arguments/return values live, and
/// which registers the callee must preserve. Grounded in `abi.h`'s
/// `REG_ARG*`/`REG_RET*`/`REG_VOL*`/`REG_NONVOL*` macro families.
pub trait CallingConvention {
    /// Integer/pointer argument registers, in order.
    fn int_args(&self) -> &'static [GpReg];
    /// Floating-point argument registers, in order.
    fn xmm_args(&self) -> &'static [XmmReg];
    /// Integer return register (`REG_RET`).
    fn ret_reg(&self) -> GpReg {
        GpReg::Rax
    }
    /// Floating-point return register (`REG_RET_XMM`).
    fn ret_reg_xmm(&self) -> XmmReg {
        XmmReg::XMM0
    }
    /// Caller-saved general-purpose scratch registers beyond the argument
    /// registers (`REG_VOL0`/`REG_VOL1`).
    fn extra_volatile_gp(&self) -> &'static [GpReg];
    /// Callee-saved general-purpose registers common to both ABIs
    /// (`REG_NONVOL0..4`).
    fn nonvolatile_gp(&self) -> &'static [GpReg] {
        &[GpReg::Rbx, GpReg::R12, GpReg::R13, GpReg::R14, GpReg::R15]
    }
    /// Bytes of stack the caller must reserve below its arguments before a
    /// `call`, regardless of argument count (0 for System V, 32 for
    /// Microsoft's "shadow space").
    fn shadow_space(&self) -> usize;
    /// Required stack alignment, in bytes, at the point of a `call`
    /// instruction.
    fn stack_alignment(&self) -> usize {
        16
    }
}

/// The Linux/System V AMD64 ABI.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemV;

impl CallingConvention for SystemV {
    fn int_args(&self) -> &'static [GpReg] {
        &[GpReg::Rdi, GpReg::Rsi, GpReg::Rdx, GpReg::Rcx, GpReg::R8, GpReg::R9]
    }
    fn xmm_args(&self) -> &'static [XmmReg] {
        &[XmmReg(0), XmmReg(1), XmmReg(2), XmmReg(3), XmmReg(4), XmmReg(5), XmmReg(6), XmmReg(7)]
    }
    fn extra_volatile_gp(&self) -> &'static [GpReg] {
        &[GpReg::R10, GpReg::R11]
    }
    fn shadow_space(&self) -> usize {
        0
    }
}

/// The Microsoft x64 ABI (Windows).
#[derive(Clone, Copy, Debug, Default)]
pub struct MicrosoftX64;

impl CallingConvention for MicrosoftX64 {
    fn int_args(&self) -> &'static [GpReg] {
        &[GpReg::Rcx, GpReg::Rdx, GpReg::R8, GpReg::R9]
    }
    fn xmm_args(&self) -> &'static [XmmReg] {
        &[XmmReg(0), XmmReg(1), XmmReg(2), XmmReg(3)]
    }
    fn extra_volatile_gp(&self) -> &'static [GpReg] {
        &[GpReg::R10, GpReg::R11]
    }
    fn shadow_space(&self) -> usize {
        32
    }
}

/// Which calling convention [`crate::jit::JitState`] was configured with.
/// A plain enum (rather than `Box<dyn CallingConvention>`) so
/// [`crate::config::JitConfig`] stays `Clone`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Abi {
    SystemV,
    MicrosoftX64,
}

impl Abi {
    /// The host platform's native ABI.
    #[cfg(unix)]
    pub fn host() -> Self {
        Abi::SystemV
    }

    #[cfg(windows)]
    pub fn host() -> Self {
        Abi::MicrosoftX64
    }

    pub fn convention(self) -> &'static dyn CallingConvention {
        match self {
            Abi::SystemV => &SystemV,
            Abi::MicrosoftX64 => &MicrosoftX64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_v_assigns_rdi_first() {
        assert_eq!(SystemV.int_args()[0], GpReg::Rdi);
        assert_eq!(SystemV.shadow_space(), 0);
    }

    #[test]
    fn microsoft_assigns_rcx_first_and_needs_shadow_space() {
        assert_eq!(MicrosoftX64.int_args()[0], GpReg::Rcx);
        assert_eq!(MicrosoftX64.shadow_space(), 32);
    }

    #[test]
    fn extended_registers_need_a_rex_bit() {
        assert!(GpReg::R8.needs_rex_bit());
        assert!(!GpReg::Rax.needs_rex_bit());
    }
}
