//! Physical register bookkeeping for the native backend's two pools
//! (general-purpose and XMM).
//!
//! Ported from `register_set.c`/`register_set.h`. The source's
//! `struct reg_stat` packs a static descriptor (`locked`, `prio`, `flags`)
//! together with dynamic per-compile state (`in_use`, `grabbed`) in one
//! array slot; this keeps that same pairing but as two parallel `Vec`s so
//! [`RegisterSet::reset`] (called once per compiled block) can clear the
//! dynamic half without re-deriving the static descriptors every time.

use crate::il::Slot;

/// Bits from `enum register_flag`: why a register is special, beyond its
/// priority.
pub mod flags {
    /// Never picked by the allocator; reserved for a fixed role (e.g. the
    /// register holding the `CycleClock`/CPU-state base pointer).
    pub const PRESERVED: u32 = 1 << 0;
    /// Holds the guest PC used to key the native-dispatch hash lookup.
    pub const NATIVE_DISPATCH_PC: u32 = 1 << 1;
    /// Holds the precomputed block-fingerprint hash.
    pub const NATIVE_DISPATCH_HASH: u32 = 1 << 2;
    /// The ABI's integer return register.
    pub const RETURN: u32 = 1 << 3;
    /// Encoding this register requires a REX prefix (`R8`-`R15`/`XMM8`-`XMM15`).
    pub const REX: u32 = 1 << 4;
}

/// Which role the allocator is picking a register for, mirroring
/// `enum register_hint`. Used to bias selection away from registers a
/// following instruction will need intact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterHint {
    /// About to hold a function pointer for an indirect call.
    Function,
    /// About to hold a block-fingerprint hash for dispatch.
    JumpHash,
    /// About to hold a guest jump-target address.
    JumpAddr,
}

/// The static half: properties of a physical register that never change
/// once the register set is built.
#[derive(Clone, Copy, Debug)]
pub struct RegDescriptor<R> {
    pub reg: R,
    /// Never eligible for allocation (fixed-role registers, `RSP`/`RBP`).
    pub locked: bool,
    /// Eviction/selection priority: lower is preferred when picking a free
    /// register, higher is preferred when a register must be spilled.
    pub prio: i32,
    pub flags: u32,
}

/// The dynamic half: which virtual slot (if any) currently lives in this
/// physical register, and whether it's been explicitly grabbed.
#[derive(Clone, Copy, Debug, Default)]
struct RegState {
    in_use: Option<Slot>,
    grabbed: bool,
}

/// A pool of physical registers the allocator draws from. One instance
/// covers the general-purpose registers, another covers XMM.
pub struct RegisterSet<R> {
    descriptors: Vec<RegDescriptor<R>>,
    state: Vec<RegState>,
}

impl<R: Copy> RegisterSet<R> {
    pub fn new(descriptors: Vec<RegDescriptor<R>>) -> Self {
        let state = vec![RegState::default(); descriptors.len()];
        RegisterSet { descriptors, state }
    }

    /// Clear all dynamic state, keeping the static descriptors. Called once
    /// per compiled block, mirroring `register_set_reset`.
    pub fn reset(&mut self) {
        for s in &mut self.state {
            *s = RegState::default();
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn reg(&self, idx: usize) -> R {
        self.descriptors[idx].reg
    }

    pub fn descriptor(&self, idx: usize) -> &RegDescriptor<R> {
        &self.descriptors[idx]
    }

    /// Bind `idx` to `slot`. Mirrors `register_acquire`.
    pub fn acquire(&mut self, idx: usize, slot: Slot) {
        self.state[idx].in_use = Some(slot);
    }

    /// Release whatever slot `idx` was bound to. Mirrors `register_discard`.
    pub fn discard(&mut self, idx: usize) {
        self.state[idx].in_use = None;
    }

    pub fn in_use(&self, idx: usize) -> Option<Slot> {
        self.state[idx].in_use
    }

    /// Temporarily reserve `idx` outside the slot-allocation bookkeeping
    /// (e.g. for an instruction's fixed scratch register). Mirrors
    /// `grab_register`.
    pub fn grab(&mut self, idx: usize) {
        self.state[idx].grabbed = true;
    }

    /// Mirrors `ungrab_register`.
    pub fn ungrab(&mut self, idx: usize) {
        self.state[idx].grabbed = false;
    }

    pub fn is_grabbed(&self, idx: usize) -> bool {
        self.state[idx].grabbed
    }

    fn available(&self, idx: usize) -> bool {
        !self.descriptors[idx].locked && !self.state[idx].grabbed
    }

    /// Find a free register, preferring the lowest `prio`. Mirrors
    /// `register_pick_unused`; `hint` is accepted for parity with the
    /// source's signature but this allocator doesn't yet special-case any
    /// hint beyond plain priority ordering.
    pub fn pick_unused(&self, _hint: RegisterHint) -> Option<usize> {
        (0..self.descriptors.len())
            .filter(|&i| self.available(i) && self.state[i].in_use.is_none())
            .min_by_key(|&i| self.descriptors[i].prio)
    }

    /// Find the best candidate to spill: a free register if one exists,
    /// otherwise the occupied, unlocked, non-grabbed register with the
    /// highest `prio` (the one the allocator is most willing to part with).
    /// Mirrors `register_pick`.
    pub fn pick(&self, hint: RegisterHint) -> usize {
        self.pick_unused(hint).unwrap_or_else(|| {
            (0..self.descriptors.len())
                .filter(|&i| self.available(i))
                .max_by_key(|&i| self.descriptors[i].prio)
                .expect("register set has no available registers to spill")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::abi::GpReg;

    fn sample_set() -> RegisterSet<GpReg> {
        RegisterSet::new(vec![
            RegDescriptor { reg: GpReg::Rax, locked: false, prio: 0, flags: flags::RETURN },
            RegDescriptor { reg: GpReg::Rbx, locked: false, prio: 1, flags: 0 },
            RegDescriptor { reg: GpReg::Rsp, locked: true, prio: 0, flags: flags::PRESERVED },
        ])
    }

    #[test]
    fn pick_unused_skips_locked_registers() {
        let set = sample_set();
        assert_eq!(set.pick_unused(RegisterHint::Function), Some(0));
    }

    #[test]
    fn acquire_makes_a_register_unavailable_to_pick_unused() {
        let mut set = sample_set();
        set.acquire(0, Slot::from_u32(3));
        assert_eq!(set.pick_unused(RegisterHint::Function), Some(1));
    }

    #[test]
    fn pick_falls_back_to_spilling_highest_prio_occupied_register() {
        let mut set = sample_set();
        set.acquire(0, Slot::from_u32(1));
        set.acquire(1, Slot::from_u32(2));
        assert_eq!(set.pick(RegisterHint::Function), 1);
    }

    #[test]
    fn grab_and_ungrab_round_trip() {
        let mut set = sample_set();
        set.grab(1);
        assert!(set.is_grabbed(1));
        assert_eq!(set.pick_unused(RegisterHint::Function), Some(0));
        set.ungrab(1);
        assert!(!set.is_grabbed(1));
    }
}
