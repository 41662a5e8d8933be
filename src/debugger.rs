//! Watchpoint and soft-break surface consulted by the interpreter fallback
//! path.
//!
//! Ported from the source's debugger hook, which uses C function pointers
//! over an opaque `arg`; here that becomes the [`DebugHooks`] trait. The
//! fixed-size breakpoint/watchpoint arrays and the
//! `{normal, pre-step, post-step, break}` state machine are carried
//! unchanged.

use crate::dispatch_meta::GuestAddr;

/// The fixed capacity of each breakpoint/watchpoint array.
pub const MAX_WATCHPOINTS: usize = 16;

/// One `{address, length, enabled}` record, shared shape for breakpoints and
/// both watchpoint kinds.
#[derive(Clone, Copy, Debug, Default)]
pub struct WatchSlot {
    pub address: GuestAddr,
    pub length: u32,
    pub enabled: bool,
}

impl WatchSlot {
    /// Whether the half-open range `[addr, addr+len)` overlaps this slot's
    /// range. Symmetric range-intersection.
    fn overlaps(&self, addr: GuestAddr, len: u32) -> bool {
        if !self.enabled || len == 0 || self.length == 0 {
            return false;
        }
        let a0 = self.address as u64;
        let a1 = a0 + self.length as u64;
        let b0 = addr as u64;
        let b1 = b0 + len as u64;
        a0 < b1 && b0 < a1
    }
}

/// The four-state machine `should_break` drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugState {
    Normal,
    PreStep,
    PostStep,
    Break,
}

/// The watchpoint/breakpoint surface, polled exclusively from the
/// interpreter fallback path.
pub struct Debugger {
    breakpoints: [WatchSlot; MAX_WATCHPOINTS],
    read_watch: [WatchSlot; MAX_WATCHPOINTS],
    write_watch: [WatchSlot; MAX_WATCHPOINTS],
    state: DebugState,
    at_watchpoint: Option<GuestAddr>,
}

impl Debugger {
    pub fn new() -> Self {
        Debugger {
            breakpoints: [WatchSlot::default(); MAX_WATCHPOINTS],
            read_watch: [WatchSlot::default(); MAX_WATCHPOINTS],
            write_watch: [WatchSlot::default(); MAX_WATCHPOINTS],
            state: DebugState::Normal,
            at_watchpoint: None,
        }
    }

    pub fn state(&self) -> DebugState {
        self.state
    }

    pub fn set_breakpoint(&mut self, idx: usize, address: GuestAddr, length: u32) {
        self.breakpoints[idx] = WatchSlot {
            address,
            length,
            enabled: true,
        };
    }

    pub fn clear_breakpoint(&mut self, idx: usize) {
        self.breakpoints[idx].enabled = false;
    }

    pub fn set_read_watch(&mut self, idx: usize, address: GuestAddr, length: u32) {
        self.read_watch[idx] = WatchSlot {
            address,
            length,
            enabled: true,
        };
    }

    pub fn set_write_watch(&mut self, idx: usize, address: GuestAddr, length: u32) {
        self.write_watch[idx] = WatchSlot {
            address,
            length,
            enabled: true,
        };
    }

    /// Drives the state machine on every retired guest instruction, and
    /// reports whether execution should halt at `pc`.
    pub fn should_break(&mut self, pc: GuestAddr) -> bool {
        match self.state {
            DebugState::Normal => {
                if self.breakpoints.iter().any(|b| b.enabled && b.address == pc) {
                    self.state = DebugState::Break;
                    true
                } else {
                    false
                }
            }
            DebugState::PreStep => {
                self.state = DebugState::PostStep;
                false
            }
            DebugState::PostStep => {
                self.state = DebugState::Break;
                true
            }
            DebugState::Break => true,
        }
    }

    /// Request a single-step: the next two `should_break` calls walk
    /// through `pre-step` then `post-step` before landing on `break`.
    pub fn request_step(&mut self) {
        self.state = DebugState::PreStep;
    }

    pub fn resume(&mut self) {
        self.state = DebugState::Normal;
        self.at_watchpoint = None;
    }

    /// Check a read access against the read-watchpoint array, latching the
    /// hit for the next break check if one fires.
    pub fn is_r_watch(&mut self, addr: GuestAddr, len: u32) -> bool {
        let hit = self.read_watch.iter().any(|w| w.overlaps(addr, len));
        if hit {
            self.at_watchpoint = Some(addr);
        }
        hit
    }

    /// Check a write access against the write-watchpoint array.
    pub fn is_w_watch(&mut self, addr: GuestAddr, len: u32) -> bool {
        let hit = self.write_watch.iter().any(|w| w.overlaps(addr, len));
        if hit {
            self.at_watchpoint = Some(addr);
        }
        hit
    }

    /// The address latched by the most recent watchpoint hit, if any.
    pub fn at_watchpoint(&self) -> Option<GuestAddr> {
        self.at_watchpoint
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-supplied reactions to debugger events, mirroring the source's
/// opaque `arg`-carrying C function pointers.
pub trait DebugHooks {
    fn on_break(&self, pc: GuestAddr);
    fn on_read_watchpoint(&self, addr: GuestAddr);
    fn on_write_watchpoint(&self, addr: GuestAddr);
    fn on_softbreak(&self, opcode: u16);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_hits_in_normal_state() {
        let mut d = Debugger::new();
        d.set_breakpoint(0, 0x8c01_0000, 2);
        assert!(d.should_break(0x8c01_0000));
        assert_eq!(d.state(), DebugState::Break);
    }

    #[test]
    fn step_walks_pre_then_post_then_break() {
        let mut d = Debugger::new();
        d.request_step();
        assert!(!d.should_break(0));
        assert_eq!(d.state(), DebugState::PostStep);
        assert!(d.should_break(0));
        assert_eq!(d.state(), DebugState::Break);
    }

    #[test]
    fn watchpoint_overlap_is_symmetric() {
        let mut d = Debugger::new();
        d.set_write_watch(0, 0x1000, 4);
        assert!(d.is_w_watch(0x1002, 4));
        assert!(!d.is_w_watch(0x2000, 4));
        assert_eq!(d.at_watchpoint(), Some(0x1002));
    }
}
