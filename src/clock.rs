//! The cycle-clock triple compiled blocks read and write directly.
//!
//! Ported from the `stamp`/`countdown`/`target` fields the source keeps in
//! the same exec-memory page as the code so the cycle-check tail (§4.6.4)
//! can reach them with RIP-relative moves rather than an indirect load
//! through a pointer held in a register. This crate keeps the same layout
//! intent: [`CycleClock`] is `#[repr(C)]` and sized so a native block can be
//! handed its address and a fixed set of field offsets.

/// Three monotone 64-bit counters making up the cycle clock.
///
/// `stamp` is the number of guest cycles executed so far; `countdown` is
/// cycles remaining until the next scheduler check; `target` is the cycle
/// count at which the scheduler wants control back. The native
/// cycle-check tail (see [`crate::native::lower::Lowering::emit_cycle_tail`])
/// only ever decrements `countdown`; the decision to roll all three fields
/// forward (the *return function*'s job) is made in software, by
/// [`crate::jit::JitState::entry`], once [`CycleClock::expired`] is true.
#[repr(C)]
#[derive(Debug, Default)]
pub struct CycleClock {
    /// Cycles executed since the emulator started (or since the last
    /// scheduler handoff, depending on the embedder's convention).
    pub stamp: u64,
    /// Cycles remaining before the scheduler must be consulted again.
    pub countdown: u64,
    /// The `stamp` value at which the next scheduler event is due.
    pub target: u64,
}

impl CycleClock {
    /// A fresh clock with no cycles spent and an immediately-due target,
    /// matching the state `JitState::new` starts in before the embedder's
    /// scheduler has run once.
    pub fn new() -> Self {
        CycleClock::default()
    }

    /// Consume `cycles` cycles, mirroring what the cycle-check tail does to
    /// `countdown` before testing its sign. Exposed for the IL interpreter
    /// backend, which performs the same bookkeeping in software.
    pub fn consume(&mut self, cycles: u64) {
        self.countdown = self.countdown.wrapping_sub(cycles);
        self.stamp = self.stamp.wrapping_add(cycles);
    }

    /// Whether the countdown has expired (as a signed quantity — the source
    /// tests `a > 0`, so wrapping below zero counts as expired too).
    pub fn expired(&self) -> bool {
        (self.countdown as i64) <= 0
    }

    /// The *return function*'s bookkeeping: roll `stamp`
    /// forward to `target` and reset `countdown` to the gap the scheduler
    /// just granted.
    pub fn roll_to_target(&mut self, new_target: u64) {
        self.stamp = self.target;
        self.countdown = new_target.wrapping_sub(self.target);
        self.target = new_target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_moves_stamp_and_countdown_in_opposite_directions() {
        let mut c = CycleClock {
            stamp: 0,
            countdown: 100,
            target: 100,
        };
        c.consume(40);
        assert_eq!(c.stamp, 40);
        assert_eq!(c.countdown, 60);
        assert!(!c.expired());
    }

    #[test]
    fn countdown_going_negative_counts_as_expired() {
        let mut c = CycleClock {
            stamp: 0,
            countdown: 10,
            target: 10,
        };
        c.consume(11);
        assert!(c.expired());
    }

    #[test]
    fn roll_to_target_matches_p9() {
        // P9: stamp + countdown_consumed reaching target means the return
        // function leaves stamp == target, countdown == 0 (when the new
        // target equals the old one plus nothing further has been granted).
        let mut c = CycleClock {
            stamp: 0,
            countdown: 0,
            target: 1000,
        };
        c.roll_to_target(1000);
        assert_eq!(c.stamp, 1000);
        assert_eq!(c.countdown, 0);
    }
}
