//! The taxonomy of fatal conditions the JIT can raise.
//!
//! This crate has no notion of a recoverable error: a well-formed guest
//! decoder and a well-formed IL builder never produce an instruction stream
//! this crate can't lower. `JitError` exists to give process-level aborts
//! structured, loggable context (which slot, which chunk, which size) rather
//! than to be handled by a caller.

use std::fmt;

/// A fatal condition raised by some part of the translation core.
#[derive(thiserror::Error, Debug)]
pub enum JitError {
    /// An internal invariant was violated: AVL imbalance, a corrupt
    /// exec-memory chunk header, a slot read before it was written, a slot
    /// written twice on the same path, and so on.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The executable-memory pool or the host allocator could not satisfy a
    /// request.
    #[error("failed to allocate {requested} bytes from exec memory")]
    FailedAlloc {
        /// Size in bytes that was requested.
        requested: usize,
    },

    /// A fixed-size encoding (an 8-bit relative jump, a fixed-capacity
    /// pending-label table, an opcode's slot-count bound) was exceeded.
    #[error("{what} out of range: {detail}")]
    Overflow {
        /// What overflowed (e.g. "8-bit relative jump").
        what: &'static str,
        /// Human-readable detail (e.g. the displacement that didn't fit).
        detail: String,
    },

    /// A backend was asked to lower an IL opcode it doesn't implement.
    #[error("opcode {0:?} is not implemented by this backend")]
    Unimplemented(crate::il::Opcode),
}

impl JitError {
    /// Construct an `Integrity` error from a formatted message, logging it
    /// at `error` level before returning it. Every call site that raises an
    /// integrity error goes through here so the log line and the panic
    /// message never drift apart.
    pub fn integrity(msg: impl fmt::Display) -> Self {
        let err = JitError::Integrity(msg.to_string());
        log::error!("{}", err);
        err
    }

    /// Log this error at `error` level and then panic with its message.
    /// Every fatal path in the crate funnels through this: there is no
    /// recovery, only structured diagnostics before the abort.
    pub fn abort(self) -> ! {
        log::error!("aborting: {}", self);
        panic!("{}", self);
    }
}
