//! Tunables threaded through `JitState::new`, as opposed to the per-call
//! embedder callbacks in [`crate::dispatch_meta`].
//!
//! Grounded in how `wasmtime::Config` is built up and then consumed once at
//! engine-construction time rather than re-read on every compile.

use crate::native::Abi;

/// Construction-time configuration for a [`crate::jit::JitState`].
#[derive(Clone, Debug)]
pub struct JitConfig {
    /// Whether to lower blocks to native x86-64 code at all. When `false`
    /// every block runs through the IL interpreter, matching the non-goal of
    /// supporting host ISAs other than the native backend and the
    /// interpreter: this is the "pick the interpreter" half of that choice.
    pub use_native_backend: bool,

    /// Calling convention the native backend should assume for the host
    /// process. Defaults to the platform's native ABI.
    pub abi: Abi,

    /// Size in bytes of the single `PROT_EXEC` region reserved at startup.
    /// The source hardcodes 512 MiB; this crate exposes it as a knob so
    /// tests can run against a much smaller pool.
    pub exec_mem_pool_size: usize,

    /// Whether the native backend should inline guest-memory-map accesses
    /// (§4.7) instead of always tail-calling the region's accessor.
    pub inline_memory: bool,

    /// Number of guest cycles the scheduler is willing to grant before the
    /// cycle-check tail is consulted. This is a default only: the real
    /// budget comes from the embedder's clock triple at runtime, but tests
    /// that don't wire up a scheduler use this as the initial `target`.
    pub default_cycle_budget: u64,
}

impl JitConfig {
    /// The pool size used by the source this crate is grounded on: 512 MiB.
    pub const DEFAULT_POOL_SIZE: usize = 512 * 1024 * 1024;
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            use_native_backend: cfg!(feature = "native-x86_64"),
            abi: Abi::host(),
            exec_mem_pool_size: Self::DEFAULT_POOL_SIZE,
            inline_memory: cfg!(feature = "inline-memory"),
            default_cycle_budget: 1_000_000,
        }
    }
}
