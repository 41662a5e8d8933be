//! A single code-cache entry: one compiled guest basic block.
//!
//! Ported from `struct cache_entry` (`code_cache.h`), whose `blk` field is
//! itself the union `struct jit_code_block` of a native x86-64 block or an
//! interpreted one (`code_block.h`). The union becomes an enum here; the
//! `valid` flag and fingerprint key are unchanged.

use crate::interp::InterpBlock;

#[cfg(feature = "native-x86_64")]
use crate::native::NativeBlock;

/// The compiled form a cache entry holds, mirroring the source's
/// compile-time choice between `code_block_x86_64` and `code_block_intp`
/// with a runtime tag instead, since both backends can coexist in one
/// build (`JitConfig::use_native_backend` picks per-process, not per-build).
pub enum CompiledBlock {
    #[cfg(feature = "native-x86_64")]
    Native(NativeBlock),
    Interpreted(InterpBlock),
}

/// One node's payload in the code-cache AVL tree.
///
/// `key` lives on the tree node itself ([`crate::cache::avl::AvlTree`]
/// stores it alongside the payload), so this only carries what
/// `struct cache_entry` adds on top: validity and the compiled block.
pub struct CacheEntry {
    /// `false` until the slow path has compiled and installed a block.
    /// A cache entry is allocated (and reachable from the tree) before its
    /// code exists, so lookups can race the compiler without a separate
    /// "is this key present" step.
    pub valid: bool,
    pub block: Option<CompiledBlock>,
}

impl CacheEntry {
    /// A freshly allocated, not-yet-compiled entry. Matches
    /// `cache_entry_ctor` before `jit_code_block_init` fills in the union.
    pub fn empty() -> Self {
        CacheEntry {
            valid: false,
            block: None,
        }
    }

    /// The trampoline sentinel installed at key `0xa0000000` so the hash
    /// table's hot path never sees a null entry (see
    /// [`crate::cache::table`]).
    pub fn trampoline() -> Self {
        CacheEntry {
            valid: true,
            block: None,
        }
    }
}

impl CompiledBlock {
    /// Release whatever host resources this block holds outside the Rust
    /// heap (currently: a native block's exec-memory allocation). Called
    /// only from [`crate::cache::CodeCache::gc`] while walking a retired
    /// generation, mirroring `cache_entry_dtor`'s call into
    /// `jit_code_block_cleanup`.
    pub(crate) fn release(self, exec_mem: &mut crate::exec_mem::ExecMem) {
        #[cfg(feature = "native-x86_64")]
        if let CompiledBlock::Native(native) = self {
            native.release(exec_mem);
        }
    }
}
