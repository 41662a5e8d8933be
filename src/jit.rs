//! The top-level orchestrator: owns every subsystem and exposes the
//! embedder-facing entry points.
//!
//! Mirrors `jit_init`/`jit_cleanup`/`code_cache_find`-driven dispatch from
//! `jit.c`, collected onto one struct the way `wasmtime::Store` collects an
//! engine's runtime state behind a single owned handle.

use std::ffi::c_void;
use std::marker::PhantomData;

use crate::cache::avl::NodeId;
use crate::cache::entry::CompiledBlock;
use crate::cache::{CacheStats, CodeCache};
use crate::clock::CycleClock;
use crate::config::JitConfig;
use crate::debugger::Debugger;
use crate::dispatch_meta::{DispatchMeta, GuestAddr, Hash, ProfileHandle};
use crate::error::JitError;
use crate::exec_mem::ExecMem;
use crate::il::IlBuilder;
use crate::interp::InterpBlock;
#[cfg(feature = "native-x86_64")]
use crate::native::NativeBlock;

/// Owns the code cache, the executable-memory pool, the cycle clock, the
/// embedder's [`DispatchMeta`], and the debugger surface. Every other public
/// entry point in this crate is a method here.
///
/// Deliberately `!Sync` (and, via the raw pointers it eventually hands into
/// generated code, not meaningfully `Send` either once in use): this crate
/// assumes a single CPU thread driving dispatch, with no internal locking.
pub struct JitState {
    cache: CodeCache,
    exec_mem: ExecMem,
    /// Boxed so its address is stable across moves of `JitState` itself —
    /// compiled native blocks bake this address in as a 64-bit immediate.
    clock: Box<CycleClock>,
    config: JitConfig,
    meta: Box<dyn DispatchMeta>,
    debugger: Debugger,
    _not_sync: PhantomData<*mut ()>,
}

impl JitState {
    /// Mirrors `jit_init`: allocate the exec-memory pool, seed the code
    /// cache with its trampoline sentinel, and take ownership of the
    /// embedder's callbacks.
    pub fn new(config: JitConfig, meta: Box<dyn DispatchMeta>) -> Result<Self, JitError> {
        let exec_mem = ExecMem::new(config.exec_mem_pool_size)?;
        let mut clock = Box::new(CycleClock::new());
        clock.target = config.default_cycle_budget;
        clock.countdown = config.default_cycle_budget;

        log::debug!(
            "sh4-jit: initialized ({} byte exec-memory pool, native backend {})",
            config.exec_mem_pool_size,
            if config.use_native_backend { "on" } else { "off" }
        );

        Ok(JitState {
            cache: CodeCache::new(),
            exec_mem,
            clock,
            config,
            meta,
            debugger: Debugger::new(),
            _not_sync: PhantomData,
        })
    }

    /// Dispatch entry point: resolve `pc`/`hash` to a
    /// compiled block (compiling it on a miss), run it, and keep chaining to
    /// whatever block the guest jumps to next until the cycle clock expires.
    /// Returns the guest PC execution stopped at, for the embedder's main
    /// loop to hand to its scheduler before calling back in.
    ///
    /// This plays the role the source's hand-written dispatch
    /// tail/trampoline plays in assembly: the per-block native/interpreted
    /// code still runs the fixed cycle-check tail and never returns early on
    /// its own, but the decision to keep chaining instead of returning to
    /// the embedder is made here, in Rust, by reading [`CycleClock::expired`]
    /// after each block — see `DESIGN.md` for why that's a deliberate
    /// simplification rather than a literal port of the asm dispatch tail.
    ///
    /// # Safety
    /// `cpu` must be a valid pointer matching whatever contract the
    /// embedder's [`DispatchMeta`]/`GuestMemoryMap` implementations assume
    /// for the lifetime of this call.
    pub unsafe fn entry(&mut self, pc: GuestAddr, hash: Hash, cpu: *mut c_void) -> GuestAddr {
        let mut pc = pc;
        let mut hash = hash;
        loop {
            let node = self.cache.find(hash).unwrap_or_else(|e| e.abort());
            if !self.cache.entry(node).valid {
                self.compile_and_install(node, pc)
                    .unwrap_or_else(|e| e.abort());
            }
            self.meta.profile_notify(&ProfileHandle(hash as u64));

            let (new_pc, new_hash) = self.run_compiled(node, cpu);
            pc = new_pc;
            hash = new_hash;

            if self.clock.expired() {
                let target = self.clock.target.wrapping_add(self.config.default_cycle_budget);
                self.clock.roll_to_target(target);
                return pc;
            }
        }
    }

    fn run_compiled(&mut self, node: NodeId, cpu: *mut c_void) -> (GuestAddr, Hash) {
        match self.cache.entry(node).block.as_ref().expect("entry was just compiled") {
            #[cfg(feature = "native-x86_64")]
            CompiledBlock::Native(native) => unsafe { native.call(cpu) },
            CompiledBlock::Interpreted(interp) => {
                let target = unsafe { interp.exec(cpu) };
                self.clock.consume(u64::from(interp.cycle_count()));
                (target.addr, target.hash)
            }
        }
    }

    /// The slow path: decode guest code into IL, optimize it,
    /// lower it to whichever backend [`JitConfig::use_native_backend`]
    /// selects, and install the result.
    fn compile_and_install(&mut self, node: NodeId, pc: GuestAddr) -> Result<(), JitError> {
        let mut builder = IlBuilder::new();
        self.meta.on_compile(&mut builder, pc);
        let mut block = builder.finish();

        crate::optimize::run(&mut block);
        #[cfg(any(debug_assertions, feature = "integrity-checks"))]
        crate::il::verify::verify_block(&block)?;

        let compiled = if self.config.use_native_backend {
            self.compile_native(&block)?
        } else {
            CompiledBlock::Interpreted(InterpBlock::compile(&block)?)
        };

        let entry = self.cache.entry_mut(node);
        entry.block = Some(compiled);
        entry.valid = true;
        Ok(())
    }

    #[cfg(feature = "native-x86_64")]
    fn compile_native(&mut self, block: &crate::il::IlBlock) -> Result<CompiledBlock, JitError> {
        let clock_ptr = self.clock.as_mut() as *mut CycleClock;
        let native = NativeBlock::compile(block, self.config.abi, clock_ptr, &mut self.exec_mem)?;
        Ok(CompiledBlock::Native(native))
    }

    #[cfg(not(feature = "native-x86_64"))]
    fn compile_native(&mut self, block: &crate::il::IlBlock) -> Result<CompiledBlock, JitError> {
        Ok(CompiledBlock::Interpreted(InterpBlock::compile(block)?))
    }

    /// Mirrors `code_cache_invalidate_all`: retire every compiled block
    /// without freeing it yet, so a thread still mid-dispatch through an
    /// old block doesn't fault.
    pub fn invalidate_all(&mut self) {
        self.cache.invalidate_all();
    }

    /// Mirrors `code_cache_gc`: actually reclaim every retired generation's
    /// exec-memory/heap allocations. The embedder calls this outside CPU
    /// context, once it knows no in-flight native call chain still
    /// references a retired block.
    pub fn gc(&mut self) {
        self.cache.gc(&mut self.exec_mem);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn debugger(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    pub fn clock(&self) -> &CycleClock {
        &self.clock
    }
}

impl Drop for JitState {
    /// Mirrors `jit_cleanup`. Every retired generation not yet collected by
    /// an explicit [`JitState::gc`] call is swept here too, so a dropped
    /// `JitState` never leaks its exec-memory pool's allocations (the pool
    /// itself is reclaimed by `ExecMem`'s own `Drop`).
    fn drop(&mut self) {
        self.cache.invalidate_all();
        self.cache.gc(&mut self.exec_mem);
        log::debug!("sh4-jit: shut down ({:?})", self.cache.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch_meta::GuestAddr;

    struct StraightLineMeta;

    impl DispatchMeta for StraightLineMeta {
        fn hash(&self, pc: GuestAddr) -> Hash {
            pc
        }

        fn on_compile(&self, builder: &mut IlBuilder, pc: GuestAddr) {
            let g = builder.alloc_slot(crate::il::SlotType::General).unwrap();
            let pc_slot = builder.alloc_slot(crate::il::SlotType::General).unwrap();
            let hash_slot = builder.alloc_slot(crate::il::SlotType::General).unwrap();
            builder.set_slot(g, 1).unwrap();
            builder.add_const32(g, 1).unwrap();
            builder.set_slot(pc_slot, pc.wrapping_add(2)).unwrap();
            builder.set_slot(hash_slot, pc.wrapping_add(2)).unwrap();
            builder.jump(pc_slot, hash_slot).unwrap();
        }
    }

    fn test_config() -> JitConfig {
        JitConfig {
            use_native_backend: cfg!(feature = "native-x86_64"),
            abi: crate::native::Abi::host(),
            exec_mem_pool_size: 64 * 1024,
            inline_memory: false,
            default_cycle_budget: 8,
        }
    }

    #[test]
    fn entry_chains_blocks_until_the_cycle_clock_expires() {
        let mut jit = JitState::new(test_config(), Box::new(StraightLineMeta)).unwrap();
        let stop_pc = unsafe { jit.entry(0, 0, std::ptr::null_mut()) };
        // Every block advances pc by 2 and costs some small fixed number of
        // cycles; with an 8-cycle budget dispatch must have chained through
        // more than one block before stopping.
        assert!(stop_pc >= 2);
    }

    #[test]
    fn invalidate_all_then_gc_does_not_panic_on_a_freshly_compiled_entry() {
        let mut jit = JitState::new(test_config(), Box::new(StraightLineMeta)).unwrap();
        unsafe {
            jit.entry(0, 0, std::ptr::null_mut());
        }
        jit.invalidate_all();
        jit.gc();
        assert_eq!(jit.cache_stats().old_generations, 0);
    }
}
