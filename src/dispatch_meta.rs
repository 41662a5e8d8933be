//! Embedder-supplied collaborators.
//!
//! The source passes these as a `struct dispatch_meta` of C function
//! pointers plus a `void *` context. Here they become traits: one object
//! implements [`DispatchMeta`] and is handed to [`crate::jit::JitState::new`]
//! once, the way `wasmtime`'s `Store`/`Linker` traits are supplied once at
//! engine construction.

use std::fmt;

use crate::il::IlBuilder;

/// A 32-bit fingerprint identifying a compiled block: guest PC plus enough
/// guest state (FPU mode bits) to avoid aliasing two blocks that start at
/// the same address under different CPU modes.
pub type Hash = u32;

/// A 32-bit guest address, used both as a memory address and a code-block
/// key.
pub type GuestAddr = u32;

/// The embedder's three callbacks, collected the way `struct dispatch_meta`
/// collects `hash_func`/`on_compile`/`profile_notify`.
///
/// Implemented once by the host crate that owns the SH-4 decoder and guest
/// memory map; [`crate::jit::JitState`] holds a `Box<dyn DispatchMeta>` and
/// calls through it on every cache miss.
pub trait DispatchMeta {
    /// Derive the 32-bit fingerprint for the block starting at `pc`. Must be
    /// a pure function of guest-visible state reachable from `pc` — hashing
    /// on `addr & mask` is one legitimate implementation of this contract,
    /// not the only one.
    fn hash(&self, pc: GuestAddr) -> Hash;

    /// Fill an empty IL block by decoding guest instructions starting at
    /// `pc`. Called only on a cache miss, from [`crate::jit::JitState`]'s
    /// slow path.
    fn on_compile(&self, builder: &mut IlBuilder, pc: GuestAddr);

    /// Optional hit-count notification, called every time dispatch jumps
    /// into a compiled block. Default no-op, matching how `profile_notify`
    /// is the one optional member of `struct dispatch_meta` in the source.
    fn profile_notify(&self, _block: &ProfileHandle) {}
}

/// An opaque handle to a cache entry's profiling bookkeeping, handed to
/// [`DispatchMeta::profile_notify`]. Collecting and presenting statistics is
/// out of this crate's scope; it only guarantees the hook fires with a
/// stable identity per cache entry so an embedder-side profiler can key its
/// own tables off it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ProfileHandle(pub u64);

/// One region of the guest's flat memory map, consumed by the native
/// backend's inlined-access code generator and by the IL builder's
/// `READ_*`/`WRITE_*` opcodes.
pub trait GuestMemoryMap: fmt::Debug {
    /// First address (inclusive) this region claims.
    fn first_addr(&self) -> GuestAddr;
    /// Last address (inclusive) this region claims.
    fn last_addr(&self) -> GuestAddr;
    /// Mask applied to an address before indexing into this region's
    /// backing store (e.g. RAM mirroring).
    fn mask(&self) -> u32;
    /// Whether this region is plain RAM, eligible for the inlined
    /// `and mask; mov (base+idx)` fast path instead of a tail-called
    /// accessor.
    fn is_ram(&self) -> bool;
    /// Base pointer backing this region, valid only when [`Self::is_ram`].
    fn ram_base(&self) -> Option<*mut u8> {
        None
    }

    fn read8(&self, addr: GuestAddr) -> u8;
    fn read16(&self, addr: GuestAddr) -> u16;
    fn read32(&self, addr: GuestAddr) -> u32;
    fn read_float(&self, addr: GuestAddr) -> f32;
    fn write8(&self, addr: GuestAddr, val: u8);
    fn write16(&self, addr: GuestAddr, val: u16);
    fn write32(&self, addr: GuestAddr, val: u32);
    fn write_float(&self, addr: GuestAddr, val: f32);

    /// Non-faulting reads for the debugger's watchpoint surface: `Some` on
    /// success, `None` if the access would fault. Default implementations
    /// just delegate to the faulting accessors, matching regions that have
    /// no reason to ever fault (RAM); MMIO regions should override these.
    fn try_read8(&self, addr: GuestAddr) -> Option<u8> {
        Some(self.read8(addr))
    }
    fn try_read16(&self, addr: GuestAddr) -> Option<u16> {
        Some(self.read16(addr))
    }
    fn try_read32(&self, addr: GuestAddr) -> Option<u32> {
        Some(self.read32(addr))
    }
}

/// A contiguous set of regions making up the guest's address space, handed
/// to `JitState::new` so the native backend can build its inlined
/// decision-tree fragments once at construction time.
pub struct MemoryMap {
    regions: Vec<Box<dyn GuestMemoryMap>>,
    unmapped: Option<Box<dyn GuestMemoryMap>>,
}

impl MemoryMap {
    /// Build a memory map from an ordered list of regions plus an optional
    /// catch-all "unmapped" accessor: an address not in any region
    /// tail-calls the map's unmapped accessor if one is registered, else
    /// traps.
    pub fn new(
        regions: Vec<Box<dyn GuestMemoryMap>>,
        unmapped: Option<Box<dyn GuestMemoryMap>>,
    ) -> Self {
        MemoryMap { regions, unmapped }
    }

    /// The regions in registration order, as consulted by the interpreter
    /// and by the inlined-fragment generator.
    pub fn regions(&self) -> &[Box<dyn GuestMemoryMap>] {
        &self.regions
    }

    /// Find the region claiming `addr`, falling back to the unmapped
    /// accessor if one is registered.
    pub fn region_for(&self, addr: GuestAddr) -> Option<&dyn GuestMemoryMap> {
        self.regions
            .iter()
            .find(|r| addr >= r.first_addr() && addr <= r.last_addr())
            .map(|b| b.as_ref())
            .or(self.unmapped.as_deref())
    }
}
