//! IL virtual registers ("slots").
//!
//! A slot is a `u32`-indexed entity reference, the same compact
//! opaque-index-into-a-table idiom `cranelift_entity::entity_impl!` uses for
//! `Value`/`Inst`/`Ebb` — but slots are typed at construction time (general,
//! float or host-pointer) since the builder must reject a use at the wrong
//! type, and there is no separate "entity data table": the slot's type *is*
//! its only associated data.

use std::fmt;

/// The maximum number of slots a single block may allocate.
pub const MAX_SLOTS: u32 = 8 * 1024;

/// The compile-time type of an IL slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// A 32-bit general-purpose integer.
    General,
    /// A 32-bit IEEE-754 float.
    Float,
    /// An opaque host pointer (captured CPU-state field, memory-map
    /// pointer, etc). Never touched arithmetically by IL ops; only moved,
    /// loaded through, or stored through.
    HostPtr,
}

/// A reference to a virtual register within one IL block.
///
/// `Slot`s are only meaningful relative to the `IlBlock` that allocated
/// them; there is no cross-block slot numbering.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(u32);

impl Slot {
    /// Build a slot reference from its raw index. Only the builder and the
    /// block's slot table should call this.
    pub(crate) fn from_u32(n: u32) -> Self {
        Slot(n)
    }

    /// The raw index, for indexing into parallel per-slot tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Owns slot allocation for one open block: an incrementing counter stamped
/// with each slot's type. There is no free list — slots live for the whole
/// block, and `DISCARD_SLOT` (inserted by the optimizer) only tells
/// the backend it may stop keeping a register or stack slot live for it.
#[derive(Clone, Debug, Default)]
pub struct SlotTable {
    types: Vec<SlotType>,
}

impl SlotTable {
    /// An empty slot table.
    pub fn new() -> Self {
        SlotTable { types: Vec::new() }
    }

    /// Allocate a new slot of the given type.
    pub fn alloc(&mut self, ty: SlotType) -> Result<Slot, crate::error::JitError> {
        if self.types.len() as u32 >= MAX_SLOTS {
            return Err(crate::error::JitError::Overflow {
                what: "slot count",
                detail: format!("exceeded MAX_SLOTS ({})", MAX_SLOTS),
            });
        }
        let slot = Slot::from_u32(self.types.len() as u32);
        self.types.push(ty);
        Ok(slot)
    }

    /// The type a slot was declared with.
    pub fn type_of(&self, slot: Slot) -> SlotType {
        self.types[slot.index()]
    }

    /// Number of slots allocated so far.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether any slots have been allocated.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
