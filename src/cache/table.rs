//! The hash-table half of the two-level code cache.
//!
//! Ported from `code_cache.h`/`code_cache.c`: a direct-mapped table of
//! `2^16` entries indexed by the low bits of the fingerprint. A slot holds a
//! tree [`NodeId`] plus the key it was filled with, so a hit can be
//! confirmed (`maybe->node.key == hash`) without following the pointer into
//! the tree; a miss or a stale key falls through to the AVL lookup.
//!
//! Invariant: every non-default slot here names a node that is still
//! reachable from the tree that produced it. That's maintained by
//! construction — entries are only ever written here
//! right after `AvlTree::find_or_insert` returns a live node, and the whole
//! table is reset whenever the tree is swapped out
//! ([`crate::cache::gc::invalidate_all`]).

use crate::cache::avl::NodeId;

/// `CODE_CACHE_HASH_TBL_SHIFT` / `_LEN` / `_MASK` from `code_cache.h`.
pub const HASH_TBL_SHIFT: u32 = 16;
pub const HASH_TBL_LEN: usize = 1 << HASH_TBL_SHIFT;
pub const HASH_TBL_MASK: u32 = (HASH_TBL_LEN - 1) as u32;

/// The fingerprint used for the permanent trampoline entry.
pub const TRAMPOLINE_KEY: u32 = 0xa000_0000;

#[derive(Clone, Copy)]
struct Slot {
    key: u32,
    node: NodeId,
}

/// Direct-mapped hash table over the code cache's AVL tree.
pub struct HashTable {
    slots: Box<[Option<Slot>]>,
    /// The node every slot is reset to on invalidation: the trampoline.
    default_node: Option<NodeId>,
}

impl HashTable {
    pub fn new() -> Self {
        HashTable {
            slots: vec![None; HASH_TBL_LEN].into_boxed_slice(),
            default_node: None,
        }
    }

    /// Set the node every slot resets to. Mirrors `code_cache_set_default`.
    pub fn set_default(&mut self, node: Option<NodeId>) {
        self.default_node = node;
        self.reset_to_default();
    }

    /// Refill every slot with the default (trampoline) entry. Mirrors the
    /// `for` loop in `code_cache_init`/`code_cache_invalidate_all`.
    pub fn reset_to_default(&mut self) {
        let fill = self.default_node.map(|node| Slot {
            key: TRAMPOLINE_KEY,
            node,
        });
        for slot in self.slots.iter_mut() {
            *slot = fill;
        }
    }

    /// Look up `hash` in the fast path. Returns the cached node only if the
    /// slot's stamped key still matches; otherwise the caller must fall
    /// back to the tree.
    pub fn lookup(&self, hash: u32) -> Option<NodeId> {
        let idx = (hash & HASH_TBL_MASK) as usize;
        match self.slots[idx] {
            Some(slot) if slot.key == hash => Some(slot.node),
            _ => None,
        }
    }

    /// Install `node` under `hash`'s slot, evicting whatever collided.
    /// Mirrors the assignment at the end of `code_cache_find`.
    pub fn install(&mut self, hash: u32, node: NodeId) {
        let idx = (hash & HASH_TBL_MASK) as usize;
        self.slots[idx] = Some(Slot { key: hash, node });
    }
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_until_installed() {
        let t = HashTable::new();
        assert!(t.lookup(0x1234).is_none());
    }

    #[test]
    fn stale_key_is_a_miss() {
        let mut t = HashTable::new();
        let fake = NodeId::from_usize_for_test(0);
        t.install(5, fake);
        // a different key that lands in the same bucket (low 16 bits equal)
        let colliding_key = 5 + (1u32 << HASH_TBL_SHIFT);
        assert!(t.lookup(colliding_key).is_none());
    }

    #[test]
    fn reset_clears_non_default_entries() {
        let mut t = HashTable::new();
        let fake = NodeId::from_usize_for_test(0);
        t.install(7, fake);
        assert!(t.lookup(7).is_some());
        t.reset_to_default();
        assert!(t.lookup(7).is_none());
    }
}
