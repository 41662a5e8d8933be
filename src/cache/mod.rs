//! The two-level code cache: a direct-mapped hash table in
//! front of an arena-backed AVL tree, plus the old-root list that lets a
//! full invalidation hand a whole generation of entries off to
//! [`CodeCache::gc`] instead of freeing them inline.
//!
//! Ported from `code_cache.c`/`code_cache.h`.

pub mod avl;
pub mod entry;
pub mod table;

use avl::{AvlTree, NodeId};
use entry::CacheEntry;
use table::{HashTable, TRAMPOLINE_KEY};

use crate::error::JitError;
use crate::exec_mem::ExecMem;

/// `MAX_ENTRIES` from `code_cache.c`: a fatal safety bound on how many
/// distinct blocks one generation may hold. Existing purely to catch a
/// runaway compiler (e.g. self-modifying code thrashing the cache) before it
/// exhausts host memory; ordinary workloads stay far under it.
pub const MAX_ENTRIES: usize = 1024 * 1024;

/// Point-in-time snapshot for diagnostics/tests, mirroring the fields an
/// embedder would want out of `code_cache_stats`. The source has no such
/// struct — it only logs equivalent counters at `invalidate_all`/`gc`
/// time — but exposing them structurally is more useful to an embedder
/// than parsing log lines.
#[derive(Clone, Copy, Debug)]
pub struct CacheStats {
    pub live_entries: usize,
    pub tree_height: i32,
    pub old_generations: usize,
}

/// The cache itself. Owns the current generation's AVL tree, the hash-table
/// fast path over it, and every retired generation still waiting on [`gc`](CodeCache::gc).
pub struct CodeCache {
    tree: AvlTree<CacheEntry>,
    table: HashTable,
    old_roots: Vec<AvlTree<CacheEntry>>,
    n_entries: usize,
}

impl CodeCache {
    /// Mirrors `code_cache_init`: a fresh tree holding only the trampoline
    /// sentinel, with the hash table's default-fill pointed at it.
    pub fn new() -> Self {
        let mut tree = AvlTree::new();
        let trampoline = tree.find_or_insert(TRAMPOLINE_KEY, CacheEntry::trampoline);
        let mut table = HashTable::new();
        table.set_default(Some(trampoline));
        CodeCache {
            tree,
            table,
            old_roots: Vec::new(),
            n_entries: 1,
        }
    }

    /// Fast-path + slow-path lookup, mirroring `code_cache_find`. Always
    /// returns a live node: a miss allocates an empty, not-yet-compiled
    /// entry rather than returning `None`, since every guest address is
    /// compilable.
    pub fn find(&mut self, hash: u32) -> Result<NodeId, JitError> {
        if let Some(node) = self.table.lookup(hash) {
            return Ok(node);
        }
        let node = self.find_slow(hash)?;
        self.table.install(hash, node);
        Ok(node)
    }

    fn find_slow(&mut self, hash: u32) -> Result<NodeId, JitError> {
        if let Some(node) = self.tree.find(hash) {
            return Ok(node);
        }
        if self.n_entries >= MAX_ENTRIES {
            return Err(JitError::integrity(format!(
                "code cache exceeded MAX_ENTRIES ({})",
                MAX_ENTRIES
            )));
        }
        self.n_entries += 1;
        Ok(self.tree.find_or_insert(hash, CacheEntry::empty))
    }

    pub fn entry(&self, node: NodeId) -> &CacheEntry {
        self.tree.payload(node)
    }

    pub fn entry_mut(&mut self, node: NodeId) -> &mut CacheEntry {
        self.tree.payload_mut(node)
    }

    /// Retire the whole current generation onto the old-root list and start
    /// a fresh one. Mirrors `code_cache_invalidate_all`: entries aren't
    /// freed here, only made unreachable from the live tree/table, so a
    /// thread still mid-dispatch through an old block doesn't fault.
    pub fn invalidate_all(&mut self) {
        let retired = std::mem::replace(&mut self.tree, AvlTree::new());
        self.old_roots.push(retired);

        let trampoline = self.tree.find_or_insert(TRAMPOLINE_KEY, CacheEntry::trampoline);
        self.table.set_default(Some(trampoline));
        self.n_entries = 1;
    }

    /// Actually free every retired generation's entries (including their
    /// exec-memory allocations), then drop the trees. Mirrors
    /// `code_cache_gc`: called separately from `invalidate_all` so the
    /// embedder controls when it's safe to reclaim memory still referenced
    /// by an in-flight native call chain.
    pub fn gc(&mut self, exec_mem: &mut ExecMem) {
        for mut retired in self.old_roots.drain(..) {
            for entry in retired.payloads_mut() {
                if let Some(block) = entry.block.take() {
                    block.release(exec_mem);
                }
            }
        }

        #[cfg(any(debug_assertions, feature = "integrity-checks"))]
        exec_mem.check_integrity();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            live_entries: self.n_entries,
            tree_height: self.tree.tree_height(),
            old_generations: self.old_roots.len(),
        }
    }
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampoline_is_present_from_construction() {
        let cache = CodeCache::new();
        assert_eq!(cache.stats().live_entries, 1);
    }

    #[test]
    fn find_is_idempotent_for_the_same_hash() {
        let mut cache = CodeCache::new();
        let a = cache.find(0x1000).unwrap();
        let b = cache.find(0x1000).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.stats().live_entries, 2);
    }

    #[test]
    fn invalidate_all_resets_live_count_but_keeps_old_generation() {
        let mut cache = CodeCache::new();
        cache.find(0x1000).unwrap();
        cache.find(0x2000).unwrap();
        assert_eq!(cache.stats().live_entries, 3);

        cache.invalidate_all();
        assert_eq!(cache.stats().live_entries, 1);
        assert_eq!(cache.stats().old_generations, 1);

        // the previous generation's entry for this hash is unreachable now,
        // so this allocates a brand new node rather than finding the old one.
        cache.find(0x1000).unwrap();
        assert_eq!(cache.stats().live_entries, 2);
    }

    #[test]
    fn gc_drains_old_generations() {
        let mut cache = CodeCache::new();
        cache.find(0x1000).unwrap();
        cache.invalidate_all();
        cache.invalidate_all();
        assert_eq!(cache.stats().old_generations, 2);

        let mut exec_mem = ExecMem::new(64 * 1024).unwrap();
        cache.gc(&mut exec_mem);
        assert_eq!(cache.stats().old_generations, 0);
    }

    #[test]
    fn max_entries_is_enforced() {
        // Exercise the bound check directly against a tiny synthetic cap
        // rather than actually inserting a million entries.
        let mut cache = CodeCache::new();
        cache.n_entries = MAX_ENTRIES;
        assert!(cache.find(0xdead_beef).is_err());
    }
}
