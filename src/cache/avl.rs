//! Arena-backed AVL tree, keyed by a 32-bit fingerprint.
//!
//! Ported from `examples/original_source/src/libwashdc/avl.h`. The source
//! represents nodes as individually `malloc`'d structs linked by raw
//! `left`/`right`/`parent` pointers; here every node lives in one `Vec` and
//! is addressed by [`NodeId`], so a whole tree is torn down by dropping the
//! arena rather than recursively freeing nodes. The rotation and rebalance
//! logic is otherwise a direct, field-for-field port: same balance-factor
//! bookkeeping, same four rebalancing cases.
//!
//! There is no delete. The source never implements one either — cache
//! entries are retired by relocating the whole tree onto the old-root list,
//! not by removing individual nodes (see [`crate::cache::gc`]).

use std::fmt;

/// Index of a node within an [`AvlTree`]'s arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn from_usize(idx: usize) -> Self {
        NodeId(idx as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }

    /// Construct a `NodeId` without an arena, for tests that only need a
    /// stand-in key (e.g. exercising [`crate::cache::table::HashTable`] in
    /// isolation, without a backing [`AvlTree`]).
    #[cfg(test)]
    pub(crate) fn from_usize_for_test(idx: usize) -> Self {
        NodeId::from_usize(idx)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

struct AvlNode<T> {
    key: u32,
    bal: i8,
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    payload: T,
}

/// An AVL tree whose nodes carry a `T` payload, keyed by `u32`.
pub struct AvlTree<T> {
    nodes: Vec<AvlNode<T>>,
    root: Option<NodeId>,
}

impl<T> Default for AvlTree<T> {
    fn default() -> Self {
        AvlTree {
            nodes: Vec::new(),
            root: None,
        }
    }
}

impl<T> AvlTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn key(&self, id: NodeId) -> u32 {
        self.nodes[id.index()].key
    }

    pub fn payload(&self, id: NodeId) -> &T {
        &self.nodes[id.index()].payload
    }

    pub fn payload_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.nodes[id.index()].payload
    }

    /// Every payload in arena order (not tree order). Used by
    /// [`crate::cache::CodeCache::gc`] to release a retired generation's
    /// resources before the tree itself is dropped.
    pub fn payloads_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.nodes.iter_mut().map(|n| &mut n.payload)
    }

    /// Height of the whole tree, for [`crate::cache::CacheStats`].
    pub fn tree_height(&self) -> i32 {
        self.height(self.root)
    }

    /// Height of the subtree rooted at `id`, for use in debug-only balance
    /// checks. Ported from `avl_height`.
    fn height(&self, id: Option<NodeId>) -> i32 {
        match id {
            None => 0,
            Some(id) => {
                let node = &self.nodes[id.index()];
                1 + self.height(node.left).max(self.height(node.right))
            }
        }
    }

    /// Debug-only balance-factor check, ported from `avl_invariant`.
    #[cfg(any(debug_assertions, feature = "integrity-checks"))]
    pub fn check_invariant(&self) {
        if let Some(root) = self.root {
            self.check_invariant_at(root);
        }
    }

    #[cfg(any(debug_assertions, feature = "integrity-checks"))]
    fn check_invariant_at(&self, id: NodeId) {
        let node = &self.nodes[id.index()];
        let bal = self.height(node.right) - self.height(node.left);
        assert!(
            bal.abs() <= 1,
            "AVL node {:?} has balance {} (key {:#x})",
            id,
            bal,
            node.key
        );
        if let Some(left) = node.left {
            self.check_invariant_at(left);
        }
        if let Some(right) = node.right {
            self.check_invariant_at(right);
        }
    }

    /// Rotate the subtree right-wards so the left child becomes the root.
    /// Does not update balance factors; the caller must do that. Mirrors
    /// `avl_rot_right`.
    fn rot_right(&mut self, old_root: NodeId) {
        let parent = self.nodes[old_root.index()].parent;
        let new_root = self.nodes[old_root.index()].left.expect("rot_right needs a left child");
        let new_left_subtree = self.nodes[new_root.index()].right;

        if let Some(parent) = parent {
            if self.nodes[parent.index()].left == Some(old_root) {
                self.nodes[parent.index()].left = Some(new_root);
            } else {
                self.nodes[parent.index()].right = Some(new_root);
            }
        }

        self.nodes[new_root.index()].parent = parent;
        self.nodes[old_root.index()].parent = Some(new_root);
        if let Some(sub) = new_left_subtree {
            self.nodes[sub.index()].parent = Some(old_root);
        }

        self.nodes[old_root.index()].left = new_left_subtree;
        self.nodes[new_root.index()].right = Some(old_root);

        if self.root == Some(old_root) {
            self.root = Some(new_root);
        }
    }

    /// Rotate the subtree left-wards so the right child becomes the root.
    /// Mirrors `avl_rot_left`.
    fn rot_left(&mut self, old_root: NodeId) {
        let parent = self.nodes[old_root.index()].parent;
        let new_root = self.nodes[old_root.index()].right.expect("rot_left needs a right child");
        let new_right_subtree = self.nodes[new_root.index()].left;

        if let Some(parent) = parent {
            if self.nodes[parent.index()].left == Some(old_root) {
                self.nodes[parent.index()].left = Some(new_root);
            } else {
                self.nodes[parent.index()].right = Some(new_root);
            }
        }

        self.nodes[new_root.index()].parent = parent;
        self.nodes[old_root.index()].parent = Some(new_root);
        if let Some(sub) = new_right_subtree {
            self.nodes[sub.index()].parent = Some(old_root);
        }

        self.nodes[old_root.index()].right = new_right_subtree;
        self.nodes[new_root.index()].left = Some(old_root);

        if self.root == Some(old_root) {
            self.root = Some(new_root);
        }
    }

    /// Find the node for `key`, constructing one with `ctor` and rebalancing
    /// if absent. Mirrors `avl_find`, which folds insertion into the lookup
    /// miss path rather than exposing a separate insert.
    pub fn find_or_insert(&mut self, key: u32, ctor: impl FnOnce() -> T) -> NodeId {
        let mut cur = match self.root {
            Some(root) => root,
            None => return self.basic_insert(None, key, ctor),
        };
        loop {
            let node = &self.nodes[cur.index()];
            if key < node.key {
                match node.left {
                    Some(left) => cur = left,
                    None => return self.basic_insert(Some(cur), key, ctor),
                }
            } else if key > node.key {
                match node.right {
                    Some(right) => cur = right,
                    None => return self.basic_insert(Some(cur), key, ctor),
                }
            } else {
                return cur;
            }
        }
    }

    /// Like [`find_or_insert`](Self::find_or_insert), but returns `None`
    /// instead of creating a node. Mirrors `avl_find_noinsert`.
    pub fn find(&self, key: u32) -> Option<NodeId> {
        let mut cur = self.root?;
        loop {
            let node = &self.nodes[cur.index()];
            if key < node.key {
                cur = node.left?;
            } else if key > node.key {
                cur = node.right?;
            } else {
                return Some(cur);
            }
        }
    }

    fn basic_insert(&mut self, parent: Option<NodeId>, key: u32, ctor: impl FnOnce() -> T) -> NodeId {
        let id = NodeId::from_usize(self.nodes.len());
        self.nodes.push(AvlNode {
            key,
            bal: 0,
            left: None,
            right: None,
            parent,
            payload: ctor(),
        });

        match parent {
            Some(parent) => {
                if key < self.nodes[parent.index()].key {
                    self.nodes[parent.index()].left = Some(id);
                } else {
                    self.nodes[parent.index()].right = Some(id);
                }
            }
            None => self.root = Some(id),
        }

        // retrace to the root, rebalancing as needed.
        let mut cur_node = id;
        while Some(cur_node) != self.root {
            let parent = self.nodes[cur_node.index()].parent.expect("non-root node has a parent");
            if self.nodes[parent.index()].left == Some(cur_node) {
                match self.nodes[parent.index()].bal {
                    1 => {
                        self.nodes[parent.index()].bal = 0;
                        break;
                    }
                    0 => {
                        self.nodes[parent.index()].bal = -1;
                    }
                    -1 => {
                        if self.nodes[cur_node.index()].bal <= 0 {
                            self.rot_right(parent);
                            self.nodes[parent.index()].bal = 0;
                            self.nodes[cur_node.index()].bal = 0;
                        } else {
                            let child_bal =
                                self.nodes[self.nodes[cur_node.index()].right.unwrap().index()].bal;
                            self.rot_left(cur_node);
                            self.rot_right(parent);
                            if child_bal < 0 {
                                self.nodes[cur_node.index()].bal = 0;
                                self.nodes[parent.index()].bal = 1;
                            } else if child_bal > 0 {
                                self.nodes[cur_node.index()].bal = -1;
                                self.nodes[parent.index()].bal = 0;
                            } else {
                                self.nodes[cur_node.index()].bal = 0;
                                self.nodes[parent.index()].bal = 0;
                            }
                            let new_parent = self.nodes[cur_node.index()].parent.unwrap();
                            self.nodes[new_parent.index()].bal = 0;
                        }
                        break;
                    }
                    _ => unreachable!("invalid AVL balance factor"),
                }
            } else {
                match self.nodes[parent.index()].bal {
                    -1 => {
                        self.nodes[parent.index()].bal = 0;
                        break;
                    }
                    0 => {
                        self.nodes[parent.index()].bal = 1;
                    }
                    1 => {
                        if self.nodes[cur_node.index()].bal >= 0 {
                            self.rot_left(parent);
                            self.nodes[parent.index()].bal = 0;
                            self.nodes[cur_node.index()].bal = 0;
                        } else {
                            let child_bal =
                                self.nodes[self.nodes[cur_node.index()].left.unwrap().index()].bal;
                            self.rot_right(cur_node);
                            self.rot_left(parent);
                            if child_bal < 0 {
                                self.nodes[parent.index()].bal = 0;
                                self.nodes[cur_node.index()].bal = 1;
                            } else if child_bal > 0 {
                                self.nodes[cur_node.index()].bal = 0;
                                self.nodes[parent.index()].bal = -1;
                            } else {
                                self.nodes[cur_node.index()].bal = 0;
                                self.nodes[parent.index()].bal = 0;
                            }
                            let new_parent = self.nodes[cur_node.index()].parent.unwrap();
                            self.nodes[new_parent.index()].bal = 0;
                        }
                        break;
                    }
                    _ => unreachable!("invalid AVL balance factor"),
                }
            }
            cur_node = parent;
        }

        #[cfg(any(debug_assertions, feature = "integrity-checks"))]
        self.check_invariant();

        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_or_insert_creates_once() {
        let mut t: AvlTree<u32> = AvlTree::new();
        let a = t.find_or_insert(10, || 100);
        let b = t.find_or_insert(10, || 200);
        assert_eq!(a, b);
        assert_eq!(*t.payload(a), 100);
    }

    #[test]
    fn ascending_inserts_stay_balanced() {
        let mut t: AvlTree<()> = AvlTree::new();
        for key in 1..=5u32 {
            t.find_or_insert(key, || ());
        }
        let root = t.root().unwrap();
        assert_eq!(t.height(Some(root)), 3);
        t.check_invariant();
    }

    #[test]
    fn find_without_insert_misses_cleanly() {
        let mut t: AvlTree<u32> = AvlTree::new();
        t.find_or_insert(5, || 50);
        assert!(t.find(5).is_some());
        assert!(t.find(6).is_none());
        assert_eq!(t.len(), 1);
    }
}
