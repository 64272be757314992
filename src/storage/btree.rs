//! The B+Tree over disk pages.
//!
//! Each node lives on its own page; keys route through internal nodes and
//! key/value pairs live only in leaves, which are chained in key order for
//! range scans. A tree is parameterized by its branching factor `m`: a node
//! holds at most `2m - 1` keys, and every node except the root holds at
//! least `⌈m/2⌉ - 1`.
//!
//! No node stores a parent pointer. Inserts record the descent path in an
//! explicit stack and propagate splits back up it; deletes rebalance
//! proactively on the way down, so by the time the leaf is reached every
//! node on the path can afford to lose a key.

use super::node::{InternalNode, LeafNode, Node, NodePage};
use super::pager::Pager;
use crate::errors::Error;
use tracing::{debug, warn};

pub struct BTree<'p> {
    pager: &'p Pager,
    table: String,
    root: u32,
    branching: usize,
}

impl<'p> BTree<'p> {
    /// Opens the tree of an existing table, reading its root from metadata.
    pub fn load(pager: &'p Pager, table: &str, branching: usize) -> Result<Self, Error> {
        let root = pager
            .get_table_root(table)?
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
        Ok(BTree {
            pager,
            table: table.to_string(),
            root,
            branching,
        })
    }

    /// Creates an empty tree: one leaf page, registered as the table root.
    pub fn create(pager: &'p Pager, table: &str, branching: usize) -> Result<Self, Error> {
        let page_id = pager.allocate_page()?;
        pager.write_node(&Node::Leaf(LeafNode::new(page_id)))?;
        pager.set_table_root(table, page_id)?;
        debug!(table, root = page_id, "Created tree");
        Ok(BTree {
            pager,
            table: table.to_string(),
            root: page_id,
            branching,
        })
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    fn max_keys(&self) -> usize {
        2 * self.branching - 1
    }

    fn min_keys(&self) -> usize {
        (self.branching + 1) / 2 - 1
    }

    /// Points the tree (and the table metadata) at a new root page. The
    /// in-memory root is rolled back if the metadata write fails, so a retry
    /// starts from a consistent view.
    fn update_root(&mut self, new_root: u32) -> Result<(), Error> {
        let old = self.root;
        self.root = new_root;
        if let Err(e) = self.pager.set_table_root(&self.table, new_root) {
            self.root = old;
            return Err(e);
        }
        Ok(())
    }

    /// Looks a key up, returning its value on an exact match.
    pub fn search(&self, key: i64) -> Result<Option<Vec<u8>>, Error> {
        let mut node = self.pager.read_node(self.root)?;
        loop {
            match node {
                Node::Internal(internal) => {
                    let child = internal.children[internal.child_index(key)];
                    node = self.pager.read_node(child)?;
                }
                Node::Leaf(leaf) => {
                    return Ok(match leaf.keys.binary_search(&key) {
                        Ok(i) => Some(leaf.values[i].clone()),
                        Err(_) => None,
                    });
                }
            }
        }
    }

    /// Inserts a key/value pair. An existing key has its value overwritten
    /// in place; the tree structure never changes on an overwrite.
    pub fn insert(&mut self, key: i64, value: Vec<u8>) -> Result<(), Error> {
        let mut stack: Vec<(InternalNode, usize)> = Vec::new();
        let mut node = self.pager.read_node(self.root)?;
        let mut leaf = loop {
            match node {
                Node::Internal(internal) => {
                    let idx = internal.child_index(key);
                    let child = internal.children[idx];
                    stack.push((internal, idx));
                    node = self.pager.read_node(child)?;
                }
                Node::Leaf(leaf) => break leaf,
            }
        };

        match leaf.keys.binary_search(&key) {
            Ok(i) => {
                leaf.values[i] = value;
                return self.pager.write_node(&Node::Leaf(leaf));
            }
            Err(i) => {
                leaf.keys.insert(i, key);
                leaf.values.insert(i, value);
            }
        }

        let mut pending = if leaf.keys.len() > self.max_keys() {
            Some(self.split_leaf(leaf)?)
        } else {
            self.pager.write_node(&Node::Leaf(leaf))?;
            None
        };

        while let Some((separator, right_id)) = pending {
            match stack.pop() {
                Some((mut parent, idx)) => {
                    parent.keys.insert(idx, separator);
                    parent.children.insert(idx + 1, right_id);
                    pending = if parent.keys.len() > self.max_keys() {
                        Some(self.split_internal(parent)?)
                    } else {
                        self.pager.write_node(&Node::Internal(parent))?;
                        None
                    };
                }
                None => {
                    // The root itself split; the tree grows one level.
                    let page_id = self.pager.allocate_page()?;
                    let new_root = InternalNode {
                        page_id,
                        keys: vec![separator],
                        children: vec![self.root, right_id],
                    };
                    self.pager.write_node(&Node::Internal(new_root))?;
                    debug!(table = %self.table, root = page_id, "Root split");
                    self.update_root(page_id)?;
                    pending = None;
                }
            }
        }
        Ok(())
    }

    /// Splits an overflowing leaf at its median. The median key is copied up
    /// and stays as the first key of the new right sibling.
    fn split_leaf(&self, mut left: LeafNode) -> Result<(i64, u32), Error> {
        let mid = left.keys.len() / 2;
        let right_id = self.pager.allocate_page()?;
        let old_next = left.next_leaf;

        let right = LeafNode {
            page_id: right_id,
            keys: left.keys.split_off(mid),
            values: left.values.split_off(mid),
            next_leaf: old_next,
            prev_leaf: left.page_id,
        };
        left.next_leaf = right_id;
        let separator = right.keys[0];

        debug!(
            left = left.page_id,
            right = right_id,
            separator,
            "Splitting leaf node"
        );

        // The fresh sibling is unreachable until a parent references it, so
        // it goes to disk first.
        self.pager.write_node(&Node::Leaf(right))?;
        self.pager.write_node(&Node::Leaf(left))?;
        self.relink_successor(old_next, right_id)?;
        Ok((separator, right_id))
    }

    /// Splits an overflowing internal node at its median. The median key
    /// moves up and appears in neither half.
    fn split_internal(&self, mut left: InternalNode) -> Result<(i64, u32), Error> {
        let mid = left.keys.len() / 2;
        let separator = left.keys[mid];
        let right_id = self.pager.allocate_page()?;

        let right = InternalNode {
            page_id: right_id,
            keys: left.keys.split_off(mid + 1),
            children: left.children.split_off(mid + 1),
        };
        left.keys.pop();

        debug!(
            left = left.page_id,
            right = right_id,
            separator,
            "Splitting internal node"
        );

        self.pager.write_node(&Node::Internal(right))?;
        self.pager.write_node(&Node::Internal(left))?;
        Ok((separator, right_id))
    }

    /// Rewrites the back pointer of the leaf at `next_leaf`, if any.
    fn relink_successor(&self, next_leaf: u32, prev: u32) -> Result<(), Error> {
        if next_leaf == 0 {
            return Ok(());
        }
        match self.pager.read_node(next_leaf)? {
            Node::Leaf(mut succ) => {
                succ.prev_leaf = prev;
                self.pager.write_node(&Node::Leaf(succ))
            }
            Node::Internal(_) => Err(Error::Fatal(format!(
                "Leaf chain points at internal page {}",
                next_leaf
            ))),
        }
    }

    /// Removes a key. Fails with [`Error::KeyNotFound`] when absent; callers
    /// wanting idempotence filter that themselves.
    pub fn delete(&mut self, key: i64) -> Result<(), Error> {
        let mut root = self.pager.read_node(self.root)?;
        self.remove_from(&mut root, key)?;

        // A rootward merge can leave an internal root with a single child;
        // promote the child and the tree shrinks one level. An empty leaf
        // root stays: the table is simply empty.
        if let Node::Internal(internal) = &root {
            if internal.keys.is_empty() && internal.children.len() == 1 {
                let promoted = internal.children[0];
                let old_root = internal.page_id;
                self.update_root(promoted)?;
                if let Err(e) = self.pager.deallocate_page(old_root) {
                    warn!(page_id = old_root, error = %e, "Failed to deallocate old root page");
                }
                debug!(table = %self.table, root = promoted, "Root collapsed");
            }
        }
        Ok(())
    }

    fn remove_from(&self, node: &mut Node, key: i64) -> Result<(), Error> {
        match node {
            Node::Leaf(leaf) => {
                match leaf.keys.binary_search(&key) {
                    Ok(i) => {
                        leaf.keys.remove(i);
                        leaf.values.remove(i);
                    }
                    Err(_) => return Err(Error::KeyNotFound(key)),
                }
                self.pager.write_node(node)
            }
            Node::Internal(internal) => {
                let idx = internal.child_index(key);
                let mut child = self.pager.read_node(internal.children[idx])?;
                // Top up a minimal child before entering it, so the removal
                // below can never leave it underfull.
                if child.key_count() <= self.min_keys() {
                    child = self.rebalance(internal, idx, child)?;
                }
                self.remove_from(&mut child, key)
            }
        }
    }

    /// Brings the child at `idx` above the minimum key count, preferring to
    /// borrow from the left sibling, then the right, then merging. Returns
    /// the node the descent should continue into.
    fn rebalance(&self, parent: &mut InternalNode, idx: usize, child: Node) -> Result<Node, Error> {
        let min = self.min_keys();
        let left = match idx > 0 {
            true => Some(self.pager.read_node(parent.children[idx - 1])?),
            false => None,
        };
        let right = match idx + 1 < parent.children.len() {
            true => Some(self.pager.read_node(parent.children[idx + 1])?),
            false => None,
        };

        match (left, right) {
            (Some(left), _) if left.key_count() > min => {
                self.borrow_from_left(parent, idx, left, child)
            }
            (_, Some(right)) if right.key_count() > min => {
                self.borrow_from_right(parent, idx, right, child)
            }
            (Some(left), _) => self.merge_into_left(parent, idx, left, child),
            (_, Some(right)) => self.merge_with_right(parent, idx, child, right),
            (None, None) => Err(Error::Fatal(
                "Underfull node has no siblings to rebalance with".into(),
            )),
        }
    }

    fn borrow_from_left(
        &self,
        parent: &mut InternalNode,
        idx: usize,
        left: Node,
        child: Node,
    ) -> Result<Node, Error> {
        let sep = idx - 1;
        debug!(parent = parent.page_id, idx, "Borrowing from left sibling");
        match (left, child) {
            (Node::Leaf(mut left), Node::Leaf(mut child)) => {
                let key = left
                    .keys
                    .pop()
                    .ok_or_else(|| Error::Fatal("Left sibling has no key to lend".into()))?;
                let value = left
                    .values
                    .pop()
                    .ok_or_else(|| Error::Fatal("Left sibling has no value to lend".into()))?;
                child.keys.insert(0, key);
                child.values.insert(0, value);
                parent.keys[sep] = child.keys[0];

                self.pager.write_node(&Node::Leaf(left))?;
                let child = Node::Leaf(child);
                self.pager.write_node(&child)?;
                self.pager.write_node(&Node::Internal(parent.clone()))?;
                Ok(child)
            }
            (Node::Internal(mut left), Node::Internal(mut child)) => {
                // Rotate through the parent: the separator descends, the
                // sibling's boundary key ascends.
                let lent_key = left
                    .keys
                    .pop()
                    .ok_or_else(|| Error::Fatal("Left sibling has no key to lend".into()))?;
                let lent_child = left
                    .children
                    .pop()
                    .ok_or_else(|| Error::Fatal("Left sibling has no child to lend".into()))?;
                child.keys.insert(0, parent.keys[sep]);
                child.children.insert(0, lent_child);
                parent.keys[sep] = lent_key;

                self.pager.write_node(&Node::Internal(left))?;
                let child = Node::Internal(child);
                self.pager.write_node(&child)?;
                self.pager.write_node(&Node::Internal(parent.clone()))?;
                Ok(child)
            }
            _ => Err(Error::Fatal("Sibling node kinds differ".into())),
        }
    }

    fn borrow_from_right(
        &self,
        parent: &mut InternalNode,
        idx: usize,
        right: Node,
        child: Node,
    ) -> Result<Node, Error> {
        debug!(parent = parent.page_id, idx, "Borrowing from right sibling");
        match (child, right) {
            (Node::Leaf(mut child), Node::Leaf(mut right)) => {
                if right.keys.len() < 2 {
                    return Err(Error::Fatal(
                        "Right sibling cannot lend its only key".into(),
                    ));
                }
                let key = right.keys.remove(0);
                let value = right.values.remove(0);
                child.keys.push(key);
                child.values.push(value);
                parent.keys[idx] = right.keys[0];

                self.pager.write_node(&Node::Leaf(right))?;
                let child = Node::Leaf(child);
                self.pager.write_node(&child)?;
                self.pager.write_node(&Node::Internal(parent.clone()))?;
                Ok(child)
            }
            (Node::Internal(mut child), Node::Internal(mut right)) => {
                if right.keys.is_empty() || right.children.is_empty() {
                    return Err(Error::Fatal("Right sibling has nothing to lend".into()));
                }
                let lent_key = right.keys.remove(0);
                let lent_child = right.children.remove(0);
                child.keys.push(parent.keys[idx]);
                child.children.push(lent_child);
                parent.keys[idx] = lent_key;

                self.pager.write_node(&Node::Internal(right))?;
                let child = Node::Internal(child);
                self.pager.write_node(&child)?;
                self.pager.write_node(&Node::Internal(parent.clone()))?;
                Ok(child)
            }
            _ => Err(Error::Fatal("Sibling node kinds differ".into())),
        }
    }

    /// Folds the child into its left sibling, dropping the separator between
    /// them. The descent continues into the survivor.
    fn merge_into_left(
        &self,
        parent: &mut InternalNode,
        idx: usize,
        left: Node,
        child: Node,
    ) -> Result<Node, Error> {
        let separator = parent.keys.remove(idx - 1);
        parent.children.remove(idx);

        let (merged, freed) = match (left, child) {
            (Node::Leaf(mut left), Node::Leaf(child)) => {
                left.keys.extend(child.keys);
                left.values.extend(child.values);
                left.next_leaf = child.next_leaf;
                self.relink_successor(child.next_leaf, left.page_id)?;
                (Node::Leaf(left), child.page_id)
            }
            (Node::Internal(mut left), Node::Internal(child)) => {
                left.keys.push(separator);
                left.keys.extend(child.keys);
                left.children.extend(child.children);
                (Node::Internal(left), child.page_id)
            }
            _ => return Err(Error::Fatal("Sibling node kinds differ".into())),
        };

        debug!(
            merged = merged.page_id(),
            freed, "Merged node into left sibling"
        );
        self.pager.write_node(&merged)?;
        self.pager.write_node(&Node::Internal(parent.clone()))?;
        if let Err(e) = self.pager.deallocate_page(freed) {
            warn!(page_id = freed, error = %e, "Failed to deallocate merged page");
        }
        Ok(merged)
    }

    /// Folds the right sibling into the child. Used only when the child has
    /// no left sibling.
    fn merge_with_right(
        &self,
        parent: &mut InternalNode,
        idx: usize,
        child: Node,
        right: Node,
    ) -> Result<Node, Error> {
        let separator = parent.keys.remove(idx);
        parent.children.remove(idx + 1);

        let (merged, freed) = match (child, right) {
            (Node::Leaf(mut child), Node::Leaf(right)) => {
                child.keys.extend(right.keys);
                child.values.extend(right.values);
                child.next_leaf = right.next_leaf;
                self.relink_successor(right.next_leaf, child.page_id)?;
                (Node::Leaf(child), right.page_id)
            }
            (Node::Internal(mut child), Node::Internal(right)) => {
                child.keys.push(separator);
                child.keys.extend(right.keys);
                child.children.extend(right.children);
                (Node::Internal(child), right.page_id)
            }
            _ => return Err(Error::Fatal("Sibling node kinds differ".into())),
        };

        debug!(
            merged = merged.page_id(),
            freed, "Merged right sibling into node"
        );
        self.pager.write_node(&merged)?;
        self.pager.write_node(&Node::Internal(parent.clone()))?;
        if let Err(e) = self.pager.deallocate_page(freed) {
            warn!(page_id = freed, error = %e, "Failed to deallocate merged page");
        }
        Ok(merged)
    }

    /// Iterates every key/value pair in ascending key order.
    pub fn scan_all(&self) -> Result<Scan<'p>, Error> {
        Ok(Scan {
            pager: self.pager,
            leaf: Some(self.leftmost_leaf()?),
            pos: 0,
            end: None,
            inclusive_end: true,
            failed: false,
        })
    }

    /// Iterates the pairs whose keys fall inside the given bounds. An
    /// unbounded side is open-ended; a lower bound above the upper bound
    /// yields nothing.
    pub fn scan_range(
        &self,
        start: Option<i64>,
        end: Option<i64>,
        inclusive_start: bool,
        inclusive_end: bool,
    ) -> Result<Scan<'p>, Error> {
        let leaf = match start {
            Some(key) => self.leaf_for(key)?,
            None => self.leftmost_leaf()?,
        };
        let pos = match start {
            Some(key) if inclusive_start => leaf.keys.partition_point(|&k| k < key),
            Some(key) => leaf.keys.partition_point(|&k| k <= key),
            None => 0,
        };
        Ok(Scan {
            pager: self.pager,
            leaf: Some(leaf),
            pos,
            end,
            inclusive_end,
            failed: false,
        })
    }

    fn leftmost_leaf(&self) -> Result<LeafNode, Error> {
        let mut node = self.pager.read_node(self.root)?;
        loop {
            match node {
                Node::Internal(internal) => {
                    let first = *internal.children.first().ok_or_else(|| {
                        Error::Fatal(format!("Internal page {} has no children", internal.page_id))
                    })?;
                    node = self.pager.read_node(first)?;
                }
                Node::Leaf(leaf) => return Ok(leaf),
            }
        }
    }

    /// Descends to the leaf that would contain `key`.
    fn leaf_for(&self, key: i64) -> Result<LeafNode, Error> {
        let mut node = self.pager.read_node(self.root)?;
        loop {
            match node {
                Node::Internal(internal) => {
                    let child = internal.children[internal.child_index(key)];
                    node = self.pager.read_node(child)?;
                }
                Node::Leaf(leaf) => return Ok(leaf),
            }
        }
    }

    /// Number of levels from the root down to the leaves.
    pub fn height(&self) -> Result<usize, Error> {
        let mut height = 1;
        let mut node = self.pager.read_node(self.root)?;
        while let Node::Internal(internal) = node {
            height += 1;
            let first = *internal.children.first().ok_or_else(|| {
                Error::Fatal(format!("Internal page {} has no children", internal.page_id))
            })?;
            node = self.pager.read_node(first)?;
        }
        Ok(height)
    }

    /// Every page reachable from the root. Used when a table is dropped to
    /// hand its pages back to the allocator.
    pub fn pages(&self) -> Result<Vec<u32>, Error> {
        let mut pages = Vec::new();
        let mut stack = vec![self.root];
        while let Some(page_id) = stack.pop() {
            pages.push(page_id);
            if let Node::Internal(internal) = self.pager.read_node(page_id)? {
                stack.extend(internal.children.iter().copied());
            }
        }
        Ok(pages)
    }
}

/// Lazy iterator over the leaf chain.
pub struct Scan<'p> {
    pager: &'p Pager,
    leaf: Option<LeafNode>,
    pos: usize,
    end: Option<i64>,
    inclusive_end: bool,
    failed: bool,
}

impl Iterator for Scan<'_> {
    type Item = Result<(i64, Vec<u8>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let leaf = self.leaf.as_ref()?;
            if self.pos >= leaf.keys.len() {
                let next = leaf.next_leaf;
                if next == 0 {
                    self.leaf = None;
                    return None;
                }
                match self.pager.read_node(next) {
                    Ok(Node::Leaf(succ)) => {
                        self.leaf = Some(succ);
                        self.pos = 0;
                        continue;
                    }
                    Ok(Node::Internal(_)) => {
                        self.failed = true;
                        return Some(Err(Error::Fatal(format!(
                            "Leaf chain points at internal page {}",
                            next
                        ))));
                    }
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
            }

            let key = leaf.keys[self.pos];
            if let Some(end) = self.end {
                let past = if self.inclusive_end {
                    key > end
                } else {
                    key >= end
                };
                if past {
                    self.leaf = None;
                    return None;
                }
            }
            let value = leaf.values[self.pos].clone();
            self.pos += 1;
            return Some(Ok((key, value)));
        }
    }
}
