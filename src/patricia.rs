/*!
Binary Patricia trie keyed by variable-length prefixes.

One tree instance holds two roots, one per address family, so IPv4 and IPv6
prefixes can share a single container. Internal branching points that do not
correspond to a stored prefix are *glue* nodes; they always have exactly two
children and never carry user data.

Nodes live in an arena owned by the tree and are addressed by plain indices,
so parent/child links carry no ownership. [`NodeHandle`]s returned by
mutating and searching operations stay valid until the next `remove*` or
`clear` call on the tree.
*/
use crate::models::{first_differing_bit, bits_equal, Family, Prefix};
use bitflags::bitflags;
use std::cell::Cell;

bitflags! {
    /// How a prefix overlaps the contents of a tree.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct PfxOverlap: u8 {
        /// The exact prefix is present.
        const EXACT = 0b001;
        /// At least one covering (less specific) prefix is present.
        const LESS = 0b010;
        /// At least one covered (more specific) prefix is present.
        const MORE = 0b100;
    }
}

/// Callback verdict controlling a tree walk.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WalkControl {
    /// Keep walking.
    Continue,
    /// Stop walking in the current direction, continue with the next.
    EndDirection,
    /// Abort the whole walk.
    EndAll,
}

/// Reference to a node in a [`PatriciaTree`].
///
/// Handles are only handed out for nodes holding an actual prefix, and they
/// are invalidated by `remove`/`remove_node`/`clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Relation {
    SelfNode,
    Parent,
    Child,
    Sibling,
}

#[derive(Debug)]
struct Node<T> {
    prefix: Prefix,
    /// false marks a glue node
    actual: bool,
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    user: Option<T>,
}

/// Patricia trie over IPv4 and IPv6 prefixes with per-node user data.
#[derive(Debug, Default)]
pub struct PatriciaTree<T = ()> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    head4: Option<usize>,
    head6: Option<usize>,
    v4_count: u64,
    v6_count: u64,
}

impl<T> PatriciaTree<T> {
    pub fn new() -> Self {
        PatriciaTree {
            nodes: Vec::new(),
            free: Vec::new(),
            head4: None,
            head6: None,
            v4_count: 0,
            v6_count: 0,
        }
    }

    /// Number of stored (actual) prefixes of the given family.
    pub fn prefix_count(&self, family: Family) -> u64 {
        match family {
            Family::Ipv4 => self.v4_count,
            Family::Ipv6 => self.v6_count,
        }
    }

    /// The prefix stored at `handle`.
    pub fn prefix(&self, handle: NodeHandle) -> &Prefix {
        &self.nodes[handle.0].prefix
    }

    pub fn user(&self, handle: NodeHandle) -> Option<&T> {
        self.nodes[handle.0].user.as_ref()
    }

    pub fn user_mut(&mut self, handle: NodeHandle) -> Option<&mut T> {
        self.nodes[handle.0].user.as_mut()
    }

    /// Stores user data at `handle`, returning (and thereby dropping, if
    /// discarded) the previous value.
    pub fn set_user(&mut self, handle: NodeHandle, user: T) -> Option<T> {
        self.nodes[handle.0].user.replace(user)
    }

    pub fn take_user(&mut self, handle: NodeHandle) -> Option<T> {
        self.nodes[handle.0].user.take()
    }

    /// Inserts `pfx`, returning a handle to its node.
    ///
    /// Re-inserting an existing prefix returns the existing node unchanged;
    /// inserting at a glue position promotes the glue node in place.
    pub fn insert(&mut self, pfx: &Prefix) -> NodeHandle {
        let family = pfx.family();

        let Some(head) = self.head(family) else {
            let ix = self.alloc(pfx, true);
            self.set_head(family, Some(ix));
            return NodeHandle(ix);
        };

        let (node_it, relation, differ_bit) = self.find_insert_point(head, pfx);
        let bitlen = pfx.mask_len();

        match relation {
            Relation::SelfNode => {
                if !self.nodes[node_it].actual {
                    // promote the glue node
                    self.nodes[node_it].actual = true;
                    self.bump_count(family, 1);
                }
                NodeHandle(node_it)
            }
            Relation::Parent => {
                // append the new node as a child of node_it
                let new_ix = self.alloc(pfx, true);
                self.nodes[new_ix].parent = Some(node_it);
                let split = self.nodes[node_it].prefix.mask_len();
                if split < family.width() && pfx.bit(split) {
                    self.nodes[node_it].right = Some(new_ix);
                } else {
                    self.nodes[node_it].left = Some(new_ix);
                }
                NodeHandle(new_ix)
            }
            Relation::Child => {
                // attach the new node as the parent of node_it
                let new_ix = self.alloc(pfx, true);
                if bitlen < family.width() && self.nodes[node_it].prefix.bit(bitlen) {
                    self.nodes[new_ix].right = Some(node_it);
                } else {
                    self.nodes[new_ix].left = Some(node_it);
                }
                let grand = self.nodes[node_it].parent;
                self.nodes[new_ix].parent = grand;
                self.replace_child(grand, node_it, Some(new_ix), family);
                self.nodes[node_it].parent = Some(new_ix);
                NodeHandle(new_ix)
            }
            Relation::Sibling => {
                // branch both nodes off a new glue node at the differing bit
                let new_ix = self.alloc(pfx, true);
                let glue_ix = self.alloc(&pfx.masked_to(differ_bit), false);
                if differ_bit < family.width() && pfx.bit(differ_bit) {
                    self.nodes[glue_ix].right = Some(new_ix);
                    self.nodes[glue_ix].left = Some(node_it);
                } else {
                    self.nodes[glue_ix].right = Some(node_it);
                    self.nodes[glue_ix].left = Some(new_ix);
                }
                let grand = self.nodes[node_it].parent;
                self.nodes[glue_ix].parent = grand;
                self.replace_child(grand, node_it, Some(glue_ix), family);
                self.nodes[node_it].parent = Some(glue_ix);
                self.nodes[new_ix].parent = Some(glue_ix);
                NodeHandle(new_ix)
            }
        }
    }

    /// The node whose prefix equals `pfx`, if any.
    pub fn search_exact(&self, pfx: &Prefix) -> Option<NodeHandle> {
        let head = self.head(pfx.family())?;
        let ix = self.search_node(head, pfx);
        let node = &self.nodes[ix];
        if node.prefix.mask_len() != pfx.mask_len() || !node.actual {
            return None;
        }
        if bits_equal(&node.prefix.addr(), &pfx.addr(), pfx.mask_len()) {
            Some(NodeHandle(ix))
        } else {
            None
        }
    }

    /// Longest-prefix match for a single address.
    pub fn search_best(&self, addr: &std::net::IpAddr) -> Option<NodeHandle> {
        let pfx = Prefix::host(*addr);
        let head = self.head(pfx.family())?;

        let mut stack = Vec::new();
        let mut ix = head;
        loop {
            stack.push(ix);
            if self.nodes[ix].prefix.mask_len() >= pfx.mask_len() {
                break;
            }
            let next = if pfx.bit(self.nodes[ix].prefix.mask_len()) {
                self.nodes[ix].right
            } else {
                self.nodes[ix].left
            };
            match next {
                Some(n) => ix = n,
                None => break,
            }
        }

        while let Some(ix) = stack.pop() {
            let node = &self.nodes[ix];
            if node.actual && bits_equal(&node.prefix.addr(), &pfx.addr(), node.prefix.mask_len()) {
                return Some(NodeHandle(ix));
            }
        }
        None
    }

    /// Removes `pfx` and returns its user data. Removing a prefix that is
    /// not in the tree is a no-op.
    pub fn remove(&mut self, pfx: &Prefix) -> Option<T> {
        let handle = self.search_exact(pfx)?;
        self.remove_node(handle)
    }

    /// Removes the node behind `handle`, returning its user data.
    ///
    /// Invalidates all outstanding handles.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Option<T> {
        let ix = handle.0;
        if !self.nodes[ix].actual {
            return None;
        }
        let family = self.nodes[ix].prefix.family();
        let user = self.nodes[ix].user.take();

        match (self.nodes[ix].left, self.nodes[ix].right) {
            (Some(_), Some(_)) => {
                // both children: the node becomes a glue node
                self.nodes[ix].actual = false;
                self.bump_count(family, -1);
            }
            (None, None) => {
                let parent = self.nodes[ix].parent;
                self.release(ix);
                self.bump_count(family, -1);

                let Some(p) = parent else {
                    self.set_head(family, None);
                    return user;
                };

                let sibling = if self.nodes[p].right == Some(ix) {
                    self.nodes[p].right = None;
                    self.nodes[p].left
                } else {
                    self.nodes[p].left = None;
                    self.nodes[p].right
                };

                if self.nodes[p].actual {
                    return user;
                }

                // a one-child glue node is meaningless: splice it out
                let grand = self.nodes[p].parent;
                self.replace_child(grand, p, sibling, family);
                if let Some(s) = sibling {
                    self.nodes[s].parent = grand;
                }
                self.release(p);
            }
            (Some(child), None) | (None, Some(child)) => {
                let parent = self.nodes[ix].parent;
                self.nodes[child].parent = parent;
                self.release(ix);
                self.bump_count(family, -1);
                self.replace_child(parent, ix, Some(child), family);
            }
        }
        user
    }

    /// Inserts every actual prefix of `src` into this tree. User data is not
    /// carried over.
    pub fn merge<U>(&mut self, src: &PatriciaTree<U>) {
        self.merge_subtree(src, src.head4);
        self.merge_subtree(src, src.head6);
    }

    fn merge_subtree<U>(&mut self, src: &PatriciaTree<U>, ix: Option<usize>) {
        let Some(ix) = ix else { return };
        if src.nodes[ix].actual {
            self.insert(&src.nodes[ix].prefix);
        }
        self.merge_subtree(src, src.nodes[ix].left);
        self.merge_subtree(src, src.nodes[ix].right);
    }

    /// In-order walk over every actual prefix of both families.
    pub fn walk(&self, mut f: impl FnMut(&Self, NodeHandle) -> WalkControl) {
        if self.walk_children(self.head4, &mut f) != WalkControl::EndAll {
            self.walk_children(self.head6, &mut f);
        }
    }

    /// Traverses the tree relative to where `pfx` would be inserted:
    /// `on_exact` fires at an exact match, `on_parent` on covering prefixes
    /// walking upward, `on_child` in-order over covered prefixes. Each
    /// callback's [`WalkControl`] verdict is honored.
    pub fn walk_up_down(
        &self,
        pfx: &Prefix,
        mut on_exact: impl FnMut(&Self, NodeHandle) -> WalkControl,
        mut on_parent: impl FnMut(&Self, NodeHandle) -> WalkControl,
        mut on_child: impl FnMut(&Self, NodeHandle) -> WalkControl,
    ) {
        let Some(head) = self.head(pfx.family()) else {
            return;
        };
        let (node_it, relation, _) = self.find_insert_point(head, pfx);

        match relation {
            Relation::SelfNode => {
                if self.nodes[node_it].actual
                    && on_exact(self, NodeHandle(node_it)) == WalkControl::EndAll
                {
                    return;
                }
                if self.walk_parents(self.nodes[node_it].parent, &mut on_parent)
                    == WalkControl::EndAll
                {
                    return;
                }
                if self.walk_children(self.nodes[node_it].left, &mut on_child)
                    != WalkControl::Continue
                {
                    return;
                }
                self.walk_children(self.nodes[node_it].right, &mut on_child);
            }
            Relation::Parent => {
                self.walk_parents(Some(node_it), &mut on_parent);
            }
            Relation::Child => {
                if self.walk_parents(self.nodes[node_it].parent, &mut on_parent)
                    == WalkControl::EndAll
                {
                    return;
                }
                self.walk_children(Some(node_it), &mut on_child);
            }
            Relation::Sibling => {
                self.walk_parents(self.nodes[node_it].parent, &mut on_parent);
            }
        }
    }

    /// Mask of `{EXACT, LESS, MORE}` describing how `pfx` overlaps the
    /// stored prefixes.
    pub fn pfx_overlap_info(&self, pfx: &Prefix) -> PfxOverlap {
        let mask = Cell::new(PfxOverlap::empty());
        self.walk_up_down(
            pfx,
            |_, _| {
                mask.set(mask.get() | PfxOverlap::EXACT);
                WalkControl::EndDirection
            },
            |_, _| {
                mask.set(mask.get() | PfxOverlap::LESS);
                WalkControl::EndDirection
            },
            |_, _| {
                mask.set(mask.get() | PfxOverlap::MORE);
                WalkControl::EndDirection
            },
        );
        mask.get()
    }

    /// Overlap mask for a node already in the tree (EXACT is always set).
    pub fn node_overlap_info(&self, handle: NodeHandle) -> PfxOverlap {
        let mut mask = PfxOverlap::EXACT;

        let mut it = self.nodes[handle.0].parent;
        while let Some(ix) = it {
            if self.nodes[ix].actual {
                mask |= PfxOverlap::LESS;
                break;
            }
            it = self.nodes[ix].parent;
        }

        if self.subtree_has_actual(self.nodes[handle.0].left)
            || self.subtree_has_actual(self.nodes[handle.0].right)
        {
            mask |= PfxOverlap::MORE;
        }
        mask
    }

    /// Number of /24 blocks covered by the stored IPv4 prefixes.
    pub fn count_24subnets(&self) -> u64 {
        self.count_subnets(self.head4, 24)
    }

    /// Number of /64 blocks covered by the stored IPv6 prefixes.
    pub fn count_64subnets(&self) -> u64 {
        self.count_subnets(self.head6, 64)
    }

    /// Fills `out` with every stored prefix strictly inside the one at
    /// `handle`.
    pub fn more_specifics(&self, handle: NodeHandle, out: &mut ResultSet) {
        out.clear();
        self.add_more_specifics(out, self.nodes[handle.0].left, MAX_BITS + 1);
        self.add_more_specifics(out, self.nodes[handle.0].right, MAX_BITS + 1);
    }

    /// Fills `out` with every stored prefix strictly covering the one at
    /// `handle`, nearest first.
    pub fn less_specifics(&self, handle: NodeHandle, out: &mut ResultSet) {
        out.clear();
        self.add_less_specifics(out, self.nodes[handle.0].parent, MAX_BITS + 1);
    }

    /// Fills `out` with the nearest single covering prefix, if one exists.
    pub fn min_covering(&self, handle: NodeHandle, out: &mut ResultSet) {
        out.clear();
        self.add_less_specifics(out, self.nodes[handle.0].parent, 1);
    }

    /// Fills `out` with the topmost stored prefixes of a family, i.e. the
    /// minimal set covering everything stored.
    pub fn minimum_coverage(&self, family: Family, out: &mut ResultSet) {
        out.clear();
        self.add_more_specifics(out, self.head(family), 1);
    }

    /// Drops every node and all user data, keeping the allocation.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head4 = None;
        self.head6 = None;
        self.v4_count = 0;
        self.v6_count = 0;
    }

    /* ---------------- internal helpers ---------------- */

    fn head(&self, family: Family) -> Option<usize> {
        match family {
            Family::Ipv4 => self.head4,
            Family::Ipv6 => self.head6,
        }
    }

    fn set_head(&mut self, family: Family, ix: Option<usize>) {
        match family {
            Family::Ipv4 => self.head4 = ix,
            Family::Ipv6 => self.head6 = ix,
        }
    }

    fn bump_count(&mut self, family: Family, delta: i64) {
        let count = match family {
            Family::Ipv4 => &mut self.v4_count,
            Family::Ipv6 => &mut self.v6_count,
        };
        *count = count.wrapping_add_signed(delta);
    }

    fn alloc(&mut self, pfx: &Prefix, actual: bool) -> usize {
        if actual {
            self.bump_count(pfx.family(), 1);
        }
        let node = Node {
            prefix: *pfx,
            actual,
            parent: None,
            left: None,
            right: None,
            user: None,
        };
        match self.free.pop() {
            Some(ix) => {
                self.nodes[ix] = node;
                ix
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, ix: usize) {
        self.nodes[ix].user = None;
        self.nodes[ix].left = None;
        self.nodes[ix].right = None;
        self.nodes[ix].parent = None;
        self.nodes[ix].actual = false;
        self.free.push(ix);
    }

    /// Redirects the child slot of `parent` that pointed at `old` to `new`,
    /// or the family head when `parent` is `None`.
    fn replace_child(&mut self, parent: Option<usize>, old: usize, new: Option<usize>, family: Family) {
        match parent {
            None => self.set_head(family, new),
            Some(p) => {
                if self.nodes[p].right == Some(old) {
                    self.nodes[p].right = new;
                } else {
                    self.nodes[p].left = new;
                }
            }
        }
    }

    /// Descends from `ix` toward `pfx`, stopping at the deepest reachable
    /// node whose mask is not shorter than the target's.
    fn search_node(&self, mut ix: usize, pfx: &Prefix) -> usize {
        while self.nodes[ix].prefix.mask_len() < pfx.mask_len() {
            let next = if pfx.bit(self.nodes[ix].prefix.mask_len()) {
                self.nodes[ix].right
            } else {
                self.nodes[ix].left
            };
            match next {
                Some(n) => ix = n,
                None => return ix,
            }
        }
        ix
    }

    fn find_insert_point(&self, head: usize, pfx: &Prefix) -> (usize, Relation, u8) {
        let mut ix = self.search_node(head, pfx);
        let bitlen = pfx.mask_len();

        let check_bit = self.nodes[ix].prefix.mask_len().min(bitlen);
        let differ_bit =
            first_differing_bit(&pfx.addr(), &self.nodes[ix].prefix.addr(), check_bit);

        // climb back up to the highest node sharing all leading bits
        while let Some(p) = self.nodes[ix].parent {
            if self.nodes[p].prefix.mask_len() < differ_bit {
                break;
            }
            ix = p;
        }

        let relation = if differ_bit == bitlen && self.nodes[ix].prefix.mask_len() == bitlen {
            Relation::SelfNode
        } else if self.nodes[ix].prefix.mask_len() == differ_bit {
            Relation::Parent
        } else if bitlen == differ_bit {
            Relation::Child
        } else {
            Relation::Sibling
        };
        (ix, relation, differ_bit)
    }

    fn walk_children(
        &self,
        ix: Option<usize>,
        f: &mut impl FnMut(&Self, NodeHandle) -> WalkControl,
    ) -> WalkControl {
        let Some(ix) = ix else {
            return WalkControl::Continue;
        };

        let rc = self.walk_children(self.nodes[ix].left, f);
        if rc != WalkControl::Continue {
            return rc;
        }
        if self.nodes[ix].actual {
            let rc = f(self, NodeHandle(ix));
            if rc != WalkControl::Continue {
                return rc;
            }
        }
        self.walk_children(self.nodes[ix].right, f)
    }

    fn walk_parents(
        &self,
        mut it: Option<usize>,
        f: &mut impl FnMut(&Self, NodeHandle) -> WalkControl,
    ) -> WalkControl {
        while let Some(ix) = it {
            if self.nodes[ix].actual {
                let rc = f(self, NodeHandle(ix));
                if rc != WalkControl::Continue {
                    return rc;
                }
            }
            it = self.nodes[ix].parent;
        }
        WalkControl::Continue
    }

    fn subtree_has_actual(&self, ix: Option<usize>) -> bool {
        let Some(ix) = ix else { return false };
        self.nodes[ix].actual
            || self.subtree_has_actual(self.nodes[ix].left)
            || self.subtree_has_actual(self.nodes[ix].right)
    }

    fn count_subnets(&self, ix: Option<usize>, subnet_size: u8) -> u64 {
        let Some(ix) = ix else { return 0 };
        let node = &self.nodes[ix];
        if !node.actual {
            // a glue node at or below the subnet size covers one block even
            // if the subtree does not fill it
            if node.prefix.mask_len() >= subnet_size {
                return 1;
            }
            return self.count_subnets(node.left, subnet_size)
                + self.count_subnets(node.right, subnet_size);
        }
        if node.prefix.mask_len() >= subnet_size {
            1
        } else {
            let diff = subnet_size - node.prefix.mask_len();
            if diff >= 64 {
                u64::MAX
            } else {
                1u64 << diff
            }
        }
    }

    /// Pre-order collection of actual nodes; `depth` limits how many actual
    /// nodes may be collected along any root-to-leaf path.
    fn add_more_specifics(&self, out: &mut ResultSet, ix: Option<usize>, depth: u16) {
        let Some(ix) = ix else { return };
        if depth == 0 {
            return;
        }
        let mut d = depth;
        if self.nodes[ix].actual {
            out.items.push(ix);
            d -= 1;
        }
        self.add_more_specifics(out, self.nodes[ix].left, d);
        self.add_more_specifics(out, self.nodes[ix].right, d);
    }

    fn add_less_specifics(&self, out: &mut ResultSet, mut it: Option<usize>, depth: u16) {
        let mut d = depth;
        while let Some(ix) = it {
            if d == 0 {
                break;
            }
            if self.nodes[ix].actual {
                out.items.push(ix);
                d -= 1;
            }
            it = self.nodes[ix].parent;
        }
    }
}

const MAX_BITS: u16 = 128;

/// Reusable container for node handles produced by tree queries.
///
/// The handles borrow nothing, so one set can be filled repeatedly across
/// queries; they are only meaningful against the tree that filled them and
/// become stale after that tree is mutated by a removal.
#[derive(Debug, Default)]
pub struct ResultSet {
    items: Vec<usize>,
    cursor: usize,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = 0;
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn next(&mut self) -> Option<NodeHandle> {
        let handle = self.items.get(self.cursor).copied().map(NodeHandle);
        if handle.is_some() {
            self.cursor += 1;
        }
        handle
    }

    /// Iterates the collected handles without touching the cursor.
    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.items.iter().copied().map(NodeHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::str::FromStr;

    fn pfx(s: &str) -> Prefix {
        Prefix::from_str(s).unwrap()
    }

    fn prefixes<T>(tree: &PatriciaTree<T>, set: &ResultSet) -> Vec<String> {
        set.handles().map(|h| tree.prefix(h).to_string()).collect()
    }

    #[test]
    fn test_insert_and_search_exact() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        for s in ["10.0.0.0/8", "10.1.0.0/16", "192.168.0.0/24", "2001:db8::/32"] {
            tree.insert(&pfx(s));
        }
        assert_eq!(tree.prefix_count(Family::Ipv4), 3);
        assert_eq!(tree.prefix_count(Family::Ipv6), 1);

        let h = tree.search_exact(&pfx("10.1.0.0/16")).unwrap();
        assert_eq!(tree.prefix(h), &pfx("10.1.0.0/16"));
        assert!(tree.search_exact(&pfx("10.2.0.0/16")).is_none());
        assert!(tree.search_exact(&pfx("10.0.0.0/9")).is_none());
    }

    #[test]
    fn test_repeat_insert_keeps_counters() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        let a = tree.insert(&pfx("10.0.0.0/8"));
        let b = tree.insert(&pfx("10.0.0.0/8"));
        assert_eq!(a, b);
        assert_eq!(tree.prefix_count(Family::Ipv4), 1);
    }

    #[test]
    fn test_glue_promotion() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        // 10.0.0.0/8 and 11.0.0.0/8 share a glue node at 10.0.0.0/7
        tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("11.0.0.0/8"));
        assert_eq!(tree.prefix_count(Family::Ipv4), 2);
        assert!(tree.search_exact(&pfx("10.0.0.0/7")).is_none());

        let h = tree.insert(&pfx("10.0.0.0/7"));
        assert_eq!(tree.prefix(h), &pfx("10.0.0.0/7"));
        assert_eq!(tree.prefix_count(Family::Ipv4), 3);
        assert!(tree.search_exact(&pfx("10.0.0.0/7")).is_some());
    }

    #[test]
    fn test_search_best() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("10.1.0.0/16"));
        tree.insert(&pfx("10.1.2.0/24"));

        let best = |tree: &PatriciaTree, s: &str| {
            tree.search_best(&IpAddr::from_str(s).unwrap())
                .map(|h| tree.prefix(h).to_string())
        };
        assert_eq!(best(&tree, "10.1.2.3").unwrap(), "10.1.2.0/24");
        assert_eq!(best(&tree, "10.1.9.9").unwrap(), "10.1.0.0/16");
        assert_eq!(best(&tree, "10.9.9.9").unwrap(), "10.0.0.0/8");
        assert!(best(&tree, "11.0.0.1").is_none());

        tree.insert(&pfx("0.0.0.0/0"));
        assert_eq!(best(&tree, "11.0.0.1").unwrap(), "0.0.0.0/0");
    }

    #[test]
    fn test_remove_leaf_and_glue_cleanup() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("11.0.0.0/8"));
        tree.remove(&pfx("11.0.0.0/8"));
        // the glue node above them must be gone too
        assert_eq!(tree.prefix_count(Family::Ipv4), 1);
        assert!(tree.search_exact(&pfx("10.0.0.0/8")).is_some());
        assert_eq!(
            tree.search_best(&IpAddr::from_str("10.2.3.4").unwrap())
                .map(|h| tree.prefix(h).to_string())
                .unwrap(),
            "10.0.0.0/8"
        );
    }

    #[test]
    fn test_remove_node_with_both_children_demotes() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/7"));
        tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("11.0.0.0/8"));
        tree.remove(&pfx("10.0.0.0/7"));
        assert_eq!(tree.prefix_count(Family::Ipv4), 2);
        assert!(tree.search_exact(&pfx("10.0.0.0/7")).is_none());
        assert!(tree.search_exact(&pfx("10.0.0.0/8")).is_some());
        assert!(tree.search_exact(&pfx("11.0.0.0/8")).is_some());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/8"));
        assert!(tree.remove(&pfx("12.0.0.0/8")).is_none());
        assert_eq!(tree.prefix_count(Family::Ipv4), 1);
    }

    #[test]
    fn test_user_data_dropped_on_overwrite_and_remove() {
        let mut tree: PatriciaTree<String> = PatriciaTree::new();
        let h = tree.insert(&pfx("10.0.0.0/8"));
        assert!(tree.set_user(h, "first".to_string()).is_none());
        assert_eq!(tree.set_user(h, "second".to_string()).as_deref(), Some("first"));
        assert_eq!(tree.user(h).map(String::as_str), Some("second"));
        assert_eq!(tree.remove(&pfx("10.0.0.0/8")).as_deref(), Some("second"));
    }

    #[test]
    fn test_walk_up_down_sibling_relation() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("11.0.0.0/8"));

        let mut exact = 0;
        let mut parents = Vec::new();
        let mut children = 0;
        tree.walk_up_down(
            &pfx("10.128.0.0/9"),
            |_, _| {
                exact += 1;
                WalkControl::Continue
            },
            |t, h| {
                parents.push(t.prefix(h).to_string());
                WalkControl::Continue
            },
            |_, _| {
                children += 1;
                WalkControl::Continue
            },
        );
        assert_eq!(exact, 0);
        assert_eq!(parents, vec!["10.0.0.0/8".to_string()]);
        assert_eq!(children, 0);
    }

    #[test]
    fn test_walk_up_down_self_relation() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("10.0.0.0/16"));
        tree.insert(&pfx("10.0.1.0/24"));
        tree.insert(&pfx("10.1.0.0/16"));

        let mut exact = Vec::new();
        let mut parents = Vec::new();
        let mut children = Vec::new();
        tree.walk_up_down(
            &pfx("10.0.0.0/16"),
            |t, h| {
                exact.push(t.prefix(h).to_string());
                WalkControl::Continue
            },
            |t, h| {
                parents.push(t.prefix(h).to_string());
                WalkControl::Continue
            },
            |t, h| {
                children.push(t.prefix(h).to_string());
                WalkControl::Continue
            },
        );
        assert_eq!(exact, vec!["10.0.0.0/16".to_string()]);
        assert_eq!(parents, vec!["10.0.0.0/8".to_string()]);
        assert_eq!(children, vec!["10.0.1.0/24".to_string()]);
    }

    #[test]
    fn test_walk_early_termination() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        for s in ["10.0.0.0/8", "10.0.0.0/16", "10.0.0.0/24", "10.0.0.0/28"] {
            tree.insert(&pfx(s));
        }
        let mut seen = 0;
        tree.walk_up_down(
            &pfx("10.0.0.0/8"),
            |_, _| WalkControl::Continue,
            |_, _| WalkControl::Continue,
            |_, _| {
                seen += 1;
                WalkControl::EndAll
            },
        );
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_pfx_overlap_info() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("10.0.0.0/24"));

        assert_eq!(
            tree.pfx_overlap_info(&pfx("10.0.0.0/16")),
            PfxOverlap::LESS | PfxOverlap::MORE
        );
        assert_eq!(tree.pfx_overlap_info(&pfx("10.0.0.0/8")), PfxOverlap::EXACT | PfxOverlap::MORE);
        assert_eq!(tree.pfx_overlap_info(&pfx("10.0.0.0/28")), PfxOverlap::LESS);
        assert_eq!(tree.pfx_overlap_info(&pfx("172.16.0.0/12")), PfxOverlap::empty());
    }

    #[test]
    fn test_node_overlap_info() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        let top = tree.insert(&pfx("10.0.0.0/8"));
        let mid = tree.insert(&pfx("10.0.0.0/16"));
        let leaf = tree.insert(&pfx("10.0.0.0/24"));

        assert_eq!(tree.node_overlap_info(top), PfxOverlap::EXACT | PfxOverlap::MORE);
        assert_eq!(
            tree.node_overlap_info(mid),
            PfxOverlap::EXACT | PfxOverlap::LESS | PfxOverlap::MORE
        );
        assert_eq!(tree.node_overlap_info(leaf), PfxOverlap::EXACT | PfxOverlap::LESS);
    }

    #[test]
    fn test_more_less_specifics() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/8"));
        let mid = tree.insert(&pfx("10.0.0.0/16"));
        tree.insert(&pfx("10.0.1.0/24"));
        tree.insert(&pfx("10.0.2.0/24"));

        let mut set = ResultSet::new();
        tree.more_specifics(mid, &mut set);
        let mut more = prefixes(&tree, &set);
        more.sort();
        assert_eq!(more, vec!["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()]);

        tree.less_specifics(mid, &mut set);
        assert_eq!(prefixes(&tree, &set), vec!["10.0.0.0/8".to_string()]);

        tree.min_covering(mid, &mut set);
        assert_eq!(set.count(), 1);
        assert_eq!(prefixes(&tree, &set), vec!["10.0.0.0/8".to_string()]);
    }

    #[test]
    fn test_minimum_coverage() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("10.0.0.0/16"));
        tree.insert(&pfx("192.168.0.0/16"));

        let mut set = ResultSet::new();
        tree.minimum_coverage(Family::Ipv4, &mut set);
        let mut top = prefixes(&tree, &set);
        top.sort();
        assert_eq!(top, vec!["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()]);
    }

    #[test]
    fn test_count_subnets() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("10.0.0.0/23"));
        assert_eq!(tree.count_24subnets(), 2);
        tree.insert(&pfx("10.0.0.0/24"));
        assert_eq!(tree.count_24subnets(), 2);
        tree.insert(&pfx("192.0.2.128/25"));
        assert_eq!(tree.count_24subnets(), 3);

        tree.insert(&pfx("2001:db8::/32"));
        assert_eq!(tree.count_64subnets(), 1u64 << 32);
    }

    #[test]
    fn test_merge() {
        let mut a: PatriciaTree = PatriciaTree::new();
        a.insert(&pfx("10.0.0.0/8"));
        let mut b: PatriciaTree = PatriciaTree::new();
        b.insert(&pfx("10.0.0.0/8"));
        b.insert(&pfx("172.16.0.0/12"));
        b.insert(&pfx("2001:db8::/32"));

        a.merge(&b);
        assert_eq!(a.prefix_count(Family::Ipv4), 2);
        assert_eq!(a.prefix_count(Family::Ipv6), 1);
    }

    #[test]
    fn test_result_set_cursor() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        let top = tree.insert(&pfx("10.0.0.0/8"));
        tree.insert(&pfx("10.0.0.0/16"));
        tree.insert(&pfx("10.0.0.0/24"));

        let mut set = ResultSet::new();
        tree.more_specifics(top, &mut set);
        assert_eq!(set.count(), 2);
        assert!(set.next().is_some());
        assert!(set.next().is_some());
        assert!(set.next().is_none());
        set.rewind();
        assert!(set.next().is_some());
    }

    #[test]
    fn test_boundary_masks() {
        let mut tree: PatriciaTree = PatriciaTree::new();
        tree.insert(&pfx("0.0.0.0/0"));
        tree.insert(&pfx("255.255.255.255/32"));
        tree.insert(&pfx("::/0"));
        tree.insert(&pfx("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff/128"));

        assert!(tree.search_exact(&pfx("0.0.0.0/0")).is_some());
        assert!(tree.search_exact(&pfx("255.255.255.255/32")).is_some());
        assert!(tree.search_exact(&pfx("::/0")).is_some());
        assert_eq!(tree.prefix_count(Family::Ipv4), 2);
        assert_eq!(tree.prefix_count(Family::Ipv6), 2);
    }

    #[test]
    fn test_clear() {
        let mut tree: PatriciaTree<u32> = PatriciaTree::new();
        let h = tree.insert(&pfx("10.0.0.0/8"));
        tree.set_user(h, 7);
        tree.clear();
        assert_eq!(tree.prefix_count(Family::Ipv4), 0);
        assert!(tree.search_exact(&pfx("10.0.0.0/8")).is_none());
        tree.insert(&pfx("10.0.0.0/8"));
        assert_eq!(tree.prefix_count(Family::Ipv4), 1);
    }
}
