//! Bit-trie mapping identifier suffixes to the servers that own them.
//!
//! Identifiers carry their shard in the low-order bits. The tree is walked from
//! bit 0 upwards: at every branch the current bit selects child `0` or `1`,
//! until a leaf names the owning server. Adding a server splits exactly one leaf,
//! so the shard space grows one bit at a time where it is needed.
//!
//! ```text
//!            root
//!           /    \
//!      bit0=0    bit0=1
//!       /  \       /  \
//!   b1=0  b1=1  b1=0  b1=1
//!    s0    s2    s1    s3
//! ```

use core::fmt;

/// A node of the routing tree.
#[derive(Clone, PartialEq, Eq)]
pub enum Node<S> {
    Leaf(S),
    Branch(Box<[Node<S>; 2]>),
}

impl<S: fmt::Debug> fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(server) => write!(f, "{server:?}"),
            Self::Branch(children) => f.debug_list().entries(children.iter()).finish(),
        }
    }
}

/// The outcome of a successful lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route<S> {
    /// Server owning the identifier.
    pub server: S,
    /// The identifier rebuilt from the bits consumed along the path; this is
    /// the shard suffix the server is responsible for.
    pub suffix: u64,
    /// Number of bits consumed to reach the leaf.
    pub depth: u32,
    /// The bits left over after the walk (`id >> depth`), i.e. the
    /// shard-relative sequence.
    pub offset: u64,
}

/// Routing tree over identifier bit suffixes.
#[derive(Clone, PartialEq, Eq)]
pub struct RoutingTree<S> {
    root: Option<Node<S>>,
}

impl<S> Default for RoutingTree<S> {
    fn default() -> Self {
        Self { root: None }
    }
}

impl<S: fmt::Debug> fmt::Debug for RoutingTree<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            None => f.write_str("[]"),
            Some(node) => node.fmt(f),
        }
    }
}

impl<S> RoutingTree<S> {
    pub const fn new() -> Self {
        Self { root: None }
    }

    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of servers (leaves) in the tree.
    pub fn len(&self) -> usize {
        fn count<S>(node: &Node<S>) -> usize {
            match node {
                Node::Leaf(_) => 1,
                Node::Branch(children) => count(&children[0]) + count(&children[1]),
            }
        }
        self.root.as_ref().map_or(0, count)
    }

    /// Length of the longest path from the root to a leaf.
    pub fn depth(&self) -> u32 {
        fn walk<S>(node: &Node<S>) -> u32 {
            match node {
                Node::Leaf(_) => 0,
                Node::Branch(children) => 1 + walk(&children[0]).max(walk(&children[1])),
            }
        }
        self.root.as_ref().map_or(0, walk)
    }

    /// Adds `server` as the owner of the shard that `id` routes to.
    ///
    /// The walk descends through branches using the low bits of `id`. The leaf
    /// it lands on is split on the next bit: `server` takes the child selected
    /// by that bit and the previous owner moves to the sibling.
    pub fn insert(&mut self, id: u64, server: S) {
        match self.root.take() {
            None => self.root = Some(Node::Leaf(server)),
            Some(node) => self.root = Some(insert_at(node, id, server)),
        }
    }

    /// Resolves the server owning `id`, together with the consumed suffix.
    pub fn get(&self, id: u64) -> Option<Route<&S>> {
        self.root.as_ref().map(|node| lookup(node, id, 0, 0))
    }

    /// Like [`Self::get`], but only matches when the path consumes every set
    /// bit of `id`, i.e. when `id` is exactly the suffix of a leaf rather than
    /// merely sharing its prefix.
    pub fn get_exactly(&self, id: u64) -> Option<Route<&S>> {
        self.get(id).filter(|route| route.offset == 0)
    }

    /// Iterates over `(suffix, depth, server)` for every leaf.
    pub fn leaves(&self) -> Vec<(u64, u32, &S)> {
        fn collect<'a, S>(
            node: &'a Node<S>,
            suffix: u64,
            depth: u32,
            out: &mut Vec<(u64, u32, &'a S)>,
        ) {
            match node {
                Node::Leaf(server) => out.push((suffix, depth, server)),
                Node::Branch(children) => {
                    collect(&children[0], suffix, depth + 1, out);
                    collect(&children[1], suffix | (1 << depth), depth + 1, out);
                }
            }
        }
        let mut out = Vec::with_capacity(self.len());
        if let Some(node) = &self.root {
            collect(node, 0, 0, &mut out);
        }
        out
    }
}

fn insert_at<S>(node: Node<S>, id: u64, server: S) -> Node<S> {
    match node {
        Node::Leaf(existing) => {
            if id & 1 == 0 {
                Node::Branch(Box::new([Node::Leaf(server), Node::Leaf(existing)]))
            } else {
                Node::Branch(Box::new([Node::Leaf(existing), Node::Leaf(server)]))
            }
        }
        Node::Branch(children) => {
            let [zero, one] = *children;
            if id & 1 == 0 {
                Node::Branch(Box::new([insert_at(zero, id >> 1, server), one]))
            } else {
                Node::Branch(Box::new([zero, insert_at(one, id >> 1, server)]))
            }
        }
    }
}

fn lookup<S>(node: &Node<S>, id: u64, suffix: u64, depth: u32) -> Route<&S> {
    match node {
        Node::Leaf(server) => Route {
            server,
            suffix,
            depth,
            offset: id,
        },
        Node::Branch(children) => {
            let bit = id & 1;
            lookup(
                &children[bit as usize],
                id >> 1,
                suffix | (bit << depth),
                depth + 1,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_servers() -> RoutingTree<&'static str> {
        let mut tree = RoutingTree::new();
        tree.insert(0, "s0");
        tree.insert(1, "s1");
        tree.insert(2, "s2");
        tree.insert(3, "s3");
        tree
    }

    #[test]
    fn empty_tree_has_no_routes() {
        let tree = RoutingTree::<u8>::new();
        assert!(tree.is_empty());
        assert_eq!(tree.get(7), None);
        assert_eq!(tree.get_exactly(0), None);
    }

    #[test]
    fn single_leaf_owns_everything() {
        let mut tree = RoutingTree::new();
        tree.insert(5, "only");
        let route = tree.get(5).unwrap();
        assert_eq!(*route.server, "only");
        assert_eq!(route.suffix, 0);
        assert_eq!(route.offset, 5);
        assert!(tree.get_exactly(5).is_none());
        assert_eq!(*tree.get_exactly(0).unwrap().server, "only");
    }

    #[test]
    fn inserted_servers_resolve_to_their_ids() {
        let tree = four_servers();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.depth(), 2);
        for (id, name) in [(0, "s0"), (1, "s1"), (2, "s2"), (3, "s3")] {
            let route = tree.get(id).unwrap();
            assert_eq!(*route.server, name);
            assert_eq!(route.suffix, id);
            assert_eq!(route.offset, 0);
            assert_eq!(tree.get_exactly(id), Some(route));
        }
    }

    #[test]
    fn shape_follows_low_bits() {
        let tree = four_servers();
        assert_eq!(format!("{tree:?}"), r#"[["s0", "s2"], ["s1", "s3"]]"#);
    }

    #[test]
    fn second_insert_moves_existing_to_sibling() {
        let mut tree = RoutingTree::new();
        tree.insert(0, "a");
        tree.insert(0, "b");
        assert_eq!(*tree.get(0).unwrap().server, "b");
        assert_eq!(*tree.get(1).unwrap().server, "a");
    }

    #[test]
    fn larger_ids_share_the_suffix_of_their_shard() {
        let tree = four_servers();
        // 14 = 0b1110: suffix 0b10 -> s2, two bits left over
        let route = tree.get(14).unwrap();
        assert_eq!(*route.server, "s2");
        assert_eq!(route.suffix, 2);
        assert_eq!(route.depth, 2);
        assert_eq!(route.offset, 3);
    }

    #[test]
    fn get_exactly_rejects_partial_prefix() {
        let tree = four_servers();
        assert!(tree.get(4).is_some());
        assert_eq!(tree.get_exactly(4), None);
        assert_eq!(tree.get_exactly(7), None);
    }

    #[test]
    fn uneven_tree_resolves_at_different_depths() {
        let mut tree = RoutingTree::new();
        tree.insert(0, "a");
        tree.insert(1, "b");
        tree.insert(1, "c");
        // [a, [c, b]]: odd ids go one level deeper
        assert_eq!(format!("{tree:?}"), r#"["a", ["c", "b"]]"#);
        assert_eq!(*tree.get(0).unwrap().server, "a");
        assert_eq!(tree.get(0).unwrap().depth, 1);
        let route = tree.get(1).unwrap();
        assert_eq!(*route.server, "c");
        assert_eq!(route.suffix, 1);
        assert_eq!(route.depth, 2);
        assert_eq!(*tree.get(3).unwrap().server, "b");
        assert_eq!(*tree.get_exactly(0).unwrap().server, "a");
        assert_eq!(tree.get_exactly(2), None);
    }

    #[test]
    fn leaves_report_suffixes() {
        let tree = four_servers();
        let mut leaves = tree.leaves();
        leaves.sort_by_key(|(suffix, _, _)| *suffix);
        let names: Vec<_> = leaves.iter().map(|(_, _, s)| **s).collect();
        assert_eq!(names, ["s0", "s1", "s2", "s3"]);
        assert!(leaves.iter().all(|(_, depth, _)| *depth == 2));
    }
}
