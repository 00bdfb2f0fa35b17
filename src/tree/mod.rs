use std::fmt::{Display, Formatter};

use crate::alignment::TaxonId;
use crate::blocks::{LhBlock, ParsBlock, ScaleBlock};

/// An index into the tree's node arena which uniquely identifies a node.
/// The newtype ensures node indices aren't mixed up with taxon indices.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(pub(crate) usize);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The directed half of an edge, stored on the node it belongs to. The slot
/// pointing from `u` at `v` owns the cached computation state for the subtree
/// rooted at `v`, looking away from `u`, so that the two slots of an edge
/// together summarize the entire tree.
///
/// A slot whose `node` is `None` is a detached spare: it keeps its blocks but
/// takes no part in the topology until [`PhyloTree::attach_neighbor`] claims
/// it. Spares let trial splicing reuse the same blocks on every attempt.
#[derive(Clone, Debug)]
pub struct Neighbor {
    pub(crate) node: Option<NodeId>,
    pub(crate) length: f64,
    pub(crate) partial_pars: Option<ParsBlock>,
    pub(crate) partial_lh: Option<LhBlock>,
    pub(crate) scale_num: Option<ScaleBlock>,
    pub(crate) pars_computed: bool,
    pub(crate) lh_computed: bool,
}

impl Neighbor {
    fn new(node: Option<NodeId>, length: f64) -> Self {
        Self {
            node,
            length,
            partial_pars: None,
            partial_lh: None,
            scale_num: None,
            pars_computed: false,
            lh_computed: false,
        }
    }

    /// The node this slot points at, `None` for detached spares.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Branch length towards the opposite node.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Whether the slot's partial parsimony vector is up to date. A slot with
    /// a cleared flag may still hold stale bytes; readers must recompute.
    pub fn is_parsimony_computed(&self) -> bool {
        self.pars_computed
    }

    pub(crate) fn clear_computed_flags(&mut self) {
        self.pars_computed = false;
        self.lh_computed = false;
    }
}

/// A node of the tree: a leaf carrying a taxon, or an unnamed interior node
/// of degree three once the tree is fully built.
#[derive(Clone, Debug)]
pub struct PhyloNode {
    taxon: Option<TaxonId>,
    name: Option<String>,
    neighbors: Vec<Neighbor>,
}

/// An unrooted binary phylogenetic tree over arena-allocated nodes. Every
/// edge exists as two mutually consistent neighbor slots; surgery goes
/// through [`update_neighbor`], [`attach_neighbor`] and [`find_neighbor`] so
/// the pairing never breaks.
///
/// [`update_neighbor`]: PhyloTree::update_neighbor
/// [`attach_neighbor`]: PhyloTree::attach_neighbor
/// [`find_neighbor`]: PhyloTree::find_neighbor
pub struct PhyloTree {
    nodes: Vec<PhyloNode>,
    /// A node known to belong to the main tree, used as traversal origin.
    root: Option<NodeId>,
}

impl PhyloTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Create a new unconnected interior node.
    pub fn new_node(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PhyloNode {
            taxon: None,
            name: None,
            neighbors: Vec::new(),
        });
        id
    }

    /// Create a new unconnected leaf for the given taxon.
    pub fn new_leaf(&mut self, taxon: TaxonId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PhyloNode {
            taxon: Some(taxon),
            name: Some(name.to_string()),
            neighbors: Vec::new(),
        });
        id
    }

    /// Connect two nodes with an edge of the given length, creating the slot
    /// on each side. The first edge added anchors tree traversals.
    pub fn add_edge(&mut self, u: NodeId, v: NodeId, length: f64) {
        self.attach_neighbor(u, v, length);
        self.attach_neighbor(v, u, length);
        if self.root.is_none() {
            self.root = Some(u);
        }
    }

    /// Add a one-sided slot on `u` pointing at `v`, reusing a detached spare
    /// slot if one exists.
    pub fn attach_neighbor(&mut self, u: NodeId, v: NodeId, length: f64) {
        let node = &mut self.nodes[u.0];
        if let Some(spare) = node.neighbors.iter_mut().find(|n| n.node.is_none()) {
            spare.node = Some(v);
            spare.length = length;
        } else {
            node.neighbors.push(Neighbor::new(Some(v), length));
        }
    }

    /// Add a detached spare slot on `u` and return its index.
    pub(crate) fn add_spare_slot(&mut self, u: NodeId) -> usize {
        let node = &mut self.nodes[u.0];
        node.neighbors.push(Neighbor::new(None, -1.0));
        node.neighbors.len() - 1
    }

    /// Detach the slot on `u` pointing at `v`, turning it back into a spare.
    /// Its blocks stay bound, its computed flags are cleared.
    pub(crate) fn detach_neighbor(&mut self, u: NodeId, v: NodeId) -> bool {
        match self.find_neighbor(u, v) {
            Some(index) => {
                let slot = &mut self.nodes[u.0].neighbors[index];
                slot.node = None;
                slot.clear_computed_flags();
                true
            }
            None => false,
        }
    }

    /// Find the index of the slot on `u` pointing at `v`. Linear scan over at
    /// most three entries.
    pub fn find_neighbor(&self, u: NodeId, v: NodeId) -> Option<usize> {
        self.nodes[u.0]
            .neighbors
            .iter()
            .position(|n| n.node == Some(v))
    }

    /// Retarget the slot on `u` pointing at `old` to point at `new` with the
    /// given length. Cached state and computed flags are left untouched;
    /// callers invalidate what the surgery made stale.
    pub fn update_neighbor(&mut self, u: NodeId, old: NodeId, new: NodeId, length: f64) -> bool {
        match self.find_neighbor(u, old) {
            Some(index) => {
                let slot = &mut self.nodes[u.0].neighbors[index];
                slot.node = Some(new);
                slot.length = length;
                true
            }
            None => false,
        }
    }

    /// Set the length of the edge between `u` and `v` on both slots.
    pub fn set_edge_length(&mut self, u: NodeId, v: NodeId, length: f64) {
        let forward = self.find_neighbor(u, v);
        let backward = self.find_neighbor(v, u);
        debug_assert!(
            forward.is_some() && backward.is_some(),
            "set_edge_length on a non-edge"
        );
        if let Some(index) = forward {
            self.nodes[u.0].neighbors[index].length = length;
        }
        if let Some(index) = backward {
            self.nodes[v.0].neighbors[index].length = length;
        }
    }

    /// Length of the edge between `u` and `v`, if they are adjacent.
    pub fn edge_length(&self, u: NodeId, v: NodeId) -> Option<f64> {
        self.find_neighbor(u, v)
            .map(|index| self.nodes[u.0].neighbors[index].length)
    }

    pub(crate) fn slot(&self, owner: NodeId, index: usize) -> &Neighbor {
        &self.nodes[owner.0].neighbors[index]
    }

    pub(crate) fn slot_mut(&mut self, owner: NodeId, index: usize) -> &mut Neighbor {
        &mut self.nodes[owner.0].neighbors[index]
    }

    /// Number of slot entries on a node, detached spares included.
    pub(crate) fn slot_count(&self, node: NodeId) -> usize {
        self.nodes[node.0].neighbors.len()
    }

    /// Mutable access to two distinct slots at once.
    pub(crate) fn slot_pair_mut(
        &mut self,
        a: (NodeId, usize),
        b: (NodeId, usize),
    ) -> (&mut Neighbor, &mut Neighbor) {
        assert!(a != b, "slot_pair_mut requires two distinct slots");
        if a.0 == b.0 {
            let neighbors = &mut self.nodes[a.0 .0].neighbors;
            let (lo, hi, swapped) = if a.1 < b.1 {
                (a.1, b.1, false)
            } else {
                (b.1, a.1, true)
            };
            let (head, tail) = neighbors.split_at_mut(hi);
            let (x, y) = (&mut head[lo], &mut tail[0]);
            if swapped {
                (y, x)
            } else {
                (x, y)
            }
        } else {
            let (lo, hi, swapped) = if a.0 .0 < b.0 .0 {
                (a, b, false)
            } else {
                (b, a, true)
            };
            let (head, tail) = self.nodes.split_at_mut(hi.0 .0);
            let x = &mut head[lo.0 .0].neighbors[lo.1];
            let y = &mut tail[0].neighbors[hi.1];
            if swapped {
                (y, x)
            } else {
                (x, y)
            }
        }
    }

    /// Whether the node carries a taxon.
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes[node.0].taxon.is_some()
    }

    pub fn taxon(&self, node: NodeId) -> Option<TaxonId> {
        self.nodes[node.0].taxon
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].name.as_deref()
    }

    /// Number of attached neighbors of a node.
    pub fn degree(&self, node: NodeId) -> usize {
        self.nodes[node.0]
            .neighbors
            .iter()
            .filter(|n| n.node.is_some())
            .count()
    }

    /// Attached neighbors of a node, in slot order.
    pub fn neighbors_of(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes[node.0]
            .neighbors
            .iter()
            .filter_map(|n| n.node)
            .collect()
    }

    /// Clear the computed flags on every slot incident to `node`, in both
    /// directions.
    pub(crate) fn clear_computed_around(&mut self, node: NodeId) {
        let opposites = self.neighbors_of(node);
        for slot in self.nodes[node.0].neighbors.iter_mut() {
            slot.clear_computed_flags();
        }
        for opposite in opposites {
            if let Some(index) = self.find_neighbor(opposite, node) {
                self.nodes[opposite.0].neighbors[index].clear_computed_flags();
            }
        }
    }

    /// Mark every partial parsimony vector in the tree as uncomputed.
    pub fn clear_all_partial_parsimony(&mut self) {
        for node in self.nodes.iter_mut() {
            for slot in node.neighbors.iter_mut() {
                slot.pars_computed = false;
            }
        }
    }

    /// Mark every partial likelihood vector in the tree as uncomputed.
    pub fn clear_all_partial_lh(&mut self) {
        for node in self.nodes.iter_mut() {
            for slot in node.neighbors.iter_mut() {
                slot.lh_computed = false;
            }
        }
    }

    /// All nodes reachable from the traversal origin, in depth-first order.
    pub(crate) fn traversal(&self) -> Vec<NodeId> {
        let mut visited = Vec::new();
        let Some(root) = self.root else {
            return visited;
        };
        let mut stack = vec![(root, None::<NodeId>)];
        while let Some((node, parent)) = stack.pop() {
            visited.push(node);
            for next in self.neighbors_of(node) {
                if Some(next) != parent {
                    stack.push((next, Some(node)));
                }
            }
        }
        visited
    }

    /// Every edge of the main tree exactly once, as (parent, child) pairs of
    /// the depth-first traversal. The order is deterministic.
    pub fn branches(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges = Vec::new();
        let Some(root) = self.root else {
            return edges;
        };
        let mut stack = vec![(root, None::<NodeId>)];
        while let Some((node, parent)) = stack.pop() {
            for next in self.neighbors_of(node) {
                if Some(next) != parent {
                    edges.push((node, next));
                    stack.push((next, Some(node)));
                }
            }
        }
        edges
    }

    /// Number of leaves in the main tree.
    pub fn leaf_count(&self) -> usize {
        self.traversal()
            .iter()
            .filter(|&&n| self.is_leaf(n))
            .count()
    }

    /// Number of interior nodes in the main tree.
    pub fn interior_count(&self) -> usize {
        self.traversal()
            .iter()
            .filter(|&&n| !self.is_leaf(n))
            .count()
    }

    /// Find the leaf carrying the given name, if it is part of the main tree.
    pub fn find_leaf_by_name(&self, name: &str) -> Option<NodeId> {
        self.traversal()
            .into_iter()
            .find(|&node| self.name(node) == Some(name))
    }

    /// Excise a leaf: detach it and splice away its interior neighbor, whose
    /// two remaining branches merge into one with the summed length. Returns
    /// the removed taxon.
    pub fn remove_leaf(&mut self, leaf: NodeId) -> Option<TaxonId> {
        debug_assert!(self.is_leaf(leaf) && self.degree(leaf) == 1);
        let interior = self.neighbors_of(leaf)[0];
        let remaining: Vec<(NodeId, f64)> = self
            .nodes[interior.0]
            .neighbors
            .iter()
            .filter_map(|n| n.node.map(|id| (id, n.length)))
            .filter(|&(id, _)| id != leaf)
            .collect();
        debug_assert!(
            remaining.len() == 2,
            "removing a leaf requires a degree-three interior"
        );
        let (a, len_a) = remaining[0];
        let (b, len_b) = remaining[1];
        let joined = len_a + len_b;
        self.update_neighbor(a, interior, b, joined);
        self.update_neighbor(b, interior, a, joined);
        // the merged branch summarizes a changed subtree on both sides
        if let Some(index) = self.find_neighbor(a, b) {
            self.nodes[a.0].neighbors[index].clear_computed_flags();
        }
        if let Some(index) = self.find_neighbor(b, a) {
            self.nodes[b.0].neighbors[index].clear_computed_flags();
        }
        for node in [leaf, interior] {
            for slot in self.nodes[node.0].neighbors.iter_mut() {
                slot.node = None;
                slot.clear_computed_flags();
            }
        }
        if self.root == Some(leaf) || self.root == Some(interior) {
            self.root = Some(a);
        }
        self.nodes[leaf.0].taxon
    }

    /// Render the tree as a newick string. Interior nodes are unnamed; the
    /// traversal origin (or its interior neighbor, if it is a leaf) acts as
    /// the display root.
    pub fn to_newick(&self) -> String {
        let Some(mut root) = self.root else {
            return String::from(";");
        };
        if self.is_leaf(root) {
            if let Some(&interior) = self.neighbors_of(root).first() {
                root = interior;
            }
        }
        let mut out = String::from("(");
        let mut first = true;
        for child in self.neighbors_of(root) {
            if !first {
                out.push(',');
            }
            first = false;
            self.write_subtree(&mut out, child, root);
        }
        out.push_str(");");
        out
    }

    fn write_subtree(&self, out: &mut String, node: NodeId, parent: NodeId) {
        let children: Vec<NodeId> = self
            .neighbors_of(node)
            .into_iter()
            .filter(|&n| n != parent)
            .collect();
        if children.is_empty() {
            if let Some(name) = self.name(node) {
                out.push_str(name);
            }
        } else {
            out.push('(');
            let mut first = true;
            for child in children {
                if !first {
                    out.push(',');
                }
                first = false;
                self.write_subtree(out, child, node);
            }
            out.push(')');
        }
        let length = self
            .edge_length(parent, node)
            .expect("child is adjacent to its parent");
        out.push(':');
        out.push_str(&format!("{}", length));
    }
}

impl Default for PhyloTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star_tree() -> (PhyloTree, NodeId, NodeId, NodeId, NodeId) {
        let mut tree = PhyloTree::new();
        let a = tree.new_leaf(TaxonId(0), "A");
        let b = tree.new_leaf(TaxonId(1), "B");
        let c = tree.new_leaf(TaxonId(2), "C");
        let center = tree.new_node();
        tree.add_edge(a, center, 1.0);
        tree.add_edge(b, center, 2.0);
        tree.add_edge(c, center, 3.0);
        (tree, a, b, c, center)
    }

    #[test]
    fn paired_slots_carry_the_same_length() {
        let (mut tree, a, _, _, center) = star_tree();
        tree.set_edge_length(a, center, 0.5);
        let forward = tree.slot(a, tree.find_neighbor(a, center).unwrap()).length;
        let backward = tree.slot(center, tree.find_neighbor(center, a).unwrap()).length;
        assert_eq!(forward, backward);
        assert_eq!(forward, 0.5);
    }

    #[test]
    fn update_neighbor_retargets_the_first_match() {
        let (mut tree, a, b, _, center) = star_tree();
        assert!(tree.update_neighbor(a, center, b, 4.0));
        assert_eq!(tree.find_neighbor(a, center), None);
        assert_eq!(tree.edge_length(a, b), Some(4.0));
        assert!(!tree.update_neighbor(a, center, b, 1.0));
    }

    #[test]
    fn branches_visit_every_edge_once() {
        let (tree, ..) = star_tree();
        let branches = tree.branches();
        assert_eq!(branches.len(), 3);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.interior_count(), 1);
    }

    #[test]
    fn spare_slots_are_reused_by_attach() {
        let (mut tree, a, _, _, center) = star_tree();
        let interior = tree.new_node();
        let spare = tree.add_spare_slot(interior);
        assert_eq!(tree.slot_count(interior), 1);
        tree.attach_neighbor(interior, a, 0.1);
        assert_eq!(tree.slot_count(interior), 1);
        assert_eq!(tree.slot(interior, spare).node(), Some(a));
        assert!(tree.detach_neighbor(interior, a));
        assert_eq!(tree.slot(interior, spare).node(), None);
        let _ = center;
    }

    #[test]
    fn remove_leaf_splices_the_interior_away() {
        let mut tree = PhyloTree::new();
        let a = tree.new_leaf(TaxonId(0), "A");
        let b = tree.new_leaf(TaxonId(1), "B");
        let c = tree.new_leaf(TaxonId(2), "C");
        let d = tree.new_leaf(TaxonId(3), "D");
        let u = tree.new_node();
        let v = tree.new_node();
        tree.add_edge(a, u, 1.0);
        tree.add_edge(b, u, 1.0);
        tree.add_edge(u, v, 2.0);
        tree.add_edge(c, v, 1.0);
        tree.add_edge(d, v, 1.0);

        let removed = tree.remove_leaf(d);
        assert_eq!(removed, Some(TaxonId(3)));
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.interior_count(), 1);
        // v is gone, c now hangs off u with the summed length
        assert_eq!(tree.edge_length(c, u), Some(3.0));
    }

    #[test]
    fn newick_renders_names_and_lengths() {
        let (tree, ..) = star_tree();
        assert_eq!(tree.to_newick(), "(A:1,B:2,C:3);");
    }
}
