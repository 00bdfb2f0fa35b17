// each test binary only uses a subset of these fixtures
#![allow(dead_code)]

use libgraft::{Alignment, PhyloTree, TaxonId};

/// Build a star tree over the first three alignment taxa: three leaves
/// around one interior node, every branch of length 1.
pub fn three_leaf_star(alignment: &Alignment) -> PhyloTree {
    let mut tree = PhyloTree::new();
    let center = tree.new_node();
    for index in 0..3 {
        let taxon = TaxonId::from_usize(index);
        let leaf = tree.new_leaf(taxon, alignment.taxon_name(taxon));
        tree.add_edge(leaf, center, 1.0);
    }
    tree
}

/// Build a caterpillar tree over the first `count` alignment taxa.
pub fn caterpillar(alignment: &Alignment, count: usize) -> PhyloTree {
    assert!(count >= 4);
    let mut tree = PhyloTree::new();
    let leaves: Vec<_> = (0..count)
        .map(|index| {
            let taxon = TaxonId::from_usize(index);
            tree.new_leaf(taxon, alignment.taxon_name(taxon))
        })
        .collect();
    let mut spine = tree.new_node();
    tree.add_edge(leaves[0], spine, 1.0);
    tree.add_edge(leaves[1], spine, 1.0);
    for &leaf in &leaves[2..count - 1] {
        let next = tree.new_node();
        tree.add_edge(spine, next, 1.0);
        tree.add_edge(leaf, next, 1.0);
        spine = next;
    }
    tree.add_edge(leaves[count - 1], spine, 1.0);
    tree
}

/// The ids of the named taxa, in the given order.
pub fn ids(alignment: &Alignment, names: &[&str]) -> Vec<TaxonId> {
    names
        .iter()
        .map(|name| alignment.taxon_id(name).expect("taxon exists"))
        .collect()
}
