mod common;

use common::three_leaf_star;
use libgraft::{Alignment, FitchKernel, PlacementConfig, PlacementRun};

/// Adding no taxa is a no-op: the topology stays bit-identical and nothing
/// is counted or timed.
#[test]
fn empty_batch_leaves_the_tree_untouched() {
    let alignment = Alignment::from_sequences(&[("A", "AA"), ("B", "CC"), ("C", "CC")]);
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);
    let before = tree.to_newick();
    let leaves_before = tree.leaf_count();

    let summary = {
        let mut run = PlacementRun::new(
            &mut tree,
            &alignment,
            &kernel,
            PlacementConfig::parse("B0").unwrap(),
        );
        run.add_new_taxa(&[]).unwrap()
    };

    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.passes, 0);
    assert_eq!(tree.leaf_count(), leaves_before);
    assert_eq!(tree.to_newick(), before);
}

/// Scoring is deterministic: the same run on the same inputs produces the
/// same topology, branch lengths included.
#[test]
fn identical_runs_produce_identical_trees() {
    let alignment = Alignment::from_sequences(&[
        ("A", "AAGG"),
        ("B", "CCGG"),
        ("C", "CCTT"),
        ("D", "ACGT"),
        ("E", "AATT"),
    ]);
    let new_taxa = common::ids(&alignment, &["D", "E"]);

    let mut first = three_leaf_star(&alignment);
    let mut second = three_leaf_star(&alignment);
    for tree in [&mut first, &mut second] {
        let kernel = FitchKernel::new(&alignment);
        let mut run = PlacementRun::new(
            tree,
            &alignment,
            &kernel,
            PlacementConfig::parse("B0").unwrap(),
        );
        run.add_new_taxa(&new_taxa).unwrap();
    }
    assert_eq!(first.to_newick(), second.to_newick());
}
