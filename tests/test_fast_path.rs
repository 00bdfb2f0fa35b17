mod common;

use common::{ids, three_leaf_star};
use libgraft::{Alignment, FitchKernel, PlacementConfig, PlacementRun};

/// The default configuration (single-taxon parsimony batches, global search)
/// delegates to greedy stepwise addition, which never builds a target branch
/// range.
#[test]
fn default_configuration_takes_the_stepwise_fast_path() {
    let alignment = Alignment::from_sequences(&[
        ("A", "AA"),
        ("B", "CC"),
        ("C", "CC"),
        ("D", "AA"),
    ]);
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);

    let summary = {
        let mut run = PlacementRun::new(
            &mut tree,
            &alignment,
            &kernel,
            PlacementConfig::default(),
        );
        run.add_new_taxa(&ids(&alignment, &["D"])).unwrap()
    };

    assert!(summary.fast_path);
    assert_eq!(summary.inserted, 1);
    assert_eq!(tree.leaf_count(), 4);

    // the fast path agrees with the batch engine on the optimal branch
    let a = tree.find_leaf_by_name("A").unwrap();
    let d = tree.find_leaf_by_name("D").unwrap();
    let new_interior = tree.neighbors_of(d)[0];
    assert!(tree.neighbors_of(new_interior).contains(&a));
}

/// Stepwise addition handles several taxa in sequence, rescoring the grown
/// tree after each graft.
#[test]
fn stepwise_addition_chains_multiple_taxa() {
    let alignment = Alignment::from_sequences(&[
        ("A", "AAGG"),
        ("B", "CCGG"),
        ("C", "CCTT"),
        ("D", "AAGG"),
        ("E", "CCTT"),
    ]);
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);

    let summary = {
        let mut run = PlacementRun::new(
            &mut tree,
            &alignment,
            &kernel,
            PlacementConfig::default(),
        );
        run.add_new_taxa(&ids(&alignment, &["D", "E"])).unwrap()
    };

    assert!(summary.fast_path);
    assert_eq!(summary.inserted, 2);
    assert_eq!(tree.leaf_count(), 5);
    assert_eq!(tree.interior_count(), 3);

    // D sits next to A, E next to C, matching the sequence identities
    let d = tree.find_leaf_by_name("D").unwrap();
    let a = tree.find_leaf_by_name("A").unwrap();
    assert!(tree.neighbors_of(tree.neighbors_of(d)[0]).contains(&a));
    let e = tree.find_leaf_by_name("E").unwrap();
    let c = tree.find_leaf_by_name("C").unwrap();
    assert!(tree.neighbors_of(tree.neighbors_of(e)[0]).contains(&c));
}
