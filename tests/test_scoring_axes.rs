mod common;

use common::{ids, three_leaf_star};
use libgraft::{Alignment, FitchKernel, PlacementConfig, PlacementRun, ScoringAxis};

/// The insertion-point-major and new-taxon-major scoring loops reduce with
/// the same commutative, first-wins rule, so they must agree on every best
/// placement and hence on the final topology.
#[test]
fn both_scoring_axes_build_the_same_tree() {
    let alignment = Alignment::from_sequences(&[
        ("A", "AAGGTT"),
        ("B", "CCGGTT"),
        ("C", "CCTTAA"),
        ("D", "AAGGAA"),
        ("E", "CCTTTT"),
        ("F", "ACGTAC"),
    ]);
    let new_taxa = ids(&alignment, &["D", "E", "F"]);

    let mut newicks = Vec::new();
    for axis in [ScoringAxis::InsertionPointMajor, ScoringAxis::NewTaxonMajor] {
        let kernel = FitchKernel::new(&alignment);
        let mut tree = three_leaf_star(&alignment);
        let mut config = PlacementConfig::parse("B0").unwrap();
        config.scoring_axis = axis;
        let summary = {
            let mut run = PlacementRun::new(&mut tree, &alignment, &kernel, config);
            run.add_new_taxa(&new_taxa).unwrap()
        };
        assert_eq!(summary.inserted, 3);
        newicks.push(tree.to_newick());
    }
    assert_eq!(newicks[0], newicks[1]);
}
