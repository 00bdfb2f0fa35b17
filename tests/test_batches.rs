mod common;

use common::{ids, three_leaf_star};
use libgraft::{Alignment, FitchKernel, PlacementConfig, PlacementRun};

fn five_candidate_alignment() -> Alignment {
    Alignment::from_sequences(&[
        ("A", "AA"),
        ("B", "CC"),
        ("C", "CC"),
        ("D1", "AA"),
        ("D2", "AA"),
        ("D3", "AA"),
        ("D4", "AA"),
        ("D5", "AA"),
    ])
}

const NEW_TAXA: [&str; 5] = ["D1", "D2", "D3", "D4", "D5"];

/// An insert quota below the batch size defers taxa into later passes:
/// 5 taxa at two inserts per batch need three passes (2 + 2 + 1).
#[test]
fn deferred_taxa_roll_into_later_passes() {
    let alignment = five_candidate_alignment();
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);

    let config = PlacementConfig::parse("B5+I2").unwrap();
    let summary = {
        let mut run = PlacementRun::new(&mut tree, &alignment, &kernel, config);
        run.add_new_taxa(&ids(&alignment, &NEW_TAXA)).unwrap()
    };

    assert_eq!(summary.passes, 3);
    assert_eq!(summary.inserted, 5);
    assert_eq!(tree.leaf_count(), 8);
    assert_eq!(tree.interior_count(), 6);
}

/// `B0` canonicalizes to one all-encompassing batch and `I100%` inserts all
/// of it: a single pass places everything.
#[test]
fn all_or_nothing_batch_runs_one_pass() {
    let alignment = five_candidate_alignment();
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);

    let config = PlacementConfig::parse("B0+I100%").unwrap();
    let summary = {
        let mut run = PlacementRun::new(&mut tree, &alignment, &kernel, config);
        run.add_new_taxa(&ids(&alignment, &NEW_TAXA)).unwrap()
    };

    assert_eq!(summary.passes, 1);
    assert_eq!(summary.inserted, 5);
    assert_eq!(tree.leaf_count(), 8);
}

/// Several batches within one pass: the second batch refreshes a range that
/// still carries the first batch's consumed targets.
#[test]
fn multiple_batches_per_pass_place_everything() {
    let alignment = Alignment::from_sequences(&[
        ("A", "AA"),
        ("B", "CC"),
        ("C", "CC"),
        ("D1", "AA"),
        ("D2", "CC"),
        ("D3", "AA"),
        ("D4", "CC"),
        ("D5", "AA"),
        ("D6", "CC"),
    ]);
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);

    let config = PlacementConfig::parse("B3").unwrap();
    let summary = {
        let mut run = PlacementRun::new(&mut tree, &alignment, &kernel, config);
        run.add_new_taxa(&ids(&alignment, &["D1", "D2", "D3", "D4", "D5", "D6"]))
            .unwrap()
    };

    assert_eq!(summary.passes, 1);
    assert_eq!(summary.inserted, 6);
    assert_eq!(tree.leaf_count(), 9);
    assert_eq!(tree.interior_count(), 7);
}

/// A batch exactly the size of the input with a matching quota also needs
/// only one pass.
#[test]
fn full_batch_with_full_quota_runs_one_pass() {
    let alignment = five_candidate_alignment();
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);

    let config = PlacementConfig::parse("B5+I5").unwrap();
    let summary = {
        let mut run = PlacementRun::new(&mut tree, &alignment, &kernel, config);
        run.add_new_taxa(&ids(&alignment, &NEW_TAXA)).unwrap()
    };

    assert_eq!(summary.passes, 1);
    assert_eq!(summary.inserted, 5);
}
