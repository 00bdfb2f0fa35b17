mod common;

use common::{ids, three_leaf_star};
use libgraft::{Alignment, FitchKernel, PlacementConfig, PlacementRun};

/// Two candidates preferring the same branch: the first (by input order, the
/// sort is stable) takes it, the second is gazumped and settles on one of
/// the three replacement branches.
#[test]
fn second_candidate_falls_back_to_a_replacement_branch() {
    let alignment = Alignment::from_sequences(&[
        ("A", "AA"),
        ("B", "CC"),
        ("C", "CC"),
        ("X", "AA"),
        ("Y", "AA"),
    ]);
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);

    let config = PlacementConfig::parse("B2+I2").unwrap();
    let summary = {
        let mut run = PlacementRun::new(&mut tree, &alignment, &kernel, config);
        run.add_new_taxa(&ids(&alignment, &["X", "Y"])).unwrap()
    };

    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.blocked, 1);
    assert_eq!(tree.leaf_count(), 5);
    assert_eq!(tree.interior_count(), 3);

    // both ended up in the A-side neighborhood: X splits the A branch and Y
    // lands on one of the branches that replaced it
    let a = tree.find_leaf_by_name("A").unwrap();
    let x = tree.find_leaf_by_name("X").unwrap();
    let y = tree.find_leaf_by_name("Y").unwrap();
    let x_interior = tree.neighbors_of(x)[0];
    let y_interior = tree.neighbors_of(y)[0];
    assert_eq!(tree.degree(x_interior), 3);
    assert_eq!(tree.degree(y_interior), 3);

    // walking from A towards B or C passes through both new interiors
    let mut frontier = vec![a];
    let mut seen = Vec::new();
    while let Some(node) = frontier.pop() {
        if seen.contains(&node) {
            continue;
        }
        seen.push(node);
        if !tree.is_leaf(node) || node == a {
            frontier.extend(tree.neighbors_of(node));
        }
    }
    assert!(seen.contains(&x_interior));
    assert!(seen.contains(&y_interior));
}

/// With the bounded top-k store the gazumped candidate reuses a surviving
/// remembered placement; the outcome is identical.
#[test]
fn less_fussy_candidates_recover_from_a_gazump_too() {
    let alignment = Alignment::from_sequences(&[
        ("A", "AA"),
        ("B", "CC"),
        ("C", "CC"),
        ("X", "AA"),
        ("Y", "AA"),
    ]);
    let kernel = FitchKernel::new(&alignment);
    let mut tree = three_leaf_star(&alignment);

    let mut config = PlacementConfig::parse("B2+I2").unwrap();
    config.keep_top_placements = true;
    let summary = {
        let mut run = PlacementRun::new(&mut tree, &alignment, &kernel, config);
        run.add_new_taxa(&ids(&alignment, &["X", "Y"])).unwrap()
    };

    assert_eq!(summary.inserted, 2);
    assert_eq!(tree.leaf_count(), 5);
}
