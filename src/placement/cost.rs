use tracing::trace;

use crate::blocks::BlockAllocator;
use crate::error::PlacementError;
use crate::kernel::{LikelihoodKernel, ParsimonyKernel};
use crate::placement::config::CostFunction;
use crate::placement::parallel::ParallelParsimonyCalculator;
use crate::placement::targets::{TargetBranch, TargetBranchRange, TargetBranchRef};
use crate::placement::taxon::{PossiblePlacement, TaxonToPlace};
use crate::tree::{NodeId, PhyloTree};

/// Branch lengths are capped here when the corrected-distance transform
/// saturates.
const MAX_BRANCH_LENGTH: f64 = 9.0;

/// Prunes (taxon, target) pairs before they are scored. Currently only the
/// global search exists, which accepts every pair; the predicate is still
/// consulted on every pair so a localized variant can slot in.
#[derive(Copy, Clone, Debug, Default)]
pub enum SearchHeuristic {
    #[default]
    Global,
}

impl SearchHeuristic {
    pub fn is_placement_worth_trying(&self, _taxon: &TaxonToPlace, _target: &TargetBranch) -> bool {
        match self {
            SearchHeuristic::Global => true,
        }
    }

    pub fn is_global_search(&self) -> bool {
        match self {
            SearchHeuristic::Global => true,
        }
    }
}

/// Strategy that fills a [`PossiblePlacement`] with a score and tentative
/// branch lengths for one (taxon, target) pair.
#[derive(Copy, Clone, Debug)]
pub enum PlacementCostCalculator {
    /// Out-of-tree parsimony of the target's summary against the taxon's tip
    /// vector. Whether that is Fitch or Sankoff is the kernel's business.
    Parsimony,
    /// Splice the stub into the middle of the target edge and optimize only
    /// the branch to the new taxon.
    LikelihoodMidpoint { max_iterations: u32 },
    /// Same splice, but all three stub-incident branches are optimized in
    /// turn.
    LikelihoodAnywhere { max_iterations: u32 },
}

impl PlacementCostCalculator {
    pub fn for_cost_function(cost_function: CostFunction) -> Self {
        match cost_function {
            CostFunction::MaximumParsimony | CostFunction::SankoffParsimony => {
                PlacementCostCalculator::Parsimony
            }
            CostFunction::LikelihoodMidpoint => {
                PlacementCostCalculator::LikelihoodMidpoint { max_iterations: 20 }
            }
            CostFunction::LikelihoodAnywhere => {
                PlacementCostCalculator::LikelihoodAnywhere { max_iterations: 20 }
            }
        }
    }

    pub fn uses_likelihood(&self) -> bool {
        !matches!(self, PlacementCostCalculator::Parsimony)
    }
}

/// Parsimony placement cost. Pure: reads the target's summary block and the
/// taxon's tip block, so it is safe to run from the parallel scoring loops.
/// The consumed edge's length is split evenly across the two half-branches;
/// the length to the new taxon stays at the sentinel until the final
/// negative-branch fixup estimates it.
pub(crate) fn assess_placement_parsimony(
    kernel: &dyn ParsimonyKernel,
    blocks: &BlockAllocator,
    tree: &PhyloTree,
    targets: &TargetBranchRange,
    reference: TargetBranchRef,
    taxon: &TaxonToPlace,
) -> PossiblePlacement {
    let target = targets.get(reference);
    let mut placement = PossiblePlacement::unassessed();
    placement.set_target(targets, reference);

    let summary = target
        .parsimony_block()
        .expect("target branch state was computed");
    let score = kernel.compute_parsimony_out_of_tree(
        blocks.pars_block(summary),
        blocks.pars_block(taxon.parsimony_block()),
    );
    placement.score = score as f64;

    let (node1, node2) = target.nodes();
    let length = tree
        .edge_length(node1, node2)
        .expect("target endpoints are adjacent");
    placement.len_to_node1 = 0.5 * length;
    placement.len_to_node2 = 0.5 * length;

    trace!(
        taxon = taxon.taxon_id().unwrap(),
        target = reference.index(),
        score,
        "parsimony placement cost"
    );
    placement
}

/// Full placement cost for the serial scoring paths. Likelihood assessment
/// splices the tree, so it must only ever run on the coordinator.
pub(crate) fn assess_placement(
    calculator: &PlacementCostCalculator,
    tree: &mut PhyloTree,
    blocks: &mut BlockAllocator,
    kernel: &dyn ParsimonyKernel,
    lh_kernel: Option<&dyn LikelihoodKernel>,
    targets: &TargetBranchRange,
    reference: TargetBranchRef,
    taxon: &TaxonToPlace,
) -> Result<PossiblePlacement, PlacementError> {
    match *calculator {
        PlacementCostCalculator::Parsimony => Ok(assess_placement_parsimony(
            kernel, blocks, tree, targets, reference, taxon,
        )),
        PlacementCostCalculator::LikelihoodMidpoint { max_iterations } => assess_likelihood(
            tree,
            blocks,
            kernel,
            lh_kernel.expect("likelihood cost requires a likelihood kernel"),
            targets,
            reference,
            taxon,
            true,
            max_iterations,
        ),
        PlacementCostCalculator::LikelihoodAnywhere { max_iterations } => assess_likelihood(
            tree,
            blocks,
            kernel,
            lh_kernel.expect("likelihood cost requires a likelihood kernel"),
            targets,
            reference,
            taxon,
            false,
            max_iterations,
        ),
    }
}

/// Temporarily splice the taxon's stub into the middle of the target edge,
/// let the likelihood kernel optimize, read off the score and lengths, then
/// undo the splice. The stored score is the negated likelihood so that lower
/// is better throughout the engine.
#[allow(clippy::too_many_arguments)]
fn assess_likelihood(
    tree: &mut PhyloTree,
    blocks: &mut BlockAllocator,
    kernel: &dyn ParsimonyKernel,
    lh_kernel: &dyn LikelihoodKernel,
    targets: &TargetBranchRange,
    reference: TargetBranchRef,
    taxon: &TaxonToPlace,
    at_midpoint: bool,
    max_iterations: u32,
) -> Result<PossiblePlacement, PlacementError> {
    let (node1, node2) = targets.get(reference).nodes();
    let interior = taxon.new_interior();
    let leaf = taxon.new_leaf();
    let length = tree
        .edge_length(node1, node2)
        .expect("target endpoints are adjacent");
    let half = 0.5 * length;

    // splice:  node1 <---> interior <---> node2, taxon hanging off interior
    tree.update_neighbor(node1, node2, interior, half);
    tree.update_neighbor(node2, node1, interior, half);
    tree.attach_neighbor(interior, node1, half);
    tree.attach_neighbor(interior, node2, half);
    tree.clear_computed_around(interior);

    let outcome = (|| -> Result<(f64, f64, f64, f64), PlacementError> {
        if at_midpoint {
            recompute_parsimony_branch_length(tree, blocks, kernel, leaf, interior)?;
            lh_kernel.compute_likelihood_branch(tree, blocks, leaf, interior)?;
            lh_kernel.optimize_one_branch(tree, blocks, leaf, interior, max_iterations)?;
            let len_to_new_taxon = tree
                .edge_length(leaf, interior)
                .expect("stub edge exists");
            let score = lh_kernel.compute_likelihood_from_buffer()?;
            Ok((score, half, half, len_to_new_taxon))
        } else {
            recompute_parsimony_branch_length(tree, blocks, kernel, leaf, interior)?;
            lh_kernel.optimize_one_branch(tree, blocks, interior, node1, max_iterations)?;
            let len_to_node1 = tree
                .edge_length(interior, node1)
                .expect("spliced edge exists");
            lh_kernel.optimize_one_branch(tree, blocks, interior, node2, max_iterations)?;
            let len_to_node2 = tree
                .edge_length(interior, node2)
                .expect("spliced edge exists");
            lh_kernel.optimize_one_branch(tree, blocks, leaf, interior, max_iterations)?;
            let score = lh_kernel.compute_likelihood_from_buffer()?;
            let len_to_new_taxon = tree
                .edge_length(leaf, interior)
                .expect("stub edge exists");
            Ok((score, len_to_node1, len_to_node2, len_to_new_taxon))
        }
    })();

    // undo the splice whether or not the kernel succeeded
    tree.update_neighbor(node1, interior, node2, length);
    tree.update_neighbor(node2, interior, node1, length);
    tree.detach_neighbor(interior, node1);
    tree.detach_neighbor(interior, node2);
    if let Some(index) = tree.find_neighbor(node1, node2) {
        tree.slot_mut(node1, index).clear_computed_flags();
    }
    if let Some(index) = tree.find_neighbor(node2, node1) {
        tree.slot_mut(node2, index).clear_computed_flags();
    }

    let (score, len_to_node1, len_to_node2, len_to_new_taxon) = outcome?;
    if !score.is_finite() {
        return Err(PlacementError::KernelNumeric { score });
    }

    let mut placement = PossiblePlacement::unassessed();
    placement.set_target(targets, reference);
    placement.score = -score;
    placement.len_to_node1 = len_to_node1;
    placement.len_to_node2 = len_to_node2;
    placement.len_to_new_taxon = len_to_new_taxon;
    trace!(
        taxon = taxon.taxon_id().unwrap(),
        target = reference.index(),
        score,
        "likelihood placement cost"
    );
    Ok(placement)
}

/// Re-estimate a branch length from its parsimony substitution count and set
/// it on both slots. Uses the Felsenstein-corrected uncorrected distance; a
/// branch with zero substitutions gets the length of a single change.
pub(crate) fn recompute_parsimony_branch_length(
    tree: &mut PhyloTree,
    blocks: &mut BlockAllocator,
    kernel: &dyn ParsimonyKernel,
    u: NodeId,
    v: NodeId,
) -> Result<f64, PlacementError> {
    let (_, substitutions) = {
        let mut calculator = ParallelParsimonyCalculator::new(tree, blocks, kernel);
        calculator.compute_branch(u, v)?
    };
    let sites = kernel.site_count() as f64;
    let uncorrected = if substitutions > 0 {
        substitutions as f64 / sites
    } else {
        1.0 / sites
    };
    let corrected = correct_branch_length(uncorrected);
    tree.set_edge_length(u, v, corrected);
    Ok(corrected)
}

/// The F81/JC correction of an uncorrected per-site distance.
pub(crate) fn correct_branch_length(uncorrected: f64) -> f64 {
    let argument = 1.0 - uncorrected * 4.0 / 3.0;
    if argument <= f64::EPSILON {
        MAX_BRANCH_LENGTH
    } else {
        (-0.75 * argument.ln()).min(MAX_BRANCH_LENGTH)
    }
}

/// Replace negative branch lengths with parsimony-derived estimates.
pub(crate) fn fix_negative_branch_lengths(
    tree: &mut PhyloTree,
    blocks: &mut BlockAllocator,
    kernel: &dyn ParsimonyKernel,
) -> Result<usize, PlacementError> {
    let mut fixed = 0;
    for (u, v) in tree.branches() {
        let length = tree.edge_length(u, v).expect("branch endpoints are adjacent");
        if length < 0.0 {
            recompute_parsimony_branch_length(tree, blocks, kernel, u, v)?;
            fixed += 1;
        }
    }
    Ok(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_grows_with_distance_and_saturates() {
        let short = correct_branch_length(0.01);
        let long = correct_branch_length(0.5);
        assert!(short < long);
        assert!(short > 0.01);
        assert_eq!(correct_branch_length(0.75), MAX_BRANCH_LENGTH);
        assert_eq!(correct_branch_length(2.0), MAX_BRANCH_LENGTH);
    }
}
