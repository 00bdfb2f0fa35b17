use crate::alignment::{Alignment, TaxonId};
use crate::blocks::BlockAllocator;
use crate::error::PlacementError;
use crate::tree::{NodeId, PhyloTree};

/// The parsimony scoring seam of the placement engine. A partial vector is a
/// flat word slice whose layout the kernel owns; the engine only requires
/// that combining two partials yields a partial and that two partials can be
/// scored against each other without touching the tree.
pub trait ParsimonyKernel: Sync {
    /// Length of one partial parsimony vector, in words.
    fn partial_length(&self) -> usize;

    /// Total number of alignment sites, used for branch length estimation.
    fn site_count(&self) -> usize;

    /// Fill `out` with the partial vector of a single tip.
    fn compute_tip_partial(&self, taxon: TaxonId, out: &mut [u32]);

    /// Combine two partial vectors into `out` and return the score of the
    /// combined subtree.
    fn combine_out_of_tree(&self, left: &[u32], right: &[u32], out: &mut [u32]) -> u32;

    /// Score two partial vectors against each other, as if the subtrees they
    /// summarize were joined by a branch.
    fn compute_parsimony_out_of_tree(&self, a: &[u32], b: &[u32]) -> u32;

    /// Like [`compute_parsimony_out_of_tree`], but also report the number of
    /// state changes on the joining branch alone, which drives branch length
    /// estimation.
    ///
    /// [`compute_parsimony_out_of_tree`]: ParsimonyKernel::compute_parsimony_out_of_tree
    fn compute_parsimony_branch(&self, a: &[u32], b: &[u32]) -> (u32, u32);

    /// Hook for kernels that precompute weighted tip vectors (Sankoff).
    fn prepare_tip_partials(&self) {}
}

/// The likelihood scoring seam. The engine drives these hooks from the
/// likelihood cost calculators and otherwise treats the kernel's buffers as
/// opaque; no likelihood kernel ships with this crate.
pub trait LikelihoodKernel: Sync {
    /// Length of one partial likelihood block, in values.
    fn likelihood_block_size(&self) -> usize;

    /// Length of one scale-number block, in bytes.
    fn scale_block_size(&self) -> usize;

    fn compute_likelihood_branch(
        &self,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        u: NodeId,
        v: NodeId,
    ) -> Result<f64, PlacementError>;

    /// Optimize the length of one branch in place, with an iteration cap.
    fn optimize_one_branch(
        &self,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        u: NodeId,
        v: NodeId,
        max_iterations: u32,
    ) -> Result<f64, PlacementError>;

    /// Read the likelihood of the tree from the kernel's internal buffers.
    fn compute_likelihood_from_buffer(&self) -> Result<f64, PlacementError>;

    /// Whole-tree branch length optimization, run once after placement.
    fn optimize_all_branches(
        &self,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
    ) -> Result<f64, PlacementError>;

    /// Replace negative branch lengths with kernel-estimated ones. Returns
    /// the number of branches fixed.
    fn fix_negative_branch(&self, tree: &mut PhyloTree, blocks: &mut BlockAllocator) -> usize;
}

/// Unweighted Fitch parsimony over the alignment's deduplicated patterns.
/// Each partial vector holds one state mask word per pattern plus a trailing
/// word with the accumulated subtree score, so out-of-tree scoring never
/// re-walks a subtree.
pub struct FitchKernel<'a> {
    alignment: &'a Alignment,
}

impl<'a> FitchKernel<'a> {
    pub fn new(alignment: &'a Alignment) -> Self {
        Self { alignment }
    }
}

impl ParsimonyKernel for FitchKernel<'_> {
    fn partial_length(&self) -> usize {
        self.alignment.pattern_count() + 1
    }

    fn site_count(&self) -> usize {
        self.alignment.site_count()
    }

    fn compute_tip_partial(&self, taxon: TaxonId, out: &mut [u32]) {
        let patterns = self.alignment.patterns();
        for (index, pattern) in patterns.iter().enumerate() {
            out[index] = pattern.states[taxon.0] as u32;
        }
        out[patterns.len()] = 0;
    }

    fn combine_out_of_tree(&self, left: &[u32], right: &[u32], out: &mut [u32]) -> u32 {
        let patterns = self.alignment.patterns();
        let mut added = 0;
        for (index, pattern) in patterns.iter().enumerate() {
            let intersection = left[index] & right[index];
            if intersection == 0 {
                out[index] = left[index] | right[index];
                added += pattern.weight;
            } else {
                out[index] = intersection;
            }
        }
        let score = left[patterns.len()] + right[patterns.len()] + added;
        out[patterns.len()] = score;
        score
    }

    fn compute_parsimony_out_of_tree(&self, a: &[u32], b: &[u32]) -> u32 {
        self.compute_parsimony_branch(a, b).0
    }

    fn compute_parsimony_branch(&self, a: &[u32], b: &[u32]) -> (u32, u32) {
        let patterns = self.alignment.patterns();
        let mut branch_substitutions = 0;
        for (index, pattern) in patterns.iter().enumerate() {
            if a[index] & b[index] == 0 {
                branch_substitutions += pattern.weight;
            }
        }
        let score = a[patterns.len()] + b[patterns.len()] + branch_substitutions;
        (score, branch_substitutions)
    }
}
