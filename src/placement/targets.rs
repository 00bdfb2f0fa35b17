use tracing::trace;

use crate::blocks::{BlockAllocator, LhBlock, ParsBlock, ScaleBlock};
use crate::error::PlacementError;
use crate::kernel::ParsimonyKernel;
use crate::placement::parallel::ParallelParsimonyCalculator;
use crate::tree::{Neighbor, NodeId, PhyloTree};

/// A reference into a [`TargetBranchRange`]. Indices are stable while the
/// range only appends; they are invalidated by [`remove_used`] compaction,
/// which the driver therefore only performs at batch boundaries once no
/// refs are held outside the range.
///
/// [`remove_used`]: TargetBranchRange::remove_used
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TargetBranchRef(pub(crate) usize);

impl TargetBranchRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// An edge currently considered as a candidate insertion point. It owns a
/// parsimony block summarizing both subtrees with respect to a virtual
/// midpoint (and likelihood blocks when the cost calculator wants them).
/// Once consumed by an insertion it is marked used and records the three
/// branches that replaced it.
pub struct TargetBranch {
    node1: NodeId,
    node2: NodeId,
    partial_pars: Option<ParsBlock>,
    partial_lh: Option<LhBlock>,
    scale_num: Option<ScaleBlock>,
    used: bool,
    replacements: Option<Vec<TargetBranchRef>>,
}

impl TargetBranch {
    fn new(
        blocks: &mut BlockAllocator,
        node1: NodeId,
        node2: NodeId,
        likelihood_wanted: bool,
    ) -> Result<Self, PlacementError> {
        let partial_pars = Some(blocks.allocate_parsimony()?);
        let (partial_lh, scale_num) = if likelihood_wanted {
            let (lh, scale) = blocks.allocate_likelihood()?;
            (Some(lh), Some(scale))
        } else {
            (None, None)
        };
        Ok(Self {
            node1,
            node2,
            partial_pars,
            partial_lh,
            scale_num,
            used: false,
            replacements: None,
        })
    }

    /// The unordered endpoint pair of the edge.
    pub fn nodes(&self) -> (NodeId, NodeId) {
        (self.node1, self.node2)
    }

    pub fn is_used_up(&self) -> bool {
        self.used
    }

    pub(crate) fn parsimony_block(&self) -> Option<ParsBlock> {
        self.partial_pars
    }

    /// The branches that replaced this one, once it has been consumed.
    pub fn replacements(&self) -> Option<&[TargetBranchRef]> {
        self.replacements.as_deref()
    }

    /// Move the branch's computed summary into a neighbor slot and mark the
    /// branch as consumed.
    fn hand_over_computed_state_to(&mut self, slot: &mut Neighbor) {
        slot.partial_pars = self.partial_pars.take();
        slot.partial_lh = self.partial_lh.take();
        slot.scale_num = self.scale_num.take();
        slot.pars_computed = true;
        slot.lh_computed = slot.partial_lh.is_some();
        self.used = true;
    }
}

/// Append-only collection of the edges currently considered as insertion
/// points. Entries are marked used rather than removed; a compaction pass
/// between batches drops them for good.
pub struct TargetBranchRange {
    entries: Vec<TargetBranch>,
}

impl TargetBranchRange {
    /// Build one entry per edge of the tree. The entries' summary vectors
    /// are not computed yet; the driver's refresh step does that.
    pub fn new(
        tree: &PhyloTree,
        blocks: &mut BlockAllocator,
        likelihood_wanted: bool,
    ) -> Result<Self, PlacementError> {
        let branches = tree.branches();
        trace!(entries = branches.len(), "building target branch range");
        let mut entries = Vec::with_capacity(branches.len());
        for (node1, node2) in branches {
            entries.push(TargetBranch::new(blocks, node1, node2, likelihood_wanted)?);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, reference: TargetBranchRef) -> &TargetBranch {
        &self.entries[reference.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetBranch> {
        self.entries.iter()
    }

    /// Whether the referenced entry has been consumed.
    pub fn is_used(&self, reference: TargetBranchRef) -> bool {
        self.entries[reference.0].used
    }

    /// Whether the referenced entry still spans the given node pair.
    pub(crate) fn endpoints_match(
        &self,
        reference: TargetBranchRef,
        node1: NodeId,
        node2: NodeId,
    ) -> bool {
        let entry = &self.entries[reference.0];
        (entry.node1, entry.node2) == (node1, node2)
    }

    /// Recompute the entry's summary vector: bring both endpoint slots up to
    /// date through the parallel calculator, then combine them out of tree.
    pub fn compute_state(
        &mut self,
        index: usize,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        kernel: &dyn ParsimonyKernel,
    ) -> Result<(), PlacementError> {
        let (node1, node2) = self.entries[index].nodes();
        let slot1 = (
            node1,
            tree.find_neighbor(node1, node2)
                .expect("target endpoints are adjacent"),
        );
        let slot2 = (
            node2,
            tree.find_neighbor(node2, node1)
                .expect("target endpoints are adjacent"),
        );
        {
            let mut calculator = ParallelParsimonyCalculator::new(tree, blocks, kernel);
            calculator.schedule(slot1)?;
            calculator.schedule(slot2)?;
            calculator.calculate(0)?;
        }
        let left = tree
            .slot(slot1.0, slot1.1)
            .partial_pars
            .expect("endpoint slot has a block");
        let right = tree
            .slot(slot2.0, slot2.1)
            .partial_pars
            .expect("endpoint slot has a block");
        let out = self.entries[index]
            .partial_pars
            .expect("target branch owns a parsimony block");
        blocks.combine_out_of_tree(kernel, left, right, out);
        Ok(())
    }

    /// Append a branch for a freshly created edge and compute its state
    /// immediately.
    pub fn add_new_ref(
        &mut self,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        kernel: &dyn ParsimonyKernel,
        node1: NodeId,
        node2: NodeId,
        likelihood_wanted: bool,
    ) -> Result<TargetBranchRef, PlacementError> {
        self.entries
            .push(TargetBranch::new(blocks, node1, node2, likelihood_wanted)?);
        let index = self.entries.len() - 1;
        self.compute_state(index, tree, blocks, kernel)?;
        Ok(TargetBranchRef(index))
    }

    pub(crate) fn set_replacements(
        &mut self,
        reference: TargetBranchRef,
        replacements: Vec<TargetBranchRef>,
    ) {
        self.entries[reference.0].replacements = Some(replacements);
    }

    pub(crate) fn hand_over(&mut self, reference: TargetBranchRef, slot: &mut Neighbor) {
        self.entries[reference.0].hand_over_computed_state_to(slot);
    }

    /// Compact the range, dropping consumed entries and preserving the
    /// relative order of the survivors. Returns the number of entries
    /// removed. All refs held outside the range are invalid afterwards.
    pub fn remove_used(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.used);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::ArenaPlan;

    fn range_with_flags(flags: &[bool]) -> TargetBranchRange {
        let mut blocks = BlockAllocator::new(
            2,
            0,
            0,
            ArenaPlan {
                parsimony_blocks: flags.len(),
                likelihood_blocks: 0,
            },
        );
        let entries = flags
            .iter()
            .enumerate()
            .map(|(index, &used)| {
                let mut branch =
                    TargetBranch::new(&mut blocks, NodeId(index), NodeId(index + 1), false).unwrap();
                branch.used = used;
                branch
            })
            .collect();
        TargetBranchRange { entries }
    }

    #[test]
    fn remove_used_compacts_and_preserves_order() {
        let mut range = range_with_flags(&[false, true, false, true, true, false]);
        let removed = range.remove_used();
        assert_eq!(removed, 3);
        assert_eq!(range.len(), 3);
        let survivors: Vec<usize> = range.iter().map(|t| t.nodes().0 .0).collect();
        assert_eq!(survivors, vec![0, 2, 5]);
        assert!(range.iter().all(|t| !t.is_used_up()));
    }
}
