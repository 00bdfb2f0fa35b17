use std::mem;

use crate::error::PlacementError;
use crate::kernel::ParsimonyKernel;
use crate::tree::{Neighbor, NodeId, PhyloTree};

/// Index of a partial parsimony block inside the parsimony arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParsBlock(pub(crate) usize);

/// Index of a partial likelihood block inside the likelihood arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LhBlock(pub(crate) usize);

/// Index of a scale-number block inside the scale arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScaleBlock(pub(crate) usize);

/// Planned arena capacities for one placement run.
#[derive(Copy, Clone, Debug)]
pub struct ArenaPlan {
    pub parsimony_blocks: usize,
    pub likelihood_blocks: usize,
}

impl ArenaPlan {
    /// Derive the capacities from the number of edges in the starting tree
    /// and the number of taxa to add. Per initial edge: two slot blocks plus
    /// one target summary block. Per new taxon: one stub tip block, two
    /// hand-over refills and three replacement-target summaries, plus three
    /// trial blocks (two spare slots and the lazily touched leaf slot) when
    /// likelihood state is tracked.
    pub fn for_placement(initial_edges: usize, new_taxa: usize, track_likelihood: bool) -> Self {
        let trial_blocks = if track_likelihood { 3 * new_taxa } else { 0 };
        let parsimony_blocks = 3 * initial_edges + 6 * new_taxa + trial_blocks;
        let likelihood_blocks = if track_likelihood { parsimony_blocks } else { 0 };
        Self {
            parsimony_blocks,
            likelihood_blocks,
        }
    }
}

/// Hands out fixed-size parsimony, likelihood and scale-number blocks from
/// contiguous arenas sized once per placement run. Allocation bumps a
/// counter; individual blocks are never freed. Mutating the tree moves
/// computed state between slots through [`hand_over`] instead of copying
/// vector contents.
///
/// [`hand_over`]: BlockAllocator::hand_over
pub struct BlockAllocator {
    pars_block_size: usize,
    lh_block_size: usize,
    scale_block_size: usize,
    pars_arena: Vec<u32>,
    lh_arena: Vec<f64>,
    scale_arena: Vec<u8>,
    pars_capacity: usize,
    lh_capacity: usize,
    index_parsimony: usize,
    index_lh: usize,
    track_likelihood: bool,
    scratch: Vec<u32>,
}

impl BlockAllocator {
    pub fn new(
        pars_block_size: usize,
        lh_block_size: usize,
        scale_block_size: usize,
        plan: ArenaPlan,
    ) -> Self {
        Self {
            pars_block_size,
            lh_block_size,
            scale_block_size,
            pars_arena: vec![0; pars_block_size * plan.parsimony_blocks],
            lh_arena: vec![0.0; lh_block_size * plan.likelihood_blocks],
            scale_arena: vec![0; scale_block_size * plan.likelihood_blocks],
            pars_capacity: plan.parsimony_blocks,
            lh_capacity: plan.likelihood_blocks,
            index_parsimony: 0,
            index_lh: 0,
            track_likelihood: plan.likelihood_blocks > 0,
            scratch: Vec::new(),
        }
    }

    /// Size of one partial parsimony block, in words.
    pub fn pars_block_size(&self) -> usize {
        self.pars_block_size
    }

    /// Number of parsimony blocks handed out so far.
    pub fn parsimony_block_count(&self) -> usize {
        self.index_parsimony
    }

    /// Number of likelihood blocks handed out so far.
    pub fn likelihood_block_count(&self) -> usize {
        self.index_lh
    }

    /// Whether likelihood and scale blocks are being tracked this run.
    pub fn tracks_likelihood(&self) -> bool {
        self.track_likelihood
    }

    pub fn allocate_parsimony(&mut self) -> Result<ParsBlock, PlacementError> {
        if self.index_parsimony >= self.pars_capacity {
            return Err(PlacementError::ArenaExhausted {
                arena: "parsimony",
                capacity: self.pars_capacity,
            });
        }
        let block = ParsBlock(self.index_parsimony);
        self.index_parsimony += 1;
        Ok(block)
    }

    pub fn allocate_likelihood(&mut self) -> Result<(LhBlock, ScaleBlock), PlacementError> {
        if self.index_lh >= self.lh_capacity {
            return Err(PlacementError::ArenaExhausted {
                arena: "likelihood",
                capacity: self.lh_capacity,
            });
        }
        let blocks = (LhBlock(self.index_lh), ScaleBlock(self.index_lh));
        self.index_lh += 1;
        Ok(blocks)
    }

    /// Bind any missing blocks to a neighbor slot: a parsimony block always,
    /// likelihood and scale blocks when the run tracks likelihood.
    pub fn allocate_all(&mut self, slot: &mut Neighbor) -> Result<(), PlacementError> {
        if slot.partial_pars.is_none() {
            slot.partial_pars = Some(self.allocate_parsimony()?);
        }
        if self.track_likelihood && slot.partial_lh.is_none() {
            let (lh, scale) = self.allocate_likelihood()?;
            slot.partial_lh = Some(lh);
            slot.scale_num = Some(scale);
        }
        Ok(())
    }

    /// Move the computed state of one slot into another: blocks and computed
    /// flags swap, then the vacated slot gets fresh blocks and cleared flags.
    pub fn hand_over(
        &mut self,
        tree: &mut PhyloTree,
        from: (NodeId, usize),
        to: (NodeId, usize),
    ) -> Result<(), PlacementError> {
        let (from_slot, to_slot) = tree.slot_pair_mut(from, to);
        mem::swap(&mut from_slot.partial_pars, &mut to_slot.partial_pars);
        mem::swap(&mut from_slot.partial_lh, &mut to_slot.partial_lh);
        mem::swap(&mut from_slot.scale_num, &mut to_slot.scale_num);
        mem::swap(&mut from_slot.pars_computed, &mut to_slot.pars_computed);
        mem::swap(&mut from_slot.lh_computed, &mut to_slot.lh_computed);
        self.allocate_all(from_slot)?;
        from_slot.clear_computed_flags();
        Ok(())
    }

    pub fn pars_block(&self, block: ParsBlock) -> &[u32] {
        let start = block.0 * self.pars_block_size;
        &self.pars_arena[start..start + self.pars_block_size]
    }

    pub fn pars_block_mut(&mut self, block: ParsBlock) -> &mut [u32] {
        let start = block.0 * self.pars_block_size;
        &mut self.pars_arena[start..start + self.pars_block_size]
    }

    pub fn lh_block(&self, block: LhBlock) -> &[f64] {
        let start = block.0 * self.lh_block_size;
        &self.lh_arena[start..start + self.lh_block_size]
    }

    pub fn lh_block_mut(&mut self, block: LhBlock) -> &mut [f64] {
        let start = block.0 * self.lh_block_size;
        &mut self.lh_arena[start..start + self.lh_block_size]
    }

    pub fn scale_block(&self, block: ScaleBlock) -> &[u8] {
        let start = block.0 * self.scale_block_size;
        &self.scale_arena[start..start + self.scale_block_size]
    }

    pub fn scale_block_mut(&mut self, block: ScaleBlock) -> &mut [u8] {
        let start = block.0 * self.scale_block_size;
        &mut self.scale_arena[start..start + self.scale_block_size]
    }

    /// Combine two parsimony blocks into a third through the kernel, using an
    /// internal scratch buffer so the arena is only borrowed once at a time.
    /// Returns the combined subtree score.
    pub fn combine_out_of_tree(
        &mut self,
        kernel: &dyn ParsimonyKernel,
        left: ParsBlock,
        right: ParsBlock,
        out: ParsBlock,
    ) -> u32 {
        debug_assert!(out != left && out != right);
        let mut buffer = mem::take(&mut self.scratch);
        buffer.resize(self.pars_block_size, 0);
        let score = kernel.combine_out_of_tree(
            self.pars_block(left),
            self.pars_block(right),
            &mut buffer,
        );
        self.pars_block_mut(out).copy_from_slice(&buffer);
        self.scratch = buffer;
        score
    }
}
