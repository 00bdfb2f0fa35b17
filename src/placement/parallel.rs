use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::blocks::BlockAllocator;
use crate::error::PlacementError;
use crate::kernel::ParsimonyKernel;
use crate::tree::{NodeId, PhyloTree};

/// A slot address: the owning node and the index into its neighbor list.
pub(crate) type SlotKey = (NodeId, usize);

/// Computes partial parsimony vectors lazily and bottom-up. Work is gathered
/// into a queue of (slot, anchor) pairs, dependencies are discovered one
/// level at a time, deeper levels resolve first, and each level is then
/// swept in parallel: every item combines already-computed deeper vectors
/// and writes only its own slot's block.
pub struct ParallelParsimonyCalculator<'a> {
    tree: &'a mut PhyloTree,
    blocks: &'a mut BlockAllocator,
    kernel: &'a dyn ParsimonyKernel,
    work: Vec<(SlotKey, NodeId)>,
}

impl<'a> ParallelParsimonyCalculator<'a> {
    pub fn new(
        tree: &'a mut PhyloTree,
        blocks: &'a mut BlockAllocator,
        kernel: &'a dyn ParsimonyKernel,
    ) -> Self {
        Self {
            tree,
            blocks,
            kernel,
            work: Vec::new(),
        }
    }

    /// Queue a slot for recomputation unless its vector is already up to
    /// date. Duplicates are allowed; the computation is idempotent.
    pub fn schedule(&mut self, slot: SlotKey) -> Result<(), PlacementError> {
        if self.tree.slot(slot.0, slot.1).pars_computed {
            return Ok(());
        }
        self.blocks.allocate_all(self.tree.slot_mut(slot.0, slot.1))?;
        self.work.push((slot, slot.0));
        Ok(())
    }

    /// Bring both slots of the branch `u`-`v` up to date and return the
    /// branch's parsimony score together with the number of state changes on
    /// the branch itself.
    pub fn compute_branch(&mut self, u: NodeId, v: NodeId) -> Result<(u32, u32), PlacementError> {
        let forward = (
            u,
            self.tree
                .find_neighbor(u, v)
                .expect("branch endpoints are adjacent"),
        );
        let backward = (
            v,
            self.tree
                .find_neighbor(v, u)
                .expect("branch endpoints are adjacent"),
        );
        let start_index = self.work.len();
        self.schedule(forward)?;
        self.schedule(backward)?;
        self.calculate(start_index)?;

        let a = self
            .tree
            .slot(forward.0, forward.1)
            .partial_pars
            .expect("scheduled slot has a block");
        let b = self
            .tree
            .slot(backward.0, backward.1)
            .partial_pars
            .expect("scheduled slot has a block");
        Ok(self
            .kernel
            .compute_parsimony_branch(self.blocks.pars_block(a), self.blocks.pars_block(b)))
    }

    /// Resolve everything queued from `start_index` onwards. Discovers the
    /// items' dependencies, recurses so deeper levels finish first, then
    /// sweeps the level in parallel and truncates the queue back.
    pub fn calculate(&mut self, start_index: usize) -> Result<(), PlacementError> {
        let stop_index = self.work.len();
        if stop_index <= start_index {
            return Ok(());
        }

        // find work to do one level deeper
        for index in (start_index..stop_index).rev() {
            let ((owner, slot_index), anchor) = self.work[index];
            let node = self
                .tree
                .slot(owner, slot_index)
                .node()
                .expect("scheduled slot is attached");
            for next in 0..self.tree.slot_count(node) {
                match self.tree.slot(node, next).node() {
                    Some(opposite) if opposite != anchor => self.schedule((node, next))?,
                    _ => {}
                }
            }
        }

        // deeper dependencies resolve first, then vanish from the queue
        self.calculate(stop_index)?;
        self.work.truncate(stop_index);

        // parallel sweep over this level; results are gathered and applied
        // on the coordinator so each wave only reads the arena
        let level = &self.work[start_index..stop_index];
        let tree = &*self.tree;
        let blocks = &*self.blocks;
        let kernel = self.kernel;
        let results: Vec<Vec<u32>> = level
            .par_iter()
            .map(|&((owner, slot_index), _)| compute_partial(tree, blocks, kernel, owner, slot_index))
            .collect();

        for (offset, data) in results.into_iter().enumerate() {
            let ((owner, slot_index), _) = self.work[start_index + offset];
            let block = self
                .tree
                .slot(owner, slot_index)
                .partial_pars
                .expect("scheduled slot has a block");
            self.blocks.pars_block_mut(block).copy_from_slice(&data);
            self.tree.slot_mut(owner, slot_index).pars_computed = true;
        }

        self.work.truncate(start_index);
        Ok(())
    }
}

/// Compute one slot's partial vector: the tip vector if the slot points at a
/// leaf, otherwise the kernel combination of the opposite node's away-facing
/// slots, which deeper waves have already computed.
fn compute_partial(
    tree: &PhyloTree,
    blocks: &BlockAllocator,
    kernel: &dyn ParsimonyKernel,
    owner: NodeId,
    slot_index: usize,
) -> Vec<u32> {
    let node = tree
        .slot(owner, slot_index)
        .node()
        .expect("scheduled slot is attached");
    let mut out = vec![0u32; blocks.pars_block_size()];

    if let Some(taxon) = tree.taxon(node) {
        kernel.compute_tip_partial(taxon, &mut out);
        return out;
    }

    let mut children: Vec<&[u32]> = Vec::with_capacity(2);
    for index in 0..tree.slot_count(node) {
        let slot = tree.slot(node, index);
        match slot.node() {
            Some(opposite) if opposite != owner => {
                debug_assert!(slot.pars_computed, "child slot resolved in a deeper wave");
                children.push(blocks.pars_block(slot.partial_pars.expect("child slot has a block")));
            }
            _ => {}
        }
    }

    match children.len() {
        0 => out,
        1 => {
            out.copy_from_slice(children[0]);
            out
        }
        _ => {
            kernel.combine_out_of_tree(children[0], children[1], &mut out);
            // fold any further children in, for transiently non-binary nodes
            for extra in &children[2..] {
                let previous = out.clone();
                kernel.combine_out_of_tree(&previous, extra, &mut out);
            }
            out
        }
    }
}
