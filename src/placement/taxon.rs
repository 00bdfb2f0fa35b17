use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::trace;

use crate::alignment::TaxonId;
use crate::blocks::{BlockAllocator, ParsBlock};
use crate::error::PlacementError;
use crate::kernel::{LikelihoodKernel, ParsimonyKernel};
use crate::placement::cost::{
    assess_placement, assess_placement_parsimony, PlacementCostCalculator, SearchHeuristic,
};
use crate::placement::parallel::ParallelParsimonyCalculator;
use crate::placement::targets::{TargetBranchRange, TargetBranchRef};
use crate::tree::{NodeId, PhyloTree};

/// How many placements the less fussy store keeps per candidate. Small on
/// purpose: the list is maintained by bubble insertion.
const MAX_PLACEMENTS_TO_KEEP: usize = 5;

/// The target an assessed placement refers to, with a snapshot of the edge's
/// endpoints taken at scoring time so staleness is detectable at insert time.
#[derive(Copy, Clone, Debug)]
struct PlacementSite {
    target: TargetBranchRef,
    node1: NodeId,
    node2: NodeId,
}

/// A costed placement of one candidate at one target branch: the score plus
/// the three branch lengths an insertion there would use. Scores are stored
/// so that lower is always better; likelihoods arrive negated.
#[derive(Copy, Clone, Debug)]
pub struct PossiblePlacement {
    site: Option<PlacementSite>,
    pub(crate) score: f64,
    pub(crate) len_to_new_taxon: f64,
    pub(crate) len_to_node1: f64,
    pub(crate) len_to_node2: f64,
}

impl PossiblePlacement {
    pub(crate) fn unassessed() -> Self {
        Self {
            site: None,
            score: f64::INFINITY,
            len_to_new_taxon: -1.0,
            len_to_node1: 0.0,
            len_to_node2: 0.0,
        }
    }

    pub(crate) fn set_target(&mut self, range: &TargetBranchRange, reference: TargetBranchRef) {
        let (node1, node2) = range.get(reference).nodes();
        self.site = Some(PlacementSite {
            target: reference,
            node1,
            node2,
        });
    }

    pub fn target(&self) -> Option<TargetBranchRef> {
        self.site.map(|site| site.target)
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// The score in its natural sense: parsimony as-is, likelihood un-negated.
    pub(crate) fn natural_score(&self, parsimony: bool) -> f64 {
        if parsimony {
            self.score
        } else {
            -self.score
        }
    }

    pub fn branch_lengths(&self) -> (f64, f64, f64) {
        (self.len_to_node1, self.len_to_node2, self.len_to_new_taxon)
    }

    /// Whether the placement can still be executed: its target exists, is
    /// unconsumed, and still spans the endpoints seen at scoring time.
    pub fn can_still_use(&self, range: &TargetBranchRange) -> bool {
        match self.site {
            Some(site) => {
                !range.is_used(site.target)
                    && range.endpoints_match(site.target, site.node1, site.node2)
            }
            None => false,
        }
    }

    pub(crate) fn forget(&mut self) {
        self.site = None;
    }
}

/// Whether a candidate remembers only its best placement or a bounded,
/// sorted list of good ones. The list makes gazumped candidates less fussy:
/// surviving entries are reconsidered before any rescoring happens.
enum PlacementStore {
    BestOnly,
    TopRanked { kept: Vec<PossiblePlacement> },
}

/// A taxon waiting to be added to the tree. It owns a stub: the new leaf
/// joined to a new interior node, both tree-external until insertion. The
/// partial parsimony vector of the stub seen from the interior is computed
/// once at construction and reused for every scoring.
pub struct TaxonToPlace {
    taxon_id: TaxonId,
    taxon_name: String,
    new_leaf: NodeId,
    new_interior: NodeId,
    partial_pars: ParsBlock,
    best_placement: PossiblePlacement,
    store: PlacementStore,
    inserted: bool,
}

impl TaxonToPlace {
    /// Create the stub pair for a taxon and compute its tip vector. With
    /// `spare_trial_slots`, two detached slots with bound blocks are added to
    /// the interior so likelihood trial splicing never allocates.
    pub fn new(
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        kernel: &dyn ParsimonyKernel,
        taxon_id: TaxonId,
        taxon_name: &str,
        keep_top_placements: bool,
        spare_trial_slots: bool,
    ) -> Result<Self, PlacementError> {
        let new_leaf = tree.new_leaf(taxon_id, taxon_name);
        let new_interior = tree.new_node();
        tree.add_edge(new_interior, new_leaf, -1.0);

        let stub_slot = tree
            .find_neighbor(new_interior, new_leaf)
            .expect("stub edge was just created");
        blocks.allocate_all(tree.slot_mut(new_interior, stub_slot))?;
        let partial_pars = tree
            .slot(new_interior, stub_slot)
            .partial_pars
            .expect("stub slot has a block");
        kernel.compute_tip_partial(taxon_id, blocks.pars_block_mut(partial_pars));
        tree.slot_mut(new_interior, stub_slot).pars_computed = true;

        if spare_trial_slots {
            for _ in 0..2 {
                let spare = tree.add_spare_slot(new_interior);
                blocks.allocate_all(tree.slot_mut(new_interior, spare))?;
            }
        }

        Ok(Self {
            taxon_id,
            taxon_name: taxon_name.to_string(),
            new_leaf,
            new_interior,
            partial_pars,
            best_placement: PossiblePlacement::unassessed(),
            store: if keep_top_placements {
                PlacementStore::TopRanked { kept: Vec::new() }
            } else {
                PlacementStore::BestOnly
            },
            inserted: false,
        })
    }

    pub fn taxon_id(&self) -> TaxonId {
        self.taxon_id
    }

    pub fn name(&self) -> &str {
        &self.taxon_name
    }

    pub fn is_inserted(&self) -> bool {
        self.inserted
    }

    pub(crate) fn new_leaf(&self) -> NodeId {
        self.new_leaf
    }

    pub(crate) fn new_interior(&self) -> NodeId {
        self.new_interior
    }

    pub(crate) fn parsimony_block(&self) -> ParsBlock {
        self.partial_pars
    }

    pub fn best_placement(&self) -> &PossiblePlacement {
        &self.best_placement
    }

    pub fn can_insert(&self, targets: &TargetBranchRange) -> bool {
        self.best_placement.can_still_use(targets)
    }

    /// Replace whatever is remembered with the best of the given placements.
    pub(crate) fn consider_placements(
        &mut self,
        placements: Vec<PossiblePlacement>,
        targets: &TargetBranchRange,
    ) {
        self.best_placement = PossiblePlacement::unassessed();
        if let PlacementStore::TopRanked { kept } = &mut self.store {
            kept.clear();
        }
        for placement in placements {
            self.consider_additional_placement(placement, targets);
        }
    }

    /// Offer one more placement. Returns true iff it became the new best.
    /// Ties never displace an earlier placement, so the outcome is the same
    /// under any parallel schedule that feeds placements in a fixed order.
    pub(crate) fn consider_additional_placement(
        &mut self,
        placement: PossiblePlacement,
        targets: &TargetBranchRange,
    ) -> bool {
        match &mut self.store {
            PlacementStore::BestOnly => {
                let improves = !self.best_placement.can_still_use(targets)
                    || placement.score < self.best_placement.score;
                if improves {
                    self.best_placement = placement;
                }
                improves
            }
            PlacementStore::TopRanked { kept } => {
                if kept.len() >= MAX_PLACEMENTS_TO_KEEP {
                    let worst = kept.last().expect("store is at capacity");
                    if worst.score < placement.score {
                        return false;
                    }
                    kept.pop();
                }
                kept.push(placement);
                let mut sweep = kept.len() - 1;
                while sweep > 0 && placement.score < kept[sweep - 1].score {
                    kept[sweep] = kept[sweep - 1];
                    sweep -= 1;
                }
                kept[sweep] = placement;
                if sweep == 0 {
                    self.best_placement = placement;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Score this candidate against every branch in the range and remember
    /// the best. The parsimony path runs the range in parallel; likelihood
    /// assessment splices the tree and therefore runs serially.
    pub(crate) fn find_placement(
        &mut self,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        targets: &TargetBranchRange,
        heuristic: &SearchHeuristic,
        calculator: &PlacementCostCalculator,
        kernel: &dyn ParsimonyKernel,
        lh_kernel: Option<&dyn LikelihoodKernel>,
    ) -> Result<(), PlacementError> {
        trace!(taxon = %self.taxon_name, "scoring");
        let placements: Vec<PossiblePlacement> = if calculator.uses_likelihood() {
            let mut assessed = Vec::with_capacity(targets.len());
            for index in 0..targets.len() {
                let reference = TargetBranchRef(index);
                if targets.is_used(reference) {
                    continue;
                }
                if heuristic.is_placement_worth_trying(self, targets.get(reference)) {
                    assessed.push(assess_placement(
                        calculator, tree, blocks, kernel, lh_kernel, targets, reference, self,
                    )?);
                }
            }
            assessed
        } else {
            let tree = &*tree;
            let blocks = &*blocks;
            let candidate: &TaxonToPlace = self;
            (0..targets.len())
                .into_par_iter()
                .filter_map(|index| {
                    let reference = TargetBranchRef(index);
                    if targets.is_used(reference) {
                        return None;
                    }
                    if heuristic.is_placement_worth_trying(candidate, targets.get(reference)) {
                        Some(assess_placement_parsimony(
                            kernel, blocks, tree, targets, reference, candidate,
                        ))
                    } else {
                        None
                    }
                })
                .collect()
        };
        self.consider_placements(placements, targets);
        trace!(
            taxon = %self.taxon_name,
            score = self.best_placement.score,
            "best placement found"
        );
        self.inserted = false;
        Ok(())
    }

    /// Splice the stub into the middle of the edge `node1`-`node2`: the new
    /// interior takes over the edge's two halves (inheriting their computed
    /// state through hand-over) and the two freshly formed branches are
    /// recomputed eagerly.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn graft_at_branch(
        &mut self,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        kernel: &dyn ParsimonyKernel,
        node1: NodeId,
        node2: NodeId,
        len_to_node1: f64,
        len_to_node2: f64,
        len_to_new_taxon: f64,
    ) -> Result<(), PlacementError> {
        tree.set_edge_length(self.new_interior, self.new_leaf, len_to_new_taxon);
        tree.attach_neighbor(self.new_interior, node1, len_to_node1);
        tree.attach_neighbor(self.new_interior, node2, len_to_node2);

        // the split halves of the consumed edge inherit its computed state;
        // the vacated slots get fresh blocks and recompute below
        let from1 = (
            node1,
            tree.find_neighbor(node1, node2)
                .expect("placement endpoints are adjacent"),
        );
        let to1 = (
            self.new_interior,
            tree.find_neighbor(self.new_interior, node2)
                .expect("stub was just linked"),
        );
        blocks.hand_over(tree, from1, to1)?;
        let from2 = (
            node2,
            tree.find_neighbor(node2, node1)
                .expect("placement endpoints are adjacent"),
        );
        let to2 = (
            self.new_interior,
            tree.find_neighbor(self.new_interior, node1)
                .expect("stub was just linked"),
        );
        blocks.hand_over(tree, from2, to2)?;

        tree.update_neighbor(node1, node2, self.new_interior, len_to_node1);
        tree.update_neighbor(node2, node1, self.new_interior, len_to_node2);

        {
            let mut calculator = ParallelParsimonyCalculator::new(tree, blocks, kernel);
            calculator.compute_branch(node1, self.new_interior)?;
            calculator.compute_branch(node2, self.new_interior)?;
        }

        self.inserted = true;
        Ok(())
    }

    /// Execute the remembered placement. Assumes `can_insert` held and the
    /// tree was not modified in between.
    pub(crate) fn insert_into_tree(
        &mut self,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        targets: &mut TargetBranchRange,
        kernel: &dyn ParsimonyKernel,
        likelihood_wanted: bool,
    ) -> Result<(), PlacementError> {
        let placement = self.best_placement;
        let site = placement.site.expect("insert requires a live placement");
        let (node1, node2) = (site.node1, site.node2);

        self.graft_at_branch(
            tree,
            blocks,
            kernel,
            node1,
            node2,
            placement.len_to_node1,
            placement.len_to_node2,
            placement.len_to_new_taxon,
        )?;

        // the consumed target's summary is exactly the partial the leaf now
        // sees through the new interior
        let leaf_slot = tree
            .find_neighbor(self.new_leaf, self.new_interior)
            .expect("stub edge exists");
        targets.hand_over(site.target, tree.slot_mut(self.new_leaf, leaf_slot));

        let r1 = targets.add_new_ref(tree, blocks, kernel, self.new_interior, node1, likelihood_wanted)?;
        let r2 = targets.add_new_ref(tree, blocks, kernel, self.new_interior, node2, likelihood_wanted)?;
        let r3 = targets.add_new_ref(
            tree,
            blocks,
            kernel,
            self.new_interior,
            self.new_leaf,
            likelihood_wanted,
        )?;
        targets.set_replacements(site.target, vec![r1, r2, r3]);
        Ok(())
    }

    /// Recover from a gazump: the preferred target was consumed by an
    /// earlier insertion. Walks the consumed target's replacement branches
    /// (following replacements of replacements), scores every live one and
    /// inserts at the best. Fails if no live replacement exists.
    pub(crate) fn insert_nearby(
        &mut self,
        tree: &mut PhyloTree,
        blocks: &mut BlockAllocator,
        targets: &mut TargetBranchRange,
        kernel: &dyn ParsimonyKernel,
        lh_kernel: Option<&dyn LikelihoodKernel>,
        calculator: &PlacementCostCalculator,
    ) -> Result<(), PlacementError> {
        let blocked = self.best_placement.target();
        self.forget_gazumped_placements(targets);

        let mut placements = Vec::new();
        if let Some(start) = blocked {
            let mut stack: Vec<TargetBranchRef> = match targets.get(start).replacements() {
                Some(replacements) => replacements.to_vec(),
                None => Vec::new(),
            };
            while let Some(reference) = stack.pop() {
                if targets.is_used(reference) {
                    if let Some(replacements) = targets.get(reference).replacements() {
                        stack.extend_from_slice(replacements);
                    }
                } else {
                    placements.push(assess_placement(
                        calculator, tree, blocks, kernel, lh_kernel, targets, reference, self,
                    )?);
                }
            }
        }
        for placement in placements {
            self.consider_additional_placement(placement, targets);
        }
        if !self.can_insert(targets) {
            return Err(PlacementError::NoLivePlacement {
                taxon: self.taxon_name.clone(),
            });
        }
        self.insert_into_tree(tree, blocks, targets, kernel, calculator.uses_likelihood())
    }

    /// Drop remembered placements whose target has been consumed.
    pub(crate) fn forget_gazumped_placements(&mut self, targets: &TargetBranchRange) {
        match &mut self.store {
            PlacementStore::BestOnly => self.best_placement.forget(),
            PlacementStore::TopRanked { kept } => {
                kept.retain(|placement| placement.can_still_use(targets));
                match kept.first() {
                    Some(&best) => self.best_placement = best,
                    None => self.best_placement.forget(),
                }
            }
        }
    }

    /// Drop every remembered placement. Called before range compaction so no
    /// ref survives the index shuffle.
    pub(crate) fn forget_placements(&mut self) {
        self.best_placement.forget();
        if let PlacementStore::TopRanked { kept } = &mut self.store {
            kept.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::ArenaPlan;

    fn placement(score: f64) -> PossiblePlacement {
        let mut p = PossiblePlacement::unassessed();
        p.score = score;
        p.site = Some(PlacementSite {
            target: TargetBranchRef(score as usize),
            node1: NodeId(0),
            node2: NodeId(1),
        });
        p
    }

    fn top_ranked_taxon() -> TaxonToPlace {
        TaxonToPlace {
            taxon_id: TaxonId(0),
            taxon_name: "probe".to_string(),
            new_leaf: NodeId(0),
            new_interior: NodeId(1),
            partial_pars: ParsBlock(0),
            best_placement: PossiblePlacement::unassessed(),
            store: PlacementStore::TopRanked { kept: Vec::new() },
            inserted: false,
        }
    }

    fn empty_range() -> TargetBranchRange {
        let tree = PhyloTree::new();
        let mut blocks = BlockAllocator::new(
            2,
            0,
            0,
            ArenaPlan {
                parsimony_blocks: 0,
                likelihood_blocks: 0,
            },
        );
        TargetBranchRange::new(&tree, &mut blocks, false).unwrap()
    }

    #[test]
    fn top_ranked_store_keeps_a_sorted_bounded_list() {
        let mut taxon = top_ranked_taxon();
        let range = empty_range();
        for score in [9.0, 3.0, 7.0, 5.0, 1.0, 8.0, 2.0] {
            taxon.consider_additional_placement(placement(score), &range);
        }
        let PlacementStore::TopRanked { kept } = &taxon.store else {
            unreachable!()
        };
        let scores: Vec<f64> = kept.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![1.0, 2.0, 3.0, 5.0, 7.0]);
        assert_eq!(taxon.best_placement.score, 1.0);
    }

    #[test]
    fn new_best_is_reported_only_for_rank_zero() {
        let mut taxon = top_ranked_taxon();
        let range = empty_range();
        assert!(taxon.consider_additional_placement(placement(4.0), &range));
        assert!(!taxon.consider_additional_placement(placement(6.0), &range));
        assert!(taxon.consider_additional_placement(placement(2.0), &range));
        // an equal score does not displace the incumbent
        assert!(!taxon.consider_additional_placement(placement(2.0), &range));
    }
}
