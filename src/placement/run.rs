use std::time::{Duration, Instant};

use rayon::iter::{IntoParallelRefMutIterator, ParallelIterator};
use tracing::{debug, info};

use crate::alignment::{Alignment, TaxonId};
use crate::blocks::{ArenaPlan, BlockAllocator};
use crate::error::PlacementError;
use crate::kernel::{LikelihoodKernel, ParsimonyKernel};
use crate::placement::config::{CostFunction, PlacementConfig, ScoringAxis};
use crate::placement::cost::{
    assess_placement, assess_placement_parsimony, fix_negative_branch_lengths,
    PlacementCostCalculator, SearchHeuristic,
};
use crate::placement::parallel::ParallelParsimonyCalculator;
use crate::placement::targets::{TargetBranchRange, TargetBranchRef};
use crate::placement::taxon::TaxonToPlace;
use crate::tree::{NodeId, PhyloTree};

/// Cleanup hook run after every single insertion. Only the no-op exists;
/// the `L` configuration clause reserves the selector.
#[derive(Copy, Clone, Debug, Default)]
pub enum TaxonCleaner {
    #[default]
    Noop,
}

impl TaxonCleaner {
    pub fn clean_up_after_taxon_placement(&self, _taxon: &TaxonToPlace, _tree: &mut PhyloTree) {
        match self {
            TaxonCleaner::Noop => {}
        }
    }
}

/// Cleanup hook run after every batch. Only the no-op exists; the `A`
/// configuration clause reserves the selector.
#[derive(Copy, Clone, Debug, Default)]
pub enum BatchCleaner {
    #[default]
    Noop,
}

impl BatchCleaner {
    pub fn clean_up_after_batch(&self, batch_size: usize, _tree: &mut PhyloTree) {
        match self {
            BatchCleaner::Noop => {
                debug!(batch_size, "processed batch");
            }
        }
    }
}

/// Cleanup hook run once after all passes. Only the no-op exists; the `T`
/// configuration clause reserves the selector.
#[derive(Copy, Clone, Debug, Default)]
pub enum GlobalCleaner {
    #[default]
    Noop,
}

impl GlobalCleaner {
    pub fn clean_up_after_placement(&self, _tree: &mut PhyloTree) {
        match self {
            GlobalCleaner::Noop => {}
        }
    }
}

/// Counters and timing breakdown of one placement run.
#[derive(Debug, Default)]
pub struct PlacementSummary {
    /// Taxa inserted, gazumped ones included.
    pub inserted: usize,
    /// Inserts whose preferred branch had been consumed by an earlier
    /// insertion of the same batch.
    pub blocked: usize,
    /// Number of outer passes over the candidate list.
    pub passes: usize,
    /// Whether the stepwise-addition fast path handled the run.
    pub fast_path: bool,
    pub refresh_time: Duration,
    pub search_time: Duration,
    pub insert_time: Duration,
}

/// Orchestrates the addition of a batch of new taxa to a tree: refresh the
/// target branch summaries, score every candidate against every target, sort,
/// insert the batch's quota, and repeat until every candidate found a home.
pub struct PlacementRun<'a> {
    tree: &'a mut PhyloTree,
    alignment: &'a Alignment,
    kernel: &'a dyn ParsimonyKernel,
    lh_kernel: Option<&'a dyn LikelihoodKernel>,
    config: PlacementConfig,
    heuristic: SearchHeuristic,
    calculator: PlacementCostCalculator,
    taxon_cleaner: TaxonCleaner,
    batch_cleaner: BatchCleaner,
    global_cleaner: GlobalCleaner,
}

impl<'a> PlacementRun<'a> {
    pub fn new(
        tree: &'a mut PhyloTree,
        alignment: &'a Alignment,
        kernel: &'a dyn ParsimonyKernel,
        config: PlacementConfig,
    ) -> Self {
        let calculator = PlacementCostCalculator::for_cost_function(config.cost_function);
        Self {
            tree,
            alignment,
            kernel,
            lh_kernel: None,
            config,
            heuristic: SearchHeuristic::default(),
            calculator,
            taxon_cleaner: TaxonCleaner::default(),
            batch_cleaner: BatchCleaner::default(),
            global_cleaner: GlobalCleaner::default(),
        }
    }

    /// Supply the likelihood kernel the `ML` and `FML` cost functions need.
    pub fn with_likelihood_kernel(mut self, lh_kernel: &'a dyn LikelihoodKernel) -> Self {
        self.lh_kernel = Some(lh_kernel);
        self
    }

    /// Grow the tree by the given taxa, placing each at the branch the cost
    /// function likes best. An empty batch returns immediately and leaves
    /// the tree untouched.
    pub fn add_new_taxa(&mut self, taxa_ids: &[TaxonId]) -> Result<PlacementSummary, PlacementError> {
        let mut summary = PlacementSummary::default();
        if taxa_ids.is_empty() {
            return Ok(summary);
        }
        if self.config.cost_function.uses_likelihood() && self.lh_kernel.is_none() {
            return Err(PlacementError::ConfigurationInvalid(
                "likelihood cost functions require a likelihood kernel".to_string(),
            ));
        }
        assert!(
            !self.tree.branches().is_empty(),
            "placement requires a tree with at least two leaves"
        );

        let total = taxa_ids.len();
        let mut taxa_per_batch = self.config.taxa_per_batch(total);

        // stepwise addition is equivalent for single-taxon parsimony batches
        // under a global search, and needs no target branch range
        if taxa_per_batch == 1
            && self.heuristic.is_global_search()
            && self.config.cost_function.is_parsimony()
        {
            return self.stepwise_addition(taxa_ids);
        }

        let track_likelihood = self.config.cost_function.uses_likelihood();
        let leaf_count = self.tree.leaf_count();
        let initial_edges = self.tree.branches().len();
        let plan = ArenaPlan::for_placement(initial_edges, total, track_likelihood);
        let (lh_size, scale_size) = match self.lh_kernel {
            Some(kernel) if track_likelihood => {
                (kernel.likelihood_block_size(), kernel.scale_block_size())
            }
            _ => (0, 0),
        };
        let mut blocks =
            BlockAllocator::new(self.kernel.partial_length(), lh_size, scale_size, plan);

        if self.config.cost_function == CostFunction::SankoffParsimony {
            self.kernel.prepare_tip_partials();
        }
        self.tree.clear_all_partial_parsimony();
        self.tree.clear_all_partial_lh();

        let setup_start = Instant::now();
        let mut candidates = Vec::with_capacity(total);
        for &taxon_id in taxa_ids {
            candidates.push(TaxonToPlace::new(
                self.tree,
                &mut blocks,
                self.kernel,
                taxon_id,
                self.alignment.taxon_name(taxon_id),
                self.config.keep_top_placements,
                track_likelihood,
            )?);
        }
        let mut targets = TargetBranchRange::new(self.tree, &mut blocks, track_likelihood)?;
        info!(
            candidates = candidates.len(),
            targets = targets.len(),
            setup = ?setup_start.elapsed(),
            batch_size = taxa_per_batch,
            inserts_per_batch = self.config.inserts_per_batch(taxa_per_batch),
            "placement set up"
        );
        debug!(
            estimate = taxa_addition_work_estimate(
                total,
                taxa_per_batch,
                self.config.inserts_per_batch(taxa_per_batch),
                leaf_count
            ),
            "estimated placement work"
        );

        let mut new_taxa_count = candidates.len();
        while new_taxa_count > 0 {
            summary.passes += 1;
            if new_taxa_count < taxa_per_batch {
                taxa_per_batch = new_taxa_count;
            }
            let mut batch_start = 0;
            while batch_start + taxa_per_batch <= new_taxa_count {
                let batch_stop = batch_start + taxa_per_batch;

                let refresh_start = Instant::now();
                if track_likelihood {
                    self.tree.clear_all_partial_lh();
                }
                self.tree.clear_all_partial_parsimony();
                for index in 0..targets.len() {
                    // targets consumed by an earlier batch of this pass keep
                    // their used marker until compaction; they are no longer
                    // edges and own no summary block
                    if targets.is_used(TargetBranchRef(index)) {
                        continue;
                    }
                    targets.compute_state(index, self.tree, &mut blocks, self.kernel)?;
                }
                summary.refresh_time += refresh_start.elapsed();

                let search_start = Instant::now();
                self.score_batch(&mut blocks, &targets, &mut candidates[batch_start..batch_stop])?;
                summary.search_time += search_start.elapsed();

                let inserts_per_batch = self.config.inserts_per_batch(batch_stop - batch_start);
                candidates[batch_start..batch_stop].sort_by(|a, b| {
                    a.best_placement()
                        .score()
                        .total_cmp(&b.best_placement().score())
                });
                let insert_stop = (batch_start + inserts_per_batch).min(batch_stop);

                let insert_start = Instant::now();
                let mut insert_count = 0;
                for index in batch_start..insert_stop {
                    let candidate = &mut candidates[index];
                    if candidate.can_insert(&targets) {
                        candidate.insert_into_tree(
                            self.tree,
                            &mut blocks,
                            &mut targets,
                            self.kernel,
                            track_likelihood,
                        )?;
                        insert_count += 1;
                        summary.inserted += 1;
                        log_insert(
                            summary.inserted,
                            self.config.cost_function,
                            candidate,
                            "at its preferred branch",
                        );
                    } else {
                        // another candidate got there first
                        summary.blocked += 1;
                        candidate.insert_nearby(
                            self.tree,
                            &mut blocks,
                            &mut targets,
                            self.kernel,
                            self.lh_kernel,
                            &self.calculator,
                        )?;
                        insert_count += 1;
                        summary.inserted += 1;
                        log_insert(
                            summary.inserted,
                            self.config.cost_function,
                            candidate,
                            "near its preferred branch",
                        );
                    }
                    self.taxon_cleaner
                        .clean_up_after_taxon_placement(&candidates[index], self.tree);
                }
                summary.insert_time += insert_start.elapsed();
                debug_assert!(insert_count > 0, "a non-empty batch always inserts");
                if batch_stop - batch_start > 1 {
                    debug!(
                        inserted = insert_count,
                        batch = batch_stop - batch_start,
                        "batch done"
                    );
                }
                self.batch_cleaner
                    .clean_up_after_batch(batch_stop - batch_start, self.tree);
                if track_likelihood {
                    if let Some(lh_kernel) = self.lh_kernel {
                        lh_kernel.fix_negative_branch(self.tree, &mut blocks);
                    }
                }
                batch_start += taxa_per_batch;
            }

            // candidates not yet considered roll over first, then the ones
            // that were considered but missed the batch's insert quota
            let mut previous = std::mem::take(&mut candidates);
            let considered: Vec<TaxonToPlace> = previous.drain(..batch_start).collect();
            candidates = previous;
            for candidate in considered {
                if !candidate.is_inserted() {
                    candidates.push(candidate);
                }
            }
            // no ref may survive the compaction's index shuffle
            for candidate in candidates.iter_mut() {
                candidate.forget_placements();
            }
            targets.remove_used();
            new_taxa_count = candidates.len();
        }

        self.global_cleaner.clean_up_after_placement(self.tree);
        self.tree.clear_all_partial_parsimony();
        self.tree.clear_all_partial_lh();
        if track_likelihood {
            if let Some(lh_kernel) = self.lh_kernel {
                let score = lh_kernel.optimize_all_branches(self.tree, &mut blocks)?;
                info!(score, "optimized branch lengths after placement");
            }
        } else {
            fix_negative_branch_lengths(self.tree, &mut blocks, self.kernel)?;
        }

        info!(
            inserted = summary.inserted,
            blocked = summary.blocked,
            passes = summary.passes,
            refresh = ?summary.refresh_time,
            search = ?summary.search_time,
            insert = ?summary.insert_time,
            "finished adding taxa"
        );
        Ok(summary)
    }

    /// Score one batch of candidates against every target, honoring the
    /// configured loop axis. Parsimony costs run data-parallel; likelihood
    /// costs splice the tree and stay on the coordinator.
    fn score_batch(
        &mut self,
        blocks: &mut BlockAllocator,
        targets: &TargetBranchRange,
        candidates: &mut [TaxonToPlace],
    ) -> Result<(), PlacementError> {
        match (self.config.scoring_axis, self.calculator.uses_likelihood()) {
            (ScoringAxis::InsertionPointMajor, false) => {
                let tree = &*self.tree;
                let kernel = self.kernel;
                let heuristic = &self.heuristic;
                let blocks = &*blocks;
                for index in 0..targets.len() {
                    let reference = TargetBranchRef(index);
                    if targets.is_used(reference) {
                        continue;
                    }
                    candidates.par_iter_mut().for_each(|candidate| {
                        if heuristic.is_placement_worth_trying(candidate, targets.get(reference)) {
                            let placement = assess_placement_parsimony(
                                kernel, blocks, tree, targets, reference, candidate,
                            );
                            candidate.consider_additional_placement(placement, targets);
                        }
                    });
                }
                Ok(())
            }
            (ScoringAxis::NewTaxonMajor, false) => {
                for candidate in candidates.iter_mut() {
                    candidate.find_placement(
                        self.tree,
                        blocks,
                        targets,
                        &self.heuristic,
                        &self.calculator,
                        self.kernel,
                        self.lh_kernel,
                    )?;
                }
                Ok(())
            }
            (ScoringAxis::InsertionPointMajor, true) => {
                for index in 0..targets.len() {
                    let reference = TargetBranchRef(index);
                    if targets.is_used(reference) {
                        continue;
                    }
                    for candidate in candidates.iter_mut() {
                        if self
                            .heuristic
                            .is_placement_worth_trying(candidate, targets.get(reference))
                        {
                            let placement = assess_placement(
                                &self.calculator,
                                self.tree,
                                blocks,
                                self.kernel,
                                self.lh_kernel,
                                targets,
                                reference,
                                candidate,
                            )?;
                            candidate.consider_additional_placement(placement, targets);
                        }
                    }
                }
                Ok(())
            }
            (ScoringAxis::NewTaxonMajor, true) => {
                for candidate in candidates.iter_mut() {
                    candidate.find_placement(
                        self.tree,
                        blocks,
                        targets,
                        &self.heuristic,
                        &self.calculator,
                        self.kernel,
                        self.lh_kernel,
                    )?;
                }
                Ok(())
            }
        }
    }

    /// Single-taxon parsimony fast path: greedy stepwise addition. Scores
    /// every edge serially per taxon and grafts the stub at the best one,
    /// without building a target branch range.
    fn stepwise_addition(
        &mut self,
        taxa_ids: &[TaxonId],
    ) -> Result<PlacementSummary, PlacementError> {
        let mut summary = PlacementSummary {
            fast_path: true,
            ..PlacementSummary::default()
        };
        info!(
            candidates = taxa_ids.len(),
            "adding taxa by greedy stepwise parsimony"
        );
        let initial_edges = self.tree.branches().len();
        let plan = ArenaPlan::for_placement(initial_edges, taxa_ids.len(), false);
        let mut blocks = BlockAllocator::new(self.kernel.partial_length(), 0, 0, plan);
        if self.config.cost_function == CostFunction::SankoffParsimony {
            self.kernel.prepare_tip_partials();
        }

        let mut scratch = vec![0u32; blocks.pars_block_size()];
        for &taxon_id in taxa_ids {
            let search_start = Instant::now();
            let mut candidate = TaxonToPlace::new(
                self.tree,
                &mut blocks,
                self.kernel,
                taxon_id,
                self.alignment.taxon_name(taxon_id),
                false,
                false,
            )?;
            self.tree.clear_all_partial_parsimony();

            let mut best: Option<(f64, NodeId, NodeId)> = None;
            for (node1, node2) in self.tree.branches() {
                let slot1 = (
                    node1,
                    self.tree
                        .find_neighbor(node1, node2)
                        .expect("branch endpoints are adjacent"),
                );
                let slot2 = (
                    node2,
                    self.tree
                        .find_neighbor(node2, node1)
                        .expect("branch endpoints are adjacent"),
                );
                {
                    let mut calculator =
                        ParallelParsimonyCalculator::new(self.tree, &mut blocks, self.kernel);
                    calculator.schedule(slot1)?;
                    calculator.schedule(slot2)?;
                    calculator.calculate(0)?;
                }
                let left = self
                    .tree
                    .slot(slot1.0, slot1.1)
                    .partial_pars
                    .expect("endpoint slot has a block");
                let right = self
                    .tree
                    .slot(slot2.0, slot2.1)
                    .partial_pars
                    .expect("endpoint slot has a block");
                self.kernel.combine_out_of_tree(
                    blocks.pars_block(left),
                    blocks.pars_block(right),
                    &mut scratch,
                );
                let score = self.kernel.compute_parsimony_out_of_tree(
                    &scratch,
                    blocks.pars_block(candidate.parsimony_block()),
                ) as f64;
                if best.map_or(true, |(best_score, _, _)| score < best_score) {
                    best = Some((score, node1, node2));
                }
            }
            summary.search_time += search_start.elapsed();

            let insert_start = Instant::now();
            let (score, node1, node2) = best.expect("tree has at least one branch");
            let length = self
                .tree
                .edge_length(node1, node2)
                .expect("branch endpoints are adjacent");
            candidate.graft_at_branch(
                self.tree,
                &mut blocks,
                self.kernel,
                node1,
                node2,
                0.5 * length,
                0.5 * length,
                -1.0,
            )?;
            summary.inserted += 1;
            summary.insert_time += insert_start.elapsed();
            info!(
                insert = summary.inserted,
                taxon = %candidate.name(),
                cost = self.config.cost_function.label(),
                score,
                "inserted at its best branch"
            );
        }
        summary.passes = 1;
        fix_negative_branch_lengths(self.tree, &mut blocks, self.kernel)?;
        Ok(summary)
    }
}

fn log_insert(total_inserts: usize, cost: CostFunction, taxon: &TaxonToPlace, location: &str) {
    let placement = taxon.best_placement();
    let (len_to_node1, len_to_node2, len_to_new_taxon) = placement.branch_lengths();
    info!(
        insert = total_inserts,
        taxon = %taxon.name(),
        cost = cost.label(),
        score = placement.natural_score(cost.is_parsimony()),
        len_to_node1,
        len_to_node2,
        len_to_new_taxon,
        "inserted {}",
        location
    );
}

/// Heuristic estimate of the work one placement run will perform, only used
/// for progress reporting.
pub(crate) fn taxa_addition_work_estimate(
    new_taxa: usize,
    taxa_per_batch: usize,
    inserts_per_batch: usize,
    leaf_count: usize,
) -> f64 {
    let taxa = new_taxa as f64;
    let leaves = leaf_count as f64;
    if new_taxa <= taxa_per_batch || taxa_per_batch == 0 {
        if new_taxa <= inserts_per_batch || inserts_per_batch == 0 {
            return 3.0 * taxa * leaves;
        }
        return 3.0 * taxa * leaves * taxa / inserts_per_batch as f64;
    }
    let batches_this_pass = new_taxa / taxa_per_batch;
    let work_this_pass = (batches_this_pass * taxa_per_batch * leaf_count) as f64;
    let progress_this_pass = (batches_this_pass * inserts_per_batch) as f64;
    3.0 * work_this_pass / progress_this_pass * taxa
}

/// Excise a stride-sampled share of the tree's leaves, as requested by the
/// configuration's `R` clause, and report which taxa were removed so the
/// caller can hand them back as placement candidates.
pub fn remove_sample_taxa_if_requested(
    tree: &mut PhyloTree,
    alignment: &Alignment,
    config: &PlacementConfig,
) -> Vec<TaxonId> {
    let mut leaves: Vec<NodeId> = tree
        .traversal()
        .into_iter()
        .filter(|&node| tree.is_leaf(node))
        .collect();
    leaves.sort_by_key(|&node| tree.taxon(node));
    let count = leaves.len();
    let number_to_remove = config.removal_count(count);
    if number_to_remove == 0 {
        return Vec::new();
    }

    let mut removed = Vec::new();
    let mut accumulator = 0;
    for &node in &leaves {
        accumulator += number_to_remove;
        if accumulator >= count {
            accumulator -= count;
            if let Some(taxon) = tree.remove_leaf(node) {
                info!(taxon = %alignment.taxon_name(taxon), "removed taxon before placement");
                removed.push(taxon);
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_estimate_handles_the_edge_cases() {
        // everything fits into one batch and one insert round
        assert_eq!(taxa_addition_work_estimate(4, 10, 10, 8), 3.0 * 4.0 * 8.0);
        // zero inserts per batch counts as unlimited
        assert_eq!(taxa_addition_work_estimate(4, 10, 0, 8), 3.0 * 4.0 * 8.0);
        // insert-limited single batch scales by the deferral factor
        assert_eq!(
            taxa_addition_work_estimate(4, 10, 2, 8),
            3.0 * 4.0 * 8.0 * 4.0 / 2.0
        );
        // multi-batch passes scale with batches and quota
        let estimate = taxa_addition_work_estimate(20, 5, 2, 8);
        assert_eq!(estimate, 3.0 * (4.0 * 5.0 * 8.0) / (4.0 * 2.0) * 20.0);
    }
}
