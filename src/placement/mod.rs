//! The incremental taxon placement engine: target branch bookkeeping, the
//! parallel parsimony cascade, placement cost strategies and the batch
//! driver that ties them together.

mod config;
mod cost;
mod parallel;
mod run;
mod targets;
mod taxon;

pub use config::{CostFunction, PlacementConfig, ScoringAxis};
pub use cost::{PlacementCostCalculator, SearchHeuristic};
pub use parallel::ParallelParsimonyCalculator;
pub use run::{
    remove_sample_taxa_if_requested, BatchCleaner, GlobalCleaner, PlacementRun, PlacementSummary,
    TaxonCleaner,
};
pub use targets::{TargetBranch, TargetBranchRange, TargetBranchRef};
pub use taxon::{PossiblePlacement, TaxonToPlace};
