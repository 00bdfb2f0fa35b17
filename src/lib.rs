//! libgraft grows an existing unrooted binary phylogenetic tree by inserting
//! a batch of new leaf taxa, one by one, at the branches a placement cost
//! function (parsimony or likelihood) likes best.
//!
//! The engine works in batches: every branch of the tree becomes a target,
//! each candidate taxon is scored against each target in parallel, the batch
//! is sorted by best score, and the batch's insert quota is executed
//! sequentially. A consumed target records the three branches that replaced
//! it, so a candidate whose preferred branch was taken by an earlier insert
//! of the same batch can fall back to the replacements without rescoring the
//! whole tree. Taxa that miss their batch's quota roll into the next pass
//! against refreshed targets.
//!
//! Parsimony and likelihood scoring are kernel seams ([`ParsimonyKernel`],
//! [`LikelihoodKernel`]); a Fitch parsimony kernel over an in-memory
//! [`Alignment`] ships with the crate. Behavior is selected through a
//! [`PlacementConfig`] string such as `"C{SMP}+B10+I50%"`.
//!
//! [`ParsimonyKernel`]: kernel::ParsimonyKernel
//! [`LikelihoodKernel`]: kernel::LikelihoodKernel
//! [`Alignment`]: alignment::Alignment
//! [`PlacementConfig`]: placement::PlacementConfig

pub mod alignment;
pub mod blocks;
pub mod error;
pub mod kernel;
pub mod placement;
pub mod tree;

pub use alignment::{Alignment, TaxonId};
pub use error::PlacementError;
pub use kernel::{FitchKernel, LikelihoodKernel, ParsimonyKernel};
pub use placement::{
    remove_sample_taxa_if_requested, CostFunction, PlacementConfig, PlacementRun,
    PlacementSummary, ScoringAxis,
};
pub use tree::{NodeId, PhyloTree};
