use thiserror::Error;

/// Errors the placement engine can report. Only deferred taxa are handled
/// in-band (they roll into the next pass); every variant here aborts the run.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The placement configuration string could not be parsed. Reported
    /// before any allocation happens.
    #[error("invalid placement configuration: {0}")]
    ConfigurationInvalid(String),

    /// A gazumped taxon found all replacement branches of its preferred
    /// target consumed as well. No taxa inserted in batch.
    #[error("no live placement branch remains for taxon `{taxon}`")]
    NoLivePlacement { taxon: String },

    /// A block allocation exceeded the planned arena capacity. The capacity
    /// formulas cover every allocation the run can perform, so this is a
    /// logic bug.
    #[error("{arena} arena exhausted after {capacity} blocks")]
    ArenaExhausted {
        arena: &'static str,
        capacity: usize,
    },

    /// The likelihood kernel returned a non-finite score.
    #[error("likelihood kernel returned a non-finite score ({score})")]
    KernelNumeric { score: f64 },
}
