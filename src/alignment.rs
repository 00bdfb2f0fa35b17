use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::hash::BuildHasherDefault;

use twox_hash::XxHash64;

/// An index into the alignment's taxon table which uniquely identifies a taxon.
/// The newtype ensures taxon indices aren't mixed up with node indices.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TaxonId(pub(crate) usize);

impl TaxonId {
    /// Create a taxon id from a raw index. Only for testing purposes, actual module code
    /// shouldn't work with raw values.
    pub fn from_usize(index: usize) -> Self {
        Self(index)
    }

    /// Get the underlying usize value of the taxon id.
    pub fn unwrap(&self) -> usize {
        self.0
    }
}

impl Display for TaxonId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A deduplicated alignment column: one encoded character state per taxon plus
/// the number of original sites that collapsed into this pattern.
#[derive(Clone, Debug)]
pub(crate) struct Pattern {
    pub(crate) states: Vec<u8>,
    pub(crate) weight: u32,
}

/// An in-memory multiple sequence alignment over the union of existing and
/// new taxa. Columns are deduplicated into weighted patterns at construction;
/// any richer pattern ordering is left to the caller that loaded the data.
pub struct Alignment {
    names: Vec<String>,
    patterns: Vec<Pattern>,
    site_count: usize,
}

impl Alignment {
    /// Build an alignment from (name, sequence) pairs. All sequences must have
    /// the same length. Characters are encoded as nucleotide state masks;
    /// unknown characters become the full ambiguity mask.
    pub fn from_sequences<S: AsRef<str>>(sequences: &[(S, S)]) -> Self {
        assert!(!sequences.is_empty(), "alignment needs at least one taxon");
        let site_count = sequences[0].1.as_ref().len();
        assert!(
            sequences.iter().all(|(_, s)| s.as_ref().len() == site_count),
            "all aligned sequences must have the same length"
        );

        let names = sequences
            .iter()
            .map(|(n, _)| n.as_ref().to_string())
            .collect::<Vec<_>>();

        let rows: Vec<&[u8]> = sequences.iter().map(|(_, s)| s.as_ref().as_bytes()).collect();

        // deduplicate identical columns into weighted patterns
        let mut patterns: Vec<Pattern> = Vec::new();
        let mut seen: HashMap<Vec<u8>, usize, BuildHasherDefault<XxHash64>> = Default::default();
        for site in 0..site_count {
            let column: Vec<u8> = rows.iter().map(|row| encode_state(row[site])).collect();
            if let Some(&index) = seen.get(&column) {
                patterns[index].weight += 1;
            } else {
                seen.insert(column.clone(), patterns.len());
                patterns.push(Pattern {
                    states: column,
                    weight: 1,
                });
            }
        }

        Self {
            names,
            patterns,
            site_count,
        }
    }

    /// Number of taxa in the alignment.
    pub fn taxon_count(&self) -> usize {
        self.names.len()
    }

    /// Number of deduplicated site patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Number of sites before pattern deduplication.
    pub fn site_count(&self) -> usize {
        self.site_count
    }

    /// Look up a taxon by name.
    pub fn taxon_id(&self, name: &str) -> Option<TaxonId> {
        self.names.iter().position(|n| n == name).map(TaxonId)
    }

    /// Get the name of a taxon.
    pub fn taxon_name(&self, taxon: TaxonId) -> &str {
        &self.names[taxon.0]
    }

    pub(crate) fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }
}

/// Encode a nucleotide character as a state bit mask (A=1, C=2, G=4, T=8).
/// IUPAC ambiguity codes map to the union of their states, everything else to
/// the full mask.
fn encode_state(character: u8) -> u8 {
    match character.to_ascii_uppercase() {
        b'A' => 0b0001,
        b'C' => 0b0010,
        b'G' => 0b0100,
        b'T' | b'U' => 0b1000,
        b'R' => 0b0101,
        b'Y' => 0b1010,
        b'M' => 0b0011,
        b'W' => 0b1001,
        b'S' => 0b0110,
        b'K' => 0b1100,
        _ => 0b1111,
    }
}
