use crate::error::PlacementError;

/// The cost function driving placement decisions. Parsimony scores are
/// minimized; likelihood scores are maximized (stored negated so one
/// ascending sort serves both).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CostFunction {
    MaximumParsimony,
    SankoffParsimony,
    LikelihoodMidpoint,
    LikelihoodAnywhere,
}

impl CostFunction {
    pub fn is_parsimony(&self) -> bool {
        matches!(
            self,
            CostFunction::MaximumParsimony | CostFunction::SankoffParsimony
        )
    }

    pub fn uses_likelihood(&self) -> bool {
        !self.is_parsimony()
    }

    /// Human-readable cost kind, used in the insert log lines.
    pub fn label(&self) -> &'static str {
        if self.is_parsimony() {
            "parsimony"
        } else {
            "likelihood"
        }
    }
}

/// Which axis the scoring double loop parallelizes over. Both produce
/// identical best placements; they differ only in parallel scheduling.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ScoringAxis {
    /// One target at a time, all candidates of the batch in parallel.
    #[default]
    InsertionPointMajor,
    /// One candidate at a time, all targets in parallel.
    NewTaxonMajor,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Limit {
    All,
    Count(usize),
    Percent(f64),
}

/// Placement configuration, parsed from a `+`-separated string of
/// `<letter><value>` clauses. Recognized letters: `C` (cost function), `B`
/// (taxa per batch), `I` (inserts per batch), `R` (fraction of existing taxa
/// to remove first), and the reserved cleanup selectors `L`, `A`, `T`.
#[derive(Clone, Debug)]
pub struct PlacementConfig {
    pub cost_function: CostFunction,
    /// Runtime selector for the scoring loop axis.
    pub scoring_axis: ScoringAxis,
    /// Keep a bounded list of good placements per candidate instead of only
    /// the single best, making gazumped candidates less fussy.
    pub keep_top_placements: bool,
    taxa_per_batch: usize,
    inserts: Limit,
    removal: Option<Limit>,
}

impl PlacementConfig {
    /// Parse a configuration string such as `"C{SMP}+B10+I50%"`. Empty
    /// clauses fall back to their defaults; unknown letters are ignored.
    pub fn parse(input: &str) -> Result<Self, PlacementError> {
        let cost_function = match clause_value(input, 'C').as_deref() {
            None | Some("") | Some("MP") => CostFunction::MaximumParsimony,
            Some("SMP") => CostFunction::SankoffParsimony,
            Some("ML") => CostFunction::LikelihoodMidpoint,
            Some("FML") => CostFunction::LikelihoodAnywhere,
            Some(other) => {
                return Err(PlacementError::ConfigurationInvalid(format!(
                    "unknown cost function `{other}`"
                )))
            }
        };
        let taxa_per_batch = match clause_value(input, 'B').as_deref() {
            None | Some("") => 1,
            Some(value) => value.parse::<usize>().map_err(|_| {
                PlacementError::ConfigurationInvalid(format!("bad batch size `{value}`"))
            })?,
        };
        let inserts = parse_limit(input, 'I')?.unwrap_or(Limit::All);
        let removal = parse_limit(input, 'R')?;
        // the cleanup selectors are reserved; every value maps to a no-op
        for letter in ['L', 'A', 'T'] {
            let _ = clause_value(input, letter);
        }
        Ok(Self {
            cost_function,
            scoring_axis: ScoringAxis::default(),
            keep_top_placements: false,
            taxa_per_batch,
            inserts,
            removal,
        })
    }

    /// Effective batch size: `B0` means all taxa in one batch.
    pub fn taxa_per_batch(&self, total_taxa: usize) -> usize {
        if self.taxa_per_batch == 0 {
            total_taxa
        } else {
            self.taxa_per_batch
        }
    }

    /// Effective number of inserts for one batch. An empty or sub-one clause
    /// means the whole batch; percentages round half up, never below one.
    pub fn inserts_per_batch(&self, batch_size: usize) -> usize {
        match self.inserts {
            Limit::All | Limit::Count(0) => batch_size,
            Limit::Count(count) => count,
            Limit::Percent(percent) => {
                if percent < 100.0 / batch_size as f64 {
                    1
                } else if percent >= 100.0 {
                    batch_size
                } else {
                    (percent * batch_size as f64 / 100.0 + 0.5).floor() as usize
                }
            }
        }
    }

    /// How many existing taxa the `R` clause asks to remove. Ignored for
    /// trees with fewer than four leaves, for percentages of 100 or more,
    /// and whenever fewer than four leaves would remain.
    pub fn removal_count(&self, count_of_taxa: usize) -> usize {
        if count_of_taxa < 4 {
            return 0;
        }
        let requested = match self.removal {
            None => return 0,
            Some(Limit::All) => return 0,
            Some(Limit::Count(count)) => count,
            Some(Limit::Percent(percent)) => {
                if percent < 100.0 / count_of_taxa as f64 || percent >= 100.0 {
                    return 0;
                }
                (percent * count_of_taxa as f64 / 100.0 + 0.5).floor() as usize
            }
        };
        if requested < 1 || count_of_taxa <= requested + 3 {
            0
        } else {
            requested
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            cost_function: CostFunction::MaximumParsimony,
            scoring_axis: ScoringAxis::default(),
            keep_top_placements: false,
            taxa_per_batch: 1,
            inserts: Limit::All,
            removal: None,
        }
    }
}

fn parse_limit(input: &str, letter: char) -> Result<Option<Limit>, PlacementError> {
    let Some(value) = clause_value(input, letter) else {
        return Ok(None);
    };
    if value.is_empty() {
        return Ok(Some(Limit::All));
    }
    let limit = if let Some(number) = value.strip_suffix('%') {
        Limit::Percent(number.parse::<f64>().map_err(|_| {
            PlacementError::ConfigurationInvalid(format!("bad `{letter}` percentage `{value}`"))
        })?)
    } else {
        Limit::Count(value.parse::<usize>().map_err(|_| {
            PlacementError::ConfigurationInvalid(format!("bad `{letter}` count `{value}`"))
        })?)
    };
    Ok(Some(limit))
}

/// Scan for `letter` at brace depth zero; the value is everything up to the
/// next `+` or `-` at brace depth zero, with one layer of outer braces
/// stripped. Returns `None` if the letter does not occur.
fn clause_value(input: &str, letter: char) -> Option<String> {
    let characters: Vec<char> = input.chars().collect();
    let mut depth = 0i32;
    let mut start = 0;
    while start < characters.len() {
        match characters[start] {
            c if c == letter && depth == 0 => break,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        start += 1;
    }
    if start == characters.len() {
        return None;
    }
    start += 1;
    let mut stop = start;
    while stop < characters.len() {
        match characters[stop] {
            '+' | '-' if depth == 0 => break,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        stop += 1;
    }
    let mut value: String = characters[start..stop].iter().collect();
    if value.len() >= 2 && value.starts_with('{') && value.ends_with('}') {
        value = value[1..value.len() - 1].to_string();
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn braced_and_percent_clauses() {
        let config = PlacementConfig::parse("C{SMP}+B10+I50%").unwrap();
        assert_eq!(config.cost_function, CostFunction::SankoffParsimony);
        assert_eq!(config.taxa_per_batch(100), 10);
        assert_eq!(config.inserts_per_batch(10), 5);
    }

    #[test]
    fn empty_clauses_fall_back_to_defaults() {
        let config = PlacementConfig::parse("+C+").unwrap();
        assert_eq!(config.cost_function, CostFunction::MaximumParsimony);
        assert_eq!(config.taxa_per_batch(7), 1);
        assert_eq!(config.inserts_per_batch(4), 4);
    }

    #[test]
    fn batch_zero_means_all() {
        let config = PlacementConfig::parse("B0+I100%").unwrap();
        assert_eq!(config.taxa_per_batch(42), 42);
        assert_eq!(config.inserts_per_batch(42), 42);
    }

    #[test]
    fn tiny_percentages_round_up_to_one_insert() {
        let config = PlacementConfig::parse("I5%").unwrap();
        assert_eq!(config.inserts_per_batch(10), 1);
        let config = PlacementConfig::parse("I150%").unwrap();
        assert_eq!(config.inserts_per_batch(10), 10);
    }

    #[test]
    fn removal_guards_small_trees() {
        let config = PlacementConfig::parse("R2").unwrap();
        assert_eq!(config.removal_count(3), 0);
        assert_eq!(config.removal_count(5), 0);
        assert_eq!(config.removal_count(8), 2);
        let config = PlacementConfig::parse("R25%").unwrap();
        assert_eq!(config.removal_count(8), 2);
        let config = PlacementConfig::parse("R100%").unwrap();
        assert_eq!(config.removal_count(8), 0);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            PlacementConfig::parse("Cbogus"),
            Err(PlacementError::ConfigurationInvalid(_))
        ));
        assert!(matches!(
            PlacementConfig::parse("Bten"),
            Err(PlacementError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn braces_shield_inner_letters_and_separators() {
        // the braced B and + belong to the C clause, not the B clause
        assert_eq!(clause_value("C{MP+B9}+B3", 'B').as_deref(), Some("3"));
        assert_eq!(clause_value("C{MP+B9}+B3", 'C').as_deref(), Some("MP+B9"));
        assert_eq!(clause_value("C{MP}+B3", 'X'), None);
    }
}
