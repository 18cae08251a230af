mod finder;
pub use finder::*;

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hmm::score::Measure;

#[derive(Error, Debug)]
pub enum SpecificationError {
    #[error("motif name '{name}' is not unique")]
    NameNotUnique { name: String },
    #[error("objective names motif '{name}', for which no specification exists")]
    NoSpecification { name: String },
    #[error("residual mutual information cannot be requested as an objective; it only applies once motifs have been accepted")]
    ResidualObjective,
}

/// Parameters of an automatic seed search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchParams {
    pub min_length: usize,
    pub max_length: usize,
    /// How many candidate seeds to report per round.
    pub n_seeds: usize,
}

/// How the states of one motif group come to be.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotifKind {
    /// An emission matrix read from disk.
    File { path: PathBuf },
    /// An explicit IUPAC pattern.
    Seed { pattern: String },
    /// Automatic seed search over the data.
    Search { params: SearchParams },
}

#[derive(Clone, Debug)]
pub struct MotifSpec {
    pub name: String,
    pub kind: MotifKind,
    /// 1-based chain positions after which an insert state is allowed.
    pub insertions: Vec<usize>,
    pub left_padding: usize,
    pub right_padding: usize,
}

impl MotifSpec {
    pub fn is_search(&self) -> bool {
        matches!(self.kind, MotifKind::Search { .. })
    }
}

/// What a motif is searched and trained for.
#[derive(Clone, Debug)]
pub struct Objective {
    /// The motif specification this objective applies to.
    pub motif: String,
    pub measure: Measure,
    /// Contrast names the objective is evaluated on; empty means all.
    pub contrasts: Vec<String>,
}

/// A candidate seed proposed for one round of discovery.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub motif: String,
    pub score: f64,
    /// Corrected significance of the seed's association, as ln(p).
    pub log_p: f64,
    /// Sequences containing the seed, per dataset in collection order.
    pub counts: Vec<usize>,
}

/// Consistency checks over motif specifications and objectives; these run
/// before the discovery loop starts and abort the run on failure.
pub fn validate(specs: &[MotifSpec], objectives: &[Objective]) -> Result<(), SpecificationError> {
    let mut names = HashSet::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(SpecificationError::NameNotUnique {
                name: spec.name.clone(),
            });
        }
    }

    for objective in objectives {
        if !names.contains(objective.motif.as_str()) {
            return Err(SpecificationError::NoSpecification {
                name: objective.motif.clone(),
            });
        }
        if objective.measure == Measure::ResidualMutualInformation {
            return Err(SpecificationError::ResidualObjective);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_spec(name: &str) -> MotifSpec {
        MotifSpec {
            name: name.to_string(),
            kind: MotifKind::Search {
                params: SearchParams {
                    min_length: 8,
                    max_length: 8,
                    n_seeds: 3,
                },
            },
            insertions: vec![],
            left_padding: 0,
            right_padding: 0,
        }
    }

    fn objective(motif: &str, measure: Measure) -> Objective {
        Objective {
            motif: motif.to_string(),
            measure,
            contrasts: vec![],
        }
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let specs = vec![search_spec("motif"), search_spec("motif")];
        assert!(matches!(
            validate(&specs, &[]),
            Err(SpecificationError::NameNotUnique { .. })
        ));
    }

    #[test]
    fn test_objective_must_name_a_specification() {
        let specs = vec![search_spec("motif")];
        let objectives = vec![objective("other", Measure::MutualInformation)];
        assert!(matches!(
            validate(&specs, &objectives),
            Err(SpecificationError::NoSpecification { .. })
        ));
    }

    #[test]
    fn test_residual_objective_is_rejected() {
        let specs = vec![search_spec("motif")];
        let objectives = vec![objective("motif", Measure::ResidualMutualInformation)];
        assert!(matches!(
            validate(&specs, &objectives),
            Err(SpecificationError::ResidualObjective)
        ));
    }

    #[test]
    fn test_consistent_specifications_pass() {
        let specs = vec![search_spec("motif_a"), search_spec("motif_b")];
        let objectives = vec![
            objective("motif_a", Measure::MutualInformation),
            objective("motif_b", Measure::Likelihood),
        ];
        assert!(validate(&specs, &objectives).is_ok());
    }
}
