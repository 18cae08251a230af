use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collection::{Collection, Contrast};
use crate::hmm::Model;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Measure {
    /// Generative: summed sequence log-likelihood.
    Likelihood,
    /// Association between motif presence and the sequence-set label.
    MutualInformation,
    /// Motif-presence/label association after conditioning out the
    /// already-accepted groups.
    ResidualMutualInformation,
}

impl Display for Measure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Measure::Likelihood => "likelihood",
            Measure::MutualInformation => "mutual information",
            Measure::ResidualMutualInformation => "residual mutual information",
        };
        write!(f, "{str}")
    }
}

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("residual mutual information requires at least one absent group")]
    ResidualWithoutAbsentGroups,
    #[error("no group with index: {index}")]
    UnknownGroup { index: usize },
}

/// Which groups a sequence's Viterbi decoding visits.
struct Presence {
    /// Any of the scored groups.
    scored: bool,
    /// Bit `i` is set when `absent_groups[i]` is visited.
    conditioning: u64,
}

impl Model {
    /// A scalar goodness value for this model on the given data.
    ///
    /// `groups_to_score` selects the motif groups whose presence is
    /// evaluated, `groups_to_ignore` removes groups from consideration
    /// entirely, and `absent_groups` lists the groups conditioned out by
    /// the residual measure. `weighting` toggles contrast-size weighting.
    pub fn compute_score(
        &self,
        data: &Collection,
        measure: Measure,
        weighting: bool,
        groups_to_score: &[usize],
        groups_to_ignore: &[usize],
        absent_groups: &[usize],
    ) -> Result<f64, ScoreError> {
        for &index in groups_to_score.iter().chain(absent_groups) {
            if index >= self.ngroups() {
                return Err(ScoreError::UnknownGroup { index });
            }
        }

        match measure {
            Measure::Likelihood => Ok(self.likelihood_score(data, weighting)),
            Measure::MutualInformation => {
                Ok(self.mutual_information(data, weighting, groups_to_score, groups_to_ignore))
            }
            Measure::ResidualMutualInformation => {
                if absent_groups.is_empty() {
                    return Err(ScoreError::ResidualWithoutAbsentGroups);
                }
                Ok(self.residual_mutual_information(
                    data,
                    weighting,
                    groups_to_score,
                    groups_to_ignore,
                    absent_groups,
                ))
            }
        }
    }

    fn contrast_weight(&self, data: &Collection, contrast: &Contrast, weighting: bool) -> f64 {
        if weighting && data.set_size > 0 {
            contrast.set_size as f64 / data.set_size as f64
        } else {
            1.0
        }
    }

    fn likelihood_score(&self, data: &Collection, weighting: bool) -> f64 {
        data.contrasts
            .iter()
            .map(|contrast| {
                let ll: f64 = contrast
                    .sets
                    .iter()
                    .flat_map(|s| &s.sequences)
                    .map(|sequence| self.forward(sequence).1)
                    .sum();
                self.contrast_weight(data, contrast, weighting) * ll
            })
            .sum()
    }

    fn presences(
        &self,
        contrast: &Contrast,
        groups_to_score: &[usize],
        groups_to_ignore: &[usize],
        absent_groups: &[usize],
    ) -> Vec<Vec<Presence>> {
        contrast
            .sets
            .iter()
            .map(|dataset| {
                dataset
                    .sequences
                    .iter()
                    .map(|sequence| {
                        let (path, _) = self.viterbi(sequence);
                        let visited: Vec<usize> = path
                            .iter()
                            .map(|&state| self.group_of_state(state))
                            .filter(|group| !groups_to_ignore.contains(group))
                            .collect();

                        let scored = visited.iter().any(|g| groups_to_score.contains(g));
                        let conditioning = absent_groups
                            .iter()
                            .enumerate()
                            .filter(|(_, g)| visited.contains(g))
                            .fold(0u64, |bits, (idx, _)| bits | (1 << idx));

                        Presence {
                            scored,
                            conditioning,
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Mutual information, in nats, between presence of the scored groups
    /// and the dataset label, summed over contrasts.
    fn mutual_information(
        &self,
        data: &Collection,
        weighting: bool,
        groups_to_score: &[usize],
        groups_to_ignore: &[usize],
    ) -> f64 {
        data.contrasts
            .iter()
            .map(|contrast| {
                let presences = self.presences(contrast, groups_to_score, groups_to_ignore, &[]);
                let table = contingency_table(&presences, |_| true);
                self.contrast_weight(data, contrast, weighting)
                    * table_mutual_information(&table, self.contingency_pseudo_count)
            })
            .sum()
    }

    /// Conditional mutual information: the association left between the
    /// scored groups and the label once the presence pattern of the
    /// absent groups is held fixed.
    fn residual_mutual_information(
        &self,
        data: &Collection,
        weighting: bool,
        groups_to_score: &[usize],
        groups_to_ignore: &[usize],
        absent_groups: &[usize],
    ) -> f64 {
        data.contrasts
            .iter()
            .map(|contrast| {
                let presences =
                    self.presences(contrast, groups_to_score, groups_to_ignore, absent_groups);

                let total: usize = presences.iter().map(|set| set.len()).sum();
                if total == 0 {
                    return 0.0;
                }

                let mut conditional = 0.0;
                for config in 0..(1u64 << absent_groups.len()) {
                    let table = contingency_table(&presences, |p| p.conditioning == config);
                    let config_total: f64 = table.iter().flatten().sum();
                    if config_total == 0.0 {
                        continue;
                    }
                    conditional += config_total / total as f64
                        * table_mutual_information(&table, self.contingency_pseudo_count);
                }

                self.contrast_weight(data, contrast, weighting) * conditional
            })
            .sum()
    }
}

/// A 2 x K table of scored-presence against dataset label, restricted to
/// the sequences the filter admits.
fn contingency_table(
    presences: &[Vec<Presence>],
    filter: impl Fn(&Presence) -> bool,
) -> Vec<[f64; 2]> {
    presences
        .iter()
        .map(|set| {
            let mut cell = [0.0f64; 2];
            for presence in set.iter().filter(|p| filter(p)) {
                cell[presence.scored as usize] += 1.0;
            }
            cell
        })
        .collect()
}

pub(crate) fn table_mutual_information(table: &[[f64; 2]], pseudo_count: f64) -> f64 {
    let counts: Vec<[f64; 2]> = table
        .iter()
        .map(|row| [row[0] + pseudo_count, row[1] + pseudo_count])
        .collect();

    let total: f64 = counts.iter().flatten().sum();
    if total == 0.0 {
        return 0.0;
    }

    let col_margin = [
        counts.iter().map(|row| row[0]).sum::<f64>() / total,
        counts.iter().map(|row| row[1]).sum::<f64>() / total,
    ];

    let mut information = 0.0;
    for row in &counts {
        let row_margin = (row[0] + row[1]) / total;
        for (col, &count) in row.iter().enumerate() {
            let p = count / total;
            if p > 0.0 {
                information += p * (p / (row_margin * col_margin[col])).ln();
            }
        }
    }
    information
}
