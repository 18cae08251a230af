use std::collections::{HashMap, HashSet};

use log::debug;
use thiserror::Error;

use crate::alphabet::{generalizations, iupac_mask};
use crate::collection::{Collection, Contrast, Sequence};
use crate::hmm::score::table_mutual_information;
use crate::seed::{Candidate, MotifKind, MotifSpec, Objective};
use crate::stats::corrected_pvalue;

const DIGITAL_TO_CHAR: [char; 4] = ['a', 'c', 'g', 't'];

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("specification '{name}' is not an automatic search")]
    NotASearch { name: String },
    #[error(transparent)]
    InvalidCode(#[from] crate::alphabet::InvalidNucleotideCodeError),
}

#[derive(Clone, Copy, Debug)]
pub struct FinderOptions {
    /// Pseudo count added to every contingency cell.
    pub pseudo_count: f64,
    /// Whether to refine exact seeds by IUPAC generalization.
    pub generalize: bool,
}

impl Default for FinderOptions {
    fn default() -> Self {
        FinderOptions {
            pseudo_count: 1.0,
            generalize: true,
        }
    }
}

/// Enumerates candidate seed words for a motif specification: exact words
/// are counted over the search collection, scored by the mutual information
/// between word presence and the dataset label, and optionally refined into
/// degenerate IUPAC words by hill climbing. Results are deterministic for
/// fixed input and ordered by descending score.
#[derive(Clone, Debug, Default)]
pub struct Finder {
    pub options: FinderOptions,
}

impl Finder {
    pub fn new(options: FinderOptions) -> Self {
        Finder { options }
    }

    pub fn find(
        &self,
        collection: &Collection,
        spec: &MotifSpec,
        objectives: &[Objective],
    ) -> Result<Vec<Candidate>, FinderError> {
        let params = match &spec.kind {
            MotifKind::Search { params } => params,
            _ => {
                return Err(FinderError::NotASearch {
                    name: spec.name.clone(),
                })
            }
        };

        let restriction = objectives
            .iter()
            .find(|o| o.motif == spec.name)
            .map(|o| o.contrasts.clone())
            .unwrap_or_default();
        let contrasts: Vec<&Contrast> = collection
            .contrasts
            .iter()
            .filter(|c| restriction.is_empty() || restriction.contains(&c.name))
            .collect();

        let mut pool: HashMap<String, (Vec<usize>, f64)> = HashMap::new();
        for length in params.min_length..=params.max_length {
            let counts = exact_word_counts(&contrasts, length);

            let mut scored: Vec<(String, Vec<usize>, f64)> = counts
                .into_iter()
                .map(|(word, counts)| {
                    let score = self.score_counts(&contrasts, &counts);
                    (word, counts, score)
                })
                .collect();
            scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
            scored.truncate(params.n_seeds);

            for (word, counts, score) in scored {
                let (word, counts, score) = if self.options.generalize {
                    self.generalize(&contrasts, word, counts, score)?
                } else {
                    (word, counts, score)
                };

                let improves = match pool.get(&word) {
                    Some((_, existing)) => score > *existing,
                    None => true,
                };
                if improves {
                    pool.insert(word, (counts, score));
                }
            }
        }

        let n: f64 = contrasts.iter().map(|c| c.set_size as f64).sum();
        let df: f64 = contrasts
            .iter()
            .map(|c| c.sets.len().saturating_sub(1) as f64)
            .sum();

        let mut results: Vec<Candidate> = pool
            .into_iter()
            .map(|(motif, (counts, score))| Candidate {
                log_p: corrected_pvalue(score, n, df, motif.len()),
                motif,
                score,
                counts,
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.motif.cmp(&b.motif)));
        results.truncate(params.n_seeds);

        debug!(
            "seed search for '{}' found {} candidates",
            spec.name,
            results.len()
        );

        Ok(results)
    }

    /// Summed per-contrast mutual information between word presence and
    /// the dataset label.
    fn score_counts(&self, contrasts: &[&Contrast], counts: &[usize]) -> f64 {
        let mut offset = 0;
        let mut score = 0.0;
        for contrast in contrasts {
            let table: Vec<[f64; 2]> = contrast
                .sets
                .iter()
                .enumerate()
                .map(|(idx, dataset)| {
                    let present = counts[offset + idx] as f64;
                    let absent = dataset.set_size as f64 - present;
                    [absent, present]
                })
                .collect();
            score += table_mutual_information(&table, self.options.pseudo_count);
            offset += contrast.sets.len();
        }
        score
    }

    /// Hill-climbing refinement: while some single-position IUPAC
    /// generalization strictly improves the score, take the best one.
    fn generalize(
        &self,
        contrasts: &[&Contrast],
        word: String,
        counts: Vec<usize>,
        score: f64,
    ) -> Result<(String, Vec<usize>, f64), FinderError> {
        let mut best = (word, counts, score);

        loop {
            let chars: Vec<char> = best.0.chars().collect();
            let mut improved: Option<(String, Vec<usize>, f64)> = None;

            for pos in 0..chars.len() {
                for code in generalizations(chars[pos])? {
                    let mut wider = chars.clone();
                    wider[pos] = code;
                    let candidate: String = wider.iter().collect();

                    let counts = match_counts(contrasts, &candidate)?;
                    let score = self.score_counts(contrasts, &counts);

                    let to_beat = improved.as_ref().map(|i| i.2).unwrap_or(best.2);
                    if score > to_beat {
                        improved = Some((candidate, counts, score));
                    }
                }
            }

            match improved {
                Some(wider) => best = wider,
                None => break,
            }
        }

        Ok(best)
    }
}

/// Count, per dataset, the sequences containing each fully determinate
/// word of the given length. Windows touching an indeterminate symbol are
/// skipped, so masked regions cannot seed candidates.
fn exact_word_counts(contrasts: &[&Contrast], length: usize) -> HashMap<String, Vec<usize>> {
    let n_datasets: usize = contrasts.iter().map(|c| c.sets.len()).sum();
    let mut counts: HashMap<String, Vec<usize>> = HashMap::new();

    let mut dataset_idx = 0;
    for contrast in contrasts {
        for dataset in &contrast.sets {
            for sequence in &dataset.sequences {
                if sequence.length < length || length == 0 {
                    continue;
                }

                let mut seen: HashSet<String> = HashSet::new();
                for start in 1..=(sequence.length + 1 - length) {
                    let window = &sequence.digital_bytes[start..start + length];
                    if window.iter().any(|&b| b as usize >= DIGITAL_TO_CHAR.len()) {
                        continue;
                    }
                    let word: String = window.iter().map(|&b| DIGITAL_TO_CHAR[b as usize]).collect();
                    if seen.insert(word.clone()) {
                        counts
                            .entry(word)
                            .or_insert_with(|| vec![0; n_datasets])[dataset_idx] += 1;
                    }
                }
            }
            dataset_idx += 1;
        }
    }

    counts
}

/// Count, per dataset, the sequences with at least one match of the IUPAC
/// word. Indeterminate sequence symbols match no code.
fn match_counts(contrasts: &[&Contrast], word: &str) -> Result<Vec<usize>, FinderError> {
    let masks: Vec<u8> = word
        .chars()
        .map(iupac_mask)
        .collect::<Result<_, _>>()?;

    let mut counts = vec![];
    for contrast in contrasts {
        for dataset in &contrast.sets {
            counts.push(
                dataset
                    .sequences
                    .iter()
                    .filter(|sequence| contains_match(sequence, &masks))
                    .count(),
            );
        }
    }
    Ok(counts)
}

fn contains_match(sequence: &Sequence, masks: &[u8]) -> bool {
    if sequence.length < masks.len() || masks.is_empty() {
        return false;
    }
    (1..=(sequence.length + 1 - masks.len())).any(|start| {
        masks.iter().enumerate().all(|(offset, &mask)| {
            let symbol = sequence.digital_bytes[start + offset];
            (symbol as usize) < DIGITAL_TO_CHAR.len() && mask & (1 << symbol) != 0
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Dataset;
    use crate::seed::SearchParams;
    use std::path::PathBuf;

    fn dataset(name: &str, seqs: &[&str]) -> Dataset {
        let sequences = seqs
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                let mut seq = Sequence::from_utf8(s.as_bytes()).unwrap();
                seq.name = format!("{name}_{idx}");
                seq
            })
            .collect();
        Dataset::from_sequences(name, PathBuf::new(), sequences)
    }

    fn search_collection() -> Collection {
        Collection::new(vec![Contrast::new(
            "bound_vs_unbound",
            vec![
                dataset("bound", &["ttgattacagtt", "gattacagaaaa"]),
                dataset("unbound", &["cccccccccccc", "ggggggggcccc"]),
            ],
        )])
    }

    fn search_spec(n_seeds: usize) -> MotifSpec {
        MotifSpec {
            name: "motif".to_string(),
            kind: MotifKind::Search {
                params: SearchParams {
                    min_length: 8,
                    max_length: 8,
                    n_seeds,
                },
            },
            insertions: vec![],
            left_padding: 0,
            right_padding: 0,
        }
    }

    #[test]
    fn test_planted_word_ranks_first() {
        let finder = Finder::default();
        let results = finder
            .find(&search_collection(), &search_spec(3), &[])
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].motif, "gattacag");
        assert_eq!(results[0].counts, vec![2, 0]);
        assert!(results[0].score > 0.0);
        assert!(results[0].log_p <= 0.0);
    }

    #[test]
    fn test_results_are_deterministic_and_ordered() {
        let finder = Finder::default();
        let collection = search_collection();
        let first = finder.find(&collection, &search_spec(3), &[]).unwrap();
        let second = finder.find(&collection, &search_spec(3), &[]).unwrap();

        let words: Vec<&str> = first.iter().map(|c| c.motif.as_str()).collect();
        let again: Vec<&str> = second.iter().map(|c| c.motif.as_str()).collect();
        assert_eq!(words, again);

        for pair in first.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_masked_collection_yields_no_candidates() {
        let finder = Finder::default();
        let collection = Collection::new(vec![Contrast::new(
            "masked",
            vec![dataset("only", &["nnnnnnnnnnnn"])],
        )]);

        let results = finder.find(&collection, &search_spec(3), &[]).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_non_search_specification_is_rejected() {
        let finder = Finder::default();
        let spec = MotifSpec {
            name: "explicit".to_string(),
            kind: MotifKind::Seed {
                pattern: "acgt".to_string(),
            },
            insertions: vec![],
            left_padding: 0,
            right_padding: 0,
        };

        assert!(matches!(
            finder.find(&search_collection(), &spec, &[]),
            Err(FinderError::NotASearch { .. })
        ));
    }

    #[test]
    fn test_iupac_matching_respects_degenerate_codes() {
        let seq = Sequence::from_utf8(b"ttacgt").unwrap();
        let masks: Vec<u8> = "wcgt".chars().map(|c| iupac_mask(c).unwrap()).collect();
        assert!(contains_match(&seq, &masks));

        let masked = Sequence::from_utf8(b"ttncgt").unwrap();
        assert!(!contains_match(&masked, &masks));
    }
}
