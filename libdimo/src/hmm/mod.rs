pub mod score;
pub mod train;

use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alphabet::{iupac_mask, EMPTY_DIGITAL, MASK_TO_IUPAC};
use crate::collection::{Collection, CollectionMask};
use crate::util::LogAbuse;

pub const ALPHABET_SIZE: usize = 4;

/// Probability of taking an insert state where one is present.
const INSERT_PROBABILITY: f64 = 0.05;

/// Upper bound on the summed background-to-motif entry probabilities;
/// the background self transition keeps the remainder.
const MAX_TOTAL_ENTRY: f64 = 0.5;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    InvalidCode(#[from] crate::alphabet::InvalidNucleotideCodeError),
    #[error("no group with index: {index}")]
    UnknownGroup { index: usize },
    #[error("group {index} is not a motif group")]
    NotAMotifGroup { index: usize },
    #[error("motif pattern is empty")]
    EmptyPattern,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum GroupKind {
    Background,
    Motif,
}

/// A background or motif-associated subset of a model's states,
/// independently scoreable and maskable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub kind: GroupKind,
    /// The states owned by this group, in chain order.
    pub states: Vec<usize>,
    /// Probability of entering this group's first state from the background.
    pub entry: f64,
}

/// A hidden Markov model over the nucleotide alphabet, composed of a
/// background group (always group 0) and any number of motif groups.
/// Each motif group is a chain of emission states entered from and
/// returning to the background state.
#[derive(Clone, Serialize, Deserialize)]
pub struct Model {
    pub groups: Vec<Group>,
    /// Per-state emission probabilities over a, c, g, t.
    pub emissions: Vec<[f64; ALPHABET_SIZE]>,
    /// Row-stochastic state transition matrix.
    pub transitions: Vec<Vec<f64>>,
    /// Pseudo count added to every contingency table cell when scoring.
    pub contingency_pseudo_count: f64,
}

impl Model {
    pub fn new(background: [f64; ALPHABET_SIZE], contingency_pseudo_count: f64) -> Self {
        Model {
            groups: vec![Group {
                name: "background".to_string(),
                kind: GroupKind::Background,
                states: vec![0],
                entry: 0.0,
            }],
            emissions: vec![background],
            transitions: vec![vec![1.0]],
            contingency_pseudo_count,
        }
    }

    /// A fresh model whose background emissions are the nucleotide
    /// frequencies observed in the given collection.
    pub fn with_background_of(data: &Collection, contingency_pseudo_count: f64) -> Self {
        let mut counts = [1.0f64; ALPHABET_SIZE];
        for contrast in &data.contrasts {
            for dataset in &contrast.sets {
                for sequence in &dataset.sequences {
                    for &byte in &sequence.digital_bytes[1..] {
                        if (byte as usize) < ALPHABET_SIZE {
                            counts[byte as usize] += 1.0;
                        }
                    }
                }
            }
        }
        let total: f64 = counts.iter().sum();
        counts.iter_mut().for_each(|c| *c /= total);
        Model::new(counts, contingency_pseudo_count)
    }

    pub fn nstates(&self) -> usize {
        self.emissions.len()
    }

    pub fn ngroups(&self) -> usize {
        self.groups.len()
    }

    pub fn nmotifs(&self) -> usize {
        self.groups.len() - 1
    }

    pub fn is_motif_group(&self, index: usize) -> bool {
        self.groups
            .get(index)
            .map(|g| g.kind == GroupKind::Motif)
            .unwrap_or(false)
    }

    pub fn group_of_state(&self, state: usize) -> usize {
        self.groups
            .iter()
            .position(|g| g.states.contains(&state))
            .unwrap_or(0)
    }

    /// The IUPAC consensus of a group's emission chain.
    pub fn group_consensus(&self, index: usize) -> String {
        let group = &self.groups[index];
        group
            .states
            .iter()
            .map(|&state| {
                let row = &self.emissions[state];
                let max = row.iter().cloned().fold(f64::MIN, f64::max);
                let mask = row
                    .iter()
                    .enumerate()
                    .filter(|(_, &p)| p >= 0.5 * max)
                    .fold(0u8, |mask, (idx, _)| mask | (1 << idx));
                MASK_TO_IUPAC[mask as usize] as char
            })
            .collect()
    }

    pub fn emission_ln(&self, state: usize, symbol: u8) -> f64 {
        if symbol == EMPTY_DIGITAL {
            // indeterminate symbols carry no signal for any state
            0.0
        } else {
            self.emissions[state][symbol as usize].ln_or_inf()
        }
    }

    /// Add a motif group from an IUPAC pattern. Nucleotides matching a
    /// position's code share `1 - alpha` of the emission probability, the
    /// others share `alpha`. Returns the new group's index.
    #[allow(clippy::too_many_arguments)]
    pub fn add_motif(
        &mut self,
        pattern: &str,
        alpha: f64,
        expected_seq_size: f64,
        lambda: f64,
        name: &str,
        insertions: &[usize],
        left_padding: usize,
        right_padding: usize,
    ) -> Result<usize, ModelError> {
        let padded = format!(
            "{}{}{}",
            "n".repeat(left_padding),
            pattern,
            "n".repeat(right_padding)
        );

        let mut rows = Vec::with_capacity(padded.len());
        for code in padded.chars() {
            let mask = iupac_mask(code)?;
            let matching = mask.count_ones() as f64;
            let mut row = [0.0f64; ALPHABET_SIZE];
            for (idx, slot) in row.iter_mut().enumerate() {
                *slot = if mask & (1 << idx) != 0 {
                    if matching == ALPHABET_SIZE as f64 {
                        1.0 / ALPHABET_SIZE as f64
                    } else {
                        (1.0 - alpha) / matching
                    }
                } else {
                    alpha / (ALPHABET_SIZE as f64 - matching)
                };
            }
            rows.push(row);
        }

        let entry = (lambda / expected_seq_size).min(MAX_TOTAL_ENTRY);
        self.append_group(name, rows, insertions, entry)
    }

    /// Add a motif group from an explicit emission matrix.
    pub fn add_motif_matrix(
        &mut self,
        matrix: &[[f64; ALPHABET_SIZE]],
        expected_seq_size: f64,
        lambda: f64,
        name: &str,
        insertions: &[usize],
        left_padding: usize,
        right_padding: usize,
    ) -> Result<usize, ModelError> {
        let uniform = [1.0 / ALPHABET_SIZE as f64; ALPHABET_SIZE];
        let mut rows = vec![uniform; left_padding];
        rows.extend_from_slice(matrix);
        rows.extend(std::iter::repeat(uniform).take(right_padding));

        let entry = (lambda / expected_seq_size).min(MAX_TOTAL_ENTRY);
        self.append_group(name, rows, insertions, entry)
    }

    /// Copy a single motif group of another model into this one, keeping
    /// its emissions, internal transitions, and entry probability, without
    /// re-estimating anything. Returns the new group's index.
    pub fn adopt_group(&mut self, other: &Model, group_idx: usize) -> Result<usize, ModelError> {
        let group = other
            .groups
            .get(group_idx)
            .ok_or(ModelError::UnknownGroup { index: group_idx })?;
        if group.kind != GroupKind::Motif {
            return Err(ModelError::NotAMotifGroup { index: group_idx });
        }

        let first_new_state = self.nstates();
        let state_map: IndexMap<usize, usize> = group
            .states
            .iter()
            .enumerate()
            .map(|(offset, &old)| (old, first_new_state + offset))
            .collect();

        self.grow_states(group.states.len());
        for (&old, &new) in &state_map {
            self.emissions[new] = other.emissions[old];
            for (&old_to, &new_to) in &state_map {
                self.transitions[new][new_to] = other.transitions[old][old_to];
            }
            // exits back to the background are kept as they were
            self.transitions[new][0] = other.transitions[old][0];
        }

        self.groups.push(Group {
            name: group.name.clone(),
            kind: GroupKind::Motif,
            states: state_map.values().cloned().collect(),
            entry: group.entry,
        });
        self.rebalance_background();

        Ok(self.ngroups() - 1)
    }

    /// Union with another model's motif groups: groups whose names this
    /// model does not have yet are copied over.
    pub fn merge_motifs(&mut self, other: &Model) -> Result<(), ModelError> {
        for idx in 0..other.ngroups() {
            if !other.is_motif_group(idx) {
                continue;
            }
            let name = &other.groups[idx].name;
            if self.groups.iter().any(|g| &g.name == name) {
                continue;
            }
            self.adopt_group(other, idx)?;
        }
        Ok(())
    }

    /// Duplicate every motif group with reverse-complemented emissions.
    /// Returns the extended model and a fresh old-index to new-index map
    /// covering every group that existed before the duplication.
    pub fn add_revcomp_motifs(&self) -> (Model, IndexMap<usize, usize>) {
        let mut extended = self.clone();
        let mut index_map = IndexMap::new();
        index_map.insert(0, 0);

        for idx in 1..self.ngroups() {
            let group = &self.groups[idx];
            let rows: Vec<[f64; ALPHABET_SIZE]> = group
                .states
                .iter()
                .rev()
                .map(|&state| {
                    let row = self.emissions[state];
                    // reverse complement swaps a<->t and c<->g
                    [row[3], row[2], row[1], row[0]]
                })
                .collect();

            let name = format!("{}_rc", group.name);
            let twin = extended
                .append_group(&name, rows, &[], group.entry)
                .expect("reverse complement group construction cannot fail");
            index_map.insert(idx, twin);
        }

        (extended, index_map)
    }

    /// Positions in each sequence that the Viterbi decoding assigns to a
    /// motif group, for masking a search collection.
    pub fn compute_mask(&self, data: &Collection) -> CollectionMask {
        let positions = data
            .contrasts
            .iter()
            .map(|contrast| {
                contrast
                    .sets
                    .iter()
                    .map(|dataset| {
                        dataset
                            .sequences
                            .iter()
                            .map(|sequence| {
                                let (path, _) = self.viterbi(sequence);
                                path.iter()
                                    .enumerate()
                                    .filter(|(_, &state)| {
                                        self.is_motif_group(self.group_of_state(state))
                                    })
                                    .map(|(idx, _)| idx + 1)
                                    .collect()
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        CollectionMask { positions }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let out = std::fs::File::create(path.as_ref())
            .with_context(|| format!("failed to create {}", path.as_ref().display()))?;
        serde_json::to_writer_pretty(out, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path.as_ref())
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Append a chain of emission states as a new motif group, with insert
    /// states after the listed 1-based chain positions.
    fn append_group(
        &mut self,
        name: &str,
        rows: Vec<[f64; ALPHABET_SIZE]>,
        insertions: &[usize],
        entry: f64,
    ) -> Result<usize, ModelError> {
        if rows.is_empty() {
            return Err(ModelError::EmptyPattern);
        }

        let uniform = [1.0 / ALPHABET_SIZE as f64; ALPHABET_SIZE];
        let chain_len = rows.len();

        // lay out the chain interleaved with its insert states
        let mut layout: Vec<([f64; ALPHABET_SIZE], bool)> = vec![];
        for (pos, row) in rows.into_iter().enumerate() {
            layout.push((row, false));
            if insertions.contains(&(pos + 1)) && pos + 1 < chain_len {
                layout.push((uniform, true));
            }
        }

        let first_new_state = self.nstates();
        self.grow_states(layout.len());

        let states: Vec<usize> = (0..layout.len()).map(|i| first_new_state + i).collect();
        for (offset, (row, _)) in layout.iter().enumerate() {
            self.emissions[states[offset]] = *row;
        }

        for offset in 0..layout.len() {
            let state = states[offset];
            match layout.get(offset + 1) {
                None => self.transitions[state][0] = 1.0,
                Some((_, true)) => {
                    // the insert is optional: either take it or skip past it
                    let insert = states[offset + 1];
                    let after = states[offset + 2];
                    self.transitions[state][insert] = INSERT_PROBABILITY;
                    self.transitions[state][after] = 1.0 - INSERT_PROBABILITY;
                }
                Some((_, false)) => {
                    self.transitions[state][states[offset + 1]] = 1.0;
                }
            }
        }

        self.groups.push(Group {
            name: name.to_string(),
            kind: GroupKind::Motif,
            states,
            entry,
        });
        self.rebalance_background();

        Ok(self.ngroups() - 1)
    }

    fn grow_states(&mut self, additional: usize) {
        let new_len = self.nstates() + additional;
        for row in &mut self.transitions {
            row.resize(new_len, 0.0);
        }
        for _ in 0..additional {
            self.emissions.push([0.0; ALPHABET_SIZE]);
            self.transitions.push(vec![0.0; new_len]);
        }
    }

    /// Rebuild the background row: one entry per motif group's first state,
    /// scaled down if their sum would crowd out the self transition.
    fn rebalance_background(&mut self) {
        let total: f64 = self.groups.iter().map(|g| g.entry).sum();
        let scale = if total > MAX_TOTAL_ENTRY {
            MAX_TOTAL_ENTRY / total
        } else {
            1.0
        };

        let nstates = self.nstates();
        self.transitions[0] = vec![0.0; nstates];
        let mut remaining = 1.0;
        for group in &self.groups[1..] {
            let p = group.entry * scale;
            self.transitions[0][group.states[0]] = p;
            remaining -= p;
        }
        self.transitions[0][0] = remaining;
    }
}
