use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use log::info;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_pcg::Pcg64;

use libdimo::collection::Sequence;

use crate::cli::CommonArgs;

const N_SYMBOLS: usize = 5;
const SYMBOL_CHARS: [char; N_SYMBOLS] = ['a', 'c', 'g', 't', 'n'];

#[derive(Args, Debug, Clone)]
pub struct ShuffleArgs {
    /// FASTA files to shuffle; shuffled sequences go to standard output
    #[arg(value_name = "PATH.fa", required = true)]
    pub paths: Vec<PathBuf>,

    /// How many shuffles to generate per sequence
    #[arg(short = 'n', long = "number", default_value_t = 1usize)]
    pub number: usize,

    /// Seed to initialize the random number generator
    #[arg(short = 's', long = "seed", value_name = "n")]
    pub seed: Option<u64>,

    /// Arguments that are common across all dimo subcommands
    #[command(flatten)]
    pub common_args: CommonArgs,
}

pub fn run_shuffle(args: &ShuffleArgs) -> Result<()> {
    let mut seed = args.seed.unwrap_or_else(rand::random);

    for path in &args.paths {
        info!("shuffling {}", path.display());
        let mut rng = Pcg64::seed_from_u64(seed);
        seed = seed.wrapping_add(1);

        for sequence in Sequence::nucleic_from_fasta(path)? {
            for _ in 0..args.number {
                println!(">{}", sequence.name);
                println!("{}", dinucleotide_shuffle(&sequence, &mut rng));
            }
        }
    }

    Ok(())
}

/// A dinucleotide frequency preserving shuffle: a uniformly random Euler
/// path through the sequence's dinucleotide graph, keeping the first and
/// last symbol in place.
pub fn dinucleotide_shuffle(sequence: &Sequence, rng: &mut impl Rng) -> String {
    let symbols = &sequence.digital_bytes[1..];
    if symbols.len() < 3 {
        return symbols_to_string(symbols);
    }

    let first = symbols[0];
    let last = *symbols.last().unwrap();

    let mut edges: [Vec<u8>; N_SYMBOLS] = Default::default();
    for pair in symbols.windows(2) {
        edges[pair[0] as usize].push(pair[1]);
    }

    let used: Vec<usize> = (0..N_SYMBOLS)
        .filter(|&v| !edges[v].is_empty() || v == last as usize)
        .collect();

    // designate, for every vertex but the terminal one, the edge to leave
    // on last; resample until those edges connect every vertex to the
    // terminal, which makes the walk below a valid Euler path
    let mut last_edges: [Option<u8>; N_SYMBOLS];
    loop {
        last_edges = [None; N_SYMBOLS];
        for &vertex in &used {
            if vertex != last as usize && !edges[vertex].is_empty() {
                last_edges[vertex] = Some(*edges[vertex].choose(rng).unwrap());
            }
        }
        if connects_to_terminal(&last_edges, &used, last) {
            break;
        }
    }

    let mut ordered: [Vec<u8>; N_SYMBOLS] = Default::default();
    for &vertex in &used {
        let mut pool = edges[vertex].clone();
        if let Some(chosen) = last_edges[vertex] {
            let idx = pool.iter().position(|&e| e == chosen).unwrap();
            pool.swap_remove(idx);
        }
        pool.shuffle(rng);
        if let Some(chosen) = last_edges[vertex] {
            pool.push(chosen);
        }
        ordered[vertex] = pool;
    }

    let mut result = vec![first];
    let mut cursors = [0usize; N_SYMBOLS];
    let mut vertex = first as usize;
    for _ in 1..symbols.len() {
        let next = ordered[vertex][cursors[vertex]];
        cursors[vertex] += 1;
        result.push(next);
        vertex = next as usize;
    }

    symbols_to_string(&result)
}

fn connects_to_terminal(
    last_edges: &[Option<u8>; N_SYMBOLS],
    used: &[usize],
    terminal: u8,
) -> bool {
    used.iter().all(|&vertex| {
        let mut current = vertex;
        for _ in 0..=N_SYMBOLS {
            if current == terminal as usize {
                return true;
            }
            match last_edges[current] {
                Some(next) => current = next as usize,
                None => return false,
            }
        }
        false
    })
}

fn symbols_to_string(symbols: &[u8]) -> String {
    symbols
        .iter()
        .map(|&b| SYMBOL_CHARS[(b as usize).min(N_SYMBOLS - 1)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn dinucleotide_counts(s: &str) -> HashMap<(char, char), usize> {
        let chars: Vec<char> = s.chars().collect();
        let mut counts = HashMap::new();
        for pair in chars.windows(2) {
            *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_shuffle_preserves_dinucleotide_composition() {
        let sequence = Sequence::from_utf8(b"acgtacgtacgtttggacca").unwrap();
        let mut rng = Pcg64::seed_from_u64(7);

        for _ in 0..10 {
            let shuffled = dinucleotide_shuffle(&sequence, &mut rng);
            assert_eq!(shuffled.len(), 20);
            assert!(shuffled.starts_with('a'));
            assert!(shuffled.ends_with('a'));
            assert_eq!(
                dinucleotide_counts(&shuffled),
                dinucleotide_counts("acgtacgtacgtttggacca")
            );
        }
    }

    #[test]
    fn test_shuffle_changes_the_sequence() {
        let sequence = Sequence::from_utf8(b"aaaacgtacgtacgttttacgacgt").unwrap();
        let mut rng = Pcg64::seed_from_u64(3);

        let shuffles: Vec<String> = (0..10)
            .map(|_| dinucleotide_shuffle(&sequence, &mut rng))
            .collect();
        assert!(shuffles.iter().any(|s| s != "aaaacgtacgtacgttttacgacgt"));
    }

    #[test]
    fn test_short_sequences_are_returned_unchanged() {
        let sequence = Sequence::from_utf8(b"ac").unwrap();
        let mut rng = Pcg64::seed_from_u64(1);
        assert_eq!(dinucleotide_shuffle(&sequence, &mut rng), "ac");
    }
}
