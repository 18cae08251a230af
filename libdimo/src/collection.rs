use std::fmt::{Debug, Display, Formatter};
use std::hash::Hasher;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use seq_io::fasta::{Reader, Record};
use thiserror::Error;
use wyhash2::WyHash;

use crate::alphabet::{
    EMPTY_DIGITAL, EMPTY_UTF8, NUCLEOTIDE_INVERSE_MAP, UTF8_SPACE, UTF8_TO_DIGITAL_NUCLEOTIDE,
};

#[derive(Error, Debug)]
#[error("unknown UTF8 sequence byte: {byte}")]
pub struct UnknownUtf8SequenceByteError {
    byte: u8,
}

#[derive(Error, Debug)]
#[error("mask shape does not match collection shape")]
pub struct MaskShapeError;

/// This holds both the "digital" data and string data of a nucleotide sequence.
#[derive(Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sequence {
    /// The name of the sequence
    pub name: String,
    /// The sequence details. If the sequence comes from a fasta, this
    /// is the information following the sequence name in the header
    pub details: Option<String>,
    /// The length of the sequence
    pub length: usize,
    /// The "digital" data of the sequence. These are
    /// the string bytes, but mapped to [0u8..4u8]
    pub digital_bytes: Vec<u8>,
    /// The string data of the sequence. These are the UTF8 bytes
    /// that make up the sequence in the "normal" alphabet
    pub utf8_bytes: Vec<u8>,
}

impl Sequence {
    pub fn nucleic_from_fasta<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let mut seqs: Vec<Self> = vec![];

        let mut reader = Reader::from_path(path)?;

        while let Some(record) = reader.next() {
            let record = record.with_context(|| "failed to read fasta record")?;
            let mut header_bytes = record.head().to_vec();
            let first_space_idx = header_bytes.iter().position(|&b| b == UTF8_SPACE);

            let error_context: fn() -> &'static str =
                || "failed to create String from fasta header bytes";

            let (name, details) = match first_space_idx {
                Some(idx) => {
                    let details_bytes = header_bytes.split_off(idx + 1);
                    header_bytes.pop();
                    (
                        String::from_utf8(header_bytes).with_context(error_context)?,
                        Some(String::from_utf8(details_bytes).with_context(error_context)?),
                    )
                }
                None => (
                    String::from_utf8(header_bytes).with_context(error_context)?,
                    None,
                ),
            };

            // We want position 1 of the sequence to be at index 1, so we'll buffer with 255
            let mut utf8_bytes: Vec<u8> = vec![255];
            let mut digital_bytes: Vec<u8> = vec![255];

            for line in record.seq_lines() {
                for utf8_byte in line {
                    utf8_bytes.push(*utf8_byte);

                    let digital_byte = match UTF8_TO_DIGITAL_NUCLEOTIDE.get(utf8_byte) {
                        Some(b) => b,
                        None => {
                            return Err(UnknownUtf8SequenceByteError { byte: *utf8_byte }.into())
                        }
                    };
                    digital_bytes.push(*digital_byte)
                }
            }

            seqs.push(Sequence {
                name,
                details,
                length: digital_bytes.len() - 1,
                digital_bytes,
                utf8_bytes,
            });
        }
        Ok(seqs)
    }

    pub fn from_utf8(bytes: &[u8]) -> Result<Self> {
        let mut utf8_bytes: Vec<u8> = vec![255; bytes.len() + 1];
        utf8_bytes[1..].copy_from_slice(bytes);
        let mut digital_bytes: Vec<u8> = vec![255; utf8_bytes.len()];

        for (idx, utf8_byte) in utf8_bytes[1..].iter().enumerate() {
            let digital_byte = match UTF8_TO_DIGITAL_NUCLEOTIDE.get(utf8_byte) {
                Some(b) => *b,
                None => return Err(UnknownUtf8SequenceByteError { byte: *utf8_byte }.into()),
            };
            digital_bytes[idx + 1] = digital_byte;
        }

        Ok(Sequence {
            name: "".to_string(),
            details: None,
            length: digital_bytes.len() - 1,
            digital_bytes,
            utf8_bytes,
        })
    }

    pub fn reverse_complement(&self) -> Self {
        let mut digital_bytes: Vec<u8> = vec![255];
        digital_bytes.extend(self.digital_bytes[1..].iter().rev().map(|&b| match b {
            0..=3 => 3 - b,
            _ => EMPTY_DIGITAL,
        }));

        let mut utf8_bytes: Vec<u8> = vec![255];
        utf8_bytes.extend(
            digital_bytes[1..]
                .iter()
                .map(|b| *NUCLEOTIDE_INVERSE_MAP.get(b).unwrap_or(&EMPTY_UTF8)),
        );

        Sequence {
            name: format!("{}|rc", self.name),
            details: self.details.clone(),
            length: self.length,
            digital_bytes,
            utf8_bytes,
        }
    }

    /// Blank the given positions (1-based) with the indeterminate symbol.
    /// Re-blanking an already blank position is a no-op.
    pub fn mask(&mut self, positions: &[usize]) {
        for &pos in positions {
            if pos >= 1 && pos <= self.length {
                self.digital_bytes[pos] = EMPTY_DIGITAL;
                self.utf8_bytes[pos] = EMPTY_UTF8;
            }
        }
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;

        if let Some(ref details) = self.details {
            write!(f, " {details}")?
        };

        writeln!(f)?;

        // note: the utf8 bytes start with a padding byte of 255
        let mut iter = self.utf8_bytes[1..].chunks(80).peekable();

        while let Some(byte_chunk) = iter.next() {
            match std::str::from_utf8(byte_chunk) {
                Ok(seq_line) => {
                    write!(f, "{}", seq_line)?;
                    if iter.peek().is_some() {
                        writeln!(f)?;
                    }
                }
                Err(_) => return Err(std::fmt::Error),
            }
        }
        Ok(())
    }
}

impl Debug for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", std::str::from_utf8(&self.utf8_bytes[1..]).unwrap())?;
        Ok(())
    }
}

/// A named set of sequences read from one source file.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Dataset {
    pub name: String,
    pub path: PathBuf,
    /// Fingerprint of the digital sequence content.
    pub checksum: u64,
    pub sequences: Vec<Sequence>,
    pub set_size: usize,
    pub seq_size: usize,
}

impl Dataset {
    pub fn from_fasta(name: &str, path: &Path) -> Result<Self> {
        let sequences = Sequence::nucleic_from_fasta(path)
            .with_context(|| format!("failed to read fasta: {}", path.display()))?;
        Ok(Self::from_sequences(name, path.to_path_buf(), sequences))
    }

    pub fn from_sequences(name: &str, path: PathBuf, sequences: Vec<Sequence>) -> Self {
        let set_size = sequences.len();
        let seq_size = sequences.iter().map(|s| s.length).sum();
        let checksum = content_checksum(&sequences);
        Dataset {
            name: name.to_string(),
            path,
            checksum,
            sequences,
            set_size,
            seq_size,
        }
    }
}

fn content_checksum(sequences: &[Sequence]) -> u64 {
    let mut hasher = WyHash::with_seed(0);
    for seq in sequences {
        hasher.write(&seq.digital_bytes[1..]);
    }
    hasher.finish()
}

/// A named grouping of datasets that are contrasted against each other,
/// e.g. a set of bound regions against a set of unbound regions.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Contrast {
    pub name: String,
    pub sets: Vec<Dataset>,
    pub set_size: usize,
    pub seq_size: usize,
}

impl Contrast {
    pub fn new(name: &str, sets: Vec<Dataset>) -> Self {
        let set_size = sets.iter().map(|s| s.set_size).sum();
        let seq_size = sets.iter().map(|s| s.seq_size).sum();
        Contrast {
            name: name.to_string(),
            sets,
            set_size,
            seq_size,
        }
    }
}

/// An ordered set of contrasts. The cached `set_size` and `seq_size`
/// always equal the sums over the children.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Collection {
    pub contrasts: Vec<Contrast>,
    pub set_size: usize,
    pub seq_size: usize,
}

impl Collection {
    pub fn new(contrasts: Vec<Contrast>) -> Self {
        let set_size = contrasts.iter().map(|c| c.set_size).sum();
        let seq_size = contrasts.iter().map(|c| c.seq_size).sum();
        Collection {
            contrasts,
            set_size,
            seq_size,
        }
    }

    /// Load a collection from (contrast name, fasta path) pairs; paths that
    /// share a contrast name become datasets of one contrast.
    pub fn from_paths(paths: &[(String, PathBuf)]) -> Result<Self> {
        let mut contrasts: Vec<(String, Vec<Dataset>)> = vec![];

        for (contrast_name, path) in paths {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let dataset = Dataset::from_fasta(&stem, path)?;

            match contrasts.iter_mut().find(|(name, _)| name == contrast_name) {
                Some((_, sets)) => sets.push(dataset),
                None => contrasts.push((contrast_name.clone(), vec![dataset])),
            }
        }

        Ok(Collection::new(
            contrasts
                .into_iter()
                .map(|(name, sets)| Contrast::new(&name, sets))
                .collect(),
        ))
    }

    pub fn expected_seq_size(&self) -> f64 {
        self.seq_size as f64 / self.set_size as f64
    }

    /// A view of this collection extended with the reverse complement
    /// of every sequence.
    pub fn with_reverse_complements(&self) -> Self {
        let contrasts = self
            .contrasts
            .iter()
            .map(|contrast| {
                let sets = contrast
                    .sets
                    .iter()
                    .map(|dataset| {
                        let mut sequences = dataset.sequences.clone();
                        sequences.extend(dataset.sequences.iter().map(|s| s.reverse_complement()));
                        Dataset::from_sequences(&dataset.name, dataset.path.clone(), sequences)
                    })
                    .collect();
                Contrast::new(&contrast.name, sets)
            })
            .collect();
        Collection::new(contrasts)
    }

    pub fn apply_mask(&mut self, mask: &CollectionMask) -> Result<(), MaskShapeError> {
        if mask.positions.len() != self.contrasts.len() {
            return Err(MaskShapeError);
        }
        for (contrast, contrast_mask) in self.contrasts.iter_mut().zip(&mask.positions) {
            if contrast_mask.len() != contrast.sets.len() {
                return Err(MaskShapeError);
            }
            for (dataset, dataset_mask) in contrast.sets.iter_mut().zip(contrast_mask) {
                if dataset_mask.len() != dataset.sequences.len() {
                    return Err(MaskShapeError);
                }
                for (sequence, positions) in dataset.sequences.iter_mut().zip(dataset_mask) {
                    sequence.mask(positions);
                }
            }
        }
        Ok(())
    }

    /// Split into (training, test): each sequence lands in the training
    /// split with probability `frequency`, in the test split otherwise.
    /// The contrast/dataset structure is mirrored in both halves.
    pub fn partition(&self, frequency: f64, rng: &mut impl Rng) -> (Self, Self) {
        let mut training_contrasts = vec![];
        let mut test_contrasts = vec![];

        for contrast in &self.contrasts {
            let mut training_sets = vec![];
            let mut test_sets = vec![];

            for dataset in &contrast.sets {
                let mut training_seqs = vec![];
                let mut test_seqs = vec![];

                for sequence in &dataset.sequences {
                    if frequency >= 1.0 || rng.gen::<f64>() < frequency {
                        training_seqs.push(sequence.clone());
                    } else {
                        test_seqs.push(sequence.clone());
                    }
                }

                training_sets.push(Dataset::from_sequences(
                    &dataset.name,
                    dataset.path.clone(),
                    training_seqs,
                ));
                test_sets.push(Dataset::from_sequences(
                    &dataset.name,
                    dataset.path.clone(),
                    test_seqs,
                ));
            }

            training_contrasts.push(Contrast::new(&contrast.name, training_sets));
            test_contrasts.push(Contrast::new(&contrast.name, test_sets));
        }

        (
            Collection::new(training_contrasts),
            Collection::new(test_contrasts),
        )
    }
}

/// Per-sequence positions to blank, mirroring a collection's shape:
/// `positions[contrast][dataset][sequence]` is a list of 1-based positions.
#[derive(Clone, Default)]
pub struct CollectionMask {
    pub positions: Vec<Vec<Vec<Vec<usize>>>>,
}

impl CollectionMask {
    pub fn is_empty(&self) -> bool {
        self.positions
            .iter()
            .flatten()
            .flatten()
            .all(|positions| positions.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(name: &str, seqs: &[&str]) -> Dataset {
        let sequences = seqs
            .iter()
            .map(|s| {
                let mut seq = Sequence::from_utf8(s.as_bytes()).unwrap();
                seq.name = format!("{name}-{}", seq.length);
                seq
            })
            .collect();
        Dataset::from_sequences(name, PathBuf::new(), sequences)
    }

    fn two_contrast_collection() -> Collection {
        Collection::new(vec![
            Contrast::new("bound", vec![dataset("signal", &["acgtacgt", "ttttacgt"])]),
            Contrast::new("unbound", vec![dataset("control", &["ggggcccc"])]),
        ])
    }

    #[test]
    fn test_cached_sizes_sum_over_children() {
        let collection = two_contrast_collection();
        assert_eq!(collection.set_size, 3);
        assert_eq!(collection.seq_size, 24);
        assert_eq!(collection.contrasts[0].set_size, 2);
        assert_eq!(collection.contrasts[0].seq_size, 16);
    }

    #[test]
    fn test_checksum_is_content_stable() {
        let a = dataset("a", &["acgt"]);
        let b = dataset("b", &["acgt"]);
        let c = dataset("c", &["acga"]);
        assert_eq!(a.checksum, b.checksum);
        assert_ne!(a.checksum, c.checksum);
    }

    #[test]
    fn test_sequence_reverse_complement() {
        let seq = Sequence::from_utf8(b"aacgn").unwrap();
        let rc = seq.reverse_complement();
        assert_eq!(&rc.utf8_bytes[1..], b"ncgtt");
        assert_eq!(rc.length, 5);

        let back = rc.reverse_complement();
        assert_eq!(&back.digital_bytes[1..], &seq.digital_bytes[1..]);
    }

    #[test]
    fn test_masking_is_idempotent() {
        let mut seq = Sequence::from_utf8(b"acgtacgt").unwrap();
        seq.mask(&[2, 3]);
        let once = seq.clone();
        seq.mask(&[2, 3]);
        assert!(seq == once);
        assert_eq!(&seq.utf8_bytes[1..], b"anntacgt");
    }

    #[test]
    fn test_apply_mask_mirrors_shape() {
        let mut collection = two_contrast_collection();
        let mask = CollectionMask {
            positions: vec![vec![vec![vec![1], vec![]]], vec![vec![vec![8]]]],
        };
        collection.apply_mask(&mask).unwrap();
        assert_eq!(
            &collection.contrasts[0].sets[0].sequences[0].utf8_bytes[1..],
            b"ncgtacgt"
        );
        assert_eq!(
            &collection.contrasts[1].sets[0].sequences[0].utf8_bytes[1..],
            b"ggggcccn"
        );

        let bad_mask = CollectionMask {
            positions: vec![vec![]],
        };
        assert!(collection.apply_mask(&bad_mask).is_err());
    }

    #[test]
    fn test_partition_preserves_every_sequence() {
        use rand::SeedableRng;
        let mut rng = rand_pcg::Pcg64::seed_from_u64(42);

        let collection = two_contrast_collection();
        let (training, test) = collection.partition(0.5, &mut rng);

        assert_eq!(training.set_size + test.set_size, collection.set_size);
        assert_eq!(training.seq_size + test.seq_size, collection.seq_size);
        assert_eq!(training.contrasts.len(), collection.contrasts.len());
        assert_eq!(test.contrasts.len(), collection.contrasts.len());

        let (all, none) = collection.partition(1.0, &mut rng);
        assert_eq!(all.set_size, collection.set_size);
        assert_eq!(none.set_size, 0);
    }

    #[test]
    fn test_revcomp_view_doubles_sequences() {
        let collection = two_contrast_collection();
        let extended = collection.with_reverse_complements();
        assert_eq!(extended.set_size, 2 * collection.set_size);
        assert_eq!(extended.seq_size, 2 * collection.seq_size);
    }
}
