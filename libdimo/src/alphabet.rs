use phf::phf_map;

use thiserror::Error;

#[derive(Error, Debug)]
#[error("invalid nucleotide code: {code}")]
pub struct InvalidNucleotideCodeError {
    pub code: char,
}

pub const UTF8_SPACE: u8 = 32;

/// The digital code of the indeterminate symbol 'n'.
pub const EMPTY_DIGITAL: u8 = 4;
/// The UTF8 byte of the indeterminate symbol 'n'.
pub const EMPTY_UTF8: u8 = 110;

pub const NUCLEOTIDE_ALPHABET: [&str; 4] = ["a", "c", "g", "t"];

pub const IUPAC_ALPHABET: [&str; 15] = [
    "a", "c", "g", "t", "m", "r", "w", "s", "y", "k", "b", "d", "h", "v", "n",
];

pub const UTF8_TO_DIGITAL_NUCLEOTIDE: phf::Map<u8, u8> = phf_map! {
    // upper case
    65u8  => 0,  // A
    67u8  => 1,  // C
    71u8  => 2,  // G
    84u8  => 3,  // T
    85u8  => 3,  // U
    78u8  => 4,  // N
    // lower case
    97u8  => 0,  // a
    99u8  => 1,  // c
    103u8 => 2,  // g
    116u8 => 3,  // t
    117u8 => 3,  // u
    110u8 => 4,  // n
};

pub const NUCLEOTIDE_INVERSE_MAP: phf::Map<u8, u8> = phf_map! {
    0u8   => 97,   // a
    1u8   => 99,   // c
    2u8   => 103,  // g
    3u8   => 116,  // t
    4u8   => 110,  // n
    255u8 => 32,   // space
};

/// Maps an IUPAC code to the set of nucleotides it matches,
/// as a 4-bit mask with a = 1, c = 2, g = 4, t = 8.
pub const IUPAC_TO_MASK: phf::Map<u8, u8> = phf_map! {
    97u8  => 0b0001,  // a
    99u8  => 0b0010,  // c
    103u8 => 0b0100,  // g
    116u8 => 0b1000,  // t
    109u8 => 0b0011,  // m = a|c
    114u8 => 0b0101,  // r = a|g
    119u8 => 0b1001,  // w = a|t
    115u8 => 0b0110,  // s = c|g
    121u8 => 0b1010,  // y = c|t
    107u8 => 0b1100,  // k = g|t
    98u8  => 0b1110,  // b = c|g|t
    100u8 => 0b1101,  // d = a|g|t
    104u8 => 0b1011,  // h = a|c|t
    118u8 => 0b0111,  // v = a|c|g
    110u8 => 0b1111,  // n
};

pub const MASK_TO_IUPAC: [u8; 16] = [
    0, b'a', b'c', b'm', b'g', b'r', b's', b'v', b't', b'w', b'y', b'h', b'k', b'd', b'b', b'n',
];

pub fn iupac_mask(code: char) -> Result<u8, InvalidNucleotideCodeError> {
    match IUPAC_TO_MASK.get(&(code.to_ascii_lowercase() as u8)) {
        Some(&mask) => Ok(mask),
        None => Err(InvalidNucleotideCodeError { code }),
    }
}

/// The number of concrete nucleotides an IUPAC code matches.
pub fn degeneracy(code: char) -> Result<u32, InvalidNucleotideCodeError> {
    Ok(iupac_mask(code)?.count_ones())
}

pub fn complement(code: char) -> Result<char, InvalidNucleotideCodeError> {
    let mask = iupac_mask(code)?;
    // complementing swaps a<->t and c<->g, which reverses the mask bits
    let complemented = mask.reverse_bits() >> 4;
    Ok(MASK_TO_IUPAC[complemented as usize] as char)
}

pub fn reverse_complement(word: &str) -> Result<String, InvalidNucleotideCodeError> {
    word.chars().rev().map(complement).collect()
}

/// All IUPAC codes exactly one step more general than the
/// given code, i.e. matching one additional nucleotide.
pub fn generalizations(code: char) -> Result<Vec<char>, InvalidNucleotideCodeError> {
    let mask = iupac_mask(code)?;
    Ok((0..4)
        .map(|bit| 1u8 << bit)
        .filter(|bit| mask & bit == 0)
        .map(|bit| MASK_TO_IUPAC[(mask | bit) as usize] as char)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("acgt").unwrap(), "acgt");
        assert_eq!(reverse_complement("aacg").unwrap(), "cgtt");
        assert_eq!(reverse_complement("nwsr").unwrap(), "yswn");
    }

    #[test]
    fn test_complement_is_involution() {
        for code in IUPAC_ALPHABET {
            let c = code.chars().next().unwrap();
            assert_eq!(complement(complement(c).unwrap()).unwrap(), c);
        }
    }

    #[test]
    fn test_degeneracy() {
        assert_eq!(degeneracy('a').unwrap(), 1);
        assert_eq!(degeneracy('w').unwrap(), 2);
        assert_eq!(degeneracy('b').unwrap(), 3);
        assert_eq!(degeneracy('n').unwrap(), 4);
        assert!(degeneracy('q').is_err());
    }

    #[test]
    fn test_generalizations() {
        let of_a = generalizations('a').unwrap();
        assert_eq!(of_a, vec!['m', 'r', 'w']);

        let of_w = generalizations('w').unwrap();
        assert_eq!(of_w, vec!['h', 'd']);

        assert!(generalizations('n').unwrap().is_empty());
    }

    #[test]
    fn test_mask_round_trip() {
        for code in IUPAC_ALPHABET {
            let c = code.chars().next().unwrap();
            let mask = iupac_mask(c).unwrap();
            assert_eq!(MASK_TO_IUPAC[mask as usize] as char, c);
        }
    }
}
