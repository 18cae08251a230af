use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Number of IUPAC codes a single motif position can take.
const IUPAC_CODES: f64 = 15.0;

/// The log survival function of the chi-squared distribution.
fn ln_chi2_sf(x: f64, df: f64) -> f64 {
    match ChiSquared::new(df) {
        Ok(dist) => dist.sf(x).max(f64::MIN_POSITIVE).ln(),
        Err(_) => 0.0,
    }
}

/// Length- and multiplicity-corrected significance of a mutual information
/// score, on a ln(p) scale.
///
/// The G-statistic `2 n I` of the observed mutual information (in nats) is
/// referred to a chi-squared distribution with `df` degrees of freedom, and
/// the resulting log p-value is corrected for the number of motifs of the
/// given length that the search could have considered. The result is capped
/// at 0, i.e. p-values are never reported above 1.
///
/// For fixed `n`, `df`, and `motif_len` the result is monotone
/// non-increasing in `raw_score`.
pub fn corrected_pvalue(raw_score: f64, n: f64, df: f64, motif_len: usize) -> f64 {
    let g = 2.0 * n * raw_score;
    let ln_p = ln_chi2_sf(g, df);
    let ln_correction = motif_len as f64 * IUPAC_CODES.ln();
    (ln_p + ln_correction).min(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrected_pvalue_monotone_in_score() {
        let mut previous = f64::INFINITY;
        for i in 0..100 {
            let raw = i as f64 * 0.01;
            let ln_p = corrected_pvalue(raw, 100.0, 1.0, 8);
            assert!(ln_p <= previous);
            previous = ln_p;
        }
    }

    #[test]
    fn test_corrected_pvalue_never_above_one() {
        assert_eq!(corrected_pvalue(0.0, 100.0, 1.0, 8), 0.0);
        assert!(corrected_pvalue(0.5, 100.0, 1.0, 8) < 0.0);
    }

    #[test]
    fn test_length_correction_weakens_significance() {
        let short = corrected_pvalue(0.2, 100.0, 1.0, 4);
        let long = corrected_pvalue(0.2, 100.0, 1.0, 12);
        assert!(long >= short);
    }

    #[test]
    fn test_strong_association_is_significant() {
        // well past the 5% threshold on the -ln(p) scale
        let ln_p = corrected_pvalue(0.6, 200.0, 1.0, 4);
        assert!(-ln_p > -(0.05f64.ln()));
    }

    #[test]
    fn test_zero_degrees_of_freedom() {
        assert_eq!(corrected_pvalue(0.5, 100.0, 0.0, 8), 0.0);
    }
}
