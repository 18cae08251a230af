use anyhow::Result;
use log::info;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use libdimo::collection::Collection;
use libdimo::hmm::Model;

use super::{discover, DiscoveryOptions, DiscoveryPipeline};

#[derive(Clone, Copy, Debug)]
pub struct CrossValidationOptions {
    /// Number of folds; 0 disables cross-validation.
    pub folds: usize,
    /// Fraction of sequences assigned to each training split.
    pub frequency: f64,
    pub salt: u64,
}

/// Repeatedly partition the collection and run discovery on each split,
/// producing an ensemble of models. Folds share nothing mutable beyond
/// the tally of run statistics, so they run in parallel.
pub fn cross_validate(
    collection: &Collection,
    pipeline: &DiscoveryPipeline,
    options: &DiscoveryOptions,
    cv_options: &CrossValidationOptions,
) -> Result<Vec<Model>> {
    let (folds, frequency) = if cv_options.folds == 0 || cv_options.frequency >= 1.0 {
        (1, 1.0)
    } else {
        (cv_options.folds, cv_options.frequency)
    };

    (0..folds)
        .into_par_iter()
        .map(|fold| {
            if folds > 1 {
                info!("cross-validation fold {} of {folds}", fold + 1);
            }
            let mut rng = Pcg64::seed_from_u64(cv_options.salt.wrapping_add(fold as u64));
            let (training, test) = collection.partition(frequency, &mut rng);
            discover(collection, &training, &test, pipeline, options)
        })
        .collect()
}
