mod cross_validation;
pub use cross_validation::*;

mod discovery;
pub use discovery::*;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context};
use clap::{Args, ValueEnum};
use derive_builder::Builder;
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use libdimo::collection::Collection;
use libdimo::hmm::score::{Measure, ScoreError};
use libdimo::hmm::train::{TrainOptions, TrainSummary, Tasks};
use libdimo::hmm::Model;
use libdimo::seed::{
    Candidate, Finder, FinderOptions, MotifKind, MotifSpec, Objective, SearchParams,
};

use crate::cli::CommonArgs;
use crate::stats::{Stats, Timed};
use crate::util::PathBufExt;

#[derive(Error, Debug)]
#[error("matrix specification '{name}' has no seeds to search")]
pub struct MatrixSpecSearchedError {
    name: String,
}

pub trait SeedStep: dyn_clone::DynClone {
    fn find(
        &self,
        collection: &Collection,
        spec: &MotifSpec,
        objectives: &[Objective],
    ) -> anyhow::Result<Vec<Candidate>>;
}

dyn_clone::clone_trait_object!(SeedStep);

pub trait TrainStep: dyn_clone::DynClone {
    fn run(
        &self,
        model: &mut Model,
        data: &Collection,
        tasks: &Tasks,
        options: &TrainOptions,
    ) -> TrainSummary;
}

dyn_clone::clone_trait_object!(TrainStep);

pub trait ScoreStep: dyn_clone::DynClone {
    #[allow(clippy::too_many_arguments)]
    fn score(
        &self,
        model: &Model,
        data: &Collection,
        measure: Measure,
        weighting: bool,
        groups_to_score: &[usize],
        groups_to_ignore: &[usize],
        absent_groups: &[usize],
    ) -> Result<f64, ScoreError>;

    fn corrected_pvalue(&self, raw_score: f64, n: f64, df: f64, motif_len: usize) -> f64;
}

dyn_clone::clone_trait_object!(ScoreStep);

#[derive(Clone)]
pub struct DiscoveryPipeline {
    pub seed: Box<dyn SeedStep + Send + Sync>,
    pub train: Box<dyn TrainStep + Send + Sync>,
    pub score: Box<dyn ScoreStep + Send + Sync>,
    pub stats: Stats,
}

impl DiscoveryPipeline {
    pub fn new(finder_options: FinderOptions) -> Self {
        DiscoveryPipeline {
            seed: Box::new(DefaultSeedStep::new(finder_options)),
            train: Box::new(DefaultTrainStep),
            score: Box::new(DefaultScoreStep),
            stats: Stats::new(),
        }
    }
}

/// Explicit seed patterns are their own single candidate; automatic
/// specifications go through the seed finder.
#[derive(Clone)]
pub struct DefaultSeedStep {
    finder: Finder,
}

impl DefaultSeedStep {
    pub fn new(options: FinderOptions) -> Self {
        DefaultSeedStep {
            finder: Finder::new(options),
        }
    }
}

impl SeedStep for DefaultSeedStep {
    fn find(
        &self,
        collection: &Collection,
        spec: &MotifSpec,
        objectives: &[Objective],
    ) -> anyhow::Result<Vec<Candidate>> {
        match &spec.kind {
            MotifKind::Seed { pattern } => Ok(vec![Candidate {
                motif: pattern.clone(),
                score: 0.0,
                log_p: 0.0,
                counts: vec![],
            }]),
            MotifKind::Search { .. } => Ok(self.finder.find(collection, spec, objectives)?),
            MotifKind::File { .. } => Err(MatrixSpecSearchedError {
                name: spec.name.clone(),
            }
            .into()),
        }
    }
}

#[derive(Clone, Default)]
pub struct DefaultTrainStep;

impl TrainStep for DefaultTrainStep {
    fn run(
        &self,
        model: &mut Model,
        data: &Collection,
        tasks: &Tasks,
        options: &TrainOptions,
    ) -> TrainSummary {
        model.train(data, tasks, options)
    }
}

#[derive(Clone, Default)]
pub struct DefaultScoreStep;

impl ScoreStep for DefaultScoreStep {
    fn score(
        &self,
        model: &Model,
        data: &Collection,
        measure: Measure,
        weighting: bool,
        groups_to_score: &[usize],
        groups_to_ignore: &[usize],
        absent_groups: &[usize],
    ) -> Result<f64, ScoreError> {
        model.compute_score(
            data,
            measure,
            weighting,
            groups_to_score,
            groups_to_ignore,
            absent_groups,
        )
    }

    fn corrected_pvalue(&self, raw_score: f64, n: f64, df: f64, motif_len: usize) -> f64 {
        libdimo::stats::corrected_pvalue(raw_score, n, df, motif_len)
    }
}

/// What to re-train after a motif has been accepted in multi-motif mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Relearning {
    /// Keep the composed model as it is
    None,
    /// Re-estimate the background emissions and all transitions
    Reestimation,
    /// Re-train every motif
    #[default]
    Full,
}

#[derive(Builder, Clone, Debug)]
#[builder(default)]
pub struct DiscoveryOptions {
    pub motif_specs: Vec<MotifSpec>,
    pub objectives: Vec<Objective>,
    /// Emission probability mass spread over nucleotides a seed position
    /// does not match.
    pub alpha: f64,
    /// Expected number of motif occurrences per sequence.
    pub lambda: f64,
    /// Maximum register shift explored per candidate seed.
    pub wiggle: usize,
    pub accept_multiple: bool,
    pub relearning: Relearning,
    /// Model occurrences on the reverse complementary strand as well.
    pub revcomp: bool,
    /// Weight contrasts by their size when scoring.
    pub weighting: bool,
    /// Rank candidate models by corrected significance rather than the
    /// raw training objective.
    pub corrected_significance: bool,
    pub contingency_pseudo_count: f64,
    pub train: TrainOptions,
    /// Previously saved models to start from.
    pub load_paths: Vec<PathBuf>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        DiscoveryOptions {
            motif_specs: vec![],
            objectives: vec![],
            alpha: 0.03,
            lambda: 1.0,
            wiggle: 0,
            accept_multiple: false,
            relearning: Relearning::Full,
            revcomp: false,
            weighting: true,
            corrected_significance: true,
            contingency_pseudo_count: 1.0,
            train: TrainOptions::default(),
            load_paths: vec![],
        }
    }
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Sequence files; prefix a path with a contrast name (CONTRAST:PATH)
    /// to group files into contrasts. Unprefixed files share one contrast.
    #[arg(value_name = "[CONTRAST:]PATH.fa", required = true)]
    pub paths: Vec<String>,

    /// Arguments that define motifs and objectives
    #[command(flatten)]
    pub motif_args: MotifArgs,

    /// Arguments that control the discovery loop
    #[command(flatten)]
    pub discovery_args: DiscoveryArgs,

    /// Arguments that control parameter training
    #[command(flatten)]
    pub training_args: TrainingArgs,

    /// Arguments that control cross-validation
    #[command(flatten)]
    pub cross_validation_args: CrossValidationArgs,

    /// Arguments that control output options
    #[command(flatten)]
    pub output_args: OutputArgs,

    /// Arguments that are common across all dimo subcommands
    #[command(flatten)]
    pub common_args: CommonArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct MotifArgs {
    /// Add a motif from an explicit IUPAC seed pattern
    #[arg(long = "seed", value_name = "NAME:PATTERN")]
    pub seeds: Vec<String>,

    /// Add a motif from an emission matrix file
    #[arg(long = "matrix", value_name = "NAME:PATH")]
    pub matrices: Vec<String>,

    /// Add a motif by automatic seed search
    #[arg(long = "search", value_name = "NAME:LEN[-LEN][xN]")]
    pub searches: Vec<String>,

    /// Tie a motif to a measure and optionally to contrasts
    #[arg(long = "objective", value_name = "NAME:MEASURE[:CONTRAST,..]")]
    pub objectives: Vec<String>,

    /// Allow insert states after these 1-based motif positions
    #[arg(long = "insertions", value_name = "P,P,..", value_delimiter = ',')]
    pub insertions: Vec<usize>,

    /// Pad every motif with this many indeterminate columns on the left
    #[arg(long = "left-padding", default_value_t = 0usize, value_name = "n")]
    pub left_padding: usize,

    /// Pad every motif with this many indeterminate columns on the right
    #[arg(long = "right-padding", default_value_t = 0usize, value_name = "n")]
    pub right_padding: usize,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DiscoveryArgs {
    /// Hedge against seed register uncertainty by trying up to n shifted
    /// variants per side
    #[arg(long = "wiggle", default_value_t = 0usize, value_name = "n")]
    pub wiggle: usize,

    /// Greedily accept multiple motifs per specification
    #[arg(short = 'm', long = "multiple", default_value_t = false)]
    pub multiple: bool,

    /// What to re-train after a motif is accepted
    #[arg(long = "relearning", value_enum, default_value_t = Relearning::Full)]
    pub relearning: Relearning,

    /// Also model occurrences on the reverse complementary strand
    #[arg(long = "revcomp", default_value_t = false)]
    pub revcomp: bool,

    /// Disable contrast size weighting
    #[arg(long = "unweighted", default_value_t = false)]
    pub unweighted: bool,

    /// Rank candidate models by the raw objective instead of corrected
    /// significance
    #[arg(long = "raw-scores", default_value_t = false)]
    pub raw_scores: bool,

    /// Emission probability mass spread over non-matching nucleotides
    #[arg(long = "alpha", default_value_t = 0.03, value_name = "F")]
    pub alpha: f64,

    /// Expected motif occurrences per sequence
    #[arg(long = "lambda", default_value_t = 1.0, value_name = "F")]
    pub lambda: f64,

    /// Pseudo count added to every contingency table cell
    #[arg(long = "pseudo-count", default_value_t = 1.0, value_name = "F")]
    pub pseudo_count: f64,

    /// Skip IUPAC generalization of exact seeds
    #[arg(long = "no-generalization", default_value_t = false)]
    pub no_generalization: bool,

    /// Start from previously saved models
    #[arg(long = "load", value_name = "MODEL.json")]
    pub load_paths: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TrainingArgs {
    /// Maximum number of training iterations
    #[arg(long = "max-iter", default_value_t = 100usize, value_name = "n")]
    pub max_iter: usize,

    /// Relative log-likelihood change below which training stops
    #[arg(long = "tolerance", default_value_t = 1e-4, value_name = "F")]
    pub tolerance: f64,

    /// Pseudo count for emission re-estimation
    #[arg(long = "emission-pseudo", default_value_t = 1e-3, value_name = "F")]
    pub emission_pseudo_count: f64,

    /// Pseudo count for transition re-estimation
    #[arg(long = "transition-pseudo", default_value_t = 1e-3, value_name = "F")]
    pub transition_pseudo_count: f64,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CrossValidationArgs {
    /// Number of cross-validation folds; 0 disables cross-validation
    #[arg(long = "cv-folds", default_value_t = 0usize, value_name = "n")]
    pub folds: usize,

    /// Fraction of sequences assigned to the training split of each fold
    #[arg(long = "cv-freq", default_value_t = 0.9, value_name = "F")]
    pub frequency: f64,

    /// Seed for the random number generator
    #[arg(long = "salt", value_name = "n")]
    pub salt: Option<u64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Where to write the discovered model(s)
    #[arg(short = 'O', long = "output", value_name = "path")]
    pub model_path: Option<PathBuf>,

    /// Where to write a JSON summary of the discovered motifs
    #[arg(short = 'J', long = "json-output", value_name = "path")]
    pub summary_path: Option<PathBuf>,

    /// Where to write summary statistics
    #[arg(short = 'S', long = "stats-output", value_name = "path")]
    pub stats_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct MotifSummary {
    fold: usize,
    name: String,
    consensus: String,
    entry_probability: f64,
}

fn split_name_spec(text: &str) -> anyhow::Result<(&str, &str)> {
    text.split_once(':')
        .ok_or_else(|| anyhow!("expected NAME:SPEC, got '{text}'"))
}

fn parse_measure(text: &str) -> anyhow::Result<Measure> {
    match text {
        "likelihood" => Ok(Measure::Likelihood),
        "mi" | "mutual-information" => Ok(Measure::MutualInformation),
        "residual-mi" | "residual-mutual-information" => Ok(Measure::ResidualMutualInformation),
        _ => Err(anyhow!("unknown measure: '{text}'")),
    }
}

/// LEN, LEN-LEN, or either form followed by xN for the number of seeds.
fn parse_search_params(text: &str) -> anyhow::Result<SearchParams> {
    let (lengths, n_seeds) = match text.split_once('x') {
        Some((lengths, count)) => (lengths, count.parse()?),
        None => (text, 5),
    };
    let (min_length, max_length) = match lengths.split_once('-') {
        Some((min, max)) => (min.parse()?, max.parse()?),
        None => {
            let length = lengths.parse()?;
            (length, length)
        }
    };
    if min_length == 0 || max_length < min_length {
        return Err(anyhow!("invalid length range: '{text}'"));
    }
    Ok(SearchParams {
        min_length,
        max_length,
        n_seeds,
    })
}

impl DiscoverArgs {
    pub fn collection_paths(&self) -> Vec<(String, PathBuf)> {
        self.paths
            .iter()
            .map(|path| match path.split_once(':') {
                Some((contrast, path)) => (contrast.to_string(), PathBuf::from(path)),
                None => ("contrast".to_string(), PathBuf::from(path)),
            })
            .collect()
    }

    pub fn motif_specs(&self) -> anyhow::Result<Vec<MotifSpec>> {
        let args = &self.motif_args;
        let mut specs = vec![];

        for seed in &args.seeds {
            let (name, pattern) = split_name_spec(seed)?;
            specs.push(self.spec(name, MotifKind::Seed {
                pattern: pattern.to_lowercase(),
            }));
        }
        for matrix in &args.matrices {
            let (name, path) = split_name_spec(matrix)?;
            specs.push(self.spec(name, MotifKind::File {
                path: PathBuf::from(path),
            }));
        }
        for search in &args.searches {
            let (name, params) = split_name_spec(search)?;
            specs.push(self.spec(name, MotifKind::Search {
                params: parse_search_params(params)?,
            }));
        }

        Ok(specs)
    }

    fn spec(&self, name: &str, kind: MotifKind) -> MotifSpec {
        MotifSpec {
            name: name.to_string(),
            kind,
            insertions: self.motif_args.insertions.clone(),
            left_padding: self.motif_args.left_padding,
            right_padding: self.motif_args.right_padding,
        }
    }

    pub fn objectives(&self) -> anyhow::Result<Vec<Objective>> {
        self.motif_args
            .objectives
            .iter()
            .map(|objective| {
                let (motif, rest) = split_name_spec(objective)?;
                let (measure, contrasts) = match rest.split_once(':') {
                    Some((measure, contrasts)) => (
                        parse_measure(measure)?,
                        contrasts.split(',').map(str::to_string).collect(),
                    ),
                    None => (parse_measure(rest)?, vec![]),
                };
                Ok(Objective {
                    motif: motif.to_string(),
                    measure,
                    contrasts,
                })
            })
            .collect()
    }

    pub fn discovery_options(&self) -> anyhow::Result<DiscoveryOptions> {
        let args = &self.discovery_args;
        Ok(DiscoveryOptions {
            motif_specs: self.motif_specs()?,
            objectives: self.objectives()?,
            alpha: args.alpha,
            lambda: args.lambda,
            wiggle: args.wiggle,
            accept_multiple: args.multiple,
            relearning: args.relearning,
            revcomp: args.revcomp,
            weighting: !args.unweighted,
            corrected_significance: !args.raw_scores,
            contingency_pseudo_count: args.pseudo_count,
            train: TrainOptions {
                max_iter: self.training_args.max_iter,
                tolerance: self.training_args.tolerance,
                emission_pseudo_count: self.training_args.emission_pseudo_count,
                transition_pseudo_count: self.training_args.transition_pseudo_count,
            },
            load_paths: args.load_paths.clone(),
        })
    }

    pub fn cross_validation_options(&self) -> CrossValidationOptions {
        let args = &self.cross_validation_args;
        CrossValidationOptions {
            folds: args.folds,
            frequency: args.frequency,
            salt: args.salt.unwrap_or_else(rand::random),
        }
    }
}

pub fn run_discovery(args: &DiscoverArgs) -> anyhow::Result<()> {
    {
        // quickly make sure we can write the results
        if let Some(path) = &args.output_args.model_path {
            path.open(args.common_args.allow_overwrite)?;
        }
        if let Some(path) = &args.output_args.summary_path {
            path.open(args.common_args.allow_overwrite)?;
        }
        if let Some(path) = &args.output_args.stats_path {
            path.open(args.common_args.allow_overwrite)?;
        }
    }

    let mut collection = Collection::from_paths(&args.collection_paths())
        .context("failed to load sequence collection")?;
    if args.discovery_args.revcomp {
        collection = collection.with_reverse_complements();
    }
    check_data(&collection);

    let options = args.discovery_options()?;
    let cv_options = args.cross_validation_options();
    let finder_options = FinderOptions {
        pseudo_count: options.contingency_pseudo_count,
        generalize: !args.discovery_args.no_generalization,
    };

    let mut pipeline = DiscoveryPipeline::new(finder_options);

    let now = Instant::now();
    let models = cross_validate(&collection, &pipeline, &options, &cv_options)?;
    pipeline.stats.add_time(Timed::Total, now.elapsed());

    let mut summaries = vec![];
    for (fold, model) in models.iter().enumerate() {
        for group in 1..model.ngroups() {
            let summary = MotifSummary {
                fold,
                name: model.groups[group].name.clone(),
                consensus: model.group_consensus(group),
                entry_probability: model.groups[group].entry,
            };
            info!(
                "fold {fold}: motif '{}' with consensus {}",
                summary.name, summary.consensus
            );
            summaries.push(summary);
        }
        if let Some(path) = &args.output_args.model_path {
            let path = if models.len() == 1 {
                path.clone()
            } else {
                path.with_extension(format!("cv{fold}.json"))
            };
            model.save(&path)?;
            info!("wrote model to {}", path.display());
        }
    }

    if let Some(path) = &args.output_args.summary_path {
        let out = path.open(true)?;
        serde_json::to_writer_pretty(out, &summaries)?;
        info!("wrote motif summary to {}", path.display());
    }

    match &args.output_args.stats_path {
        Some(path) => {
            let mut out = path.open(true)?;
            pipeline.stats.write(&mut out)?;
        }
        None => {
            if log::log_enabled!(log::Level::Info) {
                pipeline.stats.write(&mut std::io::stderr().lock())?;
            }
        }
    }

    Ok(())
}

fn check_data(collection: &Collection) {
    for contrast in &collection.contrasts {
        info!(
            "contrast '{}' has {} sequences with a total size of {} nucleotides",
            contrast.name, contrast.set_size, contrast.seq_size
        );
        for dataset in &contrast.sets {
            info!(
                "  {} has {} sequences with a total size of {} nucleotides",
                dataset.path.display(),
                dataset.set_size,
                dataset.seq_size
            );
            debug!("  the checksum of this set is {:016x}", dataset.checksum);
        }
    }
}
