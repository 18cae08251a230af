use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use log::{debug, info, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use libdimo::collection::Collection;
use libdimo::hmm::score::Measure;
use libdimo::hmm::train::{Task, Tasks};
use libdimo::hmm::{Model, ALPHABET_SIZE};
use libdimo::seed::{self, MotifKind, MotifSpec};
use libdimo::util::VecMath;

use crate::pipeline::{DiscoveryOptions, DiscoveryPipeline, Relearning};
use crate::stats::{CountedValue, Stats, Timed};

/// A candidate variant together with the model trained around it; lives
/// for one discovery round.
struct LearnedModel {
    seed: String,
    /// The variant's group index within `model`.
    group_idx: usize,
    model: Model,
}

/// The multi-motif discovery loop: per motif specification, mask what the
/// model already explains, propose candidate seeds, train a model around
/// every register-shifted variant of every candidate, and accept the
/// best-scoring augmentations. The best model carries forward from one
/// specification to the next.
pub fn discover(
    all_data: &Collection,
    training_data: &Collection,
    test_data: &Collection,
    pipeline: &DiscoveryPipeline,
    options: &DiscoveryOptions,
) -> anyhow::Result<Model> {
    seed::validate(&options.motif_specs, &options.objectives)?;

    let mut stats = pipeline.stats.clone();

    let mut model;
    let mut training_necessary;
    if options.load_paths.is_empty() {
        model = Model::with_background_of(training_data, options.contingency_pseudo_count);
        training_necessary = false;
    } else {
        model = Model::load(&options.load_paths[0])?;
        for path in &options.load_paths[1..] {
            model.merge_motifs(&Model::load(path)?)?;
        }
        training_necessary = options.load_paths.len() > 1;
    }

    let expected_seq_size = all_data.expected_seq_size();
    info!("the average sequence size is {expected_seq_size:.1}nt");

    let mut round_specs: Vec<&MotifSpec> = vec![];
    for spec in &options.motif_specs {
        match &spec.kind {
            MotifKind::File { path } => {
                let matrix = read_emission_matrix(path)?;
                model.add_motif_matrix(
                    &matrix,
                    expected_seq_size,
                    options.lambda,
                    &spec.name,
                    &spec.insertions,
                    spec.left_padding,
                    spec.right_padding,
                )?;
            }
            MotifKind::Seed { .. } | MotifKind::Search { .. } => {
                round_specs.push(spec);
                training_necessary = true;
            }
        }
    }

    if round_specs.is_empty() {
        info!("no seeds to determine");
        train_and_evaluate(
            &mut model,
            all_data,
            training_data,
            test_data,
            pipeline,
            options,
            training_necessary,
        );
        return Ok(model);
    }

    // candidate seeds must not come from regions the model already
    // explains, so rounds search a maskable copy of the training data
    let mut search_collection = training_data.clone();

    'specs: for spec in round_specs {
        if model.nmotifs() > 0 {
            info!("masking the search collection");
            let mask = model.compute_mask(training_data);
            search_collection
                .apply_mask(&mask)
                .context("mask does not fit the search collection")?;
        }

        info!("determining seeds for motif '{}'", spec.name);
        let now = Instant::now();
        let candidates = pipeline
            .seed
            .find(&search_collection, spec, &options.objectives)?;
        stats.add_time(Timed::Seeding, now.elapsed());

        if candidates.is_empty() {
            info!("seed search exhausted; abandoning all remaining specifications");
            break 'specs;
        }
        stats.add_count(CountedValue::Candidates, candidates.len());
        for candidate in &candidates {
            debug!(
                "candidate seed '{}': score {:.4}, ln(p) {:.4}",
                candidate.motif, candidate.score, candidate.log_p
            );
        }

        let variants: Vec<String> = candidates
            .iter()
            .flat_map(|candidate| wiggle_variants(&candidate.motif, options.wiggle))
            .collect();
        stats.add_count(CountedValue::WiggleVariants, variants.len());

        let now = Instant::now();
        let learned: Vec<LearnedModel> = variants
            .par_iter()
            .filter_map(|variant| {
                train_variant(
                    &model,
                    variant,
                    spec,
                    training_data,
                    pipeline,
                    options,
                    expected_seq_size,
                    training_necessary,
                )
            })
            .collect();
        stats.add_time(Timed::Training, now.elapsed());
        stats.add_count(CountedValue::ModelsTrained, learned.len());

        let now = Instant::now();
        if !options.accept_multiple {
            match select_single(&learned, training_data, pipeline, options, spec) {
                Some((best_seed, best_score, best_model)) => {
                    info!("accepting seed '{best_seed}' with score {best_score:.4}");
                    model = best_model;
                    stats.increment_count(CountedValue::ModelsAccepted);
                }
                None => {
                    info!(
                        "no acceptable model for '{}'; keeping the previous model",
                        spec.name
                    );
                }
            }
        } else {
            multi_accept(
                &mut model,
                learned,
                training_data,
                pipeline,
                options,
                &mut stats,
            );
        }
        stats.add_time(Timed::Selection, now.elapsed());
    }

    evaluate(&model, training_data, "training", pipeline, options);
    if test_data.set_size != 0 {
        evaluate(&model, test_data, "test", pipeline, options);
        evaluate(&model, all_data, "full", pipeline, options);
    }

    Ok(model)
}

/// Clone the current best model, fold the variant in as a new group, and
/// train the clone. A variant that cannot be built is a failed candidate,
/// not a fatal error.
#[allow(clippy::too_many_arguments)]
fn train_variant(
    base: &Model,
    variant: &str,
    spec: &MotifSpec,
    training_data: &Collection,
    pipeline: &DiscoveryPipeline,
    options: &DiscoveryOptions,
    expected_seq_size: f64,
    training_necessary: bool,
) -> Option<LearnedModel> {
    if options.wiggle > 0 {
        info!(
            "considering wiggle variant '{variant}' of candidate motif '{}'",
            spec.name
        );
    }

    let mut model = base.clone();
    match model.add_motif(
        variant,
        options.alpha,
        expected_seq_size,
        options.lambda,
        &spec.name,
        &spec.insertions,
        spec.left_padding,
        spec.right_padding,
    ) {
        Ok(group_idx) => {
            if training_necessary {
                let tasks = training_tasks(&model, options);
                pipeline
                    .train
                    .run(&mut model, training_data, &tasks, &options.train);
            }
            Some(LearnedModel {
                seed: variant.to_string(),
                group_idx,
                model,
            })
        }
        Err(error) => {
            warn!("failed to build a model for variant '{variant}': {error}");
            None
        }
    }
}

/// Exactly one learned model becomes the new best: the maximum under the
/// primary training measure, first encountered on ties. When nothing
/// scores above negative infinity the round declines to update the model.
fn select_single(
    learned: &[LearnedModel],
    data: &Collection,
    pipeline: &DiscoveryPipeline,
    options: &DiscoveryOptions,
    spec: &MotifSpec,
) -> Option<(String, f64, Model)> {
    let measure = primary_measure(options, &spec.name);
    let mut best: Option<(&LearnedModel, f64)> = None;

    for candidate in learned {
        let groups: Vec<usize> = (1..candidate.model.ngroups()).collect();
        let score = match pipeline.score.score(
            &candidate.model,
            data,
            measure,
            options.weighting,
            &groups,
            &[],
            &[],
        ) {
            Ok(score) => score,
            Err(error) => {
                warn!("scoring the model for '{}' failed: {error}", candidate.seed);
                f64::NEG_INFINITY
            }
        };
        debug!("learned model for '{}' scores {score:.4}", candidate.seed);

        let current = best.map(|(_, score)| score).unwrap_or(f64::NEG_INFINITY);
        if score > current && score > f64::NEG_INFINITY {
            best = Some((candidate, score));
        }
    }

    best.map(|(candidate, score)| (candidate.seed.clone(), score, candidate.model.clone()))
}

/// Greedy iterative refinement over the pool of learned models: each pass
/// scores every remaining candidate composed onto the current best model,
/// prunes candidates below the significance threshold for good, and
/// accepts the best improving one. Ends when the pool is empty or no
/// candidate improves.
fn multi_accept(
    model: &mut Model,
    mut pool: Vec<LearnedModel>,
    training_data: &Collection,
    pipeline: &DiscoveryPipeline,
    options: &DiscoveryOptions,
    stats: &mut Stats,
) {
    let threshold = -(0.05f64.ln());
    let mut absent_groups: Vec<usize> = vec![];

    while !pool.is_empty() {
        let mut below_threshold = vec![false; pool.len()];
        let mut best: Option<(usize, f64, Model)> = None;

        for (idx, learned) in pool.iter().enumerate() {
            let (score, composed) =
                evaluate_composed(model, learned, training_data, pipeline, options, &absent_groups);
            debug!("the model augmented by '{}' scores {score:.4}", learned.seed);

            if options.corrected_significance && score < threshold {
                below_threshold[idx] = true;
                continue;
            }

            let current = best.as_ref().map(|(_, score, _)| *score);
            if score > current.unwrap_or(f64::NEG_INFINITY) {
                if let Some(composed) = composed {
                    best = Some((idx, score, composed));
                }
            }
        }

        let pruned = below_threshold.iter().filter(|&&below| below).count();
        if pruned > 0 {
            info!("pruning {pruned} candidates below the significance threshold");
            stats.add_count(CountedValue::PrunedBelowThreshold, pruned);
        }

        let accepted_idx = best.as_ref().map(|(idx, _, _)| *idx);
        if let Some((idx, score, composed)) = best {
            info!("accepting seed '{}' with score {score:.4}", pool[idx].seed);
            *model = composed;

            let tasks = relearning_tasks(model, options);
            if !tasks.is_empty() {
                pipeline
                    .train
                    .run(model, training_data, &tasks, &options.train);
            }

            absent_groups.push(model.ngroups() - 1);
            stats.increment_count(CountedValue::ModelsAccepted);
        }

        // the pool strictly shrinks: an accepted candidate leaves it, and
        // below-threshold candidates never come back
        let mut idx = 0;
        pool.retain(|_| {
            let keep = !below_threshold[idx] && Some(idx) != accepted_idx;
            idx += 1;
            keep
        });

        if accepted_idx.is_none() {
            info!("no improving model; stopping");
            break;
        }
    }
}

/// Compose the current best model with a candidate's motif group (no
/// re-estimation) and score the result. On the significance pathway the
/// raw association is converted to a corrected value on the -ln(p) scale;
/// any failure makes this a failed candidate with score negative infinity.
fn evaluate_composed(
    best: &Model,
    learned: &LearnedModel,
    data: &Collection,
    pipeline: &DiscoveryPipeline,
    options: &DiscoveryOptions,
    absent_groups: &[usize],
) -> (f64, Option<Model>) {
    let mut composed = best.clone();
    let new_group = match composed.adopt_group(&learned.model, learned.group_idx) {
        Ok(idx) => idx,
        Err(error) => {
            warn!("failed to compose '{}' into the model: {error}", learned.seed);
            return (f64::NEG_INFINITY, None);
        }
    };
    let groups_to_score = vec![new_group];

    let raw = if !options.corrected_significance {
        let measure = primary_measure(options, &composed.groups[new_group].name);
        pipeline.score.score(
            &composed,
            data,
            measure,
            options.weighting,
            &groups_to_score,
            absent_groups,
            &[],
        )
    } else if absent_groups.is_empty() {
        pipeline.score.score(
            &composed,
            data,
            Measure::MutualInformation,
            options.weighting,
            &groups_to_score,
            &[],
            &[],
        )
    } else if !options.revcomp {
        pipeline.score.score(
            &composed,
            data,
            Measure::ResidualMutualInformation,
            options.weighting,
            &groups_to_score,
            &[],
            absent_groups,
        )
    } else {
        debug!("adding reverse complementary motifs");
        let (rc_model, index_map) = composed.add_revcomp_motifs();

        let mut rc_groups = groups_to_score.clone();
        for group in &groups_to_score {
            rc_groups.push(index_map[group]);
        }
        let mut rc_absent = absent_groups.to_vec();
        for group in absent_groups {
            rc_absent.push(index_map[group]);
        }

        pipeline.score.score(
            &rc_model,
            data,
            Measure::ResidualMutualInformation,
            options.weighting,
            &rc_groups,
            &[],
            &rc_absent,
        )
    };

    let raw = match raw {
        Ok(raw) => raw,
        Err(error) => {
            warn!(
                "scoring the model augmented by '{}' failed: {error}",
                learned.seed
            );
            return (f64::NEG_INFINITY, Some(composed));
        }
    };

    if !options.corrected_significance {
        return (raw, Some(composed));
    }

    let score = if raw > f64::NEG_INFINITY {
        let n = data.set_size as f64;
        let df = degrees_of_freedom(data);
        -pipeline
            .score
            .corrected_pvalue(raw, n, df, learned.seed.len())
    } else {
        raw
    };

    (score, Some(composed))
}

/// Register-shifted, padded variants of a candidate pattern, hedging
/// against seed misalignment: the pattern itself plus, for each shift
/// distance, a left-padded and a right-padded truncation.
pub(crate) fn wiggle_variants(pattern: &str, wiggle: usize) -> Vec<String> {
    let length = pattern.len();
    let mut variants = vec![pattern.to_string()];
    for shift in 1..=length.min(wiggle) {
        let padding = "n".repeat(shift);
        variants.push(format!("{padding}{}", &pattern[..length - shift]));
        variants.push(format!("{}{padding}", &pattern[shift..]));
    }
    variants
}

/// Degrees of freedom of the significance test: the number of datasets
/// beyond the first, summed over every contrast of the collection. All
/// contrasts count, including ones a motif's objective never scores
/// against.
pub(crate) fn degrees_of_freedom(data: &Collection) -> f64 {
    data.contrasts
        .iter()
        .map(|contrast| contrast.sets.len().saturating_sub(1) as f64)
        .sum()
}

fn primary_measure(options: &DiscoveryOptions, motif_name: &str) -> Measure {
    options
        .objectives
        .iter()
        .find(|objective| objective.motif == motif_name)
        .or_else(|| options.objectives.first())
        .map(|objective| objective.measure)
        .unwrap_or(Measure::MutualInformation)
}

/// One task per motif name: its groups' emissions plus all transitions,
/// trained towards the motif's objective.
fn training_tasks(model: &Model, options: &DiscoveryOptions) -> Tasks {
    let mut names_seen = HashSet::new();
    let mut tasks = Tasks::new();

    for group in &model.groups[1..] {
        if !names_seen.insert(group.name.clone()) {
            continue;
        }

        let objective = options
            .objectives
            .iter()
            .find(|objective| objective.motif == group.name);

        tasks.push(Task {
            name: group.name.clone(),
            measure: primary_measure(options, &group.name),
            contrasts: objective.map(|o| o.contrasts.clone()).unwrap_or_default(),
            emission_groups: model
                .groups
                .iter()
                .enumerate()
                .filter(|(_, g)| g.name == group.name)
                .map(|(idx, _)| idx)
                .collect(),
            transition_states: (0..model.nstates()).collect(),
        });
    }

    tasks
}

fn relearning_tasks(model: &Model, options: &DiscoveryOptions) -> Tasks {
    match options.relearning {
        Relearning::None => Tasks::new(),
        Relearning::Full => training_tasks(model, options),
        Relearning::Reestimation => {
            let mut contrasts: Vec<String> = vec![];
            for task in training_tasks(model, options) {
                if task.contrasts.is_empty() {
                    contrasts.clear();
                    break;
                }
                for contrast in task.contrasts {
                    if !contrasts.contains(&contrast) {
                        contrasts.push(contrast);
                    }
                }
            }

            vec![Task {
                name: "background".to_string(),
                measure: Measure::Likelihood,
                contrasts,
                emission_groups: vec![0],
                transition_states: (0..model.nstates()).collect(),
            }]
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn train_and_evaluate(
    model: &mut Model,
    all_data: &Collection,
    training_data: &Collection,
    test_data: &Collection,
    pipeline: &DiscoveryPipeline,
    options: &DiscoveryOptions,
    do_training: bool,
) {
    if do_training {
        let tasks = training_tasks(model, options);
        if !tasks.is_empty() {
            let summary = pipeline
                .train
                .run(model, training_data, &tasks, &options.train);
            debug!(
                "trained for {} iterations (converged: {})",
                summary.iterations, summary.converged
            );
        }
    }

    evaluate(model, training_data, "training", pipeline, options);
    if test_data.set_size != 0 {
        evaluate(model, test_data, "test", pipeline, options);
        evaluate(model, all_data, "full", pipeline, options);
    }
}

/// Diagnostic scores of a model on one data split; gated by verbosity and
/// never part of control flow.
fn evaluate(
    model: &Model,
    data: &Collection,
    label: &str,
    pipeline: &DiscoveryPipeline,
    options: &DiscoveryOptions,
) {
    if !log::log_enabled!(log::Level::Info) || data.set_size == 0 {
        return;
    }

    let likelihood = model.total_log_likelihood(data, &[]);
    info!("{label} data: log likelihood = {likelihood:.4}");

    if model.nmotifs() > 0 {
        let groups: Vec<usize> = (1..model.ngroups()).collect();
        if let Ok(information) = pipeline.score.score(
            model,
            data,
            Measure::MutualInformation,
            options.weighting,
            &groups,
            &[],
            &[],
        ) {
            info!("{label} data: mutual information = {information:.4}");
        }
    }
}

/// An emission matrix on disk: one whitespace-separated row of four
/// probabilities per motif position; empty lines and '#' comments are
/// skipped. Rows are normalized on load.
fn read_emission_matrix(path: &Path) -> anyhow::Result<Vec<[f64; ALPHABET_SIZE]>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read emission matrix: {}", path.display()))?;

    let mut matrix = vec![];
    for (line_idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let values: Vec<f64> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .with_context(|| format!("bad emission matrix line {}", line_idx + 1))?;
        if values.len() != ALPHABET_SIZE {
            anyhow::bail!(
                "emission matrix line {} has {} columns, expected {}",
                line_idx + 1,
                values.len(),
                ALPHABET_SIZE
            );
        }

        let mut row = values;
        row.normalize();
        matrix.push([row[0], row[1], row[2], row[3]]);
    }

    if matrix.is_empty() {
        anyhow::bail!("emission matrix {} is empty", path.display());
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        DefaultSeedStep, DiscoveryOptionsBuilder, ScoreStep, SeedStep, TrainStep,
    };
    use libdimo::collection::{Contrast, Dataset, Sequence};
    use libdimo::hmm::score::ScoreError;
    use libdimo::hmm::train::{TrainOptions, TrainSummary};
    use libdimo::seed::{Candidate, FinderOptions, Objective, SearchParams};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

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

    fn bound_unbound() -> Collection {
        Collection::new(vec![
            Contrast::new("bound", vec![dataset("signal", &["ttacgttt"])]),
            Contrast::new("unbound", vec![dataset("control", &["tttttttt"])]),
        ])
    }

    fn empty_collection() -> Collection {
        Collection::new(vec![])
    }

    fn candidate(motif: &str) -> Candidate {
        Candidate {
            motif: motif.to_string(),
            score: 1.0,
            log_p: -1.0,
            counts: vec![],
        }
    }

    fn seed_spec(name: &str, pattern: &str) -> MotifSpec {
        MotifSpec {
            name: name.to_string(),
            kind: MotifKind::Seed {
                pattern: pattern.to_string(),
            },
            insertions: vec![],
            left_padding: 0,
            right_padding: 0,
        }
    }

    fn search_spec(name: &str) -> MotifSpec {
        MotifSpec {
            name: name.to_string(),
            kind: MotifKind::Search {
                params: SearchParams {
                    min_length: 8,
                    max_length: 8,
                    n_seeds: 5,
                },
            },
            insertions: vec![],
            left_padding: 0,
            right_padding: 0,
        }
    }

    /// Serves a fixed candidate list per specification name and records
    /// the first sequence of every collection it is asked to search.
    #[derive(Clone)]
    struct ScriptedSeeds {
        per_spec: HashMap<String, Vec<Candidate>>,
        seen: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ScriptedSeeds {
        fn new(per_spec: &[(&str, Vec<Candidate>)]) -> Self {
            ScriptedSeeds {
                per_spec: per_spec
                    .iter()
                    .map(|(name, candidates)| (name.to_string(), candidates.clone()))
                    .collect(),
                seen: Arc::new(Mutex::new(vec![])),
            }
        }
    }

    impl SeedStep for ScriptedSeeds {
        fn find(
            &self,
            collection: &Collection,
            spec: &MotifSpec,
            _objectives: &[Objective],
        ) -> anyhow::Result<Vec<Candidate>> {
            self.seen.lock().unwrap().push(
                collection.contrasts[0].sets[0].sequences[0].utf8_bytes[1..].to_vec(),
            );
            Ok(self.per_spec.get(&spec.name).cloned().unwrap_or_default())
        }
    }

    #[derive(Clone)]
    struct SkipTraining;

    impl TrainStep for SkipTraining {
        fn run(
            &self,
            _model: &mut Model,
            _data: &Collection,
            _tasks: &Tasks,
            _options: &TrainOptions,
        ) -> TrainSummary {
            TrainSummary {
                iterations: 0,
                converged: true,
                log_likelihood: 0.0,
            }
        }
    }

    /// Scores a model by the consensus of the newest scored group, via a
    /// fixed table; unknown consensus strings score negative infinity.
    /// The corrected p-value is the negated raw score, so controller
    /// scores equal the raw table values.
    #[derive(Clone)]
    struct TableScores {
        by_consensus: HashMap<String, f64>,
    }

    impl TableScores {
        fn new(scores: &[(&str, f64)]) -> Self {
            TableScores {
                by_consensus: scores
                    .iter()
                    .map(|(consensus, score)| (consensus.to_string(), *score))
                    .collect(),
            }
        }
    }

    impl ScoreStep for TableScores {
        fn score(
            &self,
            model: &Model,
            _data: &Collection,
            _measure: Measure,
            _weighting: bool,
            groups_to_score: &[usize],
            _groups_to_ignore: &[usize],
            _absent_groups: &[usize],
        ) -> Result<f64, ScoreError> {
            let group = *groups_to_score.last().unwrap();
            let consensus = model.group_consensus(group);
            Ok(*self
                .by_consensus
                .get(&consensus)
                .unwrap_or(&f64::NEG_INFINITY))
        }

        fn corrected_pvalue(&self, raw_score: f64, _n: f64, _df: f64, _motif_len: usize) -> f64 {
            -raw_score
        }
    }

    fn pipeline_with(seeds: ScriptedSeeds, scores: TableScores) -> DiscoveryPipeline {
        DiscoveryPipeline {
            seed: Box::new(seeds),
            train: Box::new(SkipTraining),
            score: Box::new(scores),
            stats: Stats::new(),
        }
    }

    #[test]
    fn test_wiggle_variants_of_zero_is_identity() {
        assert_eq!(wiggle_variants("acgt", 0), vec!["acgt".to_string()]);
    }

    #[test]
    fn test_wiggle_variants_count_and_shape() {
        let variants = wiggle_variants("acgt", 1);
        assert_eq!(variants, vec!["acgt", "nacg", "cgtn"]);

        let variants = wiggle_variants("acgt", 10);
        assert_eq!(variants.len(), 1 + 2 * 4);
        for (idx, variant) in variants.iter().enumerate() {
            assert_eq!(variant.len(), 4);
            if idx > 0 && idx % 2 == 1 {
                let shift = idx.div_ceil(2);
                assert!(variant.starts_with(&"n".repeat(shift)));
            }
        }
    }

    #[test]
    fn test_degrees_of_freedom_sums_over_all_contrasts() {
        let collection = Collection::new(vec![
            Contrast::new(
                "three_sets",
                vec![
                    dataset("a", &["acgt"]),
                    dataset("b", &["acgt"]),
                    dataset("c", &["acgt"]),
                ],
            ),
            Contrast::new("two_sets", vec![dataset("d", &["acgt"]), dataset("e", &["acgt"])]),
            Contrast::new("one_set", vec![dataset("f", &["acgt"])]),
        ]);

        // every contrast contributes, even ones no objective refers to
        assert_eq!(degrees_of_freedom(&collection), 3.0);
    }

    #[test]
    fn test_single_accept_trains_all_variants_and_keeps_stable_max() {
        let data = bound_unbound();
        let pipeline = pipeline_with(
            ScriptedSeeds::new(&[("motif", vec![candidate("acgt")])]),
            TableScores::new(&[("acgt", 5.0), ("nacg", 5.0), ("cgtn", 2.0)]),
        );
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![seed_spec("motif", "acgt")])
            .wiggle(1)
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();

        assert_eq!(model.ngroups(), 2);
        // the unshifted variant wins the tie because it came first
        assert_eq!(model.group_consensus(1), "acgt");
        assert_eq!(pipeline.stats.counted_value(CountedValue::Candidates), 1);
        assert_eq!(pipeline.stats.counted_value(CountedValue::WiggleVariants), 3);
        assert_eq!(pipeline.stats.counted_value(CountedValue::ModelsTrained), 3);
        assert_eq!(pipeline.stats.counted_value(CountedValue::ModelsAccepted), 1);
    }

    #[test]
    fn test_single_accept_keeps_prior_model_when_nothing_scores() {
        let data = bound_unbound();
        let pipeline = pipeline_with(
            ScriptedSeeds::new(&[("motif", vec![candidate("acgt")])]),
            TableScores::new(&[]),
        );
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![seed_spec("motif", "acgt")])
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();

        assert_eq!(model.ngroups(), 1);
        assert_eq!(pipeline.stats.counted_value(CountedValue::ModelsAccepted), 0);
    }

    #[test]
    fn test_multi_accept_prunes_below_threshold_without_accepting() {
        let data = bound_unbound();
        let pipeline = pipeline_with(
            ScriptedSeeds::new(&[(
                "motif",
                vec![candidate("acgtacgt"), candidate("ttccggaa")],
            )]),
            // both scores sit below -ln(0.05)
            TableScores::new(&[("acgtacgt", 1.0), ("ttccggaa", 2.0)]),
        );
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![search_spec("motif")])
            .accept_multiple(true)
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();

        assert_eq!(model.ngroups(), 1);
        assert_eq!(pipeline.stats.counted_value(CountedValue::ModelsAccepted), 0);
        assert_eq!(
            pipeline.stats.counted_value(CountedValue::PrunedBelowThreshold),
            2
        );
    }

    #[test]
    fn test_multi_accept_takes_candidates_in_score_order() {
        let data = bound_unbound();
        let pipeline = pipeline_with(
            ScriptedSeeds::new(&[(
                "motif",
                vec![candidate("ggggtttt"), candidate("aaaacccc")],
            )]),
            TableScores::new(&[("aaaacccc", 10.0), ("ggggtttt", 5.0)]),
        );
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![search_spec("motif")])
            .accept_multiple(true)
            .relearning(Relearning::None)
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();

        assert_eq!(model.ngroups(), 3);
        assert_eq!(model.group_consensus(1), "aaaacccc");
        assert_eq!(model.group_consensus(2), "ggggtttt");
        assert_eq!(pipeline.stats.counted_value(CountedValue::ModelsAccepted), 2);
    }

    #[test]
    fn test_multi_accept_pruning_is_one_shot() {
        let data = bound_unbound();
        let pipeline = pipeline_with(
            ScriptedSeeds::new(&[(
                "motif",
                vec![candidate("aaaacccc"), candidate("ggggtttt")],
            )]),
            TableScores::new(&[("aaaacccc", 10.0), ("ggggtttt", 1.0)]),
        );
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![search_spec("motif")])
            .accept_multiple(true)
            .relearning(Relearning::None)
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();

        // the pruned candidate never reappears in a later pass
        assert_eq!(model.ngroups(), 2);
        assert_eq!(model.group_consensus(1), "aaaacccc");
        assert_eq!(pipeline.stats.counted_value(CountedValue::ModelsAccepted), 1);
        assert_eq!(
            pipeline.stats.counted_value(CountedValue::PrunedBelowThreshold),
            1
        );
    }

    #[test]
    fn test_multi_accept_pool_always_terminates() {
        let data = bound_unbound();
        let pipeline = pipeline_with(
            ScriptedSeeds::new(&[(
                "motif",
                vec![
                    candidate("aaaacccc"),
                    candidate("ccccgggg"),
                    candidate("ggggtttt"),
                    candidate("ttttaaaa"),
                ],
            )]),
            TableScores::new(&[
                ("aaaacccc", 10.0),
                ("ccccgggg", 9.0),
                ("ggggtttt", 8.0),
                ("ttttaaaa", 7.0),
            ]),
        );
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![search_spec("motif")])
            .accept_multiple(true)
            .relearning(Relearning::None)
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();

        assert_eq!(model.ngroups(), 5);
        assert_eq!(pipeline.stats.counted_value(CountedValue::ModelsAccepted), 4);
    }

    #[test]
    fn test_empty_seed_result_abandons_all_remaining_specifications() {
        let data = bound_unbound();
        let seeds = ScriptedSeeds::new(&[
            ("first", vec![]),
            ("second", vec![candidate("acgtacgt")]),
        ]);
        let seen = seeds.seen.clone();
        let pipeline = pipeline_with(seeds, TableScores::new(&[("acgtacgt", 10.0)]));
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![search_spec("first"), search_spec("second")])
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();

        // the second specification is never searched
        assert_eq!(model.ngroups(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_mask_is_applied_to_the_search_collection() {
        let data = bound_unbound();
        let seeds = ScriptedSeeds::new(&[
            ("m0", vec![candidate("acgt")]),
            ("m1", vec![]),
        ]);
        let seen = seeds.seen.clone();
        let pipeline = pipeline_with(seeds, TableScores::new(&[("acgt", 5.0)]));
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![seed_spec("m0", "acgt"), search_spec("m1")])
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();
        assert_eq!(model.ngroups(), 2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // round one searched the raw data; round two saw the occurrence
        // of the accepted motif blanked out
        assert_eq!(seen[0], b"ttacgttt".to_vec());
        assert_eq!(seen[1], b"ttnnnntt".to_vec());
    }

    #[test]
    fn test_duplicate_specification_names_abort_before_the_loop() {
        let data = bound_unbound();
        let pipeline = pipeline_with(
            ScriptedSeeds::new(&[("motif", vec![candidate("acgt")])]),
            TableScores::new(&[("acgt", 5.0)]),
        );
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![seed_spec("motif", "acgt"), seed_spec("motif", "ttcc")])
            .build()
            .unwrap();

        assert!(discover(&data, &data, &empty_collection(), &pipeline, &options).is_err());
    }

    #[test]
    fn test_seed_specifications_use_the_real_default_seed_step() {
        let data = bound_unbound();
        let pipeline = DiscoveryPipeline {
            seed: Box::new(DefaultSeedStep::new(FinderOptions::default())),
            train: Box::new(SkipTraining),
            score: Box::new(TableScores::new(&[("acgt", 5.0)])),
            stats: Stats::new(),
        };
        let options = DiscoveryOptionsBuilder::default()
            .motif_specs(vec![seed_spec("motif", "acgt")])
            .build()
            .unwrap();

        let model =
            discover(&data, &data, &empty_collection(), &pipeline, &options).unwrap();
        assert_eq!(model.ngroups(), 2);
        assert_eq!(model.group_consensus(1), "acgt");
    }
}
