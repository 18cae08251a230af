use log::{debug, warn};

use crate::collection::{Collection, Sequence};
use crate::hmm::score::Measure;
use crate::hmm::{Model, ALPHABET_SIZE};
use crate::util::{log_add, LogAbuse, VecMath};

/// One training objective: which measure to optimize, over which contrasts,
/// and which parameters it is allowed to touch.
#[derive(Clone, Debug)]
pub struct Task {
    pub name: String,
    pub measure: Measure,
    /// Contrast names this task trains on; empty means all of them.
    pub contrasts: Vec<String>,
    /// Groups whose emissions are re-estimated.
    pub emission_groups: Vec<usize>,
    /// States whose outgoing transitions are re-estimated.
    pub transition_states: Vec<usize>,
}

pub type Tasks = Vec<Task>;

#[derive(Clone, Copy, Debug)]
pub struct TrainOptions {
    pub max_iter: usize,
    /// Relative log-likelihood change below which training stops.
    pub tolerance: f64,
    pub emission_pseudo_count: f64,
    pub transition_pseudo_count: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            max_iter: 100,
            tolerance: 1e-4,
            emission_pseudo_count: 1e-3,
            transition_pseudo_count: 1e-3,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TrainSummary {
    pub iterations: usize,
    pub converged: bool,
    pub log_likelihood: f64,
}

struct ExpectedCounts {
    emissions: Vec<[f64; ALPHABET_SIZE]>,
    transitions: Vec<Vec<f64>>,
}

impl ExpectedCounts {
    fn zero(nstates: usize) -> Self {
        ExpectedCounts {
            emissions: vec![[0.0; ALPHABET_SIZE]; nstates],
            transitions: vec![vec![0.0; nstates]; nstates],
        }
    }
}

impl Model {
    /// The forward dynamic programming table in log space, and the
    /// log-likelihood of the sequence. Row `t` holds position `t + 1`.
    pub fn forward(&self, sequence: &Sequence) -> (Vec<Vec<f64>>, f64) {
        let nstates = self.nstates();
        let length = sequence.length;
        if length == 0 {
            return (vec![], 0.0);
        }

        let mut alpha = vec![vec![-f64::INFINITY; nstates]; length];

        for state in 0..nstates {
            alpha[0][state] = self.transitions[0][state].ln_or_inf()
                + self.emission_ln(state, sequence.digital_bytes[1]);
        }

        for t in 1..length {
            let symbol = sequence.digital_bytes[t + 1];
            for state in 0..nstates {
                let mut sum = -f64::INFINITY;
                for prev in 0..nstates {
                    if self.transitions[prev][state] > 0.0 {
                        sum = log_add(
                            sum,
                            alpha[t - 1][prev] + self.transitions[prev][state].ln_or_inf(),
                        );
                    }
                }
                alpha[t][state] = sum + self.emission_ln(state, symbol);
            }
        }

        let log_likelihood = alpha[length - 1]
            .iter()
            .fold(-f64::INFINITY, |acc, &a| log_add(acc, a));

        (alpha, log_likelihood)
    }

    /// The backward table matching [`Model::forward`].
    pub fn backward(&self, sequence: &Sequence) -> Vec<Vec<f64>> {
        let nstates = self.nstates();
        let length = sequence.length;
        if length == 0 {
            return vec![];
        }

        let mut beta = vec![vec![-f64::INFINITY; nstates]; length];
        beta[length - 1] = vec![0.0; nstates];

        for t in (0..length - 1).rev() {
            let symbol = sequence.digital_bytes[t + 2];
            for state in 0..nstates {
                let mut sum = -f64::INFINITY;
                for next in 0..nstates {
                    if self.transitions[state][next] > 0.0 {
                        sum = log_add(
                            sum,
                            self.transitions[state][next].ln_or_inf()
                                + self.emission_ln(next, symbol)
                                + beta[t + 1][next],
                        );
                    }
                }
                beta[t][state] = sum;
            }
        }

        beta
    }

    /// The most probable state path, one state per position, and its
    /// log probability. Ties resolve to the lowest state index.
    pub fn viterbi(&self, sequence: &Sequence) -> (Vec<usize>, f64) {
        let nstates = self.nstates();
        let length = sequence.length;
        if length == 0 {
            return (vec![], 0.0);
        }

        let mut scores = vec![vec![-f64::INFINITY; nstates]; length];
        let mut pointers = vec![vec![0usize; nstates]; length];

        for state in 0..nstates {
            scores[0][state] = self.transitions[0][state].ln_or_inf()
                + self.emission_ln(state, sequence.digital_bytes[1]);
        }

        for t in 1..length {
            let symbol = sequence.digital_bytes[t + 1];
            for state in 0..nstates {
                let mut best = -f64::INFINITY;
                let mut best_prev = 0;
                for prev in 0..nstates {
                    if self.transitions[prev][state] > 0.0 {
                        let score =
                            scores[t - 1][prev] + self.transitions[prev][state].ln_or_inf();
                        if score > best {
                            best = score;
                            best_prev = prev;
                        }
                    }
                }
                scores[t][state] = best + self.emission_ln(state, symbol);
                pointers[t][state] = best_prev;
            }
        }

        let (mut state, best_score) = scores[length - 1]
            .iter()
            .enumerate()
            .fold((0, -f64::INFINITY), |(arg, max), (idx, &score)| {
                if score > max {
                    (idx, score)
                } else {
                    (arg, max)
                }
            });

        let mut path = vec![0usize; length];
        for t in (0..length).rev() {
            path[t] = state;
            if t > 0 {
                state = pointers[t][state];
            }
        }

        (path, best_score)
    }

    /// Baum-Welch re-estimation of the parameters each task targets, over
    /// the contrasts each task names. On non-convergence the (possibly
    /// undertrained) parameters are kept and a diagnostic is logged.
    pub fn train(
        &mut self,
        data: &Collection,
        tasks: &Tasks,
        options: &TrainOptions,
    ) -> TrainSummary {
        if tasks.is_empty() {
            return TrainSummary {
                iterations: 0,
                converged: true,
                log_likelihood: self.total_log_likelihood(data, &[]),
            };
        }

        let mut previous = f64::NAN;
        let mut log_likelihood = f64::NAN;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..options.max_iter {
            iterations = iteration + 1;

            for task in tasks {
                let counts = self.expected_counts(data, &task.contrasts);
                self.apply_counts(task, &counts, options);
            }

            log_likelihood = self.total_log_likelihood(data, &[]);
            debug!(
                "training iteration {iterations}: log likelihood = {:.6}",
                log_likelihood
            );

            if !previous.is_nan() {
                let change = (log_likelihood - previous).abs();
                if change <= options.tolerance * log_likelihood.abs() {
                    converged = true;
                    break;
                }
            }
            previous = log_likelihood;
        }

        if !converged {
            warn!(
                "training did not converge after {iterations} iterations; \
                 keeping current parameters"
            );
        }

        TrainSummary {
            iterations,
            converged,
            log_likelihood,
        }
    }

    /// Summed sequence log-likelihood over the named contrasts
    /// (all contrasts when `contrasts` is empty).
    pub fn total_log_likelihood(&self, data: &Collection, contrasts: &[String]) -> f64 {
        data.contrasts
            .iter()
            .filter(|c| contrasts.is_empty() || contrasts.contains(&c.name))
            .flat_map(|c| &c.sets)
            .flat_map(|s| &s.sequences)
            .map(|sequence| self.forward(sequence).1)
            .sum()
    }

    fn expected_counts(&self, data: &Collection, contrasts: &[String]) -> ExpectedCounts {
        let nstates = self.nstates();
        let mut counts = ExpectedCounts::zero(nstates);

        let sequences = data
            .contrasts
            .iter()
            .filter(|c| contrasts.is_empty() || contrasts.contains(&c.name))
            .flat_map(|c| &c.sets)
            .flat_map(|s| &s.sequences);

        for sequence in sequences {
            let length = sequence.length;
            if length == 0 {
                continue;
            }

            let (alpha, log_likelihood) = self.forward(sequence);
            if log_likelihood == -f64::INFINITY {
                continue;
            }
            let beta = self.backward(sequence);

            for t in 0..length {
                let symbol = sequence.digital_bytes[t + 1];
                if (symbol as usize) < ALPHABET_SIZE {
                    for state in 0..nstates {
                        let posterior = (alpha[t][state] + beta[t][state] - log_likelihood).exp();
                        counts.emissions[state][symbol as usize] += posterior;
                    }
                }

                if t + 1 < length {
                    let next_symbol = sequence.digital_bytes[t + 2];
                    for from in 0..nstates {
                        for to in 0..nstates {
                            if self.transitions[from][to] > 0.0 {
                                let expected = (alpha[t][from]
                                    + self.transitions[from][to].ln_or_inf()
                                    + self.emission_ln(to, next_symbol)
                                    + beta[t + 1][to]
                                    - log_likelihood)
                                    .exp();
                                counts.transitions[from][to] += expected;
                            }
                        }
                    }
                }
            }
        }

        counts
    }

    /// The maximization step, restricted to the task's targets. Transition
    /// re-estimation preserves the structural zeros of each row.
    fn apply_counts(&mut self, task: &Task, counts: &ExpectedCounts, options: &TrainOptions) {
        for &group_idx in &task.emission_groups {
            let states = match self.groups.get(group_idx) {
                Some(group) => group.states.clone(),
                None => continue,
            };
            for state in states {
                let mut row: Vec<f64> = counts.emissions[state]
                    .iter()
                    .map(|&c| c + options.emission_pseudo_count)
                    .collect();
                row.normalize();
                for (idx, p) in row.iter().enumerate() {
                    self.emissions[state][idx] = *p;
                }
            }
        }

        for &state in &task.transition_states {
            if state >= self.nstates() {
                continue;
            }
            let support: Vec<usize> = (0..self.nstates())
                .filter(|&to| self.transitions[state][to] > 0.0)
                .collect();
            if support.len() < 2 {
                continue;
            }

            let mut row: Vec<f64> = support
                .iter()
                .map(|&to| counts.transitions[state][to] + options.transition_pseudo_count)
                .collect();
            row.normalize();
            for (&to, &p) in support.iter().zip(&row) {
                self.transitions[state][to] = p;
            }
        }

        // keep the recorded entry probabilities in sync with the
        // re-estimated background row
        if task.transition_states.contains(&0) {
            for group in &mut self.groups[1..] {
                group.entry = self.transitions[0][group.states[0]];
            }
        }
    }
}
