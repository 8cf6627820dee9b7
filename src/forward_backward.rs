//! Scaled forward-backward smoothing for time-inhomogeneous hidden Markov
//! models.
//!
//! The engine consumes one time step at a time: the caller submits the
//! candidate states together with already-evaluated emission and transition
//! probability tables (linear space), and the engine maintains a normalized
//! forward vector plus the per-step scaling divisor. Smoothing probabilities
//! p(s_t | o_1..o_T) are computed on demand by an on-the-fly backward pass
//! over the recorded steps, and the product of scaling divisors yields the
//! evidence p(o_1..o_T) without ever forming it in linear space.
//!
//! Dividing each backward vector by the *next* step's scaling divisor
//! cancels the forward scaling exactly, so `forward_t * backward_t` is a
//! normalized posterior with no final renormalization pass.
//!
//! Candidates are always visited in the order of the caller's slice; the
//! hash tables are only ever used for lookups, never iterated. This makes
//! results bit-identical across runs for identical inputs.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::error::{HmmError, Result};
use crate::transition::Transition;
use crate::utils::{probability_in_range, sums_to_one, DELTA};

/// Everything recorded about one time step.
///
/// The emission and transition tables are absent exactly for step 0, which
/// has no incoming transition. The backward pass only reads the tables of
/// steps t >= 1.
struct Step<S> {
    candidates: Vec<S>,
    emission_probabilities: Option<HashMap<S, f64>>,
    transition_probabilities: Option<HashMap<Transition<S>, f64>>,
    forward_probabilities: HashMap<S, f64>,
    /// Sum of the unnormalized forward vector, recorded before normalizing.
    scaling_divisor: f64,
}

/// Streaming forward-backward engine.
///
/// One instance per observation sequence: initialize once with either
/// [`start_with_initial_state_probabilities`](Self::start_with_initial_state_probabilities)
/// or [`start_with_initial_observation`](Self::start_with_initial_observation),
/// then feed steps with [`next_step`](Self::next_step). All probabilities
/// are linear (not log) space.
///
/// ```
/// use std::collections::HashMap;
/// use trellis::{ForwardBackwardAlgorithm, Transition};
///
/// let states = ["rain", "sun"];
/// let initial = HashMap::from([("rain", 0.5), ("sun", 0.5)]);
/// let umbrella = HashMap::from([("rain", 0.9), ("sun", 0.2)]);
/// let transitions = HashMap::from([
///     (Transition::new("rain", "rain"), 0.7),
///     (Transition::new("rain", "sun"), 0.3),
///     (Transition::new("sun", "rain"), 0.3),
///     (Transition::new("sun", "sun"), 0.7),
/// ]);
///
/// let mut engine = ForwardBackwardAlgorithm::new();
/// engine.start_with_initial_state_probabilities(&states, &initial)?;
/// engine.next_step("umbrella", &states, &umbrella, &transitions)?;
///
/// let smoothing = engine.compute_smoothing_probabilities()?;
/// assert_eq!(smoothing.len(), 2);
/// # Ok::<(), trellis::HmmError>(())
/// ```
pub struct ForwardBackwardAlgorithm<S, O> {
    /// `None` until one of the `start_with_*` methods succeeds.
    steps: Option<Vec<Step<S>>>,
    _observation: PhantomData<O>,
}

impl<S, O> Default for ForwardBackwardAlgorithm<S, O> {
    fn default() -> Self {
        Self {
            steps: None,
            _observation: PhantomData,
        }
    }
}

impl<S, O> ForwardBackwardAlgorithm<S, O>
where
    S: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the computation from explicit initial state probabilities.
    ///
    /// # Errors
    ///
    /// [`HmmError::AlreadyStarted`] if the engine was already initialized,
    /// [`HmmError::MissingProbability`] if a candidate has no entry in
    /// `initial_probabilities`, and [`HmmError::InvalidProbabilities`] if
    /// the candidate probabilities do not sum to 1 within `1e-8`.
    pub fn start_with_initial_state_probabilities(
        &mut self,
        initial_states: &[S],
        initial_probabilities: &HashMap<S, f64>,
    ) -> Result<()> {
        if self.steps.is_some() {
            return Err(HmmError::AlreadyStarted);
        }
        let mut projected = Vec::with_capacity(initial_states.len());
        for candidate in initial_states {
            projected.push(lookup(initial_probabilities, candidate)?);
        }
        if !sums_to_one(projected.iter().copied(), DELTA) {
            return Err(HmmError::InvalidProbabilities {
                sum: projected.iter().sum(),
            });
        }
        self.initialize_state_probabilities(initial_states, initial_probabilities)
    }

    /// Starts the computation from the emission probabilities of the first
    /// observation.
    ///
    /// The emission vector is treated as unnormalized: it is scaled to sum
    /// to 1 and the raw sum is recorded as the step-0 scaling divisor. No
    /// sum-to-one check applies here, unlike
    /// [`start_with_initial_state_probabilities`](Self::start_with_initial_state_probabilities).
    ///
    /// # Errors
    ///
    /// [`HmmError::AlreadyStarted`] if the engine was already initialized,
    /// [`HmmError::MissingProbability`] if a candidate has no emission entry.
    pub fn start_with_initial_observation(
        &mut self,
        observation: O,
        candidates: &[S],
        emission_probabilities: &HashMap<S, f64>,
    ) -> Result<()> {
        if self.steps.is_some() {
            return Err(HmmError::AlreadyStarted);
        }
        // The observation itself does not enter the recurrence; only its
        // emission table does.
        let _ = observation;
        self.initialize_state_probabilities(candidates, emission_probabilities)
    }

    /// Processes the next time step.
    ///
    /// Candidate lists and probability tables are snapshotted, so the caller
    /// may freely reuse or mutate them afterwards. A transition absent from
    /// `transition_probabilities` has probability zero.
    ///
    /// If every candidate ends up with probability zero the scaling divisor
    /// for the step is zero and the normalized forward vector degenerates to
    /// NaN; subsequent results are then meaningless. Callers that can run
    /// into this should switch to the Viterbi engine's break handling or
    /// validate their models beforehand.
    ///
    /// # Errors
    ///
    /// [`HmmError::NotStarted`] before initialization, and
    /// [`HmmError::MissingProbability`] if a candidate has no emission
    /// entry. A failed call does not modify the engine.
    pub fn next_step(
        &mut self,
        observation: O,
        candidates: &[S],
        emission_probabilities: &HashMap<S, f64>,
        transition_probabilities: &HashMap<Transition<S>, f64>,
    ) -> Result<()> {
        let steps = self.steps.as_mut().ok_or(HmmError::NotStarted)?;
        let _ = observation;

        #[cfg(feature = "tracing")]
        let span = tracing::trace_span!("forward_step", step = steps.len(), candidates = candidates.len());
        #[cfg(feature = "tracing")]
        let _enter = span.enter();

        let (forward, sum) = {
            let prev = steps.last().expect("a started engine records step 0");
            let mut forward = HashMap::with_capacity(candidates.len());
            let mut sum = 0.0;
            for cur_state in candidates {
                let emission = lookup(emission_probabilities, cur_state)?;
                let mut probability = 0.0;
                for prev_state in &prev.candidates {
                    probability += prev.forward_probabilities[prev_state]
                        * transition_probability(
                            transition_probabilities,
                            prev_state,
                            cur_state,
                        );
                }
                let probability = probability * emission;
                forward.insert(cur_state.clone(), probability);
                sum += probability;
            }
            (forward, sum)
        };

        let mut forward = forward;
        for value in forward.values_mut() {
            *value /= sum;
        }
        steps.push(Step {
            candidates: candidates.to_vec(),
            emission_probabilities: Some(emission_probabilities.clone()),
            transition_probabilities: Some(transition_probabilities.clone()),
            forward_probabilities: forward,
            scaling_divisor: sum,
        });
        Ok(())
    }

    /// Number of time steps recorded so far, including the initial one.
    pub fn num_steps(&self) -> usize {
        self.steps.as_ref().map_or(0, Vec::len)
    }

    /// p(candidate | o_1..o_t) for the zero-based time step `t`.
    ///
    /// # Errors
    ///
    /// [`HmmError::NotStarted`] before initialization,
    /// [`HmmError::IndexOutOfRange`] for `t >= num_steps()`, and
    /// [`HmmError::MissingProbability`] if `candidate` was not part of step
    /// `t`.
    pub fn forward_probability(&self, t: usize, candidate: &S) -> Result<f64> {
        let steps = self.steps.as_ref().ok_or(HmmError::NotStarted)?;
        let step = steps.get(t).ok_or(HmmError::IndexOutOfRange {
            index: t,
            len: steps.len(),
        })?;
        lookup(&step.forward_probabilities, candidate)
    }

    /// p(candidate | o_1..o_t) for the most recent time step.
    ///
    /// # Errors
    ///
    /// As for [`forward_probability`](Self::forward_probability).
    pub fn current_forward_probability(&self, candidate: &S) -> Result<f64> {
        let steps = self.steps.as_ref().ok_or(HmmError::NotStarted)?;
        self.forward_probability(steps.len() - 1, candidate)
    }

    /// log p(o_1..o_T), the log probability of the entire observation
    /// sequence: the sum of the logs of all scaling divisors. Returned in
    /// log space to avoid underflow.
    ///
    /// # Errors
    ///
    /// [`HmmError::NotStarted`] before initialization.
    pub fn observation_log_probability(&self) -> Result<f64> {
        let steps = self.steps.as_ref().ok_or(HmmError::NotStarted)?;
        Ok(steps.iter().map(|step| step.scaling_divisor.ln()).sum())
    }

    /// Smoothing probabilities p(s_t | o_1..o_T) for every recorded step,
    /// in chronological order. Each inner vector lists `(state, posterior)`
    /// pairs in the candidate order of that step.
    ///
    /// Runs a full backward pass over the recorded steps; cost is
    /// O(T * n^2) per call.
    ///
    /// # Errors
    ///
    /// [`HmmError::NotStarted`] before initialization.
    pub fn compute_smoothing_probabilities(&self) -> Result<Vec<Vec<(S, f64)>>> {
        let steps = self.steps.as_ref().ok_or(HmmError::NotStarted)?;

        #[cfg(feature = "tracing")]
        let span = tracing::trace_span!("backward_pass", steps = steps.len());
        #[cfg(feature = "tracing")]
        let _enter = span.enter();

        let mut result = Vec::with_capacity(steps.len());
        let mut iter = steps.iter().rev();
        let mut step = iter.next().expect("a started engine records step 0");

        // At the final step every backward probability is 1.
        let mut backward: HashMap<S, f64> = step
            .candidates
            .iter()
            .map(|candidate| (candidate.clone(), 1.0))
            .collect();
        result.push(smoothing_vector(step, &backward));

        for prev_step in iter {
            let next_step = step;
            step = prev_step;
            let mut prev_backward = HashMap::with_capacity(step.candidates.len());
            for candidate in &step.candidates {
                // Dividing by the next step's scaling divisor keeps
                // forward * backward normalized without a final pass.
                let probability =
                    unscaled_backward_probability(candidate, &backward, next_step)
                        / next_step.scaling_divisor;
                prev_backward.insert(candidate.clone(), probability);
            }
            backward = prev_backward;
            result.push(smoothing_vector(step, &backward));
        }

        result.reverse();
        Ok(result)
    }
}

/// forward_t * backward_t over the step's candidates, in candidate order.
fn smoothing_vector<S>(step: &Step<S>, backward: &HashMap<S, f64>) -> Vec<(S, f64)>
where
    S: Clone + Eq + Hash,
{
    let mut vector = Vec::with_capacity(step.candidates.len());
    for state in &step.candidates {
        let probability = step.forward_probabilities[state] * backward[state];
        debug_assert!(probability_in_range(probability, DELTA));
        vector.push((state.clone(), probability));
    }
    debug_assert!(sums_to_one(vector.iter().map(|(_, p)| *p), DELTA));
    vector
}

/// Backward probability of `candidate` before scaling cancellation.
fn unscaled_backward_probability<S>(
    candidate: &S,
    next_backward: &HashMap<S, f64>,
    next_step: &Step<S>,
) -> f64
where
    S: Clone + Eq + Hash,
{
    let emissions = next_step
        .emission_probabilities
        .as_ref()
        .expect("steps after the first carry emission tables");
    let transitions = next_step
        .transition_probabilities
        .as_ref()
        .expect("steps after the first carry transition tables");
    let mut probability = 0.0;
    for next_candidate in &next_step.candidates {
        probability += emissions[next_candidate]
            * next_backward[next_candidate]
            * transition_probability(transitions, candidate, next_candidate);
    }
    probability
}

/// Zero for transitions absent from the table.
fn transition_probability<S>(
    transition_probabilities: &HashMap<Transition<S>, f64>,
    prev_state: &S,
    cur_state: &S,
) -> f64
where
    S: Clone + Eq + Hash,
{
    transition_probabilities
        .get(&Transition::new(prev_state.clone(), cur_state.clone()))
        .copied()
        .unwrap_or(0.0)
}

fn lookup<S>(probabilities: &HashMap<S, f64>, candidate: &S) -> Result<f64>
where
    S: Eq + Hash + fmt::Debug,
{
    probabilities
        .get(candidate)
        .copied()
        .ok_or_else(|| HmmError::MissingProbability {
            state: format!("{candidate:?}"),
        })
}

impl<S, O> ForwardBackwardAlgorithm<S, O>
where
    S: Clone + Eq + Hash + fmt::Debug,
{
    /// Shared tail of both `start_with_*` entry points: scale the supplied
    /// vector to sum 1 and record the raw sum as the step-0 divisor.
    fn initialize_state_probabilities(
        &mut self,
        candidates: &[S],
        initial_probabilities: &HashMap<S, f64>,
    ) -> Result<()> {
        let mut forward = HashMap::with_capacity(candidates.len());
        let mut sum = 0.0;
        for candidate in candidates {
            let probability = lookup(initial_probabilities, candidate)?;
            forward.insert(candidate.clone(), probability);
            sum += probability;
        }
        for value in forward.values_mut() {
            *value /= sum;
        }
        self.steps = Some(vec![Step {
            candidates: candidates.to_vec(),
            emission_probabilities: None,
            transition_probabilities: None,
            forward_probabilities: forward,
            scaling_divisor: sum,
        }]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_state_engine() -> ForwardBackwardAlgorithm<&'static str, u8> {
        let mut engine = ForwardBackwardAlgorithm::new();
        let initial = HashMap::from([("a", 0.5), ("b", 0.5)]);
        engine
            .start_with_initial_state_probabilities(&["a", "b"], &initial)
            .unwrap();
        engine
    }

    #[test]
    fn initial_step_is_recorded_with_unit_divisor() {
        let engine = two_state_engine();
        assert_eq!(engine.num_steps(), 1);
        assert_eq!(engine.forward_probability(0, &"a").unwrap(), 0.5);
        assert_eq!(engine.observation_log_probability().unwrap(), 0.0);
    }

    #[test]
    fn observation_seeded_start_normalizes_by_raw_sum() {
        let mut engine: ForwardBackwardAlgorithm<&str, u8> = ForwardBackwardAlgorithm::new();
        let emissions = HashMap::from([("a", 0.4), ("b", 0.1)]);
        engine
            .start_with_initial_observation(7, &["a", "b"], &emissions)
            .unwrap();
        assert!((engine.forward_probability(0, &"a").unwrap() - 0.8).abs() < 1e-12);
        assert!((engine.observation_log_probability().unwrap() - (0.5f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn rejects_unnormalized_initial_state_probabilities() {
        let mut engine: ForwardBackwardAlgorithm<&str, u8> = ForwardBackwardAlgorithm::new();
        let initial = HashMap::from([("a", 0.6), ("b", 0.6)]);
        let err = engine
            .start_with_initial_state_probabilities(&["a", "b"], &initial)
            .unwrap_err();
        assert!(matches!(err, HmmError::InvalidProbabilities { .. }));
        // The failed call must not have started the engine.
        assert_eq!(engine.num_steps(), 0);
    }

    #[test]
    fn second_initialization_is_rejected() {
        let mut engine = two_state_engine();
        let initial = HashMap::from([("a", 1.0), ("b", 0.0)]);
        let err = engine
            .start_with_initial_state_probabilities(&["a", "b"], &initial)
            .unwrap_err();
        assert_eq!(err, HmmError::AlreadyStarted);
    }

    #[test]
    fn missing_emission_entry_is_an_error_and_mutates_nothing() {
        let mut engine = two_state_engine();
        let emissions = HashMap::from([("a", 0.9)]);
        let transitions = HashMap::new();
        let err = engine
            .next_step(1, &["a", "b"], &emissions, &transitions)
            .unwrap_err();
        assert!(matches!(err, HmmError::MissingProbability { .. }));
        assert_eq!(engine.num_steps(), 1);
    }

    #[test]
    fn missing_transitions_mean_zero_probability() {
        let mut engine = two_state_engine();
        let emissions = HashMap::from([("a", 0.5), ("b", 0.5)]);
        // Only a -> a is possible; b ends up with forward probability 0.
        let transitions = HashMap::from([(Transition::new("a", "a"), 1.0)]);
        engine
            .next_step(1, &["a", "b"], &emissions, &transitions)
            .unwrap();
        assert_eq!(engine.current_forward_probability(&"b").unwrap(), 0.0);
        assert_eq!(engine.current_forward_probability(&"a").unwrap(), 1.0);
    }

    #[test]
    fn queries_before_start_fail() {
        let engine: ForwardBackwardAlgorithm<&str, u8> = ForwardBackwardAlgorithm::new();
        assert_eq!(
            engine.forward_probability(0, &"a").unwrap_err(),
            HmmError::NotStarted
        );
        assert_eq!(
            engine.observation_log_probability().unwrap_err(),
            HmmError::NotStarted
        );
        assert_eq!(
            engine.compute_smoothing_probabilities().unwrap_err(),
            HmmError::NotStarted
        );
    }

    #[test]
    fn forward_probability_index_is_bounds_checked() {
        let engine = two_state_engine();
        let err = engine.forward_probability(3, &"a").unwrap_err();
        assert_eq!(err, HmmError::IndexOutOfRange { index: 3, len: 1 });
    }
}
