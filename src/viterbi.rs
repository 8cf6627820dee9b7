//! Streaming Viterbi decoding for time-inhomogeneous hidden Markov models.
//!
//! The caller drives the engine one observation at a time, supplying the
//! candidate states of the step together with already-evaluated emission and
//! transition log-probability tables. The engine maintains the forward
//! message (per-state log probability of the best path so far) and a chain
//! of back pointers from which the most likely sequence is recovered.
//!
//! Log space keeps long products of small probabilities away from underflow;
//! a transition absent from the table contributes negative infinity.
//!
//! Back pointers are reference-counted nodes linked from the current step
//! backwards. Whenever the per-step node map is replaced, every node that is
//! no longer on a surviving chain drops to refcount zero and is freed, so
//! memory stays O(t) when the lattice collapses to a shared prefix, which it
//! does in practice for long observation sequences. The chain is acyclic by
//! construction (links only point to the previous step), so plain `Rc` is
//! sufficient.
//!
//! If at some step every candidate ends up at negative infinity the HMM has
//! *broken*: no path explains the observations. The engine latches the break,
//! keeps the state of the last sound step, and
//! [`compute_most_likely_sequence`](ViterbiAlgorithm::compute_most_likely_sequence)
//! returns the best sequence up to that step.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use crate::error::{HmmError, Result};
use crate::forward_backward::ForwardBackwardAlgorithm;
use crate::options::ViterbiOptions;
use crate::transition::{SequenceState, Transition};
use crate::utils::log_to_linear;

/// One node of the back-pointer chain.
struct ExtendedState<S, O, D> {
    state: S,
    /// `None` only for step-0 nodes of a sequence started from initial
    /// state probabilities.
    back_pointer: Option<Rc<ExtendedState<S, O, D>>>,
    observation: Option<O>,
    transition_descriptor: Option<D>,
}

/// New message and node map produced by one forward step, committed only
/// after the break check.
struct ForwardStepResult<S, O, D> {
    message: HashMap<S, f64>,
    back_pointers: HashMap<S, Rc<ExtendedState<S, O, D>>>,
}

/// Streaming Viterbi engine.
///
/// One instance per observation sequence: initialize once, feed steps, then
/// retrieve. All probabilities are **log** probabilities. The descriptor
/// type `D` defaults to `()` for callers that do not attach transition
/// descriptors.
///
/// ```
/// use std::collections::HashMap;
/// use trellis::{Transition, ViterbiAlgorithm};
///
/// let candidates = ["walk", "drive"];
/// let emissions = HashMap::from([("walk", (0.7f64).ln()), ("drive", (0.3f64).ln())]);
/// let transitions = HashMap::from([
///     (Transition::new("walk", "walk"), (0.9f64).ln()),
///     (Transition::new("walk", "drive"), (0.1f64).ln()),
///     (Transition::new("drive", "walk"), (0.2f64).ln()),
///     (Transition::new("drive", "drive"), (0.8f64).ln()),
/// ]);
///
/// let mut viterbi: ViterbiAlgorithm<&str, u32> = ViterbiAlgorithm::new();
/// viterbi.start_with_initial_observation(0, &candidates, &emissions)?;
/// viterbi.next_step(1, &candidates, &emissions, &transitions)?;
///
/// let sequence = viterbi.compute_most_likely_sequence();
/// assert_eq!(sequence.len(), 2);
/// assert_eq!(sequence[1].state, "walk");
/// # Ok::<(), trellis::HmmError>(())
/// ```
pub struct ViterbiAlgorithm<S, O, D = ()> {
    /// Node map of the last committed step, keyed by candidate.
    last_extended_states: HashMap<S, Rc<ExtendedState<S, O, D>>>,
    /// Candidate order of the last committed step; the ordering authority
    /// for `message` and for tie-breaking.
    prev_candidates: Vec<S>,
    /// Forward message of the last committed step. `None` before start and
    /// when step 0 itself broke.
    message: Option<HashMap<S, f64>>,
    started: bool,
    is_broken: bool,
    message_history: Option<Vec<Vec<(S, f64)>>>,
    /// Parallel smoothing engine, fed with exp-converted tables.
    smoothing: Option<ForwardBackwardAlgorithm<S, O>>,
}

impl<S, O, D> Default for ViterbiAlgorithm<S, O, D> {
    fn default() -> Self {
        Self::with_options(ViterbiOptions::default())
    }
}

impl<S, O, D> ViterbiAlgorithm<S, O, D> {
    /// Engine with default options (no message history, no smoothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with explicit [`ViterbiOptions`].
    pub fn with_options(options: ViterbiOptions) -> Self {
        Self {
            last_extended_states: HashMap::new(),
            prev_candidates: Vec::new(),
            message: None,
            started: false,
            is_broken: false,
            message_history: options.keeps_message_history().then(Vec::new),
            smoothing: options
                .computes_smoothing_probabilities()
                .then(ForwardBackwardAlgorithm::default),
        }
    }

    /// Whether an HMM break has latched. Once true, `next_step` is rejected
    /// and retrieval yields the sequence up to the last sound step.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Per-step message snapshots in chronological order, each in candidate
    /// order. `None` unless
    /// [`keep_message_history`](ViterbiOptions::keep_message_history) was
    /// set.
    pub fn message_history(&self) -> Option<&[Vec<(S, f64)>]> {
        self.message_history.as_deref()
    }
}

impl<S, O, D> ViterbiAlgorithm<S, O, D>
where
    S: Clone + Eq + Hash + fmt::Debug,
    O: Clone,
    D: Clone,
{
    /// Starts the computation with explicit initial state log probabilities.
    ///
    /// `initial_states` fixes the iteration order for tie-breaking and all
    /// derived output; the table is only used for lookups.
    ///
    /// # Errors
    ///
    /// [`HmmError::AlreadyStarted`] on a second initialization and
    /// [`HmmError::MissingProbability`] if a candidate has no table entry.
    /// With smoothing enabled, [`HmmError::InvalidProbabilities`] if the
    /// exp-converted probabilities do not sum to 1 (the parallel
    /// forward-backward engine requires a distribution from this entry
    /// point).
    pub fn start_with_initial_state_probabilities(
        &mut self,
        initial_states: &[S],
        initial_log_probabilities: &HashMap<S, f64>,
    ) -> Result<()> {
        self.initialize_state_probabilities(None, initial_states, initial_log_probabilities)
    }

    /// Starts the computation at the first observation, using its emission
    /// log probabilities as the initial message.
    ///
    /// # Errors
    ///
    /// [`HmmError::AlreadyStarted`] on a second initialization and
    /// [`HmmError::MissingProbability`] if a candidate has no emission
    /// entry.
    pub fn start_with_initial_observation(
        &mut self,
        observation: O,
        candidates: &[S],
        emission_log_probabilities: &HashMap<S, f64>,
    ) -> Result<()> {
        self.initialize_state_probabilities(
            Some(observation),
            candidates,
            emission_log_probabilities,
        )
    }

    /// Processes the next time step without transition descriptors.
    ///
    /// # Errors
    ///
    /// See [`next_step_with_descriptors`](Self::next_step_with_descriptors).
    pub fn next_step(
        &mut self,
        observation: O,
        candidates: &[S],
        emission_log_probabilities: &HashMap<S, f64>,
        transition_log_probabilities: &HashMap<Transition<S>, f64>,
    ) -> Result<()> {
        self.next_step_with_descriptors(
            observation,
            candidates,
            emission_log_probabilities,
            transition_log_probabilities,
            &HashMap::new(),
        )
    }

    /// Processes the next time step.
    ///
    /// For each candidate the best predecessor is the first one in the
    /// previous step's candidate order that attains the maximum of
    /// `message[prev] + transition_log_probability(prev, cur)` (strict `>`
    /// comparison, so earlier candidates win ties). A transition absent
    /// from the table has log probability negative infinity. When a
    /// descriptor is supplied for the winning transition it is attached to
    /// the back pointer and surfaces in the retrieved sequence.
    ///
    /// Inputs are snapshotted; later caller mutation has no effect on the
    /// run.
    ///
    /// If every candidate ends at negative infinity the break latches, the
    /// previous step's state is kept, and `Ok(())` is returned: a break is
    /// an expected outcome, not an error.
    ///
    /// # Errors
    ///
    /// [`HmmError::NotStarted`] before initialization,
    /// [`HmmError::EngineBroken`] after a latched break, and
    /// [`HmmError::MissingProbability`] if a candidate has no emission
    /// entry. A failed call does not modify the engine.
    pub fn next_step_with_descriptors(
        &mut self,
        observation: O,
        candidates: &[S],
        emission_log_probabilities: &HashMap<S, f64>,
        transition_log_probabilities: &HashMap<Transition<S>, f64>,
        transition_descriptors: &HashMap<Transition<S>, D>,
    ) -> Result<()> {
        if !self.started {
            return Err(HmmError::NotStarted);
        }
        if self.is_broken {
            return Err(HmmError::EngineBroken);
        }

        #[cfg(feature = "tracing")]
        let span = tracing::trace_span!("viterbi_step", candidates = candidates.len());
        #[cfg(feature = "tracing")]
        let _enter = span.enter();

        let message = self
            .message
            .as_ref()
            .expect("a running engine has a message");
        let result = forward_step(
            &observation,
            &self.prev_candidates,
            candidates,
            message,
            emission_log_probabilities,
            transition_log_probabilities,
            transition_descriptors,
            &self.last_extended_states,
        )?;

        if hmm_break(&result.message) {
            #[cfg(feature = "tracing")]
            tracing::debug!("hmm break: every candidate has zero probability");
            self.is_broken = true;
            return Ok(());
        }

        if let Some(forward_backward) = self.smoothing.as_mut() {
            forward_backward.next_step(
                observation,
                candidates,
                &log_to_linear(emission_log_probabilities),
                &log_to_linear(transition_log_probabilities),
            )?;
        }
        if let Some(history) = self.message_history.as_mut() {
            history.push(ordered_snapshot(candidates, &result.message));
        }
        self.message = Some(result.message);
        self.last_extended_states = result.back_pointers;
        self.prev_candidates = candidates.to_vec();
        Ok(())
    }

    /// The most likely sequence of states for all committed time steps:
    /// argmax p(s_1, ..., s_T | o_1, ..., o_T).
    ///
    /// Always callable. Before initialization, or when step 0 itself broke,
    /// the sequence is empty; after a later break it covers the steps up to
    /// the break. Ties on the final state resolve to the earliest candidate
    /// in the last step's order.
    pub fn compute_most_likely_sequence(&self) -> Vec<SequenceState<S, O, D>> {
        let Some(message) = self.message.as_ref() else {
            return Vec::new();
        };
        let last_state = most_likely_state(&self.prev_candidates, message);

        let mut sequence = Vec::new();
        let mut current = self.last_extended_states.get(last_state).cloned();
        while let Some(extended) = current {
            sequence.push(SequenceState {
                state: extended.state.clone(),
                observation: extended.observation.clone(),
                transition_descriptor: extended.transition_descriptor.clone(),
                smoothing_probability: None,
            });
            current = extended.back_pointer.clone();
        }
        sequence.reverse();

        if let Some(forward_backward) = self.smoothing.as_ref() {
            let smoothing = forward_backward
                .compute_smoothing_probabilities()
                .expect("the smoothing engine starts whenever a step commits");
            for (entry, step_vector) in sequence.iter_mut().zip(smoothing) {
                entry.smoothing_probability = step_vector
                    .iter()
                    .find(|(state, _)| state == &entry.state)
                    .map(|(_, probability)| *probability);
            }
        }
        sequence
    }

    /// Winning predecessor of each reachable candidate at the current step.
    /// Debug accessor; empty before the first transition step.
    pub fn back_pointers(&self) -> HashMap<S, S> {
        self.last_extended_states
            .iter()
            .filter_map(|(state, extended)| {
                extended
                    .back_pointer
                    .as_ref()
                    .map(|previous| (state.clone(), previous.state.clone()))
            })
            .collect()
    }

    /// Shared initialization: message from the supplied table, one chain
    /// root per candidate.
    fn initialize_state_probabilities(
        &mut self,
        observation: Option<O>,
        candidates: &[S],
        initial_log_probabilities: &HashMap<S, f64>,
    ) -> Result<()> {
        if self.started {
            return Err(HmmError::AlreadyStarted);
        }

        let mut initial_message = HashMap::with_capacity(candidates.len());
        for candidate in candidates {
            let log_probability = initial_log_probabilities.get(candidate).copied().ok_or_else(
                || HmmError::MissingProbability {
                    state: format!("{candidate:?}"),
                },
            )?;
            initial_message.insert(candidate.clone(), log_probability);
        }

        if hmm_break(&initial_message) {
            #[cfg(feature = "tracing")]
            tracing::debug!("hmm break at initialization");
            self.started = true;
            self.is_broken = true;
            return Ok(());
        }

        if let Some(forward_backward) = self.smoothing.as_mut() {
            let linear = log_to_linear(initial_log_probabilities);
            match observation.as_ref() {
                None => forward_backward
                    .start_with_initial_state_probabilities(candidates, &linear)?,
                Some(observation) => forward_backward.start_with_initial_observation(
                    observation.clone(),
                    candidates,
                    &linear,
                )?,
            }
        }

        self.started = true;
        if let Some(history) = self.message_history.as_mut() {
            history.push(ordered_snapshot(candidates, &initial_message));
        }
        self.message = Some(initial_message);

        self.last_extended_states = candidates
            .iter()
            .map(|candidate| {
                (
                    candidate.clone(),
                    Rc::new(ExtendedState {
                        state: candidate.clone(),
                        back_pointer: None,
                        observation: observation.clone(),
                        transition_descriptor: None,
                    }),
                )
            })
            .collect();
        self.prev_candidates = candidates.to_vec();
        Ok(())
    }
}

/// Computes the new forward message and the back pointers of one step.
#[allow(clippy::too_many_arguments)]
fn forward_step<S, O, D>(
    observation: &O,
    prev_candidates: &[S],
    cur_candidates: &[S],
    message: &HashMap<S, f64>,
    emission_log_probabilities: &HashMap<S, f64>,
    transition_log_probabilities: &HashMap<Transition<S>, f64>,
    transition_descriptors: &HashMap<Transition<S>, D>,
    last_extended_states: &HashMap<S, Rc<ExtendedState<S, O, D>>>,
) -> Result<ForwardStepResult<S, O, D>>
where
    S: Clone + Eq + Hash + fmt::Debug,
    O: Clone,
    D: Clone,
{
    debug_assert!(!prev_candidates.is_empty());
    let mut result = ForwardStepResult {
        message: HashMap::with_capacity(cur_candidates.len()),
        back_pointers: HashMap::with_capacity(cur_candidates.len()),
    };

    for cur_state in cur_candidates {
        let mut max_log_probability = f64::NEG_INFINITY;
        let mut max_prev_state: Option<&S> = None;
        for prev_state in prev_candidates {
            let log_probability = message[prev_state]
                + transition_log_probability(
                    transition_log_probabilities,
                    prev_state,
                    cur_state,
                );
            if log_probability > max_log_probability {
                max_log_probability = log_probability;
                max_prev_state = Some(prev_state);
            }
        }

        let emission = emission_log_probabilities
            .get(cur_state)
            .copied()
            .ok_or_else(|| HmmError::MissingProbability {
                state: format!("{cur_state:?}"),
            })?;
        result
            .message
            .insert(cur_state.clone(), max_log_probability + emission);

        // No predecessor with non-zero probability means cur_state cannot
        // appear in the most likely sequence; it gets no node.
        if let Some(max_prev_state) = max_prev_state {
            let transition = Transition::new(max_prev_state.clone(), cur_state.clone());
            let extended = ExtendedState {
                state: cur_state.clone(),
                back_pointer: last_extended_states.get(max_prev_state).cloned(),
                observation: Some(observation.clone()),
                transition_descriptor: transition_descriptors.get(&transition).cloned(),
            };
            result
                .back_pointers
                .insert(cur_state.clone(), Rc::new(extended));
        }
    }
    Ok(result)
}

/// Negative infinity for transitions absent from the table.
fn transition_log_probability<S>(
    transition_log_probabilities: &HashMap<Transition<S>, f64>,
    prev_state: &S,
    cur_state: &S,
) -> f64
where
    S: Clone + Eq + Hash,
{
    transition_log_probabilities
        .get(&Transition::new(prev_state.clone(), cur_state.clone()))
        .copied()
        .unwrap_or(f64::NEG_INFINITY)
}

/// Whether the message is empty or every candidate has zero probability.
fn hmm_break<S>(message: &HashMap<S, f64>) -> bool {
    message
        .values()
        .all(|&log_probability| log_probability == f64::NEG_INFINITY)
}

/// First candidate attaining the maximum message value.
fn most_likely_state<'a, S>(candidates: &'a [S], message: &HashMap<S, f64>) -> &'a S
where
    S: Eq + Hash,
{
    debug_assert!(!candidates.is_empty());
    let mut best = &candidates[0];
    let mut best_log_probability = message[best];
    for candidate in &candidates[1..] {
        let log_probability = message[candidate];
        if log_probability > best_log_probability {
            best_log_probability = log_probability;
            best = candidate;
        }
    }
    best
}

/// Message values in the caller's candidate order.
fn ordered_snapshot<S>(candidates: &[S], message: &HashMap<S, f64>) -> Vec<(S, f64)>
where
    S: Clone + Eq + Hash,
{
    candidates
        .iter()
        .map(|candidate| (candidate.clone(), message[candidate]))
        .collect()
}
