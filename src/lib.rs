//! Streaming inference for time-inhomogeneous hidden Markov models.
//!
//! "Time-inhomogeneous" means nothing is fixed across time steps: the caller
//! supplies the candidate states, emission probabilities, and transition
//! probabilities anew at every step. That is the natural shape for problems
//! like map matching, where each GPS sample has its own set of road-position
//! candidates and per-pair routing costs, but the engines are domain
//! agnostic: states, observations, and transition descriptors are opaque
//! caller types.
//!
//! ## Engines
//! Two independent engines share the same vocabulary
//! ([`Transition`], candidate lists, probability tables):
//!
//! - [`ViterbiAlgorithm`] computes the most likely state sequence in log
//!   space, streaming one observation at a time and chaining back pointers
//!   so that unreachable history is reclaimed as lattices collapse.
//! - [`ForwardBackwardAlgorithm`] computes smoothing probabilities
//!   p(s_t | o_1..o_T) with per-step scaling, plus the log evidence of the
//!   observation sequence.
//!
//! ## Quick start
//! ```
//! use std::collections::HashMap;
//! use trellis::{Transition, ViterbiAlgorithm};
//!
//! let roads = ["elm", "oak"];
//! let emissions = HashMap::from([("elm", (0.8f64).ln()), ("oak", (0.2f64).ln())]);
//! let transitions = HashMap::from([
//!     (Transition::new("elm", "elm"), (0.6f64).ln()),
//!     (Transition::new("elm", "oak"), (0.4f64).ln()),
//!     (Transition::new("oak", "elm"), (0.4f64).ln()),
//!     (Transition::new("oak", "oak"), (0.6f64).ln()),
//! ]);
//!
//! let mut viterbi: ViterbiAlgorithm<&str, usize> = ViterbiAlgorithm::new();
//! viterbi.start_with_initial_observation(0, &roads, &emissions)?;
//! viterbi.next_step(1, &roads, &emissions, &transitions)?;
//! viterbi.next_step(2, &roads, &emissions, &transitions)?;
//!
//! let sequence = viterbi.compute_most_likely_sequence();
//! assert_eq!(sequence.iter().map(|s| s.state).collect::<Vec<_>>(), ["elm"; 3]);
//! # Ok::<(), trellis::HmmError>(())
//! ```
//!
//! ## Determinism
//! Candidates are always visited in the order of the caller's slice, ties
//! resolve to the first candidate seen (strict `>` comparison), and output
//! vectors preserve that order. Identical inputs produce bit-identical
//! results.
//!
//! ## Probability tables
//! Emission tables must cover every listed candidate
//! ([`HmmError::MissingProbability`] otherwise); transition tables may be
//! sparse, with absent pairs meaning zero probability. The Viterbi engine
//! takes log probabilities, the forward-backward engine linear ones.
//!
//! Engines are single-use: construct one instance per observation sequence.

pub mod error;
pub mod forward_backward;
pub mod options;
pub mod transition;
pub mod utils;
pub mod viterbi;

pub use crate::error::{HmmError, Result};
pub use crate::forward_backward::ForwardBackwardAlgorithm;
pub use crate::options::ViterbiOptions;
pub use crate::transition::{SequenceState, Transition};
pub use crate::viterbi::ViterbiAlgorithm;
