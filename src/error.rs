//! Error types shared by both inference engines.
//!
//! Every failure is immediate and leaves the engine exactly as it was before
//! the call. The one sticky condition, an HMM break, is *not* an error: it is
//! reported through [`ViterbiAlgorithm::is_broken`](crate::ViterbiAlgorithm::is_broken)
//! and a truncated sequence, while subsequent `next_step` calls fail with
//! [`HmmError::EngineBroken`].

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HmmError>;

/// Failures reported by the Viterbi and forward-backward engines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HmmError {
    /// A step or retrieval was attempted before either `start_with_*` method.
    #[error(
        "start_with_initial_state_probabilities or start_with_initial_observation \
         must be called first"
    )]
    NotStarted,

    /// A second initialization was attempted on the same engine instance.
    #[error("initial probabilities have already been set")]
    AlreadyStarted,

    /// `next_step` was called on a Viterbi engine after an HMM break latched.
    #[error("no further steps are accepted after an HMM break")]
    EngineBroken,

    /// Initial state probabilities handed to the forward-backward engine do
    /// not form a distribution.
    #[error("initial state probabilities sum to {sum}, expected 1")]
    InvalidProbabilities { sum: f64 },

    /// A candidate listed for the step has no entry in the supplied emission
    /// or initial-probability table. Missing *transition* entries are not an
    /// error; they denote zero probability.
    #[error("no probability entry for candidate {state}")]
    MissingProbability { state: String },

    /// A time-step index outside `[0, steps_so_far)` was queried.
    #[error("time step {index} out of range ({len} steps recorded)")]
    IndexOutOfRange { index: usize, len: usize },
}
