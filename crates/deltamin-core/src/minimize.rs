use crate::oracle::{Oracle, OracleError};
use crate::types::{MinimizationResult, Verdict};

pub trait Minimizer {
    fn minimize<O>(&self, oracle: &O, input: &[u8]) -> Result<MinimizationResult, MinimizeError>
    where
        O: Oracle + Sync;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimizerConfig {
    /// Worker threads for one probing phase. `1` probes sequentially, `0`
    /// sizes the pool to the available parallelism.
    pub jobs: usize,
    /// Confirm every failing verdict with a second invocation.
    pub double_check: bool,
    /// Invoke the oracle on the input before reducing and reject inputs
    /// that do not fail.
    pub verify_input: bool,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            double_check: false,
            verify_input: false,
        }
    }
}

/// The only state carried from one reduction round to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimizationState {
    pub candidate: Vec<u8>,
    pub granularity: usize,
}

impl MinimizationState {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            candidate: input,
            granularity: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Complement,
    Subset,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Complement => "complement",
            Phase::Subset => "subset",
        }
    }
}

/// Outcome of one round over a fixed `(candidate, granularity)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A chunk or complement still fails and becomes the new candidate.
    Reduced {
        phase: Phase,
        index: usize,
        next: MinimizationState,
    },
    /// Nothing reduced; probe again with more, smaller chunks.
    Refined { granularity: usize },
    /// Fixed point: the candidate is 1-minimal.
    Done,
}

#[derive(Debug, thiserror::Error)]
pub enum MinimizeError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("input does not fail under the oracle (verdict: {})", .verdict.as_str())]
    InputDoesNotFail { verdict: Verdict },
    #[error("build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
