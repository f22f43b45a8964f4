//! Granularity-adaptive delta debugging (ddmin).
//!
//! Each round splits the current candidate into `n` balanced chunks and
//! probes, in index order, every complement and then every chunk alone. The
//! first one that still fails becomes the new candidate. When nothing fails
//! the chunks are halved in size until they are single bytes, at which point
//! the candidate is 1-minimal.

use crate::minimize::{
    MinimizationState, MinimizeError, Minimizer, MinimizerConfig, Phase, Step,
};
use crate::oracle::{Oracle, OracleError};
use crate::partition;
use crate::types::{MinimizationResult, Verdict};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone)]
pub struct DeltaMinimizer {
    config: MinimizerConfig,
}

/// Minimizes `input` sequentially with the default configuration.
///
/// `input` is expected to fail under `oracle`; that is not re-checked.
pub fn minimize<O>(oracle: &O, input: &[u8]) -> Result<MinimizationResult, MinimizeError>
where
    O: Oracle + Sync,
{
    DeltaMinimizer::default().minimize(oracle, input)
}

impl DeltaMinimizer {
    pub fn new(config: MinimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MinimizerConfig {
        &self.config
    }

    /// Runs a single round over `state` without looping.
    pub fn step<O>(&self, oracle: &O, state: &MinimizationState) -> Result<Step, MinimizeError>
    where
        O: Oracle + Sync,
    {
        self.session(oracle)?.step(state)
    }

    fn session<'a, O>(&self, oracle: &'a O) -> Result<Session<'a, O>, MinimizeError> {
        let pool = match self.config.jobs {
            1 => None,
            jobs => Some(ThreadPoolBuilder::new().num_threads(jobs).build()?),
        };
        Ok(Session {
            oracle,
            double_check: self.config.double_check,
            pool,
            tally: Tally::default(),
        })
    }
}

impl Minimizer for DeltaMinimizer {
    fn minimize<O>(&self, oracle: &O, input: &[u8]) -> Result<MinimizationResult, MinimizeError>
    where
        O: Oracle + Sync,
    {
        let mut session = self.session(oracle)?;

        if self.config.verify_input {
            let probe = evaluate(oracle, input, self.config.double_check, &|| false)?;
            session.tally.record(&probe);
            let verdict = probe.verdict.unwrap_or(Verdict::Unresolved);
            if !verdict.is_failure() {
                return Err(MinimizeError::InputDoesNotFail { verdict });
            }
        }

        let mut state = MinimizationState::new(input.to_vec());
        // Inputs of one byte or less are returned as given.
        if input.len() > 1 {
            loop {
                match session.step(&state)? {
                    Step::Reduced { phase, index, next } => {
                        info!(
                            phase = phase.as_str(),
                            index,
                            from = state.candidate.len(),
                            to = next.candidate.len(),
                            "reduced candidate"
                        );
                        match phase {
                            Phase::Complement => session.tally.complement_reductions += 1,
                            Phase::Subset => session.tally.subset_reductions += 1,
                        }
                        state = next;
                    }
                    Step::Refined { granularity } => {
                        debug!(len = state.candidate.len(), granularity, "refining partition");
                        session.tally.granularity_increases += 1;
                        state.granularity = granularity;
                    }
                    Step::Done => break,
                }
            }
        }

        let tally = session.tally;
        info!(
            original = input.len(),
            minimized = state.candidate.len(),
            invocations = tally.invocations,
            unresolved = tally.unresolved,
            "minimization finished"
        );
        Ok(MinimizationResult {
            minimized_size: state.candidate.len(),
            minimized: state.candidate,
            original_size: input.len(),
            invocation_count: tally.invocations,
            unresolved_count: tally.unresolved,
            complement_reductions: tally.complement_reductions,
            subset_reductions: tally.subset_reductions,
            granularity_increases: tally.granularity_increases,
            cancelled_count: tally.cancelled,
        })
    }
}

/// Verdict for one candidate and the oracle calls spent on it.
/// `verdict == None` means the probe was skipped or cancelled.
#[derive(Debug, Clone, Copy, Default)]
struct Probe {
    invocations: u64,
    verdict: Option<Verdict>,
}

impl Probe {
    fn fails(&self) -> bool {
        self.verdict == Some(Verdict::Fails)
    }
}

#[derive(Debug, Default)]
struct Tally {
    invocations: u64,
    unresolved: u64,
    cancelled: u64,
    complement_reductions: u64,
    subset_reductions: u64,
    granularity_increases: u64,
}

impl Tally {
    fn record(&mut self, probe: &Probe) {
        self.invocations += probe.invocations;
        match probe.verdict {
            Some(Verdict::Unresolved) => self.unresolved += 1,
            None => self.cancelled += 1,
            Some(_) => {}
        }
    }
}

struct Session<'a, O> {
    oracle: &'a O,
    double_check: bool,
    pool: Option<ThreadPool>,
    tally: Tally,
}

impl<O> Session<'_, O>
where
    O: Oracle + Sync,
{
    fn step(&mut self, state: &MinimizationState) -> Result<Step, MinimizeError> {
        let len = state.candidate.len();
        if len == 0 {
            return Ok(Step::Done);
        }
        let n = state.granularity.min(len);
        let candidate = state.candidate.as_slice();
        debug!(len, granularity = n, "probing round");

        if let Some((index, reduced)) =
            self.first_failing(n, |i| partition::complement(candidate, i, n))?
        {
            return Ok(Step::Reduced {
                phase: Phase::Complement,
                index,
                next: MinimizationState {
                    candidate: reduced,
                    granularity: (n - 1).max(2),
                },
            });
        }

        // With a single chunk the only subset is the candidate itself.
        if n > 1 {
            if let Some((index, reduced)) =
                self.first_failing(n, |i| partition::chunk(candidate, i, n))?
            {
                return Ok(Step::Reduced {
                    phase: Phase::Subset,
                    index,
                    next: MinimizationState {
                        candidate: reduced,
                        granularity: 2,
                    },
                });
            }
        }

        if n < len {
            return Ok(Step::Refined {
                granularity: (2 * n).min(len),
            });
        }
        Ok(Step::Done)
    }

    /// Lowest index in `0..count` whose candidate fails, with that candidate.
    fn first_failing<F>(
        &mut self,
        count: usize,
        build: F,
    ) -> Result<Option<(usize, Vec<u8>)>, MinimizeError>
    where
        F: Fn(usize) -> Vec<u8> + Sync,
    {
        if let Some(pool) = &self.pool {
            if count > 1 {
                let probes = probe_concurrently(pool, self.oracle, self.double_check, count, &build);
                let mut found = None;
                for (index, probe) in probes.into_iter().enumerate() {
                    match probe {
                        Ok(probe) => {
                            self.tally.record(&probe);
                            if found.is_none() && probe.fails() {
                                found = Some(index);
                            }
                        }
                        // A sequential run would never have reached this index.
                        Err(err) if found.is_some() => {
                            debug!(index, error = %err, "ignoring error above adopted candidate");
                            self.tally.cancelled += 1;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                return Ok(found.map(|index| (index, build(index))));
            }
        }

        for index in 0..count {
            let candidate = build(index);
            let probe = evaluate(self.oracle, &candidate, self.double_check, &|| false)?;
            self.tally.record(&probe);
            if probe.fails() {
                return Ok(Some((index, candidate)));
            }
        }
        Ok(None)
    }
}

/// Probes every index on the pool. Once index `k` fails, indices above `k`
/// are skipped or cancelled; indices below it still run to completion so the
/// lowest failing index always wins.
fn probe_concurrently<O, F>(
    pool: &ThreadPool,
    oracle: &O,
    double_check: bool,
    count: usize,
    build: &F,
) -> Vec<Result<Probe, OracleError>>
where
    O: Oracle + Sync,
    F: Fn(usize) -> Vec<u8> + Sync,
{
    let lowest = AtomicUsize::new(usize::MAX);
    pool.install(|| {
        (0..count)
            .into_par_iter()
            .map(|index| {
                if lowest.load(Ordering::Acquire) < index {
                    return Ok(Probe::default());
                }
                let candidate = build(index);
                let cancelled = || lowest.load(Ordering::Acquire) < index;
                let probe = evaluate(oracle, &candidate, double_check, &cancelled)?;
                if probe.fails() {
                    lowest.fetch_min(index, Ordering::AcqRel);
                }
                Ok(probe)
            })
            .collect()
    })
}

fn evaluate<O>(
    oracle: &O,
    candidate: &[u8],
    double_check: bool,
    cancelled: &dyn Fn() -> bool,
) -> Result<Probe, OracleError>
where
    O: Oracle,
{
    let Some(first) = oracle.invoke_until(candidate, cancelled)? else {
        return Ok(Probe::default());
    };
    if first == Verdict::Unresolved {
        warn!(len = candidate.len(), "oracle verdict unresolved");
    }
    if !(first.is_failure() && double_check) {
        return Ok(Probe {
            invocations: 1,
            verdict: Some(first),
        });
    }

    let Some(second) = oracle.invoke_until(candidate, cancelled)? else {
        return Ok(Probe {
            invocations: 1,
            verdict: None,
        });
    };
    let verdict = if second.is_failure() {
        Verdict::Fails
    } else {
        warn!(
            len = candidate.len(),
            second = second.as_str(),
            "failing verdict not confirmed"
        );
        Verdict::Unresolved
    };
    Ok(Probe {
        invocations: 2,
        verdict: Some(verdict),
    })
}
