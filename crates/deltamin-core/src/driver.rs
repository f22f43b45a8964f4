use crate::minimize::{MinimizeError, Minimizer};
use crate::minimize_ddmin::DeltaMinimizer;
use crate::oracle::{Oracle, OracleError};
use crate::types::{MinimizationResult, Verdict};
use tracing::info;

/// Checks that the input reproduces the failure, then minimizes it.
#[derive(Debug, Default, Clone)]
pub struct Driver<M = DeltaMinimizer> {
    minimizer: M,
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("program does not crash with initial input (verdict: {})", .verdict.as_str())]
    NotFailing { verdict: Verdict },
    #[error(transparent)]
    Minimize(#[from] MinimizeError),
}

impl DriveError {
    /// True for errors caused by how the tool was invoked rather than by a
    /// failure during the run.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            DriveError::NotFailing { .. } | DriveError::Oracle(OracleError::Spawn { .. })
        )
    }
}

impl<M> Driver<M>
where
    M: Minimizer,
{
    pub fn new(minimizer: M) -> Self {
        Self { minimizer }
    }

    pub fn check_precondition<O>(&self, oracle: &O, input: &[u8]) -> Result<(), DriveError>
    where
        O: Oracle,
    {
        let verdict = oracle.invoke(input)?;
        if !verdict.is_failure() {
            return Err(DriveError::NotFailing { verdict });
        }
        Ok(())
    }

    pub fn run<O>(&self, oracle: &O, input: &[u8]) -> Result<MinimizationResult, DriveError>
    where
        O: Oracle + Sync,
    {
        self.check_precondition(oracle, input)?;
        let result = self.minimizer.minimize(oracle, input)?;
        info!(
            original = result.original_size,
            minimized = result.minimized_size,
            ratio = result.reduction_ratio(),
            "input minimized"
        );
        Ok(result)
    }
}
