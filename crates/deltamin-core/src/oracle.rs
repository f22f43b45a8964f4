use crate::types::Verdict;
use std::io;

/// Classifies candidate inputs by running the target once per call.
///
/// Implementations must not share mutable state between invocations: the
/// minimizer may call `invoke` from several worker threads at once.
pub trait Oracle {
    fn invoke(&self, candidate: &[u8]) -> Result<Verdict, OracleError>;

    /// Like [`Oracle::invoke`], but gives up once `cancelled` returns true.
    ///
    /// Returns `Ok(None)` when the invocation was abandoned. The default
    /// only checks the flag before starting; process-backed oracles poll it
    /// while the target runs.
    fn invoke_until(
        &self,
        candidate: &[u8],
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Option<Verdict>, OracleError> {
        if cancelled() {
            return Ok(None);
        }
        self.invoke(candidate).map(Some)
    }
}

impl<O> Oracle for &O
where
    O: Oracle + ?Sized,
{
    fn invoke(&self, candidate: &[u8]) -> Result<Verdict, OracleError> {
        (**self).invoke(candidate)
    }

    fn invoke_until(
        &self,
        candidate: &[u8],
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Option<Verdict>, OracleError> {
        (**self).invoke_until(candidate, cancelled)
    }
}

/// Adapts an infallible closure into an [`Oracle`].
#[derive(Debug, Clone)]
pub struct FnOracle<F>(pub F);

impl<F> Oracle for FnOracle<F>
where
    F: Fn(&[u8]) -> Verdict,
{
    fn invoke(&self, candidate: &[u8]) -> Result<Verdict, OracleError> {
        Ok((self.0)(candidate))
    }
}

/// Failure of the invocation mechanism itself, as opposed to a verdict.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("cannot launch target `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl OracleError {
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        OracleError::Io { context, source }
    }
}
