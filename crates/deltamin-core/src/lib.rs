pub mod driver;
pub mod minimize;
pub mod minimize_ddmin;
pub mod oracle;
pub mod oracle_process;
pub mod partition;
pub mod types;

pub use driver::{DriveError, Driver};
pub use minimize::{
    MinimizationState, MinimizeError, Minimizer, MinimizerConfig, Phase, Step,
};
pub use minimize_ddmin::{minimize, DeltaMinimizer};
pub use oracle::{FnOracle, Oracle, OracleError};
pub use oracle_process::ProcessOracle;
pub use partition::{chunk, chunk_at, complement, partition, Chunk};
pub use types::{MinimizationResult, Verdict};
