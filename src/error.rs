use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An input array does not have the dimensions the model needs
    #[error("{what} has the wrong shape: expected {expected}, found {found}")]
    DataShape {
        what: &'static str,
        expected: String,
        found: String,
    },

    #[error("invalid input data: {0}")]
    InvalidData(String),

    /// Parameters rejected before any model is built
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The solver proved that no assignment satisfies the capacity and
    /// resource count. Callers may retry with a larger alpha or k.
    #[error("no feasible assignment exists (k = {k}, alpha = {alpha}, capacity = {capacity})")]
    Infeasible { k: usize, alpha: f64, capacity: f64 },

    #[error("the model is unbounded")]
    Unbounded,

    #[error("solver failure: {0}")]
    Solver(String),

    /// The solver reported success but its assignment breaks a model
    /// invariant. This points at a bug in model construction or extraction.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn is_infeasible(&self) -> bool {
        matches!(self, Error::Infeasible { .. })
    }

    pub(crate) fn shape(what: &'static str, expected: impl ToString, found: impl ToString) -> Self {
        Error::DataShape {
            what,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
