use thiserror::Error;

/// The error type for this crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A shape or size mismatch at an API boundary.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A potential parameter failed external validation.
    #[error("Invalid potential parameters: {0}")]
    InvalidPotentialParameters(String),
    /// A non-positive-definite matrix, or a failed Cholesky up/downdate.
    #[error("Numeric failure: {0}")]
    NumericFailure(String),
    /// An error propagated from `ndarray-linalg`.
    #[error("Linear algebra error: {0}")]
    Linalg(String),
    /// An error reported by an external potential-matching collaborator.
    #[error("Potential update error: {0}")]
    Other(String),
}

impl From<ndarray_linalg::error::LinalgError> for Error {
    fn from(err: ndarray_linalg::error::LinalgError) -> Self {
        Self::Linalg(err.to_string())
    }
}

/// A specialized [`Result`] type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
