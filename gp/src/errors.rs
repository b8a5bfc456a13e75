use thiserror::Error;

/// A result type for graph engine computations
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when operating on processes of a [`Graph`](crate::Graph)
#[derive(Error, Debug)]
pub enum GpError {
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When array dimensions do not agree
    #[error("ShapeMismatch error: {0}")]
    ShapeMismatch(String),
    /// When an error is due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValue(String),
}
