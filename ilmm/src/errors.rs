use thiserror::Error;

/// A result type for mixing model operations
pub type Result<T> = std::result::Result<T, IlmmError>;

/// An error when building or using an [`Ilmm`](crate::Ilmm) model
#[derive(Error, Debug)]
pub enum IlmmError {
    /// When the mixing matrix dimensions do not agree with the processes
    #[error("Mixing matrix shape error: {0}")]
    MixingShape(String),
    /// When the latent noise vector length does not match the latent count
    #[error("Latent noise length error: expected {expected} latent noises, got {actual}")]
    LatentNoiseLength {
        /// Number of latent processes of the model
        expected: usize,
        /// Length of the given noise vector
        actual: usize,
    },
    /// When a noise variance is negative or not a number
    #[error("Negative noise error: {0}")]
    NegativeNoise(String),
    /// When observed data dimensions do not agree with the model
    #[error("Data shape error: {0}")]
    DataShape(String),
    /// When an error is due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValue(String),
    /// When the underlying graph engine fails
    #[error(transparent)]
    GpError(#[from] ilmm_gp::GpError),
}
