//! Error type shared by every stage of the flagging pipeline.

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while decimating or flagging a spectrogram.
///
/// Every variant is raised during input validation, before any work is
/// done, except [`FlagError::Numeric`] which signals that a reference
/// distribution could not be built for a given number of degrees of
/// freedom.
#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    #[error("shape error: {0}")]
    Shape(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid polarization selector '{0}' (expected 1, 2 or both)")]
    InvalidPolarization(String),

    #[error("numeric error: {0}")]
    Numeric(String),

    #[error("could not build worker pool: {0}")]
    ThreadPool(String),

    #[error("serialisation failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlagError>;

#[cfg(feature = "python")]
impl From<FlagError> for pyo3::PyErr {
    fn from(err: FlagError) -> Self {
        match err {
            FlagError::Shape(_)
            | FlagError::InvalidParameter(_)
            | FlagError::InvalidPolarization(_) => {
                pyo3::exceptions::PyValueError::new_err(err.to_string())
            }
            _ => pyo3::exceptions::PyRuntimeError::new_err(err.to_string()),
        }
    }
}
