use thiserror::Error;

/// Failures raised by the stylizer pipeline.
///
/// Empty detector or model output is not an error; it yields an empty stylized result instead.
#[derive(Debug, Error)]
pub enum StylizerError {
    /// Options, ranges or regions of interest that can never be processed.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A collaborator handed back data that breaks the pipeline contract.
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// The forward transform could not be inverted.
    #[error("transform matrix is singular and cannot be inverted")]
    SingularTransform,
    /// Model, GPU or IO failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StylizerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub(crate) fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }
}

pub type Result<T, E = StylizerError> = std::result::Result<T, E>;
