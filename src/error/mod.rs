#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The camera transform cannot be converted for rasterization.
    #[error("Degenerate camera transform: {0}")]
    DegenerateCamera(String),

    /// The Gaussian asset is missing or malformed.
    #[error("Unable to load the Gaussian asset: {0}")]
    AssetLoad(String),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// A compositing model record is missing or shape-mismatched.
    #[error("Unable to load the compositing model: {0}")]
    ModelLoad(String),

    /// The rasterization kernel itself failed.
    #[error("Rasterization kernel failure: {0}")]
    KernelExecution(String),

    #[error("Validation Error: {0} should be {1}")]
    Validation(String, String),
}

impl From<burn::record::RecorderError> for Error {
    fn from(error: burn::record::RecorderError) -> Self {
        Self::ModelLoad(error.to_string())
    }
}
