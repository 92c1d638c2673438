use thiserror::Error;

/// Errors raised while moving array data between host and device memory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResidencyError {
    /// The backend cannot reach a device (no driver, no GPU, disabled).
    #[error("device backend '{backend}' is not available")]
    DeviceUnavailable { backend: String },

    /// A device handle was handed to a backend that did not allocate it.
    #[error("buffer {handle} was allocated by '{owner}', not '{backend}'")]
    ForeignHandle {
        handle: u64,
        owner: String,
        backend: String,
    },

    /// Buffer length or rank does not match the declared shape/dims.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Chunk sizes do not tile the array shape.
    #[error("chunk layout {chunks:?} does not tile shape {shape:?}")]
    ChunkMismatch {
        chunks: Vec<Vec<usize>>,
        shape: Vec<usize>,
    },

    #[error("unknown device backend: {0}")]
    UnknownBackend(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidConfig { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, ResidencyError>;
