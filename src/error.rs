// Error taxonomy for the splat sort pipeline
// Every variant is handled where it occurs (skip-and-continue); none is fatal.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GsplatError {
    /// No source splat data was provided
    #[error("no splat source data provided")]
    MissingAsset,

    /// A shader parameter is not declared by the active material pass
    #[error("material pass has no binding named `{name}`")]
    InvalidBinding { name: String },

    /// The source data contains zero splats
    #[error("splat dataset is empty")]
    EmptyDataset,

    /// A texture, sorter or resource was used after it was disposed
    #[error("{what} used after disposal")]
    DisposedResource { what: &'static str },

    /// Upload payload does not match the texture descriptor
    #[error("texture upload size mismatch: expected {expected} bytes, got {actual}")]
    UploadSizeMismatch { expected: usize, actual: usize },

    /// The background sort worker is not running
    #[error("sort worker is unavailable")]
    WorkerUnavailable,
}

pub type Result<T> = std::result::Result<T, GsplatError>;
