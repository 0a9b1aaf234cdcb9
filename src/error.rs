use thiserror::Error;

/// Errors surfaced by the locator.
///
/// Conditions that are part of normal operation (nothing held up to the
/// camera, no credible candidate) are not errors and never appear here.
#[derive(Debug, Error)]
pub enum LocateError {
    /// Image bytes could not be decoded or carry no usable structure.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// No reference with this id exists in the store.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad glob pattern: {0}")]
    Pattern(String),
}

pub type Result<T> = std::result::Result<T, LocateError>;
