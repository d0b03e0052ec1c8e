//! Error types for padlight

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PadlightError {
    #[error("Path {0:?} does not resolve in the current tree")]
    InvalidPath(Vec<i32>),
    #[error("Node at {0:?} has no children")]
    NotAContainer(Vec<i32>),
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PadlightError>;
