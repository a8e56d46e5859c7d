//! Error types for the vectrie index

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Bytes on disk do not describe a valid tree.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A page listed in the page index lies outside the index stream.
    #[error("Missing page at offset {offset} (length {length})")]
    MissingPage { offset: i64, length: i32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

impl IndexError {
    /// Shorthand used by the decoders.
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        IndexError::Corruption(msg.into())
    }
}
