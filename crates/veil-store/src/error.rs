//! Chunk store errors

use std::path::PathBuf;
use thiserror::Error;
use veil_crypto::CipherError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Chunk store has been destroyed")]
    Destroyed,

    #[error("Chunk store is spilled to disk, reload it first")]
    Spilled,

    #[error("Chunk store has no backing file")]
    NotSpilled,

    #[error("Backing file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Backing file {} is not owned by this chunk store", .0.display())]
    ForeignFile(PathBuf),

    #[error("Range {start}..{end} out of bounds for length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt backing file {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    /// True for the terminal destroyed state
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
