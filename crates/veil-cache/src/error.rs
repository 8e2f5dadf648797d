//! Cache errors

use crate::maintenance::MaintenanceTask;
use thiserror::Error;
use veil_crypto::CipherError;
use veil_store::StoreError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Chunk store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Cannot add an entry without data")]
    EmptyEntry,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Maintenance worker is shut down")]
    ShutDown,

    #[error("Maintenance {task} failed: {message}")]
    Maintenance { task: MaintenanceTask, message: String },

    #[error("Failed to start maintenance worker: {0}")]
    Worker(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
