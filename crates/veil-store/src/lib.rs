//! Veil Store - encrypted chunk storage
//!
//! Payloads are kept as a sequence of sealed chunks, never as plaintext.
//! A store can spill its chunks to a backing file and reload them later;
//! only the store that wrote a file may read it back.

mod arena;
pub mod error;
pub mod iter;
mod spill;
pub mod store;

pub use arena::Chunk;
pub use error::{Result, StoreError};
pub use iter::ChunkIter;
pub use store::{ChunkStore, StoreOptions, StoreState, COALESCE_LIMIT};
