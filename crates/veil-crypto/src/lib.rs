//! Veil Crypto - cipher layer for the encrypted cache
//!
//! This crate provides:
//! - ChaCha20-Poly1305 cipher contexts with zeroized keys
//! - A bounded, shared pool of cipher contexts for chunk stores

pub mod cipher;
pub mod pool;

pub use cipher::{CipherContext, CipherError};
pub use pool::CipherPool;
