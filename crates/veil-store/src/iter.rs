//! Lazy, one-shot byte iteration over sealed chunks

use crate::arena::Chunk;
use crate::error::{Result, StoreError};
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use veil_crypto::CipherContext;
use zeroize::Zeroizing;

/// Iterates the bytes of a fixed set of chunks.
///
/// The chunk list is a snapshot taken when the iterator was created, so
/// later appends are not observed. Only the current chunk's plaintext is
/// resident; it is wiped before the next chunk is opened. Once exhausted,
/// closed, or failed, the iterator yields nothing more.
pub struct ChunkIter {
    cipher: Option<Arc<CipherContext>>,
    chunks: std::vec::IntoIter<Chunk>,
    current: Zeroizing<Vec<u8>>,
    pos: usize,
    destroyed: Arc<AtomicBool>,
    done: bool,
}

impl ChunkIter {
    pub(crate) fn new(cipher: Arc<CipherContext>, chunks: Vec<Chunk>, destroyed: Arc<AtomicBool>) -> Self {
        Self {
            cipher: Some(cipher),
            chunks: chunks.into_iter(),
            current: Zeroizing::new(Vec::new()),
            pos: 0,
            destroyed,
            done: false,
        }
    }

    /// Stop early and wipe the resident chunk
    pub fn close(&mut self) {
        self.done = true;
        self.current = Zeroizing::new(Vec::new());
        self.pos = 0;
        self.chunks = Vec::new().into_iter();
        self.cipher = None;
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn fail(&mut self, err: StoreError) -> Option<Result<u8>> {
        self.close();
        Some(Err(err))
    }
}

impl Iterator for ChunkIter {
    type Item = Result<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if let Some(&byte) = self.current.get(self.pos) {
                self.pos += 1;
                return Some(Ok(byte));
            }

            let Some(chunk) = self.chunks.next() else {
                self.close();
                return None;
            };

            if self.destroyed.load(Ordering::Acquire) {
                return self.fail(StoreError::Destroyed);
            }

            let Some(cipher) = self.cipher.as_ref() else {
                return self.fail(StoreError::Destroyed);
            };

            match cipher.decrypt(&chunk) {
                Ok(plain) => {
                    // Replacing the buffer drops and wipes the previous chunk
                    self.current = plain;
                    self.pos = 0;
                }
                Err(e) => return self.fail(e.into()),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let resident = self.current.len().saturating_sub(self.pos);
        let sealed: usize = self
            .chunks
            .as_slice()
            .iter()
            .map(|c| CipherContext::opened_len(c.len()))
            .sum();
        (0, Some(resident + sealed))
    }
}

impl FusedIterator for ChunkIter {}

impl std::fmt::Debug for ChunkIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIter")
            .field("remaining_chunks", &self.chunks.len())
            .field("done", &self.done)
            .finish()
    }
}
