//! Growable, index-ordered sequence of sealed chunks

use std::sync::Arc;

/// One sealed block. Shared so iterators can snapshot the arena cheaply.
pub type Chunk = Arc<[u8]>;

pub(crate) struct ChunkArena {
    chunks: Vec<Chunk>,
    increment: usize,
}

impl ChunkArena {
    pub(crate) fn new(increment: usize) -> Self {
        let increment = increment.max(1);
        Self {
            chunks: Vec::with_capacity(increment),
            increment,
        }
    }

    /// Append a chunk, growing by a fixed increment when full
    pub(crate) fn push(&mut self, chunk: Chunk) {
        if self.chunks.len() == self.chunks.capacity() {
            self.chunks.reserve_exact(self.increment);
        }
        self.chunks.push(chunk);
    }

    pub(crate) fn last(&self) -> Option<&Chunk> {
        self.chunks.last()
    }

    pub(crate) fn replace_last(&mut self, chunk: Chunk) {
        if let Some(last) = self.chunks.last_mut() {
            *last = chunk;
        }
    }

    pub(crate) fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn snapshot(&self) -> Vec<Chunk> {
        self.chunks.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.chunks.capacity()
    }

    /// Drop every chunk and give the slots back
    pub(crate) fn clear(&mut self) {
        self.chunks = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(b: u8) -> Chunk {
        vec![b].into()
    }

    #[test]
    fn test_grows_by_increment() {
        let mut arena = ChunkArena::new(4);
        assert_eq!(arena.capacity(), 4);
        for i in 0..4 {
            arena.push(chunk(i));
        }
        assert_eq!(arena.capacity(), 4);

        arena.push(chunk(4));
        assert_eq!(arena.len(), 5);
        assert_eq!(arena.capacity(), 8);
    }

    #[test]
    fn test_replace_last() {
        let mut arena = ChunkArena::new(2);
        arena.push(chunk(1));
        arena.push(chunk(2));
        arena.replace_last(chunk(9));
        assert_eq!(&*arena.chunks()[1], &[9]);
        assert_eq!(&**arena.last().unwrap(), &[9]);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_pushes() {
        let mut arena = ChunkArena::new(2);
        arena.push(chunk(1));
        let snap = arena.snapshot();
        arena.push(chunk(2));
        assert_eq!(snap.len(), 1);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_clear_releases_slots() {
        let mut arena = ChunkArena::new(8);
        arena.push(chunk(1));
        arena.clear();
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.capacity(), 0);
        arena.push(chunk(2));
        assert_eq!(arena.len(), 1);
    }
}
