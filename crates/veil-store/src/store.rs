//! Encrypted chunk store
//!
//! Every append seals its bytes with the store's cipher context and keeps
//! only the sealed block. Reads open blocks in order until the requested
//! range is covered. `store` moves the sealed blocks to a backing file and
//! drops them from memory; `reload` brings them back.
//!
//! All state sits behind one mutex per store. A long read holds it for the
//! whole scan, so it contends with appends on the same store.

use crate::arena::{Chunk, ChunkArena};
use crate::error::{Result, StoreError};
use crate::iter::ChunkIter;
use crate::spill::{self, SpillFile};
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use veil_crypto::{CipherContext, CipherPool};
use zeroize::Zeroizing;

/// Longest chunk a run of single-byte appends is coalesced into
pub const COALESCE_LIMIT: usize = 4096;

/// Knobs a chunk store is created with
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Slots the arena grows by when full
    pub arena_increment: usize,
    /// Where `store()` creates backing files
    pub spill_dir: PathBuf,
}

impl StoreOptions {
    pub const DEFAULT_ARENA_INCREMENT: usize = 16;
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            arena_increment: Self::DEFAULT_ARENA_INCREMENT,
            spill_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Chunks resident, readable and appendable
    Active,
    /// Chunks live only in the backing file
    Spilled,
    /// Terminal
    Destroyed,
}

struct Inner {
    cipher: Option<Arc<CipherContext>>,
    arena: ChunkArena,
    len: usize,
    last_single: bool,
    backing: Option<SpillFile>,
}

impl Inner {
    fn cipher(&self) -> Result<Arc<CipherContext>> {
        self.cipher.clone().ok_or(StoreError::Destroyed)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.cipher.is_none() {
            return Err(StoreError::Destroyed);
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        self.ensure_alive()?;
        if self.backing.is_some() {
            return Err(StoreError::Spilled);
        }
        Ok(())
    }

    fn append_plain(&mut self, cipher: &CipherContext, plain: &[u8]) -> Result<()> {
        if plain.is_empty() {
            return Ok(());
        }
        let block = cipher.encrypt(plain)?;
        self.arena.push(Chunk::from(block));
        self.len += plain.len();
        self.last_single = false;
        Ok(())
    }

    /// The owned backing file `path` refers to, or the current one for `None`
    fn resolve(&self, path: Option<&Path>) -> Result<&SpillFile> {
        match (path, self.backing.as_ref()) {
            (None, Some(backing)) => Ok(backing),
            (None, None) => Err(StoreError::NotSpilled),
            (Some(p), Some(backing)) if backing.is(p) => Ok(backing),
            (Some(p), _) if !p.exists() => Err(StoreError::NotFound(p.to_path_buf())),
            (Some(p), _) => Err(StoreError::ForeignFile(p.to_path_buf())),
        }
    }

    fn wipe(&mut self) {
        self.arena.clear();
        self.len = 0;
        self.last_single = false;
    }
}

/// Append-only, randomly readable container of encrypted bytes
pub struct ChunkStore {
    id: Uuid,
    options: StoreOptions,
    destroyed: Arc<AtomicBool>,
    inner: Mutex<Inner>,
}

impl ChunkStore {
    /// Create a store around a cipher context it will hold for life
    pub fn new(cipher: Arc<CipherContext>) -> Self {
        Self::with_options(cipher, StoreOptions::default())
    }

    pub fn with_options(cipher: Arc<CipherContext>, options: StoreOptions) -> Self {
        let id = Uuid::new_v4();
        tracing::trace!(store = %id, context = cipher.id(), "created chunk store");
        Self {
            id,
            inner: Mutex::new(Inner {
                cipher: Some(cipher),
                arena: ChunkArena::new(options.arena_increment),
                len: 0,
                last_single: false,
                backing: None,
            }),
            options,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a store with a context checked out of `pool`
    pub fn from_pool(pool: &CipherPool) -> Result<Self> {
        Self::from_pool_with_options(pool, StoreOptions::default())
    }

    pub fn from_pool_with_options(pool: &CipherPool, options: StoreOptions) -> Result<Self> {
        Ok(Self::with_options(pool.checkout()?, options))
    }

    /// Identity stamped into every backing file this store writes
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    // ---- appends ----

    /// Seal `bytes` as one new chunk
    pub fn append(&self, bytes: &[u8]) -> Result<()> {
        self.append_range(bytes, 0, bytes.len())
    }

    /// Seal `bytes[start..end]` as one new chunk. Empty ranges are no-ops.
    pub fn append_range(&self, bytes: &[u8], start: usize, end: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        if start > end || end > bytes.len() {
            return Err(StoreError::OutOfBounds {
                start,
                end,
                len: bytes.len(),
            });
        }
        let cipher = inner.cipher()?;
        inner.append_plain(&cipher, &bytes[start..end])
    }

    /// Append one byte.
    ///
    /// Consecutive single-byte appends are merged into the same chunk (up to
    /// [`COALESCE_LIMIT`] bytes) instead of producing one chunk per byte.
    pub fn append_byte(&self, byte: u8) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let cipher = inner.cipher()?;

        if inner.last_single {
            if let Some(last) = inner.arena.last() {
                let plain = cipher.decrypt(last)?;
                if plain.len() < COALESCE_LIMIT {
                    // Fresh buffer so growing never leaves an unwiped copy behind
                    let mut merged = Zeroizing::new(Vec::with_capacity(plain.len() + 1));
                    merged.extend_from_slice(&plain);
                    merged.push(byte);
                    let block = cipher.encrypt(&merged)?;
                    inner.arena.replace_last(Chunk::from(block));
                    inner.len += 1;
                    return Ok(());
                }
            }
        }

        inner.append_plain(&cipher, &[byte])?;
        inner.last_single = true;
        Ok(())
    }

    // ---- reads ----

    /// Byte at `index`
    pub fn read(&self, index: usize) -> Result<u8> {
        let end = index.checked_add(1).ok_or_else(|| StoreError::OutOfBounds {
            start: index,
            end: index,
            len: self.len(),
        })?;
        let bytes = self.read_range(index, end)?;
        Ok(bytes[0])
    }

    /// Bytes in `start..end`.
    ///
    /// Chunks ending before `start` are skipped by their sealed length;
    /// only chunks overlapping the range are opened.
    pub fn read_range(&self, start: usize, end: usize) -> Result<Zeroizing<Vec<u8>>> {
        let inner = self.inner.lock();
        inner.ensure_alive()?;
        if start > end || end > inner.len {
            return Err(StoreError::OutOfBounds {
                start,
                end,
                len: inner.len,
            });
        }

        let mut out = Zeroizing::new(Vec::with_capacity(end - start));
        if start == end {
            return Ok(out);
        }

        let cipher = inner.cipher()?;
        let mut offset = 0;
        for chunk in inner.arena.chunks() {
            let chunk_len = CipherContext::opened_len(chunk.len());
            let chunk_end = offset + chunk_len;
            if chunk_end > start {
                let plain = cipher.decrypt(chunk)?;
                let from = start.saturating_sub(offset);
                let to = (end - offset).min(plain.len());
                out.extend_from_slice(&plain[from..to]);
            }
            offset = chunk_end;
            if offset >= end {
                break;
            }
        }
        Ok(out)
    }

    /// Every byte, in append order
    pub fn read_all(&self) -> Result<Zeroizing<Vec<u8>>> {
        let inner = self.inner.lock();
        inner.ensure_alive()?;
        let cipher = inner.cipher()?;
        open_all(&cipher, inner.arena.chunks(), inner.len)
    }

    /// Lazy iteration over a snapshot of the current chunks
    pub fn iter(&self) -> Result<ChunkIter> {
        let inner = self.inner.lock();
        let cipher = inner.cipher()?;
        Ok(ChunkIter::new(
            cipher,
            inner.arena.snapshot(),
            Arc::clone(&self.destroyed),
        ))
    }

    // ---- spill ----

    /// Spill the sealed chunks to a fresh file in the spill directory
    pub fn store(&self) -> Result<PathBuf> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;

        let dir = &self.options.spill_dir;
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let mut temp = tempfile::Builder::new()
            .prefix("veil-")
            .suffix(".spill")
            .tempfile_in(dir)
            .map_err(|e| StoreError::io(dir, e))?;

        let path = temp.path().to_path_buf();
        spill::write_image(temp.as_file_mut(), &path, self.id, inner.arena.chunks())?;
        let path = temp
            .into_temp_path()
            .keep()
            .map_err(|e| StoreError::io(&path, e.error))?;

        Ok(self.finish_spill(&mut inner, path))
    }

    /// Spill the sealed chunks to `path`, creating or truncating it
    pub fn store_to(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.inner.lock();
        inner.ensure_active()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut file = File::create(&path).map_err(|e| StoreError::io(&path, e))?;
        if let Err(e) = spill::write_image(&mut file, &path, self.id, inner.arena.chunks()) {
            drop(file);
            spill::remove_backing_file(&path);
            return Err(e);
        }

        Ok(self.finish_spill(&mut inner, path))
    }

    fn finish_spill(&self, inner: &mut Inner, path: PathBuf) -> PathBuf {
        tracing::debug!(
            store = %self.id,
            chunks = inner.arena.len(),
            bytes = inner.len,
            path = %path.display(),
            "spilled chunk store"
        );
        inner.backing = Some(SpillFile::new(path.clone()));
        inner.wipe();
        path
    }

    /// Bring spilled content back into memory, then delete the file.
    ///
    /// `None` means the file written by the last `store`.
    pub fn reload(&self, path: Option<&Path>) -> Result<&Self> {
        let mut inner = self.inner.lock();
        inner.ensure_alive()?;
        let path = inner.resolve(path)?.path().to_path_buf();
        let chunks = spill::read_image(&path, self.id)?;
        let cipher = inner.cipher()?;

        for chunk in &chunks {
            let restored = cipher
                .decrypt(chunk)
                .map_err(StoreError::from)
                .and_then(|plain| inner.append_plain(&cipher, &plain));
            if let Err(e) = restored {
                inner.wipe();
                return Err(e);
            }
        }

        tracing::debug!(
            store = %self.id,
            chunks = inner.arena.len(),
            bytes = inner.len,
            path = %path.display(),
            "reloaded chunk store"
        );
        // Dropping the guard deletes the file
        inner.backing = None;
        Ok(self)
    }

    /// Open the backing file's content without touching memory state
    pub fn peek_stored(&self, path: Option<&Path>) -> Result<Zeroizing<Vec<u8>>> {
        let inner = self.inner.lock();
        inner.ensure_alive()?;
        let path = inner.resolve(path)?.path().to_path_buf();
        let cipher = inner.cipher()?;

        let chunks = spill::read_image(&path, self.id)?;
        let len = chunks
            .iter()
            .map(|c| CipherContext::opened_len(c.len()))
            .sum();
        open_all(&cipher, &chunks, len)
    }

    /// Lazy iteration over a fresh read of the backing file
    pub fn stream_stored(&self, path: Option<&Path>) -> Result<ChunkIter> {
        let inner = self.inner.lock();
        inner.ensure_alive()?;
        let path = inner.resolve(path)?.path().to_path_buf();
        let cipher = inner.cipher()?;

        let chunks = spill::read_image(&path, self.id)?;
        Ok(ChunkIter::new(cipher, chunks, Arc::clone(&self.destroyed)))
    }

    // ---- teardown ----

    /// Discard everything: chunks, cipher reference and any backing file.
    /// Idempotent; every later call except state queries fails.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock();
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.wipe();
        inner.cipher = None;
        inner.backing = None;
        tracing::debug!(store = %self.id, "destroyed chunk store");
    }

    // ---- state queries ----

    /// Logical length in bytes (0 while spilled)
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.lock().arena.len()
    }

    pub fn state(&self) -> StoreState {
        let inner = self.inner.lock();
        if inner.cipher.is_none() {
            StoreState::Destroyed
        } else if inner.backing.is_some() {
            StoreState::Spilled
        } else {
            StoreState::Active
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn is_spilled(&self) -> bool {
        self.state() == StoreState::Spilled
    }

    /// Path of the owned backing file, if spilled
    pub fn backing_file(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .backing
            .as_ref()
            .map(|b| b.path().to_path_buf())
    }
}

fn open_all(cipher: &CipherContext, chunks: &[Chunk], len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(Vec::with_capacity(len));
    for chunk in chunks {
        let plain = cipher.decrypt(chunk)?;
        out.extend_from_slice(&plain);
    }
    Ok(out)
}

impl Drop for ChunkStore {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ChunkStore")
            .field("id", &self.id)
            .field("len", &inner.len)
            .field("chunks", &inner.arena.len())
            .field("spilled", &inner.backing.is_some())
            .field("destroyed", &inner.cipher.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ChunkStore {
        let options = StoreOptions {
            arena_increment: 4,
            spill_dir: dir.path().to_path_buf(),
        };
        ChunkStore::with_options(Arc::new(CipherContext::new().unwrap()), options)
    }

    #[test]
    fn test_append_and_read_all() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"hello ").unwrap();
        store.append(b"world").unwrap();

        assert_eq!(store.len(), 11);
        assert_eq!(store.chunk_count(), 2);
        assert_eq!(store.read_all().unwrap().as_slice(), b"hello world");
    }

    #[test]
    fn test_append_range_and_empty_noop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append_range(b"xxsecretxx", 2, 8).unwrap();
        store.append(b"").unwrap();
        store.append_range(b"abc", 1, 1).unwrap();

        assert_eq!(store.chunk_count(), 1);
        assert_eq!(store.read_all().unwrap().as_slice(), b"secret");
        assert!(matches!(
            store.append_range(b"abc", 2, 5),
            Err(StoreError::OutOfBounds { .. })
        ));
        assert!(matches!(
            store.append_range(b"abc", 2, 1),
            Err(StoreError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_single_byte_appends_coalesce() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        for b in b"abc" {
            store.append_byte(*b).unwrap();
        }
        assert_eq!(store.chunk_count(), 1);

        store.append(b"de").unwrap();
        store.append_byte(b'f').unwrap();
        assert_eq!(store.chunk_count(), 3);
        assert_eq!(store.read_all().unwrap().as_slice(), b"abcdef");
    }

    #[test]
    fn test_coalesce_limit_starts_new_chunk() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        for _ in 0..COALESCE_LIMIT + 1 {
            store.append_byte(7).unwrap();
        }
        assert_eq!(store.chunk_count(), 2);
        assert_eq!(store.len(), COALESCE_LIMIT + 1);
    }

    #[test]
    fn test_read_index_and_ranges_across_chunks() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"0123").unwrap();
        store.append(b"4567").unwrap();
        store.append(b"89").unwrap();

        assert_eq!(store.read(0).unwrap(), b'0');
        assert_eq!(store.read(5).unwrap(), b'5');
        assert_eq!(store.read(9).unwrap(), b'9');
        assert_eq!(store.read_range(2, 7).unwrap().as_slice(), b"23456");
        assert_eq!(store.read_range(4, 8).unwrap().as_slice(), b"4567");
        assert!(store.read_range(3, 3).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_bounds_reads() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"abc").unwrap();

        assert!(matches!(store.read(3), Err(StoreError::OutOfBounds { .. })));
        assert!(matches!(store.read(usize::MAX), Err(StoreError::OutOfBounds { .. })));
        assert!(matches!(
            store.read_range(1, 4),
            Err(StoreError::OutOfBounds { start: 1, end: 4, len: 3 })
        ));
        assert!(matches!(store.read_range(2, 1), Err(StoreError::OutOfBounds { .. })));
    }

    #[test]
    fn test_iter_snapshot_ignores_later_appends() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"abc").unwrap();
        let iter = store.iter().unwrap();
        store.append(b"def").unwrap();

        let seen: Vec<u8> = iter.collect::<Result<_>>().unwrap();
        assert_eq!(seen, b"abc");
    }

    #[test]
    fn test_iter_fails_after_destroy() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"a").unwrap();
        store.append(b"b").unwrap();

        let mut iter = store.iter().unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), b'a');
        store.destroy();
        assert!(matches!(iter.next(), Some(Err(StoreError::Destroyed))));
    }

    #[test]
    fn test_store_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"top ").unwrap();
        store.append_byte(b's').unwrap();
        store.append_byte(b'e').unwrap();
        store.append(b"cret").unwrap();
        let before = store.read_all().unwrap();

        let path = store.store().unwrap();
        assert!(path.exists());
        assert!(path.starts_with(dir.path()));
        assert_eq!(store.state(), StoreState::Spilled);
        assert_eq!(store.len(), 0);
        assert_eq!(store.chunk_count(), 0);
        assert_eq!(store.backing_file(), Some(path.clone()));

        store.reload(None).unwrap();
        assert_eq!(store.state(), StoreState::Active);
        assert_eq!(store.read_all().unwrap(), before);
        assert!(!path.exists());
        assert!(store.backing_file().is_none());
    }

    #[test]
    fn test_spilled_file_is_ciphertext() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"PLAINTEXT-MARKER").unwrap();
        let path = store.store().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(!raw.windows(16).any(|w| w == b"PLAINTEXT-MARKER"));
    }

    #[test]
    fn test_store_to_explicit_path() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"payload").unwrap();

        let target = dir.path().join("nested").join("explicit.spill");
        let path = store.store_to(&target).unwrap();
        assert_eq!(path, target);
        assert!(target.exists());

        store.reload(Some(&target)).unwrap();
        assert_eq!(store.read_all().unwrap().as_slice(), b"payload");
        assert!(!target.exists());
    }

    #[test]
    fn test_spilled_store_rejects_appends_and_second_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"abc").unwrap();
        store.store().unwrap();

        assert!(matches!(store.append(b"x"), Err(StoreError::Spilled)));
        assert!(matches!(store.append_byte(1), Err(StoreError::Spilled)));
        assert!(matches!(store.store(), Err(StoreError::Spilled)));
        assert!(matches!(store.read(0), Err(StoreError::OutOfBounds { .. })));
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_peek_is_non_mutating() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"peek me").unwrap();
        let path = store.store().unwrap();

        let first = store.peek_stored(None).unwrap();
        let second = store.peek_stored(Some(&path)).unwrap();
        assert_eq!(first.as_slice(), b"peek me");
        assert_eq!(first, second);
        assert_eq!(store.len(), 0);
        assert!(store.is_spilled());
        assert!(path.exists());
    }

    #[test]
    fn test_stream_stored() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"str").unwrap();
        store.append(b"eam").unwrap();
        store.store().unwrap();

        let bytes: Vec<u8> = store.stream_stored(None).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(bytes, b"stream");
        assert!(store.is_spilled());
    }

    #[test]
    fn test_foreign_file_rejected() {
        let dir = TempDir::new().unwrap();
        let a = store_in(&dir);
        let b = store_in(&dir);
        a.append(b"a").unwrap();
        b.append(b"b").unwrap();
        let a_path = a.store().unwrap();
        b.store().unwrap();

        assert!(matches!(b.reload(Some(&a_path)), Err(StoreError::ForeignFile(_))));
        assert!(matches!(b.peek_stored(Some(&a_path)), Err(StoreError::ForeignFile(_))));
        assert!(matches!(b.stream_stored(Some(&a_path)), Err(StoreError::ForeignFile(_))));

        let missing = dir.path().join("nope.spill");
        assert!(matches!(b.reload(Some(&missing)), Err(StoreError::NotFound(_))));
        // b is untouched by the failed attempts
        assert_eq!(b.reload(None).unwrap().read_all().unwrap().as_slice(), b"b");
    }

    #[test]
    fn test_reload_without_spill() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(store.reload(None), Err(StoreError::NotSpilled)));
        assert!(matches!(store.peek_stored(None), Err(StoreError::NotSpilled)));
    }

    #[test]
    fn test_backing_file_deleted_externally() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"gone").unwrap();
        let path = store.store().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(store.reload(None), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_destroy_is_terminal() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"abc").unwrap();
        let path = store.store().unwrap();

        store.destroy();
        store.destroy();
        assert!(store.is_destroyed());
        assert_eq!(store.state(), StoreState::Destroyed);
        assert!(!path.exists());

        assert!(store.append(b"x").unwrap_err().is_destroyed());
        assert!(store.read_all().unwrap_err().is_destroyed());
        assert!(store.read(0).unwrap_err().is_destroyed());
        assert!(store.iter().unwrap_err().is_destroyed());
        assert!(store.store().unwrap_err().is_destroyed());
        assert!(store.reload(None).unwrap_err().is_destroyed());
        assert!(store.peek_stored(None).unwrap_err().is_destroyed());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_drop_deletes_backing_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(b"abc").unwrap();
        let path = store.store().unwrap();
        drop(store);
        assert!(!path.exists());
    }

    #[test]
    fn test_from_pool() {
        let pool = CipherPool::new(1);
        let a = ChunkStore::from_pool(&pool).unwrap();
        let b = ChunkStore::from_pool(&pool).unwrap();
        a.append(b"one").unwrap();
        b.append(b"two").unwrap();
        assert_eq!(a.read_all().unwrap().as_slice(), b"one");
        assert_eq!(b.read_all().unwrap().as_slice(), b"two");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_concurrent_appends_same_store() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir));
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.append(&[i; 4]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 8 * 25 * 4);
        for i in 0..8u8 {
            assert_eq!(all.iter().filter(|b| **b == i).count(), 100);
        }
    }
}
