//! Backing file format and ownership guard
//!
//! A spill file is the bincode encoding of the already-sealed chunks plus
//! the id of the store that wrote it. Nothing is re-encrypted on the way
//! out. The format is private to this crate version.

use crate::arena::Chunk;
use crate::error::{Result, StoreError};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub(crate) const FORMAT_VERSION: u16 = 1;

#[derive(Serialize)]
struct SpillImageRef<'a> {
    version: u16,
    owner: Uuid,
    chunks: Vec<&'a [u8]>,
}

#[derive(Deserialize)]
struct SpillImage {
    version: u16,
    owner: Uuid,
    chunks: Vec<Vec<u8>>,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

fn map_bincode(path: &Path, err: bincode::Error) -> StoreError {
    match *err {
        bincode::ErrorKind::Io(source) => StoreError::io(path, source),
        other => StoreError::Format {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

/// Serialize sealed chunks into `file`
pub(crate) fn write_image(file: &mut File, path: &Path, owner: Uuid, chunks: &[Chunk]) -> Result<()> {
    let image = SpillImageRef {
        version: FORMAT_VERSION,
        owner,
        chunks: chunks.iter().map(|c| &c[..]).collect(),
    };

    let mut writer = BufWriter::new(file);
    codec()
        .serialize_into(&mut writer, &image)
        .map_err(|e| map_bincode(path, e))?;
    writer.flush().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Read sealed chunks back, checking the embedded owner
pub(crate) fn read_image(path: &Path, owner: Uuid) -> Result<Vec<Chunk>> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let size = file.metadata().map_err(|e| StoreError::io(path, e))?.len();

    // Length prefixes can never exceed the file itself
    let image: SpillImage = codec()
        .with_limit(size)
        .deserialize_from(BufReader::new(file))
        .map_err(|e| map_bincode(path, e))?;

    if image.version != FORMAT_VERSION {
        return Err(StoreError::Format {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {}", image.version),
        });
    }
    if image.owner != owner {
        return Err(StoreError::ForeignFile(path.to_path_buf()));
    }

    Ok(image.chunks.into_iter().map(Chunk::from).collect())
}

/// The backing file a store owns. Deleted when dropped.
#[derive(Debug)]
pub(crate) struct SpillFile {
    path: PathBuf,
}

impl SpillFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `other` names this file
    pub(crate) fn is(&self, other: &Path) -> bool {
        if self.path == other {
            return true;
        }
        match (self.path.canonicalize(), other.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        remove_backing_file(&self.path);
    }
}

/// Best-effort delete. A missing file counts as removed; any other failure
/// is logged and reported as `false`.
pub(crate) fn remove_backing_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::trace!(path = %path.display(), "removed backing file");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove backing file");
            false
        }
    }
}
