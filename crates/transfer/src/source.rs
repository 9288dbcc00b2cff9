use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::BoxFuture;

/// Errors reading from a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("range {offset}+{length} is outside the {size}-byte source")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },
}

/// Random-access byte source of known length.
///
/// Implementations must allow concurrent reads of disjoint ranges; no
/// shared cursor may leak between callers.
pub trait SourceAccessor: Send + Sync {
    /// Total length in bytes.
    fn size(&self) -> u64;

    /// Reads exactly `length` bytes starting at `offset`.
    fn read_range(&self, offset: u64, length: u64) -> BoxFuture<'_, Result<Vec<u8>, SourceError>>;
}

fn check_range(offset: u64, length: u64, size: u64) -> Result<(), SourceError> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(SourceError::OutOfRange {
            offset,
            length,
            size,
        }),
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A file on disk read with positioned reads on the blocking pool.
pub struct FileSource {
    file: Arc<File>,
    path: PathBuf,
    size: u64,
}

impl FileSource {
    /// Opens `path` and records its current size.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
            _ => SourceError::Io(e),
        })?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            size,
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceAccessor for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, length: u64) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
        Box::pin(async move {
            check_range(offset, length, self.size)?;
            let file = Arc::clone(&self.file);
            tokio::task::spawn_blocking(move || read_exact_at(&file, offset, length))
                .await
                .map_err(|e| SourceError::Io(io::Error::other(format!("task join error: {e}"))))?
        })
    }
}

fn read_exact_at(file: &File, offset: u64, length: u64) -> Result<Vec<u8>, SourceError> {
    let mut buf = vec![0u8; length as usize];
    let mut filled = 0usize;
    while filled < buf.len() {
        match positioned_read(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => {
                return Err(SourceError::ShortRead {
                    offset,
                    expected: length,
                    actual: filled as u64,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf)
}

#[cfg(unix)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// Bytes held in memory.
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl SourceAccessor for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, length: u64) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
        Box::pin(async move {
            check_range(offset, length, self.size())?;
            let start = offset as usize;
            Ok(self.data[start..start + length as usize].to_vec())
        })
    }
}
