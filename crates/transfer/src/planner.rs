use serde::Serialize;

use crate::TransferError;

/// One contiguous byte range of the source, the unit of upload and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    /// Zero-based position in the plan.
    pub index: u32,
    /// Byte offset within the source.
    pub start_offset: u64,
    /// Size of this chunk in bytes.
    pub length: u64,
    /// Attempts made so far.
    pub attempt_count: u32,
}

impl ChunkDescriptor {
    /// Exclusive end offset of the chunk.
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.length
    }
}

/// Number of chunks needed to cover `total_size` bytes.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidConfiguration(
            "chunk size must be positive".into(),
        ));
    }
    u32::try_from(total_size.div_ceil(chunk_size)).map_err(|_| {
        TransferError::InvalidConfiguration(format!(
            "{total_size} bytes in {chunk_size}-byte chunks exceeds the chunk index range"
        ))
    })
}

/// Splits `[0, total_size)` into consecutive chunks of `chunk_size` bytes.
///
/// The last chunk may be shorter. A zero-length source yields an empty
/// plan, which callers treat as an immediately successful transfer.
pub fn plan(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkDescriptor>, TransferError> {
    let count = chunk_count(total_size, chunk_size)?;
    let chunks = (0..count)
        .map(|index| {
            let start_offset = u64::from(index) * chunk_size;
            ChunkDescriptor {
                index,
                start_offset,
                length: chunk_size.min(total_size - start_offset),
                attempt_count: 0,
            }
        })
        .collect();
    Ok(chunks)
}
