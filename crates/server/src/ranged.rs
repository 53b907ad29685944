//! Seekable view over a positional reader.
//!
//! The cache and the bundle store hand out offset-addressed readers;
//! HTTP range serving wants a sequential stream that can be positioned
//! first. [`RangedReader`] bridges the two.

use bytes::Bytes;
use futures::Stream;
use stacks_storage::{BlobRead, StorageResult, COPY_CHUNK_SIZE};
use thiserror::Error;

/// Invalid seek arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeekError {
    #[error("seek: cannot seek before start of stream")]
    NegativeOffset,
}

/// Where a seek offset is measured from.
#[derive(Clone, Copy, Debug)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Sequential, seekable reader over a positional source of known size.
pub struct RangedReader {
    inner: Box<dyn BlobRead>,
    size: u64,
    offset: u64,
}

impl RangedReader {
    pub fn new(inner: Box<dyn BlobRead>, size: u64) -> Self {
        Self {
            inner,
            size,
            offset: 0,
        }
    }

    /// Total stream size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read up to `len` bytes from the current position and advance.
    /// Short reads near the end are data, not errors; an empty result
    /// is end of stream.
    pub async fn read(&mut self, len: usize) -> StorageResult<Bytes> {
        let chunk = self.inner.read_at(self.offset, len).await?;
        self.offset += chunk.len() as u64;
        Ok(chunk)
    }

    /// Reposition the stream. Offsets past the end clamp to the end; a
    /// negative absolute offset is an error. Returns the new absolute
    /// offset.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, SeekError> {
        let base = match whence {
            Whence::Start => 0i128,
            Whence::Current => self.offset as i128,
            Whence::End => self.size as i128,
        };
        let abs = base + offset as i128;
        if abs < 0 {
            return Err(SeekError::NegativeOffset);
        }
        self.offset = (abs as u64).min(self.size);
        Ok(self.offset)
    }

    /// Adapt the remainder of the stream (at most `limit` bytes if
    /// given) into a byte stream for an HTTP body.
    pub fn into_stream(
        mut self,
        limit: Option<u64>,
    ) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
        let mut remaining = limit.unwrap_or(u64::MAX);
        async_stream::stream! {
            while remaining > 0 {
                let want = remaining.min(COPY_CHUNK_SIZE as u64) as usize;
                match self.read(want).await {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(chunk) => {
                        remaining -= chunk.len() as u64;
                        yield Ok(chunk);
                    }
                    Err(e) => {
                        yield Err(std::io::Error::other(e.to_string()));
                        break;
                    }
                }
            }
        }
    }
}
