//! Byte-range resolution over a chunked file.
//!
//! Maps a requested inclusive byte range onto the chunk indices that hold it
//! and the bytes to discard from the first and last of those chunks.

use bytes::Bytes;
use std::ops::Range;

use crate::{TransferError, TransferResult};

/// Byte range for partial content requests (inclusive offsets)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>, // None means "to end of file"
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Parse a `Range` header value (`bytes=<start>-<end>` or `bytes=<start>-`).
    ///
    /// Parsing is permissive: anything without a leading integer start
    /// (including suffix ranges like `bytes=-500`) yields `None`, which callers
    /// treat as "no range". An unparseable end is treated as omitted. Only
    /// the first range of a multi-range list is honoured.
    pub fn parse_header(value: &str) -> Option<Self> {
        let value = value.trim();
        let ranges = value
            .strip_prefix("bytes=")
            .or_else(|| value.strip_prefix("bytes ="))?;
        let first = ranges.split(',').next()?.trim();
        let (start, end) = first.split_once('-')?;

        let start = start.trim().parse::<u64>().ok()?;
        let end = end.trim().parse::<u64>().ok();

        Some(Self { start, end })
    }
}

/// Byte layout of a stored file: total size and the fixed chunk size.
///
/// Every chunk except possibly the last holds exactly `chunk_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileByteLayout {
    pub size: u64,
    pub chunk_size: u64,
}

impl FileByteLayout {
    pub fn new(size: u64, chunk_size: u64) -> TransferResult<Self> {
        if chunk_size == 0 {
            return Err(TransferError::invalid("chunk size must be positive"));
        }
        Ok(Self { size, chunk_size })
    }

    /// ceil(size / chunk_size)
    pub fn total_chunks(&self) -> u64 {
        self.size.div_ceil(self.chunk_size)
    }

    /// Offset of the first byte of chunk `index`
    pub fn chunk_start(&self, index: u32) -> u64 {
        index as u64 * self.chunk_size
    }

    /// Expected length of chunk `index`, or `None` past the end of the file
    pub fn chunk_len(&self, index: u32) -> Option<u64> {
        let start = self.chunk_start(index);
        if start >= self.size {
            return None;
        }
        Some((self.size - start).min(self.chunk_size))
    }
}

/// Resolve an optional requested range against `layout`.
pub fn resolve(range: Option<ByteRange>, layout: FileByteLayout) -> TransferResult<ResolvedRange> {
    ResolvedRange::resolve(range, layout)
}

/// The outcome of resolving a request against a file layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRange {
    /// First byte served (inclusive)
    pub start: u64,
    /// Last byte served (inclusive); meaningless when `length == 0`
    pub end: u64,
    pub total_size: u64,
    pub chunk_size: u64,
    /// True when the caller asked for a range (206), false for full content (200)
    pub partial: bool,
    chunks: Range<u32>,
}

impl ResolvedRange {
    /// Resolve an optional requested range against `layout`.
    pub fn resolve(range: Option<ByteRange>, layout: FileByteLayout) -> TransferResult<Self> {
        let size = layout.size;

        let Some(range) = range else {
            if size == 0 {
                return Ok(Self {
                    start: 0,
                    end: 0,
                    total_size: 0,
                    chunk_size: layout.chunk_size,
                    partial: false,
                    chunks: 0..0,
                });
            }
            return Self::spanning(0, size - 1, layout, false);
        };

        if size == 0 || range.start >= size {
            return Err(TransferError::RangeNotSatisfiable { size });
        }

        let end = match range.end {
            Some(end) if end < size => end,
            _ => size - 1,
        };
        if range.start > end {
            return Err(TransferError::RangeNotSatisfiable { size });
        }

        Self::spanning(range.start, end, layout, true)
    }

    fn spanning(start: u64, end: u64, layout: FileByteLayout, partial: bool) -> TransferResult<Self> {
        let chunk = layout.chunk_size;
        let first = start / chunk;
        let last = (end + 1).div_ceil(chunk) - 1;

        let first = u32::try_from(first)
            .map_err(|_| TransferError::invalid("range starts beyond addressable chunks"))?;
        let last = u32::try_from(last)
            .map_err(|_| TransferError::invalid("range ends beyond addressable chunks"))?;

        Ok(Self {
            start,
            end,
            total_size: layout.size,
            chunk_size: chunk,
            partial,
            chunks: first..last + 1,
        })
    }

    /// Number of bytes that will be served
    pub fn content_length(&self) -> u64 {
        if self.chunks.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// Chunk indices to fetch, ascending
    pub fn chunk_indices(&self) -> Range<u32> {
        self.chunks.clone()
    }

    pub fn first_chunk(&self) -> Option<u32> {
        (!self.chunks.is_empty()).then_some(self.chunks.start)
    }

    pub fn last_chunk(&self) -> Option<u32> {
        (!self.chunks.is_empty()).then(|| self.chunks.end - 1)
    }

    /// Bytes to discard from the front of the first fetched chunk
    pub fn leading_discard(&self) -> u64 {
        self.start - self.chunks.start as u64 * self.chunk_size
    }

    /// Bytes to discard from the back of the last fetched chunk, given how
    /// many bytes that chunk actually holds.
    pub fn trailing_discard(&self, last_chunk_len: u64) -> u64 {
        let last = match self.last_chunk() {
            Some(last) => last as u64,
            None => return 0,
        };
        let chunk_end = last * self.chunk_size + last_chunk_len;
        chunk_end.saturating_sub(self.end + 1).min(last_chunk_len)
    }

    /// Cut the bytes of chunk `index` down to the part inside the range.
    pub fn trim(&self, index: u32, data: Bytes) -> Bytes {
        let len = data.len() as u64;
        let head = if Some(index) == self.first_chunk() {
            self.leading_discard().min(len)
        } else {
            0
        };
        let tail = if Some(index) == self.last_chunk() {
            self.trailing_discard(len)
        } else {
            0
        };

        let to = len.saturating_sub(tail).max(head);
        data.slice(head as usize..to as usize)
    }

    /// `Content-Range` value for a partial response
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total_size)
    }

    /// `Content-Range` value for a 416 response
    pub fn unsatisfied_content_range(size: u64) -> String {
        format!("bytes */{}", size)
    }
}
