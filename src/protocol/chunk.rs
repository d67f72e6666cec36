//! Chunked byte buffers backed by a shared chunk pool.
//!
//! The network layer and the message decoders exchange [`ByteBuffer`]
//! values: possibly multi-chunk byte regions whose backing memory comes
//! from a [`ChunkPool`]. A buffer is a move-only value; whoever holds it
//! is responsible for disposal, and dropping it returns its chunks to the
//! pool. This keeps ownership explicit when buffers cross task boundaries
//! while waiting for a reply.
//!
//! Two usage flavors share the one type:
//!
//! - **input**: the frame reader pre-sizes a buffer with
//!   [`ByteBuffer::with_len`] and fills it at absolute offsets;
//! - **output**: the message encoder starts from [`ByteBuffer::empty`]
//!   and appends through a [`BufferWriter`], acquiring chunks lazily.
//!
//! # Example
//!
//! ```
//! use wiremux::protocol::{BufferWriter, ByteBuffer, ChunkPool};
//!
//! let pool = ChunkPool::new();
//! let mut buffer = ByteBuffer::empty(&pool);
//!
//! let mut writer = BufferWriter::new(&mut buffer);
//! writer.put_i32_le(16);
//! writer.put_slice(b"hello");
//!
//! assert_eq!(buffer.read_i32_le(0), 16);
//! assert_eq!(buffer.len(), 9);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;

/// Default chunk size (16 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Default number of free chunks the pool retains.
pub const DEFAULT_MAX_POOLED_CHUNKS: usize = 64;

/// A shared pool of fixed-size byte chunks.
///
/// Cheaply cloneable; clones share the same free list. Chunks released
/// beyond the retention limit are simply dropped.
#[derive(Clone)]
pub struct ChunkPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    chunk_size: usize,
    max_retained: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl ChunkPool {
    /// Create a pool with default chunk size and retention.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CHUNK_SIZE, DEFAULT_MAX_POOLED_CHUNKS)
    }

    /// Create a pool with custom chunk size and retention limit.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn with_config(chunk_size: usize, max_retained: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            inner: Arc::new(PoolInner {
                chunk_size,
                max_retained,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Size of each chunk in bytes.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// Number of free chunks currently retained.
    pub fn available(&self) -> usize {
        self.lock_free().len()
    }

    fn acquire(&self) -> BytesMut {
        let recycled = self.lock_free().pop();
        match recycled {
            Some(mut chunk) => {
                chunk.clear();
                chunk.resize(self.inner.chunk_size, 0);
                chunk
            }
            None => {
                let mut chunk = BytesMut::with_capacity(self.inner.chunk_size);
                chunk.resize(self.inner.chunk_size, 0);
                chunk
            }
        }
    }

    fn release(&self, chunk: BytesMut) {
        let mut free = self.lock_free();
        if free.len() < self.inner.max_retained {
            free.push(chunk);
        }
    }

    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<BytesMut>> {
        self.inner.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ChunkPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkPool")
            .field("chunk_size", &self.inner.chunk_size)
            .field("available", &self.available())
            .finish()
    }
}

/// A possibly multi-chunk byte region with explicit ownership.
///
/// Supports absolute-offset reads and writes, length adjustment, raw
/// segment access at an offset, and a read-only freeze. Dropping the
/// buffer returns its chunks to the pool it came from.
pub struct ByteBuffer {
    pool: ChunkPool,
    chunks: Vec<BytesMut>,
    len: usize,
    read_only: bool,
}

impl ByteBuffer {
    /// Create an empty, writable buffer that grows lazily.
    pub fn empty(pool: &ChunkPool) -> Self {
        Self {
            pool: pool.clone(),
            chunks: Vec::new(),
            len: 0,
            read_only: false,
        }
    }

    /// Create a writable buffer pre-sized to `len` zeroed bytes.
    pub fn with_len(pool: &ChunkPool, len: usize) -> Self {
        let mut buffer = Self::empty(pool);
        buffer.set_len(len);
        buffer
    }

    /// Current logical length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if the buffer has been frozen.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Adjust the logical length, acquiring or releasing chunks as needed.
    ///
    /// Bytes exposed by growth are zeroed (chunks come back from the pool
    /// cleared).
    ///
    /// # Panics
    ///
    /// Panics if the buffer is read-only.
    pub fn set_len(&mut self, len: usize) {
        assert!(!self.read_only, "buffer is read-only");

        let chunk_size = self.pool.chunk_size();
        let needed = len.div_ceil(chunk_size);

        while self.chunks.len() < needed {
            self.chunks.push(self.pool.acquire());
        }
        while self.chunks.len() > needed {
            let chunk = self.chunks.pop().expect("chunk count checked above");
            self.pool.release(chunk);
        }

        self.len = len;
    }

    /// Copy `src` into the buffer at an absolute offset.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is read-only or the range exceeds the length.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) {
        assert!(!self.read_only, "buffer is read-only");
        assert!(
            offset + src.len() <= self.len,
            "write of {} bytes at offset {offset} exceeds length {}",
            src.len(),
            self.len
        );

        let chunk_size = self.pool.chunk_size();
        let mut offset = offset;
        let mut src = src;
        while !src.is_empty() {
            let chunk = offset / chunk_size;
            let within = offset % chunk_size;
            let take = src.len().min(chunk_size - within);
            self.chunks[chunk][within..within + take].copy_from_slice(&src[..take]);
            offset += take;
            src = &src[take..];
        }
    }

    /// Copy bytes at an absolute offset into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the length.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) {
        assert!(
            offset + dst.len() <= self.len,
            "read of {} bytes at offset {offset} exceeds length {}",
            dst.len(),
            self.len
        );

        let chunk_size = self.pool.chunk_size();
        let mut offset = offset;
        let mut dst = dst;
        while !dst.is_empty() {
            let chunk = offset / chunk_size;
            let within = offset % chunk_size;
            let take = dst.len().min(chunk_size - within);
            dst[..take].copy_from_slice(&self.chunks[chunk][within..within + take]);
            offset += take;
            dst = &mut dst[take..];
        }
    }

    /// Borrow the contiguous backing segment starting at `offset`.
    ///
    /// The segment ends at the containing chunk boundary or the buffer
    /// length, whichever comes first. Lets callers peek header fields
    /// without copying.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is at or past the end of the buffer.
    pub fn segment_at(&self, offset: usize) -> &[u8] {
        assert!(offset < self.len, "offset {offset} out of bounds");

        let chunk_size = self.pool.chunk_size();
        let chunk = offset / chunk_size;
        let within = offset % chunk_size;
        let end = (chunk_size - within).min(self.len - offset);
        &self.chunks[chunk][within..within + end]
    }

    /// Mutably borrow the contiguous backing segment starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is read-only or `offset` is out of bounds.
    pub fn segment_at_mut(&mut self, offset: usize) -> &mut [u8] {
        assert!(!self.read_only, "buffer is read-only");
        assert!(offset < self.len, "offset {offset} out of bounds");

        let chunk_size = self.pool.chunk_size();
        let chunk = offset / chunk_size;
        let within = offset % chunk_size;
        let end = (chunk_size - within).min(self.len - offset);
        &mut self.chunks[chunk][within..within + end]
    }

    /// Read a little-endian i32 at an absolute offset.
    pub fn read_i32_le(&self, offset: usize) -> i32 {
        let mut raw = [0u8; 4];
        self.read_at(offset, &mut raw);
        i32::from_le_bytes(raw)
    }

    /// Write a little-endian i32 at an absolute offset.
    pub fn write_i32_le(&mut self, offset: usize, value: i32) {
        self.write_at(offset, &value.to_le_bytes());
    }

    /// Freeze the buffer, rejecting further writes.
    pub fn freeze(&mut self) {
        self.read_only = true;
    }

    /// Copy the whole buffer into a contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.read_at(0, &mut out);
        out
    }
}

impl Drop for ByteBuffer {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..) {
            self.pool.release(chunk);
        }
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Appending writer over a [`ByteBuffer`], used by message encoders.
pub struct BufferWriter<'a> {
    buffer: &'a mut ByteBuffer,
}

impl<'a> BufferWriter<'a> {
    /// Wrap a writable buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is read-only.
    pub fn new(buffer: &'a mut ByteBuffer) -> Self {
        assert!(!buffer.read_only, "buffer is read-only");
        Self { buffer }
    }

    /// Current write position (the buffer length).
    #[inline]
    pub fn position(&self) -> usize {
        self.buffer.len
    }

    /// Append raw bytes.
    pub fn put_slice(&mut self, src: &[u8]) {
        let offset = self.buffer.len;
        self.buffer.set_len(offset + src.len());
        self.buffer.write_at(offset, src);
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.put_slice(&[value]);
    }

    /// Append a little-endian i32.
    pub fn put_i32_le(&mut self, value: i32) {
        self.put_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u32.
    pub fn put_u32_le(&mut self, value: u32) {
        self.put_slice(&value.to_le_bytes());
    }

    /// Overwrite a little-endian i32 at an earlier offset.
    ///
    /// Encoders use this to back-patch a length prefix once the message
    /// body is written.
    pub fn patch_i32_le(&mut self, offset: usize, value: i32) {
        self.buffer.write_i32_le(offset, value);
    }
}

/// Sequential reader over a [`ByteBuffer`], used by message decoders.
pub struct BufferReader<'a> {
    buffer: &'a ByteBuffer,
    position: usize,
}

impl<'a> BufferReader<'a> {
    /// Wrap a buffer, starting at offset zero.
    pub fn new(buffer: &'a ByteBuffer) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current read position.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.len - self.position
    }

    /// Copy up to `dst.len()` bytes into `dst`, returning how many were
    /// copied.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let take = dst.len().min(self.remaining());
        self.buffer.read_at(self.position, &mut dst[..take]);
        self.position += take;
        take
    }

    /// Read one byte.
    ///
    /// # Panics
    ///
    /// Panics if no bytes remain.
    pub fn get_u8(&mut self) -> u8 {
        let mut raw = [0u8; 1];
        self.buffer.read_at(self.position, &mut raw);
        self.position += 1;
        raw[0]
    }

    /// Read a little-endian i32.
    ///
    /// # Panics
    ///
    /// Panics if fewer than four bytes remain.
    pub fn get_i32_le(&mut self) -> i32 {
        let value = self.buffer.read_i32_le(self.position);
        self.position += 4;
        value
    }

    /// Advance the position without reading.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the remaining bytes.
    pub fn skip(&mut self, count: usize) {
        assert!(count <= self.remaining(), "skip past end of buffer");
        self.position += count;
    }
}
