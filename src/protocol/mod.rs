//! Wire protocol building blocks.
//!
//! Provides:
//! - frame header layout and validation ([`header`])
//! - pooled chunked buffers exchanged between the network layer and the
//!   message codecs ([`chunk`])

mod chunk;
mod header;

pub use chunk::{
    BufferReader, BufferWriter, ByteBuffer, ChunkPool, DEFAULT_CHUNK_SIZE,
    DEFAULT_MAX_POOLED_CHUNKS,
};
pub use header::{
    decode_length, encode_length, validate_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_OFFSET,
    MIN_FRAME_SIZE, REQUEST_ID_OFFSET, RESPONSE_TO_OFFSET,
};
