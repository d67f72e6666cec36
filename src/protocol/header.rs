//! Wire frame header encoding and decoding.
//!
//! Every frame starts with a fixed little-endian prefix:
//!
//! ```text
//! ┌────────────┬────────────┬─────────────┬─────────────┐
//! │ Length     │ Request ID │ Response-to │ Payload     │
//! │ 4 bytes    │ 4 bytes    │ 4 bytes     │ Length - 12 │
//! │ u32 LE     │ i32 LE     │ i32 LE      │ opaque      │
//! └────────────┴────────────┴─────────────┴─────────────┘
//! ```
//!
//! The length counts the whole frame, prefix included. The response-to
//! field identifies which outbound request a reply answers; everything
//! past the prefix is opaque to this layer.

use crate::error::{Error, Result};

/// Byte offset of the length prefix.
pub const LENGTH_OFFSET: usize = 0;

/// Byte offset of the request id field.
pub const REQUEST_ID_OFFSET: usize = 4;

/// Byte offset of the response-to field.
pub const RESPONSE_TO_OFFSET: usize = 8;

/// Smallest frame the wire format allows (the prefix alone).
pub const MIN_FRAME_SIZE: usize = 12;

/// Default maximum frame size (48 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 48 * 1024 * 1024;

/// Decode the length prefix from the first four bytes of a frame.
#[inline]
pub fn decode_length(prefix: [u8; 4]) -> u32 {
    u32::from_le_bytes(prefix)
}

/// Encode a frame length into its four-byte prefix.
#[inline]
pub fn encode_length(length: u32) -> [u8; 4] {
    length.to_le_bytes()
}

/// Validate a decoded length prefix against the configured maximum.
///
/// Returns the length as a `usize` ready for buffer allocation.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the length is shorter than
/// [`MIN_FRAME_SIZE`] or longer than `max_frame_size`.
pub fn validate_length(length: u32, max_frame_size: usize) -> Result<usize> {
    let length = length as usize;

    if length < MIN_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame length {length} is shorter than the {MIN_FRAME_SIZE}-byte header"
        )));
    }

    if length > max_frame_size {
        return Err(Error::Protocol(format!(
            "frame length {length} exceeds maximum {max_frame_size}"
        )));
    }

    Ok(length)
}
